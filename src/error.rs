// src/error.rs
//
// Unified error handling for darkroom-core
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - UserError: Invalid request, recoverable by the caller
// - CodecError: Decode/encode failures
// - ColorError: Color-management degradations (profile unavailable)
// - Cancelled: User-requested abort of an in-flight task
// - InternalBug: Library bugs (should not happen)

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy for callers that route failures differently.
///
/// Cancellation is its own category: a stopped load or save must never be
/// presented as a decode/save failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid request, recoverable by the caller
    UserError,
    /// Decode/encode failures
    CodecError,
    /// Color-management failures (profile unavailable, engine rejection)
    ColorError,
    /// User-requested abort of an in-flight task
    Cancelled,
    /// Library bugs (should not happen)
    InternalBug,
}

/// darkroom-core error types
#[derive(Debug, Error)]
pub enum EditError {
    // File I/O Errors
    #[error("File not found: {path}")]
    FileNotFound { path: Cow<'static, str> },

    #[error("Failed to read file '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWriteFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Decode Errors
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image '{path}': {message}")]
    DecodeFailed {
        path: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Color Management Errors
    #[error("Color profile unavailable: {what}")]
    ProfileUnavailable { what: Cow<'static, str> },

    #[error("Color transform failed: {message}")]
    TransformFailed { message: Cow<'static, str> },

    // Cancellation
    #[error("Operation aborted: {what}")]
    Aborted { what: Cow<'static, str> },

    // Operation Errors
    #[error("Selection ({x}+{width}, {y}+{height}) exceeds image dimensions ({img_width}x{img_height})")]
    InvalidSelection {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        img_width: u32,
        img_height: u32,
    },

    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    // State Errors
    #[error("No image loaded in this session")]
    NoImage,

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

impl Clone for EditError {
    fn clone(&self) -> Self {
        match self {
            Self::FileNotFound { path } => Self::FileNotFound { path: path.clone() },
            Self::FileReadFailed { path, source } => Self::FileReadFailed {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::FileWriteFailed { path, source } => Self::FileWriteFailed {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::UnsupportedFormat { format } => Self::UnsupportedFormat {
                format: format.clone(),
            },
            Self::DecodeFailed { path, message } => Self::DecodeFailed {
                path: path.clone(),
                message: message.clone(),
            },
            Self::EncodeFailed { format, message } => Self::EncodeFailed {
                format: format.clone(),
                message: message.clone(),
            },
            Self::ProfileUnavailable { what } => Self::ProfileUnavailable { what: what.clone() },
            Self::TransformFailed { message } => Self::TransformFailed {
                message: message.clone(),
            },
            Self::Aborted { what } => Self::Aborted { what: what.clone() },
            Self::InvalidSelection {
                x,
                y,
                width,
                height,
                img_width,
                img_height,
            } => Self::InvalidSelection {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
                img_width: *img_width,
                img_height: *img_height,
            },
            Self::InvalidArgument {
                name,
                value,
                reason,
            } => Self::InvalidArgument {
                name: name.clone(),
                value: value.clone(),
                reason: reason.clone(),
            },
            Self::NoImage => Self::NoImage,
            Self::InternalPanic { message } => Self::InternalPanic {
                message: message.clone(),
            },
        }
    }
}

// Constructor Helpers
impl EditError {
    pub fn file_not_found(path: impl Into<Cow<'static, str>>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn file_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn file_write_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            source,
        }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(
        path: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::DecodeFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn profile_unavailable(what: impl Into<Cow<'static, str>>) -> Self {
        Self::ProfileUnavailable { what: what.into() }
    }

    pub fn transform_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::TransformFailed {
            message: message.into(),
        }
    }

    pub fn aborted(what: impl Into<Cow<'static, str>>) -> Self {
        Self::Aborted { what: what.into() }
    }

    pub fn invalid_selection(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        img_width: u32,
        img_height: u32,
    ) -> Self {
        Self::InvalidSelection {
            x,
            y,
            width,
            height,
            img_width,
            img_height,
        }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn no_image() -> Self {
        Self::NoImage
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// True when the failure is a user-requested cancellation, not a real error.
    pub fn is_cancellation(&self) -> bool {
        self.category() == ErrorCategory::Cancelled
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::FileNotFound { .. }
            | Self::InvalidSelection { .. }
            | Self::InvalidArgument { .. }
            | Self::NoImage => ErrorCategory::UserError,

            Self::UnsupportedFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::EncodeFailed { .. }
            | Self::FileReadFailed { .. }
            | Self::FileWriteFailed { .. } => ErrorCategory::CodecError,

            Self::ProfileUnavailable { .. } | Self::TransformFailed { .. } => {
                ErrorCategory::ColorError
            }

            Self::Aborted { .. } => ErrorCategory::Cancelled,

            Self::InternalPanic { .. } => ErrorCategory::InternalBug,
        }
    }
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ColorError => "ColorError",
            ErrorCategory::Cancelled => "Cancelled",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, EditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EditError::file_not_found("/path/to/file.jpg");
        assert!(err.to_string().contains("/path/to/file.jpg"));
    }

    #[test]
    fn test_cancellation_is_not_a_codec_error() {
        let err = EditError::aborted("loading /a.png");
        assert!(err.is_cancellation());
        assert_ne!(err.category(), ErrorCategory::CodecError);

        let err = EditError::decode_failed("/a.png", "truncated stream");
        assert!(!err.is_cancellation());
        assert_eq!(err.category(), ErrorCategory::CodecError);
    }

    #[test]
    fn test_error_category_user_error() {
        assert_eq!(
            EditError::file_not_found("test.jpg").category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            EditError::invalid_selection(0, 0, 100, 100, 50, 50).category(),
            ErrorCategory::UserError
        );
        assert_eq!(EditError::no_image().category(), ErrorCategory::UserError);
    }

    #[test]
    fn test_error_category_codec_error() {
        assert_eq!(
            EditError::unsupported_format("xcf").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            EditError::decode_failed("a.png", "test").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            EditError::encode_failed("jpeg", "test").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            EditError::file_write_failed(
                "test.jpg",
                std::io::Error::from(std::io::ErrorKind::PermissionDenied)
            )
            .category(),
            ErrorCategory::CodecError
        );
    }

    #[test]
    fn test_error_category_color_error() {
        assert_eq!(
            EditError::profile_unavailable("workspace profile").category(),
            ErrorCategory::ColorError
        );
        assert_eq!(
            EditError::transform_failed("test").category(),
            ErrorCategory::ColorError
        );
    }

    #[test]
    fn test_error_clone_preserves_category() {
        let err = EditError::file_read_failed(
            "test.jpg",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert_eq!(err.clone().category(), err.category());
    }
}
