// src/color/profile.rs
//
// ICC profile value type. Profiles are carried as raw ICC bytes and opened
// through lcms2 on demand; lcms2 handles are built transiently because they
// are not shareable across threads, while the byte buffers are.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use lcms2::Profile;

use crate::error::{EditError, Result};

/// Where a profile's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProfileSource {
    /// The built-in sRGB profile.
    Srgb,
    /// An .icc/.icm file on disk, read lazily.
    File(PathBuf),
    /// Bytes embedded in an image file or supplied by the caller.
    Data,
}

/// An ICC color profile.
///
/// Cloning shares nothing heavier than the byte buffer. Two profiles are the
/// same profile exactly when their ICC bytes are equal; in particular every
/// sRGB instance produced by [`IccProfile::srgb`] compares equal.
#[derive(Debug, Clone)]
pub struct IccProfile {
    source: ProfileSource,
    /// ICC bytes; validated once `opened` is set.
    data: Option<Vec<u8>>,
    description: Option<String>,
    opened: bool,
}

/// One canonical copy of the sRGB bytes per process.
fn srgb_bytes() -> &'static [u8] {
    static SRGB: OnceLock<Vec<u8>> = OnceLock::new();
    SRGB.get_or_init(|| {
        Profile::new_srgb()
            .icc()
            .unwrap_or_else(|_| Vec::new())
    })
}

impl IccProfile {
    /// The built-in sRGB profile, already open.
    pub fn srgb() -> Self {
        let bytes = srgb_bytes().to_vec();
        Self {
            source: ProfileSource::Srgb,
            description: read_description(&bytes),
            data: Some(bytes),
            opened: true,
        }
    }

    /// A profile backed by a file on disk. Nothing is read until `open()`.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ProfileSource::File(path.into()),
            data: None,
            description: None,
            opened: false,
        }
    }

    /// A profile from embedded bytes. The bytes are validated on `open()`.
    pub fn from_data(data: Vec<u8>) -> Self {
        Self {
            source: ProfileSource::Data,
            data: Some(data),
            description: None,
            opened: false,
        }
    }

    /// Load and validate the profile bytes. Idempotent; a second call on an
    /// open profile is a no-op.
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let bytes = match &self.source {
            ProfileSource::Srgb => srgb_bytes().to_vec(),
            ProfileSource::File(path) => std::fs::read(path).map_err(|e| {
                EditError::file_read_failed(path.to_string_lossy().into_owned(), e)
            })?,
            ProfileSource::Data => self.data.take().unwrap_or_default(),
        };
        // Validation: bytes must parse as an ICC profile.
        self.data = Some(bytes);
        let bytes = self.data.as_deref().unwrap_or_default();
        if Profile::new_icc(bytes).is_err() {
            return Err(self.unavailable());
        }
        self.description = read_description(bytes);
        self.opened = true;
        Ok(())
    }

    /// True once the bytes have been loaded and validated.
    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn is_srgb(&self) -> bool {
        matches!(self.source, ProfileSource::Srgb)
            || self.data.as_deref() == Some(srgb_bytes())
    }

    /// The validated ICC bytes. `None` before a successful `open()`.
    pub fn data(&self) -> Option<&[u8]> {
        if self.opened {
            self.data.as_deref()
        } else {
            None
        }
    }

    /// The file path for file-backed profiles.
    pub fn file_path(&self) -> Option<&Path> {
        match &self.source {
            ProfileSource::File(path) => Some(path),
            _ => None,
        }
    }

    /// Human-readable description from the profile header, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Byte equality of the ICC data. Both sides must be open; an unopened
    /// side compares unequal.
    pub fn is_same_profile_as(&self, other: &IccProfile) -> bool {
        match (self.data(), other.data()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Build a transient lcms2 handle from the open bytes.
    pub(crate) fn to_lcms(&self) -> Result<Profile> {
        let bytes = self.data().ok_or_else(|| self.unavailable())?;
        Profile::new_icc(bytes).map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> EditError {
        let what: Cow<'static, str> = match &self.source {
            ProfileSource::Srgb => "built-in sRGB profile".into(),
            ProfileSource::File(path) => {
                format!("profile file '{}'", path.display()).into()
            }
            ProfileSource::Data => "embedded profile data".into(),
        };
        EditError::ProfileUnavailable { what }
    }
}

fn read_description(bytes: &[u8]) -> Option<String> {
    let profile = Profile::new_icc(bytes).ok()?;
    profile.info(lcms2::InfoType::Description, lcms2::Locale::none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_instances_are_the_same_profile() {
        let a = IccProfile::srgb();
        let b = IccProfile::srgb();
        assert!(a.is_open());
        assert!(a.is_same_profile_as(&b));
        assert!(a.is_srgb());
    }

    #[test]
    fn data_profile_validates_on_open() {
        let mut good = IccProfile::from_data(srgb_bytes().to_vec());
        assert!(good.open().is_ok());
        assert!(good.is_same_profile_as(&IccProfile::srgb()));
        assert!(good.is_srgb());

        let mut bad = IccProfile::from_data(vec![0u8; 16]);
        assert!(bad.open().is_err());
        assert!(!bad.is_open());
    }

    #[test]
    fn unopened_profiles_never_compare_equal() {
        let unopened = IccProfile::from_file("/nonexistent/profile.icc");
        assert!(!unopened.is_same_profile_as(&IccProfile::srgb()));
        assert!(!unopened.is_same_profile_as(&unopened.clone()));
    }

    #[test]
    fn missing_file_reports_read_failure() {
        let mut profile = IccProfile::from_file("/nonexistent/profile.icc");
        let err = profile.open().unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::CodecError);
    }
}
