// src/io/description.rs
//
// The identity of a load request. Two descriptions are the same request
// only when path, RAW parameters, and post-processing all match; the cache
// key is deliberately coarser and folds only what affects the decoded
// pixels (path and RAW parameters), so an editor load and a display load
// of one file share a cache slot.

use std::path::{Path, PathBuf};

use crate::color::{ColorSettings, RenderingIntent};
use crate::image::RawDecodingSettings;

/// Color work applied to a decoded image before it is handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcessing {
    /// Hand out the raw decode untouched.
    None,
    /// Run one specific profile conversion.
    ApplyTransform {
        output_profile: PathBuf,
        intent: RenderingIntent,
        black_point_compensation: bool,
    },
    /// Full policy resolution for editing, per the given settings.
    ConvertForEditor(ColorSettings),
    /// Convert into sRGB whatever the settings say.
    ConvertToSrgb,
    /// Policy resolution plus monitor-profile conversion.
    ConvertForDisplay(ColorSettings),
    /// Convert into an output device profile.
    ConvertForOutput { output_profile: PathBuf },
}

/// A load request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadingDescription {
    pub file_path: PathBuf,
    pub raw_settings: Option<RawDecodingSettings>,
    pub post_processing: PostProcessing,
}

impl LoadingDescription {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            raw_settings: None,
            post_processing: PostProcessing::None,
        }
    }

    pub fn with_raw(file_path: impl Into<PathBuf>, settings: RawDecodingSettings) -> Self {
        Self {
            file_path: file_path.into(),
            raw_settings: Some(settings),
            post_processing: PostProcessing::None,
        }
    }

    pub fn post_processed(mut self, post_processing: PostProcessing) -> Self {
        self.post_processing = post_processing;
        self
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn is_raw(&self) -> bool {
        self.raw_settings.is_some()
    }

    /// Cache identity: path plus RAW parameters, nothing else. Everything
    /// that changes the decoded pixels must appear here; everything applied
    /// after decoding must not.
    pub fn cache_key(&self) -> String {
        match &self.raw_settings {
            None => self.file_path.to_string_lossy().into_owned(),
            Some(raw) => format!(
                "{}:{}",
                self.file_path.to_string_lossy(),
                raw.cache_fragment()
            ),
        }
    }

    /// True when an in-flight load for `other` would produce pixels this
    /// request can reuse.
    pub fn compatible_with(&self, other: &LoadingDescription) -> bool {
        self.file_path == other.file_path && self.raw_settings == other.raw_settings
    }

    /// True when this request will produce a fuller decode of the same file
    /// than `reduced`: a full-size RAW load superseding a half-size one.
    pub fn more_complete_than(&self, reduced: &LoadingDescription) -> bool {
        if self.file_path != reduced.file_path {
            return false;
        }
        match (&self.raw_settings, &reduced.raw_settings) {
            (Some(full), Some(half)) => half.half_size && !full.half_size,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_ignores_post_processing() {
        let plain = LoadingDescription::new("/photos/a.jpg");
        let for_editor = LoadingDescription::new("/photos/a.jpg")
            .post_processed(PostProcessing::ConvertForEditor(ColorSettings::default()));

        assert_ne!(plain, for_editor);
        assert_eq!(plain.cache_key(), for_editor.cache_key());
        assert!(plain.compatible_with(&for_editor));
    }

    #[test]
    fn cache_key_separates_raw_parameter_sets() {
        let half = LoadingDescription::with_raw(
            "/photos/a.cr2",
            RawDecodingSettings {
                half_size: true,
                ..RawDecodingSettings::default()
            },
        );
        let full = LoadingDescription::with_raw(
            "/photos/a.cr2",
            RawDecodingSettings {
                half_size: false,
                sixteen_bit: true,
                ..RawDecodingSettings::default()
            },
        );

        assert_ne!(half.cache_key(), full.cache_key());
        assert!(!half.compatible_with(&full));
    }

    #[test]
    fn full_size_load_is_more_complete_than_half_size() {
        let half = LoadingDescription::with_raw(
            "/photos/a.cr2",
            RawDecodingSettings {
                half_size: true,
                ..RawDecodingSettings::default()
            },
        );
        let full = LoadingDescription::with_raw("/photos/a.cr2", RawDecodingSettings::default());

        assert!(full.more_complete_than(&half));
        assert!(!half.more_complete_than(&full));
        assert!(!full.more_complete_than(&full));
        // different files never supersede each other
        let other = LoadingDescription::with_raw(
            "/photos/b.cr2",
            RawDecodingSettings {
                half_size: true,
                ..RawDecodingSettings::default()
            },
        );
        assert!(!full.more_complete_than(&other));
    }

    #[test]
    fn raw_and_non_raw_loads_never_share_a_slot() {
        let plain = LoadingDescription::new("/photos/a.cr2");
        let raw =
            LoadingDescription::with_raw("/photos/a.cr2", RawDecodingSettings::default());
        assert_ne!(plain.cache_key(), raw.cache_key());
        assert!(!plain.compatible_with(&raw));
    }
}
