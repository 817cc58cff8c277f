// src/image.rs
//
// The in-memory image: a copy-on-write raster with its ICC profile, edit
// history, RAW decoding parameters, and load-time attributes attached.
//
// Cloning an Image shares the pixel buffer behind an Arc. Sharing is
// explicit: mutation goes through detach(), which copies the buffer only
// when it is actually shared, and deep_copy() always produces an
// independent buffer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{imageops, DynamicImage, GenericImageView};

use crate::color::{ColorQuery, IccProfile};
use crate::error::{EditError, Result};
use crate::history::EditHistory;

/// RAW demosaic parameters. Two loads of the same RAW file with different
/// parameters produce different images and must never share a cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDecodingSettings {
    pub sixteen_bit: bool,
    pub half_size: bool,
    pub auto_brightness: bool,
    pub camera_white_balance: bool,
    pub output_srgb: bool,
}

impl RawDecodingSettings {
    /// Stable fragment folded into cache keys.
    pub fn cache_fragment(&self) -> String {
        format!(
            "raw:{}{}{}{}{}",
            self.sixteen_bit as u8,
            self.half_size as u8,
            self.auto_brightness as u8,
            self.camera_white_balance as u8,
            self.output_srgb as u8,
        )
    }
}

/// Load-time facts about an image, carried alongside the raster.
#[derive(Debug, Clone, Default)]
pub struct ImageAttributes {
    /// File this image logically represents. Updated on save-as.
    pub origin_path: Option<PathBuf>,
    /// Format short name of the origin file ("jpeg", "png", ...).
    pub format: Option<String>,
    /// Dimensions of the file as decoded, before any edits.
    pub original_size: Option<(u32, u32)>,
    /// The decoder already applied the EXIF orientation.
    pub exif_rotated: bool,
    /// Decoded from a RAW file without color interpretation.
    pub uncalibrated: bool,
    /// A color decision deferred to the caller during post-processing.
    pub pending_query: Option<ColorQuery>,
    /// The source file had an alpha channel.
    pub has_alpha: bool,
}

/// Image raster plus everything the editor tracks about it.
///
/// The raster is always RGBA, 8 or 16 bits per channel; the decoder
/// normalizes on load.
#[derive(Debug, Clone)]
pub struct Image {
    pixels: Arc<DynamicImage>,
    profile: Option<IccProfile>,
    history: EditHistory,
    /// History as it was when the file was loaded.
    original_history: EditHistory,
    raw_settings: Option<RawDecodingSettings>,
    attributes: ImageAttributes,
}

fn normalize(pixels: DynamicImage) -> DynamicImage {
    use image::ColorType::*;
    match pixels.color() {
        L16 | La16 | Rgb16 | Rgba16 => match pixels {
            DynamicImage::ImageRgba16(_) => pixels,
            other => DynamicImage::ImageRgba16(other.to_rgba16()),
        },
        _ => match pixels {
            DynamicImage::ImageRgba8(_) => pixels,
            other => DynamicImage::ImageRgba8(other.to_rgba8()),
        },
    }
}

impl Image {
    /// Wrap a decoded raster, normalizing it to RGBA at the source depth.
    pub fn from_pixels(pixels: DynamicImage) -> Self {
        let has_alpha = pixels.color().has_alpha();
        let pixels = normalize(pixels);
        let original_size = Some(pixels.dimensions());
        Self {
            pixels: Arc::new(pixels),
            profile: None,
            history: EditHistory::new(),
            original_history: EditHistory::new(),
            raw_settings: None,
            attributes: ImageAttributes {
                original_size,
                has_alpha,
                ..ImageAttributes::default()
            },
        }
    }

    /// The 0x0 image, used before anything is loaded.
    pub fn null() -> Self {
        Self::from_pixels(DynamicImage::ImageRgba8(image::RgbaImage::new(0, 0)))
    }

    pub fn is_null(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn sixteen_bit(&self) -> bool {
        matches!(&*self.pixels, DynamicImage::ImageRgba16(_))
    }

    pub fn has_alpha(&self) -> bool {
        self.attributes.has_alpha
    }

    /// Shared read access to the raster.
    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    /// Mutable access to the raster; copies the buffer first when it is
    /// shared with another Image.
    pub fn detach(&mut self) -> &mut DynamicImage {
        Arc::make_mut(&mut self.pixels)
    }

    /// An Image with its own pixel buffer, equal in content and metadata.
    pub fn deep_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.pixels = Arc::new((*self.pixels).clone());
        copy
    }

    /// True when this instance shares its buffer with another.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.pixels) > 1
    }

    /// Replace the raster, keeping profile/history/attributes.
    pub fn put_pixels(&mut self, pixels: DynamicImage) {
        self.pixels = Arc::new(normalize(pixels));
    }

    /// Copy out a rectangular region as a standalone Image carrying the
    /// same profile and depth.
    pub fn copy_region(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Image> {
        self.check_selection(x, y, width, height)?;
        let region = self.pixels.crop_imm(x, y, width, height);
        let mut out = Image::from_pixels(region);
        out.profile = self.profile.clone();
        out.attributes.has_alpha = self.attributes.has_alpha;
        Ok(out)
    }

    /// Paste `src` at (x, y). Depths must match; the region must fit.
    pub fn blit(&mut self, src: &Image, x: u32, y: u32) -> Result<()> {
        if src.sixteen_bit() != self.sixteen_bit() {
            return Err(EditError::invalid_argument(
                "src",
                if src.sixteen_bit() { "16-bit" } else { "8-bit" },
                "pasted region must match the image depth",
            ));
        }
        self.check_selection(x, y, src.width(), src.height())?;
        match (self.detach(), src.pixels()) {
            (DynamicImage::ImageRgba8(dst), DynamicImage::ImageRgba8(top)) => {
                imageops::replace(dst, top, x as i64, y as i64);
            }
            (DynamicImage::ImageRgba16(dst), DynamicImage::ImageRgba16(top)) => {
                imageops::replace(dst, top, x as i64, y as i64);
            }
            _ => unreachable!("raster is always RGBA8 or RGBA16"),
        }
        Ok(())
    }

    /// Validate a selection rectangle against the raster bounds.
    pub fn check_selection(&self, x: u32, y: u32, width: u32, height: u32) -> Result<()> {
        let fits = width > 0
            && height > 0
            && x.checked_add(width).is_some_and(|r| r <= self.width())
            && y.checked_add(height).is_some_and(|b| b <= self.height());
        if fits {
            Ok(())
        } else {
            Err(EditError::invalid_selection(
                x,
                y,
                width,
                height,
                self.width(),
                self.height(),
            ))
        }
    }

    pub fn profile(&self) -> Option<&IccProfile> {
        self.profile.as_ref()
    }

    pub fn set_profile(&mut self, profile: Option<IccProfile>) {
        self.profile = profile;
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut EditHistory {
        &mut self.history
    }

    pub fn set_history(&mut self, history: EditHistory) {
        self.history = history;
    }

    pub fn original_history(&self) -> &EditHistory {
        &self.original_history
    }

    pub fn set_original_history(&mut self, history: EditHistory) {
        self.original_history = history;
    }

    pub fn raw_settings(&self) -> Option<&RawDecodingSettings> {
        self.raw_settings.as_ref()
    }

    pub fn set_raw_settings(&mut self, settings: Option<RawDecodingSettings>) {
        self.raw_settings = settings;
    }

    pub fn attributes(&self) -> &ImageAttributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut ImageAttributes {
        &mut self.attributes
    }

    pub fn origin_path(&self) -> Option<&Path> {
        self.attributes.origin_path.as_deref()
    }

    /// Record that this image now represents the file at `path`.
    pub fn set_origin(&mut self, path: impl Into<PathBuf>, format: impl Into<String>) {
        self.attributes.origin_path = Some(path.into());
        self.attributes.format = Some(format.into());
    }
}
