// src/io/codec.rs
//
// The codec seam: decoding files into Images and encoding Images back out.
// The default implementation wraps the image crate, pulls the embedded ICC
// profile and EXIF orientation out of the container, and writes through a
// temp file in the target directory so a failed save never clobbers an
// existing file.

use std::io::{Cursor, Write};
use std::path::Path;

use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use tracing::debug;

use crate::color::IccProfile;
use crate::error::{EditError, Result};
use crate::history::EditHistory;
use crate::image::Image;
use crate::io::description::LoadingDescription;
use crate::io::ProgressObserver;

/// Per-format encoding parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    /// Format short name: "jpeg", "png", "webp", "tiff".
    pub format: String,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    /// Store lossless where the format offers the choice.
    pub lossless: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            format: "png".into(),
            jpeg_quality: 85,
            lossless: true,
        }
    }
}

impl SaveOptions {
    pub fn for_format(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            ..Self::default()
        }
    }

    fn image_format(&self) -> Result<ImageFormat> {
        match self.format.as_str() {
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            "webp" => Ok(ImageFormat::WebP),
            "tiff" | "tif" => Ok(ImageFormat::Tiff),
            other => Err(EditError::unsupported_format(other.to_string())),
        }
    }
}

/// Decoding and encoding collaborator. Implementations must be shareable
/// across worker threads.
pub trait ImageCodec: Send + Sync {
    /// Decode the file a description names. Post-processing is not the
    /// codec's job; the caller applies it to the returned image.
    fn decode(
        &self,
        description: &LoadingDescription,
        observer: &dyn ProgressObserver,
    ) -> Result<Image>;

    /// Encode `image` to `path`. The write must be atomic: on failure the
    /// previous file content, if any, survives.
    fn encode(
        &self,
        image: &Image,
        path: &Path,
        options: &SaveOptions,
        observer: &dyn ProgressObserver,
    ) -> Result<()>;
}

/// Default codec over the image crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCodec;

impl FileCodec {
    fn read_bytes(path: &Path) -> Result<Vec<u8>> {
        let display = path.to_string_lossy().into_owned();
        std::fs::read(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                EditError::file_not_found(display)
            } else {
                EditError::file_read_failed(display, err)
            }
        })
    }
}

impl ImageCodec for FileCodec {
    fn decode(
        &self,
        description: &LoadingDescription,
        observer: &dyn ProgressObserver,
    ) -> Result<Image> {
        let path = description.file_path();
        let display = path.to_string_lossy().into_owned();
        if !observer.continue_query() {
            return Err(EditError::aborted(format!("loading {display}")));
        }
        observer.progress_info(0.0);

        let bytes = Self::read_bytes(path)?;
        let reader = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|err| EditError::file_read_failed(display.clone(), err))?;
        let format = reader
            .format()
            .ok_or_else(|| EditError::unsupported_format(display.clone()))?;

        let mut decoder = reader
            .into_decoder()
            .map_err(|err| EditError::decode_failed(display.clone(), err.to_string()))?;
        let icc_bytes = decoder.icc_profile().unwrap_or_default();

        if !observer.continue_query() {
            return Err(EditError::aborted(format!("loading {display}")));
        }
        observer.progress_info(0.3);

        let pixels = DynamicImage::from_decoder(decoder)
            .map_err(|err| EditError::decode_failed(display.clone(), err.to_string()))?;

        let mut image = Image::from_pixels(pixels);
        image.set_origin(path, format_name(format));
        image.set_history(EditHistory::for_original(path));
        image.set_original_history(image.history().clone());

        if let Some(data) = icc_bytes {
            let mut profile = IccProfile::from_data(data);
            // unopenable embedded data is handled downstream as missing
            let _ = profile.open();
            image.set_profile(Some(profile));
        }

        if let Some(raw) = &description.raw_settings {
            image.set_raw_settings(Some(raw.clone()));
            image.attributes_mut().uncalibrated = !raw.output_srgb;
        }

        observer.progress_info(0.8);
        if !observer.continue_query() {
            return Err(EditError::aborted(format!("loading {display}")));
        }

        // RAW development already delivers upright pixels; re-applying the
        // tag would rotate twice
        if description.raw_settings.is_none() {
            if let Some(orientation) = exif_orientation(&bytes) {
                apply_orientation(&mut image, orientation);
            }
        }

        observer.progress_info(1.0);
        debug!(path = %path.display(), width = image.width(), height = image.height(), "decoded");
        Ok(image)
    }

    fn encode(
        &self,
        image: &Image,
        path: &Path,
        options: &SaveOptions,
        observer: &dyn ProgressObserver,
    ) -> Result<()> {
        let display = path.to_string_lossy().into_owned();
        if !observer.continue_query() {
            return Err(EditError::aborted(format!("saving {display}")));
        }
        observer.progress_info(0.0);

        let format = options.image_format()?;
        let mut encoded = Vec::new();
        encode_to(image, &mut encoded, format, options)?;

        observer.progress_info(0.7);
        if !observer.continue_query() {
            return Err(EditError::aborted(format!("saving {display}")));
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|err| EditError::file_write_failed(display.clone(), err))?;
        temp.write_all(&encoded)
            .map_err(|err| EditError::file_write_failed(display.clone(), err))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| EditError::file_write_failed(display.clone(), err))?;
        temp.persist(path)
            .map_err(|err| EditError::file_write_failed(display.clone(), err.error))?;

        observer.progress_info(1.0);
        debug!(path = %path.display(), format = %options.format, "encoded");
        Ok(())
    }
}

fn encode_to(
    image: &Image,
    out: &mut Vec<u8>,
    format: ImageFormat,
    options: &SaveOptions,
) -> Result<()> {
    let map_err =
        |err: image::ImageError| EditError::encode_failed(options.format.clone(), err.to_string());
    match format {
        ImageFormat::Jpeg => {
            // JPEG carries neither alpha nor 16-bit depth
            let rgb = image.pixels().to_rgb8();
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                Cursor::new(out),
                options.jpeg_quality.clamp(1, 100),
            );
            rgb.write_with_encoder(encoder).map_err(map_err)?;
        }
        other => {
            image
                .pixels()
                .write_to(&mut Cursor::new(out), other)
                .map_err(map_err)?;
        }
    }
    Ok(())
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        ImageFormat::Tiff => "tiff",
        _ => "unknown",
    }
}

/// EXIF Orientation tag value (1..=8) from the container bytes, if any.
fn exif_orientation(bytes: &[u8]) -> Option<u32> {
    let reader = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let field = reader.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    field.value.get_uint(0)
}

/// Rotate/flip the raster so it displays upright, recording the fact.
fn apply_orientation(image: &mut Image, orientation: u32) {
    let pixels = match orientation {
        2 => image.pixels().fliph(),
        3 => image.pixels().rotate180(),
        4 => image.pixels().flipv(),
        5 => image.pixels().rotate90().fliph(),
        6 => image.pixels().rotate90(),
        7 => image.pixels().rotate270().fliph(),
        8 => image.pixels().rotate270(),
        _ => return,
    };
    image.put_pixels(pixels);
    image.attributes_mut().exif_rotated = true;
}
