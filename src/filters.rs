// src/filters.rs
//
// Built-in whole-image filters. Each filter applies in place and describes
// itself as a FilterAction for the edit history. Orientation filters have
// exact inverses; everything else (crop, resize, depth conversion) loses
// information and is undone from a snapshot instead.

use image::{imageops, DynamicImage};

use crate::error::Result;
use crate::history::FilterAction;
use crate::image::Image;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFilter {
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHorizontal,
    FlipVertical,
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Resize {
        width: u32,
        height: u32,
    },
    ConvertTo8Bit,
    ConvertTo16Bit,
}

impl BuiltinFilter {
    /// Apply the filter to `image` in place.
    pub fn apply(&self, image: &mut Image) -> Result<()> {
        let pixels = match *self {
            Self::Rotate90 => image.pixels().rotate90(),
            Self::Rotate180 => image.pixels().rotate180(),
            Self::Rotate270 => image.pixels().rotate270(),
            Self::FlipHorizontal => image.pixels().fliph(),
            Self::FlipVertical => image.pixels().flipv(),
            Self::Crop {
                x,
                y,
                width,
                height,
            } => {
                // copy_region validates the rectangle
                let region = image.copy_region(x, y, width, height)?;
                region.pixels().clone()
            }
            Self::Resize { width, height } => image.pixels().resize_exact(
                width,
                height,
                imageops::FilterType::Lanczos3,
            ),
            Self::ConvertTo8Bit => DynamicImage::ImageRgba8(image.pixels().to_rgba8()),
            Self::ConvertTo16Bit => DynamicImage::ImageRgba16(image.pixels().to_rgba16()),
        };
        image.put_pixels(pixels);
        Ok(())
    }

    /// True when an exact inverse filter exists.
    pub fn is_reversible(&self) -> bool {
        matches!(
            self,
            Self::Rotate90
                | Self::Rotate180
                | Self::Rotate270
                | Self::FlipHorizontal
                | Self::FlipVertical
        )
    }

    /// The exact inverse, for reversible filters only.
    pub fn reversed(&self) -> Option<BuiltinFilter> {
        match self {
            Self::Rotate90 => Some(Self::Rotate270),
            Self::Rotate180 => Some(Self::Rotate180),
            Self::Rotate270 => Some(Self::Rotate90),
            Self::FlipHorizontal => Some(Self::FlipHorizontal),
            Self::FlipVertical => Some(Self::FlipVertical),
            _ => None,
        }
    }

    /// Affects geometry rather than pixel values.
    pub fn changes_size(&self) -> bool {
        matches!(
            self,
            Self::Rotate90 | Self::Rotate270 | Self::Crop { .. } | Self::Resize { .. }
        )
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Rotate90 => "Rotate Right",
            Self::Rotate180 => "Rotate 180 Degrees",
            Self::Rotate270 => "Rotate Left",
            Self::FlipHorizontal => "Flip Horizontally",
            Self::FlipVertical => "Flip Vertically",
            Self::Crop { .. } => "Crop",
            Self::Resize { .. } => "Resize",
            Self::ConvertTo8Bit => "Convert to 8 Bit",
            Self::ConvertTo16Bit => "Convert to 16 Bit",
        }
    }

    /// Provenance record for the edit history.
    pub fn filter_action(&self) -> FilterAction {
        match *self {
            Self::Rotate90 => FilterAction::new("transform:rotate", 1)
                .with_parameter("angle", "90"),
            Self::Rotate180 => FilterAction::new("transform:rotate", 1)
                .with_parameter("angle", "180"),
            Self::Rotate270 => FilterAction::new("transform:rotate", 1)
                .with_parameter("angle", "270"),
            Self::FlipHorizontal => FilterAction::new("transform:flip", 1)
                .with_parameter("direction", "horizontal"),
            Self::FlipVertical => FilterAction::new("transform:flip", 1)
                .with_parameter("direction", "vertical"),
            Self::Crop {
                x,
                y,
                width,
                height,
            } => FilterAction::new("transform:crop", 1)
                .with_parameter("x", x.to_string())
                .with_parameter("y", y.to_string())
                .with_parameter("width", width.to_string())
                .with_parameter("height", height.to_string()),
            Self::Resize { width, height } => FilterAction::new("transform:resize", 1)
                .with_parameter("width", width.to_string())
                .with_parameter("height", height.to_string()),
            Self::ConvertTo8Bit => FilterAction::new("transform:convertdepth", 1)
                .with_parameter("depth", "8"),
            Self::ConvertTo16Bit => FilterAction::new("transform:convertdepth", 1)
                .with_parameter("depth", "16"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba};

    fn marked_image() -> Image {
        let mut buf = image::RgbaImage::from_pixel(4, 6, Rgba([0, 0, 0, 255]));
        buf.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        buf.put_pixel(3, 0, Rgba([0, 255, 0, 255]));
        Image::from_pixels(DynamicImage::ImageRgba8(buf))
    }

    #[test]
    fn reversible_filters_round_trip_exactly() {
        let original = marked_image();
        for filter in [
            BuiltinFilter::Rotate90,
            BuiltinFilter::Rotate180,
            BuiltinFilter::Rotate270,
            BuiltinFilter::FlipHorizontal,
            BuiltinFilter::FlipVertical,
        ] {
            let mut img = original.deep_copy();
            filter.apply(&mut img).unwrap();
            filter.reversed().unwrap().apply(&mut img).unwrap();
            assert_eq!(
                img.pixels().as_bytes(),
                original.pixels().as_bytes(),
                "{filter:?} must round-trip",
            );
        }
    }

    #[test]
    fn rotate90_moves_corners_and_swaps_dimensions() {
        let mut img = marked_image();
        BuiltinFilter::Rotate90.apply(&mut img).unwrap();
        assert_eq!((img.width(), img.height()), (6, 4));
        // top-left travels to top-right
        assert_eq!(img.pixels().get_pixel(5, 0), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn lossy_filters_are_not_reversible() {
        for filter in [
            BuiltinFilter::Crop {
                x: 0,
                y: 0,
                width: 2,
                height: 2,
            },
            BuiltinFilter::Resize {
                width: 2,
                height: 2,
            },
            BuiltinFilter::ConvertTo8Bit,
            BuiltinFilter::ConvertTo16Bit,
        ] {
            assert!(!filter.is_reversible());
            assert!(filter.reversed().is_none());
        }
    }

    #[test]
    fn crop_validates_rectangle() {
        let mut img = marked_image();
        let bad = BuiltinFilter::Crop {
            x: 3,
            y: 3,
            width: 4,
            height: 4,
        };
        assert!(bad.apply(&mut img).is_err());
        // image untouched on failure
        assert_eq!((img.width(), img.height()), (4, 6));
    }

    #[test]
    fn depth_conversion_changes_storage() {
        let mut img = marked_image();
        assert!(!img.sixteen_bit());
        BuiltinFilter::ConvertTo16Bit.apply(&mut img).unwrap();
        assert!(img.sixteen_bit());
        BuiltinFilter::ConvertTo8Bit.apply(&mut img).unwrap();
        assert!(!img.sixteen_bit());
    }

    #[test]
    fn filter_action_records_parameters() {
        let action = BuiltinFilter::Crop {
            x: 1,
            y: 2,
            width: 3,
            height: 4,
        }
        .filter_action();
        assert_eq!(action.identifier, "transform:crop");
        assert_eq!(action.parameters.get("width").map(String::as_str), Some("3"));
    }
}
