// src/color/transform.rs
//
// A fully-specified pixel transform between ICC profiles, with optional
// soft-proofing and gamut checking. The transform works on a scratch copy
// of the raster so a cancelled run leaves the image untouched.

use lcms2::{Flags, PixelFormat, Pod, Transform};
use rgb::FromSlice;

use crate::color::{IccProfile, RenderingIntent};
use crate::error::{EditError, Result};
use crate::image::Image;
use crate::io::ProgressObserver;

/// Rows transformed between observer polls.
const ROWS_PER_TICK: u32 = 64;

/// One profile-to-profile conversion, configured then applied.
#[derive(Debug, Clone, Default)]
pub struct IccTransform {
    embedded: Option<IccProfile>,
    input: Option<IccProfile>,
    output: Option<IccProfile>,
    proof: Option<IccProfile>,
    intent: RenderingIntent,
    proof_intent: RenderingIntent,
    use_black_point_compensation: bool,
    check_gamut: bool,
}

impl IccTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile embedded in the source image. Takes precedence over the
    /// fallback input profile.
    pub fn set_embedded_profile(&mut self, profile: Option<IccProfile>) {
        self.embedded = profile;
    }

    /// Fallback input profile when nothing is embedded.
    pub fn set_input_profile(&mut self, profile: Option<IccProfile>) {
        self.input = profile;
    }

    pub fn set_output_profile(&mut self, profile: IccProfile) {
        self.output = Some(profile);
    }

    /// Enable soft-proofing through the given output device profile.
    pub fn set_proof_profile(&mut self, profile: Option<IccProfile>) {
        self.proof = profile;
    }

    pub fn set_intent(&mut self, intent: RenderingIntent) {
        self.intent = intent;
    }

    pub fn set_proof_intent(&mut self, intent: RenderingIntent) {
        self.proof_intent = intent;
    }

    pub fn set_black_point_compensation(&mut self, on: bool) {
        self.use_black_point_compensation = on;
    }

    /// Mark out-of-gamut pixels while proofing.
    pub fn set_check_gamut(&mut self, on: bool) {
        self.check_gamut = on;
    }

    /// The profile the source pixels will actually be read through:
    /// embedded first, then the fallback input, then sRGB.
    pub fn effective_input_profile(&self) -> IccProfile {
        self.embedded
            .clone()
            .or_else(|| self.input.clone())
            .unwrap_or_else(IccProfile::srgb)
    }

    pub fn output_profile(&self) -> Option<&IccProfile> {
        self.output.as_ref()
    }

    /// False when the transform would be an identity (same input and output
    /// profile, no proofing). Both profiles must be open to decide; an
    /// unopened profile reports true and the identity is caught in `apply`.
    pub fn will_have_effect(&self) -> bool {
        if self.proof.is_some() {
            return true;
        }
        match &self.output {
            None => false,
            Some(output) => !self.effective_input_profile().is_same_profile_as(output),
        }
    }

    /// Run the transform over `image` in place. Progress is reported per
    /// row chunk; a cancelled run returns `Aborted` and leaves both pixels
    /// and profile tag untouched.
    pub fn apply(&self, image: &mut Image, observer: &dyn ProgressObserver) -> Result<()> {
        let mut input = self.effective_input_profile();
        input.open()?;
        let mut output = self
            .output
            .clone()
            .ok_or_else(|| EditError::profile_unavailable("transform output profile"))?;
        output.open()?;

        // Identity: just retag.
        if self.proof.is_none() && input.is_same_profile_as(&output) {
            image.set_profile(Some(output));
            return Ok(());
        }

        let proof = match &self.proof {
            Some(profile) => {
                let mut proof = profile.clone();
                proof.open()?;
                Some(proof)
            }
            None => None,
        };

        let mut scratch = image.pixels().clone();
        let width = image.width();
        match &mut scratch {
            image::DynamicImage::ImageRgba8(buf) => {
                let pixels: &mut [rgb::RGBA8] = buf.as_rgba_mut();
                self.run(&input, &output, proof.as_ref(), PixelFormat::RGBA_8, pixels, width, observer)?;
            }
            image::DynamicImage::ImageRgba16(buf) => {
                let pixels: &mut [rgb::RGBA<u16>] = buf.as_rgba_mut();
                self.run(&input, &output, proof.as_ref(), PixelFormat::RGBA_16, pixels, width, observer)?;
            }
            _ => {
                return Err(EditError::internal_panic(
                    "raster is always RGBA8 or RGBA16",
                ))
            }
        }

        image.put_pixels(scratch);
        image.set_profile(Some(output));
        Ok(())
    }

    fn run<T: Pod>(
        &self,
        input: &IccProfile,
        output: &IccProfile,
        proof: Option<&IccProfile>,
        format: PixelFormat,
        pixels: &mut [T],
        width: u32,
        observer: &dyn ProgressObserver,
    ) -> Result<()> {
        let input = input.to_lcms()?;
        let output = output.to_lcms()?;

        let flags = if self.use_black_point_compensation {
            Flags::BLACKPOINT_COMPENSATION
        } else {
            Flags::default()
        };

        let transform: Transform<T, T> = match proof {
            Some(proof) => {
                let flags = if self.check_gamut {
                    flags | Flags::SOFT_PROOFING | Flags::GAMUT_CHECK
                } else {
                    flags | Flags::SOFT_PROOFING
                };
                Transform::new_proofing(
                    &input,
                    format,
                    &output,
                    format,
                    &proof.to_lcms()?,
                    self.intent.to_lcms(),
                    self.proof_intent.to_lcms(),
                    flags,
                )
                .map_err(|e| EditError::transform_failed(e.to_string()))?
            }
            None => Transform::new_flags(
                &input,
                format,
                &output,
                format,
                self.intent.to_lcms(),
                flags,
            )
            .map_err(|e| EditError::transform_failed(e.to_string()))?,
        };

        let chunk = (width as usize).max(1) * ROWS_PER_TICK as usize;
        let total = pixels.len().max(1);
        let mut done = 0usize;
        for rows in pixels.chunks_mut(chunk) {
            if !observer.continue_query() {
                return Err(EditError::aborted("color transform"));
            }
            transform.transform_in_place(rows);
            done += rows.len();
            observer.progress_info(done as f32 / total as f32);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::NullObserver;
    use image::{DynamicImage, Rgba};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct CancelImmediately;

    impl ProgressObserver for CancelImmediately {
        fn continue_query(&self) -> bool {
            false
        }
    }

    struct RecordProgress(AtomicBool);

    impl ProgressObserver for RecordProgress {
        fn progress_info(&self, progress: f32) {
            if progress >= 1.0 {
                self.0.store(true, Ordering::SeqCst);
            }
        }
    }

    fn test_image() -> Image {
        let buf = image::RgbaImage::from_pixel(16, 16, Rgba([120, 60, 200, 255]));
        Image::from_pixels(DynamicImage::ImageRgba8(buf))
    }

    #[test]
    fn no_output_profile_means_no_effect() {
        let transform = IccTransform::new();
        assert!(!transform.will_have_effect());
    }

    #[test]
    fn identity_transform_only_retags() {
        let mut image = test_image();
        image.set_profile(Some(IccProfile::srgb()));
        let before = image.pixels().as_bytes().to_vec();

        let mut transform = IccTransform::new();
        transform.set_embedded_profile(image.profile().cloned());
        transform.set_output_profile(IccProfile::srgb());
        assert!(!transform.will_have_effect());

        transform.apply(&mut image, &NullObserver).unwrap();
        assert_eq!(image.pixels().as_bytes(), &before[..]);
        assert!(image.profile().unwrap().is_srgb());
    }

    #[test]
    fn effective_input_prefers_embedded() {
        let mut transform = IccTransform::new();
        transform.set_input_profile(Some(IccProfile::from_file("/x/input.icc")));
        transform.set_embedded_profile(Some(IccProfile::srgb()));
        assert!(transform.effective_input_profile().is_srgb());

        transform.set_embedded_profile(None);
        assert!(!transform.effective_input_profile().is_srgb());
    }

    #[test]
    fn cancelled_transform_leaves_image_untouched() {
        let mut image = test_image();
        let before = image.pixels().as_bytes().to_vec();

        let mut transform = IccTransform::new();
        transform.set_embedded_profile(Some(IccProfile::srgb()));
        transform.set_output_profile(IccProfile::srgb());
        // force a real transform so the observer is polled
        transform.set_proof_profile(Some(IccProfile::srgb()));

        let err = transform.apply(&mut image, &CancelImmediately).unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(image.pixels().as_bytes(), &before[..]);
        assert!(image.profile().is_none());
    }

    #[test]
    fn proofing_through_srgb_reports_full_progress() {
        let mut image = test_image();
        let mut transform = IccTransform::new();
        transform.set_embedded_profile(Some(IccProfile::srgb()));
        transform.set_output_profile(IccProfile::srgb());
        transform.set_proof_profile(Some(IccProfile::srgb()));
        transform.set_intent(RenderingIntent::RelativeColorimetric);
        transform.set_proof_intent(RenderingIntent::RelativeColorimetric);

        let observer = RecordProgress(AtomicBool::new(false));
        transform.apply(&mut image, &observer).unwrap();
        assert!(observer.0.load(Ordering::SeqCst));
        assert!(image.profile().unwrap().is_srgb());
    }
}
