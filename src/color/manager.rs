// src/color/manager.rs
//
// The color-management decision policy: classify the condition an image
// arrived in, resolve the configured behavior for that condition, and run
// the resulting conversion. Exactly one classification holds per image,
// decided in priority order: uncalibrated, then missing, then mismatch.
//
// Degradation rule: an unopenable workspace profile disables management
// for this manager (all operations become no-ops), an unopenable embedded
// profile demotes the image to the missing-profile condition. Both paths
// log a warning and never fail the load.

use tracing::warn;

use crate::color::{
    Behavior, BehaviorSpec, ColorQuery, ColorSettings, IccProfile, IccTransform, Interpretation,
    TargetDisposition,
};
use crate::error::{EditError, Result};
use crate::image::Image;
use crate::io::ProgressObserver;

pub struct ColorManager<'a> {
    image: &'a mut Image,
    settings: &'a ColorSettings,
    workspace: IccProfile,
    /// Embedded profile, already opened. Unopenable data is treated as
    /// no profile at all.
    embedded: Option<IccProfile>,
    enabled: bool,
}

impl<'a> ColorManager<'a> {
    pub fn new(image: &'a mut Image, settings: &'a ColorSettings) -> Self {
        let mut enabled = settings.enable_cm;
        let mut workspace = settings.workspace();
        if enabled {
            if let Err(err) = workspace.open() {
                warn!(error = %err, "workspace profile unusable, color management disabled");
                enabled = false;
            }
        }
        let embedded = image.profile().cloned().and_then(|mut profile| {
            match profile.open() {
                Ok(()) => Some(profile),
                Err(err) => {
                    warn!(error = %err, "embedded profile unusable, treating image as untagged");
                    None
                }
            }
        });
        Self {
            image,
            settings,
            workspace,
            embedded,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The condition this image is in, or `None` when its profile already
    /// matches the workspace (or management is disabled).
    pub fn image_condition(&self) -> Option<ColorQuery> {
        if !self.enabled {
            return None;
        }
        if self.image.attributes().uncalibrated {
            return Some(ColorQuery::UncalibratedColor);
        }
        match &self.embedded {
            None => Some(ColorQuery::MissingProfile),
            Some(embedded) => {
                if embedded.is_same_profile_as(&self.workspace) {
                    None
                } else {
                    Some(ColorQuery::ProfileMismatch)
                }
            }
        }
    }

    /// True when loading this image requires any color decision.
    pub fn is_needed(&self) -> bool {
        self.image_condition().is_some()
    }

    /// The behavior the policy picks when the caller does not want to be
    /// asked. Never converts lossily without reason: untagged images are
    /// assumed sRGB and kept, tagged images are converted into the
    /// workspace, matched images pass through.
    pub fn safest_best_behavior(&self) -> BehaviorSpec {
        match self.image_condition() {
            Some(ColorQuery::UncalibratedColor) => BehaviorSpec::INPUT_TO_WORKSPACE,
            Some(ColorQuery::MissingProfile) => BehaviorSpec::SRGB_KEEP,
            Some(ColorQuery::ProfileMismatch) => BehaviorSpec::EMBEDDED_TO_WORKSPACE,
            None => BehaviorSpec::PRESERVE_EMBEDDED,
        }
    }

    /// Apply the behavior configured for this image's condition. AskUser
    /// records a pending query on the image instead of converting.
    pub fn transform_default(&mut self, observer: &dyn ProgressObserver) -> Result<()> {
        let Some(condition) = self.image_condition() else {
            return Ok(());
        };
        let behavior = self.settings.behavior_for(condition);
        self.transform(behavior, None, observer)
    }

    /// Apply a behavior. `specified` supplies the profile for
    /// `Interpretation::Specified`.
    pub fn transform(
        &mut self,
        behavior: Behavior,
        specified: Option<IccProfile>,
        observer: &dyn ProgressObserver,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let spec = match behavior {
            Behavior::AskUser => {
                if let Some(condition) = self.image_condition() {
                    self.image.attributes_mut().pending_query = Some(condition);
                }
                return Ok(());
            }
            Behavior::SafestBestAction => self.safest_best_behavior(),
            Behavior::Fixed(spec) => spec,
        };
        self.apply_spec(spec, specified, observer)
    }

    fn apply_spec(
        &mut self,
        spec: BehaviorSpec,
        specified: Option<IccProfile>,
        observer: &dyn ProgressObserver,
    ) -> Result<()> {
        let interpretation = self.interpretation_profile(spec.interpretation, specified)?;

        match (interpretation, spec.target) {
            // Do-not-interpret always means untagged, whatever the target.
            (None, _) => {
                self.image.set_profile(None);
            }
            (Some(mut profile), TargetDisposition::KeepProfile) => {
                profile.open()?;
                self.image.set_profile(Some(profile));
            }
            (Some(profile), TargetDisposition::ConvertToWorkspace) => {
                let mut transform = IccTransform::new();
                transform.set_embedded_profile(Some(profile));
                transform.set_output_profile(self.workspace.clone());
                transform.set_intent(self.settings.rendering_intent);
                transform.set_black_point_compensation(self.settings.use_black_point_compensation);
                transform.apply(self.image, observer)?;
            }
        }

        let attributes = self.image.attributes_mut();
        attributes.uncalibrated = false;
        attributes.pending_query = None;
        Ok(())
    }

    /// Resolve an interpretation to the profile the pixels are read
    /// through. `None` means the pixels carry no color meaning.
    fn interpretation_profile(
        &self,
        interpretation: Interpretation,
        specified: Option<IccProfile>,
    ) -> Result<Option<IccProfile>> {
        let profile = match interpretation {
            Interpretation::DoNotInterpret => None,
            Interpretation::Srgb => Some(IccProfile::srgb()),
            Interpretation::Workspace => Some(self.workspace.clone()),
            Interpretation::Embedded => Some(
                self.embedded
                    .clone()
                    .ok_or_else(|| EditError::profile_unavailable("embedded profile"))?,
            ),
            Interpretation::DefaultInput => {
                Some(self.settings.default_input().unwrap_or_else(IccProfile::srgb))
            }
            Interpretation::Specified => Some(
                specified.ok_or_else(|| EditError::profile_unavailable("specified profile"))?,
            ),
            Interpretation::Automatic => Some(
                self.embedded
                    .clone()
                    .or_else(|| self.settings.default_input())
                    .unwrap_or_else(IccProfile::srgb),
            ),
        };
        Ok(profile)
    }

    /// Convert into sRGB, reading through the embedded profile when
    /// present. Used before handing pixels to consumers that assume sRGB.
    pub fn transform_to_srgb(&mut self, observer: &dyn ProgressObserver) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut transform = IccTransform::new();
        transform.set_embedded_profile(self.embedded.clone());
        transform.set_output_profile(IccProfile::srgb());
        transform.set_intent(self.settings.rendering_intent);
        transform.set_black_point_compensation(self.settings.use_black_point_compensation);
        transform.apply(self.image, observer)
    }

    /// Convert into the monitor profile for display, honoring the managed
    /// view switch.
    pub fn transform_for_display(&mut self, observer: &dyn ProgressObserver) -> Result<()> {
        if !self.enabled || !self.settings.use_managed_view {
            return Ok(());
        }
        let mut monitor = self.settings.monitor();
        monitor.open()?;
        let mut transform = IccTransform::new();
        transform.set_embedded_profile(self.embedded.clone());
        transform.set_input_profile(Some(self.workspace.clone()));
        transform.set_output_profile(monitor);
        transform.set_intent(self.settings.rendering_intent);
        transform.set_black_point_compensation(self.settings.use_black_point_compensation);
        transform.apply(self.image, observer)
    }

    /// Build the display transform that simulates `device` on the monitor:
    /// workspace in, monitor out, proofed through the device profile with
    /// the configured proofing intent and gamut check.
    pub fn soft_proofing_transform(&self, device: IccProfile) -> IccTransform {
        let mut transform = IccTransform::new();
        transform.set_embedded_profile(self.embedded.clone());
        transform.set_input_profile(Some(self.workspace.clone()));
        transform.set_output_profile(self.settings.monitor());
        transform.set_proof_profile(Some(device));
        transform.set_intent(self.settings.rendering_intent);
        transform.set_proof_intent(self.settings.proofing_intent);
        transform.set_black_point_compensation(self.settings.use_black_point_compensation);
        transform.set_check_gamut(self.settings.use_gamut_check);
        transform
    }

    /// Convert into an output device profile, optionally soft-proofed.
    pub fn transform_for_output(
        &mut self,
        output: IccProfile,
        observer: &dyn ProgressObserver,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut output = output;
        output.open()?;
        let mut transform = IccTransform::new();
        transform.set_embedded_profile(self.embedded.clone());
        transform.set_input_profile(Some(self.workspace.clone()));
        transform.set_output_profile(output);
        transform.set_intent(self.settings.rendering_intent);
        transform.set_black_point_compensation(self.settings.use_black_point_compensation);
        transform.apply(self.image, observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::NullObserver;
    use image::DynamicImage;

    fn untagged_image() -> Image {
        let buf = image::RgbaImage::from_pixel(4, 4, image::Rgba([50, 100, 150, 255]));
        Image::from_pixels(DynamicImage::ImageRgba8(buf))
    }

    fn srgb_tagged_image() -> Image {
        let mut img = untagged_image();
        img.set_profile(Some(IccProfile::srgb()));
        img
    }

    #[test]
    fn classification_priority_uncalibrated_first() {
        let settings = ColorSettings::default();
        // uncalibrated wins even with an embedded profile present
        let mut img = srgb_tagged_image();
        img.attributes_mut().uncalibrated = true;
        let manager = ColorManager::new(&mut img, &settings);
        assert_eq!(
            manager.image_condition(),
            Some(ColorQuery::UncalibratedColor)
        );
    }

    #[test]
    fn untagged_image_is_missing_profile() {
        let settings = ColorSettings::default();
        let mut img = untagged_image();
        let manager = ColorManager::new(&mut img, &settings);
        assert_eq!(manager.image_condition(), Some(ColorQuery::MissingProfile));
        assert_eq!(manager.safest_best_behavior(), BehaviorSpec::SRGB_KEEP);
    }

    #[test]
    fn matching_profile_needs_nothing() {
        // default workspace is sRGB, image is tagged sRGB
        let settings = ColorSettings::default();
        let mut img = srgb_tagged_image();
        let manager = ColorManager::new(&mut img, &settings);
        assert_eq!(manager.image_condition(), None);
        assert!(!manager.is_needed());
        assert_eq!(
            manager.safest_best_behavior(),
            BehaviorSpec::PRESERVE_EMBEDDED
        );
    }

    #[test]
    fn bad_embedded_profile_demotes_to_missing() {
        let settings = ColorSettings::default();
        let mut img = untagged_image();
        img.set_profile(Some(IccProfile::from_data(vec![0u8; 8])));
        let manager = ColorManager::new(&mut img, &settings);
        assert_eq!(manager.image_condition(), Some(ColorQuery::MissingProfile));
    }

    #[test]
    fn bad_workspace_profile_disables_management() {
        let settings = ColorSettings {
            workspace_profile: Some("/nonexistent/workspace.icc".into()),
            ..ColorSettings::default()
        };
        let mut img = untagged_image();
        let mut manager = ColorManager::new(&mut img, &settings);
        assert!(!manager.is_enabled());
        assert_eq!(manager.image_condition(), None);
        // everything degrades to a no-op, not an error
        manager.transform_default(&NullObserver).unwrap();
        assert!(img.profile().is_none());
    }

    #[test]
    fn ask_user_records_pending_query_without_converting() {
        let settings = ColorSettings {
            on_missing_profile: Behavior::AskUser,
            ..ColorSettings::default()
        };
        let mut img = untagged_image();
        let before = img.pixels().as_bytes().to_vec();
        let mut manager = ColorManager::new(&mut img, &settings);
        manager.transform_default(&NullObserver).unwrap();
        drop(manager);

        assert_eq!(
            img.attributes().pending_query,
            Some(ColorQuery::MissingProfile)
        );
        assert!(img.profile().is_none());
        assert_eq!(img.pixels().as_bytes(), &before[..]);
    }

    #[test]
    fn safest_action_on_missing_profile_tags_srgb() {
        let settings = ColorSettings::default();
        let mut img = untagged_image();
        let before = img.pixels().as_bytes().to_vec();
        let mut manager = ColorManager::new(&mut img, &settings);
        manager.transform_default(&NullObserver).unwrap();
        drop(manager);

        // kept pixels, assigned the assumption
        assert!(img.profile().unwrap().is_srgb());
        assert_eq!(img.pixels().as_bytes(), &before[..]);
        assert!(img.attributes().pending_query.is_none());
    }

    #[test]
    fn do_not_interpret_strips_the_tag() {
        let settings = ColorSettings::default();
        let mut img = srgb_tagged_image();
        let mut manager = ColorManager::new(&mut img, &settings);
        manager
            .transform(
                Behavior::Fixed(BehaviorSpec::NO_COLOR_MANAGEMENT),
                None,
                &NullObserver,
            )
            .unwrap();
        drop(manager);
        assert!(img.profile().is_none());
    }

    #[test]
    fn soft_proofing_transform_carries_the_device_profile() {
        let settings = ColorSettings {
            use_gamut_check: true,
            ..ColorSettings::default()
        };
        let mut img = srgb_tagged_image();
        let manager = ColorManager::new(&mut img, &settings);
        let transform = manager.soft_proofing_transform(IccProfile::srgb());
        // proofing forces a real transform even between identical profiles
        assert!(transform.will_have_effect());
        assert!(transform.output_profile().unwrap().is_srgb());
    }

    #[test]
    fn uncalibrated_flag_clears_after_interpretation() {
        let settings = ColorSettings::default();
        let mut img = untagged_image();
        img.attributes_mut().uncalibrated = true;
        let mut manager = ColorManager::new(&mut img, &settings);
        // default input unset falls back to sRGB; workspace is sRGB, so the
        // conversion is an identity retag
        manager.transform_default(&NullObserver).unwrap();
        drop(manager);
        assert!(!img.attributes().uncalibrated);
        assert!(img.profile().unwrap().is_srgb());
    }
}
