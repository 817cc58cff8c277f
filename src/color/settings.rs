// src/color/settings.rs
//
// Color-management configuration. Behavior is a small decision language:
// either a sentinel (ask the user, or let the policy pick) or a concrete
// pair of "how to interpret the source" and "what to do with the pixels".

use std::path::PathBuf;

use crate::color::IccProfile;

/// How to read the source image's color encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpretation {
    /// Trust the profile embedded in the file.
    Embedded,
    /// Assume sRGB.
    Srgb,
    /// Assume the configured workspace profile.
    Workspace,
    /// Assume the configured default input profile.
    DefaultInput,
    /// Use a profile supplied with the request.
    Specified,
    /// Embedded when present, default input otherwise.
    Automatic,
    /// Assign no meaning to the pixel values at all.
    DoNotInterpret,
}

/// What to do with the pixels once interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDisposition {
    /// Keep the pixels, tag the image with the interpretation profile.
    KeepProfile,
    /// Convert the pixels into the workspace profile.
    ConvertToWorkspace,
}

/// A fully concrete behavior: interpretation plus disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorSpec {
    pub interpretation: Interpretation,
    pub target: TargetDisposition,
}

impl BehaviorSpec {
    pub const fn new(interpretation: Interpretation, target: TargetDisposition) -> Self {
        Self {
            interpretation,
            target,
        }
    }

    /// Keep the embedded profile untouched.
    pub const PRESERVE_EMBEDDED: Self =
        Self::new(Interpretation::Embedded, TargetDisposition::KeepProfile);
    /// Convert from the embedded profile into the workspace.
    pub const EMBEDDED_TO_WORKSPACE: Self = Self::new(
        Interpretation::Embedded,
        TargetDisposition::ConvertToWorkspace,
    );
    /// Assume sRGB and keep the pixels.
    pub const SRGB_KEEP: Self = Self::new(Interpretation::Srgb, TargetDisposition::KeepProfile);
    /// Assume sRGB and convert into the workspace.
    pub const SRGB_TO_WORKSPACE: Self =
        Self::new(Interpretation::Srgb, TargetDisposition::ConvertToWorkspace);
    /// Convert from the default input profile into the workspace.
    pub const INPUT_TO_WORKSPACE: Self = Self::new(
        Interpretation::DefaultInput,
        TargetDisposition::ConvertToWorkspace,
    );
    /// Assign the workspace profile without touching pixels.
    pub const ASSUME_WORKSPACE: Self =
        Self::new(Interpretation::Workspace, TargetDisposition::KeepProfile);
    /// Leave the image untagged and unconverted.
    pub const NO_COLOR_MANAGEMENT: Self = Self::new(
        Interpretation::DoNotInterpret,
        TargetDisposition::KeepProfile,
    );
}

/// What to do when an image needs a color decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Defer the decision to the caller as a pending query.
    AskUser,
    /// Let the policy choose the safest sensible behavior.
    SafestBestAction,
    /// Apply exactly this behavior.
    Fixed(BehaviorSpec),
}

/// The condition an image was found in, and therefore which configured
/// behavior applies. Exactly one classification holds per image; the
/// variants are listed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorQuery {
    /// RAW-decoded pixels without any color interpretation.
    UncalibratedColor,
    /// No embedded profile.
    MissingProfile,
    /// Embedded profile differs from the workspace profile.
    ProfileMismatch,
}

/// Rendering intent for profile conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderingIntent {
    #[default]
    Perceptual,
    RelativeColorimetric,
    Saturation,
    AbsoluteColorimetric,
}

impl RenderingIntent {
    pub(crate) fn to_lcms(self) -> lcms2::Intent {
        match self {
            Self::Perceptual => lcms2::Intent::Perceptual,
            Self::RelativeColorimetric => lcms2::Intent::RelativeColorimetric,
            Self::Saturation => lcms2::Intent::Saturation,
            Self::AbsoluteColorimetric => lcms2::Intent::AbsoluteColorimetric,
        }
    }
}

/// The full color-management configuration a session runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorSettings {
    /// Master switch. When off, every image passes through untouched.
    pub enable_cm: bool,

    /// Behavior for images whose embedded profile differs from the workspace.
    pub on_profile_mismatch: Behavior,
    /// Behavior for images with no embedded profile.
    pub on_missing_profile: Behavior,
    /// Behavior for RAW images decoded without color interpretation.
    pub on_uncalibrated_color: Behavior,

    /// Workspace profile path. `None` selects sRGB.
    pub workspace_profile: Option<PathBuf>,
    /// Default input profile path for uncalibrated and untagged images.
    pub default_input_profile: Option<PathBuf>,
    /// Monitor profile path for display transforms. `None` selects sRGB.
    pub monitor_profile: Option<PathBuf>,
    /// Proof/output profile path for soft-proofing and output conversion.
    pub proof_profile: Option<PathBuf>,

    pub rendering_intent: RenderingIntent,
    /// Intent for the proofing leg of a soft-proofing transform.
    pub proofing_intent: RenderingIntent,
    pub use_black_point_compensation: bool,
    /// Mark out-of-gamut pixels while soft-proofing.
    pub use_gamut_check: bool,
    /// Use the monitor profile when rendering previews.
    pub use_managed_view: bool,
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            enable_cm: true,
            on_profile_mismatch: Behavior::AskUser,
            on_missing_profile: Behavior::SafestBestAction,
            on_uncalibrated_color: Behavior::SafestBestAction,
            workspace_profile: None,
            default_input_profile: None,
            monitor_profile: None,
            proof_profile: None,
            rendering_intent: RenderingIntent::Perceptual,
            proofing_intent: RenderingIntent::RelativeColorimetric,
            use_black_point_compensation: false,
            use_gamut_check: false,
            use_managed_view: false,
        }
    }
}

impl ColorSettings {
    /// The configured behavior for a given image condition.
    pub fn behavior_for(&self, query: ColorQuery) -> Behavior {
        match query {
            ColorQuery::UncalibratedColor => self.on_uncalibrated_color,
            ColorQuery::MissingProfile => self.on_missing_profile,
            ColorQuery::ProfileMismatch => self.on_profile_mismatch,
        }
    }

    /// The workspace profile, defaulting to sRGB when unconfigured.
    pub fn workspace(&self) -> IccProfile {
        match &self.workspace_profile {
            Some(path) => IccProfile::from_file(path),
            None => IccProfile::srgb(),
        }
    }

    /// The monitor profile, defaulting to sRGB when unconfigured.
    pub fn monitor(&self) -> IccProfile {
        match &self.monitor_profile {
            Some(path) => IccProfile::from_file(path),
            None => IccProfile::srgb(),
        }
    }

    pub fn default_input(&self) -> Option<IccProfile> {
        self.default_input_profile
            .as_ref()
            .map(IccProfile::from_file)
    }

    pub fn proof(&self) -> Option<IccProfile> {
        self.proof_profile.as_ref().map(IccProfile::from_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behavior_lookup_matches_condition() {
        let settings = ColorSettings {
            on_profile_mismatch: Behavior::Fixed(BehaviorSpec::EMBEDDED_TO_WORKSPACE),
            on_missing_profile: Behavior::AskUser,
            on_uncalibrated_color: Behavior::SafestBestAction,
            ..ColorSettings::default()
        };
        assert_eq!(
            settings.behavior_for(ColorQuery::ProfileMismatch),
            Behavior::Fixed(BehaviorSpec::EMBEDDED_TO_WORKSPACE)
        );
        assert_eq!(
            settings.behavior_for(ColorQuery::MissingProfile),
            Behavior::AskUser
        );
        assert_eq!(
            settings.behavior_for(ColorQuery::UncalibratedColor),
            Behavior::SafestBestAction
        );
    }

    #[test]
    fn unconfigured_workspace_is_srgb() {
        let settings = ColorSettings::default();
        assert!(settings.workspace().is_srgb());
        assert!(settings.monitor().is_srgb());
        assert!(settings.default_input().is_none());
    }

    #[test]
    fn sentinel_behaviors_compare_by_variant() {
        assert_eq!(Behavior::AskUser, Behavior::AskUser);
        assert_ne!(Behavior::AskUser, Behavior::SafestBestAction);
        assert_ne!(
            Behavior::AskUser,
            Behavior::Fixed(BehaviorSpec::PRESERVE_EMBEDDED)
        );
    }
}
