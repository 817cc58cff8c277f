// src/color.rs
//
// Color management: ICC profiles, the configuration and decision policy,
// and the lcms2-backed pixel transforms.

pub mod manager;
pub mod profile;
pub mod settings;
pub mod transform;

pub use manager::ColorManager;
pub use profile::IccProfile;
pub use settings::{
    Behavior, BehaviorSpec, ColorQuery, ColorSettings, Interpretation, RenderingIntent,
    TargetDisposition,
};
pub use transform::IccTransform;
