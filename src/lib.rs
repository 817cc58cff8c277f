//! darkroom-core
//!
//! The headless core of a non-destructive photo editor:
//!
//! - a branch-aware undo/redo engine where orientation edits are undone by
//!   exact inverse filters and destructive edits by snapshots;
//! - a color-management decision policy over lcms2: classify how an image
//!   arrived (uncalibrated, untagged, mismatched, matched), resolve the
//!   configured behavior, run the conversion;
//! - an asynchronous load/save engine where concurrent requests for the
//!   same pixels coalesce onto one decoder through a shared cache.
//!
//! [`editor::EditorSession`] ties the three together; each layer is also
//! usable on its own.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use darkroom_core::color::ColorSettings;
//! use darkroom_core::editor::{EditorSession, NullNotifier};
//! use darkroom_core::filters::BuiltinFilter;
//! use darkroom_core::io::{FileCodec, LoadingCache};
//!
//! let cache = LoadingCache::new(256 << 20);
//! let mut session = EditorSession::new(
//!     ColorSettings::default(),
//!     cache,
//!     Arc::new(FileCodec),
//!     Box::new(NullNotifier),
//! );
//! session.load("/photos/holiday.jpg");
//! session.wait_until_idle(Duration::from_secs(30));
//! session.apply_filter(BuiltinFilter::Rotate90)?;
//! session.undo();
//! # Ok::<(), darkroom_core::error::EditError>(())
//! ```

pub mod color;
pub mod editor;
pub mod error;
pub mod filters;
pub mod history;
pub mod image;
pub mod io;
pub mod undo;
pub mod version;

pub use color::{Behavior, BehaviorSpec, ColorQuery, ColorSettings, IccProfile, IccTransform};
pub use editor::{EditorSession, NullNotifier, SessionNotifier, UndoState};
pub use error::{EditError, ErrorCategory, Result};
pub use filters::BuiltinFilter;
pub use history::{EditHistory, FilterAction};
pub use crate::image::{Image, RawDecodingSettings};
pub use io::{
    CacheAccess, FileCodec, ImageCodec, LoadSaveThread, LoadingCache, LoadingDescription,
    SaveOptions,
};
pub use undo::{UndoAction, UndoKind, UndoManager};
pub use version::{VersionFileInfo, VersionFileOperation, VersionTasks};
