// src/version.rs
//
// Plan types for versioned saving. A version manager (outside this crate's
// scope) decides what a "save new version" means on disk; the editor
// executes the plan: which file to write, which intermediates to
// materialize at which history steps, and what to do with the loaded file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bitflags::bitflags;

bitflags! {
    /// Work items a version save combines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VersionTasks: u32 {
        /// Write the result as a brand new version file.
        const NEW_FILE             = 1 << 0;
        /// Overwrite the loaded file in place.
        const REPLACE              = 1 << 1;
        /// Write the result, then delete the loaded file.
        const SAVE_AND_DELETE      = 1 << 2;
        /// Move the loaded file aside under an intermediate name first.
        const MOVE_TO_INTERMEDIATE = 1 << 3;
        /// Also write snapshots of intermediate history steps.
        const STORE_INTERMEDIATES  = 1 << 4;
    }
}

/// One file a version plan touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFileInfo {
    pub directory: PathBuf,
    pub file_name: String,
    /// Format short name ("jpeg", "png", ...).
    pub format: String,
}

impl VersionFileInfo {
    pub fn new(
        directory: impl Into<PathBuf>,
        file_name: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            directory: directory.into(),
            file_name: file_name.into(),
            format: format.into(),
        }
    }

    pub fn file_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    pub fn from_path(path: &Path, format: impl Into<String>) -> Self {
        Self {
            directory: path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            format: format.into(),
        }
    }
}

/// A complete version-save plan.
#[derive(Debug, Clone, Default)]
pub struct VersionFileOperation {
    pub tasks: VersionTasks,
    /// The file the session loaded from, when the plan cares about it.
    pub loaded_file: Option<VersionFileInfo>,
    /// The primary file to write.
    pub save_file: Option<VersionFileInfo>,
    /// Where the loaded file moves when MOVE_TO_INTERMEDIATE is set.
    pub intermediate_for_loaded_file: Option<VersionFileInfo>,
    /// Intermediate snapshots to write, keyed by history step (number of
    /// undo steps back from the current image).
    pub intermediates: BTreeMap<usize, VersionFileInfo>,
}

impl Default for VersionTasks {
    fn default() -> Self {
        VersionTasks::empty()
    }
}

impl VersionFileOperation {
    pub fn new_file(save_file: VersionFileInfo) -> Self {
        Self {
            tasks: VersionTasks::NEW_FILE,
            save_file: Some(save_file),
            ..Self::default()
        }
    }

    pub fn replace(loaded_file: VersionFileInfo) -> Self {
        Self {
            tasks: VersionTasks::REPLACE,
            save_file: Some(loaded_file.clone()),
            loaded_file: Some(loaded_file),
            ..Self::default()
        }
    }

    pub fn with_intermediate(mut self, step: usize, file: VersionFileInfo) -> Self {
        self.tasks |= VersionTasks::STORE_INTERMEDIATES;
        self.intermediates.insert(step, file);
        self
    }
}
