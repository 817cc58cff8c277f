// src/history.rs
//
// Edit-history record attached to an image: the ordered list of filter
// actions applied since the original file, plus the referred-image entries
// that anchor each step to files on disk.
//
// The record itself is serialized by a higher-level collaborator; the
// contract here is only that the ordered action list and the referred-image
// entries survive manipulation without loss.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Self-describing record of one applied filter. Provenance only: a
/// FilterAction says what happened, it does not know how to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterAction {
    pub identifier: String,
    pub version: u32,
    pub parameters: BTreeMap<String, String>,
}

impl FilterAction {
    pub fn new(identifier: impl Into<String>, version: u32) -> Self {
        Self {
            identifier: identifier.into(),
            version,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A file on disk that a history step refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferredImage {
    pub path: PathBuf,
    pub file_name: String,
    pub uuid: Option<String>,
}

impl ReferredImage {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            file_name,
            uuid: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryEntry {
    pub action: Option<FilterAction>,
    pub referred: Vec<ReferredImage>,
    /// Marks the first step of a branch off an already-saved version chain.
    pub branch: bool,
}

/// Ordered, replay-describing history of one logical image.
///
/// Entry 0 describes the original image (no action); each following entry is
/// one filter action, optionally anchored to saved files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditHistory {
    entries: Vec<HistoryEntry>,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History with the original-image entry referring to `path`.
    pub fn for_original(path: impl Into<PathBuf>) -> Self {
        let mut history = Self::default();
        history.entries.push(HistoryEntry {
            action: None,
            referred: vec![ReferredImage::from_path(path)],
            branch: false,
        });
        history
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries, original included.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Number of real edit steps (entries carrying an action).
    pub fn action_count(&self) -> usize {
        self.entries.iter().filter(|e| e.action.is_some()).count()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn append_action(&mut self, action: FilterAction) {
        if self.entries.is_empty() {
            self.entries.push(HistoryEntry::default());
        }
        self.entries.push(HistoryEntry {
            action: Some(action),
            referred: Vec::new(),
            branch: false,
        });
    }

    pub fn actions(&self) -> impl Iterator<Item = &FilterAction> {
        self.entries.iter().filter_map(|e| e.action.as_ref())
    }

    /// Drop all referred-image anchors, keeping the action list. Used when
    /// adopting a freshly loaded history whose file anchors are resolved by
    /// a higher level.
    pub fn clear_referred_images(&mut self) {
        for entry in &mut self.entries {
            entry.referred.clear();
        }
    }

    /// The referred image of the newest entry, i.e. the file this history
    /// state currently represents.
    pub fn current_referred_image(&self) -> Option<&ReferredImage> {
        self.entries.last().and_then(|e| e.referred.last())
    }

    /// Attach `path` as the referred image of the newest entry and return
    /// the created record.
    pub fn add_as_referred_image(&mut self, path: impl Into<PathBuf>) -> ReferredImage {
        let referred = ReferredImage::from_path(path);
        if self.entries.is_empty() {
            self.entries.push(HistoryEntry::default());
        }
        if let Some(entry) = self.entries.last_mut() {
            entry.referred.push(referred.clone());
        }
        referred
    }

    /// Anchor `referred` at the entry for history step `step`.
    pub fn insert_referred_image(&mut self, step: usize, referred: ReferredImage) {
        if let Some(entry) = self.entries.get_mut(step) {
            entry.referred.push(referred);
        }
    }

    /// Give the current referred image a UUID if it does not have one yet.
    pub fn set_current_uuid(&mut self, uuid: impl Into<String>) {
        if let Some(entry) = self.entries.last_mut() {
            if let Some(referred) = entry.referred.last_mut() {
                if referred.uuid.is_none() {
                    referred.uuid = Some(uuid.into());
                }
            }
        }
    }

    /// Retarget the current referred image: the file it pointed to has been
    /// moved aside to an intermediate name.
    pub fn move_current_referred_image(&mut self, path: impl Into<PathBuf>, file_name: &str) {
        if let Some(entry) = self.entries.last_mut() {
            if let Some(referred) = entry.referred.last_mut() {
                referred.path = path.into();
                referred.file_name = file_name.to_string();
            }
        }
    }

    /// Remove every referred image pointing at `path`: the file is about to
    /// be replaced by a different image.
    pub fn purge_path_from_referred_images(&mut self, path: &Path) {
        for entry in &mut self.entries {
            entry.referred.retain(|r| r.path != path);
        }
    }

    /// Mark (or unmark) the first step following `initial_size` entries as a
    /// branch point off the loaded version chain.
    pub fn set_branch_after(&mut self, initial_size: usize, branching: bool) {
        if let Some(entry) = self.entries.get_mut(initial_size) {
            entry.branch = branching;
        }
    }

    /// True when any referred image carries the given path.
    pub fn refers_to_path(&self, path: &Path) -> bool {
        self.entries
            .iter()
            .any(|e| e.referred.iter().any(|r| r.path == path))
    }
}
