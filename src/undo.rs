// src/undo.rs
//
// The undo/redo engine. Two stacks of entries, each entry one user-visible
// action. Reversible actions (orientation filters) are undone by applying
// the exact inverse filter; everything else carries a deep snapshot of the
// pre-action image, and the first undo of such an entry captures the
// post-action image so redo is byte-exact.
//
// Origin tracking: the origin marks the stack position where the in-memory
// image last matched the file on disk. Pushing a new action invalidates the
// redo stack; if the origin sat inside the invalidated region it is gone
// for good and only a save can re-establish it.

use crate::error::{EditError, Result};
use crate::filters::BuiltinFilter;
use crate::history::EditHistory;
use crate::image::Image;

/// How an action can be taken back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoKind {
    /// Undone by applying the inverse filter. Only filters with an exact
    /// inverse qualify.
    Reversible(BuiltinFilter),
    /// Undone by restoring a snapshot.
    Irreversible,
}

/// One recorded action.
#[derive(Debug, Clone)]
pub struct UndoAction {
    pub kind: UndoKind,
    pub title: String,
    /// Non-undoable actions (a RAW import step, an initial conversion)
    /// count as changes but block the undo walk.
    pub undoable: bool,
}

struct UndoEntry {
    action: UndoAction,
    /// Pre-action image, present for irreversible entries.
    before: Option<Image>,
    /// Post-action image, captured on first undo for byte-exact redo.
    after: Option<Image>,
    history_before: EditHistory,
    history_after: EditHistory,
}

#[derive(Default)]
pub struct UndoManager {
    undo_stack: Vec<UndoEntry>,
    redo_stack: Vec<UndoEntry>,
    /// Stack position (= undo depth) where the image matched the file.
    origin: Option<usize>,
}

impl UndoManager {
    pub fn new() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            origin: Some(0),
        }
    }

    /// Forget everything; the current image becomes the origin.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.origin = Some(0);
    }

    /// Record a reversible filter that has just been applied.
    pub fn add_reversible(
        &mut self,
        filter: BuiltinFilter,
        history_before: EditHistory,
        history_after: EditHistory,
    ) -> Result<()> {
        if !filter.is_reversible() {
            return Err(EditError::invalid_argument(
                "filter",
                filter.title(),
                "only filters with an exact inverse can be recorded as reversible",
            ));
        }
        self.push(UndoEntry {
            action: UndoAction {
                title: filter.title().to_string(),
                kind: UndoKind::Reversible(filter),
                undoable: true,
            },
            before: None,
            after: None,
            history_before,
            history_after,
        });
        Ok(())
    }

    /// Record an irreversible action; `snapshot_before` is the image as it
    /// was before the action ran.
    pub fn add_irreversible(
        &mut self,
        title: impl Into<String>,
        undoable: bool,
        snapshot_before: Image,
        history_before: EditHistory,
        history_after: EditHistory,
    ) {
        self.push(UndoEntry {
            action: UndoAction {
                kind: UndoKind::Irreversible,
                title: title.into(),
                undoable,
            },
            before: Some(snapshot_before),
            after: None,
            history_before,
            history_after,
        });
    }

    fn push(&mut self, entry: UndoEntry) {
        if !self.redo_stack.is_empty() {
            // the origin dies with the redo region it sat in
            if let Some(origin) = self.origin {
                if origin > self.undo_stack.len() {
                    self.origin = None;
                }
            }
            self.redo_stack.clear();
        }
        self.undo_stack.push(entry);
    }

    /// Take back the newest action. Returns false when there is nothing
    /// undoable; callers still refresh their UI state either way.
    pub fn undo(&mut self, image: &mut Image) -> bool {
        let undoable = self
            .undo_stack
            .last()
            .map(|entry| entry.action.undoable)
            .unwrap_or(false);
        if !undoable {
            return false;
        }
        let mut entry = self.undo_stack.pop().expect("checked non-empty");

        match &entry.action.kind {
            UndoKind::Reversible(filter) => {
                let inverse = filter.reversed().expect("recorded as reversible");
                // inverse orientation filters cannot fail
                let _ = inverse.apply(image);
            }
            UndoKind::Irreversible => {
                if entry.after.is_none() {
                    entry.after = Some(image.deep_copy());
                }
                if let Some(before) = &entry.before {
                    *image = before.clone();
                }
            }
        }
        image.set_history(entry.history_before.clone());
        self.redo_stack.push(entry);
        true
    }

    /// Reapply the most recently undone action.
    pub fn redo(&mut self, image: &mut Image) -> bool {
        let Some(entry) = self.redo_stack.pop() else {
            return false;
        };
        match &entry.action.kind {
            UndoKind::Reversible(filter) => {
                let _ = filter.apply(image);
            }
            UndoKind::Irreversible => {
                if let Some(after) = &entry.after {
                    *image = after.clone();
                }
            }
        }
        image.set_history(entry.history_after.clone());
        self.undo_stack.push(entry);
        true
    }

    /// Number of actions the undo walk can take back before hitting a
    /// non-undoable entry or the bottom.
    pub fn available_undo_steps(&self) -> usize {
        self.undo_stack
            .iter()
            .rev()
            .take_while(|entry| entry.action.undoable)
            .count()
    }

    pub fn available_redo_steps(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn any_more_undo(&self) -> bool {
        self.available_undo_steps() > 0
    }

    pub fn any_more_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Titles of pending undo actions, newest first.
    pub fn undo_titles(&self) -> Vec<&str> {
        self.undo_stack
            .iter()
            .rev()
            .map(|entry| entry.action.title.as_str())
            .collect()
    }

    /// Titles of pending redo actions, next first.
    pub fn redo_titles(&self) -> Vec<&str> {
        self.redo_stack
            .iter()
            .rev()
            .map(|entry| entry.action.title.as_str())
            .collect()
    }

    /// Current stack position: the number of applied actions.
    pub fn position(&self) -> usize {
        self.undo_stack.len()
    }

    /// The image was just saved; the current position becomes the origin.
    pub fn set_origin(&mut self) {
        self.origin = Some(self.undo_stack.len());
    }

    /// The file the origin referred to has been replaced by other content;
    /// no stack position matches the disk anymore.
    pub fn clear_origin(&mut self) {
        self.origin = None;
    }

    pub fn is_at_origin(&self) -> bool {
        self.origin == Some(self.undo_stack.len())
    }

    /// The image differs from the file it came from.
    pub fn has_changes(&self) -> bool {
        !self.is_at_origin()
    }

    /// Walk back (or forward) to the origin position. Returns false when
    /// no origin exists or the walk is blocked by a non-undoable entry.
    pub fn rollback_to_origin(&mut self, image: &mut Image) -> bool {
        let Some(origin) = self.origin else {
            return false;
        };
        while self.undo_stack.len() > origin {
            if !self.undo(image) {
                return false;
            }
        }
        while self.undo_stack.len() < origin {
            if !self.redo(image) {
                return false;
            }
        }
        true
    }

    /// History the image would have after redoing everything, used when a
    /// save must record the full known future of the edit chain.
    pub fn history_of_full_redo(&self) -> Option<&EditHistory> {
        self.redo_stack.first().map(|entry| &entry.history_after)
    }

    /// Materialize the image as it was `steps` actions ago, without moving
    /// the stacks. Step 0 is the current image.
    pub fn image_at_steps_back(&self, current: &Image, steps: usize) -> Result<Image> {
        if steps == 0 {
            return Ok(current.clone());
        }
        if steps > self.undo_stack.len() {
            return Err(EditError::invalid_argument(
                "steps",
                steps.to_string(),
                "not that many recorded actions",
            ));
        }
        let mut image = current.deep_copy();
        for entry in self.undo_stack.iter().rev().take(steps) {
            match &entry.action.kind {
                UndoKind::Reversible(filter) => {
                    let inverse = filter.reversed().expect("recorded as reversible");
                    inverse.apply(&mut image)?;
                }
                UndoKind::Irreversible => {
                    image = entry
                        .before
                        .as_ref()
                        .ok_or_else(|| {
                            EditError::internal_panic(
                                "irreversible entry without a pre-action snapshot",
                            )
                        })?
                        .clone();
                }
            }
            image.set_history(entry.history_before.clone());
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::FilterAction;
    use image::{DynamicImage, Rgba};

    fn test_image() -> Image {
        let mut buf = image::RgbaImage::from_pixel(4, 6, Rgba([0, 0, 0, 255]));
        buf.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        Image::from_pixels(DynamicImage::ImageRgba8(buf))
    }

    fn apply_reversible(
        man: &mut UndoManager,
        image: &mut Image,
        filter: BuiltinFilter,
    ) {
        let before = image.history().clone();
        filter.apply(image).unwrap();
        image.history_mut().append_action(filter.filter_action());
        let after = image.history().clone();
        man.add_reversible(filter, before, after).unwrap();
    }

    fn apply_irreversible(man: &mut UndoManager, image: &mut Image, title: &str) {
        let snapshot = image.deep_copy();
        let before = image.history().clone();
        // stand-in destructive edit
        let crop = BuiltinFilter::Crop {
            x: 0,
            y: 0,
            width: image.width() - 1,
            height: image.height() - 1,
        };
        crop.apply(image).unwrap();
        image.history_mut().append_action(FilterAction::new(title, 1));
        let after = image.history().clone();
        man.add_irreversible(title, true, snapshot, before, after);
    }

    #[test]
    fn undo_redo_reversible_chain_is_exact() {
        let mut man = UndoManager::new();
        let mut image = test_image();
        let original = image.deep_copy();

        apply_reversible(&mut man, &mut image, BuiltinFilter::Rotate90);
        apply_reversible(&mut man, &mut image, BuiltinFilter::FlipHorizontal);
        assert_eq!(man.available_undo_steps(), 2);

        assert!(man.undo(&mut image));
        assert!(man.undo(&mut image));
        assert_eq!(image.pixels().as_bytes(), original.pixels().as_bytes());
        assert_eq!(image.history(), original.history());
        assert!(!man.undo(&mut image));

        assert!(man.redo(&mut image));
        assert!(man.redo(&mut image));
        assert_eq!(man.available_redo_steps(), 0);
        assert_eq!(image.history().action_count(), 2);
    }

    #[test]
    fn irreversible_undo_restores_snapshot_and_redo_is_byte_exact() {
        let mut man = UndoManager::new();
        let mut image = test_image();
        let original_bytes = image.pixels().as_bytes().to_vec();

        apply_irreversible(&mut man, &mut image, "crop");
        let edited_bytes = image.pixels().as_bytes().to_vec();
        assert_ne!(original_bytes, edited_bytes);

        assert!(man.undo(&mut image));
        assert_eq!(image.pixels().as_bytes(), &original_bytes[..]);

        assert!(man.redo(&mut image));
        assert_eq!(image.pixels().as_bytes(), &edited_bytes[..]);
    }

    #[test]
    fn new_action_clears_redo_and_buried_origin() {
        let mut man = UndoManager::new();
        let mut image = test_image();

        apply_reversible(&mut man, &mut image, BuiltinFilter::Rotate90);
        man.set_origin();
        assert!(!man.has_changes());

        assert!(man.undo(&mut image));
        assert!(man.has_changes());
        assert_eq!(man.available_redo_steps(), 1);

        // branch off: the origin sat in the redo region and is now gone
        apply_reversible(&mut man, &mut image, BuiltinFilter::FlipVertical);
        assert_eq!(man.available_redo_steps(), 0);
        assert!(man.has_changes());
        assert!(!man.rollback_to_origin(&mut image));
    }

    #[test]
    fn non_undoable_action_blocks_the_walk_but_counts_as_change() {
        let mut man = UndoManager::new();
        let mut image = test_image();

        let snapshot = image.deep_copy();
        let history = image.history().clone();
        man.add_irreversible("import conversion", false, snapshot, history.clone(), history);

        assert!(man.has_changes());
        assert!(!man.any_more_undo());
        assert!(!man.undo(&mut image));

        apply_reversible(&mut man, &mut image, BuiltinFilter::Rotate180);
        assert_eq!(man.available_undo_steps(), 1);
        assert!(man.undo(&mut image));
        // blocked again at the non-undoable entry
        assert!(!man.undo(&mut image));
        assert_eq!(man.position(), 1);
    }

    #[test]
    fn cleared_origin_is_unreachable() {
        let mut man = UndoManager::new();
        let mut image = test_image();

        apply_reversible(&mut man, &mut image, BuiltinFilter::Rotate90);
        man.set_origin();
        assert!(man.is_at_origin());

        // the file the origin pointed at no longer holds that content
        man.clear_origin();
        assert!(!man.is_at_origin());
        assert!(man.has_changes());
        assert!(!man.rollback_to_origin(&mut image));
        // the stacks themselves are untouched
        assert!(man.any_more_undo());
    }

    #[test]
    fn rollback_redoes_when_origin_is_ahead() {
        let mut man = UndoManager::new();
        let mut image = test_image();

        apply_reversible(&mut man, &mut image, BuiltinFilter::Rotate90);
        apply_reversible(&mut man, &mut image, BuiltinFilter::Rotate90);
        man.set_origin();
        let saved_bytes = image.pixels().as_bytes().to_vec();

        assert!(man.undo(&mut image));
        assert!(man.undo(&mut image));
        assert!(man.has_changes());

        assert!(man.rollback_to_origin(&mut image));
        assert!(!man.has_changes());
        assert_eq!(image.pixels().as_bytes(), &saved_bytes[..]);
    }

    #[test]
    fn image_at_steps_back_walks_mixed_chains() {
        let mut man = UndoManager::new();
        let mut image = test_image();
        let state0 = image.deep_copy();

        apply_reversible(&mut man, &mut image, BuiltinFilter::Rotate90);
        let state1 = image.deep_copy();
        apply_irreversible(&mut man, &mut image, "crop");
        let state2 = image.deep_copy();

        let back0 = man.image_at_steps_back(&image, 0).unwrap();
        assert_eq!(back0.pixels().as_bytes(), state2.pixels().as_bytes());

        let back1 = man.image_at_steps_back(&image, 1).unwrap();
        assert_eq!(back1.pixels().as_bytes(), state1.pixels().as_bytes());
        assert_eq!(back1.history(), state1.history());

        let back2 = man.image_at_steps_back(&image, 2).unwrap();
        assert_eq!(back2.pixels().as_bytes(), state0.pixels().as_bytes());

        assert!(man.image_at_steps_back(&image, 3).is_err());
        // the stacks did not move
        assert_eq!(man.position(), 2);
    }

    #[test]
    fn history_of_full_redo_reports_deepest_undone_state() {
        let mut man = UndoManager::new();
        let mut image = test_image();

        apply_reversible(&mut man, &mut image, BuiltinFilter::Rotate90);
        apply_reversible(&mut man, &mut image, BuiltinFilter::FlipHorizontal);
        let full = image.history().clone();

        assert!(man.history_of_full_redo().is_none());
        man.undo(&mut image);
        man.undo(&mut image);

        assert_eq!(man.history_of_full_redo(), Some(&full));
    }

    #[test]
    fn titles_come_back_in_menu_order() {
        let mut man = UndoManager::new();
        let mut image = test_image();

        apply_reversible(&mut man, &mut image, BuiltinFilter::Rotate90);
        apply_reversible(&mut man, &mut image, BuiltinFilter::FlipVertical);
        assert_eq!(man.undo_titles(), ["Flip Vertically", "Rotate Right"]);

        man.undo(&mut image);
        man.undo(&mut image);
        assert_eq!(man.redo_titles(), ["Rotate Right", "Flip Vertically"]);
    }
}
