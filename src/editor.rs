// src/editor.rs
//
// The editing session: one image, its undo/redo stacks, the color policy,
// and the load/save machinery, behind a single facade. All completion
// events from the worker thread are handled here, on the session's own
// thread, in process_events.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::color::{Behavior, ColorManager, ColorQuery, ColorSettings, IccProfile, IccTransform};
use crate::error::{EditError, Result};
use crate::filters::BuiltinFilter;
use crate::history::{EditHistory, FilterAction, ReferredImage};
use crate::image::{Image, RawDecodingSettings};
use crate::io::{
    CacheAccess, IoEvent, LoadSaveThread, LoadingCache, LoadingDescription, LoadingPolicy,
    NullObserver, PostProcessing, SaveOptions,
};
use crate::undo::UndoManager;
use crate::version::{VersionFileOperation, VersionTasks};

/// Session callbacks, the session's one-way signals to its owner.
pub trait SessionNotifier {
    fn undo_state_changed(&self) {}
    fn modified(&self) {}
    fn image_loaded(&self, _path: &Path, _success: bool) {}
    fn image_saved(&self, _path: &Path, _success: bool) {}
    fn loading_progress(&self, _path: &Path, _progress: f32) {}
    fn saving_progress(&self, _path: &Path, _progress: f32) {}
    fn file_origin_changed(&self, _path: &Path) {}
    fn color_query_pending(&self, _query: ColorQuery) {}
    /// A fuller decode of `path` is underway; the current image for it is a
    /// reduced version.
    fn more_complete_load_available(&self, _path: &Path) {}
    /// The load of `path` was cancelled, not failed.
    fn loading_cancelled(&self, _path: &Path) {}
    /// The save to `path` was cancelled, not failed.
    fn saving_cancelled(&self, _path: &Path) {}
}

/// Notifier that swallows everything.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl SessionNotifier for NullNotifier {}

/// Snapshot of the undo machinery, for menu/toolbar synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UndoState {
    pub can_undo: bool,
    pub can_redo: bool,
    pub has_changes: bool,
    pub at_origin: bool,
}

/// One pending entry of a save chain.
struct FileToSave {
    /// `None` marks the primary file; `Some(step)` an intermediate
    /// materialized that many actions back.
    history_step: Option<usize>,
    file_path: PathBuf,
    options: SaveOptions,
    image: Image,
}

pub struct EditorSession {
    image: Image,
    valid: bool,
    undo_man: UndoManager,
    settings: ColorSettings,
    thread: LoadSaveThread,
    notifier: Box<dyn SessionNotifier>,
    current_description: Option<LoadingDescription>,
    /// Selection rectangle (x, y, width, height) on the current image.
    selection: Option<(u32, u32, u32, u32)>,
    /// Save chain, executed strictly in order; intermediates before the
    /// primary file.
    files_to_save: VecDeque<FileToSave>,
    saving_in_progress: bool,
    /// Entry count of the history as loaded, for branch marking.
    initial_history_size: usize,
}

impl EditorSession {
    pub fn new(
        settings: ColorSettings,
        cache: LoadingCache,
        codec: Arc<dyn crate::io::ImageCodec>,
        notifier: Box<dyn SessionNotifier>,
    ) -> Self {
        Self {
            image: Image::null(),
            valid: false,
            undo_man: UndoManager::new(),
            settings,
            thread: LoadSaveThread::new(cache, codec),
            notifier,
            current_description: None,
            selection: None,
            files_to_save: VecDeque::new(),
            saving_in_progress: false,
            initial_history_size: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn settings(&self) -> &ColorSettings {
        &self.settings
    }

    pub fn has_changes(&self) -> bool {
        self.undo_man.has_changes()
    }

    pub fn any_more_undo(&self) -> bool {
        self.undo_man.any_more_undo()
    }

    pub fn any_more_redo(&self) -> bool {
        self.undo_man.any_more_redo()
    }

    pub fn undo_titles(&self) -> Vec<&str> {
        self.undo_man.undo_titles()
    }

    pub fn redo_titles(&self) -> Vec<&str> {
        self.undo_man.redo_titles()
    }

    /// One combined reading of the undo machinery, matching what the
    /// undo-state signal announces.
    pub fn undo_state(&self) -> UndoState {
        UndoState {
            can_undo: self.undo_man.any_more_undo(),
            can_redo: self.undo_man.any_more_redo(),
            has_changes: self.undo_man.has_changes(),
            at_origin: self.undo_man.is_at_origin(),
        }
    }

    // ----- loading -----

    /// Start loading a file. A newer load cancels older ones; the editor
    /// shows one image at a time.
    pub fn load(&mut self, path: impl Into<PathBuf>) {
        let description = LoadingDescription::new(path)
            .post_processed(PostProcessing::ConvertForEditor(self.settings.clone()));
        self.start_load(description);
    }

    /// Start loading a RAW file with explicit demosaic parameters.
    pub fn load_raw(&mut self, path: impl Into<PathBuf>, raw: RawDecodingSettings) {
        let description = LoadingDescription::with_raw(path, raw)
            .post_processed(PostProcessing::ConvertForEditor(self.settings.clone()));
        self.start_load(description);
    }

    fn start_load(&mut self, description: LoadingDescription) {
        self.thread.stop_saving(None);
        self.current_description = Some(description.clone());
        self.thread.load(
            description,
            CacheAccess::ReadWrite,
            LoadingPolicy::FirstRemovePrevious,
        );
    }

    /// Discard every unsaved change and reload the image from its origin
    /// file.
    pub fn restore(&mut self) -> Result<()> {
        let path = self
            .image
            .origin_path()
            .ok_or_else(|| EditError::invalid_argument("path", "", "image has no origin file"))?
            .to_path_buf();
        match self.image.raw_settings().cloned() {
            Some(raw) => self.load_raw(path, raw),
            None => self.load(path),
        }
        Ok(())
    }

    /// Cancel the load in flight. The cancellation is reported through the
    /// notifier once the worker acknowledges it.
    pub fn abort_loading(&mut self) {
        self.thread.stop_loading(None);
    }

    /// Install an externally developed RAW image as the session's current
    /// image, as if it had just been loaded. The develop step cannot be
    /// written back, so the session starts dirty with nothing to undo.
    pub fn put_developed_raw(&mut self, mut image: Image, raw: RawDecodingSettings) {
        self.current_description = None;
        image.set_raw_settings(Some(raw));
        self.image = image;
        self.valid = true;
        self.selection = None;
        self.initial_history_size = self.image.history().size();
        self.undo_man.clear();
        let history = self.image.history().clone();
        self.undo_man.add_irreversible(
            "Develop Raw Image",
            false,
            self.image.deep_copy(),
            history.clone(),
            history,
        );
        self.undo_man.clear_origin();
        self.notifier.undo_state_changed();
    }

    /// Forget the current image and return the session to the unloaded
    /// state, dropping any pending work.
    pub fn reset(&mut self) {
        self.thread.stop_all();
        self.current_description = None;
        self.files_to_save.clear();
        self.image = Image::null();
        self.valid = false;
        self.selection = None;
        self.undo_man.clear();
        self.undo_man.clear_origin();
        self.notifier.undo_state_changed();
    }

    /// Drain completion and progress events from the worker. Call from the
    /// session's own thread; this is the single point where images and
    /// save results enter the session.
    pub fn process_events(&mut self) {
        while let Some(event) = self.thread.try_next_event() {
            self.handle_event(event);
        }
    }

    /// Block until the worker goes idle and all events are handled, or the
    /// timeout passes. Returns true when idle.
    pub fn wait_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_events();
            let busy =
                self.thread.is_busy() || self.saving_in_progress || !self.files_to_save.is_empty();
            if !busy {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if let Some(event) = self.thread.next_event_timeout(deadline - now) {
                self.handle_event(event);
            }
        }
    }

    fn handle_event(&mut self, event: IoEvent) {
        match event {
            IoEvent::ImageLoaded {
                description,
                result,
            } => self.on_image_loaded(description, result),
            IoEvent::ImageSaved { file_path, result } => self.on_image_saved(file_path, result),
            IoEvent::LoadingProgress {
                description,
                progress,
            } => self
                .notifier
                .loading_progress(description.file_path(), progress),
            IoEvent::SavingProgress {
                file_path,
                progress,
            } => self.notifier.saving_progress(&file_path, progress),
            IoEvent::MoreCompleteLoadAvailable { description } => self
                .notifier
                .more_complete_load_available(description.file_path()),
        }
    }

    fn on_image_loaded(&mut self, description: LoadingDescription, result: Result<Image>) {
        // stale completion of a superseded load
        if self.current_description.as_ref() != Some(&description) {
            return;
        }
        self.current_description = None;
        let path = description.file_path().to_path_buf();

        match result {
            Ok(image) => {
                self.image = image;
                self.valid = true;
                self.selection = None;
                self.initial_history_size = self.image.history().size();
                self.undo_man.clear();

                if description.is_raw() {
                    // a developed RAW can never be written back; the session
                    // starts dirty with nothing to undo and no stack
                    // position that matches a file on disk
                    let history = self.image.history().clone();
                    self.undo_man.add_irreversible(
                        "Develop Raw Image",
                        false,
                        self.image.deep_copy(),
                        history.clone(),
                        history,
                    );
                    self.undo_man.clear_origin();
                }

                if let Some(query) = self.image.attributes().pending_query {
                    self.notifier.color_query_pending(query);
                }

                self.notifier.undo_state_changed();
                self.notifier.image_loaded(&path, true);
            }
            Err(err) => {
                if err.is_cancellation() {
                    debug!(path = %path.display(), "load cancelled");
                    self.notifier.loading_cancelled(&path);
                    return;
                }
                warn!(path = %path.display(), error = %err, "load failed");
                self.image = Image::null();
                self.valid = false;
                self.selection = None;
                self.undo_man.clear();
                // nothing on disk corresponds to any stack position now
                self.undo_man.clear_origin();
                self.notifier.undo_state_changed();
                self.notifier.image_loaded(&path, false);
            }
        }
    }

    // ----- color -----

    /// Answer a deferred color question, converting or tagging per the
    /// chosen behavior. Recorded as an undoable action.
    pub fn resolve_color_query(
        &mut self,
        behavior: Behavior,
        specified: Option<IccProfile>,
    ) -> Result<()> {
        self.ensure_valid()?;
        let snapshot = self.image.deep_copy();
        let history_before = self.image.history().clone();

        let settings = self.settings.clone();
        ColorManager::new(&mut self.image, &settings).transform(
            behavior,
            specified,
            &NullObserver,
        )?;

        self.image
            .history_mut()
            .append_action(FilterAction::new("color:profileconversion", 1));
        self.mark_branch();
        let history_after = self.image.history().clone();
        self.undo_man.add_irreversible(
            "Color Profile Conversion",
            true,
            snapshot,
            history_before,
            history_after,
        );
        self.notifier.undo_state_changed();
        self.notifier.modified();
        Ok(())
    }

    /// Swap in a new color configuration. Applies to subsequent loads and
    /// transforms; the current image is left as it is.
    pub fn set_color_settings(&mut self, settings: ColorSettings) {
        self.settings = settings;
    }

    /// Tag or untag the current image with a profile without converting
    /// pixels.
    pub fn put_profile(&mut self, profile: Option<IccProfile>) -> Result<()> {
        self.ensure_valid()?;
        self.image.set_profile(profile);
        self.notifier.modified();
        Ok(())
    }

    /// Run a prepared profile conversion on the current image, recording it
    /// as an undoable action.
    pub fn apply_icc_transform(&mut self, transform: &IccTransform) -> Result<()> {
        self.ensure_valid()?;
        let snapshot = self.image.deep_copy();
        let history_before = self.image.history().clone();

        transform.apply(&mut self.image, &NullObserver)?;

        self.image
            .history_mut()
            .append_action(FilterAction::new("color:profileconversion", 1));
        self.mark_branch();
        let history_after = self.image.history().clone();
        self.undo_man.add_irreversible(
            "Color Profile Conversion",
            true,
            snapshot,
            history_before,
            history_after,
        );
        self.notifier.undo_state_changed();
        self.notifier.modified();
        Ok(())
    }

    // ----- editing -----

    /// Apply a built-in filter, recording it on the undo stack.
    pub fn apply_filter(&mut self, filter: BuiltinFilter) -> Result<()> {
        self.ensure_valid()?;
        let history_before = self.image.history().clone();

        if filter.is_reversible() {
            filter.apply(&mut self.image)?;
            self.image.history_mut().append_action(filter.filter_action());
            self.mark_branch();
            let history_after = self.image.history().clone();
            self.undo_man
                .add_reversible(filter, history_before, history_after)?;
        } else {
            let snapshot = self.image.deep_copy();
            filter.apply(&mut self.image)?;
            self.image.history_mut().append_action(filter.filter_action());
            self.mark_branch();
            let history_after = self.image.history().clone();
            self.undo_man.add_irreversible(
                filter.title(),
                true,
                snapshot,
                history_before,
                history_after,
            );
        }

        self.notifier.undo_state_changed();
        self.notifier.modified();
        Ok(())
    }

    /// Replace the raster with externally computed pixels, recording the
    /// edit. The tool describes itself through `action`.
    pub fn put_image_data(
        &mut self,
        pixels: image::DynamicImage,
        action: FilterAction,
        title: impl Into<String>,
        undoable: bool,
    ) -> Result<()> {
        self.ensure_valid()?;
        let snapshot = self.image.deep_copy();
        let history_before = self.image.history().clone();

        self.image.put_pixels(pixels);
        self.image.history_mut().append_action(action);
        self.mark_branch();
        let history_after = self.image.history().clone();
        self.undo_man
            .add_irreversible(title, undoable, snapshot, history_before, history_after);

        self.notifier.undo_state_changed();
        self.notifier.modified();
        Ok(())
    }

    /// Copy out a selection rectangle.
    pub fn copy_selection(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Image> {
        self.ensure_valid()?;
        self.image.copy_region(x, y, width, height)
    }

    /// Set or clear the session's selection rectangle (x, y, width, height).
    pub fn set_selection(&mut self, rect: Option<(u32, u32, u32, u32)>) -> Result<()> {
        if let Some((x, y, width, height)) = rect {
            self.ensure_valid()?;
            self.image.check_selection(x, y, width, height)?;
        }
        self.selection = rect;
        Ok(())
    }

    pub fn selection(&self) -> Option<(u32, u32, u32, u32)> {
        self.selection
    }

    /// The image under the selection rectangle, or the whole image when
    /// nothing is selected.
    pub fn selected_image(&self) -> Result<Image> {
        self.ensure_valid()?;
        match self.selection {
            Some((x, y, width, height)) => self.image.copy_region(x, y, width, height),
            None => Ok(self.image.clone()),
        }
    }

    /// Paste an image over a region, recording the edit.
    pub fn put_selection(
        &mut self,
        src: &Image,
        x: u32,
        y: u32,
        action: FilterAction,
        title: impl Into<String>,
    ) -> Result<()> {
        self.ensure_valid()?;
        let snapshot = self.image.deep_copy();
        let history_before = self.image.history().clone();

        self.image.blit(src, x, y)?;
        self.image.history_mut().append_action(action);
        self.mark_branch();
        let history_after = self.image.history().clone();
        self.undo_man
            .add_irreversible(title, true, snapshot, history_before, history_after);

        self.notifier.undo_state_changed();
        self.notifier.modified();
        Ok(())
    }

    /// Mark the first action appended past the loaded history as a branch
    /// point.
    fn mark_branch(&mut self) {
        if self.image.history().size() == self.initial_history_size + 1 {
            self.image
                .history_mut()
                .set_branch_after(self.initial_history_size, true);
        }
    }

    /// Give the current referred image a UUID when it has none yet.
    pub fn ensure_current_uuid(&mut self, uuid: impl Into<String>) -> Result<()> {
        self.ensure_valid()?;
        self.image.history_mut().set_current_uuid(uuid);
        Ok(())
    }

    /// Adopt a history record resolved from the file on disk. Skipped while
    /// unsaved changes exist; the in-memory record is then the authority.
    /// Returns true when the history was adopted.
    pub fn adopt_resolved_history(&mut self, history: EditHistory) -> Result<bool> {
        self.ensure_valid()?;
        if self.has_changes() {
            return Ok(false);
        }
        self.image.set_history(history.clone());
        self.image.set_original_history(history);
        self.initial_history_size = self.image.history().size();
        Ok(true)
    }

    /// Mark or unmark the first unsaved action as a branch off the loaded
    /// version chain.
    pub fn set_history_branch(&mut self, branching: bool) -> Result<()> {
        self.ensure_valid()?;
        if self.image.history().size() > self.initial_history_size {
            self.image
                .history_mut()
                .set_branch_after(self.initial_history_size, branching);
        }
        Ok(())
    }

    // ----- undo/redo -----

    /// Take back the last action. The undo-state signal fires even when
    /// there was nothing to undo, so menus always resynchronize.
    pub fn undo(&mut self) -> bool {
        let done = self.undo_man.undo(&mut self.image);
        self.notifier.undo_state_changed();
        if done {
            self.notifier.modified();
        }
        done
    }

    pub fn redo(&mut self) -> bool {
        let done = self.undo_man.redo(&mut self.image);
        self.notifier.undo_state_changed();
        if done {
            self.notifier.modified();
        }
        done
    }

    /// Walk the stacks back (or forward) to the last saved state.
    pub fn rollback_to_origin(&mut self) -> bool {
        let done = self.undo_man.rollback_to_origin(&mut self.image);
        self.notifier.undo_state_changed();
        done
    }

    // ----- saving -----

    /// Save the current image over its origin file.
    pub fn save(&mut self) -> Result<()> {
        self.ensure_valid()?;
        let path = self
            .image
            .origin_path()
            .ok_or_else(|| EditError::invalid_argument("path", "", "image has no origin file"))?
            .to_path_buf();
        let options = options_for_path(&path);
        self.save_as(path, options)
    }

    /// Save the current image to `path`.
    pub fn save_as(&mut self, path: impl Into<PathBuf>, options: SaveOptions) -> Result<()> {
        self.ensure_valid()?;
        let path = path.into();
        self.files_to_save.push_back(FileToSave {
            history_step: None,
            file_path: path,
            options,
            image: self.image.clone(),
        });
        self.start_next_save();
        Ok(())
    }

    /// Execute a version-save plan: intermediates first, the primary file
    /// last. A failed intermediate aborts the rest of the chain.
    pub fn save_version(&mut self, operation: VersionFileOperation) -> Result<()> {
        self.ensure_valid()?;
        let save_file = operation
            .save_file
            .as_ref()
            .ok_or_else(|| EditError::invalid_argument("operation", "", "plan names no file"))?;

        if operation.tasks.contains(VersionTasks::MOVE_TO_INTERMEDIATE) {
            let (loaded, target) = match (
                &operation.loaded_file,
                &operation.intermediate_for_loaded_file,
            ) {
                (Some(loaded), Some(target)) => (loaded, target),
                _ => {
                    return Err(EditError::invalid_argument(
                        "operation",
                        "",
                        "moving the loaded file requires both its info and a target",
                    ))
                }
            };
            let from = loaded.file_path();
            let to = target.file_path();
            std::fs::rename(&from, &to).map_err(|err| {
                EditError::file_write_failed(to.to_string_lossy().into_owned(), err)
            })?;
            self.image
                .history_mut()
                .move_current_referred_image(&to, &target.file_name);
        }

        for (step, info) in &operation.intermediates {
            let image = self.undo_man.image_at_steps_back(&self.image, *step)?;
            self.files_to_save.push_back(FileToSave {
                history_step: Some(*step),
                file_path: info.file_path(),
                options: SaveOptions::for_format(info.format.clone()),
                image,
            });
        }

        self.files_to_save.push_back(FileToSave {
            history_step: None,
            file_path: save_file.file_path(),
            options: SaveOptions::for_format(save_file.format.clone()),
            image: self.image.clone(),
        });
        self.start_next_save();
        Ok(())
    }

    /// Cancel the save in flight and drop the rest of the chain.
    pub fn abort_saving(&mut self) {
        self.thread.stop_saving(None);
        self.files_to_save.clear();
    }

    fn start_next_save(&mut self) {
        if self.saving_in_progress {
            return;
        }
        if let Some(next) = self.files_to_save.front() {
            self.saving_in_progress = true;
            self.thread
                .save(next.image.clone(), &next.file_path, next.options.clone());
        }
    }

    fn on_image_saved(&mut self, file_path: PathBuf, result: Result<()>) {
        // an aborted chain may already be empty; the worker still must be
        // marked idle
        self.saving_in_progress = false;
        let Some(current) = self.files_to_save.pop_front() else {
            return;
        };
        if current.file_path != file_path {
            warn!(
                expected = %current.file_path.display(),
                got = %file_path.display(),
                "save completion out of order"
            );
        }

        match result {
            Ok(()) => {
                match current.history_step {
                    Some(step) => {
                        // anchor the intermediate at the history entry it
                        // materializes: one entry per action, newest last
                        let index = self
                            .image
                            .history()
                            .size()
                            .saturating_sub(1)
                            .saturating_sub(step);
                        let referred = ReferredImage::from_path(&current.file_path);
                        self.image
                            .history_mut()
                            .insert_referred_image(index, referred.clone());
                        // the queued files carry history copies taken when
                        // the chain was built; they must reference the
                        // intermediate's on-disk name too
                        for pending in &mut self.files_to_save {
                            pending
                                .image
                                .history_mut()
                                .insert_referred_image(index, referred.clone());
                        }
                        self.notifier.image_saved(&current.file_path, true);
                        self.start_next_save();
                    }
                    None => {
                        self.finish_primary_save(&current.file_path);
                        self.notifier.image_saved(&current.file_path, true);
                        self.start_next_save();
                    }
                }
            }
            Err(err) => {
                // abort the remainder of the chain either way
                self.files_to_save.clear();
                if err.is_cancellation() {
                    self.notifier.saving_cancelled(&current.file_path);
                } else {
                    warn!(path = %current.file_path.display(), error = %err, "save failed");
                    self.notifier.image_saved(&current.file_path, false);
                }
            }
        }
    }

    fn finish_primary_save(&mut self, path: &Path) {
        // overwriting a file invalidates every older reference to it
        if self.image.history().refers_to_path(path)
            && self.image.history().current_referred_image().map(|r| r.path.as_path())
                != Some(path)
        {
            self.image.history_mut().purge_path_from_referred_images(path);
        }
        self.image.history_mut().add_as_referred_image(path);

        let format = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".into());
        self.image.set_origin(path, format);
        self.initial_history_size = self.image.history().size();
        self.image
            .set_original_history(self.image.history().clone());

        self.undo_man.set_origin();
        self.notifier.undo_state_changed();
        self.notifier.file_origin_changed(path);
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(EditError::no_image())
        }
    }
}

/// Default encoding parameters for a target path, by extension.
pub fn options_for_path(path: &Path) -> SaveOptions {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => SaveOptions::for_format("jpeg"),
        "webp" => SaveOptions::for_format("webp"),
        "tif" | "tiff" => SaveOptions::for_format("tiff"),
        _ => SaveOptions::for_format("png"),
    }
}
