// src/io/task.rs
//
// The load and save task state machines. A loading task runs the shared
// cache protocol: probe, join an in-flight load as a listener, or decode
// as the loader of record and publish. Post-processing (the color policy)
// runs per request on the delivered copy; the cache always holds the
// pristine decode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::color::{ColorManager, IccProfile, IccTransform};
use crate::error::{EditError, Result};
use crate::image::Image;
use crate::io::cache::{CacheAccess, ListenOutcome, LoadingCache, LoadingRole};
use crate::io::codec::{ImageCodec, SaveOptions};
use crate::io::description::{LoadingDescription, PostProcessing};
use crate::io::ProgressObserver;

/// Shared stop flag; the owning thread flips it, the task polls it.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Observer view a task hands to the codec: the caller's observer plus the
/// task's own stop flag.
struct TaskObserver<'a> {
    stop: &'a StopFlag,
    inner: &'a dyn ProgressObserver,
}

impl ProgressObserver for TaskObserver<'_> {
    fn continue_query(&self) -> bool {
        !self.stop.is_raised() && self.inner.continue_query()
    }

    fn progress_info(&self, progress: f32) {
        self.inner.progress_info(progress);
    }
}

pub struct LoadingTask {
    description: LoadingDescription,
    access: CacheAccess,
    stop: StopFlag,
}

impl LoadingTask {
    pub fn new(description: LoadingDescription, access: CacheAccess) -> Self {
        Self {
            description,
            access,
            stop: StopFlag::new(),
        }
    }

    pub fn description(&self) -> &LoadingDescription {
        &self.description
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Run the shared-loading protocol to completion.
    pub fn execute(
        &self,
        cache: &LoadingCache,
        codec: &dyn ImageCodec,
        observer: &dyn ProgressObserver,
    ) -> Result<Image> {
        let observer = TaskObserver {
            stop: &self.stop,
            inner: observer,
        };
        let what = || format!("loading {}", self.description.file_path().display());
        if !observer.continue_query() {
            return Err(EditError::aborted(what()));
        }

        let key = self.description.cache_key();

        // 1. cache probe
        if let Some(mut image) = cache.retrieve(&key, self.access) {
            self.post_process(&mut image, &observer)?;
            return Ok(image);
        }

        // 2. coalesce with an in-flight load, or become the loader
        match cache.begin_loading(&key) {
            LoadingRole::Listener => {
                let stopped = || !observer.continue_query();
                match cache.wait_for_result(&key, self.access, &stopped) {
                    ListenOutcome::Ready(mut image) => {
                        self.post_process(&mut image, &observer)?;
                        Ok(image)
                    }
                    ListenOutcome::Failed(err) => Err(err),
                    ListenOutcome::Stopped => Err(EditError::aborted(what())),
                }
            }
            LoadingRole::Loader => {
                // 3. decode outside the cache lock
                let decoded = codec.decode(&self.description, &observer);
                match decoded {
                    Ok(image) => {
                        cache.publish(&key, Ok(image.clone()));
                        cache.wait_until_drained(&key);
                        let mut image = match self.access {
                            CacheAccess::ReadOnly => image,
                            CacheAccess::ReadWrite => image.deep_copy(),
                        };
                        self.post_process(&mut image, &observer)?;
                        Ok(image)
                    }
                    Err(err) if err.is_cancellation() => {
                        // never cache a partial result
                        cache.abandon(&key);
                        Err(err)
                    }
                    Err(err) => {
                        cache.publish(&key, Err(err.clone()));
                        cache.wait_until_drained(&key);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Apply the request's color post-processing to a delivered image.
    /// Mutation replaces the pixel Arc, so the cached copy is untouched.
    fn post_process(&self, image: &mut Image, observer: &dyn ProgressObserver) -> Result<()> {
        match &self.description.post_processing {
            PostProcessing::None => Ok(()),
            PostProcessing::ApplyTransform {
                output_profile,
                intent,
                black_point_compensation,
            } => {
                let mut transform = IccTransform::new();
                transform.set_embedded_profile(image.profile().cloned());
                transform.set_output_profile(IccProfile::from_file(output_profile));
                transform.set_intent(*intent);
                transform.set_black_point_compensation(*black_point_compensation);
                transform.apply(image, observer)
            }
            PostProcessing::ConvertForEditor(settings) => {
                ColorManager::new(image, settings).transform_default(observer)
            }
            PostProcessing::ConvertToSrgb => {
                let settings = crate::color::ColorSettings::default();
                ColorManager::new(image, &settings).transform_to_srgb(observer)
            }
            PostProcessing::ConvertForDisplay(settings) => {
                let mut manager = ColorManager::new(image, settings);
                manager.transform_default(observer)?;
                manager.transform_for_display(observer)
            }
            PostProcessing::ConvertForOutput { output_profile } => {
                let settings = crate::color::ColorSettings::default();
                ColorManager::new(image, &settings)
                    .transform_for_output(IccProfile::from_file(output_profile), observer)
            }
        }
    }
}

pub struct SavingTask {
    image: Image,
    file_path: std::path::PathBuf,
    options: SaveOptions,
    stop: StopFlag,
}

impl SavingTask {
    pub fn new(image: Image, file_path: impl Into<std::path::PathBuf>, options: SaveOptions) -> Self {
        Self {
            image,
            file_path: file_path.into(),
            options,
            stop: StopFlag::new(),
        }
    }

    pub fn file_path(&self) -> &std::path::Path {
        &self.file_path
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn execute(&self, codec: &dyn ImageCodec, observer: &dyn ProgressObserver) -> Result<()> {
        let observer = TaskObserver {
            stop: &self.stop,
            inner: observer,
        };
        if !observer.continue_query() {
            return Err(EditError::aborted(format!(
                "saving {}",
                self.file_path.display()
            )));
        }
        codec.encode(&self.image, &self.file_path, &self.options, &observer)
    }
}
