// src/io/thread.rs
//
// The load/save worker. One background thread drains a task queue; results
// and progress come back over an event channel that the owning session
// drains on its own thread, so image delivery happens at a single point.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::Result;
use crate::image::Image;
use crate::io::cache::{CacheAccess, LoadingCache};
use crate::io::codec::{ImageCodec, SaveOptions};
use crate::io::description::LoadingDescription;
use crate::io::task::{LoadingTask, SavingTask, StopFlag};
use crate::io::ProgressObserver;

/// What to do with loads already underway when a new one arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingPolicy {
    /// Queue behind everything else.
    Append,
    /// Cancel every earlier load first; the newest request wins.
    FirstRemovePrevious,
}

/// Completion and progress notifications, delivered over the event channel.
#[derive(Debug)]
pub enum IoEvent {
    ImageLoaded {
        description: LoadingDescription,
        result: Result<Image>,
    },
    ImageSaved {
        file_path: PathBuf,
        result: Result<()>,
    },
    LoadingProgress {
        description: LoadingDescription,
        progress: f32,
    },
    SavingProgress {
        file_path: PathBuf,
        progress: f32,
    },
    /// A fuller decode of a file was requested while a reduced (half-size
    /// RAW) load of it is still underway; consumers of the reduced result
    /// can expect better data soon.
    MoreCompleteLoadAvailable { description: LoadingDescription },
}

enum QueuedTask {
    Load(LoadingTask),
    Save(SavingTask),
}

struct RunningInfo {
    is_load: bool,
    file_path: PathBuf,
    /// Present for loads only.
    description: Option<LoadingDescription>,
    stop: StopFlag,
}

struct ThreadShared {
    queue: Mutex<VecDeque<QueuedTask>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    running: Mutex<Option<RunningInfo>>,
    busy: AtomicBool,
}

/// Observer that forwards progress over the event channel and polls the
/// session-supplied cancellation state through the task stop flag only.
struct ForwardingObserver {
    sender: Mutex<Sender<IoEvent>>,
    description: Option<LoadingDescription>,
    file_path: PathBuf,
}

impl ProgressObserver for ForwardingObserver {
    fn progress_info(&self, progress: f32) {
        let event = match &self.description {
            Some(description) => IoEvent::LoadingProgress {
                description: description.clone(),
                progress,
            },
            None => IoEvent::SavingProgress {
                file_path: self.file_path.clone(),
                progress,
            },
        };
        let _ = self.sender.lock().send(event);
    }
}

/// Dedicated I/O worker bound to a cache and a codec.
pub struct LoadSaveThread {
    shared: Arc<ThreadShared>,
    events: Receiver<IoEvent>,
    sender: Sender<IoEvent>,
    cache: LoadingCache,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl LoadSaveThread {
    pub fn new(cache: LoadingCache, codec: Arc<dyn ImageCodec>) -> Self {
        let (sender, events) = std::sync::mpsc::channel();
        let shared = Arc::new(ThreadShared {
            queue: Mutex::new(VecDeque::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            running: Mutex::new(None),
            busy: AtomicBool::new(false),
        });

        let handle = {
            let shared = Arc::clone(&shared);
            let cache = cache.clone();
            let sender = sender.clone();
            std::thread::Builder::new()
                .name("load-save".into())
                .spawn(move || worker_loop(shared, cache, codec, sender))
                .expect("spawning the load-save thread")
        };

        Self {
            shared,
            events,
            sender,
            cache,
            handle: Some(handle),
        }
    }

    pub fn cache(&self) -> &LoadingCache {
        &self.cache
    }

    /// Queue a load.
    pub fn load(
        &self,
        description: LoadingDescription,
        access: CacheAccess,
        policy: LoadingPolicy,
    ) {
        if policy == LoadingPolicy::FirstRemovePrevious {
            self.stop_loading(None);
        }
        let mut queue = self.shared.queue.lock();
        let supersedes_reduced = queue.iter().any(|task| match task {
            QueuedTask::Load(load) => description.more_complete_than(load.description()),
            QueuedTask::Save(_) => false,
        }) || self
            .shared
            .running
            .lock()
            .as_ref()
            .and_then(|info| info.description.as_ref())
            .is_some_and(|current| description.more_complete_than(current));
        if supersedes_reduced {
            let _ = self.sender.send(IoEvent::MoreCompleteLoadAvailable {
                description: description.clone(),
            });
        }
        queue.push_back(QueuedTask::Load(LoadingTask::new(description, access)));
        self.shared.busy.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_one();
    }

    /// Queue a save. Saves always append; the save chain relies on order.
    pub fn save(&self, image: Image, file_path: impl Into<PathBuf>, options: SaveOptions) {
        let mut queue = self.shared.queue.lock();
        queue.push_back(QueuedTask::Save(SavingTask::new(
            image,
            file_path.into(),
            options,
        )));
        self.shared.busy.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_one();
    }

    /// Cancel loads: all of them, or only those for one file. Queued loads
    /// are dropped, a running one gets its stop flag raised.
    pub fn stop_loading(&self, file_path: Option<&Path>) {
        let matches =
            |p: &Path| file_path.map_or(true, |wanted| p == wanted);
        {
            let mut queue = self.shared.queue.lock();
            queue.retain(|task| match task {
                QueuedTask::Load(load) => !matches(load.description().file_path()),
                QueuedTask::Save(_) => true,
            });
        }
        let running = self.shared.running.lock();
        if let Some(info) = running.as_ref() {
            if info.is_load && matches(&info.file_path) {
                info.stop.raise();
            }
        }
    }

    /// Cancel saves the same way.
    pub fn stop_saving(&self, file_path: Option<&Path>) {
        let matches =
            |p: &Path| file_path.map_or(true, |wanted| p == wanted);
        {
            let mut queue = self.shared.queue.lock();
            queue.retain(|task| match task {
                QueuedTask::Save(save) => !matches(save.file_path()),
                QueuedTask::Load(_) => true,
            });
        }
        let running = self.shared.running.lock();
        if let Some(info) = running.as_ref() {
            if !info.is_load && matches(&info.file_path) {
                info.stop.raise();
            }
        }
    }

    pub fn stop_all(&self) {
        self.stop_loading(None);
        self.stop_saving(None);
    }

    /// A task is queued or running.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst) || !self.shared.queue.lock().is_empty()
    }

    /// Non-blocking event drain, called from the owning thread.
    pub fn try_next_event(&self) -> Option<IoEvent> {
        self.events.try_recv().ok()
    }

    /// Blocking event wait with timeout, for callers that must observe a
    /// completion.
    pub fn next_event_timeout(&self, timeout: Duration) -> Option<IoEvent> {
        self.events.recv_timeout(timeout).ok()
    }
}

impl Drop for LoadSaveThread {
    fn drop(&mut self) {
        self.stop_all();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    shared: Arc<ThreadShared>,
    cache: LoadingCache,
    codec: Arc<dyn ImageCodec>,
    sender: Sender<IoEvent>,
) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                shared.busy.store(false, Ordering::SeqCst);
                shared.wakeup.wait(&mut queue);
            }
        };

        match task {
            QueuedTask::Load(load) => {
                *shared.running.lock() = Some(RunningInfo {
                    is_load: true,
                    file_path: load.description().file_path().to_path_buf(),
                    description: Some(load.description().clone()),
                    stop: load.stop_flag(),
                });
                let observer = ForwardingObserver {
                    sender: Mutex::new(sender.clone()),
                    description: Some(load.description().clone()),
                    file_path: PathBuf::new(),
                };
                let result = load.execute(&cache, codec.as_ref(), &observer);
                if let Err(err) = &result {
                    if err.is_cancellation() {
                        debug!(path = %load.description().file_path().display(), "load cancelled");
                    }
                }
                // clear state before the completion event so an observer
                // that drained the event sees an idle worker
                *shared.running.lock() = None;
                settle_busy(&shared);
                let _ = sender.send(IoEvent::ImageLoaded {
                    description: load.description().clone(),
                    result,
                });
            }
            QueuedTask::Save(save) => {
                *shared.running.lock() = Some(RunningInfo {
                    is_load: false,
                    file_path: save.file_path().to_path_buf(),
                    description: None,
                    stop: save.stop_flag(),
                });
                let observer = ForwardingObserver {
                    sender: Mutex::new(sender.clone()),
                    description: None,
                    file_path: save.file_path().to_path_buf(),
                };
                let result = save.execute(codec.as_ref(), &observer);
                *shared.running.lock() = None;
                settle_busy(&shared);
                let _ = sender.send(IoEvent::ImageSaved {
                    file_path: save.file_path().to_path_buf(),
                    result,
                });
            }
        }
    }
}

// Both the store here and the store in the enqueue paths happen under the
// queue lock, so a task queued concurrently can never be missed.
fn settle_busy(shared: &ThreadShared) {
    let queue = shared.queue.lock();
    if queue.is_empty() {
        shared.busy.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for LoadSaveThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadSaveThread")
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::codec::FileCodec;
    use image::Rgba;

    const WAIT: Duration = Duration::from_secs(10);

    fn write_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        image::RgbaImage::from_pixel(4, 4, Rgba([5, 6, 7, 255]))
            .save(&path)
            .unwrap();
        path
    }

    fn wait_for_load(thread: &LoadSaveThread, path: &Path) -> Result<Image> {
        let deadline = std::time::Instant::now() + WAIT;
        while std::time::Instant::now() < deadline {
            match thread.next_event_timeout(WAIT) {
                Some(IoEvent::ImageLoaded {
                    description,
                    result,
                }) if description.file_path() == path => return result,
                Some(_) => continue,
                None => break,
            }
        }
        panic!("no load completion for {}", path.display());
    }

    #[test]
    fn load_completes_over_the_event_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "a.png");
        let thread = LoadSaveThread::new(LoadingCache::new(1 << 20), Arc::new(FileCodec));

        thread.load(
            LoadingDescription::new(&path),
            CacheAccess::ReadWrite,
            LoadingPolicy::Append,
        );
        let image = wait_for_load(&thread, &path).unwrap();
        assert_eq!((image.width(), image.height()), (4, 4));
        assert!(thread.cache().contains(&LoadingDescription::new(&path).cache_key()));
    }

    #[test]
    fn first_remove_previous_drops_queued_loads() {
        let dir = tempfile::tempdir().unwrap();
        let keep = write_png(dir.path(), "keep.png");
        let drop_me = write_png(dir.path(), "drop.png");
        let thread = LoadSaveThread::new(LoadingCache::new(1 << 20), Arc::new(FileCodec));

        thread.load(
            LoadingDescription::new(&drop_me),
            CacheAccess::ReadOnly,
            LoadingPolicy::Append,
        );
        thread.load(
            LoadingDescription::new(&keep),
            CacheAccess::ReadOnly,
            LoadingPolicy::FirstRemovePrevious,
        );

        // the surviving load completes; the dropped one may have either
        // been cancelled mid-flight or never started
        let image = wait_for_load(&thread, &keep).unwrap();
        assert_eq!(image.width(), 4);
    }

    #[test]
    fn full_size_load_announces_more_complete_data() {
        use crate::image::RawDecodingSettings;

        /// Codec that holds every decode until the test releases it.
        struct GatedCodec {
            inner: FileCodec,
            gate: Mutex<std::sync::mpsc::Receiver<()>>,
        }

        impl ImageCodec for GatedCodec {
            fn decode(
                &self,
                description: &LoadingDescription,
                observer: &dyn ProgressObserver,
            ) -> Result<Image> {
                let _ = self.gate.lock().recv();
                self.inner.decode(description, observer)
            }

            fn encode(
                &self,
                image: &Image,
                path: &Path,
                options: &SaveOptions,
                observer: &dyn ProgressObserver,
            ) -> Result<()> {
                self.inner.encode(image, path, options, observer)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "shot.png");
        let (release, gate) = std::sync::mpsc::channel();
        let thread = LoadSaveThread::new(
            LoadingCache::new(1 << 20),
            Arc::new(GatedCodec {
                inner: FileCodec,
                gate: Mutex::new(gate),
            }),
        );

        let half = LoadingDescription::with_raw(
            &path,
            RawDecodingSettings {
                half_size: true,
                ..RawDecodingSettings::default()
            },
        );
        let full = LoadingDescription::with_raw(&path, RawDecodingSettings::default());

        thread.load(half, CacheAccess::ReadOnly, LoadingPolicy::Append);
        thread.load(full.clone(), CacheAccess::ReadOnly, LoadingPolicy::Append);
        drop(release);

        let deadline = std::time::Instant::now() + WAIT;
        loop {
            assert!(
                std::time::Instant::now() < deadline,
                "no more-complete announcement"
            );
            match thread.next_event_timeout(WAIT) {
                Some(IoEvent::MoreCompleteLoadAvailable { description }) => {
                    assert_eq!(description, full);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[test]
    fn save_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_png(dir.path(), "src.png");
        let out = dir.path().join("out.png");
        let thread = LoadSaveThread::new(LoadingCache::new(1 << 20), Arc::new(FileCodec));

        thread.load(
            LoadingDescription::new(&src),
            CacheAccess::ReadWrite,
            LoadingPolicy::Append,
        );
        let image = wait_for_load(&thread, &src).unwrap();

        thread.save(image.clone(), &out, SaveOptions::for_format("png"));
        let deadline = std::time::Instant::now() + WAIT;
        loop {
            assert!(std::time::Instant::now() < deadline, "save never completed");
            match thread.next_event_timeout(WAIT) {
                Some(IoEvent::ImageSaved { file_path, result }) if file_path == out => {
                    result.unwrap();
                    break;
                }
                _ => continue,
            }
        }

        thread.load(
            LoadingDescription::new(&out),
            CacheAccess::ReadOnly,
            LoadingPolicy::Append,
        );
        let reloaded = wait_for_load(&thread, &out).unwrap();
        assert_eq!(reloaded.pixels().as_bytes(), image.pixels().as_bytes());
    }
}
