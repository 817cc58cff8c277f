// src/io/cache.rs
//
// Process-shared loading cache. Two jobs in one structure, both guarded by
// a single mutex and one condvar:
//
//   - a cost-bounded cache of decoded images, keyed by cache key, evicted
//     least-recently-used first;
//   - a registry of in-flight loads, so concurrent requests for the same
//     pixels coalesce onto one decoder ("loader of record") while the
//     others wait as listeners.
//
// Protocol, in order:
//   1. a task probes the image cache; on a hit it is done;
//   2. it calls begin_loading: the first task for a key becomes the
//      loader, later ones become listeners;
//   3. listeners block in wait_for_result, waking on publication or on
//      their own stop flag; leaving decrements the listener count and
//      wakes the loader;
//   4. the loader decodes OUTSIDE the lock, then publishes; publication
//      stores the image in the cache and wakes everyone;
//   5. the loader blocks in wait_until_drained until the listener count
//      reaches zero, then the in-flight entry is removed. Entries never
//      outlive their loader.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::EditError;
use crate::image::Image;

/// How a waiting task wants the published image delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAccess {
    /// A shared buffer is fine; the caller promises not to mutate without
    /// detaching.
    ReadOnly,
    /// The caller gets its own pixel buffer.
    ReadWrite,
}

/// Role handed out by `begin_loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingRole {
    /// This task decodes; it must publish and then drain.
    Loader,
    /// Another task is decoding this key; wait for its result.
    Listener,
}

/// Outcome of a listener's wait.
#[derive(Debug)]
pub enum ListenOutcome {
    Ready(Image),
    Failed(EditError),
    /// The listener's own stop flag fired before publication.
    Stopped,
}

struct LoadingProcess {
    completed: bool,
    result: Option<Result<Image, EditError>>,
    listeners: usize,
}

struct CachedImage {
    image: Image,
    cost: usize,
    last_used: u64,
}

struct CacheInner {
    loading: HashMap<String, LoadingProcess>,
    images: HashMap<String, CachedImage>,
    cost_used: usize,
    cost_limit: usize,
    tick: u64,
}

impl CacheInner {
    fn touch(&mut self, key: &str) -> Option<Image> {
        self.tick += 1;
        let tick = self.tick;
        self.images.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.image.clone()
        })
    }

    fn insert_image(&mut self, key: String, image: Image) {
        let cost = image_cost(&image);
        // a single oversized image is still cached; eviction applies to others
        if let Some(old) = self.images.remove(&key) {
            self.cost_used -= old.cost;
        }
        while self.cost_used + cost > self.cost_limit && !self.images.is_empty() {
            let oldest = self
                .images
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    if let Some(evicted) = self.images.remove(&k) {
                        self.cost_used -= evicted.cost;
                        trace!(key = %k, cost = evicted.cost, "evicted");
                    }
                }
                None => break,
            }
        }
        self.tick += 1;
        self.cost_used += cost;
        self.images.insert(
            key,
            CachedImage {
                image,
                cost,
                last_used: self.tick,
            },
        );
    }
}

fn image_cost(image: &Image) -> usize {
    let bytes_per_pixel = if image.sixteen_bit() { 8 } else { 4 };
    image.width() as usize * image.height() as usize * bytes_per_pixel
}

/// The shared cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LoadingCache {
    inner: Arc<CacheShared>,
}

struct CacheShared {
    state: Mutex<CacheInner>,
    condvar: Condvar,
}

/// Listener wake-up poll interval, bounding how stale a stop flag can be.
const LISTENER_POLL: Duration = Duration::from_millis(200);

impl LoadingCache {
    pub fn new(cost_limit_bytes: usize) -> Self {
        Self {
            inner: Arc::new(CacheShared {
                state: Mutex::new(CacheInner {
                    loading: HashMap::new(),
                    images: HashMap::new(),
                    cost_used: 0,
                    cost_limit: cost_limit_bytes,
                    tick: 0,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Cache probe. A hit refreshes the entry's age.
    pub fn retrieve(&self, key: &str, access: CacheAccess) -> Option<Image> {
        let mut state = self.inner.state.lock();
        state.touch(key).map(|image| deliver(image, access))
    }

    /// Store an image, evicting least-recently-used entries over budget.
    pub fn put(&self, key: impl Into<String>, image: Image) {
        let mut state = self.inner.state.lock();
        state.insert_image(key.into(), image);
    }

    pub fn remove(&self, key: &str) {
        let mut state = self.inner.state.lock();
        if let Some(entry) = state.images.remove(key) {
            state.cost_used -= entry.cost;
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.state.lock().images.contains_key(key)
    }

    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.images.clear();
        state.cost_used = 0;
    }

    /// Register intent to load `key`. At most one caller per key becomes
    /// the loader; everyone else is a listener.
    pub fn begin_loading(&self, key: &str) -> LoadingRole {
        let mut state = self.inner.state.lock();
        match state.loading.get_mut(key) {
            Some(process) => {
                process.listeners += 1;
                LoadingRole::Listener
            }
            None => {
                state.loading.insert(
                    key.to_string(),
                    LoadingProcess {
                        completed: false,
                        result: None,
                        listeners: 0,
                    },
                );
                LoadingRole::Loader
            }
        }
    }

    /// Listener side: block until the loader publishes or `stopped` fires.
    /// Always deregisters the listener and wakes the loader before
    /// returning.
    pub fn wait_for_result(
        &self,
        key: &str,
        access: CacheAccess,
        stopped: &dyn Fn() -> bool,
    ) -> ListenOutcome {
        let mut state = self.inner.state.lock();
        let outcome = loop {
            match state.loading.get(key) {
                None => {
                    // loader vanished without publishing; treat as stopped
                    break ListenOutcome::Stopped;
                }
                Some(process) if process.completed => {
                    break match &process.result {
                        Some(Ok(image)) => ListenOutcome::Ready(deliver(image.clone(), access)),
                        Some(Err(err)) => ListenOutcome::Failed(err.clone()),
                        None => ListenOutcome::Stopped,
                    };
                }
                Some(_) => {}
            }
            if stopped() {
                break ListenOutcome::Stopped;
            }
            self.inner
                .condvar
                .wait_for(&mut state, LISTENER_POLL);
        };
        if let Some(process) = state.loading.get_mut(key) {
            process.listeners = process.listeners.saturating_sub(1);
        }
        self.inner.condvar.notify_all();
        outcome
    }

    /// Loader side: record the decode result, cache a success, wake all
    /// listeners.
    pub fn publish(&self, key: &str, result: Result<Image, EditError>) {
        let mut state = self.inner.state.lock();
        if let Ok(image) = &result {
            state.insert_image(key.to_string(), image.clone());
        }
        if let Some(process) = state.loading.get_mut(key) {
            process.completed = true;
            process.result = Some(result);
        }
        self.inner.condvar.notify_all();
    }

    /// Loader side, after `publish`: block until every listener has picked
    /// up the result, then retire the in-flight entry.
    pub fn wait_until_drained(&self, key: &str) {
        let mut state = self.inner.state.lock();
        loop {
            match state.loading.get(key) {
                None => return,
                Some(process) if process.listeners == 0 => break,
                Some(_) => {
                    self.inner.condvar.wait(&mut state);
                }
            }
        }
        state.loading.remove(key);
    }

    /// Loader side, on cancellation before publishing: wake listeners with
    /// no result and retire the entry once they leave. The image cache is
    /// left without a stale entry for `key`.
    pub fn abandon(&self, key: &str) {
        {
            let mut state = self.inner.state.lock();
            if let Some(process) = state.loading.get_mut(key) {
                process.completed = true;
                process.result = None;
            }
            self.inner.condvar.notify_all();
        }
        self.wait_until_drained(key);
    }

    /// Number of in-flight loads, for diagnostics.
    pub fn loading_count(&self) -> usize {
        self.inner.state.lock().loading.len()
    }
}

fn deliver(image: Image, access: CacheAccess) -> Image {
    match access {
        CacheAccess::ReadOnly => image,
        CacheAccess::ReadWrite => image.deep_copy(),
    }
}
