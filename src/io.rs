// src/io.rs
//
// Asynchronous image loading and saving: request descriptions, the codec
// seam, the process-shared loading cache, the task state machines, and the
// worker thread that runs them.

pub mod cache;
pub mod codec;
pub mod description;
pub mod task;
pub mod thread;

pub use cache::{CacheAccess, ListenOutcome, LoadingCache, LoadingRole};
pub use codec::{FileCodec, ImageCodec, SaveOptions};
pub use description::{LoadingDescription, PostProcessing};
pub use task::{LoadingTask, SavingTask, StopFlag};
pub use thread::{IoEvent, LoadSaveThread, LoadingPolicy};

/// Progress and cancellation callback for long-running pixel work.
///
/// Implementations are polled from worker threads between chunks of work; a
/// `false` from `continue_query` aborts the operation with a cancellation
/// error, never a codec or color error.
pub trait ProgressObserver: Send + Sync {
    /// Keep going?
    fn continue_query(&self) -> bool {
        true
    }

    /// Fraction of the current operation completed, in 0..=1.
    fn progress_info(&self, _progress: f32) {}
}

/// Observer that never cancels and ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {}
