//! Progress-callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through a batch.
//!
//! # Example
//!
//! ```rust
//! use dockit::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, index: usize, total: usize, name: &str) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{n}/{total}: {name} (#{index})");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { done: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(cb as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch driver as it processes each file.
///
/// Implementations must be `Send + Sync`: files are processed concurrently
/// when `concurrency > 1`. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first file is touched.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file enters the per-file stage.
    ///
    /// `index` is 1-based batch position.
    fn on_file_start(&self, index: usize, total_files: usize, raw_name: &str) {
        let _ = (index, total_files, raw_name);
    }

    /// Called when a file finished normalisation and orientation correction.
    ///
    /// `display_name` is the repaired file name.
    fn on_file_complete(&self, index: usize, total_files: usize, display_name: &str) {
        let _ = (index, total_files, display_name);
    }

    /// Called when a file was skipped.
    fn on_file_error(&self, index: usize, total_files: usize, error: &str) {
        let _ = (index, total_files, error);
    }

    /// Called once after all artifacts were emitted.
    fn on_batch_complete(&self, total_files: usize, artifact_count: usize) {
        let _ = (total_files, artifact_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        artifacts: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_file_start(&self, _index: usize, _total: usize, _raw_name: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_complete(&self, _index: usize, _total: usize, _name: &str) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, artifact_count: usize) {
            self.artifacts.store(artifact_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_file_start(1, 2, "a.jpg");
        cb.on_file_complete(1, 2, "a.jpg");
        cb.on_file_error(2, 2, "unsupported");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_file_start(1, 2, "a.jpg");
        tracker.on_file_complete(1, 2, "a.jpg");
        tracker.on_file_start(2, 2, "b.gif");
        tracker.on_file_error(2, 2, "unsupported");
        tracker.on_batch_complete(2, 1);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.artifacts.load(Ordering::SeqCst), 1);
    }
}
