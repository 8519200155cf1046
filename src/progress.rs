//! Progress-callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through the source files. The CLI uses
//! this to drive its progress bar; library callers can forward events
//! anywhere.
//!
//! # Example
//!
//! ```rust
//! use patent_table::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl BatchProgressCallback for Counter {
//!     fn on_file_complete(&self, _file: &str, _index: usize, _total: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch orchestrator as it processes each file.
///
/// All methods default to no-ops. In concurrent mode the per-file methods
/// may be called from several tasks at once, so implementations must guard
/// shared state (`Mutex`, atomics).
///
/// `index` is the 1-based position of the file in the sorted input list.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once with the number of discovered files.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    fn on_file_start(&self, file: &str, index: usize, total: usize) {
        let _ = (file, index, total);
    }

    /// The file was excluded by name before OCR.
    fn on_file_skipped(&self, file: &str, index: usize, total: usize) {
        let _ = (file, index, total);
    }

    /// A record was produced for the file.
    fn on_file_complete(&self, file: &str, index: usize, total: usize) {
        let _ = (file, index, total);
    }

    /// The file produced no record.
    fn on_file_error(&self, file: &str, index: usize, total: usize, error: &str) {
        let _ = (file, index, total, error);
    }

    /// Called once after every file has been attempted.
    fn on_batch_complete(&self, processed: usize, skipped: usize, failed: usize) {
        let _ = (processed, skipped, failed);
    }
}

/// Default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tracking {
        started: AtomicUsize,
        completed: AtomicUsize,
        errors: Mutex<Vec<String>>,
        totals: Mutex<Option<(usize, usize, usize)>>,
    }

    impl BatchProgressCallback for Tracking {
        fn on_file_start(&self, _file: &str, _index: usize, _total: usize) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_complete(&self, _file: &str, _index: usize, _total: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_error(&self, file: &str, _index: usize, _total: usize, error: &str) {
            self.errors.lock().unwrap().push(format!("{file}: {error}"));
        }

        fn on_batch_complete(&self, processed: usize, skipped: usize, failed: usize) {
            *self.totals.lock().unwrap() = Some((processed, skipped, failed));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_file_start("a.pdf", 1, 2);
        cb.on_file_skipped("通知书.pdf", 2, 2);
        cb.on_file_error("a.pdf", 1, 2, "boom");
        cb.on_batch_complete(0, 1, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let cb: Arc<Tracking> = Arc::new(Tracking::default());
        let dyn_cb: ProgressCallback = cb.clone();

        dyn_cb.on_file_start("a.pdf", 1, 2);
        dyn_cb.on_file_complete("a.pdf", 1, 2);
        dyn_cb.on_file_start("b.pdf", 2, 2);
        dyn_cb.on_file_error("b.pdf", 2, 2, "timeout");
        dyn_cb.on_batch_complete(1, 0, 1);

        assert_eq!(cb.started.load(Ordering::SeqCst), 2);
        assert_eq!(cb.completed.load(Ordering::SeqCst), 1);
        assert_eq!(cb.errors.lock().unwrap().as_slice(), ["b.pdf: timeout"]);
        assert_eq!(*cb.totals.lock().unwrap(), Some((1, 0, 1)));
    }
}
