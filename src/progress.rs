//! Progress-callback trait for per-page OCR events.
//!
//! Inject an [`Arc<dyn OcrProgressCallback>`] via
//! [`crate::orchestrator::OcrOrchestratorBuilder::progress`] to receive
//! events as the orchestrator processes each page.
//!
//! # Example
//!
//! ```rust
//! use pdf_vision_ocr::OcrProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl OcrProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done} done; page {page_num}/{total_pages} ({text_len} chars)");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each page.
///
/// Pages run concurrently, so page-level methods may be called from
/// different tasks in any order. All methods default to no-ops.
pub trait OcrProgressCallback: Send + Sync {
    /// Called once after rasterisation, before any request is sent.
    fn on_document_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page's first request obtains a concurrency slot.
    fn on_page_start(&self, page_num: usize) {
        let _ = page_num;
    }

    /// Called before sleeping ahead of retry number `retry` (1-based).
    fn on_page_retry(&self, page_num: usize, retry: u32, error: &str) {
        let _ = (page_num, retry, error);
    }

    /// Called when a page is successfully extracted.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize) {
        let _ = (page_num, total_pages, text_len);
    }

    /// Called when a page reaches the `Failed` state.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_document_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl OcrProgressCallback for NoopProgressCallback {}

/// The shared handle type the orchestrator and invoker hold.
pub type ProgressCallback = Arc<dyn OcrProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        retries: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl OcrProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_retry(&self, _page_num: usize, _retry: u32, _error: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _text_len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_document_start(5);
        cb.on_page_start(1);
        cb.on_page_retry(1, 1, "503");
        cb.on_page_complete(1, 5, 42);
        cb.on_page_error(2, 5, "some error");
        cb.on_document_complete(5, 4);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_page_start(1);
        tracker.on_page_retry(1, 1, "timeout");
        tracker.on_page_complete(1, 2, 100);
        tracker.on_page_start(2);
        tracker.on_page_error(2, 2, "401");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.retries.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_document_start(10);
    }
}
