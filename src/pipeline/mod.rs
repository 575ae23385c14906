//! Pipeline stages for page-level OCR.
//!
//! Each submodule implements one step; the orchestrator wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ invoke ──▶ vision ──▶ postprocess
//! (pdfium)  (base64)   (retry)    (HTTP)     (cleanup)
//! ```
//!
//! 1. [`render`]: rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 2. [`encode`]: PNG/JPEG-encode and wrap as a data URL
//! 3. [`invoke`]: per-page state machine: concurrency permit, timeout,
//!    retry with backoff, cost accounting
//! 4. [`vision`]: the only stage with network I/O; maps HTTP statuses onto
//!    transient and permanent [`crate::error::RequestError`]s
//! 5. [`postprocess`]: deterministic text cleanup of model output

pub mod encode;
pub mod invoke;
pub mod postprocess;
pub mod render;
pub mod vision;
