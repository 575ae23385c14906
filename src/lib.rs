//! # pdf-vision-ocr
//!
//! Extract the text of PDF documents with a vision language model.
//!
//! Each page is rasterised to an image and sent to an OpenAI-compatible
//! chat-completions endpoint. Pages run concurrently under a fixed limit,
//! transient failures are retried with exponential backoff, and token usage
//! is priced per model so every run reports what it cost.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Validate  config sanity, document exists and is a file
//!  ├─ 2. Render    rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode    PNG/JPEG → base64 data URL
//!  ├─ 4. Invoke    bounded concurrent requests, timeout + retry per page
//!  ├─ 5. Clean     strip fences, invisible characters, blank-line runs
//!  └─ 6. Assemble  page-ordered text, token totals, estimated cost
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_vision_ocr::{OcrConfig, OcrOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OcrConfig::builder()
//!         .api_key(std::env::var("OPENAI_API_KEY")?)
//!         .max_concurrent_pages(4)
//!         .build()?;
//!
//!     let result = OcrOrchestrator::builder(config).build()?.process("scan.pdf").await;
//!     if result.success {
//!         println!("{}", result.text);
//!     }
//!     eprintln!("{} pages, ${:.4}", result.page_count, result.estimated_cost);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfocr` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ```toml
//! pdf-vision-ocr = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod pricing;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ImageDetail, ImageFormat, LoggingSettings, OcrConfig, OcrConfigBuilder, OutputSettings, PageSeparator,
    Settings,
};
pub use error::{OcrError, RequestError};
pub use orchestrator::{OcrOrchestrator, OcrOrchestratorBuilder};
pub use output::{save_result, OcrResult, PageOutcome, SavedArtifacts};
pub use pipeline::invoke::PageOcrInvoker;
pub use pipeline::render::{ArchivingRasterizer, PageImage, PdfiumRasterizer, Rasterizer};
pub use pipeline::vision::{OpenAiVisionClient, VisionClient, VisionRequest, VisionResponse};
pub use progress::{NoopProgressCallback, OcrProgressCallback, ProgressCallback};
