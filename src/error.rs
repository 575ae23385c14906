//! Error types for the pdf-vision-ocr library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`]: **Fatal**: the document cannot be processed at all
//!   (bad input file, missing API key, rasterisation failed). The
//!   orchestrator folds these into a failed [`crate::output::OcrResult`]
//!   with zero pages, so callers see one structured result either way.
//!
//! * [`RequestError`]: **Per attempt**: a single vision API call failed.
//!   [`RequestError::is_transient`] decides whether the invoker retries.
//!   Once a page is given up on, the last error is rendered into its
//!   [`crate::output::PageOutcome`] and never propagates further.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors of the pdf-vision-ocr library.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The path exists but is a directory or other non-file entry.
    #[error("Not a regular file: '{path}'")]
    NotAFile { path: PathBuf },

    // ── Rasterisation errors ──────────────────────────────────────────────
    /// The document could not be opened or a page could not be rendered.
    #[error("Rasterisation failed for '{path}': {detail}")]
    Rasterization { path: PathBuf, detail: String },

    /// The document opened fine but produced no pages.
    #[error("Document '{path}' contains no pages")]
    NoPages { path: PathBuf },

    /// The rasteriser returned pages that are not a contiguous `1..N` run.
    #[error("Rasteriser returned an invalid page sequence: expected page {expected}, got {found}")]
    PageSequence { expected: usize, found: usize },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium on the library search path."
    )]
    PdfiumBindingFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No usable API key was configured.
    #[error("API key is not configured.\n{hint}")]
    MissingApiKey { hint: String },

    /// A settings file could not be read or parsed.
    #[error("Failed to load settings from '{path}': {detail}")]
    SettingsLoad { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrError {
    /// True for errors caused by configuration rather than the document.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            OcrError::InvalidConfig(_)
                | OcrError::MissingApiKey { .. }
                | OcrError::SettingsLoad { .. }
        )
    }
}

/// A failed vision API attempt.
///
/// Transient variants are retried with backoff; the rest fail the page on
/// the spot.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// HTTP 429.
    #[error("rate limited (HTTP 429){}", retry_after_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 5xx.
    #[error("server error (HTTP {status}): {detail}")]
    Server { status: u16, detail: String },

    /// Connection reset, DNS failure and similar transport problems.
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 401/403.
    #[error("authentication failed (HTTP {status}): {detail}")]
    Auth { status: u16, detail: String },

    /// Any other 4xx: the request itself is wrong and will not improve on retry.
    #[error("request rejected (HTTP {status}): {detail}")]
    BadRequest { status: u16, detail: String },

    /// 2xx response whose body is not a usable completion.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl RequestError {
    /// Should the invoker try this request again?
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RequestError::Timeout { .. }
                | RequestError::RateLimited { .. }
                | RequestError::Server { .. }
                | RequestError::Network(_)
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RequestError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

fn retry_after_hint(secs: &Option<u64>) -> String {
    match secs {
        Some(s) => format!(", retry after {s}s"),
        None => String::new(),
    }
}
