//! Result types returned to callers, plus optional artifact persistence.
//!
//! [`PageOutcome`] values are created once by the invoker; the library never
//! mutates them afterwards.
//! [`OcrResult`] is assembled once by the orchestrator after every page has
//! reached a terminal state.

use crate::error::OcrError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Terminal outcome of one page.
///
/// Fields are public for reading and serialisation. The invariants
/// (`success` iff `error` is `None`; zero tokens and cost on failure; cost
/// never negative) hold only for values built through
/// [`PageOutcome::succeeded`] or [`PageOutcome::failed`] and left unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 1-indexed page number.
    pub page_number: usize,
    pub success: bool,
    /// Extracted text; empty when the page failed.
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Estimated USD cost of the successful request.
    pub cost: f64,
    /// Human-readable failure reason; set iff `success` is false.
    pub error: Option<String>,
    /// Requests issued for this page, including the successful one.
    pub attempts: u32,
    pub duration_ms: u64,
}

impl PageOutcome {
    pub fn succeeded(
        page_number: usize,
        text: String,
        input_tokens: u32,
        output_tokens: u32,
        cost: f64,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            page_number,
            success: true,
            text,
            input_tokens,
            output_tokens,
            cost: cost.max(0.0),
            error: None,
            attempts,
            duration_ms,
        }
    }

    pub fn failed(
        page_number: usize,
        error: impl Into<String>,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            page_number,
            success: false,
            text: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            error: Some(error),
            attempts,
            duration_ms,
        }
    }

    /// Retries spent on this page (attempts after the first).
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Aggregate result of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    /// True iff there was at least one page and every page succeeded.
    pub success: bool,
    /// Page texts joined in page order with the configured separator.
    pub text: String,
    pub page_count: usize,
    /// Sum of every page's `cost`.
    pub estimated_cost: f64,
    pub error: Option<String>,
    /// One entry per page, ascending page number.
    pub pages: Vec<PageOutcome>,
    pub processed_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl OcrResult {
    /// A result for a run that failed before any page was processed.
    pub fn fatal(error: &OcrError, processing_time: Duration) -> Self {
        Self {
            success: false,
            text: String::new(),
            page_count: 0,
            estimated_cost: 0.0,
            error: Some(error.to_string()),
            pages: Vec::new(),
            processed_at: Utc::now(),
            processing_time_ms: processing_time.as_millis() as u64,
        }
    }

    pub fn processing_time(&self) -> Duration {
        Duration::from_millis(self.processing_time_ms)
    }

    pub fn succeeded_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.success).count()
    }

    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|p| !p.success).count()
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.pages.iter().map(|p| p.input_tokens as u64).sum()
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.pages.iter().map(|p| p.output_tokens as u64).sum()
    }
}

/// Paths written by [`save_result`].
#[derive(Debug, Clone)]
pub struct SavedArtifacts {
    pub text_path: PathBuf,
    pub json_path: PathBuf,
}

/// Write `<stem>.txt` and `<stem>.json` into `dir`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn save_result(
    result: &OcrResult,
    dir: impl AsRef<Path>,
    stem: &str,
) -> Result<SavedArtifacts, OcrError> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| OcrError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let text_path = dir.join(format!("{stem}.txt"));
    write_atomic(&text_path, result.text.as_bytes()).await?;

    let json = serde_json::to_vec_pretty(result)
        .map_err(|e| OcrError::Internal(format!("Failed to serialise result: {e}")))?;
    let json_path = dir.join(format!("{stem}.json"));
    write_atomic(&json_path, &json).await?;

    Ok(SavedArtifacts {
        text_path,
        json_path,
    })
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), OcrError> {
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| OcrError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| OcrError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}
