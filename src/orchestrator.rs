//! Document-level OCR: rasterise, fan out, collect in order, account.
//!
//! ## Scheduling
//!
//! Every page gets its own future inside one `FuturesUnordered` set. A
//! counting [`Semaphore`] shared with the [`PageOcrInvoker`] bounds the
//! number of requests in flight to `max_concurrent_pages`; a page holds a
//! permit only while its request is outstanding, never while it sleeps
//! before a retry. Outcomes land in a pre-sized slot vector indexed by
//! page number, so completion order never leaks into the result.
//!
//! ## Failure policy
//!
//! Configuration and rasterisation problems end the run before any request
//! is issued and produce a zero-page [`OcrResult`]. Once pages exist, every
//! page runs to a terminal state regardless of its siblings, and the result
//! is successful only if every page is.

use crate::config::{OcrConfig, PageSeparator};
use crate::error::OcrError;
use crate::output::{OcrResult, PageOutcome};
use crate::pipeline::invoke::PageOcrInvoker;
use crate::pipeline::render::{PageImage, PdfiumRasterizer, Rasterizer};
use crate::pipeline::vision::{OpenAiVisionClient, VisionClient};
use crate::pricing;
use crate::progress::ProgressCallback;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, warn, Dispatch, Instrument};

/// Drives a whole document through rasterisation and per-page extraction.
pub struct OcrOrchestrator {
    config: Arc<OcrConfig>,
    rasterizer: Arc<dyn Rasterizer>,
    client: Arc<dyn VisionClient>,
    progress: Option<ProgressCallback>,
    dispatch: Option<Dispatch>,
}

/// Builder for [`OcrOrchestrator`].
pub struct OcrOrchestratorBuilder {
    config: OcrConfig,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    client: Option<Arc<dyn VisionClient>>,
    progress: Option<ProgressCallback>,
    dispatch: Option<Dispatch>,
}

impl OcrOrchestratorBuilder {
    /// Use this rasteriser instead of pdfium.
    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    /// Use this vision client instead of the OpenAI-compatible HTTP client.
    pub fn vision_client(mut self, client: Arc<dyn VisionClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    /// Route this orchestrator's logs to `dispatch`.
    ///
    /// Without one, events go to whatever subscriber is current where
    /// [`OcrOrchestrator::process`] is awaited.
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Validate the configuration and wire up default collaborators.
    ///
    /// # Errors
    /// [`OcrError::InvalidConfig`] for bad settings, and
    /// [`OcrError::MissingApiKey`] when no vision client was injected and the
    /// config carries no usable key.
    pub fn build(self) -> Result<OcrOrchestrator, OcrError> {
        self.config.validate()?;

        let client = match self.client {
            Some(c) => c,
            None => Arc::new(OpenAiVisionClient::new(&self.config)?),
        };
        let rasterizer = self
            .rasterizer
            .unwrap_or_else(|| Arc::new(PdfiumRasterizer::from_config(&self.config)));

        Ok(OcrOrchestrator {
            config: Arc::new(self.config),
            rasterizer,
            client,
            progress: self.progress,
            dispatch: self.dispatch,
        })
    }
}

impl OcrOrchestrator {
    pub fn builder(config: OcrConfig) -> OcrOrchestratorBuilder {
        OcrOrchestratorBuilder {
            config,
            rasterizer: None,
            client: None,
            progress: None,
            dispatch: None,
        }
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Extract the text of every page of `document`.
    ///
    /// Always returns a structured result; check `result.success` and the
    /// per-page outcomes.
    pub async fn process(&self, document: impl AsRef<Path>) -> OcrResult {
        let run = self.process_inner(document.as_ref());
        match &self.dispatch {
            Some(dispatch) => run.with_subscriber(dispatch.clone()).await,
            None => run.await,
        }
    }

    /// Extract the text of a PDF held in memory.
    ///
    /// The bytes are written to a managed temporary file that is removed when
    /// this returns.
    pub async fn process_bytes(&self, bytes: &[u8]) -> OcrResult {
        let start = Instant::now();
        let tmp = match write_temp_pdf(bytes) {
            Ok(tmp) => tmp,
            Err(e) => {
                error!("{}", e);
                return OcrResult::fatal(&e, start.elapsed());
            }
        };
        self.process(tmp.path()).await
    }

    /// Blocking wrapper around [`OcrOrchestrator::process`].
    ///
    /// Creates a temporary tokio runtime internally; do not call from async code.
    pub fn process_sync(&self, document: impl AsRef<Path>) -> Result<OcrResult, OcrError> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| OcrError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
        Ok(runtime.block_on(self.process(document)))
    }

    async fn process_inner(&self, document: &Path) -> OcrResult {
        let span = info_span!("ocr", document = %document.display());
        async {
            let start = Instant::now();
            info!("Starting OCR: {}", document.display());

            // ── Step 1: Validate ─────────────────────────────────────────
            if let Err(e) = self.config.validate() {
                error!("{}", e);
                return OcrResult::fatal(&e, start.elapsed());
            }
            if let Err(e) = check_document(document).await {
                error!("{}", e);
                return OcrResult::fatal(&e, start.elapsed());
            }
            if !pricing::is_known_model(&self.config.model) {
                warn!(
                    "No pricing entry for model '{}'; estimating with the default rate",
                    self.config.model
                );
            }

            // ── Step 2: Rasterise ────────────────────────────────────────
            let render_start = Instant::now();
            let pages = match self.rasterizer.rasterize(document).await {
                Ok(pages) if pages.is_empty() => {
                    let e = OcrError::NoPages {
                        path: document.to_path_buf(),
                    };
                    error!("{}", e);
                    return OcrResult::fatal(&e, start.elapsed());
                }
                Ok(pages) => pages,
                Err(e) => {
                    error!("{}", e);
                    return OcrResult::fatal(&e, start.elapsed());
                }
            };
            if let Err(e) = check_sequence(&pages) {
                error!("{}", e);
                return OcrResult::fatal(&e, start.elapsed());
            }
            let total_pages = pages.len();
            info!(
                "Rasterised {} pages in {}ms",
                total_pages,
                render_start.elapsed().as_millis()
            );

            if let Some(ref cb) = self.progress {
                cb.on_document_start(total_pages);
            }

            // ── Step 3–4: Fan out, collect by slot ───────────────────────
            let outcomes = self.run_pages(pages).await;

            // ── Step 5: Assemble ─────────────────────────────────────────
            let result = assemble(outcomes, &self.config.page_separator, start.elapsed());

            if let Some(ref cb) = self.progress {
                cb.on_document_complete(result.page_count, result.succeeded_pages());
            }
            match &result.error {
                None => info!(
                    "OCR complete: {} pages, ${:.4}, {}ms",
                    result.page_count, result.estimated_cost, result.processing_time_ms
                ),
                Some(summary) => warn!("OCR finished with failures: {}", summary),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Run every page to a terminal state under the concurrency limit.
    async fn run_pages(&self, pages: Vec<PageImage>) -> Vec<PageOutcome> {
        let total_pages = pages.len();
        let limiter = Arc::new(Semaphore::new(self.config.max_concurrent_pages));
        let mut invoker = PageOcrInvoker::new(Arc::clone(&self.client), Arc::clone(&self.config))
            .with_limiter(limiter);
        if let Some(ref cb) = self.progress {
            invoker = invoker.with_progress(Arc::clone(cb));
        }
        let invoker = &invoker;
        let progress = self.progress.as_ref();

        let mut slots: Vec<Option<PageOutcome>> = (0..total_pages).map(|_| None).collect();

        let mut in_flight: FuturesUnordered<_> = pages
            .into_iter()
            .enumerate()
            .map(|(slot, page)| async move {
                let outcome = invoker.invoke(page).await;
                if let Some(cb) = progress {
                    match &outcome.error {
                        None => cb.on_page_complete(outcome.page_number, total_pages, outcome.text.len()),
                        Some(e) => cb.on_page_error(outcome.page_number, total_pages, e),
                    }
                }
                (slot, outcome)
            })
            .collect();

        while let Some((slot, outcome)) = in_flight.next().await {
            debug!(
                page = outcome.page_number,
                success = outcome.success,
                "Page reached a terminal state"
            );
            slots[slot] = Some(outcome);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(idx, outcome)| {
                outcome.unwrap_or_else(|| PageOutcome::failed(idx + 1, "page was never processed", 0, 0))
            })
            .collect()
    }
}

fn write_temp_pdf(bytes: &[u8]) -> Result<tempfile::NamedTempFile, OcrError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("pdfocr-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| OcrError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| OcrError::Internal(format!("tempfile write: {e}")))?;
    Ok(tmp)
}

/// The document must exist and be a regular file.
async fn check_document(path: &Path) -> Result<(), OcrError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(OcrError::NotAFile {
            path: path.to_path_buf(),
        }),
        Err(_) => Err(OcrError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// Page numbers must be exactly `1..=N` in order.
fn check_sequence(pages: &[PageImage]) -> Result<(), OcrError> {
    for (idx, page) in pages.iter().enumerate() {
        if page.page_number != idx + 1 {
            return Err(OcrError::PageSequence {
                expected: idx + 1,
                found: page.page_number,
            });
        }
    }
    Ok(())
}

/// Build the aggregate result from page outcomes already in page order.
pub fn assemble(pages: Vec<PageOutcome>, separator: &PageSeparator, elapsed: Duration) -> OcrResult {
    let mut text = String::new();
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            text.push_str(&separator.render(page.page_number));
        }
        text.push_str(&page.text);
    }

    let estimated_cost: f64 = pages.iter().map(|p| p.cost).sum();
    let failed: Vec<&PageOutcome> = pages.iter().filter(|p| !p.success).collect();
    let success = !pages.is_empty() && failed.is_empty();
    let error = if failed.is_empty() {
        None
    } else {
        Some(summarize_failures(&failed, pages.len()))
    };

    OcrResult {
        success,
        text,
        page_count: pages.len(),
        estimated_cost,
        error,
        pages,
        processed_at: Utc::now(),
        processing_time_ms: elapsed.as_millis() as u64,
    }
}

/// `"2 of 5 pages failed: page 2 (…); page 4 (…)"`
fn summarize_failures(failed: &[&PageOutcome], total: usize) -> String {
    let details = failed
        .iter()
        .map(|p| {
            format!(
                "page {} ({})",
                p.page_number,
                p.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} of {} pages failed: {}", failed.len(), total, details)
}
