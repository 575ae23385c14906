//! Per-page extraction: build the request, call the model, retry, account.
//!
//! ## Retry Strategy
//!
//! Timeouts, 429s, 5xx and connection failures are transient under
//! concurrent load. Each one is retried after `retry_backoff_ms * 2^(n-1)`
//! milliseconds, capped at `max_backoff_ms`; a 429 carrying `Retry-After`
//! waits at least that long (still capped). Authentication failures and
//! other 4xx rejections fail the page immediately.
//!
//! The invoker never returns an error: every path ends in a [`PageOutcome`].

use crate::config::OcrConfig;
use crate::error::RequestError;
use crate::output::PageOutcome;
use crate::pipeline::encode::data_url;
use crate::pipeline::postprocess::clean_text;
use crate::pipeline::render::PageImage;
use crate::pipeline::vision::{VisionClient, VisionRequest, VisionResponse};
use crate::pricing;
use crate::progress::ProgressCallback;
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, PAGE_INSTRUCTION};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Lifecycle of one page inside the invoker.
///
/// `Retrying` loops back to `InFlight`; `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Pending,
    InFlight,
    Retrying,
    Succeeded,
    Failed,
}

/// Issues extraction requests for single pages.
#[derive(Clone)]
pub struct PageOcrInvoker {
    client: Arc<dyn VisionClient>,
    config: Arc<OcrConfig>,
    limiter: Option<Arc<Semaphore>>,
    progress: Option<ProgressCallback>,
}

impl PageOcrInvoker {
    pub fn new(client: Arc<dyn VisionClient>, config: Arc<OcrConfig>) -> Self {
        Self {
            client,
            config,
            limiter: None,
            progress: None,
        }
    }

    /// Hold a permit from `limiter` for the duration of every request.
    ///
    /// The permit is released before any backoff sleep.
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Report retries to `cb`.
    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    /// Build the request for one page.
    pub fn build_request(&self, page: &PageImage) -> VisionRequest {
        let c = &self.config;
        VisionRequest {
            model: c.model.clone(),
            system_prompt: c
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            instruction: PAGE_INSTRUCTION.to_string(),
            image_url: data_url(&page.mime_type, &page.bytes),
            detail: c.image_detail,
            max_tokens: c.max_tokens,
            temperature: c.temperature,
        }
    }

    /// Extract the text of `page`. Consumes the image.
    pub async fn invoke(&self, page: PageImage) -> PageOutcome {
        let start = Instant::now();
        let page_num = page.page_number;
        let mut state = PageState::Pending;
        debug!(page = page_num, ?state, bytes = page.bytes.len(), "Page queued");

        let request = self.build_request(&page);
        drop(page);

        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        let last_err = loop {
            attempt += 1;
            let permit = match self.limiter {
                Some(ref limiter) => match Arc::clone(limiter).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => break RequestError::Network("concurrency limiter closed".into()),
                },
                None => None,
            };
            if attempt == 1 {
                if let Some(ref cb) = self.progress {
                    cb.on_page_start(page_num);
                }
            }
            state = PageState::InFlight;
            debug!(page = page_num, ?state, attempt, "Sending request");

            let result = self.attempt(&request).await;
            drop(permit);

            let err = match result {
                Ok(response) => {
                    state = PageState::Succeeded;
                    let cost = pricing::cost(
                        &self.config.model,
                        response.input_tokens,
                        response.output_tokens,
                    );
                    debug!(
                        page = page_num,
                        ?state,
                        input_tokens = response.input_tokens,
                        output_tokens = response.output_tokens,
                        cost,
                        "Page extracted in {:?}",
                        start.elapsed()
                    );
                    return PageOutcome::succeeded(
                        page_num,
                        clean_text(&response.text),
                        response.input_tokens,
                        response.output_tokens,
                        cost,
                        attempt,
                        start.elapsed().as_millis() as u64,
                    );
                }
                Err(e) => e,
            };

            if !err.is_transient() {
                warn!(page = page_num, attempt, "Non-retryable error: {}", err);
                break err;
            }
            if attempt >= max_attempts {
                warn!(page = page_num, attempt, "Retry budget exhausted: {}", err);
                break err;
            }

            state = PageState::Retrying;
            let delay = backoff_delay(
                self.config.retry_backoff_ms,
                self.config.max_backoff_ms,
                attempt,
                err.retry_after_secs(),
            );
            warn!(
                page = page_num,
                ?state,
                "Retry {}/{} after {}ms: {}",
                attempt,
                self.config.max_retries,
                delay.as_millis(),
                err
            );
            if let Some(ref cb) = self.progress {
                cb.on_page_retry(page_num, attempt, &err.to_string());
            }
            sleep(delay).await;
        };

        state = PageState::Failed;
        debug!(page = page_num, ?state, attempts = attempt, "Page failed");
        PageOutcome::failed(
            page_num,
            last_err.to_string(),
            attempt,
            start.elapsed().as_millis() as u64,
        )
    }

    /// One request, bounded by the configured timeout.
    async fn attempt(&self, request: &VisionRequest) -> Result<VisionResponse, RequestError> {
        match timeout(self.config.request_timeout(), self.client.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(RequestError::Timeout {
                secs: self.config.request_timeout_secs,
            }),
        }
    }
}

/// Delay before retry number `retry` (1-based).
///
/// `base * 2^(retry-1)`, raised to `retry_after_secs` when the server asked
/// for longer, and never above `cap_ms`.
pub fn backoff_delay(base_ms: u64, cap_ms: u64, retry: u32, retry_after_secs: Option<u64>) -> Duration {
    let exp = retry.saturating_sub(1).min(32);
    let mut ms = base_ms.saturating_mul(1u64 << exp);
    if let Some(secs) = retry_after_secs {
        ms = ms.max(secs.saturating_mul(1000));
    }
    Duration::from_millis(ms.min(cap_ms))
}
