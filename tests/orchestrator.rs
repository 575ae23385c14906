//! Integration tests for the document orchestrator.
//!
//! Rasterisation and the vision API are replaced by in-memory fakes, so these
//! run without pdfium or network access. Timing-sensitive tests use tokio's
//! paused clock.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pdf_vision_ocr::{
    save_result, ArchivingRasterizer, OcrConfig, OcrError, OcrOrchestrator, OcrProgressCallback, OcrResult, PageImage,
    PageSeparator, Rasterizer, RequestError, VisionClient, VisionRequest, VisionResponse,
};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Produces `pages` tiny images whose bytes spell out the page number.
struct FakeRasterizer {
    pages: usize,
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(&self, _document: &Path) -> Result<Vec<PageImage>, OcrError> {
        Ok((1..=self.pages)
            .map(|n| PageImage::new(n, format!("page-{n}").into_bytes(), "image/png"))
            .collect())
    }
}

struct BrokenRasterizer;

#[async_trait]
impl Rasterizer for BrokenRasterizer {
    async fn rasterize(&self, document: &Path) -> Result<Vec<PageImage>, OcrError> {
        Err(OcrError::Rasterization {
            path: document.to_path_buf(),
            detail: "file is not a PDF".into(),
        })
    }
}

/// How the fake model answers a given page.
#[derive(Clone)]
enum Behavior {
    /// Answer after `delay`.
    Ok { delay: Duration },
    /// Fail with `error` the first `times` attempts, then answer.
    FailThenOk { times: u32, error: RequestError },
    /// Fail with `error` on every attempt.
    Fail(RequestError),
    /// Never answer.
    Hang,
}

struct FakeVision {
    behaviors: HashMap<usize, Behavior>,
    calls: Mutex<HashMap<usize, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeVision {
    fn new(behaviors: impl IntoIterator<Item = (usize, Behavior)>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors.into_iter().collect(),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn all_ok() -> Arc<Self> {
        Self::new(std::iter::empty())
    }

    fn calls_for(&self, page: usize) -> u32 {
        self.calls.lock().unwrap().get(&page).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

fn page_of(request: &VisionRequest) -> usize {
    let b64 = request
        .image_url
        .strip_prefix("data:image/png;base64,")
        .expect("png data url");
    let raw = String::from_utf8(STANDARD.decode(b64).unwrap()).unwrap();
    raw.trim_start_matches("page-").parse().unwrap()
}

fn answer(page: usize) -> VisionResponse {
    VisionResponse {
        text: format!("Text of page {page}"),
        input_tokens: 1000,
        output_tokens: 500,
    }
}

#[async_trait]
impl VisionClient for FakeVision {
    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, RequestError> {
        let page = page_of(request);
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(page).or_insert(0);
            *n += 1;
            *n
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .get(&page)
            .cloned()
            .unwrap_or(Behavior::Ok {
                delay: Duration::from_millis(50),
            });
        let result = match behavior {
            Behavior::Ok { delay } => {
                tokio::time::sleep(delay).await;
                Ok(answer(page))
            }
            Behavior::FailThenOk { times, error } if call <= times => Err(error),
            Behavior::FailThenOk { .. } => Ok(answer(page)),
            Behavior::Fail(error) => Err(error),
            Behavior::Hang => std::future::pending().await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Records the order in which pages finish.
#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    retries: Mutex<Vec<(usize, u32)>>,
    finished: Mutex<Vec<usize>>,
    document: Mutex<Option<(usize, usize)>>,
}

impl OcrProgressCallback for Recorder {
    fn on_page_start(&self, _page_num: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_retry(&self, page_num: usize, retry: u32, _error: &str) {
        self.retries.lock().unwrap().push((page_num, retry));
    }

    fn on_page_complete(&self, page_num: usize, _total_pages: usize, _text_len: usize) {
        self.finished.lock().unwrap().push(page_num);
    }

    fn on_page_error(&self, page_num: usize, _total_pages: usize, _error: &str) {
        self.finished.lock().unwrap().push(page_num);
    }

    fn on_document_complete(&self, total_pages: usize, success_count: usize) {
        *self.document.lock().unwrap() = Some((total_pages, success_count));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn test_config() -> OcrConfig {
    OcrConfig::builder()
        .api_key("sk-test")
        .model("gpt-4o")
        .max_concurrent_pages(3)
        .max_retries(3)
        .request_timeout_secs(10)
        .retry_backoff_ms(100)
        .max_backoff_ms(1_000)
        .page_separator(PageSeparator::Blank)
        .build()
        .unwrap()
}

fn document() -> NamedTempFile {
    tempfile::Builder::new().suffix(".pdf").tempfile().unwrap()
}

async fn run(config: OcrConfig, pages: usize, client: Arc<FakeVision>) -> OcrResult {
    let doc = document();
    OcrOrchestrator::builder(config)
        .rasterizer(Arc::new(FakeRasterizer { pages }))
        .vision_client(client)
        .build()
        .unwrap()
        .process(doc.path())
        .await
}

fn assert_page_order(result: &OcrResult) {
    let numbers: Vec<usize> = result.pages.iter().map(|p| p.page_number).collect();
    let expected: Vec<usize> = (1..=result.page_count).collect();
    assert_eq!(numbers, expected);
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn all_pages_succeed_in_order() {
    let client = FakeVision::all_ok();
    let result = run(test_config(), 3, Arc::clone(&client)).await;

    assert!(result.success, "error: {:?}", result.error);
    assert!(result.error.is_none());
    assert_eq!(result.page_count, 3);
    assert_page_order(&result);
    assert_eq!(
        result.text,
        "Text of page 1\n\nText of page 2\n\nText of page 3"
    );
    assert_eq!(client.total_calls(), 3);
    assert!(result.pages.iter().all(|p| p.attempts == 1));
}

#[tokio::test(start_paused = true)]
async fn cost_is_exact_sum_of_page_costs() {
    let result = run(test_config(), 3, FakeVision::all_ok()).await;

    // gpt-4o: 1000 in × 0.0025/1K + 500 out × 0.01/1K = 0.0075 per page
    for p in &result.pages {
        assert!((p.cost - 0.0075).abs() < 1e-12, "page {} cost {}", p.page_number, p.cost);
    }
    let sum: f64 = result.pages.iter().map(|p| p.cost).sum();
    assert_eq!(result.estimated_cost, sum);
    assert!((result.estimated_cost - 0.0225).abs() < 1e-12);
    assert_eq!(result.total_input_tokens(), 3000);
    assert_eq!(result.total_output_tokens(), 1500);
}

#[tokio::test(start_paused = true)]
async fn out_of_order_completion_still_assembles_in_page_order() {
    // Page 1 is slowest, page 4 fastest.
    let client = FakeVision::new((1..=4).map(|n| {
        (
            n,
            Behavior::Ok {
                delay: Duration::from_millis(500 - 100 * n as u64),
            },
        )
    }));
    let recorder = Arc::new(Recorder::default());
    let doc = document();
    let result = OcrOrchestrator::builder(test_config().into_builder().max_concurrent_pages(4).build().unwrap())
        .rasterizer(Arc::new(FakeRasterizer { pages: 4 }))
        .vision_client(client)
        .progress(recorder.clone())
        .build()
        .unwrap()
        .process(doc.path())
        .await;

    assert_eq!(*recorder.finished.lock().unwrap(), vec![4, 3, 2, 1]);
    assert_page_order(&result);
    assert!(result.text.starts_with("Text of page 1"));
    assert!(result.text.ends_with("Text of page 4"));
    assert_eq!(*recorder.document.lock().unwrap(), Some((4, 4)));
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn in_flight_requests_never_exceed_limit() {
    let client = FakeVision::all_ok();
    let result = run(test_config(), 10, Arc::clone(&client)).await;

    assert!(result.success);
    assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 3);
    assert_eq!(client.total_calls(), 10);
}

#[tokio::test(start_paused = true)]
async fn limit_of_one_is_sequential() {
    let client = FakeVision::all_ok();
    let config = test_config().into_builder().max_concurrent_pages(1).build().unwrap();
    let result = run(config, 4, Arc::clone(&client)).await;

    assert!(result.success);
    assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 1);
}

// ── Retries and failures ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn page_that_times_out_fails_alone() {
    let client = FakeVision::new([(2, Behavior::Hang)]);
    let result = run(test_config(), 3, Arc::clone(&client)).await;

    assert!(!result.success);
    assert_eq!(result.page_count, 3);
    assert_page_order(&result);

    let page2 = &result.pages[1];
    assert!(!page2.success);
    assert!(page2.text.is_empty());
    assert_eq!(page2.attempts, 4);
    assert_eq!(client.calls_for(2), 4);
    assert!(page2.error.as_deref().unwrap().contains("timed out"));

    assert!(result.pages[0].success);
    assert!(result.pages[2].success);
    assert!((result.estimated_cost - 0.015).abs() < 1e-12);

    let summary = result.error.unwrap();
    assert!(summary.contains("1 of 3 pages failed"), "got: {summary}");
    assert!(summary.contains("page 2"));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_success() {
    let client = FakeVision::new([(
        1,
        Behavior::FailThenOk {
            times: 3,
            error: RequestError::Server {
                status: 503,
                detail: "overloaded".into(),
            },
        },
    )]);
    let recorder = Arc::new(Recorder::default());
    let doc = document();
    let result = OcrOrchestrator::builder(test_config())
        .rasterizer(Arc::new(FakeRasterizer { pages: 2 }))
        .vision_client(client.clone())
        .progress(recorder.clone())
        .build()
        .unwrap()
        .process(doc.path())
        .await;

    assert!(result.success);
    assert_eq!(result.pages[0].attempts, 4);
    assert_eq!(result.pages[0].retries(), 3);
    assert_eq!(client.calls_for(1), 4);
    assert_eq!(*recorder.retries.lock().unwrap(), vec![(1, 1), (1, 2), (1, 3)]);
    assert_eq!(recorder.started.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn page_waiting_to_retry_frees_its_slot() {
    // One slot. Page 1 fails at once and backs off for 5s; page 2 must run
    // during that sleep rather than after page 1's retry.
    let client = FakeVision::new([
        (
            1,
            Behavior::FailThenOk {
                times: 1,
                error: RequestError::Server {
                    status: 503,
                    detail: "overloaded".into(),
                },
            },
        ),
        (
            2,
            Behavior::Ok {
                delay: Duration::from_millis(50),
            },
        ),
    ]);
    let config = test_config()
        .into_builder()
        .max_concurrent_pages(1)
        .retry_backoff_ms(5_000)
        .max_backoff_ms(10_000)
        .build()
        .unwrap();
    let recorder = Arc::new(Recorder::default());
    let doc = document();
    let started = tokio::time::Instant::now();
    let result = OcrOrchestrator::builder(config)
        .rasterizer(Arc::new(FakeRasterizer { pages: 2 }))
        .vision_client(client.clone())
        .progress(recorder.clone())
        .build()
        .unwrap()
        .process(doc.path())
        .await;

    assert!(result.success);
    assert_eq!(*recorder.finished.lock().unwrap(), vec![2, 1]);
    assert_eq!(*recorder.retries.lock().unwrap(), vec![(1, 1)]);
    assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() <= Duration::from_millis(5_050));
}

#[tokio::test(start_paused = true)]
async fn saved_page_images_accompany_the_run() {
    let pages_dir = tempfile::tempdir().unwrap();
    let doc = document();
    let result = OcrOrchestrator::builder(test_config())
        .rasterizer(Arc::new(ArchivingRasterizer::new(
            Arc::new(FakeRasterizer { pages: 3 }),
            pages_dir.path(),
        )))
        .vision_client(FakeVision::all_ok())
        .build()
        .unwrap()
        .process(doc.path())
        .await;

    assert!(result.success);
    for n in 1..=3 {
        let saved = std::fs::read(pages_dir.path().join(format!("page_{n:04}.png"))).unwrap();
        assert_eq!(saved, format!("page-{n}").into_bytes());
    }
}

#[tokio::test(start_paused = true)]
async fn rate_limit_is_retried() {
    let client = FakeVision::new([(
        1,
        Behavior::FailThenOk {
            times: 1,
            error: RequestError::RateLimited {
                retry_after_secs: Some(1),
            },
        },
    )]);
    let result = run(test_config(), 1, Arc::clone(&client)).await;

    assert!(result.success);
    assert_eq!(client.calls_for(1), 2);
}

#[tokio::test(start_paused = true)]
async fn auth_error_is_not_retried_and_siblings_continue() {
    let client = FakeVision::new([(
        1,
        Behavior::Fail(RequestError::Auth {
            status: 401,
            detail: "invalid api key".into(),
        }),
    )]);
    let result = run(test_config(), 3, Arc::clone(&client)).await;

    assert!(!result.success);
    assert_eq!(client.calls_for(1), 1);
    assert_eq!(result.pages[0].attempts, 1);
    assert!(result.pages[0].error.as_deref().unwrap().contains("401"));
    assert!(result.pages[1].success);
    assert!(result.pages[2].success);
    assert_eq!(result.text, "\n\nText of page 2\n\nText of page 3");
}

#[tokio::test(start_paused = true)]
async fn every_page_failing_reports_all_of_them() {
    let error = Behavior::Fail(RequestError::BadRequest {
        status: 400,
        detail: "image too large".into(),
    });
    let client = FakeVision::new((1..=3).map(|n| (n, error.clone())));
    let result = run(test_config(), 3, client).await;

    assert!(!result.success);
    assert_eq!(result.failed_pages(), 3);
    assert_eq!(result.estimated_cost, 0.0);
    let summary = result.error.unwrap();
    assert!(summary.starts_with("3 of 3 pages failed"));
}

// ── Fatal paths ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn zero_pages_sends_no_requests() {
    let client = FakeVision::all_ok();
    let result = run(test_config(), 0, Arc::clone(&client)).await;

    assert!(!result.success);
    assert_eq!(result.page_count, 0);
    assert!(result.pages.is_empty());
    assert!(result.text.is_empty());
    assert!(result.error.unwrap().contains("no pages"));
    assert_eq!(client.total_calls(), 0);
}

#[tokio::test]
async fn rasterisation_failure_is_fatal() {
    let client = FakeVision::all_ok();
    let doc = document();
    let result = OcrOrchestrator::builder(test_config())
        .rasterizer(Arc::new(BrokenRasterizer))
        .vision_client(client.clone())
        .build()
        .unwrap()
        .process(doc.path())
        .await;

    assert!(!result.success);
    assert_eq!(result.page_count, 0);
    assert!(result.error.unwrap().contains("not a PDF"));
    assert_eq!(client.total_calls(), 0);
}

#[test]
fn missing_document_fails_without_requests() {
    let client = FakeVision::all_ok();
    let orchestrator = OcrOrchestrator::builder(test_config())
        .rasterizer(Arc::new(FakeRasterizer { pages: 2 }))
        .vision_client(client.clone())
        .build()
        .unwrap();

    let result = tokio_test::block_on(orchestrator.process("/definitely/not/here.pdf"));

    assert!(!result.success);
    assert_eq!(result.page_count, 0);
    assert!(result.error.unwrap().contains("not found"));
    assert_eq!(client.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn in_memory_document_is_processed() {
    let client = FakeVision::all_ok();
    let result = OcrOrchestrator::builder(test_config())
        .rasterizer(Arc::new(FakeRasterizer { pages: 2 }))
        .vision_client(client.clone())
        .build()
        .unwrap()
        .process_bytes(b"%PDF-1.7 fake")
        .await;

    assert!(result.success);
    assert_eq!(result.page_count, 2);
    assert_eq!(client.total_calls(), 2);
}

#[test]
fn process_sync_runs_outside_a_runtime() {
    let doc = document();
    let orchestrator = OcrOrchestrator::builder(test_config().into_builder().retry_backoff_ms(1).build().unwrap())
        .rasterizer(Arc::new(FakeRasterizer { pages: 2 }))
        .vision_client(FakeVision::all_ok())
        .build()
        .unwrap();

    let result = orchestrator.process_sync(doc.path()).unwrap();
    assert!(result.success);
    assert_eq!(result.page_count, 2);
}

#[test]
fn missing_api_key_rejected_when_no_client_injected() {
    let err = OcrOrchestrator::builder(OcrConfig::default())
        .rasterizer(Arc::new(FakeRasterizer { pages: 1 }))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, OcrError::MissingApiKey { .. }));

    let placeholder = OcrConfig::builder().api_key("METTEZ_VOTRE_CLE_ICI").build().unwrap();
    let err = OcrOrchestrator::builder(placeholder).build().err().unwrap();
    assert!(matches!(err, OcrError::MissingApiKey { .. }));
}

// ── Logging and artifacts ────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn injected_dispatch_receives_run_logs() {
    let buf = SharedBuf::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();

    let doc = document();
    let result = OcrOrchestrator::builder(test_config())
        .rasterizer(Arc::new(FakeRasterizer { pages: 2 }))
        .vision_client(FakeVision::all_ok())
        .dispatch(tracing::Dispatch::new(subscriber))
        .build()
        .unwrap()
        .process(doc.path())
        .await;
    assert!(result.success);

    let logs = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("Starting OCR"), "logs: {logs}");
    assert!(logs.contains("OCR complete: 2 pages"), "logs: {logs}");
}

#[tokio::test(start_paused = true)]
async fn saved_artifacts_match_result() {
    let result = run(test_config(), 2, FakeVision::all_ok()).await;
    let dir = tempfile::tempdir().unwrap();

    let saved = save_result(&result, dir.path(), "scan").await.unwrap();

    let text = std::fs::read_to_string(&saved.text_path).unwrap();
    assert_eq!(text, result.text);
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&saved.json_path).unwrap()).unwrap();
    assert_eq!(json["page_count"], 2);
    assert_eq!(json["pages"][1]["page_number"], 2);
    assert_eq!(json["success"], true);
}
