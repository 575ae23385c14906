//! CLI binary for pdf-vision-ocr.
//!
//! A thin shim over the library crate: settings file and flags become an
//! `OcrConfig`, the orchestrator runs, and the result is printed.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_vision_ocr::{
    save_result, ArchivingRasterizer, ImageDetail, ImageFormat, OcrConfig, OcrOrchestrator,
    OcrProgressCallback, OcrResult, PageSeparator, PdfiumRasterizer, ProgressCallback, Settings,
};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished page. Pages finish out
/// of order under concurrency, so elapsed times are tracked per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_document_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER_TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rasterising PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER_TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl OcrProgressCallback for CliProgressCallback {
    fn on_document_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting text from {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_retry(&self, page_num: usize, retry: u32, error: &str) {
        self.bar.println(format!(
            "  {} Page {:>3}  retry {}  {}",
            yellow("↻"),
            page_num,
            retry,
            dim(&truncate(error, 80)),
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, text_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, _total_pages: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

// ── CLI definition ───────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract to stdout
  pdfocr scan.pdf

  # Cheaper model, more parallelism
  pdfocr --model gpt-4o-mini --concurrency 6 scan.pdf

  # Save scan.txt and scan.json under ./output
  pdfocr --save --output-dir ./output scan.pdf

  # Settings file, JSON result on stdout
  pdfocr --config settings.json --json scan.pdf > result.json

PRICING (USD per 1K tokens, input / output):
  gpt-4o-mini   0.00015 / 0.0006
  gpt-4o        0.0025  / 0.01     (default; also used for unknown models)
  gpt-4.1-mini  0.0004  / 0.0016
  gpt-4.1       0.002   / 0.008

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY    API key for the vision endpoint
  PDFOCR_*          Any flag, e.g. PDFOCR_MODEL, PDFOCR_CONCURRENCY
  PDFIUM_LIB_PATH   Path to libpdfium (otherwise ./ then the system library)
  RUST_LOG          Overrides the terminal log filter (the log file keeps
                    logging.level)

EXIT STATUS:
  0  every page was extracted
  1  usage error, missing document, missing API key, or any page failed
"#;

/// Extract text from PDF files with a vision language model.
#[derive(Parser, Debug)]
#[command(
    name = "pdfocr",
    version,
    about = "Extract text from PDF files with a vision language model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file to process.
    input: PathBuf,

    /// JSON settings file (sections: ocr, output, logging). Flags override it.
    #[arg(short = 'c', long = "config", env = "PDFOCR_CONFIG")]
    config: Option<PathBuf>,

    /// API key for the vision endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Chat-completions endpoint URL.
    #[arg(long, env = "PDFOCR_API_URL")]
    api_url: Option<String>,

    /// Vision model ID (e.g. gpt-4o, gpt-4o-mini).
    #[arg(long, env = "PDFOCR_MODEL")]
    model: Option<String>,

    /// Max output tokens per page.
    #[arg(long, env = "PDFOCR_MAX_TOKENS")]
    max_tokens: Option<u32>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PDFOCR_TEMPERATURE")]
    temperature: Option<f32>,

    /// Image detail: low, high or auto.
    #[arg(long, env = "PDFOCR_DETAIL")]
    detail: Option<ImageDetail>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "PDFOCR_TIMEOUT")]
    timeout: Option<u64>,

    /// Retries per page on transient failures.
    #[arg(long, env = "PDFOCR_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Maximum page requests in flight at once.
    #[arg(short = 'j', long, env = "PDFOCR_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "PDFOCR_DPI")]
    dpi: Option<u32>,

    /// Page image encoding sent to the API.
    #[arg(long, env = "PDFOCR_IMAGE_FORMAT", value_enum)]
    image_format: Option<FormatArg>,

    /// Page separator: blank, marker, hr, formfeed, or a custom string.
    #[arg(long, env = "PDFOCR_SEPARATOR")]
    separator: Option<String>,

    /// Text file with a custom system prompt.
    #[arg(long, env = "PDFOCR_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Write <name>.txt and <name>.json to the output directory.
    #[arg(long, env = "PDFOCR_SAVE")]
    save: bool,

    /// Output directory used with --save.
    #[arg(short, long, env = "PDFOCR_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Keep every rendered page image (page_0001.png, …) in this directory.
    #[arg(long, value_name = "DIR", env = "PDFOCR_SAVE_PAGES")]
    save_pages: Option<PathBuf>,

    /// Print the full result as JSON instead of plain text.
    #[arg(long, env = "PDFOCR_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PDFOCR_NO_PROGRESS")]
    no_progress: bool,

    /// Append logs to this file.
    #[arg(long, env = "PDFOCR_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Enable DEBUG-level logs.
    #[arg(short, long, env = "PDFOCR_VERBOSE")]
    verbose: bool,

    /// Suppress everything except errors.
    #[arg(short, long, env = "PDFOCR_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Png,
    Jpeg,
}

impl From<FormatArg> for ImageFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Png => ImageFormat::Png,
            FormatArg::Jpeg => ImageFormat::Jpeg,
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_status(&e));
        }
    };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start runtime: {e}", red("error:"));
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", red("error:"));
            ExitCode::FAILURE
        }
    }
}

/// `--help` and `--version` succeed; every other parse failure is a usage
/// error and exits 1.
fn usage_status(e: &clap::Error) -> u8 {
    if e.use_stderr() {
        1
    } else {
        0
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = match cli.config {
        Some(ref path) => Settings::from_json_file(path)?,
        None => Settings::default(),
    };

    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let dispatch = build_dispatch(&cli, &settings, show_progress)?;

    let config = build_config(&cli, settings.ocr).await?;
    if !config.has_api_key() {
        anyhow::bail!(
            "No API key configured. Pass --api-key, set OPENAI_API_KEY, \
             or fill in ocr.api_key in the settings file."
        );
    }

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn OcrProgressCallback>)
    } else {
        None
    };

    let page_dir = cli
        .save_pages
        .clone()
        .or_else(|| settings.output.save_page_images.clone());
    let rasterizer = page_dir.map(|dir| {
        ArchivingRasterizer::new(Arc::new(PdfiumRasterizer::from_config(&config)), dir)
    });

    let mut builder = OcrOrchestrator::builder(config).dispatch(dispatch);
    if let Some(r) = rasterizer {
        builder = builder.rasterizer(Arc::new(r));
    }
    if let Some(cb) = progress {
        builder = builder.progress(cb);
    }
    let orchestrator = builder.build().context("Invalid configuration")?;

    let result = orchestrator.process(&cli.input).await;

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        println!("{json}");
    } else if !result.text.is_empty() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(result.text.as_bytes())
            .context("Failed to write to stdout")?;
        if !result.text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if cli.save || settings.output.save_results {
        let dir = cli.output_dir.clone().unwrap_or(settings.output.directory);
        let saved = save_result(&result, &dir, &output_stem(&cli.input)).await?;
        if !cli.quiet {
            eprintln!(
                "{} saved {} and {}",
                cyan("→"),
                bold(&saved.text_path.display().to_string()),
                bold(&saved.json_path.display().to_string()),
            );
        }
    }

    if !cli.quiet && !cli.json {
        print_summary(&result);
    } else if let Some(ref err) = result.error {
        eprintln!("{} {err}", red("error:"));
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Filter for the terminal. The progress bar already reports everything a
/// user needs at info level, so only errors reach stderr while it is shown.
fn stderr_directive(cli: &Cli, settings: &Settings, show_progress: bool) -> String {
    if cli.verbose {
        "debug".to_string()
    } else if cli.quiet || show_progress {
        "error".to_string()
    } else {
        settings.logging.level.clone()
    }
}

/// Filter for the log file: the configured level regardless of the bar.
fn file_directive(cli: &Cli, settings: &Settings) -> String {
    if cli.verbose {
        "debug".to_string()
    } else {
        settings.logging.level.clone()
    }
}

/// Build the log subscriber for this run. It is handed to the orchestrator
/// rather than installed globally.
fn build_dispatch(cli: &Cli, settings: &Settings, show_progress: bool) -> Result<Dispatch> {
    let stderr_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(stderr_directive(cli, settings, show_progress)))?;
    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(stderr_filter);

    let log_path = cli.log_file.clone().or_else(|| settings.logging.file.clone());
    let file_layer = match log_path {
        Some(ref path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let file_filter = EnvFilter::try_new(file_directive(cli, settings))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(f))
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry().with(stderr_layer).with(file_layer);
    Ok(Dispatch::new(subscriber))
}

/// Apply flags over the settings-file config.
async fn build_config(cli: &Cli, base: OcrConfig) -> Result<OcrConfig> {
    let mut builder = base.into_builder();

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref url) = cli.api_url {
        builder = builder.api_url(url.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(n) = cli.max_tokens {
        builder = builder.max_tokens(n);
    }
    if let Some(t) = cli.temperature {
        builder = builder.temperature(t);
    }
    if let Some(d) = cli.detail {
        builder = builder.image_detail(d);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(n) = cli.max_retries {
        builder = builder.max_retries(n);
    }
    if let Some(n) = cli.concurrency {
        builder = builder.max_concurrent_pages(n);
    }
    if let Some(dpi) = cli.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(f) = cli.image_format {
        builder = builder.image_format(f.into());
    }
    if let Some(ref s) = cli.separator {
        builder = builder.page_separator(parse_separator(s));
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` into a `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "blank" | "none" => PageSeparator::Blank,
        "marker" => PageSeparator::Marker,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "formfeed" | "ff" => PageSeparator::FormFeed,
        _ => PageSeparator::Custom(s.to_string()),
    }
}

fn output_stem(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "result".to_string())
}

/// Per-page statistics followed by the document totals, on stderr.
fn print_summary(result: &OcrResult) {
    if !result.pages.is_empty() {
        eprintln!(
            "{}",
            dim("  page  status  tries   tokens in/out      cost      time")
        );
        for p in &result.pages {
            let status = if p.success { green("ok    ") } else { red("failed") };
            eprintln!(
                "  {:>4}  {}  {:>5}  {:>7}/{:<7}  ${:<8.5} {:>5}ms",
                p.page_number,
                status,
                p.attempts,
                p.input_tokens,
                p.output_tokens,
                p.cost,
                p.duration_ms,
            );
            if let Some(ref err) = p.error {
                eprintln!("        {}", dim(&truncate(err, 100)));
            }
        }
    }

    let marker = if result.success {
        green("✔")
    } else if result.succeeded_pages() > 0 {
        yellow("⚠")
    } else {
        red("✘")
    };
    eprintln!(
        "{}  {}/{} pages  {}ms  ${:.4}",
        marker,
        result.succeeded_pages(),
        result.page_count,
        result.processing_time_ms,
        result.estimated_cost,
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&result.total_input_tokens().to_string()),
        dim(&result.total_output_tokens().to_string()),
    );
    if let Some(ref err) = result.error {
        eprintln!("   {}", red(err));
    }
}
