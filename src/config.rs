//! Configuration types for document OCR.
//!
//! All orchestration behaviour is controlled through [`OcrConfig`], built via
//! [`OcrConfigBuilder`] or deserialised from a JSON settings file through
//! [`Settings`]. The struct is validated once, before any page is touched,
//! and is read-only for the rest of the run.

use crate::error::OcrError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Placeholder values shipped in sample settings files. Treated as "no key".
pub const API_KEY_PLACEHOLDERS: &[&str] = &["METTEZ_VOTRE_CLE_ICI", "YOUR_API_KEY_HERE", "sk-..."];

/// Default chat-completions endpoint.
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Configuration for a document OCR run.
///
/// # Example
/// ```rust
/// use pdf_vision_ocr::{ImageDetail, OcrConfig};
///
/// let config = OcrConfig::builder()
///     .model("gpt-4o-mini")
///     .image_detail(ImageDetail::Low)
///     .max_concurrent_pages(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrent_pages, 5);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Vision model identifier. Default: `gpt-4o`.
    pub model: String,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: u32,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcription wants the model faithful to the pixels, so keep this low.
    pub temperature: f32,

    /// Resolution at which the model analyses each image. Default: `high`.
    pub image_detail: ImageDetail,

    /// Per-request timeout in seconds. Default: 120.
    pub request_timeout_secs: u64,

    /// Retries after the first attempt on transient failures. Default: 3.
    pub max_retries: u32,

    /// Upper bound on simultaneously in-flight page requests. Default: 3.
    pub max_concurrent_pages: usize,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Cap on a single retry delay in milliseconds. Default: 30000.
    pub max_backoff_ms: u64,

    /// Bearer token for the vision API. Never serialised.
    #[serde(skip_serializing)]
    pub api_key: String,

    /// Chat-completions endpoint URL.
    pub api_url: String,

    /// Custom extraction instruction. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Separator inserted between page texts in the aggregate output.
    pub page_separator: PageSeparator,

    /// Rendering DPI. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 3000.
    pub max_rendered_pixels: u32,

    /// Transport encoding for rendered pages. Default: PNG.
    pub image_format: ImageFormat,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tokens: 4096,
            temperature: 0.1,
            image_detail: ImageDetail::default(),
            request_timeout_secs: 120,
            max_retries: 3,
            max_concurrent_pages: 3,
            retry_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            api_key: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            system_prompt: None,
            page_separator: PageSeparator::default(),
            dpi: 300,
            max_rendered_pixels: 3000,
            image_format: ImageFormat::default(),
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("image_detail", &self.image_detail)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("max_concurrent_pages", &self.max_concurrent_pages)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("api_key", &if self.has_api_key() { "<redacted>" } else { "<unset>" })
            .field("api_url", &self.api_url)
            .field("page_separator", &self.page_separator)
            .field("dpi", &self.dpi)
            .field("image_format", &self.image_format)
            .finish()
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }

    /// Start a builder from this configuration, e.g. one loaded from a
    /// settings file, so individual fields can be overridden.
    pub fn into_builder(self) -> OcrConfigBuilder {
        OcrConfigBuilder { config: self }
    }

    /// Per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// True when `api_key` holds something other than blank or a placeholder.
    pub fn has_api_key(&self) -> bool {
        let key = self.api_key.trim();
        !key.is_empty() && !API_KEY_PLACEHOLDERS.contains(&key)
    }

    /// Check every numeric and textual constraint.
    ///
    /// Fields are public, so callers that mutate a built config should call
    /// this again; the orchestrator does so before each run.
    pub fn validate(&self) -> Result<(), OcrError> {
        if self.model.trim().is_empty() {
            return Err(OcrError::InvalidConfig("Model identifier must not be empty".into()));
        }
        if self.max_concurrent_pages == 0 {
            return Err(OcrError::InvalidConfig(
                "Max concurrent pages must be ≥ 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(OcrError::InvalidConfig(
                "Request timeout must be > 0 seconds".into(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(OcrError::InvalidConfig("Max tokens must be ≥ 1".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) || self.temperature.is_nan() {
            return Err(OcrError::InvalidConfig(format!(
                "Temperature must be 0.0–2.0, got {}",
                self.temperature
            )));
        }
        if self.dpi < 72 || self.dpi > 600 {
            return Err(OcrError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                self.dpi
            )));
        }
        if self.max_backoff_ms < self.retry_backoff_ms {
            return Err(OcrError::InvalidConfig(format!(
                "Max backoff ({}ms) must not be below the base backoff ({}ms)",
                self.max_backoff_ms, self.retry_backoff_ms
            )));
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(OcrError::InvalidConfig(format!(
                "API URL must be an HTTP/HTTPS URL, got '{}'",
                self.api_url
            )));
        }
        Ok(())
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t;
        self
    }

    pub fn image_detail(mut self, detail: ImageDetail) -> Self {
        self.config.image_detail = detail;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn max_concurrent_pages(mut self, n: usize) -> Self {
        self.config.max_concurrent_pages = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.image_format = format;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig, OcrError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Settings file ────────────────────────────────────────────────────────

/// Where run artifacts go when the caller asks for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Default: `./output`.
    pub directory: PathBuf,
    /// Write `<stem>.txt` and `<stem>.json` after each run. Default: false.
    pub save_results: bool,
    /// Also keep every rendered page as `page_NNNN.png|jpg` in this directory.
    pub save_page_images: Option<PathBuf>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./output"),
            save_results: false,
            save_page_images: None,
        }
    }
}

/// Logging knobs consumed by the process entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `info` or `pdf_vision_ocr=debug`.
    pub level: String,
    /// Also append logs to this file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Everything a settings file can hold.
///
/// ```json
/// {
///   "ocr":     { "model": "gpt-4o", "api_key": "sk-…", "max_concurrent_pages": 3 },
///   "output":  { "directory": "./output", "save_results": true },
///   "logging": { "level": "debug", "file": "./logs/ocr.log" }
/// }
/// ```
///
/// Every section and field is optional; missing ones take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ocr: OcrConfig,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Parse settings from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OcrError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| OcrError::SettingsLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::from_json_str(&raw).map_err(|e| OcrError::SettingsLoad {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Fidelity at which the vision model inspects a page image.
///
/// `low` sends a single downscaled tile (cheap, loses fine print); `high`
/// tiles the full image (accurate, more input tokens); `auto` lets the
/// API decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    #[default]
    High,
    Auto,
}

impl ImageDetail {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageDetail::Low => "low",
            ImageDetail::High => "high",
            ImageDetail::Auto => "auto",
        }
    }
}

impl fmt::Display for ImageDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageDetail {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(ImageDetail::Low),
            "high" => Ok(ImageDetail::High),
            "auto" => Ok(ImageDetail::Auto),
            other => Err(OcrError::InvalidConfig(format!(
                "Image detail must be low, high or auto, got '{other}'"
            ))),
        }
    }
}

/// Image encoding used when shipping a rendered page to the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Lossless; keeps glyph edges crisp. (default)
    #[default]
    Png,
    /// Smaller uploads for photo-heavy scans.
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

/// How to separate pages in the assembled text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSeparator {
    /// Blank line only: "\n\n"
    Blank,
    /// Page marker: "\n\n--- Page N ---\n\n" (default)
    #[default]
    Marker,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// Form feed, the classic plain-text page break: "\n\x0C\n"
    FormFeed,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator that precedes the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::Blank => "\n\n".to_string(),
            PageSeparator::Marker => format!("\n\n--- Page {} ---\n\n", page_num),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::FormFeed => "\n\x0C\n".to_string(),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
