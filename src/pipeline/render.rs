//! PDF rasterisation: turn a document into an ordered run of page images.
//!
//! The [`Rasterizer`] trait is the seam the orchestrator depends on; the
//! production implementation, [`PdfiumRasterizer`], wraps pdfium.
//!
//! ## Blocking pool
//!
//! pdfium is a C++ library with thread-local state and is CPU-bound.
//! `tokio::task::spawn_blocking` moves rendering onto the blocking pool so
//! the async workers that drive network I/O never stall.

use crate::config::{ImageFormat, OcrConfig};
use crate::error::OcrError;
use crate::pipeline::encode::encode_image;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// One rendered page, ready for submission.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed, in rasterisation order.
    pub page_number: usize,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl PageImage {
    pub fn new(page_number: usize, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            page_number,
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

impl PageImage {
    /// File extension matching `mime_type`.
    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            _ => "png",
        }
    }

    /// `page_0001.png` style name for saved page images.
    pub fn file_name(&self) -> String {
        format!("page_{:04}.{}", self.page_number, self.file_extension())
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page_number", &self.page_number)
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Converts a document path into an ordered sequence of page images.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render every page. Page numbers must run `1..=N` with no gaps.
    async fn rasterize(&self, document: &Path) -> Result<Vec<PageImage>, OcrError>;
}

/// Rasteriser backed by pdfium.
///
/// The library is bound on each call from `PDFIUM_LIB_PATH` (a path to the
/// shared library file), then `./`, then the system search path.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
    format: ImageFormat,
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(dpi: u32, max_pixels: u32, format: ImageFormat) -> Self {
        Self {
            dpi,
            max_pixels,
            format,
            library_path: None,
        }
    }

    /// Rasteriser settings taken from an [`OcrConfig`].
    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(config.dpi, config.max_rendered_pixels, config.image_format)
    }

    /// Bind to this pdfium library instead of searching for one.
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(&self, document: &Path) -> Result<Vec<PageImage>, OcrError> {
        let this = self.clone();
        let path = document.to_path_buf();

        spawn_blocking_traced(move || this.rasterize_blocking(&path))
            .await
            .map_err(|e| OcrError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Wraps another rasteriser and writes every rendered page into a directory
/// before handing the pages on.
pub struct ArchivingRasterizer {
    inner: Arc<dyn Rasterizer>,
    dir: PathBuf,
}

impl ArchivingRasterizer {
    pub fn new(inner: Arc<dyn Rasterizer>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }
}

#[async_trait]
impl Rasterizer for ArchivingRasterizer {
    async fn rasterize(&self, document: &Path) -> Result<Vec<PageImage>, OcrError> {
        let pages = self.inner.rasterize(document).await?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| OcrError::OutputWriteFailed {
                path: self.dir.clone(),
                source: e,
            })?;
        for page in &pages {
            let path = self.dir.join(page.file_name());
            tokio::fs::write(&path, &page.bytes)
                .await
                .map_err(|e| OcrError::OutputWriteFailed { path, source: e })?;
        }
        info!("Saved {} page images to {}", pages.len(), self.dir.display());
        Ok(pages)
    }
}

/// `spawn_blocking` that keeps the caller's dispatcher and span.
///
/// A dispatcher set with `WithSubscriber` is only current while the calling
/// future is polled, so blocking-pool threads would otherwise log nowhere.
pub(crate) fn spawn_blocking_traced<F, T>(f: F) -> tokio::task::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|d| d.clone());
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || {
        tracing::dispatcher::with_default(&dispatch, || span.in_scope(f))
    })
}

impl PdfiumRasterizer {
    fn bind(&self) -> Result<Pdfium, OcrError> {
        let explicit = self.library_path.clone().or_else(|| {
            std::env::var("PDFIUM_LIB_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
        });

        let bindings = match explicit {
            Some(path) => Pdfium::bind_to_library(&path),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| OcrError::PdfiumBindingFailed(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }

    fn rasterize_blocking(&self, pdf_path: &Path) -> Result<Vec<PageImage>, OcrError> {
        let pdfium = self.bind()?;

        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| OcrError::Rasterization {
                path: pdf_path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);
        if total_pages == 0 {
            return Err(OcrError::NoPages {
                path: pdf_path.to_path_buf(),
            });
        }

        let scale = self.dpi as f32 / 72.0;
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut results = Vec::with_capacity(total_pages);

        for (idx, page) in pages.iter().enumerate() {
            let page_number = idx + 1;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| OcrError::Rasterization {
                    path: pdf_path.to_path_buf(),
                    detail: format!("page {}: {:?}", page_number, e),
                })?;

            let image = bitmap.as_image();
            let bytes = encode_image(&image, self.format).map_err(|e| OcrError::Rasterization {
                path: pdf_path.to_path_buf(),
                detail: format!("page {}: image encoding failed: {}", page_number, e),
            })?;
            debug!(
                "Rendered page {} → {}x{} px, {} bytes",
                page_number,
                image.width(),
                image.height(),
                bytes.len()
            );

            results.push(PageImage::new(page_number, bytes, self.format.mime_type()));
        }

        Ok(results)
    }
}
