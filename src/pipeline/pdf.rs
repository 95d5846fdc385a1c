//! PDF backend: every pdfium call the pipeline makes.
//!
//! pdfium is a blocking C++ library with thread-local state, so each
//! operation binds the library and runs inside `tokio::task::spawn_blocking`.
//! Rendering caps the longest edge at `max_rendered_pixels`, not a DPI, so
//! an oversized page cannot blow up memory.

use image::DynamicImage;
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// pdfium failures.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Failed to bind to pdfium: {0}")]
    Binding(String),

    #[error("Cannot open PDF '{path}': {detail}")]
    Open { path: PathBuf, detail: String },

    #[error("Cannot render page {page} of '{path}': {detail}")]
    Render {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    #[error("Failed to build PDF '{path}': {detail}")]
    Compose { path: PathBuf, detail: String },

    #[error("PDF task panicked: {0}")]
    Task(String),
}

/// One page, or run of pages, contributed to a composed PDF.
#[derive(Clone)]
pub enum PageSource {
    /// A raster placed on a page sized from its pixels and the DPI.
    Raster(DynamicImage),
    /// One page copied untouched from an existing PDF (0-based index).
    PdfPage { path: PathBuf, index: u16 },
    /// Every page of an existing PDF, copied untouched.
    PdfWhole(PathBuf),
}

impl std::fmt::Debug for PageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageSource::Raster(img) => write!(f, "Raster({}x{})", img.width(), img.height()),
            PageSource::PdfPage { path, index } => {
                write!(f, "PdfPage({}#{})", path.display(), index)
            }
            PageSource::PdfWhole(path) => write!(f, "PdfWhole({})", path.display()),
        }
    }
}

/// Bind pdfium from `lib_dir`, then `PDFIUM_LIB_PATH`, then the working
/// directory, then the system library path.
pub fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, PdfError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = lib_dir {
        candidates.push(dir.to_path_buf());
    }
    if let Some(dir) = std::env::var_os("PDFIUM_LIB_PATH") {
        candidates.push(PathBuf::from(dir));
    }
    candidates.push(PathBuf::from("./"));

    let mut last_error = String::new();
    for dir in &candidates {
        let lib = Pdfium::pdfium_platform_library_name_at_path(dir);
        match Pdfium::bind_to_library(&lib) {
            Ok(bindings) => {
                debug!("Bound pdfium from {}", lib.display());
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => last_error = format!("{}: {:?}", lib.display(), e),
        }
    }
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| PdfError::Binding(format!("{last_error}; system library: {e:?}")))
}

/// Async handle on pdfium for a single batch.
#[derive(Debug, Clone)]
pub struct PdfBackend {
    lib_dir: Option<PathBuf>,
    max_rendered_pixels: u32,
    image_dpi: f32,
}

impl PdfBackend {
    pub fn new(lib_dir: Option<PathBuf>, max_rendered_pixels: u32, image_dpi: f32) -> Self {
        Self {
            lib_dir,
            max_rendered_pixels,
            image_dpi,
        }
    }

    pub fn from_config(config: &crate::config::PipelineConfig) -> Self {
        Self::new(
            config.pdfium_lib_path.clone(),
            config.max_rendered_pixels,
            config.image_dpi,
        )
    }

    async fn run<T, F>(&self, what: &'static str, f: F) -> Result<T, PdfError>
    where
        T: Send + 'static,
        F: FnOnce(&Pdfium) -> Result<T, PdfError> + Send + 'static,
    {
        let lib_dir = self.lib_dir.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium(lib_dir.as_deref())?;
            f(&pdfium)
        })
        .await
        .map_err(|e| PdfError::Task(format!("{what}: {e}")))?
    }

    /// Check that pdfium can be bound at all.
    pub async fn probe(&self) -> Result<(), PdfError> {
        self.run("probe", |_| Ok(())).await
    }

    /// Open `path` and count its pages.
    pub async fn page_count(&self, path: &Path) -> Result<usize, PdfError> {
        let path = path.to_path_buf();
        self.run("page count", move |pdfium| {
            let doc = open(pdfium, &path)?;
            Ok(doc.pages().len() as usize)
        })
        .await
    }

    /// Rasterise every page of `path`.
    pub async fn render(&self, path: &Path) -> Result<Vec<DynamicImage>, PdfError> {
        let path = path.to_path_buf();
        let max_pixels = self.max_rendered_pixels;
        self.run("render", move |pdfium| {
            render_blocking(pdfium, &path, max_pixels)
        })
        .await
    }

    /// Build a new PDF at `out` from `sources` in order.
    ///
    /// Returns the page count. Nothing is written when no page was
    /// contributed.
    pub async fn compose(&self, sources: Vec<PageSource>, out: &Path) -> Result<usize, PdfError> {
        let out = out.to_path_buf();
        let dpi = self.image_dpi;
        self.run("compose", move |pdfium| {
            compose_blocking(pdfium, &sources, dpi, &out)
        })
        .await
    }
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, PdfError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| PdfError::Open {
            path: path.to_path_buf(),
            detail: format!("{:?}", e),
        })
}

fn render_blocking(
    pdfium: &Pdfium,
    path: &Path,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, PdfError> {
    let document = open(pdfium, path)?;
    let pages = document.pages();
    info!("PDF loaded: {} ({} pages)", path.display(), pages.len());

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| PdfError::Render {
                path: path.to_path_buf(),
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }
    Ok(images)
}

fn compose_blocking(
    pdfium: &Pdfium,
    sources: &[PageSource],
    dpi: f32,
    out: &Path,
) -> Result<usize, PdfError> {
    let compose_err = |detail: String| PdfError::Compose {
        path: out.to_path_buf(),
        detail,
    };

    let mut document = pdfium
        .create_new_pdf()
        .map_err(|e| compose_err(format!("{:?}", e)))?;
    let mut opened: HashMap<&Path, PdfDocument<'_>> = HashMap::new();

    for source in sources {
        match source {
            PageSource::Raster(img) => {
                add_raster_page(&mut document, img, dpi)
                    .map_err(|e| compose_err(format!("raster page: {:?}", e)))?;
            }
            PageSource::PdfPage { path, index } => {
                if !opened.contains_key(path.as_path()) {
                    opened.insert(path.as_path(), open(pdfium, path)?);
                }
                let src = &opened[path.as_path()];
                let dest = document.pages().len();
                document
                    .pages_mut()
                    .copy_page_from_document(src, *index, dest)
                    .map_err(|e| {
                        compose_err(format!("copy page {} of {}: {:?}", index + 1, path.display(), e))
                    })?;
            }
            PageSource::PdfWhole(path) => {
                if !opened.contains_key(path.as_path()) {
                    opened.insert(path.as_path(), open(pdfium, path)?);
                }
                let src = &opened[path.as_path()];
                document
                    .pages_mut()
                    .append(src)
                    .map_err(|e| compose_err(format!("append {}: {:?}", path.display(), e)))?;
            }
        }
    }

    let count = document.pages().len() as usize;
    if count == 0 {
        warn!("No pages contributed to {}", out.display());
        return Ok(0);
    }
    document
        .save_to_file(out)
        .map_err(|e| compose_err(format!("save: {:?}", e)))?;
    info!("Wrote {} ({} pages)", out.display(), count);
    Ok(count)
}

fn add_raster_page(
    document: &mut PdfDocument<'_>,
    img: &DynamicImage,
    dpi: f32,
) -> Result<(), PdfiumError> {
    let (w, h) = page_size_points(img.width(), img.height(), dpi);
    let mut page = document
        .pages_mut()
        .create_page_at_end(PdfPagePaperSize::from_points(w, h))?;
    page.objects_mut()
        .create_image_object(PdfPoints::ZERO, PdfPoints::ZERO, img, Some(w), Some(h))?;
    Ok(())
}

/// Page size in points for a raster of `width`×`height` pixels at `dpi`.
pub fn page_size_points(width: u32, height: u32, dpi: f32) -> (PdfPoints, PdfPoints) {
    let to_points = |px: u32| PdfPoints::new(px as f32 * 72.0 / dpi);
    (to_points(width), to_points(height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a4_scan_maps_to_a4_points() {
        // 2480x3508 px at 300 DPI is A4.
        let (w, h) = page_size_points(2480, 3508, 300.0);
        assert!((w.value - 595.2).abs() < 0.5, "w = {}", w.value);
        assert!((h.value - 841.9).abs() < 0.5, "h = {}", h.value);
    }

    #[test]
    fn test_page_source_debug_is_compact() {
        let s = format!("{:?}", PageSource::Raster(DynamicImage::new_rgb8(3, 2)));
        assert_eq!(s, "Raster(3x2)");
    }

    #[test]
    fn test_bind_error_mentions_system_library() {
        // Only meaningful where pdfium is absent.
        if std::env::var("PDFIUM_LIB_PATH").is_ok() {
            return;
        }
        if let Err(e) = bind_pdfium(Some(Path::new("/nonexistent/pdfium"))) {
            assert!(e.to_string().contains("system library"));
        }
    }
}
