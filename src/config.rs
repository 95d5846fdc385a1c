//! Configuration types for batch normalisation.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. One struct holds every knob so a config can
//! be shared across worker tasks and logged as a whole.

use crate::error::BatchError;
use crate::ocr::OcrEngine;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default page-marker patterns, in priority order.
///
/// Every pattern is matched case-insensitively and anchored at a word
/// boundary. Order matters: the first pattern that matches wins.
pub const DEFAULT_PAGE_PATTERNS: &[&str] = &[
    r"\bст\.?\s*\d+",
    r"\bстр\.?\s*\d+",
    r"\bстр\s*\d+",
    r"\bс\.?\s*\d+",
    r"\bстраница\s*\d+",
    r"\bpage\s*\d+",
    r"\bp\.?\s*\d+",
];

/// Configuration for processing one upload batch.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use dockit::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .concurrency(4)
///     .ocr_timeout_secs(60)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Files processed at once during the per-file stage. Default: 5.
    pub concurrency: usize,

    /// Lower-case extensions accepted without a leading dot.
    /// Default: `pdf`, `jpg`, `jpeg`, `png`.
    pub supported_extensions: Vec<String>,

    /// Per-file size ceiling in bytes. Default: 50 MiB.
    pub max_file_size: u64,

    /// Page-marker regexes in priority order. Default: [`DEFAULT_PAGE_PATTERNS`].
    pub page_patterns: Vec<String>,

    /// Language hints tried in order for orientation detection. A final
    /// attempt without a hint always follows. Default: `rus+eng`, `eng`.
    pub osd_languages: Vec<String>,

    /// Timeout for each orientation-detection call. Default: 120 s.
    pub ocr_timeout_secs: u64,

    /// Language for heuristic plain-text recognition. Default: `rus`.
    pub heuristic_language: String,

    /// Timeout for each heuristic recognition call. Default: 30 s.
    pub heuristic_timeout_secs: u64,

    /// A heuristic rotation is applied only if it scores above this many
    /// alphanumeric characters. Default: 10.
    pub heuristic_min_score: usize,

    /// Images whose sides differ by less than this fraction of the short
    /// side are treated as square and never rotated by the heuristic.
    /// Default: 0.1.
    pub square_tolerance: f32,

    /// Images with either side below this many pixels skip OCR. Default: 100.
    pub min_ocr_dimension: u32,

    /// Longest edge, in pixels, when rasterising PDF pages for re-validation.
    /// Default: 2000.
    pub max_rendered_pixels: u32,

    /// Resolution used to size image-derived PDF pages. Default: 300 DPI.
    pub image_dpi: f32,

    /// Root under which per-user workspaces are created.
    /// Default: the system temp directory.
    pub temp_root: PathBuf,

    /// Directory containing the pdfium shared library. If `None`, the
    /// `PDFIUM_LIB_PATH` variable, the working directory and the system
    /// library path are tried in that order.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Path to the tesseract executable. Default: `tesseract` on `PATH`.
    pub tesseract_path: PathBuf,

    /// Pre-constructed OCR engine. Takes precedence over `tesseract_path`.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Optional per-file progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            supported_extensions: ["pdf", "jpg", "jpeg", "png"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: 50 * 1024 * 1024,
            page_patterns: DEFAULT_PAGE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            osd_languages: vec!["rus+eng".to_string(), "eng".to_string()],
            ocr_timeout_secs: 120,
            heuristic_language: "rus".to_string(),
            heuristic_timeout_secs: 30,
            heuristic_min_score: 10,
            square_tolerance: 0.1,
            min_ocr_dimension: 100,
            max_rendered_pixels: 2000,
            image_dpi: 300.0,
            temp_root: std::env::temp_dir(),
            pdfium_lib_path: None,
            tesseract_path: PathBuf::from("tesseract"),
            ocr_engine: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("concurrency", &self.concurrency)
            .field("supported_extensions", &self.supported_extensions)
            .field("max_file_size", &self.max_file_size)
            .field("page_patterns", &self.page_patterns)
            .field("osd_languages", &self.osd_languages)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("heuristic_language", &self.heuristic_language)
            .field("heuristic_timeout_secs", &self.heuristic_timeout_secs)
            .field("heuristic_min_score", &self.heuristic_min_score)
            .field("square_tolerance", &self.square_tolerance)
            .field("min_ocr_dimension", &self.min_ocr_dimension)
            .field("temp_root", &self.temp_root)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("tesseract_path", &self.tesseract_path)
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|_| "<dyn OcrEngine>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }

    pub fn heuristic_timeout(&self) -> Duration {
        Duration::from_secs(self.heuristic_timeout_secs)
    }

    /// Whether `extension` (any case, with or without a dot) is allowed.
    pub fn is_supported_extension(&self, extension: &str) -> bool {
        let ext = extension.trim_start_matches('.').to_lowercase();
        self.supported_extensions.iter().any(|e| *e == ext)
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn supported_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.supported_extensions = exts
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn page_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.page_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn osd_languages<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.osd_languages = langs.into_iter().map(Into::into).collect();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs.max(1);
        self
    }

    pub fn heuristic_language(mut self, lang: impl Into<String>) -> Self {
        self.config.heuristic_language = lang.into();
        self
    }

    pub fn heuristic_timeout_secs(mut self, secs: u64) -> Self {
        self.config.heuristic_timeout_secs = secs.max(1);
        self
    }

    pub fn heuristic_min_score(mut self, score: usize) -> Self {
        self.config.heuristic_min_score = score;
        self
    }

    pub fn square_tolerance(mut self, t: f32) -> Self {
        self.config.square_tolerance = t.clamp(0.0, 1.0);
        self
    }

    pub fn min_ocr_dimension(mut self, px: u32) -> Self {
        self.config.min_ocr_dimension = px;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn image_dpi(mut self, dpi: f32) -> Self {
        self.config.image_dpi = dpi.clamp(72.0, 1200.0);
        self
    }

    pub fn temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_root = dir.into();
        self
    }

    pub fn pdfium_lib_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(dir.into());
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, BatchError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(BatchError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.supported_extensions.is_empty() {
            return Err(BatchError::InvalidConfig(
                "At least one supported extension is required".into(),
            ));
        }
        if c.max_file_size == 0 {
            return Err(BatchError::InvalidConfig(
                "Maximum file size must be > 0".into(),
            ));
        }
        for pattern in &c.page_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                BatchError::InvalidConfig(format!("Invalid page pattern '{pattern}': {e}"))
            })?;
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.concurrency, 5);
        assert_eq!(c.max_file_size, 50 * 1024 * 1024);
        assert_eq!(c.ocr_timeout(), Duration::from_secs(120));
        assert_eq!(c.heuristic_timeout(), Duration::from_secs(30));
        assert_eq!(c.osd_languages, vec!["rus+eng", "eng"]);
        assert_eq!(c.page_patterns.len(), DEFAULT_PAGE_PATTERNS.len());
    }

    #[test]
    fn extension_check_ignores_case_and_dot() {
        let c = PipelineConfig::default();
        assert!(c.is_supported_extension(".JPG"));
        assert!(c.is_supported_extension("pdf"));
        assert!(!c.is_supported_extension("gif"));
    }

    #[test]
    fn builder_clamps_concurrency() {
        let c = PipelineConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn builder_normalises_extensions() {
        let c = PipelineConfig::builder()
            .supported_extensions([".PNG", "tif"])
            .build()
            .unwrap();
        assert_eq!(c.supported_extensions, vec!["png", "tif"]);
    }

    #[test]
    fn builder_rejects_bad_pattern() {
        let err = PipelineConfig::builder()
            .page_patterns(["page(\\d+"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Invalid page pattern"));
    }

    #[test]
    fn builder_rejects_empty_allow_list() {
        let err = PipelineConfig::builder()
            .supported_extensions(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
    }
}
