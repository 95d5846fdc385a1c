//! Page merging: turn an ordered group into one PDF.
//!
//! Raster members arrive already upright. Native PDF members are rendered
//! and every page is checked again, because a scanner-produced PDF is as
//! likely to hold a sideways page as a photo is. Upright pages are copied
//! from the source document untouched so their text layer survives; only
//! pages that needed a turn are replaced by the corrected raster.

use crate::error::FileWarning;
use crate::pipeline::filename::sanitize_name;
use crate::pipeline::orientation::OrientationCorrector;
use crate::pipeline::pdf::{PageSource, PdfBackend, PdfError};
use image::DynamicImage;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// The content of one prepared page.
#[derive(Clone)]
pub enum PageContent {
    /// A corrected raster from an image upload.
    Raster(DynamicImage),
    /// A staged PDF upload.
    Pdf(PathBuf),
}

impl std::fmt::Debug for PageContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageContent::Raster(img) => write!(f, "Raster({}x{})", img.width(), img.height()),
            PageContent::Pdf(path) => write!(f, "Pdf({})", path.display()),
        }
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no member contributed a page")]
    Empty { warnings: Vec<FileWarning> },

    #[error("{source}")]
    Compose {
        #[source]
        source: PdfError,
        warnings: Vec<FileWarning>,
    },
}

impl MergeError {
    /// Warnings gathered before the merge gave up.
    pub fn warnings(&self) -> &[FileWarning] {
        match self {
            MergeError::Empty { warnings } | MergeError::Compose { warnings, .. } => warnings,
        }
    }

    /// Members that could not be read and contributed nothing.
    pub fn dropped_members(&self) -> HashSet<&str> {
        self.warnings()
            .iter()
            .filter_map(|w| match w {
                FileWarning::Unreadable { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A successful merge.
#[derive(Debug)]
pub struct MergeOutcome {
    pub page_count: usize,
    /// Pages of PDF members that had to be turned and re-encoded.
    pub rotated_pages: usize,
    /// Members dropped or degraded along the way.
    pub warnings: Vec<FileWarning>,
}

/// `<sanitised base_key>.pdf`
pub fn merged_file_name(base_key: &str) -> String {
    format!("{}.pdf", sanitize_name(base_key))
}

/// Concatenates ordered pages through a [`PdfBackend`].
#[derive(Clone)]
pub struct PageMerger {
    backend: PdfBackend,
    corrector: OrientationCorrector,
}

impl PageMerger {
    pub fn new(backend: PdfBackend, corrector: OrientationCorrector) -> Self {
        Self { backend, corrector }
    }

    /// Merge `members` (display name, content) in order into `out`.
    pub async fn merge(
        &self,
        members: &[(&str, &PageContent)],
        out: &Path,
    ) -> Result<MergeOutcome, MergeError> {
        let mut sources = Vec::new();
        let mut warnings = Vec::new();
        let mut rotated_pages = 0;

        for (name, content) in members {
            match content {
                PageContent::Raster(img) => sources.push(PageSource::Raster(img.clone())),
                PageContent::Pdf(path) => {
                    let checked = self.revalidate_pdf(name, path, &mut warnings).await;
                    rotated_pages += checked.rotated;
                    sources.extend(checked.sources);
                }
            }
        }

        if sources.is_empty() {
            return Err(MergeError::Empty { warnings });
        }
        debug!("Composing {} from {} sources", out.display(), sources.len());
        let page_count = match self.backend.compose(sources, out).await {
            Ok(0) => return Err(MergeError::Empty { warnings }),
            Ok(n) => n,
            Err(source) => return Err(MergeError::Compose { source, warnings }),
        };
        info!("Merged {} members into {} pages", members.len(), page_count);
        Ok(MergeOutcome {
            page_count,
            rotated_pages,
            warnings,
        })
    }

    /// Render a PDF member and re-check each page's orientation.
    async fn revalidate_pdf(
        &self,
        name: &str,
        path: &Path,
        warnings: &mut Vec<FileWarning>,
    ) -> CheckedPdf {
        let pages = match self.backend.render(path).await {
            Ok(pages) => pages,
            Err(e @ PdfError::Open { .. }) => {
                warn!("{}: dropped from merge: {}", name, e);
                warnings.push(FileWarning::Unreadable {
                    name: name.to_string(),
                    detail: e.to_string(),
                });
                return CheckedPdf::default();
            }
            Err(e) => {
                warn!("{}: could not render, copying as-is: {}", name, e);
                return CheckedPdf {
                    sources: vec![PageSource::PdfWhole(path.to_path_buf())],
                    rotated: 0,
                };
            }
        };

        let mut checked = CheckedPdf::default();
        for (idx, image) in pages.into_iter().enumerate() {
            let label = format!("{name} [page {}]", idx + 1);
            let fixed = self.corrector.correct(image, None, &label).await;
            if let Some(detail) = fixed.failure.clone() {
                warnings.push(FileWarning::OrientationDetectionFailure {
                    name: label.clone(),
                    detail,
                });
            }
            if fixed.is_rotated() {
                debug!("{}: rotated {}°, re-encoding", label, fixed.angle);
                checked.rotated += 1;
                checked.sources.push(PageSource::Raster(fixed.image));
            } else {
                checked.sources.push(PageSource::PdfPage {
                    path: path.to_path_buf(),
                    index: idx as u16,
                });
            }
        }
        checked
    }
}

/// The pages one PDF member contributes.
#[derive(Default)]
struct CheckedPdf {
    sources: Vec<PageSource>,
    rotated: usize,
}
