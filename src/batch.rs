//! Batch driver: uploads in, ordered PDF artifacts and an inventory out.
//!
//! ```text
//! RawUpload ─▶ normalise name ─▶ intake checks ─▶ stage ─▶ orient   (per file, bounded pool)
//!                                                            │
//!                         ┌──────────── barrier ─────────────┘
//!                         ▼
//!             page key ─▶ group ─▶ merge / passthrough ─▶ inventory
//! ```
//!
//! Per-file work runs through `buffered(concurrency)`, so results come back
//! in batch order no matter which file finishes first. Grouping starts only
//! once every file is done. A failing file becomes a [`FileWarning`]; the
//! batch fails only if nothing at all could be processed.

use crate::config::PipelineConfig;
use crate::error::{BatchError, FileWarning};
use crate::ocr::{OcrEngine, TesseractCli};
use crate::output::{
    inventory_for, unique_name, Artifact, ArtifactKind, BatchOutput, BatchStats,
};
use crate::pipeline::filename::{
    normalize_filename, sanitize_name, split_extension, validate_name, RepairOutcome,
};
use crate::pipeline::group::{group_pages, DocumentGroup, GroupMember};
use crate::pipeline::input::{
    classify, decode_image, effective_extension, stage_upload, RawUpload, SourceKind,
};
use crate::pipeline::merge::{merged_file_name, MergeError, PageContent, PageMerger};
use crate::pipeline::orientation::{
    persist_corrected, read_exif_orientation, OrientationCorrector, OrientationSettings,
};
use crate::pipeline::page_key::PageKeyExtractor;
use crate::pipeline::pdf::{PageSource, PdfBackend};
use crate::session::BatchSession;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One upload after the per-file stage, ready for grouping.
#[derive(Debug, Clone)]
pub struct PreparedPage {
    /// 1-based position in the batch.
    pub index: usize,
    pub display_name: String,
    pub content: PageContent,
    /// Clockwise rotation applied to a raster upload.
    pub angle: u32,
    /// Pages in a PDF upload; 1 for images.
    pub page_count: usize,
    /// The `_corrected` file written for a rotated raster.
    pub derived_path: Option<PathBuf>,
}

impl PreparedPage {
    pub fn stem(&self) -> &str {
        split_extension(&self.display_name).0
    }
}

/// A planned artifact: its name and the ordered group behind it.
#[derive(Debug)]
pub struct PlannedArtifact<P> {
    pub name: String,
    pub group: DocumentGroup<P>,
}

impl<P> PlannedArtifact<P> {
    pub fn kind(&self) -> ArtifactKind {
        if self.group.is_passthrough() {
            ArtifactKind::Passthrough
        } else {
            ArtifactKind::Merged
        }
    }
}

/// Output names reserved so far, compared case-insensitively.
#[derive(Debug, Default)]
pub struct NameBook(HashSet<String>);

impl NameBook {
    pub fn reserve(&mut self, name: &str) -> String {
        unique_name(&mut self.0, name)
    }
}

/// `<sanitised stem>.pdf` for a single upload.
pub fn passthrough_name(display_name: &str) -> String {
    format!("{}.pdf", sanitize_name(split_extension(display_name).0))
}

/// Group `(display_name, page)` pairs and name the resulting artifacts.
///
/// Pure: no I/O, no pdfium. [`process_batch`] uses it between the per-file
/// stage and emission.
pub fn plan<P>(
    extractor: &PageKeyExtractor,
    pages: impl IntoIterator<Item = (String, P)>,
    names: &mut NameBook,
) -> Vec<PlannedArtifact<P>> {
    let keyed: Vec<_> = pages
        .into_iter()
        .map(|(display_name, page)| {
            let key = extractor.extract(split_extension(&display_name).0);
            (key, (display_name, page))
        })
        .collect();

    group_pages(keyed)
        .into_iter()
        .map(|group| {
            let proposed = if group.is_passthrough() {
                passthrough_name(&group.members[0].page.0)
            } else {
                merged_file_name(&group.base_key)
            };
            let name = names.reserve(&proposed);
            debug!(
                "Planned {:?} from {} member(s), pages {:?}",
                name,
                group.len(),
                group.page_numbers()
            );
            PlannedArtifact {
                name,
                group: DocumentGroup {
                    base_key: group.base_key,
                    members: group
                        .members
                        .into_iter()
                        .map(|m| GroupMember {
                            page: m.page.1,
                            page_number: m.page_number,
                        })
                        .collect(),
                },
            }
        })
        .collect()
}

/// Result of the per-file stage for one upload.
struct FileOutcome {
    raw_name: String,
    display_name: String,
    page: Option<PreparedPage>,
    warnings: Vec<FileWarning>,
}

struct FileContext<'a> {
    config: &'a PipelineConfig,
    session: &'a BatchSession,
    backend: &'a PdfBackend,
    corrector: &'a OrientationCorrector,
    total: usize,
}

/// Process one batch of uploads inside `session`.
///
/// # Errors
/// * [`BatchError::TotalProcessingFailure`] if no upload could be processed
/// * [`BatchError::Cancelled`] if [`BatchSession::cancel`] was called
/// * [`BatchError::PdfiumBindingFailed`] if pdfium cannot be loaded
/// * [`BatchError::InvalidConfig`] for bad page patterns
pub async fn process_batch(
    session: &BatchSession,
    uploads: Vec<RawUpload>,
    config: &PipelineConfig,
) -> Result<BatchOutput, BatchError> {
    let start = Instant::now();
    let total = uploads.len();
    info!("Starting batch for user {}: {} files", session.user_id(), total);

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    if total == 0 {
        return Err(BatchError::TotalProcessingFailure {
            total: 0,
            first_error: "the batch contains no files".into(),
        });
    }
    session.check_cancelled()?;

    let extractor = PageKeyExtractor::new(config.page_patterns.as_slice())?;
    let backend = PdfBackend::from_config(config);
    backend
        .probe()
        .await
        .map_err(|e| BatchError::PdfiumBindingFailed(e.to_string()))?;

    let engine: Arc<dyn OcrEngine> = match config.ocr_engine {
        Some(ref engine) => Arc::clone(engine),
        None => Arc::new(TesseractCli::new(&config.tesseract_path)),
    };
    debug!("Using OCR engine {}", engine.name());
    let corrector = OrientationCorrector::new(engine, OrientationSettings::from(config));

    // ── Per-file stage ───────────────────────────────────────────────────
    let ctx = FileContext {
        config,
        session,
        backend: &backend,
        corrector: &corrector,
        total,
    };
    let outcomes: Vec<FileOutcome> = stream::iter(
        uploads
            .into_iter()
            .enumerate()
            .map(|(i, upload)| prepare_file(&ctx, i + 1, upload)),
    )
    .buffered(config.concurrency)
    .collect()
    .await;

    session.check_cancelled()?;

    let mut warnings = Vec::new();
    let mut pages = Vec::new();
    let mut renamed_files = 0;
    for outcome in outcomes {
        if outcome.display_name != outcome.raw_name {
            renamed_files += 1;
        }
        warnings.extend(outcome.warnings);
        pages.extend(outcome.page);
    }

    if pages.is_empty() {
        let first_error = warnings
            .iter()
            .find(|w| w.is_skip())
            .or_else(|| warnings.first())
            .map(|w| w.to_string())
            .unwrap_or_else(|| "no file produced a page".to_string());
        return Err(BatchError::TotalProcessingFailure { total, first_error });
    }

    let processed_files = pages.len();
    let mut rotated_pages = pages.iter().filter(|p| p.angle != 0).count();
    info!(
        "Per-file stage done: {}/{} files usable, {} rotated",
        processed_files, total, rotated_pages
    );

    // ── Grouping barrier ─────────────────────────────────────────────────
    let mut names = NameBook::default();
    let planned = plan(
        &extractor,
        pages.into_iter().map(|p| (p.display_name.clone(), p)),
        &mut names,
    );

    // ── Emission ─────────────────────────────────────────────────────────
    let artifact_dir = tempfile::Builder::new()
        .prefix("artifacts-")
        .tempdir_in(session.workspace().parent().unwrap_or(config.temp_root.as_path()))
        .map_err(|source| BatchError::Workspace {
            path: config.temp_root.clone(),
            source,
        })?;

    let merger = PageMerger::new(backend.clone(), corrector.clone());
    let mut artifacts = Vec::new();
    let mut merged_groups = 0;

    for planned in planned {
        session.check_cancelled()?;
        let emitted = emit_group(&backend, &merger, planned, &mut names, artifact_dir.path()).await;
        merged_groups += usize::from(emitted.merged);
        rotated_pages += emitted.rotated_pages;
        artifacts.extend(emitted.artifacts);
        warnings.extend(emitted.warnings);
    }

    if artifacts.is_empty() {
        let first_error = warnings
            .first()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "no artifact could be written".to_string());
        return Err(BatchError::TotalProcessingFailure { total, first_error });
    }

    let inventory = inventory_for(&artifacts);
    let stats = BatchStats {
        total_files: total,
        processed_files,
        skipped_files: total - processed_files,
        renamed_files,
        rotated_pages,
        merged_groups,
        artifact_count: artifacts.len(),
        total_duration_ms: start.elapsed().as_millis() as u64,
    };

    info!(
        "Batch complete: {} artifacts from {}/{} files, {} warnings, {}ms",
        stats.artifact_count,
        processed_files,
        total,
        warnings.len(),
        stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, artifacts.len());
    }

    Ok(BatchOutput {
        artifacts,
        inventory,
        warnings,
        stats,
        artifact_dir,
    })
}

/// Synchronous wrapper around [`process_batch`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_batch_sync(
    session: &BatchSession,
    uploads: Vec<RawUpload>,
    config: &PipelineConfig,
) -> Result<BatchOutput, BatchError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| BatchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_batch(session, uploads, config))
}

/// Normalise, validate, stage and orient one upload.
async fn prepare_file(ctx: &FileContext<'_>, index: usize, upload: RawUpload) -> FileOutcome {
    let cb = ctx.config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_file_start(index, ctx.total, &upload.raw_name);
    }

    let name = normalize_filename(&upload.raw_name);
    let display_name = name.display.clone();
    let mut outcome = FileOutcome {
        raw_name: upload.raw_name.clone(),
        display_name: display_name.clone(),
        page: None,
        warnings: Vec::new(),
    };

    if ctx.session.is_cancelled() {
        return outcome;
    }

    if name.repair == RepairOutcome::Failed {
        outcome.warnings.push(FileWarning::NameDecodeFailure {
            name: upload.raw_name.clone(),
        });
    }
    for reason in validate_name(&display_name) {
        outcome.warnings.push(FileWarning::InvalidName {
            name: display_name.clone(),
            reason,
        });
    }

    match prepare_content(ctx, index, upload, &display_name, name.stem()).await {
        Ok((page, warnings)) => {
            outcome.warnings.extend(warnings);
            outcome.page = Some(page);
            if let Some(cb) = cb {
                cb.on_file_complete(index, ctx.total, &display_name);
            }
        }
        Err(w) => {
            warn!("Skipping {}: {}", display_name, w);
            if let Some(cb) = cb {
                cb.on_file_error(index, ctx.total, &w.to_string());
            }
            outcome.warnings.push(w);
        }
    }
    outcome
}

async fn prepare_content(
    ctx: &FileContext<'_>,
    index: usize,
    upload: RawUpload,
    display_name: &str,
    stem: &str,
) -> Result<(PreparedPage, Vec<FileWarning>), FileWarning> {
    let kind = classify(&upload, display_name, ctx.config)?;
    let ext = effective_extension(&upload, display_name);
    let unreadable = |detail: String| FileWarning::Unreadable {
        name: display_name.to_string(),
        detail,
    };

    let staged = stage_upload(&ctx.session.uploads_dir(), index, &ext, &upload.bytes)
        .await
        .map_err(|e| unreadable(format!("could not stage upload: {e}")))?;

    let mut page = PreparedPage {
        index,
        display_name: display_name.to_string(),
        content: PageContent::Pdf(staged.clone()),
        angle: 0,
        page_count: 1,
        derived_path: None,
    };
    let mut warnings = Vec::new();

    match kind {
        SourceKind::Pdf => {
            page.page_count = ctx
                .backend
                .page_count(&staged)
                .await
                .map_err(|e| unreadable(e.to_string()))?;
            debug!("{}: PDF with {} pages", display_name, page.page_count);
        }
        SourceKind::Image => {
            let exif = read_exif_orientation(&upload.bytes);
            let name = display_name.to_string();
            let image = tokio::task::spawn_blocking(move || decode_image(&upload.bytes, &name))
                .await
                .map_err(|e| unreadable(format!("decode task panicked: {e}")))??;

            let fixed = ctx.corrector.correct(image, exif, display_name).await;
            if let Some(detail) = fixed.failure.clone() {
                warnings.push(FileWarning::OrientationDetectionFailure {
                    name: display_name.to_string(),
                    detail,
                });
            }
            if fixed.is_rotated() {
                let dir = ctx.session.corrected_dir();
                let stem = stem.to_string();
                let copy = fixed.image.clone();
                let written =
                    tokio::task::spawn_blocking(move || persist_corrected(&dir, &stem, &copy))
                        .await;
                match written {
                    Ok(Ok(path)) => page.derived_path = Some(path),
                    Ok(Err(e)) => warn!("{}: could not write corrected copy: {}", display_name, e),
                    Err(e) => warn!("{}: corrected copy task failed: {}", display_name, e),
                }
            }
            page.angle = fixed.angle;
            page.content = PageContent::Raster(fixed.image);
        }
    }
    Ok((page, warnings))
}

/// What emitting one planned artifact produced.
#[derive(Default)]
struct Emitted {
    artifacts: Vec<Artifact>,
    warnings: Vec<FileWarning>,
    merged: bool,
    rotated_pages: usize,
}

/// Emit one planned artifact. A merge that fails degrades to one artifact
/// per remaining readable member.
async fn emit_group(
    backend: &PdfBackend,
    merger: &PageMerger,
    planned: PlannedArtifact<PreparedPage>,
    names: &mut NameBook,
    dir: &Path,
) -> Emitted {
    let mut emitted = Emitted::default();
    let kind = planned.kind();
    let PlannedArtifact { name, group } = planned;

    if kind == ArtifactKind::Passthrough {
        let page = &group.members[0].page;
        match emit_single(backend, page, &group.base_key, name, dir).await {
            Ok(a) => emitted.artifacts.push(a),
            Err(w) => emitted.warnings.push(w),
        }
        return emitted;
    }

    let out = dir.join(&name);
    let members: Vec<(&str, &PageContent)> = group
        .members
        .iter()
        .map(|m| (m.page.display_name.as_str(), &m.page.content))
        .collect();

    let err = match merger.merge(&members, &out).await {
        Ok(result) => {
            emitted.merged = true;
            emitted.rotated_pages = result.rotated_pages;
            emitted.warnings.extend(result.warnings);
            emitted.artifacts.push(Artifact {
                name,
                path: out,
                kind: ArtifactKind::Merged,
                base_key: group.base_key.clone(),
                page_count: result.page_count,
                members: group
                    .members
                    .iter()
                    .map(|m| m.page.display_name.clone())
                    .collect(),
            });
            return emitted;
        }
        Err(e) => e,
    };

    let warning = match &err {
        MergeError::Empty { .. } => FileWarning::EmptyMergeResult {
            base_key: group.base_key.clone(),
        },
        MergeError::Compose { source, .. } => FileWarning::MergeFailed {
            base_key: group.base_key.clone(),
            detail: source.to_string(),
        },
    };
    warn!("{}", warning);
    emitted.warnings.extend(err.warnings().iter().cloned());
    emitted.warnings.push(warning);

    let dropped = err.dropped_members();
    for member in &group.members {
        let page = &member.page;
        if dropped.contains(page.display_name.as_str()) {
            continue;
        }
        let name = names.reserve(&passthrough_name(&page.display_name));
        match emit_single(backend, page, &group.base_key, name, dir).await {
            Ok(a) => emitted.artifacts.push(a),
            Err(w) => emitted.warnings.push(w),
        }
    }
    emitted
}

/// Write one page as its own artifact.
async fn emit_single(
    backend: &PdfBackend,
    page: &PreparedPage,
    base_key: &str,
    name: String,
    dir: &Path,
) -> Result<Artifact, FileWarning> {
    let out = dir.join(&name);
    let emit_failed = |detail: String| FileWarning::EmitFailed {
        name: page.display_name.clone(),
        detail,
    };

    let page_count = match &page.content {
        PageContent::Pdf(path) => {
            tokio::fs::copy(path, &out)
                .await
                .map_err(|e| emit_failed(e.to_string()))?;
            page.page_count
        }
        PageContent::Raster(img) => backend
            .compose(vec![PageSource::Raster(img.clone())], &out)
            .await
            .map_err(|e| emit_failed(e.to_string()))?,
    };

    debug!("Emitted {} ({} pages)", name, page_count);
    Ok(Artifact {
        name,
        path: out,
        kind: ArtifactKind::Passthrough,
        base_key: base_key.to_string(),
        page_count,
        members: vec![page.display_name.clone()],
    })
}
