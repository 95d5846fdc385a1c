//! Integration tests for dockit.
//!
//! Grouping and naming tests are pure and always run. Tests that go through
//! pdfium are gated behind `PDFIUM_LIB_PATH` so they do not run where the
//! library is not installed. OCR is always stubbed.
//!
//! Run the pdfium tests with:
//!   PDFIUM_LIB_PATH=/path/to/lib cargo test --test batch -- --nocapture

use async_trait::async_trait;
use dockit::pipeline::encode::encode_png;
use dockit::pipeline::pdf::{PageSource, PdfBackend};
use dockit::{
    normalize_filename, plan, process_batch, ArtifactKind, BatchError, BatchSession,
    FileWarning, OcrEngine, OcrError, PageKeyExtractor, PipelineConfig, RawUpload,
    DEFAULT_PAGE_PATTERNS,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless a pdfium library location is configured.
macro_rules! pdfium_skip_unless_ready {
    () => {{
        if std::env::var("PDFIUM_LIB_PATH").is_err() {
            println!("SKIP: set PDFIUM_LIB_PATH to run pdfium tests");
            return;
        }
    }};
}

/// OSD always reports an upright page.
struct UprightOcr;

#[async_trait]
impl OcrEngine for UprightOcr {
    fn name(&self) -> &str {
        "upright"
    }

    async fn detect_orientation(
        &self,
        _image: &DynamicImage,
        _language: Option<&str>,
    ) -> Result<u32, OcrError> {
        Ok(0)
    }

    async fn recognize_text(
        &self,
        _image: &DynamicImage,
        _language: &str,
    ) -> Result<String, OcrError> {
        Ok(String::new())
    }
}

/// OSD reports a quarter turn for landscape images, upright otherwise.
struct LandscapeIsSideways;

#[async_trait]
impl OcrEngine for LandscapeIsSideways {
    fn name(&self) -> &str {
        "landscape"
    }

    async fn detect_orientation(
        &self,
        image: &DynamicImage,
        _language: Option<&str>,
    ) -> Result<u32, OcrError> {
        Ok(if image.width() > image.height() { 90 } else { 0 })
    }

    async fn recognize_text(
        &self,
        _image: &DynamicImage,
        _language: &str,
    ) -> Result<String, OcrError> {
        Ok(String::new())
    }
}

fn page_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([250, 250, 250]));
    encode_png(&DynamicImage::ImageRgb8(img)).expect("encode")
}

fn config(root: &Path, engine: Arc<dyn OcrEngine>) -> PipelineConfig {
    PipelineConfig::builder()
        .temp_root(root)
        .ocr_engine(engine)
        .concurrency(2)
        .build()
        .expect("config")
}

/// Route library logs to the test harness; `RUST_LOG` picks the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A PDF with one blank page per `(width, height)` raster, at 300 DPI.
async fn pdf_with_pages(sizes: &[(u32, u32)], dir: &Path) -> Vec<u8> {
    let backend = PdfBackend::new(None, 2000, 300.0);
    let path = dir.join(format!("fixture-{}.pdf", sizes.len()));
    let sources = sizes
        .iter()
        .map(|&(w, h)| PageSource::Raster(DynamicImage::new_rgb8(w, h)))
        .collect();
    backend.compose(sources, &path).await.expect("compose fixture");
    std::fs::read(path).expect("read fixture")
}

async fn pdf_bytes(pages: usize, dir: &Path) -> Vec<u8> {
    pdf_with_pages(&vec![(600, 800); pages], dir).await
}

// ── Pure grouping tests ──────────────────────────────────────────────────────

#[test]
fn test_report_pages_merge_and_statement_passes_through() {
    let extractor = PageKeyExtractor::new(DEFAULT_PAGE_PATTERNS).unwrap();
    let raw = ["Report No1 p.2.jpg", "Report No1 p.1.jpg", "Statement.pdf"];
    let mut names = Default::default();
    let planned = plan(
        &extractor,
        raw.iter().map(|r| (normalize_filename(r).display, *r)),
        &mut names,
    );

    let artifact_names: Vec<_> = planned.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(artifact_names, vec!["Report No1.pdf", "Statement.pdf"]);
    assert_eq!(planned[0].kind(), ArtifactKind::Merged);
    assert_eq!(planned[0].group.page_numbers(), vec![Some(1), Some(2)]);
    let members: Vec<_> = planned[0].group.members.iter().map(|m| m.page).collect();
    assert_eq!(members, vec!["Report No1 p.1.jpg", "Report No1 p.2.jpg"]);
}

#[test]
fn test_garbled_cyrillic_pages_group_after_repair() {
    // UTF-8 names viewed through CP437, as old zip tools produce them.
    let p1 = "╨ö╨╛╨│╨╛╨▓╨╛╤Ç_╤ü╤é╤Ç.1.jpg";
    let p2 = "╨ö╨╛╨│╨╛╨▓╨╛╤Ç_╤ü╤é╤Ç.2.jpg";
    assert_eq!(normalize_filename(p1).display, "Договор стр.1.jpg");

    let extractor = PageKeyExtractor::new(DEFAULT_PAGE_PATTERNS).unwrap();
    let mut names = Default::default();
    let planned = plan(
        &extractor,
        [p2, p1].iter().map(|r| (normalize_filename(r).display, ())),
        &mut names,
    );
    assert_eq!(planned.len(), 1);
    assert_eq!(planned[0].name, "Договор.pdf");
    assert_eq!(planned[0].group.page_numbers(), vec![Some(1), Some(2)]);
}

#[test]
fn test_normalizer_is_idempotent_on_mixed_inputs() {
    for raw in [
        "Report_No1_p.2.jpg",
        "Акт 01 02 2024 г.pdf",
        "╨ö╨╛╨│╨╛╨▓╨╛╤Ç.pdf",
        "plain.png",
        "trailing_-.pdf",
    ] {
        let once = normalize_filename(raw).display;
        let twice = normalize_filename(&once).display;
        assert_eq!(once, twice, "input {raw:?}");
    }
}

#[test]
fn test_cancelled_session_stops_before_work() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), Arc::new(UprightOcr));
    let session = BatchSession::begin(5, &config).unwrap();
    let workspace = session.workspace().to_path_buf();
    session.cancel();

    let uploads = vec![RawUpload::new("a.png", page_png(200, 300))];
    let err = tokio_test::block_on(process_batch(&session, uploads, &config)).unwrap_err();
    assert!(matches!(err, BatchError::Cancelled { user_id: 5 }));

    drop(session);
    assert!(!workspace.exists());
    assert!(!root.path().join("5").exists());
}

// ── pdfium tests ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_batch_merges_and_orders() {
    pdfium_skip_unless_ready!();
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), Arc::new(UprightOcr));
    let session = BatchSession::begin(1, &config).unwrap();

    let uploads = vec![
        RawUpload::new("Report No1 p.2.png", page_png(400, 600)),
        RawUpload::new("Report No1 p.1.png", page_png(400, 600)),
        RawUpload::new("Statement.pdf", pdf_bytes(3, root.path()).await),
    ];
    let output = process_batch(&session, uploads, &config).await.unwrap();

    let names: Vec<_> = output.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Report No1.pdf", "Statement.pdf"]);
    assert_eq!(output.artifacts[0].kind, ArtifactKind::Merged);
    assert_eq!(output.artifacts[0].page_count, 2);
    assert_eq!(
        output.artifacts[0].members,
        vec!["Report No1 p.1.png", "Report No1 p.2.png"]
    );
    assert_eq!(output.artifacts[1].page_count, 3);
    assert_eq!(
        output.render_inventory(),
        "1. Report No1.pdf\n2. Statement.pdf"
    );

    let out = tempfile::tempdir().unwrap();
    let written = output.persist_to(out.path()).unwrap();
    for path in written {
        assert!(std::fs::read(path).unwrap().starts_with(b"%PDF"));
    }

    drop(session);
    assert!(output.artifact_dir().exists());
    drop(output);
    assert!(!root.path().join("1").exists());
}

#[tokio::test]
async fn test_merged_page_total_includes_pdf_members() {
    pdfium_skip_unless_ready!();
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), Arc::new(UprightOcr));
    let session = BatchSession::begin(2, &config).unwrap();

    let uploads = vec![
        RawUpload::new("Contract page 2.pdf", pdf_bytes(2, root.path()).await),
        RawUpload::new("Contract page 1.png", page_png(400, 600)),
    ];
    let output = process_batch(&session, uploads, &config).await.unwrap();
    assert_eq!(output.artifacts.len(), 1);
    assert_eq!(output.artifacts[0].name, "Contract.pdf");
    assert_eq!(output.artifacts[0].page_count, 3);
    assert_eq!(output.stats.merged_groups, 1);
}

#[tokio::test]
async fn test_bad_files_become_warnings() {
    pdfium_skip_unless_ready!();
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), Arc::new(UprightOcr));
    let session = BatchSession::begin(3, &config).unwrap();

    let uploads = vec![
        RawUpload::new("notes.gif", b"GIF89a".to_vec()),
        RawUpload::new("fake.pdf", b"<html></html>".to_vec()),
        RawUpload::new("photo.jpg", b"\xff\xd8\xff truncated".to_vec()),
        RawUpload::new("good.png", page_png(300, 400)),
    ];
    let output = process_batch(&session, uploads, &config).await.unwrap();

    assert_eq!(output.artifacts.len(), 1);
    assert_eq!(output.artifacts[0].name, "good.pdf");
    assert_eq!(output.stats.skipped_files, 3);
    assert!(output.has_skips());
    assert!(output
        .warnings
        .iter()
        .any(|w| matches!(w, FileWarning::UnsupportedFormat { extension, .. } if extension == "gif")));
    assert!(output
        .warnings
        .iter()
        .any(|w| matches!(w, FileWarning::Unreadable { name, .. } if name == "fake.pdf")));
}

#[tokio::test]
async fn test_all_files_bad_is_total_failure() {
    pdfium_skip_unless_ready!();
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), Arc::new(UprightOcr));
    let session = BatchSession::begin(4, &config).unwrap();

    let uploads = vec![
        RawUpload::new("a.gif", b"GIF89a".to_vec()),
        RawUpload::new("b.docx", b"PK".to_vec()),
    ];
    let err = process_batch(&session, uploads, &config).await.unwrap_err();
    match err {
        BatchError::TotalProcessingFailure { total, first_error } => {
            assert_eq!(total, 2);
            assert!(first_error.contains("a.gif"), "got {first_error}");
        }
        other => panic!("expected total failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sideways_photo_is_rotated_and_kept_as_derived_file() {
    pdfium_skip_unless_ready!();
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), Arc::new(LandscapeIsSideways));
    let session = BatchSession::begin(6, &config).unwrap();

    let uploads = vec![RawUpload::new("receipt.png", page_png(600, 400))];
    let output = process_batch(&session, uploads, &config).await.unwrap();
    assert_eq!(output.stats.rotated_pages, 1);
    assert!(session.corrected_dir().join("receipt_corrected.png").exists());

    let derived = image::open(session.corrected_dir().join("receipt_corrected.png")).unwrap();
    assert_eq!((derived.width(), derived.height()), (400, 600));
}

#[tokio::test]
async fn test_sideways_page_inside_pdf_member_is_reencoded() {
    pdfium_skip_unless_ready!();
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), Arc::new(LandscapeIsSideways));
    let session = BatchSession::begin(7, &config).unwrap();

    let uploads = vec![
        RawUpload::new(
            "Scan p.1.pdf",
            pdf_with_pages(&[(800, 600), (600, 800)], root.path()).await,
        ),
        RawUpload::new("Scan p.2.png", page_png(400, 600)),
    ];
    let output = process_batch(&session, uploads, &config).await.unwrap();

    assert_eq!(output.artifacts.len(), 1);
    assert_eq!(output.artifacts[0].name, "Scan.pdf");
    assert_eq!(output.artifacts[0].page_count, 3);
    assert_eq!(output.stats.rotated_pages, 1);

    let backend = PdfBackend::new(None, 2000, 300.0);
    let pages = backend.render(&output.artifacts[0].path).await.unwrap();
    assert_eq!(pages.len(), 3);
    for (i, page) in pages.iter().enumerate() {
        assert!(page.height() > page.width(), "page {} is landscape", i + 1);
    }
}

#[tokio::test]
async fn test_hostile_name_keeps_derived_file_in_workspace() {
    pdfium_skip_unless_ready!();
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), Arc::new(LandscapeIsSideways));
    let session = BatchSession::begin(8, &config).unwrap();

    let uploads = vec![RawUpload::new("../../../escaped.png", page_png(600, 400))];
    let output = process_batch(&session, uploads, &config).await.unwrap();
    assert_eq!(output.stats.rotated_pages, 1);

    let derived: Vec<_> = std::fs::read_dir(session.corrected_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(derived, vec![".._.._.._escaped_corrected.png"]);
    assert!(!root.path().join("escaped_corrected.png").exists());
    assert!(output.artifacts[0].path.starts_with(output.artifact_dir()));
}

