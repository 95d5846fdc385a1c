//! # dockit
//!
//! Turn a batch of phone photos and scanner output into a tidy set of PDFs.
//!
//! ## Why this crate?
//!
//! Documents arrive one sheet per file, under names mangled by whatever
//! archiver or messenger carried them (`╨ö╨╛╨│╨╛╨▓╨╛╤Ç_╤ü╤é╤Ç.2.jpg`), and
//! half the photos are sideways. This crate repairs the names, works out
//! which files are pages of the same document, turns every page upright and
//! concatenates each document into one PDF, returning an ordered inventory.
//!
//! ## Pipeline Overview
//!
//! ```text
//! uploads
//!  │
//!  ├─ 1. Intake     allow-list, size ceiling, magic bytes
//!  ├─ 2. Names      mojibake repair + cosmetic clean-up
//!  ├─ 3. Orient     EXIF → tesseract OSD chain → legibility heuristic
//!  ├─ 4. Group      page markers (`стр.2`, `p.1`, `page 3`) → base key
//!  ├─ 5. Merge      pdfium: re-check PDF pages, concatenate in order
//!  └─ 6. Output     artifacts + `1. Name.pdf` inventory + warnings
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dockit::{process_batch, BatchSession, PipelineConfig, RawUpload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let session = BatchSession::begin(42, &config)?;
//!     let uploads = vec![
//!         RawUpload::new("Report p.2.jpg", std::fs::read("Report p.2.jpg")?),
//!         RawUpload::new("Report p.1.jpg", std::fs::read("Report p.1.jpg")?),
//!     ];
//!     let output = process_batch(&session, uploads, &config).await?;
//!     println!("{}", output.render_inventory());
//!     output.persist_to(std::path::Path::new("out"))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `dockit` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! dockit = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime Requirements
//!
//! * a pdfium shared library (`PDFIUM_LIB_PATH`, the working directory or
//!   the system library path);
//! * `tesseract` with the `osd`, `rus` and `eng` traineddata, unless a custom
//!   [`OcrEngine`] is supplied through [`PipelineConfigBuilder::ocr_engine`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod ocr;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{plan, process_batch, process_batch_sync, PreparedPage};
pub use config::{PipelineConfig, PipelineConfigBuilder, DEFAULT_PAGE_PATTERNS};
pub use error::{BatchError, FileWarning};
pub use ocr::{OcrEngine, OcrError, TesseractCli};
pub use output::{Artifact, ArtifactKind, BatchOutput, BatchStats, InventoryEntry};
pub use pipeline::filename::{normalize_filename, NormalizedName, RepairOutcome};
pub use pipeline::group::{group_pages, DocumentGroup};
pub use pipeline::input::RawUpload;
pub use pipeline::orientation::OrientationCorrector;
pub use pipeline::page_key::{PageKey, PageKeyExtractor};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{BatchSession, CancelHandle};
