//! CLI binary for dockit.
//!
//! A thin shim over the library crate: reads files from disk as uploads,
//! maps CLI flags to `PipelineConfig`, runs one batch and copies the
//! artifacts to the output directory.

use anyhow::{Context, Result};
use clap::Parser;
use dockit::{
    process_batch, BatchProgressCallback, BatchSession, PipelineConfig, ProgressCallback,
    RawUpload,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar with one log line per file. Files finish out of order
/// when `--concurrency` > 1, so lines carry the batch index.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.reset_eta();
    }

    fn on_file_start(&self, _index: usize, _total: usize, raw_name: &str) {
        self.bar.set_message(raw_name.to_string());
    }

    fn on_file_complete(&self, index: usize, total: usize, display_name: &str) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}",
            green("✓"),
            index,
            total,
            display_name
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}",
            red("✗"),
            index,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_files: usize, artifact_count: usize) {
        self.bar.finish_and_clear();
        let skipped = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} files → {} documents{}",
            if skipped == 0 { green("✔") } else { yellow("⚠") },
            bold(&total_files.to_string()),
            bold(&artifact_count.to_string()),
            if skipped > 0 {
                format!("  ({} skipped)", red(&skipped.to_string()))
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge scanned pages into documents under ./out
  dockit scans/*.jpg scans/*.pdf -o out

  # Machine-readable report
  dockit --json inbox/* -o out > report.json

  # Use a pdfium build from a custom location
  dockit --pdfium-lib /opt/pdfium/lib scans/*

FILE NAMES:
  Pages of one document are recognised by a page marker in the name:
    "Договор стр.1.jpg", "Договор стр.2.jpg"  →  "Договор.pdf"
    "Report p.1.png",   "Report p.2.pdf"     →  "Report.pdf"
  Names garbled by legacy-codepage archivers (╨ö╨╛╨│...) are repaired.

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH   Directory containing libpdfium
  RUST_LOG          Override the log filter (e.g. dockit=debug)

REQUIREMENTS:
  tesseract with the osd, rus and eng language data on PATH (or --tesseract).
"#;

/// Normalise scanned documents into oriented, ordered, merged PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "dockit",
    version,
    about = "Normalise scanned documents into oriented, ordered, merged PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image and PDF files forming one batch, in batch order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory the artifacts are copied to.
    #[arg(short, long, env = "DOCKIT_OUTPUT", default_value = "dockit-out")]
    output: PathBuf,

    /// Owner of the batch; selects the workspace directory.
    #[arg(long, env = "DOCKIT_USER_ID", default_value_t = 0)]
    user_id: u64,

    /// Number of files processed at once.
    #[arg(short, long, env = "DOCKIT_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Per-file size ceiling in MiB.
    #[arg(long, env = "DOCKIT_MAX_FILE_MB", default_value_t = 50)]
    max_file_mb: u64,

    /// Timeout of each orientation-detection call, in seconds.
    #[arg(long, env = "DOCKIT_OCR_TIMEOUT", default_value_t = 120)]
    ocr_timeout: u64,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Path to the tesseract executable.
    #[arg(long, env = "DOCKIT_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Root directory for per-user workspaces.
    #[arg(long, env = "DOCKIT_TEMP_ROOT")]
    temp_root: Option<PathBuf>,

    /// Print the BatchOutput as JSON instead of the inventory.
    #[arg(long, env = "DOCKIT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCKIT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCKIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCKIT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose asks for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Read uploads ─────────────────────────────────────────────────────
    let mut uploads = Vec::with_capacity(cli.inputs.len());
    for path in &cli.inputs {
        let upload = RawUpload::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        uploads.push(upload);
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run batch ────────────────────────────────────────────────────────
    let session = BatchSession::begin(cli.user_id, &config).context("Failed to start session")?;
    let output = process_batch(&session, uploads, &config)
        .await
        .context("Batch failed")?;
    drop(session);

    let written = output
        .persist_to(&cli.output)
        .with_context(|| format!("Failed to write artifacts to {}", cli.output.display()))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    println!("{}", output.render_inventory());

    if !cli.quiet {
        for warning in &output.warnings {
            eprintln!("  {} {}", yellow("⚠"), warning);
        }
        eprintln!(
            "{}",
            dim(&format!(
                "{} files written to {} in {}ms",
                written.len(),
                cli.output.display(),
                output.stats.total_duration_ms
            ))
        );
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .concurrency(cli.concurrency)
        .max_file_size(cli.max_file_mb.saturating_mul(1024 * 1024))
        .ocr_timeout_secs(cli.ocr_timeout)
        .tesseract_path(&cli.tesseract);

    if let Some(ref dir) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(dir);
    }
    if let Some(ref dir) = cli.temp_root {
        builder = builder.temp_root(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
