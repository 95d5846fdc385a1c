//! OCR capability used as an orientation signal.
//!
//! The pipeline never keeps recognised text. It asks two questions of an
//! engine: which way is this page rotated (OSD), and how much legible text
//! does this rotation produce. [`OcrEngine`] is the seam; [`TesseractCli`]
//! answers both by running the `tesseract` executable.
//!
//! Engines do not enforce timeouts themselves. Callers wrap every call in
//! `tokio::time::timeout`, and [`TesseractCli`] spawns its child with
//! `kill_on_drop` so a cancelled call does not leave a process behind.

use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Failures of a single OCR call. Every variant is recoverable by the caller.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to start OCR engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OCR engine failed: {0}")]
    Engine(String),

    #[error("Could not parse orientation from OCR output: {0}")]
    Unparseable(String),

    #[error("Could not encode image for OCR: {0}")]
    Encode(String),
}

/// An engine that can detect page orientation and recognise plain text.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Clockwise rotation in {0, 90, 180, 270} that makes `image` upright.
    ///
    /// `language` is an optional script hint such as `rus+eng`.
    async fn detect_orientation(
        &self,
        image: &DynamicImage,
        language: Option<&str>,
    ) -> Result<u32, OcrError>;

    /// Plain text recognised in `image` as-is.
    async fn recognize_text(&self, image: &DynamicImage, language: &str)
        -> Result<String, OcrError>;
}

static RE_ROTATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Rotate:\s*(\d+)").unwrap());

/// Extract the `Rotate:` angle from tesseract OSD output.
///
/// Returns `None` unless the angle is one of the four right angles.
pub fn parse_osd_rotation(output: &str) -> Option<u32> {
    let angle: u32 = RE_ROTATE.captures(output)?.get(1)?.as_str().parse().ok()?;
    matches!(angle, 0 | 90 | 180 | 270).then_some(angle)
}

/// Number of alphanumeric characters, the legibility score of a rotation.
pub fn alphanumeric_score(text: &str) -> usize {
    text.chars().filter(|c| c.is_alphanumeric()).count()
}

/// [`OcrEngine`] backed by the `tesseract` command-line program.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    program: PathBuf,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl TesseractCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Write `image` to a temporary PNG and run tesseract on it with `args`.
    async fn run(&self, image: &DynamicImage, args: &[&str]) -> Result<String, OcrError> {
        let copy = image.clone();
        let png = tokio::task::spawn_blocking(move || encode_png(&copy))
            .await
            .map_err(|e| OcrError::Encode(e.to_string()))?
            .map_err(|e| OcrError::Encode(e.to_string()))?;

        let input = tempfile::Builder::new()
            .prefix("dockit-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::Encode(e.to_string()))?
            .into_temp_path();
        tokio::fs::write(&input, &png)
            .await
            .map_err(|e| OcrError::Encode(e.to_string()))?;

        let program = self.program.display().to_string();
        debug!("Running {} on {} ({:?})", program, input.display(), args);

        let output = Command::new(&self.program)
            .arg(&*input)
            .arg("stdout")
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| OcrError::Spawn { program, source })?;

        // `input` is removed when it drops here.
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!(
                "exit status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn detect_orientation(
        &self,
        image: &DynamicImage,
        language: Option<&str>,
    ) -> Result<u32, OcrError> {
        let mut args = vec!["--psm", "0", "--oem", "3"];
        if let Some(lang) = language {
            args.extend(["-l", lang]);
        }
        let output = self.run(image, &args).await?;
        parse_osd_rotation(&output).ok_or_else(|| {
            OcrError::Unparseable(output.lines().next().unwrap_or_default().to_string())
        })
    }

    async fn recognize_text(
        &self,
        image: &DynamicImage,
        language: &str,
    ) -> Result<String, OcrError> {
        self.run(image, &["--psm", "6", "-l", language]).await
    }
}
