//! Upload intake: validate raw uploads and stage them in the batch workspace.
//!
//! pdfium requires a file-system path, so every accepted upload is written
//! under the session workspace before any PDF work. Validation happens
//! first: allow-list, size ceiling, then content checks (`%PDF` magic for
//! PDFs, a full decode for images) so a renamed or truncated file is
//! reported as unreadable instead of failing deep inside pdfium.

use crate::config::PipelineConfig;
use crate::error::FileWarning;
use crate::pipeline::filename::split_extension;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One file exactly as the transport delivered it.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub bytes: Vec<u8>,
    pub raw_name: String,
    /// Size announced by the transport, which may precede the download.
    pub declared_size: u64,
    /// Extension announced by the transport, without a dot.
    pub declared_extension: Option<String>,
}

impl RawUpload {
    /// An upload whose declared size and extension come from its own content.
    pub fn new(raw_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            declared_size: bytes.len() as u64,
            bytes,
            raw_name: raw_name.into(),
            declared_extension: None,
        }
    }

    pub fn with_declared_extension(mut self, ext: impl Into<String>) -> Self {
        self.declared_extension = Some(ext.into());
        self
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = size;
        self
    }

    /// Read a local file as an upload named after its file name.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, bytes))
    }
}

/// How an accepted upload is handled downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Image,
}

/// Lower-case extension: the declared one, else the one in `display_name`.
pub fn effective_extension(upload: &RawUpload, display_name: &str) -> String {
    upload
        .declared_extension
        .as_deref()
        .map(|e| e.trim_start_matches('.').to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| {
            split_extension(display_name)
                .1
                .trim_start_matches('.')
                .to_string()
        })
        .to_lowercase()
}

/// Apply allow-list and size checks, then sniff PDF content.
///
/// Images are only classified here; they are decoded by [`decode_image`].
pub fn classify(
    upload: &RawUpload,
    display_name: &str,
    config: &PipelineConfig,
) -> Result<SourceKind, FileWarning> {
    let ext = effective_extension(upload, display_name);
    if ext.is_empty() || !config.is_supported_extension(&ext) {
        return Err(FileWarning::UnsupportedFormat {
            name: display_name.to_string(),
            extension: ext,
        });
    }

    let size = upload.declared_size.max(upload.bytes.len() as u64);
    if size > config.max_file_size {
        return Err(FileWarning::FileTooLarge {
            name: display_name.to_string(),
            size,
            limit: config.max_file_size,
        });
    }

    if ext == "pdf" {
        if !upload.bytes.starts_with(b"%PDF") {
            let magic: Vec<u8> = upload.bytes.iter().take(4).copied().collect();
            return Err(FileWarning::Unreadable {
                name: display_name.to_string(),
                detail: format!("not a PDF (magic bytes {:?})", magic),
            });
        }
        return Ok(SourceKind::Pdf);
    }
    Ok(SourceKind::Image)
}

/// Decode image bytes, mapping failures to [`FileWarning::Unreadable`].
pub fn decode_image(bytes: &[u8], display_name: &str) -> Result<DynamicImage, FileWarning> {
    image::load_from_memory(bytes).map_err(|e| FileWarning::Unreadable {
        name: display_name.to_string(),
        detail: e.to_string(),
    })
}

/// Write the upload to `dir` under a sequence-prefixed name.
pub async fn stage_upload(
    dir: &Path,
    index: usize,
    extension: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    let path = dir.join(format!("upload_{index:04}.{extension}"));
    tokio::fs::write(&path, bytes).await?;
    debug!("Staged upload #{} at {}", index, path.display());
    Ok(path)
}
