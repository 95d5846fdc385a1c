//! Error types for the dockit library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BatchError`] is **fatal**: the batch cannot produce anything at all
//!   (every file failed, the workspace could not be created, the batch was
//!   cancelled). Returned as `Err(BatchError)` from [`crate::batch::process_batch`].
//!
//! * [`FileWarning`] is **non-fatal**: one file or one group degraded or was
//!   skipped, but the rest of the batch is fine. Collected into
//!   [`crate::output::BatchOutput::warnings`] so the user receives the partial
//!   artifact set together with a readable list of what went wrong.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the dockit library.
///
/// Per-file failures use [`FileWarning`] and are collected in
/// [`crate::output::BatchOutput`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Zero files in the batch were processed successfully.
    #[error("None of the {total} files could be processed.\nFirst error: {first_error}")]
    TotalProcessingFailure { total: usize, first_error: String },

    /// The caller cancelled the batch before it completed.
    #[error("Batch for user {user_id} was cancelled")]
    Cancelled { user_id: u64 },

    /// The per-user workspace could not be created or written.
    #[error("Workspace error at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH (or --pdfium-lib) to the directory containing libpdfium."
    )]
    PdfiumBindingFailed(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal problem with a single file or group.
///
/// Stored in [`crate::output::BatchOutput::warnings`]. The batch continues
/// unless every file fails.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum FileWarning {
    /// The name looked corrupted but no recovery strategy changed it.
    #[error("'{name}': file name looks corrupted and could not be repaired")]
    NameDecodeFailure { name: String },

    /// The name is usable but suspicious (too long, no extension, bad chars).
    #[error("'{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Extension is not in the allow-list.
    #[error("'{name}': unsupported format '{extension}'")]
    UnsupportedFormat { name: String, extension: String },

    /// Declared or actual size exceeds the per-file ceiling.
    #[error("'{name}': {size} bytes exceeds the {limit}-byte limit")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    /// Bytes could not be decoded as the declared format.
    #[error("'{name}': unreadable: {detail}")]
    Unreadable { name: String, detail: String },

    /// Orientation could not be determined; the page was kept unrotated.
    #[error("'{name}': orientation not detected, kept as-is: {detail}")]
    OrientationDetectionFailure { name: String, detail: String },

    /// No member of a group produced a mergeable page.
    #[error("'{base_key}': no readable pages to merge, emitting pages individually")]
    EmptyMergeResult { base_key: String },

    /// The merge failed for a reason other than an empty page list.
    #[error("'{base_key}': merge failed, emitting pages individually: {detail}")]
    MergeFailed { base_key: String, detail: String },

    /// A single artifact could not be written to the artifact directory.
    #[error("'{name}': could not write artifact: {detail}")]
    EmitFailed { name: String, detail: String },
}

impl FileWarning {
    /// Whether this warning means the file contributed nothing to the output.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            FileWarning::UnsupportedFormat { .. }
                | FileWarning::FileTooLarge { .. }
                | FileWarning::Unreadable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_failure_display() {
        let e = BatchError::TotalProcessingFailure {
            total: 3,
            first_error: "'a.gif': unsupported format 'gif'".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 files"), "got: {msg}");
        assert!(msg.contains("a.gif"));
    }

    #[test]
    fn cancelled_display() {
        let e = BatchError::Cancelled { user_id: 42 };
        assert!(e.to_string().contains("42"));
    }

    #[test]
    fn too_large_display() {
        let w = FileWarning::FileTooLarge {
            name: "scan.png".into(),
            size: 60,
            limit: 50,
        };
        assert!(w.to_string().contains("scan.png"));
        assert!(w.to_string().contains("50-byte"));
    }

    #[test]
    fn skip_classification() {
        assert!(FileWarning::Unreadable {
            name: "x.pdf".into(),
            detail: "bad magic".into()
        }
        .is_skip());
        assert!(!FileWarning::EmptyMergeResult {
            base_key: "Report".into()
        }
        .is_skip());
    }

    #[test]
    fn warning_serialises() {
        let w = FileWarning::NameDecodeFailure { name: "╨x".into() };
        let json = serde_json::to_string(&w).expect("serialise");
        assert!(json.contains("NameDecodeFailure"));
    }
}
