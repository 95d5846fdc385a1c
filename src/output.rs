//! Batch output types: artifacts, inventory, warnings and stats.

use crate::error::FileWarning;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// How an artifact was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A single upload, converted to PDF when it was an image.
    Passthrough,
    /// Two or more uploads concatenated in page order.
    Merged,
}

/// One final PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// File name, unique within the batch.
    pub name: String,
    /// Location inside the artifact directory of the owning [`BatchOutput`].
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub base_key: String,
    pub page_count: usize,
    /// Display names of the uploads that went into this artifact, in order.
    pub members: Vec<String>,
}

/// One line of the inventory shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// 1-based.
    pub position: usize,
    pub display_name: String,
}

/// Aggregate numbers for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_files: usize,
    pub processed_files: usize,
    pub skipped_files: usize,
    pub renamed_files: usize,
    pub rotated_pages: usize,
    pub merged_groups: usize,
    pub artifact_count: usize,
    pub total_duration_ms: u64,
}

/// Everything a batch produced.
///
/// Artifacts live in a temporary directory owned by this value; copy them
/// out with [`persist_to`](Self::persist_to) before dropping it.
#[derive(Debug, Serialize)]
pub struct BatchOutput {
    pub artifacts: Vec<Artifact>,
    pub inventory: Vec<InventoryEntry>,
    pub warnings: Vec<FileWarning>,
    pub stats: BatchStats,
    #[serde(skip)]
    pub(crate) artifact_dir: TempDir,
}

impl BatchOutput {
    pub fn artifact_dir(&self) -> &Path {
        self.artifact_dir.path()
    }

    /// `1. Name.pdf` lines, one per artifact.
    pub fn render_inventory(&self) -> String {
        render_inventory(&self.inventory)
    }

    /// Copy every artifact into `dir`, returning the new paths in order.
    pub fn persist_to(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut paths = Vec::with_capacity(self.artifacts.len());
        for artifact in &self.artifacts {
            let dest = dir.join(&artifact.name);
            std::fs::copy(&artifact.path, &dest)?;
            debug!("Persisted {} → {}", artifact.name, dest.display());
            paths.push(dest);
        }
        Ok(paths)
    }

    /// Whether any upload was dropped.
    pub fn has_skips(&self) -> bool {
        self.warnings.iter().any(FileWarning::is_skip)
    }
}

impl Drop for BatchOutput {
    fn drop(&mut self) {
        let dir = self.artifact_dir.path();
        if std::fs::remove_dir_all(dir).is_ok() {
            if let Some(user_root) = dir.parent() {
                crate::session::remove_if_empty(user_root);
            }
        }
    }
}

pub fn render_inventory(entries: &[InventoryEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}. {}", e.position, e.display_name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the inventory from artifacts in output order.
pub fn inventory_for(artifacts: &[Artifact]) -> Vec<InventoryEntry> {
    artifacts
        .iter()
        .enumerate()
        .map(|(i, a)| InventoryEntry {
            position: i + 1,
            display_name: a.name.clone(),
        })
        .collect()
}

/// Reserve `name` in `used`, appending ` (2)`, ` (3)`, … before the
/// extension on collision. Comparison ignores case.
pub(crate) fn unique_name(used: &mut HashSet<String>, name: &str) -> String {
    if used.insert(name.to_lowercase()) {
        return name.to_string();
    }
    let (stem, ext) = crate::pipeline::filename::split_extension(name);
    let mut n = 2;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if used.insert(candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str, dir: &Path) -> Artifact {
        Artifact {
            name: name.into(),
            path: dir.join(name),
            kind: ArtifactKind::Passthrough,
            base_key: name.trim_end_matches(".pdf").into(),
            page_count: 1,
            members: vec![name.into()],
        }
    }

    #[test]
    fn test_inventory_is_one_based_and_ordered() {
        let dir = Path::new("/x");
        let inv = inventory_for(&[artifact("Report No1.pdf", dir), artifact("Statement.pdf", dir)]);
        assert_eq!(inv[0].position, 1);
        assert_eq!(render_inventory(&inv), "1. Report No1.pdf\n2. Statement.pdf");
    }

    #[test]
    fn test_unique_name_suffixes_before_extension() {
        let mut used = HashSet::new();
        assert_eq!(unique_name(&mut used, "Scan.pdf"), "Scan.pdf");
        assert_eq!(unique_name(&mut used, "scan.PDF"), "scan (2).PDF");
        assert_eq!(unique_name(&mut used, "Scan.pdf"), "Scan (3).pdf");
    }

    #[test]
    fn test_persist_copies_artifacts() {
        let artifact_dir = tempfile::tempdir().unwrap();
        std::fs::write(artifact_dir.path().join("A.pdf"), b"%PDF-a").unwrap();
        let a = artifact("A.pdf", artifact_dir.path());
        let output = BatchOutput {
            inventory: inventory_for(std::slice::from_ref(&a)),
            artifacts: vec![a],
            warnings: vec![],
            stats: BatchStats::default(),
            artifact_dir,
        };

        let dest = tempfile::tempdir().unwrap();
        let paths = output.persist_to(&dest.path().join("out")).unwrap();
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"%PDF-a");
        assert!(!output.has_skips());

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["artifacts"][0]["kind"], "passthrough");
        assert!(json.get("artifact_dir").is_none());
    }
}
