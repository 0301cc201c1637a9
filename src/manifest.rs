//! Manifest store for incremental generation
//!
//! Stores the section hash of every generated file in a hidden JSON file
//! inside the output directory, so later runs can skip files whose inputs
//! did not change.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::{FileDescriptor, FileType};

pub const MANIFEST_FILE: &str = ".sdkgen-manifest.json";
pub const MANIFEST_VERSION: u32 = 1;

/// Tracks a single generated file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionEntry {
    /// Section hash the file was generated from
    pub content_hash: String,
    pub output_path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub order: u32,
    /// RFC 3339 timestamp of the last generation
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: u32,
    pub spec_hash: String,
    pub instructions_hash: String,
    /// Maps: file id -> SectionEntry
    pub sections: BTreeMap<String, SectionEntry>,
}

impl Manifest {
    pub fn new(spec_hash: impl Into<String>, instructions_hash: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            spec_hash: spec_hash.into(),
            instructions_hash: instructions_hash.into(),
            sections: BTreeMap::new(),
        }
    }

    /// Path of the manifest inside `output_dir`
    pub fn path(output_dir: &Path) -> PathBuf {
        output_dir.join(MANIFEST_FILE)
    }

    /// Load the manifest from `output_dir`.
    ///
    /// A missing, unreadable or corrupt manifest reads as `None`, which the
    /// caller treats as a first run.
    pub fn read(output_dir: &Path) -> Option<Self> {
        let path = Self::path(output_dir);
        let content = fs::read_to_string(&path).ok()?;

        match serde_json::from_str::<Manifest>(&content) {
            Ok(manifest) if manifest.version == MANIFEST_VERSION => Some(manifest),
            Ok(manifest) => {
                tracing::debug!(
                    path = %path.display(),
                    version = manifest.version,
                    "ignoring manifest with unsupported version"
                );
                None
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "ignoring corrupt manifest");
                None
            }
        }
    }

    /// Save the manifest to `output_dir`.
    ///
    /// The content goes to a temporary sibling first and is renamed into place,
    /// so an interrupted write never leaves a half-written manifest behind.
    pub fn write(&self, output_dir: &Path) -> Result<()> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let path = Self::path(output_dir);
        let tmp_path = output_dir.join(format!("{}.tmp", MANIFEST_FILE));

        let mut content =
            serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        content.push('\n');

        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to move manifest into {}", path.display()))?;

        Ok(())
    }

    /// Delete the manifest. Returns whether one existed.
    pub fn remove(output_dir: &Path) -> Result<bool> {
        let path = Self::path(output_dir);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(true)
    }

    /// True when this manifest was written for exactly these inputs.
    pub fn matches(&self, spec_hash: &str, instructions_hash: &str) -> bool {
        self.spec_hash == spec_hash && self.instructions_hash == instructions_hash
    }

    /// True when every recorded output still exists under `output_dir`
    pub fn outputs_present(&self, output_dir: &Path) -> bool {
        self.sections
            .values()
            .all(|entry| output_dir.join(&entry.output_path).is_file())
    }

    pub fn section(&self, id: &str) -> Option<&SectionEntry> {
        self.sections.get(id)
    }

    /// Record a freshly generated file
    pub fn record(&mut self, file: &FileDescriptor, content_hash: &str) {
        let generated_at = chrono::Utc::now().to_rfc3339();
        self.sections.insert(
            file.id.clone(),
            SectionEntry {
                content_hash: content_hash.to_string(),
                output_path: file.output_path.clone(),
                file_type: file.file_type,
                order: file.order,
                generated_at,
            },
        );
    }

    /// Carry an entry over unchanged from a previous manifest
    pub fn keep(&mut self, id: &str, entry: SectionEntry) {
        self.sections.insert(id.to_string(), entry);
    }

    /// Get a summary of tracked files
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push("Manifest Summary:".to_string());
        lines.push(format!("  spec hash:         {}", short_hash(&self.spec_hash)));
        lines.push(format!(
            "  instructions hash: {}",
            short_hash(&self.instructions_hash)
        ));

        let mut by_order: BTreeMap<u32, Vec<(&String, &SectionEntry)>> = BTreeMap::new();
        for (id, entry) in &self.sections {
            by_order.entry(entry.order).or_default().push((id, entry));
        }

        for (order, entries) in by_order {
            lines.push(format!("\norder {}:", order));
            for (id, entry) in entries {
                lines.push(format!(
                    "  {} [{}] -> {} (generated: {})",
                    id, entry.file_type, entry.output_path, entry.generated_at
                ));
            }
        }

        if self.sections.is_empty() {
            lines.push("  No tracked files".to_string());
        }

        lines.join("\n")
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, path: &str) -> FileDescriptor {
        FileDescriptor {
            id: id.to_string(),
            output_path: path.to_string(),
            file_type: FileType::Types,
            description: String::new(),
            related_tags: None,
            related_schemas: None,
            order: 1,
        }
    }

    #[test]
    fn read_missing_manifest_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(Manifest::read(dir.path()).is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manifest = Manifest::new("spec", "instr");
        manifest.record(&descriptor("types", "src/types.ts"), "abc123");

        manifest.write(dir.path()).expect("write manifest");

        let loaded = Manifest::read(dir.path()).expect("manifest present");
        assert_eq!(loaded, manifest);
        assert!(!dir.path().join(format!("{}.tmp", MANIFEST_FILE)).exists());
    }

    #[test]
    fn outputs_present_requires_every_recorded_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manifest = Manifest::new("s", "i");
        manifest.record(&descriptor("types", "src/types.ts"), "h1");
        manifest.record(&descriptor("index", "src/index.ts"), "h2");

        fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        fs::write(dir.path().join("src/types.ts"), "x").expect("write");
        assert!(!manifest.outputs_present(dir.path()));

        fs::write(dir.path().join("src/index.ts"), "y").expect("write");
        assert!(manifest.outputs_present(dir.path()));
    }

    #[test]
    fn persisted_shape_uses_camel_case() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut manifest = Manifest::new("s", "i");
        manifest.record(&descriptor("types", "src/types.ts"), "h");
        manifest.write(dir.path()).expect("write manifest");

        let raw = fs::read_to_string(Manifest::path(dir.path())).expect("read raw");
        assert!(raw.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["version"], 1);
        assert_eq!(value["specHash"], "s");
        assert_eq!(value["instructionsHash"], "i");
        let entry = &value["sections"]["types"];
        assert_eq!(entry["contentHash"], "h");
        assert_eq!(entry["outputPath"], "src/types.ts");
        assert_eq!(entry["type"], "types");
        assert_eq!(entry["order"], 1);
        assert!(entry["generatedAt"].is_string());
    }

    #[test]
    fn corrupt_or_foreign_manifest_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(Manifest::path(dir.path()), "{ not json").expect("write");
        assert!(Manifest::read(dir.path()).is_none());

        fs::write(
            Manifest::path(dir.path()),
            r#"{"version":2,"specHash":"a","instructionsHash":"b","sections":{}}"#,
        )
        .expect("write");
        assert!(Manifest::read(dir.path()).is_none());
    }

    #[test]
    fn matches_requires_both_hashes() {
        let manifest = Manifest::new("spec", "instr");
        assert!(manifest.matches("spec", "instr"));
        assert!(!manifest.matches("spec", "other"));
        assert!(!manifest.matches("other", "instr"));
    }

    #[test]
    fn remove_reports_whether_manifest_existed() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!Manifest::remove(dir.path()).expect("remove"));
        Manifest::new("a", "b").write(dir.path()).expect("write");
        assert!(Manifest::remove(dir.path()).expect("remove"));
        assert!(Manifest::read(dir.path()).is_none());
    }
}
