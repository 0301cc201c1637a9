//! Scans an output directory for files written before this run.

use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::manifest::MANIFEST_FILE;

/// Dependency caches and version control directories never scanned.
const SKIPPED_DIRS: [&str; 4] = ["node_modules", ".git", "target", "dist"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingFile {
    /// Path relative to the output directory, `/`-separated
    pub relative_path: String,
    pub content: String,
}

/// Collect every file under `output_dir` whose extension is in `extensions`
/// (written with the leading dot, e.g. `.ts`), sorted by relative path.
///
/// A missing directory yields an empty list. Unreadable entries are skipped.
pub fn read_existing_files(output_dir: &Path, extensions: &[String]) -> Vec<ExistingFile> {
    let mut files = Vec::new();
    collect_files(output_dir, output_dir, extensions, &mut files);
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    files
}

pub fn existing_paths(files: &[ExistingFile]) -> Vec<String> {
    files.iter().map(|f| f.relative_path.clone()).collect()
}

fn collect_files(root: &Path, dir: &Path, extensions: &[String], files: &mut Vec<ExistingFile>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            if !SKIPPED_DIRS.contains(&name.as_str()) {
                collect_files(root, &path, extensions, files);
            }
            continue;
        }

        if !file_type.is_file() || name == MANIFEST_FILE || !has_extension(&name, extensions) {
            continue;
        }

        let Ok(content) = fs::read_to_string(&path) else {
            tracing::debug!(path = %path.display(), "skipping unreadable existing file");
            continue;
        };
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");

        files.push(ExistingFile {
            relative_path,
            content,
        });
    }
}

fn has_extension(name: &str, extensions: &[String]) -> bool {
    extensions.iter().any(|ext| name.ends_with(ext.as_str()))
}
