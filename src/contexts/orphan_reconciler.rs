use std::fs;
use std::path::Path;

use crate::data::{Plan, is_safe_relative_path};
use crate::manifest::Manifest;

/// A previously generated file that the current plan no longer declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub id: String,
    pub output_path: String,
}

/// Entries of `previous` whose output path no current plan file declares.
pub fn find_orphans(previous: &Manifest, plan: &Plan) -> Vec<Orphan> {
    let current = plan.output_paths();
    previous
        .sections
        .iter()
        .filter(|(_, entry)| !current.contains(entry.output_path.as_str()))
        .map(|(id, entry)| Orphan {
            id: id.clone(),
            output_path: entry.output_path.clone(),
        })
        .collect()
}

/// Delete orphaned files and any directories they leave empty.
///
/// Returns the orphans that were actually removed. Failures, including a file
/// that is already gone, are logged and otherwise ignored.
pub fn remove_orphans(output_dir: &Path, orphans: &[Orphan]) -> Vec<Orphan> {
    let mut removed = Vec::new();

    for orphan in orphans {
        if !is_safe_relative_path(&orphan.output_path) {
            tracing::debug!(path = %orphan.output_path, "ignoring orphan outside the output directory");
            continue;
        }

        let path = output_dir.join(&orphan.output_path);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(id = %orphan.id, path = %orphan.output_path, "removed orphaned file");
                remove_empty_parents(output_dir, &path);
                removed.push(orphan.clone());
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "could not remove orphan");
            }
        }
    }

    removed
}

fn remove_empty_parents(output_dir: &Path, file: &Path) {
    let mut current = file.parent();
    while let Some(dir) = current {
        if dir == output_dir || !dir.starts_with(output_dir) {
            break;
        }
        let is_empty = fs::read_dir(dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty || fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FileDescriptor, FileType};

    fn file(id: &str, path: &str) -> FileDescriptor {
        FileDescriptor {
            id: id.to_string(),
            output_path: path.to_string(),
            file_type: FileType::Client,
            description: String::new(),
            related_tags: None,
            related_schemas: None,
            order: 2,
        }
    }

    #[test]
    fn orphan_detection_is_by_output_path() {
        let mut previous = Manifest::new("s", "i");
        previous.record(&file("pets", "src/pets.ts"), "h1");
        previous.record(&file("store", "src/store.ts"), "h2");
        previous.record(&file("old-id", "src/users.ts"), "h3");

        let plan = Plan::new(vec![
            file("pets", "src/pets.ts"),
            file("users", "src/users.ts"),
        ]);

        let orphans = find_orphans(&previous, &plan);
        assert_eq!(
            orphans,
            vec![Orphan {
                id: "store".into(),
                output_path: "src/store.ts".into()
            }]
        );
    }

    #[test]
    fn removal_prunes_empty_directories_and_ignores_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("src/resources/legacy")).expect("mkdir");
        fs::write(root.join("src/resources/legacy/store.ts"), "x").expect("write");
        fs::write(root.join("src/index.ts"), "y").expect("write");

        let orphans = vec![
            Orphan {
                id: "store".into(),
                output_path: "src/resources/legacy/store.ts".into(),
            },
            Orphan {
                id: "gone".into(),
                output_path: "src/gone.ts".into(),
            },
            Orphan {
                id: "escape".into(),
                output_path: "../outside.ts".into(),
            },
        ];

        let removed = remove_orphans(root, &orphans);

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "store");
        assert!(!root.join("src/resources").exists());
        assert!(root.join("src/index.ts").exists());
    }
}
