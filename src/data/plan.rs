use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Component, Path};
use thiserror::Error;

/// Role of a planned file. Each role selects the part of the spec its hash covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    PackageConfig,
    Types,
    ClientBase,
    Client,
    Index,
    Readme,
    Examples,
}

impl FileType {
    pub const ALL: [FileType; 7] = [
        FileType::PackageConfig,
        FileType::Types,
        FileType::ClientBase,
        FileType::Client,
        FileType::Index,
        FileType::Readme,
        FileType::Examples,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::PackageConfig => "package-config",
            FileType::Types => "types",
            FileType::ClientBase => "client-base",
            FileType::Client => "client",
            FileType::Index => "index",
            FileType::Readme => "readme",
            FileType::Examples => "examples",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub id: String,
    pub output_path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_schemas: Option<Vec<String>>,
    /// Files sharing an order value are generated concurrently.
    pub order: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub files: Vec<FileDescriptor>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan entry has an empty id (output path \"{0}\")")]
    EmptyId(String),
    #[error("duplicate file id \"{0}\" in plan")]
    DuplicateId(String),
    #[error("duplicate output path \"{0}\" in plan")]
    DuplicateOutputPath(String),
    #[error("file \"{id}\" has an unsafe output path \"{path}\"")]
    UnsafeOutputPath { id: String, path: String },
}

impl Plan {
    pub fn new(files: Vec<FileDescriptor>) -> Self {
        Self { files }
    }

    /// Checks the invariants the engine relies on: unique ids, unique and
    /// relative output paths.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut ids = HashSet::new();
        let mut paths = HashSet::new();

        for file in &self.files {
            if file.id.trim().is_empty() {
                return Err(PlanError::EmptyId(file.output_path.clone()));
            }
            if !is_safe_relative_path(&file.output_path) {
                return Err(PlanError::UnsafeOutputPath {
                    id: file.id.clone(),
                    path: file.output_path.clone(),
                });
            }
            if !ids.insert(file.id.as_str()) {
                return Err(PlanError::DuplicateId(file.id.clone()));
            }
            if !paths.insert(file.output_path.as_str()) {
                return Err(PlanError::DuplicateOutputPath(file.output_path.clone()));
            }
        }

        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&FileDescriptor> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn output_paths(&self) -> HashSet<&str> {
        self.files.iter().map(|f| f.output_path.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Groups files by order value, ascending. Plan order is kept within a group.
pub fn group_by_order(files: Vec<FileDescriptor>) -> BTreeMap<u32, Vec<FileDescriptor>> {
    let mut groups: BTreeMap<u32, Vec<FileDescriptor>> = BTreeMap::new();
    for file in files {
        groups.entry(file.order).or_default().push(file);
    }
    groups
}

/// True for a non-empty relative path that cannot climb out of its root.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    let path = Path::new(path);
    if path.is_absolute() {
        return false;
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str, path: &str, order: u32) -> FileDescriptor {
        FileDescriptor {
            id: id.to_string(),
            output_path: path.to_string(),
            file_type: FileType::Client,
            description: String::new(),
            related_tags: None,
            related_schemas: None,
            order,
        }
    }

    #[test]
    fn deserializes_camel_case_descriptor() {
        let raw = r#"{
            "id": "pets-client",
            "outputPath": "src/pets.ts",
            "type": "client",
            "description": "Pets resource client",
            "relatedTags": ["pets"],
            "relatedSchemas": ["Pet"],
            "order": 2
        }"#;
        let descriptor: FileDescriptor = serde_json::from_str(raw).expect("valid descriptor");
        assert_eq!(descriptor.file_type, FileType::Client);
        assert_eq!(descriptor.related_tags, Some(vec!["pets".to_string()]));
        assert_eq!(descriptor.order, 2);
    }

    #[test]
    fn rejects_unknown_type_and_negative_order() {
        let unknown = r#"{"id":"x","outputPath":"x.ts","type":"widget","order":0}"#;
        assert!(serde_json::from_str::<FileDescriptor>(unknown).is_err());

        let negative = r#"{"id":"x","outputPath":"x.ts","type":"types","order":-1}"#;
        assert!(serde_json::from_str::<FileDescriptor>(negative).is_err());
    }

    #[test]
    fn validate_flags_duplicates_and_unsafe_paths() {
        let dup_id = Plan::new(vec![file("a", "a.ts", 0), file("a", "b.ts", 0)]);
        assert_eq!(dup_id.validate(), Err(PlanError::DuplicateId("a".into())));

        let dup_path = Plan::new(vec![file("a", "a.ts", 0), file("b", "a.ts", 1)]);
        assert_eq!(
            dup_path.validate(),
            Err(PlanError::DuplicateOutputPath("a.ts".into()))
        );

        let escape = Plan::new(vec![file("a", "../outside.ts", 0)]);
        assert!(matches!(
            escape.validate(),
            Err(PlanError::UnsafeOutputPath { .. })
        ));

        let ok = Plan::new(vec![file("a", "src/a.ts", 0), file("b", "./src/b.ts", 1)]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn groups_ascending_and_keeps_plan_order() {
        let groups = group_by_order(vec![
            file("c", "c.ts", 2),
            file("a", "a.ts", 0),
            file("b", "b.ts", 2),
        ]);
        let orders: Vec<u32> = groups.keys().copied().collect();
        assert_eq!(orders, vec![0, 2]);
        let ids: Vec<&str> = groups[&2].iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }
}
