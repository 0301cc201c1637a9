use std::collections::BTreeMap;
use thiserror::Error;

use crate::data::FileType;
use crate::verify::{DiagnosticFormat, OUTPUT_PLACEHOLDER, VerifyCommand};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown language: \"{name}\". Available languages: {available}")]
    UnknownLanguage { name: String, available: String },
}

/// Everything the pipeline needs to know about one target language
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    pub name: String,
    /// Extensions (with leading dot) of files the scanner picks up
    pub extensions: Vec<String>,
    pub planner_instructions: String,
    pub writer_instructions: String,
    /// `None` when the language has no checker; verification is then skipped
    pub verify: Option<VerifyCommand>,
    pub file_types: Vec<FileType>,
}

/// Lookup of language profiles by name
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: BTreeMap<String, LanguageProfile>,
}

impl LanguageRegistry {
    /// Creates a registry holding the built-in profiles
    pub fn builtin() -> Self {
        let mut registry = Self {
            profiles: BTreeMap::new(),
        };
        registry.register(typescript());
        registry.register(rust());
        registry
    }

    pub fn register(&mut self, profile: LanguageProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn get(&self, name: &str) -> Result<&LanguageProfile, RegistryError> {
        self.profiles
            .get(name)
            .ok_or_else(|| RegistryError::UnknownLanguage {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn typescript() -> LanguageProfile {
    LanguageProfile {
        name: "typescript".to_string(),
        extensions: strings(&[".ts", ".json", ".md"]),
        planner_instructions: TYPESCRIPT_PLANNER.to_string(),
        writer_instructions: TYPESCRIPT_WRITER.to_string(),
        verify: Some(VerifyCommand {
            program: "npx".to_string(),
            args: strings(&["tsc", "--noEmit", "--project", OUTPUT_PLACEHOLDER]),
            format: DiagnosticFormat::Tsc,
        }),
        file_types: FileType::ALL.to_vec(),
    }
}

fn rust() -> LanguageProfile {
    LanguageProfile {
        name: "rust".to_string(),
        extensions: strings(&[".rs", ".toml", ".md"]),
        planner_instructions: RUST_PLANNER.to_string(),
        writer_instructions: RUST_WRITER.to_string(),
        verify: Some(VerifyCommand {
            program: "cargo".to_string(),
            args: strings(&["check", "--quiet", "--message-format=short"]),
            format: DiagnosticFormat::Rustc,
        }),
        file_types: FileType::ALL.to_vec(),
    }
}

const TYPESCRIPT_PLANNER: &str = "\
You plan the file layout of a TypeScript client library for the given OpenAPI description.
Return JSON of the form {\"files\": [...]} where every file has id, outputPath, type, description,
optional relatedTags and relatedSchemas, and an integer order.
Use order 0 for package.json, tsconfig.json and shared types, order 1 for the base HTTP client,
order 2 for one resource client per tag, and order 3 for the index, README and examples.
A file may only depend on files with a lower order. Keep existing file paths stable when possible.";

const TYPESCRIPT_WRITER: &str = "\
You write exactly one file of a TypeScript client library: {{input.file.outputPath}}.
Target ES2020 modules with strict type checking and the built-in fetch API, with no runtime dependencies.
Import only from files that exist in the plan, using relative paths.
Return JSON of the form {\"code\": \"...\"} containing the complete file content.
When error context is supplied, fix every listed error and keep the rest of the file intact.";

const RUST_PLANNER: &str = "\
You plan the file layout of a Rust client crate for the given OpenAPI description.
Return JSON of the form {\"files\": [...]} where every file has id, outputPath, type, description,
optional relatedTags and relatedSchemas, and an integer order.
Use order 0 for Cargo.toml and src/types.rs, order 1 for src/client.rs, order 2 for one module per
tag under src/resources/, and order 3 for src/lib.rs, README.md and examples/.
A file may only depend on files with a lower order.";

const RUST_WRITER: &str = "\
You write exactly one file of a Rust client crate built on reqwest and serde: {{input.file.outputPath}}.
Refer only to modules that exist in the plan. Derive Serialize and Deserialize for schema types.
Return JSON of the form {\"code\": \"...\"} containing the complete file content.
When error context is supplied, fix every listed error and keep the rest of the file intact.";
