//! Content hashes that drive incremental regeneration.

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::data::{FileDescriptor, FileType};
use crate::spec_index::SpecIndex;

/// Lowercase hex SHA-256 of `content`.
pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash of the whole resolved index. Any change to the spec changes it.
pub fn spec_hash(index: &SpecIndex) -> String {
    let serialized = serde_json::to_string(index).unwrap_or_default();
    sha256_hex(&serialized)
}

pub fn instructions_hash(instructions: Option<&str>) -> String {
    sha256_hex(instructions.unwrap_or(""))
}

/// Hash of the spec section that determines `file`'s content.
///
/// The first hashed element is the file type, so two roles never collide even
/// when their sections are identical. Object keys serialize sorted, so the
/// result does not depend on map insertion order.
pub fn section_hash(file: &FileDescriptor, index: &SpecIndex) -> String {
    let mut parts = vec![json!(file.file_type.as_str())];

    match file.file_type {
        FileType::PackageConfig => {
            parts.push(index.info.clone());
        }
        FileType::Types => {
            parts.push(schema_entries(index));
        }
        FileType::ClientBase => {
            parts.push(json!(index.security));
            parts.push(json!(index.servers));
        }
        FileType::Client => {
            for tag in sorted(file.related_tags.as_deref()) {
                parts.push(json!({
                    "tag": tag,
                    "endpoints": index.endpoints(&tag),
                }));
            }
            for schema in sorted(file.related_schemas.as_deref()) {
                parts.push(json!({
                    "schema": schema,
                    "definition": index.schemas.get(&schema),
                }));
            }
        }
        FileType::Index => {
            parts.push(json!(index.tag_names()));
        }
        FileType::Readme | FileType::Examples => {
            parts.push(index.info.clone());
            parts.push(json!(index.servers));
            parts.push(json!(index.tag_names()));
            parts.push(schema_entries(index));
            parts.push(json!(index.security));
        }
    }

    sha256_hex(&Value::Array(parts).to_string())
}

/// `[[name, definition], ...]` in name order.
fn schema_entries(index: &SpecIndex) -> Value {
    Value::Array(
        index
            .schemas
            .iter()
            .map(|(name, definition)| json!([name, definition]))
            .collect(),
    )
}

fn sorted(names: Option<&[String]>) -> Vec<String> {
    let mut names = names.map(<[String]>::to_vec).unwrap_or_default();
    names.sort();
    names
}
