//! Normalized, reference-resolved index over an OpenAPI 3.x description.
//!
//! The index is built once per run and never mutated afterwards. All local
//! `$ref`s are expanded so downstream components can read schemas and
//! operations without resolving anything themselves.

use serde::Serialize;
use serde_json::{Map, Number, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tag bucket for operations that declare no tags.
pub const UNTAGGED: &str = "untagged";

/// Methods extracted from each path item, in this order.
pub const HTTP_METHODS: [&str; 7] = ["get", "post", "put", "delete", "patch", "options", "head"];

const MAX_EXPANDED_NODES: usize = 1_000_000;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Failed to read API description {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse API description: {0}")]
    Parse(String),
    #[error("Swagger {0} is not supported. Only OpenAPI 3.0/3.1 descriptions are supported")]
    Swagger(String),
    #[error("Unsupported OpenAPI version \"{0}\". Only OpenAPI 3.0/3.1 descriptions are supported")]
    UnsupportedVersion(String),
    #[error("Document is not an OpenAPI description (no \"openapi\" field)")]
    NotOpenApi,
    #[error("Unresolvable reference \"{0}\"")]
    UnresolvableRef(String),
    #[error("External reference \"{0}\" is not supported; only local \"#/\" references are resolved")]
    ExternalRef(String),
    #[error("Reference expansion did not terminate (more than {limit} nodes while resolving \"{reference}\")")]
    ExpansionLimit { reference: String, limit: usize },
}

/// A single operation filed under one tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub path: String,
    pub method: String,
    pub operation: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecIndex {
    pub info: Value,
    pub servers: Vec<Value>,
    pub tags: Vec<Tag>,
    pub security: BTreeMap<String, Value>,
    pub paths_by_tag: BTreeMap<String, Vec<Endpoint>>,
    pub schemas: BTreeMap<String, Value>,
}

impl SpecIndex {
    /// Load and index an API description from disk.
    ///
    /// Files ending in `.json` are read as JSON, everything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self, IndexError> {
        let raw = fs::read_to_string(path).map_err(|source| IndexError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let document = if is_json {
            serde_json::from_str(&raw).map_err(|e| IndexError::Parse(e.to_string()))?
        } else {
            parse_yaml(&raw)?
        };

        Self::from_document(&document)
    }

    /// Index a description held in memory. YAML is a superset of JSON, so both work.
    pub fn parse_str(raw: &str) -> Result<Self, IndexError> {
        let document = parse_yaml(raw)?;
        Self::from_document(&document)
    }

    pub fn from_document(document: &Value) -> Result<Self, IndexError> {
        check_version(document)?;

        let resolved = Dereferencer::new(document).resolve_document()?;

        let info = resolved.get("info").cloned().unwrap_or_else(|| json!({}));
        let servers = resolved
            .get("servers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let tags = resolved
            .get("tags")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let name = item.get("name")?.as_str()?.to_string();
                        let description = item
                            .get("description")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        Some(Tag { name, description })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let components = resolved.get("components");
        let security = named_entries(components.and_then(|c| c.get("securitySchemes")));
        let schemas = named_entries(components.and_then(|c| c.get("schemas")));
        let paths_by_tag = group_paths_by_tag(resolved.get("paths"));

        Ok(SpecIndex {
            info,
            servers,
            tags,
            security,
            paths_by_tag,
            schemas,
        })
    }

    pub fn title(&self) -> &str {
        self.info.get("title").and_then(Value::as_str).unwrap_or("Untitled API")
    }

    pub fn version(&self) -> &str {
        self.info.get("version").and_then(Value::as_str).unwrap_or("unknown")
    }

    pub fn tag_names(&self) -> Vec<&str> {
        self.paths_by_tag.keys().map(String::as_str).collect()
    }

    /// Number of tag-filed endpoint entries. An operation with two tags counts twice.
    pub fn endpoint_count(&self) -> usize {
        self.paths_by_tag.values().map(Vec::len).sum()
    }

    pub fn endpoints(&self, tag: &str) -> &[Endpoint] {
        self.paths_by_tag.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn check_version(document: &Value) -> Result<(), IndexError> {
    if let Some(version) = document.get("swagger") {
        return Err(IndexError::Swagger(version_string(version)));
    }

    match document.get("openapi") {
        Some(version) => {
            let version = version_string(version);
            if version.starts_with("3.") {
                Ok(())
            } else {
                Err(IndexError::UnsupportedVersion(version))
            }
        }
        None => Err(IndexError::NotOpenApi),
    }
}

fn version_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn named_entries(value: Option<&Value>) -> BTreeMap<String, Value> {
    value
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn group_paths_by_tag(paths: Option<&Value>) -> BTreeMap<String, Vec<Endpoint>> {
    let mut by_tag: BTreeMap<String, Vec<Endpoint>> = BTreeMap::new();
    let Some(paths) = paths.and_then(Value::as_object) else {
        return by_tag;
    };

    for (path, item) in paths {
        for method in HTTP_METHODS {
            let Some(operation) = item.get(method).filter(|op| op.is_object()) else {
                continue;
            };

            let declared: Vec<String> = operation
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let tags = if declared.is_empty() {
                vec![UNTAGGED.to_string()]
            } else {
                declared
            };

            for tag in tags {
                by_tag.entry(tag).or_default().push(Endpoint {
                    path: path.clone(),
                    method: method.to_string(),
                    operation: operation.clone(),
                });
            }
        }
    }

    by_tag
}

fn parse_yaml(raw: &str) -> Result<Value, IndexError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(raw).map_err(|e| IndexError::Parse(e.to_string()))?;
    yaml_to_json(yaml)
}

/// Converts a YAML tree to JSON, stringifying scalar mapping keys such as `200:`.
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, IndexError> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => {
                        return Err(IndexError::Parse(format!(
                            "unsupported mapping key {:?}",
                            other
                        )));
                    }
                };
                map.insert(key, yaml_to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

/// Expands local references depth-first, tracking the active reference path.
///
/// A reference is a cycle back-edge when it is already being expanded, or when
/// it points at an ancestor of the current location or of any location an
/// active reference was followed from.
///
/// A target whose expansion kept no back-edge is resolved once and reused, so
/// `limit` bounds the resolution work rather than the size of the output.
struct Dereferencer<'a> {
    root: &'a Value,
    /// (reference, location it was followed from)
    active: Vec<(String, String)>,
    resolved: HashMap<String, Value>,
    back_edges: usize,
    produced: usize,
    limit: usize,
}

impl<'a> Dereferencer<'a> {
    fn new(root: &'a Value) -> Self {
        Self::with_limit(root, MAX_EXPANDED_NODES)
    }

    fn with_limit(root: &'a Value, limit: usize) -> Self {
        Self {
            root,
            active: Vec::new(),
            resolved: HashMap::new(),
            back_edges: 0,
            produced: 0,
            limit,
        }
    }

    fn count_node(&mut self) -> Result<(), IndexError> {
        self.produced += 1;
        if self.produced > self.limit {
            return Err(IndexError::ExpansionLimit {
                reference: self
                    .active
                    .last()
                    .map(|(reference, _)| reference.clone())
                    .unwrap_or_else(|| "#".to_string()),
                limit: self.limit,
            });
        }
        Ok(())
    }

    fn resolve_document(mut self) -> Result<Value, IndexError> {
        let root = self.root;
        self.resolve(root, "#")
    }

    fn resolve(&mut self, value: &Value, location: &str) -> Result<Value, IndexError> {
        self.count_node()?;

        match value {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("$ref") {
                    return self.resolve_reference(reference, map, location);
                }
                let mut out = Map::new();
                for (key, child) in map {
                    let child_location = format!("{}/{}", location, escape_pointer_token(key));
                    out.insert(key.clone(), self.resolve(child, &child_location)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.resolve(item, &format!("{}/{}", location, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            scalar => Ok(scalar.clone()),
        }
    }

    fn resolve_reference(
        &mut self,
        reference: &str,
        siblings: &Map<String, Value>,
        location: &str,
    ) -> Result<Value, IndexError> {
        let Some(pointer) = reference.strip_prefix('#') else {
            return Err(IndexError::ExternalRef(reference.to_string()));
        };

        // Back-edge of a cycle: keep the reference so the structure stays finite.
        let is_back_edge = is_within(location, reference)
            || self
                .active
                .iter()
                .any(|(active, from)| active == reference || is_within(from, reference));
        if is_back_edge {
            self.back_edges += 1;
            return Ok(json!({ "$ref": reference }));
        }

        let mut resolved = match self.resolved.get(reference).cloned() {
            Some(cached) => {
                self.count_node()?;
                cached
            }
            None => {
                let root = self.root;
                let target = root
                    .pointer(pointer)
                    .ok_or_else(|| IndexError::UnresolvableRef(reference.to_string()))?;

                let back_edges_before = self.back_edges;
                self.active.push((reference.to_string(), location.to_string()));
                let resolved = self.resolve(target, reference);
                self.active.pop();
                let resolved = resolved?;

                // Expansions holding a back-edge depend on the active path.
                if self.back_edges == back_edges_before {
                    self.resolved.insert(reference.to_string(), resolved.clone());
                }
                resolved
            }
        };

        let extra: Vec<(&String, &Value)> = siblings.iter().filter(|(k, _)| *k != "$ref").collect();
        if !extra.is_empty() {
            if let Value::Object(object) = &mut resolved {
                for (key, sibling) in extra {
                    let sibling_location = format!("{}/{}", location, escape_pointer_token(key));
                    let sibling = self.resolve(sibling, &sibling_location)?;
                    object.insert(key.clone(), sibling);
                }
            }
        }

        Ok(resolved)
    }
}

/// Whether `location` is `target` or lies below it.
fn is_within(location: &str, target: &str) -> bool {
    location
        .strip_prefix(target)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
