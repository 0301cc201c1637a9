//! Decides which planned files need regeneration and runs the writer over
//! them, one order group at a time.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::data::{
    FileDescriptor, GeneratedFiles, OracleError, Plan, WriteRequest, WritingOracle,
    group_by_order, is_safe_relative_path,
};
use crate::hashing::section_hash;
use crate::manifest::Manifest;
use crate::spec_index::SpecIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationReason {
    Forced,
    NoManifest,
    InstructionsChanged,
    SectionChanged,
    NewFile,
    OutputMoved,
    OutputMissing,
}

impl fmt::Display for RegenerationReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            RegenerationReason::Forced => "forced",
            RegenerationReason::NoManifest => "first run",
            RegenerationReason::InstructionsChanged => "instructions changed",
            RegenerationReason::SectionChanged => "spec section changed",
            RegenerationReason::NewFile => "new file",
            RegenerationReason::OutputMoved => "output path changed",
            RegenerationReason::OutputMissing => "output missing",
        };
        f.write_str(text)
    }
}

/// A plan file selected for generation, with the hash it will be recorded under.
#[derive(Debug, Clone)]
pub struct ScheduledFile {
    pub file: FileDescriptor,
    pub content_hash: String,
    pub reason: RegenerationReason,
}

#[derive(Debug, Clone, Default)]
pub struct RegenerationDecision {
    pub scheduled: Vec<ScheduledFile>,
    /// Files whose previous output is still valid
    pub cached: Vec<FileDescriptor>,
}

impl RegenerationDecision {
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }
}

/// Computes the regeneration set for `plan`.
///
/// Forcing, a missing manifest, or changed instructions schedule every file.
/// Otherwise a file is scheduled when it is new to the manifest, its section
/// hash changed, its output path moved, or its output is gone from disk.
pub fn decide(
    plan: &Plan,
    index: &SpecIndex,
    previous: Option<&Manifest>,
    instructions_hash: &str,
    force: bool,
    output_dir: &Path,
) -> RegenerationDecision {
    let global = if force {
        Some(RegenerationReason::Forced)
    } else {
        match previous {
            None => Some(RegenerationReason::NoManifest),
            Some(manifest) if manifest.instructions_hash != instructions_hash => {
                Some(RegenerationReason::InstructionsChanged)
            }
            Some(_) => None,
        }
    };

    let mut decision = RegenerationDecision::default();
    for file in &plan.files {
        let content_hash = section_hash(file, index);
        let cached_entry = previous.and_then(|m| m.section(&file.id));

        let reason = match (global, cached_entry) {
            (Some(reason), _) => Some(reason),
            (None, None) => Some(RegenerationReason::NewFile),
            (None, Some(entry)) if entry.content_hash != content_hash => {
                Some(RegenerationReason::SectionChanged)
            }
            (None, Some(entry)) if entry.output_path != file.output_path => {
                Some(RegenerationReason::OutputMoved)
            }
            (None, Some(_)) if !output_dir.join(&file.output_path).exists() => {
                Some(RegenerationReason::OutputMissing)
            }
            (None, Some(_)) => None,
        };

        match reason {
            Some(reason) => decision.scheduled.push(ScheduledFile {
                file: file.clone(),
                content_hash,
                reason,
            }),
            None => decision.cached.push(file.clone()),
        }
    }

    decision
}

/// Outcome of one writer invocation
#[derive(Debug)]
pub struct FileResult {
    pub file: FileDescriptor,
    pub outcome: Result<String, OracleError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub id: String,
    pub output_path: String,
    pub reason: String,
}

impl FailedFile {
    pub fn new(file: &FileDescriptor, reason: impl Into<String>) -> Self {
        Self {
            id: file.id.clone(),
            output_path: file.output_path.clone(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct GenerationReport {
    /// Content of every successful file, keyed by output path
    pub generated: GeneratedFiles,
    pub succeeded: Vec<FileDescriptor>,
    pub failed: Vec<FailedFile>,
}

impl GenerationReport {
    /// Write every generated file under `output_dir`.
    ///
    /// A file that cannot be written moves from `succeeded` to `failed`.
    pub fn persist(&mut self, output_dir: &Path) {
        let mut unwritten = HashSet::new();

        for file in &self.succeeded {
            let Some(content) = self.generated.get(&file.output_path) else {
                continue;
            };
            if let Err(e) = write_output_file(output_dir, &file.output_path, content) {
                tracing::warn!(path = %file.output_path, error = %e, "failed to write generated file");
                self.failed
                    .push(FailedFile::new(file, format!("failed to write output: {}", e)));
                unwritten.insert(file.id.clone());
            }
        }

        if !unwritten.is_empty() {
            let (kept, dropped): (Vec<_>, Vec<_>) = self
                .succeeded
                .drain(..)
                .partition(|f| !unwritten.contains(&f.id));
            for file in dropped {
                self.generated.remove(&file.output_path);
            }
            self.succeeded = kept;
        }
    }

    pub fn succeeded_ids(&self) -> HashSet<&str> {
        self.succeeded.iter().map(|f| f.id.as_str()).collect()
    }
}

/// Runs the writing oracle over planned files, order group by order group.
pub struct GenerationEngine {
    writer: Arc<dyn WritingOracle>,
}

impl GenerationEngine {
    pub fn new(writer: Arc<dyn WritingOracle>) -> Self {
        Self { writer }
    }

    /// Generate `scheduled` in ascending order groups.
    ///
    /// Each group sees an immutable snapshot of what earlier groups produced.
    /// Results are merged only after the whole group has settled.
    pub async fn generate(&self, plan: &Arc<Plan>, scheduled: &[ScheduledFile]) -> GenerationReport {
        let files = scheduled.iter().map(|s| s.file.clone()).collect();
        let mut report = GenerationReport::default();

        for (order, group) in group_by_order(files) {
            tracing::info!(order, files = group.len(), "generating order group");

            let snapshot = Arc::new(report.generated.clone());
            let jobs = group.into_iter().map(|file| (file, None)).collect();
            let results = fan_out(&self.writer, plan, &snapshot, jobs).await;

            for result in results {
                match result.outcome {
                    Ok(content) => {
                        tracing::debug!(id = %result.file.id, path = %result.file.output_path, "file generated");
                        report
                            .generated
                            .insert(result.file.output_path.clone(), normalize_trailing_newline(&content));
                        report.succeeded.push(result.file);
                    }
                    Err(e) => {
                        tracing::warn!(id = %result.file.id, error = %e, "file generation failed");
                        report.failed.push(FailedFile::new(&result.file, e.to_string()));
                    }
                }
            }
        }

        report
    }
}

/// Invokes the writer once per job concurrently and waits for all of them.
///
/// Results come back in job order. A panicking task settles as
/// `OracleError::Aborted` for its own file only.
pub(crate) async fn fan_out(
    writer: &Arc<dyn WritingOracle>,
    plan: &Arc<Plan>,
    snapshot: &Arc<GeneratedFiles>,
    jobs: Vec<(FileDescriptor, Option<String>)>,
) -> Vec<FileResult> {
    let mut tasks = Vec::with_capacity(jobs.len());

    for (file, fix_errors) in jobs {
        let writer = Arc::clone(writer);
        let request = WriteRequest {
            file: file.clone(),
            plan: Arc::clone(plan),
            fix_errors,
            generated: Arc::clone(snapshot),
        };
        tasks.push((file, tokio::task::spawn(async move { writer.write(request).await })));
    }

    let mut results = Vec::with_capacity(tasks.len());
    for (file, task) in tasks {
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(OracleError::Aborted(join_error.to_string())),
        };
        results.push(FileResult { file, outcome });
    }
    results
}

/// Trims trailing newlines and appends exactly one, keeping CRLF for CRLF content.
pub fn normalize_trailing_newline(content: &str) -> String {
    let terminator = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let mut normalized = content.trim_end_matches(['\n', '\r']).to_string();
    normalized.push_str(terminator);
    normalized
}

/// Writes `content` to `relative_path` under `output_dir`, creating parent directories.
pub fn write_output_file(output_dir: &Path, relative_path: &str, content: &str) -> io::Result<()> {
    if !is_safe_relative_path(relative_path) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to write outside the output directory: {}", relative_path),
        ));
    }

    let path = output_dir.join(relative_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}
