//! Bounded verify and repair loop over generated output.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::generation_engine::{FailedFile, fan_out, normalize_trailing_newline, write_output_file};
use crate::data::{
    FileDescriptor, GeneratedFiles, Plan, Verifier, VerifyError, WritingOracle,
    format_error_context, group_by_file,
};

pub const DEFAULT_MAX_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Nothing was generated, so there was nothing to check
    NotRun,
    /// The target language has no verifier
    Skipped,
    Passed { attempts: usize },
    PassedWithWarnings {
        attempts: usize,
        errors: Vec<VerifyError>,
    },
}

#[derive(Debug)]
pub struct RepairReport {
    pub outcome: VerifyOutcome,
    /// Ids of files rewritten by a repair pass
    pub repaired: Vec<String>,
    /// Repair invocations that failed; the previous content stays in place
    pub failed: Vec<FailedFile>,
}

impl RepairReport {
    fn new(outcome: VerifyOutcome) -> Self {
        Self {
            outcome,
            repaired: Vec::new(),
            failed: Vec::new(),
        }
    }
}

pub struct RepairLoop {
    verifier: Option<Arc<dyn Verifier>>,
    writer: Arc<dyn WritingOracle>,
    max_attempts: usize,
}

impl RepairLoop {
    pub fn new(
        verifier: Option<Arc<dyn Verifier>>,
        writer: Arc<dyn WritingOracle>,
        max_attempts: usize,
    ) -> Self {
        Self {
            verifier,
            writer,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Verify `output_dir`, re-invoking the writer for implicated plan files
    /// between passes.
    ///
    /// Runs at most `max_attempts` verification passes. Repaired content
    /// replaces the entry in `generated` and the file on disk.
    pub async fn run(
        &self,
        output_dir: &Path,
        plan: &Arc<Plan>,
        generated: &mut GeneratedFiles,
    ) -> RepairReport {
        let Some(verifier) = &self.verifier else {
            tracing::info!("no verifier for this language, skipping verification");
            return RepairReport::new(VerifyOutcome::Skipped);
        };

        let mut report = RepairReport::new(VerifyOutcome::NotRun);

        for attempt in 1..=self.max_attempts {
            let errors = match verifier.verify(output_dir).await {
                Ok(errors) => errors,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "verifier did not produce a verdict");
                    vec![VerifyError::unstructured(e.to_string())]
                }
            };

            if errors.is_empty() {
                tracing::info!(attempt, "verification passed");
                report.outcome = VerifyOutcome::Passed { attempts: attempt };
                return report;
            }

            tracing::info!(attempt, errors = errors.len(), "verification reported errors");

            if attempt == self.max_attempts {
                report.outcome = VerifyOutcome::PassedWithWarnings {
                    attempts: attempt,
                    errors,
                };
                return report;
            }

            let by_file = group_by_file(&errors);
            let targets: Vec<&FileDescriptor> = plan
                .files
                .iter()
                .filter(|f| by_file.contains_key(&f.output_path))
                .collect();

            if targets.is_empty() {
                tracing::warn!("verifier errors do not point at any planned file; nothing to repair");
                report.outcome = VerifyOutcome::PassedWithWarnings {
                    attempts: attempt,
                    errors,
                };
                return report;
            }

            let mut snapshot = generated.clone();
            for target in &targets {
                if !snapshot.contains_key(&target.output_path) {
                    if let Ok(content) = fs::read_to_string(output_dir.join(&target.output_path)) {
                        snapshot.insert(target.output_path.clone(), content);
                    }
                }
            }
            let snapshot = Arc::new(snapshot);

            let jobs = targets
                .iter()
                .map(|file| {
                    let context = format_error_context(&by_file[&file.output_path]);
                    ((*file).clone(), Some(context))
                })
                .collect();

            for result in fan_out(&self.writer, plan, &snapshot, jobs).await {
                let file = result.file;
                match result.outcome {
                    Ok(content) => {
                        let content = normalize_trailing_newline(&content);
                        match write_output_file(output_dir, &file.output_path, &content) {
                            Ok(()) => {
                                tracing::debug!(id = %file.id, attempt, "file repaired");
                                generated.insert(file.output_path.clone(), content);
                                if !report.repaired.contains(&file.id) {
                                    report.repaired.push(file.id.clone());
                                }
                            }
                            Err(e) => report.failed.push(FailedFile::new(
                                &file,
                                format!("failed to write repaired file: {}", e),
                            )),
                        }
                    }
                    Err(e) => {
                        tracing::warn!(id = %file.id, attempt, error = %e, "repair failed");
                        report.failed.push(FailedFile::new(&file, e.to_string()));
                    }
                }
            }
        }

        report
    }
}
