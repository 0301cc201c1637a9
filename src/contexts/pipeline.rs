//! One end-to-end generation run.
//!
//! Hashes the inputs, short-circuits on a whole-run cache hit, asks the
//! planner for a plan, regenerates what changed, removes orphans, verifies,
//! and finally records the new manifest.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::generation_engine::{
    FailedFile, GenerationEngine, GenerationReport, RegenerationDecision, ScheduledFile, decide,
};
use super::orphan_reconciler::{Orphan, find_orphans, remove_orphans};
use super::verify_repair::{DEFAULT_MAX_ATTEMPTS, RepairLoop, VerifyOutcome};
use crate::data::{
    FileDescriptor, FileType, OracleError, Plan, PlanError, PlanRequest, PlanningOracle, Verifier,
    WritingOracle,
};
use crate::hashing;
use crate::manifest::Manifest;
use crate::spec_index::SpecIndex;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Planning failed: {0}")]
    Planning(#[source] OracleError),
    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),
    #[error("Failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write manifest: {0:#}")]
    Manifest(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub output_dir: PathBuf,
    pub instructions: Option<String>,
    pub force: bool,
    pub dry_run: bool,
    pub max_verify_attempts: usize,
    /// Paths of files already present in the output directory
    pub existing_paths: Vec<String>,
    /// File roles the target language supports
    pub file_types: Vec<FileType>,
}

impl PipelineOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            instructions: None,
            force: false,
            dry_run: false,
            max_verify_attempts: DEFAULT_MAX_ATTEMPTS,
            existing_paths: Vec::new(),
            file_types: FileType::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Spec and instructions unchanged; nothing was planned
    Skipped,
    /// Planned, but every file was still current
    UpToDate,
    DryRun,
    Clean,
    /// Generated, verification left errors behind
    Warnings,
    /// At least one file failed to generate
    Partial,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub cache_hit: bool,
    pub dry_run: bool,
    pub planned: usize,
    pub scheduled: Vec<ScheduledFile>,
    pub cached: Vec<FileDescriptor>,
    pub generated: Vec<FileDescriptor>,
    pub failed: Vec<FailedFile>,
    pub removed_orphans: Vec<Orphan>,
    pub repaired: Vec<String>,
    pub repair_failures: Vec<FailedFile>,
    pub verification: VerifyOutcome,
}

impl RunReport {
    fn cache_hit() -> Self {
        Self {
            cache_hit: true,
            ..Self::planned(&RegenerationDecision::default(), 0)
        }
    }

    fn planned(decision: &RegenerationDecision, planned: usize) -> Self {
        Self {
            cache_hit: false,
            dry_run: false,
            planned,
            scheduled: decision.scheduled.clone(),
            cached: decision.cached.clone(),
            generated: Vec::new(),
            failed: Vec::new(),
            removed_orphans: Vec::new(),
            repaired: Vec::new(),
            repair_failures: Vec::new(),
            verification: VerifyOutcome::NotRun,
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.cache_hit {
            RunStatus::Skipped
        } else if self.dry_run {
            RunStatus::DryRun
        } else if !self.failed.is_empty() {
            RunStatus::Partial
        } else if matches!(self.verification, VerifyOutcome::PassedWithWarnings { .. }) {
            RunStatus::Warnings
        } else if self.generated.is_empty() {
            RunStatus::UpToDate
        } else {
            RunStatus::Clean
        }
    }
}

/// Hashes and prior state shared by both entry points.
struct RunInputs {
    spec_hash: String,
    instructions_hash: String,
    previous: Option<Manifest>,
}

pub struct Pipeline {
    planner: Arc<dyn PlanningOracle>,
    writer: Arc<dyn WritingOracle>,
    verifier: Option<Arc<dyn Verifier>>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        planner: Arc<dyn PlanningOracle>,
        writer: Arc<dyn WritingOracle>,
        verifier: Option<Arc<dyn Verifier>>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            planner,
            writer,
            verifier,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Full run: whole-run cache check, planning, then generation.
    pub async fn run(&self, index: &SpecIndex) -> Result<RunReport, PipelineError> {
        let inputs = self.inputs(index);

        if !self.options.force {
            if let Some(previous) = &inputs.previous {
                if previous.matches(&inputs.spec_hash, &inputs.instructions_hash)
                    && previous.outputs_present(&self.options.output_dir)
                {
                    tracing::info!("spec and instructions unchanged, nothing to regenerate");
                    return Ok(RunReport::cache_hit());
                }
            }
        }

        let plan = self
            .planner
            .plan(PlanRequest {
                index,
                instructions: self.options.instructions.as_deref(),
                existing_paths: &self.options.existing_paths,
                file_types: &self.options.file_types,
            })
            .await
            .map_err(PipelineError::Planning)?;
        plan.validate()?;
        tracing::info!(files = plan.len(), "plan received");

        self.execute(index, plan, inputs).await
    }

    /// Generation for a plan obtained elsewhere. Skips the whole-run cache check.
    pub async fn run_with_plan(&self, index: &SpecIndex, plan: Plan) -> Result<RunReport, PipelineError> {
        plan.validate()?;
        let inputs = self.inputs(index);
        self.execute(index, plan, inputs).await
    }

    fn inputs(&self, index: &SpecIndex) -> RunInputs {
        RunInputs {
            spec_hash: hashing::spec_hash(index),
            instructions_hash: hashing::instructions_hash(self.options.instructions.as_deref()),
            previous: Manifest::read(&self.options.output_dir),
        }
    }

    async fn execute(
        &self,
        index: &SpecIndex,
        plan: Plan,
        inputs: RunInputs,
    ) -> Result<RunReport, PipelineError> {
        let output_dir = &self.options.output_dir;
        let decision = decide(
            &plan,
            index,
            inputs.previous.as_ref(),
            &inputs.instructions_hash,
            self.options.force,
            output_dir,
        );

        let mut report = RunReport::planned(&decision, plan.len());
        if self.options.dry_run {
            report.dry_run = true;
            return Ok(report);
        }

        fs::create_dir_all(output_dir).map_err(|source| PipelineError::OutputDir {
            path: output_dir.clone(),
            source,
        })?;

        let plan = Arc::new(plan);
        let mut generation = GenerationReport::default();
        if decision.is_empty() {
            tracing::info!("all files up to date, nothing to regenerate");
        } else {
            let engine = GenerationEngine::new(Arc::clone(&self.writer));
            generation = engine.generate(&plan, &decision.scheduled).await;
            generation.persist(output_dir);
        }

        if let Some(previous) = &inputs.previous {
            let orphans = find_orphans(previous, &plan);
            report.removed_orphans = remove_orphans(output_dir, &orphans);
        }

        if !generation.succeeded.is_empty() {
            let repair = RepairLoop::new(
                self.verifier.clone(),
                Arc::clone(&self.writer),
                self.options.max_verify_attempts,
            );
            let repaired = repair.run(output_dir, &plan, &mut generation.generated).await;
            report.verification = repaired.outcome;
            report.repaired = repaired.repaired;
            report.repair_failures = repaired.failed;
        }

        let manifest = next_manifest(&inputs, &decision, &generation);
        manifest.write(output_dir).map_err(PipelineError::Manifest)?;

        report.generated = generation.succeeded;
        report.failed = generation.failed;
        Ok(report)
    }
}

/// Fresh entries for generated files, previous entries for cached ones.
/// A failed file keeps its previous entry when it had one.
///
/// A run with failures records no spec hash, so the next run cannot take the
/// whole-run shortcut and re-decides per file.
fn next_manifest(
    inputs: &RunInputs,
    decision: &RegenerationDecision,
    generation: &GenerationReport,
) -> Manifest {
    let spec_hash = if generation.failed.is_empty() {
        inputs.spec_hash.as_str()
    } else {
        ""
    };
    let mut manifest = Manifest::new(spec_hash, &inputs.instructions_hash);
    let succeeded: HashSet<&str> = generation.succeeded_ids();
    let previous_entry = |id: &str| {
        inputs
            .previous
            .as_ref()
            .and_then(|m| m.section(id))
            .cloned()
    };

    for scheduled in &decision.scheduled {
        if succeeded.contains(scheduled.file.id.as_str()) {
            manifest.record(&scheduled.file, &scheduled.content_hash);
        } else if let Some(entry) = previous_entry(&scheduled.file.id) {
            manifest.keep(&scheduled.file.id, entry);
        }
    }

    for file in &decision.cached {
        if let Some(entry) = previous_entry(&file.id) {
            manifest.keep(&file.id, entry);
        }
    }

    manifest
}
