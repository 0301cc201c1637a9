use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::diagnostics::VerifyError;
use super::plan::{FileDescriptor, FileType, Plan};
use crate::spec_index::SpecIndex;

/// Generated content keyed by output path.
pub type GeneratedFiles = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport failed: {0}")]
    Transport(String),
    #[error("oracle reported failure: {0}")]
    Failed(String),
    #[error("oracle output failed validation: {0}")]
    InvalidOutput(String),
    #[error("oracle task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("failed to run verifier `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("verifier timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Input to the planning oracle.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub index: &'a SpecIndex,
    pub instructions: Option<&'a str>,
    pub existing_paths: &'a [String],
    pub file_types: &'a [FileType],
}

/// Input to the writing oracle for one file.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub file: FileDescriptor,
    pub plan: Arc<Plan>,
    /// Verifier errors from the previous attempt, formatted one per line.
    pub fix_errors: Option<String>,
    /// Read-only view of files finished before this request's group started.
    pub generated: Arc<GeneratedFiles>,
}

/// Decides which files to produce.
#[async_trait]
pub trait PlanningOracle: Send + Sync {
    /// Produces a plan for the given spec.
    ///
    /// # Returns
    /// * `Ok(Plan)` - A plan that already passed `Plan::validate`
    /// * `Err(OracleError)` - Transport failure or output that failed validation
    async fn plan(&self, request: PlanRequest<'_>) -> Result<Plan, OracleError>;
}

/// Writes the content of one planned file.
#[async_trait]
pub trait WritingOracle: Send + Sync {
    async fn write(&self, request: WriteRequest) -> Result<String, OracleError>;
}

/// Language-specific checker run over the whole output directory.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Checks the output tree.
    ///
    /// # Returns
    /// * `Ok(vec![])` - Verification passed
    /// * `Ok(errors)` - Diagnostics with paths relative to `output_dir`
    /// * `Err(VerifierError)` - The checker could not produce a verdict
    async fn verify(&self, output_dir: &Path) -> Result<Vec<VerifyError>, VerifierError>;
}
