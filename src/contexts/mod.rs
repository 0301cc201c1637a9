mod agent_runner;
mod generation_engine;
mod orphan_reconciler;
mod pipeline;
mod verify_repair;

pub use agent_runner::{
    AgentRunner, PLANNER_AGENT, Transport, WRITER_AGENT, parse_file_output, parse_plan_output,
};
pub use generation_engine::{
    FailedFile, FileResult, GenerationEngine, GenerationReport, RegenerationDecision,
    RegenerationReason, ScheduledFile, decide,
};
pub use orphan_reconciler::{Orphan, find_orphans, remove_orphans};
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, RunReport, RunStatus};
pub use verify_repair::{DEFAULT_MAX_ATTEMPTS, RepairLoop, RepairReport, VerifyOutcome};
