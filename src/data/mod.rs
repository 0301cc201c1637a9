mod diagnostics;
mod oracle;
mod plan;

pub use diagnostics::{VerifyError, format_error_context, group_by_file};
pub use oracle::{
    GeneratedFiles, OracleError, PlanRequest, PlanningOracle, Verifier, VerifierError,
    WriteRequest, WritingOracle,
};
pub use plan::{FileDescriptor, FileType, Plan, PlanError, group_by_order, is_safe_relative_path};
