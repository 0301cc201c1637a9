use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single verifier diagnostic. `file` is relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyError {
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl VerifyError {
    pub fn new(file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    /// A diagnostic not tied to any file, e.g. a verifier that timed out.
    pub fn unstructured(message: impl Into<String>) -> Self {
        Self::new(String::new(), 0, message)
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}:{}: {}", self.file, self.line, self.message)
        }
    }
}

pub fn group_by_file(errors: &[VerifyError]) -> BTreeMap<String, Vec<VerifyError>> {
    let mut grouped: BTreeMap<String, Vec<VerifyError>> = BTreeMap::new();
    for error in errors {
        grouped.entry(error.file.clone()).or_default().push(error.clone());
    }
    grouped
}

/// Renders errors as the context handed back to the writer: one `Line N: message` per error.
pub fn format_error_context(errors: &[VerifyError]) -> String {
    errors
        .iter()
        .map(|e| format!("Line {}: {}", e.line, e.message))
        .collect::<Vec<_>>()
        .join("\n")
}
