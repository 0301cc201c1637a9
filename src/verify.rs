//! External verifier process and diagnostic parsing.

use async_trait::async_trait;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;

use crate::data::{Verifier, VerifierError, VerifyError};

pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Replaced with the output directory in verifier arguments.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticFormat {
    /// `src/a.ts(12,5): error TS2304: Cannot find name 'x'.`
    Tsc,
    /// rustc short (`src/lib.rs:3:9: error[E0425]: ...`) or long (`--> src/lib.rs:3:9`) form
    Rustc,
}

impl DiagnosticFormat {
    /// Extract error diagnostics. Paths are returned as the tool reported them.
    pub fn parse(self, output: &str) -> Vec<VerifyError> {
        match self {
            DiagnosticFormat::Tsc => parse_tsc_errors(output),
            DiagnosticFormat::Rustc => parse_rustc_errors(output),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyCommand {
    pub program: String,
    pub args: Vec<String>,
    pub format: DiagnosticFormat,
}

/// Runs a checker command inside the output directory.
pub struct CommandVerifier {
    command: VerifyCommand,
    timeout: Duration,
}

impl CommandVerifier {
    pub fn new(command: VerifyCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, output_dir: &Path) -> Result<Vec<VerifyError>, VerifierError> {
        // The child runs inside the output dir, so a relative path would no longer resolve.
        let output_dir = std::path::absolute(output_dir).unwrap_or_else(|_| output_dir.to_path_buf());
        let output_dir = output_dir.as_path();
        let output_arg = output_dir.to_string_lossy().to_string();
        let args: Vec<String> = self
            .command
            .args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output_arg))
            .collect();

        tracing::debug!(program = %self.command.program, ?args, "running verifier");

        let mut command = Command::new(&self.command.program);
        command
            .args(&args)
            .current_dir(output_dir)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(VerifierError::Spawn {
                    program: self.command.program.clone(),
                    source,
                });
            }
            Err(_) => return Err(VerifierError::Timeout(self.timeout)),
        };

        if output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = if stdout.trim().is_empty() {
            stderr.to_string()
        } else {
            format!("{}\n{}", stdout, stderr)
        };

        Ok(diagnostics_from_output(output_dir, self.command.format, &text))
    }
}

/// Parse failing checker output and normalize every path against `output_dir`.
///
/// Failure output with nothing parsable still yields one unstructured error,
/// so a failed run never reads as a pass.
pub fn diagnostics_from_output(
    output_dir: &Path,
    format: DiagnosticFormat,
    text: &str,
) -> Vec<VerifyError> {
    let mut errors = format.parse(text);
    for error in &mut errors {
        error.file = normalize_diagnostic_path(output_dir, &error.file);
    }

    if errors.is_empty() {
        let first_line = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("verifier failed without output");
        errors.push(VerifyError::unstructured(first_line));
    }

    errors
}

/// Express a reported path relative to the output root.
///
/// Relative paths are taken as relative to the root (the verifier's working
/// directory). The joined path is folded lexically and the root prefix is
/// stripped, trying the root as given and then canonicalized. Paths outside
/// the root come back folded but otherwise unchanged.
pub fn normalize_diagnostic_path(output_root: &Path, reported: &str) -> String {
    let reported = reported.trim();
    if reported.is_empty() {
        return String::new();
    }

    let candidate = Path::new(reported);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        output_root.join(candidate)
    };
    let resolved = lexical_normalize(&joined);

    let mut roots = vec![lexical_normalize(output_root)];
    if let Ok(canonical) = output_root.canonicalize() {
        roots.push(canonical);
    }

    for root in &roots {
        if let Ok(relative) = resolved.strip_prefix(root) {
            return to_slash(relative);
        }
    }

    to_slash(&resolved)
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn tsc_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.+?)\((\d+),\d+\): error TS\d+: (.+)$").expect("valid regex")
    })
}

fn rustc_short_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.+?):(\d+):\d+: error(?:\[E\d+\])?: (.+)$").expect("valid regex")
    })
}

fn rustc_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(error|warning)(?:\[[A-Z]\d+\])?: (.+)$").expect("valid regex"))
}

fn rustc_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*-->\s+([^\s:][^:]*):(\d+):(\d+)\s*$").expect("valid regex"))
}

pub fn parse_tsc_errors(output: &str) -> Vec<VerifyError> {
    output
        .lines()
        .filter_map(|line| {
            let cap = tsc_error_re().captures(line.trim_end())?;
            Some(VerifyError::new(
                cap[1].trim(),
                cap[2].parse().unwrap_or(0),
                cap[3].trim(),
            ))
        })
        .collect()
}

pub fn parse_rustc_errors(output: &str) -> Vec<VerifyError> {
    let short: Vec<VerifyError> = output
        .lines()
        .filter_map(|line| {
            let cap = rustc_short_re().captures(line.trim_end())?;
            Some(VerifyError::new(
                cap[1].trim(),
                cap[2].parse().unwrap_or(0),
                cap[3].trim(),
            ))
        })
        .collect();
    if !short.is_empty() {
        return short;
    }

    // Long form: the first `-->` span after an `error` header locates it.
    let mut errors = Vec::new();
    let mut pending: Option<String> = None;
    for line in output.lines() {
        let line = line.trim_end();
        if let Some(cap) = rustc_header_re().captures(line) {
            pending = (&cap[1] == "error").then(|| cap[2].trim().to_string());
            continue;
        }
        if let Some(cap) = rustc_span_re().captures(line) {
            if let Some(message) = pending.take() {
                errors.push(VerifyError::new(
                    &cap[1],
                    cap[2].parse().unwrap_or(0),
                    message,
                ));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tsc_errors() {
        let output = "\
src/client.ts(10,5): error TS2304: Cannot find name 'Foo'.
src/types.ts(3,1): error TS2300: Duplicate identifier 'Pet'.
Found 2 errors in 2 files.
";
        let errors = parse_tsc_errors(output);
        assert_eq!(
            errors,
            vec![
                VerifyError::new("src/client.ts", 10, "Cannot find name 'Foo'."),
                VerifyError::new("src/types.ts", 3, "Duplicate identifier 'Pet'."),
            ]
        );
    }

    #[test]
    fn tsc_output_without_errors_parses_empty() {
        assert!(parse_tsc_errors("").is_empty());
        assert!(parse_tsc_errors("Version 5.4.0\n").is_empty());
    }

    #[test]
    fn parses_rustc_short_form_and_skips_warnings() {
        let output = "\
src/lib.rs:3:9: warning: unused variable: `x`
src/client.rs:14:5: error[E0425]: cannot find value `base_url` in this scope
src/types.rs:2:1: error: expected item, found `}`
error: could not compile `petstore` (lib) due to 2 previous errors
";
        let errors = parse_rustc_errors(output);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].file, "src/client.rs");
        assert_eq!(errors[0].line, 14);
        assert_eq!(errors[1].message, "expected item, found `}`");
    }

    #[test]
    fn parses_rustc_long_form() {
        let output = "\
warning: unused import: `std::fmt`
 --> src/lib.rs:1:5
  |
error[E0308]: mismatched types
  --> src/client.rs:22:16
   |
22 |         return 5;
   |                ^ expected `String`, found integer
";
        let errors = parse_rustc_errors(output);
        assert_eq!(
            errors,
            vec![VerifyError::new("src/client.rs", 22, "mismatched types")]
        );
    }

    #[test]
    fn normalizes_relative_absolute_and_dotted_paths() {
        let root = Path::new("/work/sdk");
        assert_eq!(normalize_diagnostic_path(root, "src/index.ts"), "src/index.ts");
        assert_eq!(normalize_diagnostic_path(root, "./src/index.ts"), "src/index.ts");
        assert_eq!(
            normalize_diagnostic_path(root, "/work/sdk/src/client.ts"),
            "src/client.ts"
        );
        assert_eq!(
            normalize_diagnostic_path(root, "src/../lib/util.ts"),
            "lib/util.ts"
        );
        assert_eq!(
            normalize_diagnostic_path(root, "/elsewhere/types.d.ts"),
            "/elsewhere/types.d.ts"
        );
        assert_eq!(normalize_diagnostic_path(root, ""), "");
    }

    #[test]
    fn unparsable_failure_becomes_unstructured_error() {
        let errors = diagnostics_from_output(
            Path::new("/work/sdk"),
            DiagnosticFormat::Tsc,
            "\nerror TS5057: Cannot find a tsconfig.json file\n",
        );
        assert_eq!(
            errors,
            vec![VerifyError::unstructured(
                "error TS5057: Cannot find a tsconfig.json file"
            )]
        );
    }

    #[cfg(unix)]
    fn sh(script: &str) -> VerifyCommand {
        VerifyCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            format: DiagnosticFormat::Tsc,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_verifier_reports_success_and_normalized_errors() {
        let dir = tempfile::tempdir().expect("tempdir");

        let passing = CommandVerifier::new(sh("exit 0"), Duration::from_secs(5));
        assert!(passing.verify(dir.path()).await.expect("ran").is_empty());

        let script = format!(
            "echo '{}/src/a.ts(4,2): error TS1005: \";\" expected.'; exit 2",
            dir.path().display()
        );
        let failing = CommandVerifier::new(sh(&script), Duration::from_secs(5));
        let errors = failing.verify(dir.path()).await.expect("ran");
        assert_eq!(errors, vec![VerifyError::new("src/a.ts", 4, "\";\" expected.")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relative_output_dir_is_passed_as_absolute() {
        let dir = tempfile::tempdir_in(".").expect("tempdir");
        let relative = dir.path();
        assert!(relative.is_relative());

        let script = "test -d \"$0\" || { echo \"missing $0\"; exit 1; }; \
                      echo \"$0/src/a.ts(4,2): error TS1005: ';' expected.\"; exit 2";
        let command = VerifyCommand {
            args: vec!["-c".to_string(), script.to_string(), OUTPUT_PLACEHOLDER.to_string()],
            ..sh("")
        };
        let verifier = CommandVerifier::new(command, Duration::from_secs(5));

        let errors = verifier.verify(relative).await.expect("ran");
        assert_eq!(errors, vec![VerifyError::new("src/a.ts", 4, "';' expected.")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_verifier_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let slow = CommandVerifier::new(sh("sleep 5"), Duration::from_millis(100));
        let err = slow.verify(dir.path()).await.expect_err("timed out");
        assert!(matches!(err, VerifierError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let verifier = CommandVerifier::new(
            VerifyCommand {
                program: "sdkgen-no-such-verifier".to_string(),
                args: Vec::new(),
                format: DiagnosticFormat::Tsc,
            },
            Duration::from_secs(1),
        );
        let err = verifier.verify(dir.path()).await.expect_err("spawn fails");
        assert!(matches!(err, VerifierError::Spawn { .. }));
    }
}
