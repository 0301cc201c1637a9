//! Oracle adapter that delegates planning and writing to an external agent runner.
//!
//! Each call sends one JSON request `{agent, model, system_prompt, input}` and
//! expects the envelope `{success, output, error}` back, either over a child
//! process's stdio or over HTTP.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::data::{OracleError, Plan, PlanRequest, PlanningOracle, WriteRequest, WritingOracle};
use crate::existing_output::ExistingFile;
use crate::registries::LanguageProfile;
use crate::spec_index::SpecIndex;

pub const PLANNER_AGENT: &str = "plan_sdk";
pub const WRITER_AGENT: &str = "write_sdk_file";

/// How requests reach the agent runner
#[derive(Debug, Clone)]
pub enum Transport {
    /// Spawn `program args...` per request and talk JSON over stdin/stdout
    Process { program: String, args: Vec<String> },
    /// POST the request to `endpoint` with a bearer token
    Http { endpoint: String, api_key: String },
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Process {
            program: "python3".to_string(),
            args: vec!["runner.py".to_string()],
        }
    }
}

#[derive(Debug, Serialize)]
struct RunnerRequest<'a> {
    agent: &'a str,
    model: &'a str,
    system_prompt: String,
    input: Value,
}

#[derive(Debug, Deserialize)]
struct RunnerResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<String>,
}

pub struct AgentRunner {
    transport: Transport,
    model: String,
    profile: LanguageProfile,
    instructions: Option<String>,
    index: Arc<SpecIndex>,
    existing_files: Arc<Vec<ExistingFile>>,
    http: reqwest::Client,
}

impl AgentRunner {
    /// Creates a runner for one language target
    ///
    /// # Arguments
    /// * `transport` - Where requests are sent
    /// * `model` - Model identifier forwarded to the runner
    /// * `profile` - Supplies the planner and writer instructions
    /// * `instructions` - Optional user instructions appended to every prompt
    /// * `index` - The spec the writer reads endpoints and schemas from
    /// * `existing_files` - Pre-existing output, for style continuity
    pub fn new(
        transport: Transport,
        model: impl Into<String>,
        profile: LanguageProfile,
        instructions: Option<String>,
        index: Arc<SpecIndex>,
        existing_files: Arc<Vec<ExistingFile>>,
    ) -> Self {
        Self {
            transport,
            model: model.into(),
            profile,
            instructions,
            index,
            existing_files,
            http: reqwest::Client::new(),
        }
    }

    async fn execute(&self, agent: &str, template: &str, input: Value) -> Result<Value, OracleError> {
        let populated = populate(template, &input)?;
        let request = RunnerRequest {
            agent,
            model: &self.model,
            system_prompt: compose_system_prompt(&populated, self.instructions.as_deref()),
            input,
        };

        tracing::debug!(agent, model = %self.model, "invoking agent runner");

        let response = match &self.transport {
            Transport::Process { program, args } => {
                execute_via_process(program, args, &request).await?
            }
            Transport::Http { endpoint, api_key } => {
                self.execute_via_http(endpoint, api_key, &request).await?
            }
        };

        if !response.success {
            let error = response.error.unwrap_or_else(|| "Unknown error".to_string());
            return Err(OracleError::Failed(error));
        }
        Ok(response.output)
    }

    async fn execute_via_http(
        &self,
        endpoint: &str,
        api_key: &str,
        request: &RunnerRequest<'_>,
    ) -> Result<RunnerResponse, OracleError> {
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| OracleError::Transport(format!("Request to {} failed: {}", endpoint, e)))?
            .error_for_status()
            .map_err(|e| OracleError::Transport(format!("Runner endpoint returned an error: {}", e)))?;

        response
            .json::<RunnerResponse>()
            .await
            .map_err(|e| OracleError::Transport(format!("Failed to parse response JSON: {}", e)))
    }
}

#[async_trait]
impl PlanningOracle for AgentRunner {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<Plan, OracleError> {
        let input = json!({
            "language": self.profile.name,
            "spec": request.index,
            "existingPaths": request.existing_paths,
            "fileTypes": request.file_types,
            "instructions": request.instructions,
        });
        let output = self
            .execute(PLANNER_AGENT, &self.profile.planner_instructions, input)
            .await?;
        parse_plan_output(output)
    }
}

#[async_trait]
impl WritingOracle for AgentRunner {
    async fn write(&self, request: WriteRequest) -> Result<String, OracleError> {
        let input = json!({
            "language": self.profile.name,
            "file": request.file,
            "plan": *request.plan,
            "fixErrors": request.fix_errors,
            "generatedFiles": *request.generated,
            "existingFiles": *self.existing_files,
            "spec": *self.index,
        });
        let output = self
            .execute(WRITER_AGENT, &self.profile.writer_instructions, input)
            .await?;
        parse_file_output(output)
    }
}

async fn execute_via_process(
    program: &str,
    args: &[String],
    request: &RunnerRequest<'_>,
) -> Result<RunnerResponse, OracleError> {
    let body = serde_json::to_vec(request)
        .map_err(|e| OracleError::Transport(format!("Failed to serialize request: {}", e)))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| OracleError::Transport(format!("Failed to spawn runner `{}`: {}", program, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&body)
            .await
            .map_err(|e| OracleError::Transport(format!("Failed to write to runner stdin: {}", e)))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| OracleError::Transport(format!("Failed to read runner output: {}", e)))?;

    if !output.status.success() {
        return Err(OracleError::Transport(format!(
            "Runner failed. Stdout: {} Stderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| OracleError::Transport(format!("Failed to parse response JSON: {}", e)))
}

fn compose_system_prompt(base: &str, instructions: Option<&str>) -> String {
    match instructions.map(str::trim).filter(|s| !s.is_empty()) {
        Some(extra) => format!("{}\n\nAdditional instructions from the user:\n{}", base, extra),
        None => base.to_string(),
    }
}

/// Fill `{{input.a.b}}` placeholders from the request input.
///
/// `{{input.x?}}` is optional and disappears when unresolved; a missing
/// mandatory placeholder is an error.
fn populate(template: &str, input: &Value) -> Result<String, OracleError> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start..].find("}}") else {
            break;
        };
        result.push_str(&rest[..start]);

        let placeholder = rest[start + 2..start + len].trim();
        let (path, optional) = match placeholder.strip_suffix('?') {
            Some(path) => (path, true),
            None => (placeholder, false),
        };

        let Some(field_path) = path.strip_prefix("input.") else {
            return Err(OracleError::InvalidOutput(format!(
                "invalid placeholder path '{}' in agent instructions",
                path
            )));
        };

        let value = field_path
            .split('.')
            .try_fold(input, |current, key| current.get(key));

        match value {
            Some(Value::String(s)) => result.push_str(s),
            Some(Value::Null) | None if optional => {}
            Some(Value::Null) | None => {
                return Err(OracleError::InvalidOutput(format!(
                    "required placeholder '{}' could not be resolved",
                    path
                )));
            }
            Some(other) => result.push_str(&other.to_string()),
        }

        rest = &rest[start + len + 2..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Validate planner output. Accepts `{"files": [...]}`, a bare array, or
/// either one as JSON text.
pub fn parse_plan_output(output: Value) -> Result<Plan, OracleError> {
    let value = match output {
        Value::String(text) => serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| OracleError::InvalidOutput(format!("plan is not valid JSON: {}", e)))?,
        other => other,
    };

    let plan = if value.is_array() {
        serde_json::from_value(value).map(Plan::new)
    } else {
        serde_json::from_value::<Plan>(value)
    }
    .map_err(|e| OracleError::InvalidOutput(format!("plan does not match the schema: {}", e)))?;

    if plan.is_empty() {
        return Err(OracleError::InvalidOutput("plan contains no files".to_string()));
    }
    plan.validate()
        .map_err(|e| OracleError::InvalidOutput(e.to_string()))?;

    Ok(plan)
}

/// Validate writer output: `{"code": "..."}` or plain text.
pub fn parse_file_output(output: Value) -> Result<String, OracleError> {
    let code = match output {
        Value::String(text) => strip_code_fence(&text).to_string(),
        Value::Object(mut map) => match map.remove("code") {
            Some(Value::String(code)) => code,
            _ => {
                return Err(OracleError::InvalidOutput(
                    "writer output has no string field \"code\"".to_string(),
                ));
            }
        },
        other => {
            return Err(OracleError::InvalidOutput(format!(
                "unexpected writer output: {}",
                other
            )));
        }
    };

    if code.trim().is_empty() {
        return Err(OracleError::InvalidOutput("writer returned empty file content".to_string()));
    }
    Ok(code)
}

/// Strip one Markdown code fence wrapping the whole text, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return text;
    };
    let Some(newline) = after_open.find('\n') else {
        return text;
    };
    after_open[newline + 1..]
        .strip_suffix("```")
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FileDescriptor, FileType};
    use crate::registries::LanguageRegistry;

    #[test]
    fn plan_output_accepts_object_array_and_fenced_text() {
        let object = json!({"files": [
            {"id": "types", "outputPath": "src/types.ts", "type": "types", "description": "", "order": 0}
        ]});
        assert_eq!(parse_plan_output(object).expect("object").len(), 1);

        let array = json!([
            {"id": "index", "outputPath": "src/index.ts", "type": "index", "order": 3}
        ]);
        assert_eq!(parse_plan_output(array).expect("array").files[0].id, "index");

        let fenced = Value::String(
            "```json\n{\"files\": [{\"id\": \"readme\", \"outputPath\": \"README.md\", \"type\": \"readme\", \"order\": 3}]}\n```"
                .to_string(),
        );
        let plan = parse_plan_output(fenced).expect("fenced");
        assert_eq!(plan.files[0].file_type, FileType::Readme);
    }

    #[test]
    fn invalid_plans_become_oracle_errors() {
        let duplicate = json!({"files": [
            {"id": "a", "outputPath": "a.ts", "type": "types", "order": 0},
            {"id": "a", "outputPath": "b.ts", "type": "types", "order": 0}
        ]});
        assert!(matches!(
            parse_plan_output(duplicate),
            Err(OracleError::InvalidOutput(_))
        ));

        let bad_type = json!({"files": [{"id": "a", "outputPath": "a.ts", "type": "widget", "order": 0}]});
        assert!(matches!(
            parse_plan_output(bad_type),
            Err(OracleError::InvalidOutput(_))
        ));

        assert!(parse_plan_output(json!({"files": []})).is_err());
    }

    #[test]
    fn file_output_variants() {
        assert_eq!(
            parse_file_output(json!({"code": "export const x = 1;"})).expect("object"),
            "export const x = 1;"
        );
        assert_eq!(
            parse_file_output(Value::String("```ts\nexport {};\n```".into())).expect("fenced"),
            "export {};\n"
        );
        assert!(parse_file_output(json!({"code": "   "})).is_err());
        assert!(parse_file_output(json!({"content": "x"})).is_err());
        assert!(parse_file_output(json!(42)).is_err());
    }

    #[test]
    fn populate_resolves_nested_and_optional_placeholders() {
        let input = json!({"file": {"outputPath": "src/pets.ts", "order": 2}, "fixErrors": null});
        let text = populate(
            "Write {{input.file.outputPath}} (order {{input.file.order}}).{{input.fixErrors?}}",
            &input,
        )
        .expect("populated");
        assert_eq!(text, "Write src/pets.ts (order 2).");

        assert!(populate("{{input.missing}}", &input).is_err());
        assert!(populate("{{output.file}}", &input).is_err());
        assert_eq!(populate("no placeholders", &input).expect("plain"), "no placeholders");
    }

    #[test]
    fn user_instructions_are_appended() {
        assert_eq!(compose_system_prompt("base", None), "base");
        assert_eq!(compose_system_prompt("base", Some("  ")), "base");
        assert_eq!(
            compose_system_prompt("base", Some("Use axios")),
            "base\n\nAdditional instructions from the user:\nUse axios"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_transport_round_trip() {
        let profile = LanguageRegistry::builtin()
            .get("typescript")
            .expect("profile")
            .clone();
        let index = Arc::new(
            SpecIndex::parse_str(include_str!("../../tests/fixtures/petstore.yaml")).expect("index"),
        );
        let runner = AgentRunner::new(
            Transport::Process {
                program: "sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    r#"cat > /dev/null; echo '{"success": true, "output": {"code": "export const ok = true;"}}'"#
                        .to_string(),
                ],
            },
            "test-model",
            profile,
            None,
            index,
            Arc::new(Vec::new()),
        );

        let file = FileDescriptor {
            id: "index".to_string(),
            output_path: "src/index.ts".to_string(),
            file_type: FileType::Index,
            description: String::new(),
            related_tags: None,
            related_schemas: None,
            order: 3,
        };
        let request = WriteRequest {
            plan: Arc::new(Plan::new(vec![file.clone()])),
            file,
            fix_errors: None,
            generated: Arc::new(Default::default()),
        };

        let code = runner.write(request).await.expect("runner responds");
        assert_eq!(code, "export const ok = true;");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runner_failure_envelope_is_oracle_failure() {
        let profile = LanguageRegistry::builtin()
            .get("typescript")
            .expect("profile")
            .clone();
        let index = Arc::new(
            SpecIndex::parse_str(include_str!("../../tests/fixtures/petstore.yaml")).expect("index"),
        );
        let runner = AgentRunner::new(
            Transport::Process {
                program: "sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    r#"cat > /dev/null; echo '{"success": false, "error": "rate limited"}'"#.to_string(),
                ],
            },
            "test-model",
            profile,
            None,
            index.clone(),
            Arc::new(Vec::new()),
        );

        let err = runner
            .plan(PlanRequest {
                index: &index,
                instructions: None,
                existing_paths: &[],
                file_types: &FileType::ALL,
            })
            .await
            .expect_err("failure envelope");
        assert!(matches!(err, OracleError::Failed(ref msg) if msg == "rate limited"));
    }
}
