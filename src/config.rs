//! Settings resolution: command-line overrides, then `sdkgen.config.json`,
//! then built-in defaults.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::contexts::{DEFAULT_MAX_ATTEMPTS, Transport};
use crate::verify::DEFAULT_VERIFY_TIMEOUT;

pub const CONFIG_FILE: &str = "sdkgen.config.json";
pub const API_KEY_ENV: &str = "SDKGEN_API_KEY";

pub const DEFAULT_LANGUAGE: &str = "typescript";
pub const DEFAULT_OUTPUT: &str = "./sdk";
pub const DEFAULT_MODEL: &str = "openai/gpt-5.2";

/// Contents of `sdkgen.config.json`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    pub spec: Option<PathBuf>,
    pub language: Option<String>,
    pub output: Option<PathBuf>,
    pub instructions: Option<String>,
    pub instructions_file: Option<PathBuf>,
    pub model: Option<String>,
    pub verify: Option<bool>,
    pub max_verify_attempts: Option<usize>,
    pub verify_timeout_secs: Option<u64>,
    /// Runner command as an argv array
    pub runner: Option<Vec<String>>,
    pub endpoint: Option<String>,
}

impl FileConfig {
    /// Loads the config file at `path`.
    ///
    /// # Returns
    /// * `Ok(None)` - No file at `path`
    /// * `Ok(Some(config))` - The parsed file
    /// * `Err` - The file exists but could not be read or parsed
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(Some(config))
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub spec: Option<PathBuf>,
    pub language: Option<String>,
    pub output: Option<PathBuf>,
    pub instructions: Option<String>,
    pub instructions_file: Option<PathBuf>,
    pub model: Option<String>,
    pub force: bool,
    pub no_verify: bool,
    pub runner: Option<Vec<String>>,
    pub endpoint: Option<String>,
    pub max_verify_attempts: Option<usize>,
    pub verify_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub spec: PathBuf,
    pub language: String,
    pub output: PathBuf,
    pub instructions: Option<String>,
    pub model: String,
    pub force: bool,
    pub verify: bool,
    pub max_verify_attempts: usize,
    pub verify_timeout: Duration,
    pub transport: Transport,
}

impl Settings {
    /// Merges overrides over the file config over defaults.
    ///
    /// `api_key` is only required when an HTTP endpoint is configured.
    pub fn resolve(
        overrides: CliOverrides,
        file: Option<FileConfig>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let file = file.unwrap_or_default();

        let Some(spec) = overrides.spec.or(file.spec) else {
            bail!("No OpenAPI spec given. Pass --spec or set \"spec\" in {}", CONFIG_FILE);
        };

        // An instructions flag of either kind replaces both file keys.
        let instructions = if overrides.instructions.is_some() || overrides.instructions_file.is_some() {
            read_instructions(overrides.instructions, overrides.instructions_file)?
        } else {
            read_instructions(file.instructions, file.instructions_file)?
        };

        let transport = match overrides.endpoint.or(file.endpoint) {
            Some(endpoint) => {
                let Some(api_key) = api_key.filter(|k| !k.trim().is_empty()) else {
                    bail!("{} must be set to use the runner endpoint {}", API_KEY_ENV, endpoint);
                };
                Transport::Http { endpoint, api_key }
            }
            None => match overrides.runner.or(file.runner) {
                Some(argv) => runner_transport(argv)?,
                None => Transport::default(),
            },
        };

        Ok(Self {
            spec,
            language: overrides
                .language
                .or(file.language)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            output: overrides
                .output
                .or(file.output)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            instructions,
            model: overrides
                .model
                .or(file.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            force: overrides.force,
            verify: !overrides.no_verify && file.verify.unwrap_or(true),
            max_verify_attempts: overrides
                .max_verify_attempts
                .or(file.max_verify_attempts)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS)
                .max(1),
            verify_timeout: overrides
                .verify_timeout_secs
                .or(file.verify_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_VERIFY_TIMEOUT),
            transport,
        })
    }
}

/// Output directory for `status` and `clear-cache`, which need nothing else.
pub fn resolve_output(output: Option<PathBuf>, file: Option<FileConfig>) -> PathBuf {
    output
        .or_else(|| file.and_then(|f| f.output))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
}

fn read_instructions(text: Option<String>, path: Option<PathBuf>) -> Result<Option<String>> {
    match (text, path) {
        (Some(_), Some(_)) => bail!("Use either instructions or an instructions file, not both"),
        (Some(text), None) => Ok(Some(text)),
        (None, Some(path)) => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read instructions file: {}", path.display()))?;
            Ok(Some(text))
        }
        (None, None) => Ok(None),
    }
}

fn runner_transport(mut argv: Vec<String>) -> Result<Transport> {
    if argv.is_empty() {
        bail!("Runner command must not be empty");
    }
    let program = argv.remove(0);
    Ok(Transport::Process {
        program,
        args: argv,
    })
}
