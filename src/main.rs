use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "sdkgen")]
#[command(about = "Generate client SDKs from OpenAPI descriptions, regenerating only what changed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Enable verbose debug output")]
    verbose: bool,

    #[arg(long, global = true, help = "Show what would be regenerated without writing anything")]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Plan, generate and verify an SDK for an OpenAPI spec")]
    Generate(GenerateArgs),

    #[command(about = "Show the files recorded in the output manifest")]
    Status {
        #[arg(long, help = "SDK output directory")]
        output: Option<PathBuf>,
    },

    #[command(about = "Delete the output manifest so the next run regenerates everything")]
    ClearCache {
        #[arg(long, help = "SDK output directory")]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long, help = "Path to the OpenAPI 3.x description (YAML or JSON)")]
    spec: Option<PathBuf>,

    #[arg(long, help = "Target language (typescript, rust)")]
    language: Option<String>,

    #[arg(long, help = "SDK output directory")]
    output: Option<PathBuf>,

    #[arg(long, conflicts_with = "instructions_file", help = "Extra instructions for the planner and writer")]
    instructions: Option<String>,

    #[arg(long, help = "Read extra instructions from a file")]
    instructions_file: Option<PathBuf>,

    #[arg(long, help = "Model identifier passed to the agent runner")]
    model: Option<String>,

    #[arg(long, help = "Regenerate every file regardless of the manifest")]
    force: bool,

    #[arg(long, help = "Skip verification of the generated output")]
    no_verify: bool,

    #[arg(long, num_args = 1.., help = "Agent runner command and its arguments")]
    runner: Option<Vec<String>>,

    #[arg(long, conflicts_with = "runner", help = "HTTP endpoint of the agent runner")]
    endpoint: Option<String>,

    #[arg(long, help = "Verification attempts before giving up (default 2)")]
    max_verify_attempts: Option<usize>,

    #[arg(long, help = "Seconds before a verifier run is killed (default 30)")]
    verify_timeout_secs: Option<u64>,
}

impl From<GenerateArgs> for sdkgen::config::CliOverrides {
    fn from(args: GenerateArgs) -> Self {
        Self {
            spec: args.spec,
            language: args.language,
            output: args.output,
            instructions: args.instructions,
            instructions_file: args.instructions_file,
            model: args.model,
            force: args.force,
            no_verify: args.no_verify,
            runner: args.runner,
            endpoint: args.endpoint,
            max_verify_attempts: args.max_verify_attempts,
            verify_timeout_secs: args.verify_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli::Config {
        verbose: cli.verbose,
        dry_run: cli.dry_run,
    };

    match cli.command {
        Commands::Generate(args) => {
            cli::generate(args.into(), &config).await?;
        }
        Commands::Status { output } => {
            cli::status(output, &config)?;
        }
        Commands::ClearCache { output } => {
            cli::clear_cache(output, &config)?;
        }
    }

    Ok(())
}
