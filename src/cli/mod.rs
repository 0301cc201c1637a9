use anyhow::{Context, Result, bail};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod progress;

use progress::ProgressIndicator;
use sdkgen::config::{API_KEY_ENV, CONFIG_FILE, CliOverrides, FileConfig, Settings, resolve_output};
use sdkgen::contexts::{AgentRunner, Pipeline, PipelineOptions, RunReport, RunStatus, VerifyOutcome};
use sdkgen::data::Verifier;
use sdkgen::existing_output::{existing_paths, read_existing_files};
use sdkgen::manifest::Manifest;
use sdkgen::registries::LanguageRegistry;
use sdkgen::spec_index::SpecIndex;
use sdkgen::verify::CommandVerifier;

#[derive(Clone, Copy)]
pub struct Config {
    pub verbose: bool,
    pub dry_run: bool,
}

pub async fn generate(overrides: CliOverrides, config: &Config) -> Result<()> {
    let file_config = FileConfig::load(Path::new(CONFIG_FILE))?;
    let settings = Settings::resolve(overrides, file_config, env::var(API_KEY_ENV).ok())?;

    let registry = LanguageRegistry::builtin();
    let profile = registry.get(&settings.language)?.clone();

    let index = SpecIndex::from_path(&settings.spec)
        .with_context(|| format!("Failed to load spec: {}", settings.spec.display()))?;
    print_spec_summary(&index, &settings);

    let existing = read_existing_files(&settings.output, &profile.extensions);
    if config.verbose && !existing.is_empty() {
        println!("Found {} existing file(s) in {}", existing.len(), settings.output.display());
    }

    let mut options = PipelineOptions::new(&settings.output);
    options.instructions = settings.instructions.clone();
    options.force = settings.force;
    options.dry_run = config.dry_run;
    options.max_verify_attempts = settings.max_verify_attempts;
    options.existing_paths = existing_paths(&existing);
    options.file_types = profile.file_types.clone();

    let verifier: Option<Arc<dyn Verifier>> = if settings.verify {
        profile
            .verify
            .clone()
            .map(|command| Arc::new(CommandVerifier::new(command, settings.verify_timeout)) as Arc<dyn Verifier>)
    } else {
        None
    };

    let index = Arc::new(index);
    let runner = Arc::new(AgentRunner::new(
        settings.transport.clone(),
        settings.model.clone(),
        profile,
        settings.instructions.clone(),
        Arc::clone(&index),
        Arc::new(existing),
    ));

    let mut progress = ProgressIndicator::new();
    let pipeline = Pipeline::new(runner.clone(), runner, verifier, options);
    let report = pipeline.run(&index).await?;

    print_report(&report, &settings.output, config, &mut progress);

    if report.status() == RunStatus::Partial {
        bail!(
            "{} file(s) failed to generate; the next run retries them",
            report.failed.len()
        );
    }

    Ok(())
}

pub fn status(output: Option<PathBuf>, _config: &Config) -> Result<()> {
    let output = resolve_output(output, FileConfig::load(Path::new(CONFIG_FILE))?);
    match Manifest::read(&output) {
        Some(manifest) => println!("{}", manifest.summary()),
        None => println!("No manifest found in {}", output.display()),
    }
    Ok(())
}

pub fn clear_cache(output: Option<PathBuf>, config: &Config) -> Result<()> {
    let output = resolve_output(output, FileConfig::load(Path::new(CONFIG_FILE))?);
    let path = Manifest::path(&output);

    if config.dry_run {
        println!("[DRY RUN] Would remove {}", path.display());
        return Ok(());
    }

    if Manifest::remove(&output)? {
        println!("✓ Removed {}", path.display());
    } else {
        println!("No manifest found in {}", output.display());
    }
    Ok(())
}

fn print_spec_summary(index: &SpecIndex, settings: &Settings) {
    println!("{} v{}", index.title(), index.version());
    println!(
        "  {} tag(s), {} endpoint(s), {} schema(s)",
        index.tag_names().len(),
        index.endpoint_count(),
        index.schemas.len()
    );
    println!(
        "Generating {} SDK into {}",
        settings.language,
        settings.output.display()
    );
}

fn print_report(report: &RunReport, output: &Path, config: &Config, progress: &mut ProgressIndicator) {
    if report.cache_hit {
        println!("⊚ Spec and instructions unchanged, nothing to regenerate");
        return;
    }

    progress.set_total(report.planned);

    if report.dry_run {
        for scheduled in &report.scheduled {
            println!(
                "[DRY RUN] Would generate {} -> {} ({})",
                scheduled.file.id, scheduled.file.output_path, scheduled.reason
            );
        }
        for file in &report.cached {
            println!("[DRY RUN] Would reuse {} -> {}", file.id, file.output_path);
        }
        println!(
            "[DRY RUN] {} of {} file(s) would be regenerated",
            report.scheduled.len(),
            report.planned
        );
        return;
    }

    for file in &report.cached {
        progress.cached_item();
        if config.verbose {
            println!("⊚ Skipping {} (up to date)", file.id);
        }
    }
    for file in &report.generated {
        progress.complete_item(true);
        println!("✓ Generated {} -> {}", file.id, file.output_path);
    }
    for failed in &report.failed {
        progress.complete_item(false);
        eprintln!("✗ Failed to generate {}: {}", failed.id, failed.reason);
    }

    for orphan in &report.removed_orphans {
        println!(
            "✓ Removed orphaned file {}",
            output.join(&orphan.output_path).display()
        );
    }

    for id in &report.repaired {
        println!("✓ Repaired {}", id);
    }
    for failed in &report.repair_failures {
        eprintln!("✗ Failed to repair {}: {}", failed.id, failed.reason);
    }

    let verification = match &report.verification {
        VerifyOutcome::NotRun => "not run".to_string(),
        VerifyOutcome::Skipped => "skipped (no verifier for this language)".to_string(),
        VerifyOutcome::Passed { attempts } => format!("passed after {} attempt(s)", attempts),
        VerifyOutcome::PassedWithWarnings { attempts, errors } => {
            eprintln!(
                "✗ Verification still reports {} error(s) after {} attempt(s):",
                errors.len(),
                attempts
            );
            for error in errors {
                eprintln!("    {}", error);
            }
            format!("{} error(s) remaining", errors.len())
        }
    };

    if report.status() == RunStatus::UpToDate {
        println!("⊚ All files up to date");
    }

    progress.finish(&verification);
}
