//! Converge CLI entrypoint.
//!
//! This is the main entrypoint for the converge command-line tool.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use converge::cli::{Cli, Commands, OutputFormatter};
use converge::config::{Manifest, ManifestParser, ManifestValidator, find_manifest_file};
use converge::error::{ConvergeError, Result};
use converge::reconciler::{Operation, PlannedRun, Reconciler, RunContext};
use converge::remote::ProviderRegistry;
use converge::resource::ResourceSpec;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Validate { warnings } => {
            cmd_validate(cli.manifest.as_ref(), warnings, &formatter)
        }
        Commands::Plan { detailed } => {
            cmd_plan(cli.manifest.as_ref(), cli.parallelism, detailed, &formatter).await
        }
        Commands::Apply { yes } => {
            cmd_apply(cli.manifest.as_ref(), cli.parallelism, yes, &formatter).await
        }
        Commands::Destroy { yes } => {
            cmd_destroy(cli.manifest.as_ref(), cli.parallelism, yes, &formatter).await
        }
        Commands::Status => cmd_status(cli.manifest.as_ref(), &formatter).await,
    }
}

/// Validate the manifest.
fn cmd_validate(
    manifest_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let manifest_file = resolve_manifest_path(manifest_path)?;
    info!("Validating manifest: {}", manifest_file.display());

    let parser = parser_for(&manifest_file);
    parser.load_dotenv()?;
    let manifest = parser.load_file(&manifest_file)?;

    let validator = ManifestValidator::new();
    let result = validator.validate(&manifest)?;

    let specs = manifest.clone().into_specs()?;
    validator.validate_references(&specs)?;

    println!("{}", formatter.format_validation(&result, show_warnings));

    eprintln!("Manifest summary:");
    eprintln!("  Project: {}", manifest.project.name);
    eprintln!("  Environment: {}", manifest.project.environment);
    eprintln!("  Resources: {}", manifest.resources.len());

    Ok(())
}

/// Show the plan without mutating anything.
async fn cmd_plan(
    manifest_path: Option<&PathBuf>,
    parallelism: Option<usize>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_, specs) = load_manifest(manifest_path)?;
    let reconciler = build_reconciler(parallelism);

    let run = reconciler.plan(&specs).await?;
    println!("{}", formatter.format_plan(&run.plan, detailed));

    Ok(())
}

/// Apply the plan.
async fn cmd_apply(
    manifest_path: Option<&PathBuf>,
    parallelism: Option<usize>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_, specs) = load_manifest(manifest_path)?;
    let reconciler = build_reconciler(parallelism);

    let run = reconciler.plan(&specs).await?;
    if run.plan.is_empty() {
        eprintln!("No changes to apply.");
        return Ok(());
    }

    println!("{}", formatter.format_plan(&run.plan, false));

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let report = execute(&reconciler, Operation::Apply, &run).await;
    println!("{}", formatter.format_report(&report));

    if report.success {
        Ok(())
    } else {
        Err(ConvergeError::internal(format!(
            "{} action(s) did not succeed",
            report.actions.len() - report.actions.iter().filter(|a| a.succeeded()).count()
        )))
    }
}

/// Destroy every declared resource.
async fn cmd_destroy(
    manifest_path: Option<&PathBuf>,
    parallelism: Option<usize>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_, specs) = load_manifest(manifest_path)?;
    let reconciler = build_reconciler(parallelism);

    let run = reconciler.plan_destroy(&specs).await?;
    if run.plan.is_empty() {
        eprintln!("Nothing to destroy.");
        return Ok(());
    }

    eprintln!("The following resources will be destroyed:");
    for action in &run.plan.actions {
        let remote = action.remote_id.as_deref().unwrap_or("-");
        eprintln!("  - {} ({remote})", action.resource);
    }

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let report = execute(&reconciler, Operation::Destroy, &run).await;
    println!("{}", formatter.format_report(&report));

    if report.success {
        Ok(())
    } else {
        Err(ConvergeError::internal("destroy did not complete cleanly"))
    }
}

/// Show observed state of the declared resources.
async fn cmd_status(manifest_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (manifest, specs) = load_manifest(manifest_path)?;
    let reconciler = build_reconciler(None);

    let observed = reconciler.refresh(&specs).await?;
    let drift = reconciler.check_drift(&specs).await?;

    println!(
        "{}",
        formatter.format_status(
            &manifest.project.name,
            &manifest.project.environment,
            &observed,
            &drift,
        )
    );

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the manifest file path.
fn resolve_manifest_path(manifest_path: Option<&PathBuf>) -> Result<PathBuf> {
    manifest_path.map_or_else(|| find_manifest_file("."), |path| Ok(path.clone()))
}

/// Creates a parser rooted at the manifest's directory.
fn parser_for(manifest_file: &std::path::Path) -> ManifestParser {
    ManifestParser::new().with_base_path(
        manifest_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new(".")),
    )
}

/// Loads, validates, and converts the manifest.
fn load_manifest(manifest_path: Option<&PathBuf>) -> Result<(Manifest, Vec<ResourceSpec>)> {
    let manifest_file = resolve_manifest_path(manifest_path)?;
    debug!("Loading manifest from: {}", manifest_file.display());

    let parser = parser_for(&manifest_file);
    parser.load_dotenv()?;
    let manifest = parser.load_with_env(&manifest_file)?;

    let validator = ManifestValidator::new();
    validator.validate(&manifest)?;

    let specs = manifest.clone().into_specs()?;
    validator.validate_references(&specs)?;

    Ok((manifest, specs))
}

/// Builds a reconciler over the registered providers.
fn build_reconciler(parallelism: Option<usize>) -> Reconciler {
    let registry = Arc::new(ProviderRegistry::with_builtin());
    let mut reconciler = Reconciler::new(registry);
    if let Some(parallelism) = parallelism {
        reconciler = reconciler.with_parallelism(parallelism);
    }
    reconciler
}

/// Executes a planned run with Ctrl-C wired to cooperative cancellation.
async fn execute(
    reconciler: &Reconciler,
    operation: Operation,
    run: &PlannedRun,
) -> converge::ReconciliationReport {
    let ctx = RunContext::new();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested; letting in-flight actions finish...");
            cancel.cancel();
        }
    });

    reconciler.execute_run(operation, run, &ctx).await
}

/// Prompts on stderr and compares the trimmed answer.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    if expected == "y" {
        Ok(input.trim().eq_ignore_ascii_case("y"))
    } else {
        Ok(input.trim() == expected)
    }
}
