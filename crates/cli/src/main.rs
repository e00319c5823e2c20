//! bibsync command-line tool.
//!
//! Provides subcommands for pulling remote library changes through the
//! semantic merge engine, previewing a merge without touching anything,
//! and validating configuration files.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bibsync_core::config::AppConfig;
use bibsync_core::engine::MergeEngine;
use bibsync_core::errors::MergeError;
use bibsync_core::merge::FieldConflict;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// bibsync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "bibsync",
    version,
    about = "Semantically merge remote changes into a git-versioned BibTeX library"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./bibsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge remote library changes into the working copy and record them.
    Pull {
        /// Print the report as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Show what a pull would do without modifying anything.
    Plan {
        /// Print the analysis as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Validate a configuration file.
    CheckConfig,
}

fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::CheckConfig => cmd_check_config(&cli.config),
        Commands::Pull { json } => cmd_pull(&cli.config, json),
        Commands::Plan { json } => cmd_plan(&cli.config, json),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn cmd_pull(config_path: &PathBuf, json: bool) -> Result<ExitCode> {
    let engine = open_engine(config_path)?;
    let library = engine.config().library.file.clone();

    match engine.merge_pull(&library) {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.up_to_date {
                println!("Already up to date.");
            } else if report.fast_forwarded {
                println!("Fast-forwarded to remote.");
            } else {
                println!(
                    "Merged: {} new, {} patched, {} deleted ({} resolved by hand), commit {}",
                    report.stats.new_entries,
                    report.stats.patched_entries,
                    report.stats.deleted_entries,
                    report.resolved_entries,
                    report.commit_id.as_deref().unwrap_or("-")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(MergeError::UnresolvedConflicts { conflicts }) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&conflicts)?);
            } else {
                eprintln!("Merge aborted: {} unresolved conflict(s).", conflicts.len());
                for conflict in &conflicts {
                    print_conflict(conflict);
                }
            }
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e).context("merge pull failed"),
    }
}

fn cmd_plan(config_path: &PathBuf, json: bool) -> Result<ExitCode> {
    let engine = open_engine(config_path)?;
    let library = engine.config().library.file.clone();
    let analysis = engine.analyze(&library).context("merge analysis failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(ExitCode::SUCCESS);
    }

    if analysis.up_to_date {
        println!("Already up to date.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("local:  {}", analysis.local);
    println!("remote: {}", analysis.remote);
    println!(
        "base:   {}",
        analysis.base.as_deref().unwrap_or("(no common ancestor)")
    );
    println!(
        "plan:   {} new, {} patched, {} deleted",
        analysis.plan.new_entries.len(),
        analysis.plan.field_patches.len(),
        analysis.plan.deleted_entry_keys.len()
    );
    if analysis.conflicts.is_empty() {
        println!("No conflicts.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{} conflict(s):", analysis.conflicts.len());
        for conflict in &analysis.conflicts {
            print_conflict(conflict);
        }
        Ok(ExitCode::from(2))
    }
}

fn cmd_check_config(config_path: &PathBuf) -> Result<ExitCode> {
    let config = AppConfig::load(config_path)
        .with_context(|| format!("invalid configuration: {}", config_path.display()))?;
    println!("Configuration OK.");
    println!("  repository: {}", config.repository.path.display());
    println!("  remote:     {}", config.repository.remote);
    println!("  library:    {}", config.library.file.display());
    println!("  encoding:   {}", config.library.encoding);
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_engine(config_path: &PathBuf) -> Result<MergeEngine> {
    let config = AppConfig::load(config_path)
        .with_context(|| format!("failed to load config: {}", config_path.display()))?;
    MergeEngine::open(config).context("failed to open repository")
}

fn print_conflict(conflict: &FieldConflict) {
    println!(
        "  {} / {}: base={} local={} remote={}",
        conflict.citation_key,
        conflict.field,
        render(&conflict.base),
        render(&conflict.local),
        render(&conflict.remote)
    );
}

fn render(value: &Option<String>) -> String {
    match value {
        Some(v) => format!("{:?}", v),
        None => "(absent)".into(),
    }
}
