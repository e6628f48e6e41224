//! Command-line interface: one file per subcommand under `commands/`,
//! matching the spec's `run` / `plan` / `compare` / `mirror-analytics` /
//! `apply-sql` surface.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;

#[derive(Debug, Parser)]
#[command(name = "relsync", version, about = "Incremental document-store to relational-store migration engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all but warning/error log output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write logs to this file in addition to stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Path to the table registry YAML file.
    #[arg(long, global = true, env = "RELSYNC_REGISTRY", default_value = "registry.yaml")]
    pub registry: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full incremental migration.
    Run(commands::run::RunArgs),
    /// Print the schema reconciliation plan without applying it.
    Plan(commands::plan::PlanArgs),
    /// Compare source and target identifier sets without migrating.
    Compare(commands::compare::CompareArgs),
    /// Mirror one or more external analytics tables into the target.
    MirrorAnalytics(commands::mirror_analytics::MirrorAnalyticsArgs),
    /// Apply a previously written deferred-mode SQL export file.
    ApplySql(commands::apply_sql::ApplySqlArgs),
    /// Emit a shell completion script for this CLI.
    Completions(commands::completions::CompletionsArgs),
}

/// Dispatch to the selected subcommand.
///
/// # Errors
///
/// Propagates whatever the chosen subcommand returns.
pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => commands::run::execute(args, &cli.registry).await,
        Command::Plan(args) => commands::plan::execute(args, &cli.registry).await,
        Command::Compare(args) => commands::compare::execute(args, &cli.registry).await,
        Command::MirrorAnalytics(args) => commands::mirror_analytics::execute(args).await,
        Command::ApplySql(args) => commands::apply_sql::execute(args).await,
        Command::Completions(args) => commands::completions::execute(args).await,
    }
}
