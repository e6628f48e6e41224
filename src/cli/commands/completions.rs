//! `completions` subcommand: emit a shell completion script for this CLI.

use clap::{Args, CommandFactory};
use clap_complete::Shell;

use crate::cli::Cli;
use crate::error::Result;

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate a completion script for.
    pub shell: Shell,
}

/// Execute the `completions` subcommand.
///
/// # Errors
///
/// This subcommand cannot fail; the signature matches the other
/// subcommands so `dispatch` can treat them uniformly.
pub async fn execute(args: CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(args.shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}
