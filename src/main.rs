use clap::Parser;
use relsync::cli::{Cli, dispatch};
use relsync::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(error) = logging::init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref()) {
        eprintln!("failed to initialize logging: {error}");
        std::process::exit(1);
    }

    let run = dispatch(cli);
    tokio::pin!(run);

    let exit_code = tokio::select! {
        result = &mut run => {
            match result {
                Ok(()) => 0,
                Err(error) => {
                    tracing::error!(%error, "migration failed");
                    1
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, current batch rolling back to its savepoint");
            130
        }
    };

    std::process::exit(exit_code);
}
