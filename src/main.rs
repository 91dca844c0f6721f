use clap::Parser;
use tracing::{debug, error};

use spin_aks::cli::{run, App, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("spin-aks started with verbosity level: {}", cli.verbose);

    let result = match App::production() {
        Ok(app) => run(cli.command, &app).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
