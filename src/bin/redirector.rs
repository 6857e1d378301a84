use clap::Parser;
use tracing_subscriber::EnvFilter;

use revtun::config::load_redirector_config;
use revtun::redirector::run_redirector;

/// Public-facing half of the reverse tunnel: accepts one control
/// connection from a starter and exposes its advertised ports.
#[derive(Parser, Debug)]
#[command(name = "redirector", about = "Reverse tunnel redirector")]
struct Args {
    /// Path to the redirector JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match load_redirector_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, path = %args.config, "failed to load configuration");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = run_redirector(config) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "redirector exited");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
        }
    }
}
