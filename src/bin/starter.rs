use clap::Parser;
use tracing_subscriber::EnvFilter;

use revtun::config::load_starter_config;
use revtun::starter::run_starter;

/// Outbound-only half of the reverse tunnel: dials the redirector and
/// proxies frames to local backend services.
#[derive(Parser, Debug)]
#[command(name = "starter", about = "Reverse tunnel starter")]
struct Args {
    /// Path to the starter JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match load_starter_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, path = %args.config, "failed to load configuration");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = run_starter(config) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "starter exited");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
        }
    }
}
