use kodeo_server::config::{CliOverrides, Config, cli_command};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "kodeo-server starting");

    let matches = cli_command().get_matches();
    let cli = CliOverrides::from_matches(&matches);
    let config = match Config::resolve(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let server = match kodeo_server::start(&config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "waiting for ctrl-c failed");
    }
    let registered = server.registry.len().await;
    info!(registered, "shutting down");
    server.shutdown().await;
}
