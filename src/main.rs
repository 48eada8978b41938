use anyhow::{Context, Result};
use dotenvy::dotenv;
use posterlink::config::Config;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(debug_mode: bool) {
    let default = if debug_mode {
        "debug,hyper=info,hyper_util=info,reqwest=info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv_result = dotenv();
    let config = Config::from_env().context("Invalid configuration")?;
    init_tracing(config.debug_mode);
    match dotenv_result {
        Ok(path) => info!("Loaded environment from {:?}", path),
        Err(e) => warn!("No .env file loaded ({}) - relying on environment", e),
    }
    info!("Loaded config: {:?}", config);
    posterlink::app::run_server(config).await
}
