/*
 * AqyntSwap client core
 * Main entry point for the HTTP service
 */

use anyhow::Context;
use aqyntswap::{api, config::Config, service::DexService};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()
        .map_err(|e| {
            eprintln!("Failed to load configuration: {e}");
            e
        })?;
    init_tracing(&config.server.log_level);

    info!("Starting AqyntSwap service");

    let service = DexService::new(config.clone())
        .await
        .map_err(|e| {
            error!("Failed to start service: {}", e);
            e
        })
        .context("service initialization")?;

    let api_state = api::ApiState {
        config: config.clone(),
        service: Arc::new(service),
    };

    info!("Starting API server on {}:{}", config.server.host, config.server.port);

    let rocket = api::create_rocket(api_state);
    rocket
        .launch()
        .await
        .map_err(|e| anyhow::anyhow!("Rocket server failed: {e}"))?;

    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("aqyntswap={log_level}").into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
