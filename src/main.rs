//! Process entry point: load environment, configuration, and hand off to
//! the composition root.

mod auth;
mod config;
mod cookies;
mod error;
mod extractor;
mod handlers;
mod jobs;
mod kernel;
mod middleware;
mod models;
mod ratelimit;
mod readiness;
mod redact;
mod routes;
mod scheduler;
mod startup;
mod state;
mod storage;
mod telemetry;
mod template;
mod validation;
mod worker;

use config::ConfigSnapshot;
use kernel::GatewayKernel;
use std::path::PathBuf;
use tracing::error;

const DEFAULT_CONFIG_PATH: &str = "config/extractor-gateway.toml";

fn resolve_config_path() -> PathBuf {
    if let Some(arg) = std::env::args().nth(1) {
        return PathBuf::from(arg);
    }
    if let Ok(path) = std::env::var("EXTRACTOR_GATEWAY_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config_path = resolve_config_path();
    let config = ConfigSnapshot::load(Some(&config_path))?;

    telemetry::init_tracing("extractor_gateway", &config.logging.level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_stack_size(4 * 1024 * 1024)
        .build()?;

    runtime.block_on(async move {
        let kernel = match GatewayKernel::ignite(config).await {
            Ok(kernel) => kernel,
            Err(e) => {
                error!(error = %e, "startup validation failed");
                std::process::exit(1);
            }
        };

        if let Err(e) = kernel.launch().await {
            error!(error = %e, "gateway terminated with an error");
            std::process::exit(1);
        }
    });

    Ok(())
}
