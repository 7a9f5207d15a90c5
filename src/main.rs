use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use kalshi_options_bot::config::SessionConfig;
use kalshi_options_bot::runner::SessionRunner;
use kalshi_options_bot::sync::Event;
use kalshi_options_bot::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());

    let config = match SessionConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config from {}: {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.logging);

    let shutdown = Arc::new(Event::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(target: "runner", "interrupt received, shutting down");
                shutdown.set();
            }
        });
    }

    match SessionRunner::new(config).run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "runner", error = %e, "session terminated abnormally");
            ExitCode::FAILURE
        }
    }
}
