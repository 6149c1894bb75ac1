// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use chief_agent::config::AgentConfig;

/// Initialize tracing from config. Uses `try_init` so it is safe to call
/// more than once (e.g. from integration tests that construct their own
/// [`AgentConfig`]).
fn init_tracing(config: &AgentConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = if std::env::var("CHIEF_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// No concrete provider ships in this crate: the binary
/// entrypoint resolves every loop name to "no provider configured" and
/// relies on embedders to link a real resolver via the library API.
fn no_provider_resolver() -> chief_agent::loops::ProviderResolver {
    std::sync::Arc::new(|_name: &str| None)
}

#[tokio::main]
async fn main() {
    let config = AgentConfig::parse();
    init_tracing(&config);

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    if let Err(e) = chief_agent::run(config, no_provider_resolver()).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
