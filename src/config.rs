// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line and environment configuration for the connected-agent
//! plane.
//!
//! Grounded on `crates/cli/src/config.rs`'s `clap::Parser` derive with
//! paired `--flag`/`CHIEF_*` env fallbacks and `u64`-seconds fields for
//! durations.

use std::path::PathBuf;

use clap::Parser;

const DEFAULT_BACKEND_URL: &str = "wss://app.chief.dev/ws/server";
const DEFAULT_OAUTH_TOKEN_PATH: &str = "/oauth/token";
const DEFAULT_OAUTH_REVOKE_PATH: &str = "/oauth/revoke";

/// Client-side agent of the remote autonomous coding loop service.
#[derive(Debug, Parser)]
#[command(name = "chief-agent", version, about)]
pub struct AgentConfig {
    /// Directory under which project repositories are discovered.
    #[arg(long, env = "CHIEF_WORKSPACE")]
    pub workspace: PathBuf,

    /// WebSocket URL of the backend control channel.
    #[arg(long, env = "CHIEF_BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
    pub backend_url: String,

    /// Display name this device presents during handshake.
    #[arg(long, env = "CHIEF_DEVICE_NAME")]
    pub device_name: String,

    /// Workspace scan interval in seconds.
    #[arg(long, env = "CHIEF_SCAN_INTERVAL_SECS", default_value = "60")]
    pub scan_interval_secs: u64,

    /// Inactivity timeout before a project's deep watchers are torn down.
    #[arg(long, env = "CHIEF_WATCH_INACTIVITY_SECS", default_value = "600")]
    pub watch_inactivity_secs: u64,

    /// Per-iteration provider execution timeout in seconds.
    #[arg(long, env = "CHIEF_ITERATION_TIMEOUT_SECS", default_value = "1800")]
    pub iteration_timeout_secs: u64,

    /// Log output format (json or text).
    #[arg(long, env = "CHIEF_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CHIEF_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Path to the on-disk credential record. Defaults to
    /// `<user-config>/.chief/credentials.yaml` when unset.
    #[arg(long, env = "CHIEF_CREDENTIAL_PATH")]
    pub credential_path: Option<PathBuf>,

    /// Token-endpoint path on the backend host, configuration rather than
    /// a pinned constant.
    #[arg(long, env = "CHIEF_OAUTH_TOKEN_PATH", default_value = DEFAULT_OAUTH_TOKEN_PATH)]
    pub oauth_token_path: String,

    /// Revocation-endpoint path on the backend host, configuration for the
    /// same reason as `oauth_token_path` above.
    #[arg(long, env = "CHIEF_OAUTH_REVOKE_PATH", default_value = DEFAULT_OAUTH_REVOKE_PATH)]
    pub oauth_revoke_path: String,
}

impl AgentConfig {
    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scan_interval_secs)
    }

    pub fn watch_inactivity(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.watch_inactivity_secs)
    }

    pub fn iteration_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.iteration_timeout_secs)
    }

    /// Validate cross-field constraints clap's declarative attributes
    /// can't express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.workspace.is_dir() {
            anyhow::bail!("--workspace {:?} is not a directory", self.workspace);
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("--log-format must be one of: json, text");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
