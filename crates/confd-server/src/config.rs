// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the confd server.
#[derive(Debug, Clone, clap::Args)]
pub struct ServerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "CONFD_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "CONFD_PORT")]
    pub port: u16,

    /// Postgres connection string.
    #[arg(long, env = "CONFD_DATABASE_URL")]
    pub database_url: String,

    /// Bearer token gating the management API. If unset, management auth is disabled.
    #[arg(long, env = "CONFD_MANAGEMENT_TOKEN")]
    pub management_token: Option<String>,

    /// Reconciliation sweeper period in milliseconds.
    #[arg(long, default_value_t = 5000, env = "CONFD_SWEEP_INTERVAL_MS")]
    pub sweep_interval_ms: u64,

    /// Long-poll deadline in milliseconds before a parked request resolves 304.
    #[arg(long, default_value_t = 60_000, env = "CONFD_LONG_POLL_TIMEOUT_MS")]
    pub long_poll_timeout_ms: u64,

    /// Max Postgres connections in the pool.
    #[arg(long, default_value_t = 10, env = "CONFD_DB_MAX_CONNECTIONS")]
    pub db_max_connections: u32,
}

impl ServerConfig {
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn long_poll_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.long_poll_timeout_ms)
    }
}
