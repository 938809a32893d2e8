// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! confd: the HTTP surface for the application configuration release
//! service. Domain logic lives in `confd-core`; this crate is transport,
//! process configuration, and wiring.

pub mod config;
pub mod error;
pub mod state;
pub mod transport;

use std::sync::Arc;

use confd_core::broker::NotificationBroker;
use confd_core::store::postgres::PostgresStore;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::state::ConfdState;
use crate::transport::build_router;

/// Run the confd server until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let pool = PgPoolOptions::new().max_connections(config.db_max_connections).connect(&config.database_url).await?;
    let store = PostgresStore::new(pool);
    store.migrate().await?;
    let store: Arc<dyn confd_core::store::ReleaseStore> = Arc::new(store);

    let broker = Arc::new(NotificationBroker::new());

    confd_core::sweep::spawn_sweeper(store.clone(), broker.clone(), config.sweep_interval(), shutdown.clone());
    spawn_signal_handler(shutdown.clone());

    let state = Arc::new(ConfdState::new(store, broker, config, shutdown.clone()));

    tracing::info!(%addr, "confd listening");
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

/// Cancel `shutdown` on the first SIGTERM/SIGINT so `axum::serve`'s graceful
/// shutdown and the sweeper's cancellation loop actually drain; a second
/// signal forces an immediate exit for an operator who doesn't want to wait.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                tracing::info!("received SIGTERM");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                tracing::info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                tracing::info!("received SIGTERM again, forcing exit");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                tracing::info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}
