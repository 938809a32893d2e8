// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use confd_core::broker::NotificationBroker;
use confd_core::release::ReleaseCoordinator;
use confd_core::store::ReleaseStore;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Shared server state threaded through every handler.
pub struct ConfdState {
    pub store: Arc<dyn ReleaseStore>,
    pub broker: Arc<NotificationBroker>,
    pub coordinator: ReleaseCoordinator,
    pub config: ServerConfig,
    pub shutdown: CancellationToken,
}

impl ConfdState {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        broker: Arc<NotificationBroker>,
        config: ServerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let coordinator = ReleaseCoordinator::new(store.clone(), broker.clone());
        Self { store, broker, coordinator, config, shutdown }
    }
}
