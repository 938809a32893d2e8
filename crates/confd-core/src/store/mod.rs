// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The release store: durable state for applications, staged configuration,
//! released snapshots, and release history.

pub mod postgres;

use async_trait::async_trait;

use crate::error::ConfdResult;
use crate::model::{
    Application, ConfigEntry, NewStagedEntry, ReleaseLogEntry, ReleaseOutcome, ReleaseSnapshot,
    UpdateStagedEntry,
};

/// Pagination + prefix-match filter for listing staged entries.
#[derive(Debug, Clone, Default)]
pub struct ListStagedQuery {
    pub like_key: Option<String>,
    pub page_index: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_index: i64,
    pub page_size: i64,
    pub total_count: i64,
}

/// Durable persistence for the release-and-stage state machine.
///
/// Implementations must uphold the cross-entity invariants:
/// `ReleaseSnapshot.release_index == Application.release_index`,
/// strictly increasing `ReleaseLogEntry.release_index` per app, and
/// `ConfigEntry.status == Released` entries appearing verbatim in the
/// current snapshot.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn create_app(&self, code: &str, name: &str, description: &str) -> ConfdResult<Application>;
    async fn get_app(&self, app_id: i64) -> ConfdResult<Option<Application>>;
    async fn get_app_by_token(&self, token: &str) -> ConfdResult<Option<Application>>;
    /// Cascading delete of an app and all its staged entries, snapshot, and
    /// release log.
    async fn delete_app(&self, app_id: i64) -> ConfdResult<()>;

    async fn list_staged(&self, app_id: i64, query: &ListStagedQuery) -> ConfdResult<Page<ConfigEntry>>;
    async fn get_staged(&self, app_id: i64, config_id: i64) -> ConfdResult<Option<ConfigEntry>>;
    async fn create_staged(&self, entry: NewStagedEntry) -> ConfdResult<ConfigEntry>;
    async fn update_staged(
        &self,
        app_id: i64,
        config_id: i64,
        patch: UpdateStagedEntry,
    ) -> ConfdResult<()>;
    /// Soft-delete: stage a `Delete` pending op. The row is retained until
    /// the next release.
    async fn delete_staged(&self, app_id: i64, config_id: i64, deleted_by: &str) -> ConfdResult<()>;

    async fn current_snapshot(&self, app_id: i64) -> ConfdResult<Option<ReleaseSnapshot>>;
    async fn snapshots_by_app(&self, app_ids: &[i64]) -> ConfdResult<Vec<ReleaseSnapshot>>;
    async fn release_log(&self, app_id: i64) -> ConfdResult<Vec<ReleaseLogEntry>>;

    /// The transactional promotion: read the current release index,
    /// partition staged entries, CAS-increment the index, upsert the
    /// snapshot, append a log entry — all inside one transaction. Returns
    /// the keys touched for broker fan-out.
    async fn release(&self, app_id: i64, operator: &str) -> ConfdResult<ReleaseOutcome>;
}
