// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain types for applications, staged configuration, and releases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant-scoped namespace of configuration keys.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Application {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: String,
    pub api_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotone per-app release version. Starts at 0, incremented by
    /// exactly 1 per successful release, never regresses.
    pub release_index: i64,
}

/// Lifecycle status of a staged configuration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum EntryStatus {
    Staged,
    Released,
}

/// The pending operation on a staged entry, reset once it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum PendingOp {
    New,
    Update,
    Delete,
}

/// A staged key/value belonging to one application.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConfigEntry {
    pub id: i64,
    pub app_id: i64,
    pub key: String,
    pub value: String,
    pub description: String,
    pub status: EntryStatus,
    pub pending_op: Option<PendingOp>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub released_at: Option<DateTime<Utc>>,
    pub released_by: Option<String>,
}

/// A single entry as it appears in a released snapshot — the wire shape
/// the long-poll endpoint serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasedEntry {
    pub key: String,
    pub value: String,
    /// Unix-seconds timestamp of the entry's last update.
    pub timestamp: i64,
}

impl ReleasedEntry {
    pub fn from_entry(entry: &ConfigEntry) -> Self {
        Self { key: entry.key.clone(), value: entry.value.clone(), timestamp: entry.updated_at.timestamp() }
    }
}

/// The currently released set of entries for an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSnapshot {
    pub app_id: i64,
    pub config: Vec<ReleasedEntry>,
    pub release_time: DateTime<Utc>,
    pub release_index: i64,
}

impl ReleaseSnapshot {
    pub fn find(&self, key: &str) -> Option<&ReleasedEntry> {
        self.config.iter().find(|e| e.key == key)
    }
}

/// An append-only history row recorded alongside every release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseLogEntry {
    pub id: i64,
    pub app_id: i64,
    pub config: Vec<ReleasedEntry>,
    pub release_time: DateTime<Utc>,
    pub release_index: i64,
    pub released_by: String,
}

/// Fields accepted when creating a new staged entry. `key`/`value` are
/// required; everything else defaults.
#[derive(Debug, Clone)]
pub struct NewStagedEntry {
    pub app_id: i64,
    pub key: String,
    pub value: String,
    pub description: String,
    pub created_by: String,
}

/// Fields accepted when editing a staged entry. `None` means "leave this
/// column untouched" — the selective-update semantics the management
/// endpoints rely on.
#[derive(Debug, Clone, Default)]
pub struct UpdateStagedEntry {
    pub value: Option<String>,
    pub description: Option<String>,
    pub updated_by: String,
}

/// Outcome of a release transaction: whether it committed, and which
/// keys were touched (for broker fan-out).
#[derive(Debug, Clone, Default)]
pub struct ReleaseOutcome {
    pub affected_keys: Vec<String>,
}
