// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors surfaced by the release store and coordinator.
#[derive(Debug, Error)]
pub enum ConfdError {
    #[error("application {0} not found")]
    AppNotFound(i64),

    #[error("config entry {0} not found")]
    EntryNotFound(i64),

    #[error("no staged entries for application {0}")]
    NothingStaged(i64),

    /// The release transaction's `WHERE release_index = ?` compare-and-set
    /// predicate failed — another release committed first. Distinct from
    /// other storage failures so a caller could choose to retry.
    #[error("release index changed concurrently for application {0}")]
    ReleaseConflict(i64),

    /// A non-deleted entry already exists for this `(app_id, key)` pair.
    #[error("key {0:?} already staged or released for this application")]
    DuplicateKey(String),

    /// A selective update/delete was expected to affect exactly one row
    /// but didn't.
    #[error("expected to affect exactly one row, affected {0}")]
    UnexpectedRowCount(u64),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("snapshot payload was not valid json: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ConfdResult<T> = Result<T, ConfdError>;
