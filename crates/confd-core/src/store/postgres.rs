// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Postgres-backed [`ReleaseStore`].
//!
//! The release transaction reads the application's `release_index`,
//! partitions staged entries by pending op, compare-and-set increments
//! the index, upserts the snapshot, and appends a log row, all inside one
//! `sqlx::Transaction`. Queries are unprepared (`sqlx::query`/`query_as`
//! with `.bind()`) rather than `query!` macros, since this workspace has
//! no `DATABASE_URL` to check against at write time.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::error::{ConfdError, ConfdResult};
use crate::model::{
    Application, ConfigEntry, NewStagedEntry, PendingOp, ReleaseLogEntry, ReleaseOutcome,
    ReleaseSnapshot, ReleasedEntry, UpdateStagedEntry,
};

use super::{ListStagedQuery, Page, ReleaseStore};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations. Called once at startup.
    pub async fn migrate(&self) -> ConfdResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| {
            ConfdError::Storage(sqlx::Error::Migrate(Box::new(e)))
        })
    }
}

fn config_list_to_entries(value: &serde_json::Value) -> ConfdResult<Vec<ReleasedEntry>> {
    Ok(serde_json::from_value(value.clone())?)
}

#[async_trait]
impl ReleaseStore for PostgresStore {
    async fn create_app(&self, code: &str, name: &str, description: &str) -> ConfdResult<Application> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let row = sqlx::query_as::<_, Application>(
            r#"
            INSERT INTO app (code, name, description, api_token)
            VALUES ($1, $2, $3, $4)
            RETURNING id, code, name, description, api_token, created_at, updated_at, release_index
            "#,
        )
        .bind(code)
        .bind(name)
        .bind(description)
        .bind(&token)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_app(&self, app_id: i64) -> ConfdResult<Option<Application>> {
        let row = sqlx::query_as::<_, Application>(
            r#"
            SELECT id, code, name, description, api_token, created_at, updated_at, release_index
            FROM app WHERE id = $1
            "#,
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_app_by_token(&self, token: &str) -> ConfdResult<Option<Application>> {
        let row = sqlx::query_as::<_, Application>(
            r#"
            SELECT id, code, name, description, api_token, created_at, updated_at, release_index
            FROM app WHERE api_token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_app(&self, app_id: i64) -> ConfdResult<()> {
        // config, release, release_log all carry ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM app WHERE id = $1").bind(app_id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(ConfdError::AppNotFound(app_id));
        }
        Ok(())
    }

    async fn list_staged(&self, app_id: i64, query: &ListStagedQuery) -> ConfdResult<Page<ConfigEntry>> {
        let page_size = query.page_size.max(1);
        let offset = query.page_index.max(0) * page_size;
        let like = query.like_key.as_deref().map(|k| format!("%{k}%"));

        let total_count: i64 = if let Some(like) = &like {
            sqlx::query_scalar(
                "SELECT count(*) FROM config WHERE app_id = $1 AND status = 'STAGED' AND key ILIKE $2",
            )
            .bind(app_id)
            .bind(like)
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_scalar("SELECT count(*) FROM config WHERE app_id = $1 AND status = 'STAGED'")
                .bind(app_id)
                .fetch_one(&self.pool)
                .await?
        };

        let items = if let Some(like) = &like {
            sqlx::query_as::<_, ConfigEntry>(
                r#"
                SELECT id, app_id, key, value, description, status, pending_op,
                       created_at, created_by, updated_at, updated_by, released_at, released_by
                FROM config
                WHERE app_id = $1 AND status = 'STAGED' AND key ILIKE $2
                ORDER BY key
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(app_id)
            .bind(like)
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, ConfigEntry>(
                r#"
                SELECT id, app_id, key, value, description, status, pending_op,
                       created_at, created_by, updated_at, updated_by, released_at, released_by
                FROM config
                WHERE app_id = $1 AND status = 'STAGED'
                ORDER BY key
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(app_id)
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(Page { items, page_index: query.page_index.max(0), page_size, total_count })
    }

    async fn get_staged(&self, app_id: i64, config_id: i64) -> ConfdResult<Option<ConfigEntry>> {
        let row = sqlx::query_as::<_, ConfigEntry>(
            r#"
            SELECT id, app_id, key, value, description, status, pending_op,
                   created_at, created_by, updated_at, updated_by, released_at, released_by
            FROM config WHERE app_id = $1 AND id = $2
            "#,
        )
        .bind(app_id)
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_staged(&self, entry: NewStagedEntry) -> ConfdResult<ConfigEntry> {
        let mut tx = self.pool.begin().await?;

        // Key uniqueness among non-deleted entries is a per-app invariant
        // (spec.md's "key unique per app among non-deleted entries"), not
        // something a plain index on (app_id, key) can express — a
        // `DELETE`-pending row for the same key must not block a recreate.
        // Check-then-insert inside one transaction, row-locked, so two
        // concurrent creates of the same key can't both pass the check.
        let collision: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM config
            WHERE app_id = $1 AND key = $2 AND pending_op IS DISTINCT FROM 'DELETE'
            FOR UPDATE
            "#,
        )
        .bind(entry.app_id)
        .bind(&entry.key)
        .fetch_optional(&mut *tx)
        .await?;
        if collision.is_some() {
            return Err(ConfdError::DuplicateKey(entry.key));
        }

        let row = sqlx::query_as::<_, ConfigEntry>(
            r#"
            INSERT INTO config (app_id, key, value, description, status, pending_op, created_by, updated_by)
            VALUES ($1, $2, $3, $4, 'STAGED', 'NEW', $5, $5)
            RETURNING id, app_id, key, value, description, status, pending_op,
                      created_at, created_by, updated_at, updated_by, released_at, released_by
            "#,
        )
        .bind(entry.app_id)
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(&entry.description)
        .bind(&entry.created_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn update_staged(
        &self,
        app_id: i64,
        config_id: i64,
        patch: UpdateStagedEntry,
    ) -> ConfdResult<()> {
        // Selective update: only columns present in `patch` are touched.
        let existing = self
            .get_staged(app_id, config_id)
            .await?
            .ok_or(ConfdError::EntryNotFound(config_id))?;

        let value = patch.value.unwrap_or(existing.value);
        let description = patch.description.unwrap_or(existing.description);
        let pending_op = match existing.pending_op {
            Some(PendingOp::New) => PendingOp::New,
            _ => PendingOp::Update,
        };

        let result = sqlx::query(
            r#"
            UPDATE config
            SET value = $1, description = $2, pending_op = $3, updated_by = $4, updated_at = now()
            WHERE app_id = $5 AND id = $6 AND status = 'STAGED'
            "#,
        )
        .bind(value)
        .bind(description)
        .bind(pending_op)
        .bind(&patch.updated_by)
        .bind(app_id)
        .bind(config_id)
        .execute(&self.pool)
        .await?;

        match result.rows_affected() {
            1 => Ok(()),
            0 => Err(ConfdError::EntryNotFound(config_id)),
            n => Err(ConfdError::UnexpectedRowCount(n)),
        }
    }

    async fn delete_staged(&self, app_id: i64, config_id: i64, deleted_by: &str) -> ConfdResult<()> {
        let existing = self
            .get_staged(app_id, config_id)
            .await?
            .ok_or(ConfdError::EntryNotFound(config_id))?;

        // An entry that was only ever staged (never released) has nothing
        // to retract at release time; remove it outright rather than
        // carrying a dangling DELETE op for a key the client never saw.
        if matches!(existing.pending_op, Some(PendingOp::New)) {
            let result = sqlx::query("DELETE FROM config WHERE app_id = $1 AND id = $2")
                .bind(app_id)
                .bind(config_id)
                .execute(&self.pool)
                .await?;
            return match result.rows_affected() {
                1 => Ok(()),
                0 => Err(ConfdError::EntryNotFound(config_id)),
                n => Err(ConfdError::UnexpectedRowCount(n)),
            };
        }

        let result = sqlx::query(
            r#"
            UPDATE config
            SET pending_op = 'DELETE', updated_by = $1, updated_at = now()
            WHERE app_id = $2 AND id = $3
            "#,
        )
        .bind(deleted_by)
        .bind(app_id)
        .bind(config_id)
        .execute(&self.pool)
        .await?;

        match result.rows_affected() {
            1 => Ok(()),
            0 => Err(ConfdError::EntryNotFound(config_id)),
            n => Err(ConfdError::UnexpectedRowCount(n)),
        }
    }

    async fn current_snapshot(&self, app_id: i64) -> ConfdResult<Option<ReleaseSnapshot>> {
        let row = sqlx::query(
            "SELECT config_list, release_time, release_index FROM release WHERE app_id = $1",
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let config_list: serde_json::Value = row.try_get("config_list")?;
        Ok(Some(ReleaseSnapshot {
            app_id,
            config: config_list_to_entries(&config_list)?,
            release_time: row.try_get("release_time")?,
            release_index: row.try_get("release_index")?,
        }))
    }

    async fn snapshots_by_app(&self, app_ids: &[i64]) -> ConfdResult<Vec<ReleaseSnapshot>> {
        if app_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT app_id, config_list, release_time, release_index FROM release WHERE app_id = ANY($1)",
        )
        .bind(app_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let config_list: serde_json::Value = row.try_get("config_list")?;
            out.push(ReleaseSnapshot {
                app_id: row.try_get("app_id")?,
                config: config_list_to_entries(&config_list)?,
                release_time: row.try_get("release_time")?,
                release_index: row.try_get("release_index")?,
            });
        }
        Ok(out)
    }

    async fn release_log(&self, app_id: i64) -> ConfdResult<Vec<ReleaseLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, app_id, config_list, release_time, release_index, released_by
            FROM release_log WHERE app_id = $1 ORDER BY release_index DESC
            "#,
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let config_list: serde_json::Value = row.try_get("config_list")?;
            out.push(ReleaseLogEntry {
                id: row.try_get("id")?,
                app_id: row.try_get("app_id")?,
                config: config_list_to_entries(&config_list)?,
                release_time: row.try_get("release_time")?,
                release_index: row.try_get("release_index")?,
                released_by: row.try_get("released_by")?,
            });
        }
        Ok(out)
    }

    async fn release(&self, app_id: i64, operator: &str) -> ConfdResult<ReleaseOutcome> {
        let mut tx = self.pool.begin().await?;

        let current_index: i64 =
            sqlx::query_scalar("SELECT release_index FROM app WHERE id = $1 FOR UPDATE")
                .bind(app_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(ConfdError::AppNotFound(app_id))?;

        let staged = sqlx::query_as::<_, ConfigEntry>(
            r#"
            SELECT id, app_id, key, value, description, status, pending_op,
                   created_at, created_by, updated_at, updated_by, released_at, released_by
            FROM config WHERE app_id = $1 AND status = 'STAGED'
            "#,
        )
        .bind(app_id)
        .fetch_all(&mut *tx)
        .await?;

        if staged.is_empty() {
            return Err(ConfdError::NothingStaged(app_id));
        }

        let new_index = current_index + 1;
        let cas = sqlx::query(
            "UPDATE app SET release_index = $1, updated_at = now() WHERE id = $2 AND release_index = $3",
        )
        .bind(new_index)
        .bind(app_id)
        .bind(current_index)
        .execute(&mut *tx)
        .await?;
        if cas.rows_affected() == 0 {
            return Err(ConfdError::ReleaseConflict(app_id));
        }

        let now = Utc::now();
        let mut affected_keys = Vec::with_capacity(staged.len());
        for entry in &staged {
            affected_keys.push(entry.key.clone());
            match entry.pending_op {
                Some(PendingOp::Delete) => {
                    sqlx::query("DELETE FROM config WHERE id = $1").bind(entry.id).execute(&mut *tx).await?;
                }
                _ => {
                    sqlx::query(
                        r#"
                        UPDATE config
                        SET status = 'RELEASED', pending_op = NULL, released_at = $1, released_by = $2
                        WHERE id = $3
                        "#,
                    )
                    .bind(now)
                    .bind(operator)
                    .bind(entry.id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        let released_rows = sqlx::query_as::<_, ConfigEntry>(
            r#"
            SELECT id, app_id, key, value, description, status, pending_op,
                   created_at, created_by, updated_at, updated_by, released_at, released_by
            FROM config WHERE app_id = $1 AND status = 'RELEASED'
            ORDER BY key
            "#,
        )
        .bind(app_id)
        .fetch_all(&mut *tx)
        .await?;

        let released: Vec<ReleasedEntry> = released_rows.iter().map(ReleasedEntry::from_entry).collect();
        let config_list = serde_json::to_value(&released)?;

        sqlx::query(
            r#"
            INSERT INTO release (app_id, config_list, release_time, release_index)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (app_id) DO UPDATE
            SET config_list = EXCLUDED.config_list,
                release_time = EXCLUDED.release_time,
                release_index = EXCLUDED.release_index
            "#,
        )
        .bind(app_id)
        .bind(&config_list)
        .bind(now)
        .bind(new_index)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO release_log (app_id, config_list, release_time, release_index, released_by)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(app_id)
        .bind(&config_list)
        .bind(now)
        .bind(new_index)
        .bind(operator)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ReleaseOutcome { affected_keys })
    }
}
