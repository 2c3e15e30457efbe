//! Session record CRUD for the SQLite store.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::FromRow;
use std::path::PathBuf;

use crate::error::DatabaseError;
use crate::types::{AssetId, Entitlement};
use crate::{Error, Result};

use super::{OfflineState, SessionRecord, SessionStore, SqliteSessionStore};

/// Session record row (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
struct SessionRecordRow {
    asset_id: String,
    entitlement: String,
    location: Option<String>,
    state: i32,
    updated_at: i64,
}

impl TryFrom<SessionRecordRow> for SessionRecord {
    type Error = Error;

    fn try_from(row: SessionRecordRow) -> Result<Self> {
        let entitlement: Entitlement = serde_json::from_str(&row.entitlement).map_err(|e| {
            Error::Database(DatabaseError::CorruptRecord {
                asset_id: row.asset_id.clone(),
                reason: format!("entitlement snapshot: {}", e),
            })
        })?;

        Ok(SessionRecord {
            asset_id: AssetId::new(row.asset_id),
            entitlement,
            location: row.location.map(PathBuf::from),
            state: OfflineState::from_i32(row.state),
            updated_at: Utc
                .timestamp_millis_opt(row.updated_at)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn lookup(&self, asset_id: &AssetId) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRecordRow>(
            r#"
            SELECT asset_id, entitlement, location, state, updated_at
            FROM session_records
            WHERE asset_id = ?
            "#,
        )
        .bind(asset_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to look up session record: {}",
                e
            )))
        })?;

        row.map(SessionRecord::try_from).transpose()
    }

    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let entitlement = serde_json::to_string(&record.entitlement)?;
        let location = record
            .location
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned());

        sqlx::query(
            r#"
            INSERT INTO session_records (asset_id, entitlement, location, state, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(asset_id) DO UPDATE SET
                entitlement = excluded.entitlement,
                location = excluded.location,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.asset_id.as_str())
        .bind(entitlement)
        .bind(location)
        .bind(record.state.to_i32())
        .bind(record.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save session record: {}",
                e
            )))
        })?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query_as::<_, SessionRecordRow>(
            r#"
            SELECT asset_id, entitlement, location, state, updated_at
            FROM session_records
            ORDER BY asset_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list session records: {}",
                e
            )))
        })?;

        rows.into_iter().map(SessionRecord::try_from).collect()
    }

    async fn remove(&self, asset_id: &AssetId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM session_records WHERE asset_id = ?")
            .bind(asset_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to remove session record: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
