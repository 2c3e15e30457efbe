//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::SqliteSessionStore;

/// Schema migrations as (version, statement), applied in order
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    r#"
    CREATE TABLE session_records (
        asset_id TEXT PRIMARY KEY NOT NULL,
        entitlement TEXT NOT NULL,
        location TEXT,
        state INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL
    )
    "#,
)];

fn connection_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::ConnectionFailed(format!("{context}: {e}")))
}

fn migration_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::MigrationFailed(format!("{context}: {e}")))
}

impl SqliteSessionStore {
    /// Open (or create) the session database
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| connection_failed("Failed to create database directory", e))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| connection_failed("Failed to parse database path", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| connection_failed("Failed to connect to database", e))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_failed("Failed to create schema_version table", e))?;

        let current: i64 = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query schema version: {e}"
                )))
            })?
            .unwrap_or(0);

        for &(version, statement) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            tracing::info!(version, "Applying session store migration");

            // dropping the transaction on an early return rolls it back
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| migration_failed("Failed to begin transaction", e))?;

            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| migration_failed(&format!("Migration v{version} failed"), e))?;

            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *tx)
                .await
                .map_err(|e| migration_failed("Failed to record migration", e))?;

            tx.commit()
                .await
                .map_err(|e| migration_failed(&format!("Failed to commit migration v{version}"), e))?;
        }

        Ok(())
    }

    /// Close the connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
