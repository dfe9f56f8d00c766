//! SQLite verdict store

use super::{retry_on_lock, StoredVerdict, VerdictStore};
use cg_common::{Error, Event, Result, Sender, SynthesizedVerdict};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid stored timestamp '{}': {}", text, e)))
}

pub struct SqliteVerdictStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteVerdictStore {
    /// Open (creating if needed) the database file at `db_path`
    pub async fn open(db_path: &Path, max_lock_wait_ms: u64) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!("Connecting to database: {}", db_url);

        let pool = SqlitePool::connect(&db_url).await?;
        Self::from_pool(pool, max_lock_wait_ms).await
    }

    /// Private in-memory database (single connection)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool, 1000).await
    }

    pub async fn from_pool(pool: SqlitePool, max_lock_wait_ms: u64) -> Result<Self> {
        init_tables(&pool).await?;
        Ok(Self {
            pool,
            max_lock_wait_ms,
        })
    }
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verdicts (
            event_ref TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            sender TEXT NOT NULL,
            text TEXT NOT NULL,
            event_timestamp TEXT NOT NULL,
            overall_score REAL NOT NULL,
            escalation_level TEXT NOT NULL,
            recommended_action TEXT NOT NULL,
            verdict_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_verdicts_session_time ON verdicts (session_id, event_timestamp)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_verdicts_created ON verdicts (created_at)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (verdicts)");
    Ok(())
}

#[async_trait::async_trait]
impl VerdictStore for SqliteVerdictStore {
    async fn save(&self, event: &Event, verdict: &SynthesizedVerdict) -> Result<()> {
        // Prepare all data before touching the pool
        let event_ref = verdict.event_ref.to_string();
        let verdict_json = serde_json::to_string(verdict)?;
        let event_timestamp = timestamp_text(&event.timestamp);
        let created_at = timestamp_text(&verdict.created_at);

        retry_on_lock("save_verdict", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO verdicts (
                    event_ref, session_id, sender, text, event_timestamp,
                    overall_score, escalation_level, recommended_action,
                    verdict_json, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event_ref)
            .bind(&verdict.session_id)
            .bind(event.sender.as_str())
            .bind(&event.text)
            .bind(&event_timestamp)
            .bind(verdict.overall_score)
            .bind(verdict.escalation_level.as_str())
            .bind(verdict.recommended_action.as_str())
            .bind(&verdict_json)
            .bind(&created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<StoredVerdict>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, sender, text, event_timestamp, verdict_json
            FROM verdicts
            WHERE session_id = ?
            ORDER BY event_timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut stored = rows
            .iter()
            .map(|row| -> Result<StoredVerdict> {
                let sender: String = row.get("sender");
                let timestamp: String = row.get("event_timestamp");
                let verdict_json: String = row.get("verdict_json");
                Ok(StoredVerdict {
                    session_id: row.get("session_id"),
                    sender: sender.parse::<Sender>()?,
                    text: row.get("text"),
                    timestamp: parse_timestamp(&timestamp)?,
                    verdict: serde_json::from_str(&verdict_json)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        stored.reverse();
        Ok(stored)
    }

    async fn active_sessions(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let sessions: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT session_id FROM verdicts WHERE created_at >= ? ORDER BY session_id",
        )
        .bind(timestamp_text(&since))
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}
