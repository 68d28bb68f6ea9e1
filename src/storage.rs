//! SQLite storage layer for Raksha.
//!
//! Holds the registered user profile (written by the external registration
//! flow, read by the core) and a history of resolved SOS sessions.
//!
//! # Sensitive Data
//!
//! The PIN is stored so cancellation can be verified; it is never returned
//! by any API and never logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::model::{SessionRecord, UserProfile};

/// What the SOS core needs from persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The registered user, if any.
    async fn load_profile(&self) -> anyhow::Result<Option<UserProfile>>;

    /// Append a resolved session to the history.
    async fn record_session(&self, record: &SessionRecord) -> anyhow::Result<()>;

    /// Most recently resolved sessions, newest first.
    async fn recent_sessions(&self, limit: u32) -> anyhow::Result<Vec<SessionRecord>>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:raksha.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to an in-memory database is a separate database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_profile (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                phone TEXT NOT NULL,
                pin TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guardians (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sos_sessions (
                id TEXT PRIMARY KEY,
                started_at INTEGER NOT NULL,
                resolved_at INTEGER NOT NULL,
                resolution TEXT NOT NULL,
                reason TEXT,
                location TEXT NOT NULL,
                guardians_notified INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sos_sessions_resolved_at
            ON sos_sessions(resolved_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the registered profile and its guardian list.
    ///
    /// Used for boot-time seeding; registration itself lives outside this
    /// service.
    pub async fn save_profile(&self, profile: &UserProfile) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO user_profile (id, phone, pin)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET phone = excluded.phone, pin = excluded.pin
            "#,
        )
        .bind(&profile.phone)
        .bind(&profile.pin)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM guardians").execute(&mut *tx).await?;

        for guardian in &profile.guardians {
            sqlx::query("INSERT OR IGNORE INTO guardians (phone) VALUES (?)")
                .bind(guardian)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Append a guardian; duplicates are ignored.
    pub async fn add_guardian(&self, phone: &str) -> anyhow::Result<()> {
        sqlx::query("INSERT OR IGNORE INTO guardians (phone) VALUES (?)")
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Storage {
    async fn load_profile(&self) -> anyhow::Result<Option<UserProfile>> {
        let Some(row) = sqlx::query("SELECT phone, pin FROM user_profile WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let guardians: Vec<String> = sqlx::query("SELECT phone FROM guardians ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| r.get("phone"))
            .collect();

        Ok(Some(UserProfile {
            phone: row.get("phone"),
            pin: row.get("pin"),
            guardians,
        }))
    }

    async fn record_session(&self, record: &SessionRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sos_sessions
                (id, started_at, resolved_at, resolution, reason, location, guardians_notified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.started_at.timestamp())
        .bind(record.resolved_at.timestamp())
        .bind(&record.resolution)
        .bind(&record.reason)
        .bind(&record.location)
        .bind(record.guardians_notified)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_sessions(&self, limit: u32) -> anyhow::Result<Vec<SessionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, started_at, resolved_at, resolution, reason, location, guardians_notified
            FROM sos_sessions
            ORDER BY resolved_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> anyhow::Result<SessionRecord> {
                let id: String = row.get("id");
                Ok(SessionRecord {
                    id: Uuid::parse_str(&id)?,
                    started_at: from_unix(row.get("started_at"))?,
                    resolved_at: from_unix(row.get("resolved_at"))?,
                    resolution: row.get("resolution"),
                    reason: row.get("reason"),
                    location: row.get("location"),
                    guardians_notified: row.get("guardians_notified"),
                })
            })
            .collect()
    }
}

fn from_unix(ts: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0).ok_or_else(|| anyhow::anyhow!("invalid timestamp {ts}"))
}
