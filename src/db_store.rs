//! Database-backed sink and checkpoint store.
//!
//! Messages are upserted into `messages` keyed by `(chat_peer_id,
//! message_id)`; replaying a record replaces the stored document and bumps
//! `updated_at` instead of creating a duplicate. Checkpoints live in
//! `scraper_state`, one row per chat.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use crate::db::Database;
use crate::models::MessageRecord;
use crate::traits::{Sink, StateStore};

pub struct DbStore {
    db: Database,
}

impl DbStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Sink for DbStore {
    async fn emit(&self, record: &MessageRecord) -> Result<()> {
        match &self.db {
            Database::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO messages (chat_peer_id, message_id, date, data)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (chat_peer_id, message_id) DO UPDATE SET
                        date = EXCLUDED.date,
                        data = EXCLUDED.data,
                        updated_at = NOW()
                    "#,
                )
                .bind(record.peer_id)
                .bind(record.id)
                .bind(record.date)
                .bind(Json(record))
                .execute(pool)
                .await
                .map(|_| ())
            }
            Database::Sqlite(pool) => {
                let data = serde_json::to_string(record)?;
                let now = Utc::now().timestamp();
                sqlx::query(
                    r#"
                    INSERT INTO messages (chat_peer_id, message_id, date, data, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(chat_peer_id, message_id) DO UPDATE SET
                        date = excluded.date,
                        data = excluded.data,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(record.peer_id)
                .bind(record.id)
                .bind(record.date.timestamp())
                .bind(data)
                .bind(now)
                .bind(now)
                .execute(pool)
                .await
                .map(|_| ())
            }
        }
        .with_context(|| {
            format!(
                "Failed to save message {} for chat {}",
                record.id, record.peer_id
            )
        })?;

        tracing::debug!(
            message_id = record.id,
            peer_id = record.peer_id,
            "saved message"
        );
        Ok(())
    }

    fn upserts(&self) -> bool {
        true
    }
}

#[async_trait]
impl StateStore for DbStore {
    async fn load(&self, peer_id: i64) -> Result<Option<i32>> {
        let last = match &self.db {
            Database::Postgres(pool) => {
                sqlx::query_scalar::<_, i32>(
                    "SELECT last_message_id FROM scraper_state WHERE chat_peer_id = $1",
                )
                .bind(peer_id)
                .fetch_optional(pool)
                .await
            }
            Database::Sqlite(pool) => {
                sqlx::query_scalar::<_, i32>(
                    "SELECT last_message_id FROM scraper_state WHERE chat_peer_id = ?",
                )
                .bind(peer_id)
                .fetch_optional(pool)
                .await
            }
        }
        .with_context(|| format!("Failed to read checkpoint for chat {}", peer_id))?;

        Ok(last)
    }

    async fn save(&self, peer_id: i64, last_message_id: i32, at: DateTime<Utc>) -> Result<()> {
        match &self.db {
            Database::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    r#"
                    INSERT INTO scraper_state (chat_peer_id, last_message_id, last_run_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (chat_peer_id) DO UPDATE SET
                        last_message_id = EXCLUDED.last_message_id,
                        last_run_at = EXCLUDED.last_run_at
                    "#,
                )
                .bind(peer_id)
                .bind(last_message_id)
                .bind(at)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
            }
            Database::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(
                    r#"
                    INSERT INTO scraper_state (chat_peer_id, last_message_id, last_run_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(chat_peer_id) DO UPDATE SET
                        last_message_id = excluded.last_message_id,
                        last_run_at = excluded.last_run_at
                    "#,
                )
                .bind(peer_id)
                .bind(last_message_id)
                .bind(at.timestamp())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
            }
        }
        Ok(())
    }
}
