use anyhow::Result;

use crate::db::Database;

/// Create the `messages` and `scraper_state` tables and their indexes.
///
/// Idempotent; safe to run before every scrape.
pub async fn run_migrations(db: &Database) -> Result<()> {
    match db {
        Database::Postgres(pool) => {
            for statement in POSTGRES_SCHEMA {
                sqlx::query(statement).execute(pool).await?;
            }
        }
        Database::Sqlite(pool) => {
            for statement in SQLITE_SCHEMA {
                sqlx::query(statement).execute(pool).await?;
            }
        }
    }
    Ok(())
}

const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id SERIAL PRIMARY KEY,
        chat_peer_id BIGINT NOT NULL,
        message_id INTEGER NOT NULL,
        date TIMESTAMPTZ NOT NULL,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (chat_peer_id, message_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scraper_state (
        chat_peer_id BIGINT PRIMARY KEY,
        last_message_id INTEGER NOT NULL,
        last_run_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_chat_date ON messages (chat_peer_id, date DESC)",
    "CREATE INDEX IF NOT EXISTS idx_messages_data ON messages USING GIN (data jsonb_path_ops)",
    "CREATE INDEX IF NOT EXISTS idx_messages_text_fts ON messages USING GIN (to_tsvector('simple', coalesce(data->>'text', '')))",
];

// Timestamps are unix seconds and the document is JSON text.
const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_peer_id INTEGER NOT NULL,
        message_id INTEGER NOT NULL,
        date INTEGER NOT NULL,
        data TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (chat_peer_id, message_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scraper_state (
        chat_peer_id INTEGER PRIMARY KEY,
        last_message_id INTEGER NOT NULL,
        last_run_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_chat_date ON messages (chat_peer_id, date DESC)",
];
