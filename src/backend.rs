//! Startup selection of the sink and state store.
//!
//! Stream mode pairs [`JsonLinesSink`] on stdout with [`FileStateStore`];
//! database mode uses one [`DbStore`] for both.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::db::{self, Database};
use crate::db_store::DbStore;
use crate::migrate;
use crate::sink_jsonl::JsonLinesSink;
use crate::state_file::FileStateStore;
use crate::traits::{Sink, StateStore};

pub struct Backend {
    pub sink: Arc<dyn Sink>,
    pub state: Arc<dyn StateStore>,
    database: Option<Database>,
}

impl Backend {
    /// Short label used in log lines (`STDOUT` / `DATABASE`).
    pub fn mode(&self) -> &'static str {
        if self.database.is_some() {
            "DATABASE"
        } else {
            "STDOUT"
        }
    }

    pub async fn close(&self) {
        if let Some(db) = &self.database {
            db.close().await;
            tracing::info!(kind = db.kind(), "database connection closed");
        }
    }
}

pub async fn open(config: &Config) -> Result<Backend> {
    match &config.db {
        Some(db_config) => {
            let database = db::connect(&db_config.url).await?;
            migrate::run_migrations(&database).await?;
            tracing::info!(kind = database.kind(), "database mode enabled");

            let store = Arc::new(DbStore::new(database.clone()));
            Ok(Backend {
                sink: store.clone(),
                state: store,
                database: Some(database),
            })
        }
        None => Ok(Backend {
            sink: Arc::new(JsonLinesSink::stdout()),
            state: Arc::new(FileStateStore::open(config.state_dir())?),
            database: None,
        }),
    }
}
