//! Configuration loading and validation.
//!
//! Values come from the command line or the environment (`TELEGRAM_API_ID`,
//! `TELEGRAM_CHAT_ID`, ...), optionally layered over a TOML file passed with
//! `--config`. Environment and CLI values always win over the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::ChatRef;

pub const DEFAULT_DATA_DIR: &str = "./.telegram-scraper-data";
pub const DEFAULT_LOOKBACK_HOURS: u32 = 24;

/// Raw configuration inputs, read by clap from flags or environment.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    /// Telegram API id (from my.telegram.org).
    #[arg(long, env = "TELEGRAM_API_ID", hide_env_values = true)]
    pub api_id: Option<String>,

    /// Telegram API hash.
    #[arg(long, env = "TELEGRAM_API_HASH", hide_env_values = true)]
    pub api_hash: Option<String>,

    /// Portable string session produced by `tgscrape login`.
    #[arg(long, env = "TELEGRAM_STRING_SESSION", hide_env_values = true)]
    pub string_session: Option<String>,

    /// Chat to scrape: a marked peer id (negative for groups/channels) or a username.
    #[arg(long = "chat", env = "TELEGRAM_CHAT_ID")]
    pub chat_id: Option<String>,

    /// Maximum age, in hours, of messages fetched during catch-up.
    #[arg(long, env = "LOOKBACK_HOURS")]
    pub lookback_hours: Option<String>,

    /// Database connection string (`postgres://...` or `sqlite:...`).
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Directory holding the session file and per-chat state files.
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Use the database for state and output (same as `--db`).
    #[arg(long, env = "USE_DATABASE")]
    pub use_database: Option<String>,

    /// Optional TOML file with the same keys, in lower case.
    #[arg(long = "config", global = true)]
    pub config_file: Option<PathBuf>,
}

/// Keys accepted in the optional TOML file.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    api_id: Option<i32>,
    api_hash: Option<String>,
    string_session: Option<String>,
    chat_id: Option<toml::Value>,
    lookback_hours: Option<u32>,
    database_url: Option<String>,
    data_dir: Option<PathBuf>,
    use_database: Option<bool>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    /// Required for scraping; `chats` and `login` run without it.
    pub chat: Option<ChatRef>,
    pub lookback_hours: u32,
    pub data_dir: PathBuf,
    /// Present only when database mode is enabled.
    pub db: Option<DbConfig>,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub string_session: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
}

impl Config {
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session")
    }

    pub fn use_database(&self) -> bool {
        self.db.is_some()
    }

    /// The chat to scrape, or an error naming the missing variable.
    pub fn require_chat(&self) -> Result<&ChatRef> {
        self.chat
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("TELEGRAM_CHAT_ID environment variable is required"))
    }
}

/// Build a validated [`Config`] from CLI/env inputs.
///
/// `db_flag` is the `--db` switch; database mode is on when either it or
/// `USE_DATABASE` is set.
pub fn load_config(args: &ConfigArgs, db_flag: bool) -> Result<Config> {
    let file = match &args.config_file {
        Some(path) => read_file_config(path)?,
        None => FileConfig::default(),
    };

    let api_id = match &args.api_id {
        Some(raw) => raw
            .trim()
            .parse::<i32>()
            .with_context(|| format!("TELEGRAM_API_ID must be an integer, got '{}'", raw))?,
        None => match file.api_id {
            Some(id) => id,
            None => bail!("TELEGRAM_API_ID environment variable is required"),
        },
    };

    let api_hash = match args.api_hash.clone().or(file.api_hash) {
        Some(hash) if !hash.trim().is_empty() => hash.trim().to_string(),
        _ => bail!("TELEGRAM_API_HASH environment variable is required"),
    };

    let string_session = args
        .string_session
        .clone()
        .or(file.string_session)
        .filter(|s| !s.trim().is_empty());

    let chat_raw = match (&args.chat_id, &file.chat_id) {
        (Some(raw), _) => Some(raw.clone()),
        (None, Some(toml::Value::Integer(id))) => Some(id.to_string()),
        (None, Some(toml::Value::String(s))) => Some(s.clone()),
        (None, Some(other)) => bail!("chat_id must be an integer or a string, got {}", other),
        (None, None) => None,
    };
    let chat = match chat_raw {
        Some(raw) if !raw.trim().is_empty() => Some(raw.parse::<ChatRef>()?),
        _ => None,
    };

    let lookback_hours = match &args.lookback_hours {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .with_context(|| format!("LOOKBACK_HOURS must be a non-negative integer, got '{}'", raw))?,
        None => file.lookback_hours.unwrap_or(DEFAULT_LOOKBACK_HOURS),
    };
    if lookback_hours == 0 {
        bail!("LOOKBACK_HOURS must be > 0");
    }

    let data_dir = args
        .data_dir
        .clone()
        .or(file.data_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    let use_database = db_flag
        || match &args.use_database {
            Some(raw) => parse_bool(raw)
                .with_context(|| format!("USE_DATABASE must be a boolean, got '{}'", raw))?,
            None => file.use_database.unwrap_or(false),
        };

    let database_url = args
        .database_url
        .clone()
        .or(file.database_url)
        .filter(|s| !s.trim().is_empty());

    let db = if use_database {
        match database_url {
            Some(url) => Some(DbConfig { url }),
            None => bail!("database mode is enabled but DATABASE_URL is missing"),
        }
    } else {
        None
    };

    Ok(Config {
        telegram: TelegramConfig {
            api_id,
            api_hash,
            string_session,
        },
        chat,
        lookback_hours,
        data_dir,
        db,
    })
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("unrecognized boolean '{}'", other),
    }
}
