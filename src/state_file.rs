//! File-backed checkpoint store.
//!
//! One file per chat under `<data_dir>/state/<peer_id>`, containing the
//! decimal id of the last processed message. Writes go to a sibling temp file
//! which is fsynced and renamed over the target, so a crash mid-write leaves
//! the previous checkpoint intact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::traits::StateStore;

pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open the store, creating the state directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, peer_id: i64) -> PathBuf {
        self.dir.join(peer_id.to_string())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, peer_id: i64) -> Result<Option<i32>> {
        let path = self.path_for(peer_id);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no state file, starting from the lookback window");
                return Ok(None);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read state file: {}", path.display()))
            }
        };

        match content.trim().parse::<i32>() {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "unreadable state file, starting from the lookback window"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, peer_id: i64, last_message_id: i32, _at: DateTime<Utc>) -> Result<()> {
        let path = self.path_for(peer_id);
        write_atomic(&path, last_message_id.to_string().as_bytes())
            .with_context(|| format!("Failed to save state file: {}", path.display()))
    }
}

/// Replace `path` with `contents` via write-temp-then-rename.
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
