use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{IntakeError, IntakeResult};

use super::{SessionRecord, SessionStore, is_valid_session_id};

/// One pretty-printed JSON file per session.
///
/// Directory structure:
/// ```text
/// sessions/
/// ├── <session-id-1>.json
/// └── <session-id-2>.json
/// ```
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Create the store, making the directory if needed
    pub async fn new(dir: impl AsRef<Path>) -> IntakeResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| IntakeError::Persistence(format!("Failed to create {:?}: {}", dir, e)))?;
        Ok(Self { dir })
    }

    fn record_path(&self, session_id: &str) -> IntakeResult<PathBuf> {
        if !is_valid_session_id(session_id) {
            return Err(IntakeError::NotFound(format!("session {session_id}")));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, session_id: &str) -> IntakeResult<Option<SessionRecord>> {
        let path = self.record_path(session_id)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(IntakeError::Persistence(format!(
                    "Failed to read {:?}: {}",
                    path, e
                )));
            }
        };
        let record = serde_json::from_str(&content)
            .map_err(|e| IntakeError::Persistence(format!("Corrupt record {:?}: {}", path, e)))?;
        Ok(Some(record))
    }

    async fn upsert(&self, record: &SessionRecord) -> IntakeResult<()> {
        let path = self.record_path(&record.session_id)?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;

        // Write-then-rename so a crash never leaves a half-written record
        fs::write(&tmp, &json)
            .await
            .map_err(|e| IntakeError::Persistence(format!("Failed to write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| IntakeError::Persistence(format!("Failed to replace {:?}: {}", path, e)))?;

        debug!("Stored session {} ({} bytes)", record.session_id, json.len());
        Ok(())
    }

    async fn list(&self) -> IntakeResult<Vec<SessionRecord>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| IntakeError::Persistence(format!("Failed to list {:?}: {}", self.dir, e)))?;

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<SessionRecord>(&content) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping corrupt record {:?}: {}", path, e),
                },
                Err(e) => warn!("Skipping unreadable record {:?}: {}", path, e),
            }
        }
        Ok(records)
    }
}
