use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::error::{IntakeError, IntakeResult};
use crate::report::RenderedDocument;

/// A stored document as listed by the reports index
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub filename: String,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Flat directory of rendered documents
pub struct DocumentStore {
    dir: PathBuf,
}

impl DocumentStore {
    pub async fn new(dir: impl AsRef<Path>) -> IntakeResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| IntakeError::Persistence(format!("Failed to create {:?}: {}", dir, e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the document, replacing any earlier file of the same name
    pub async fn save(&self, document: &RenderedDocument) -> IntakeResult<PathBuf> {
        let path = self.path_for(&document.filename)?;
        fs::write(&path, &document.bytes)
            .await
            .map_err(|e| IntakeError::Persistence(format!("Failed to write {:?}: {}", path, e)))?;
        info!("Saved document {:?} ({} bytes)", path, document.bytes.len());
        Ok(path)
    }

    pub async fn read(&self, filename: &str) -> IntakeResult<Vec<u8>> {
        let path = self.path_for(filename)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(IntakeError::NotFound(format!("document {filename}")))
            }
            Err(e) => Err(IntakeError::Persistence(format!(
                "Failed to read {:?}: {}",
                path, e
            ))),
        }
    }

    /// Newest first
    pub async fn list(&self) -> IntakeResult<Vec<StoredDocument>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| IntakeError::Persistence(format!("Failed to list {:?}: {}", self.dir, e)))?;

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            documents.push(StoredDocument {
                filename,
                size_bytes: metadata.len(),
                modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        documents.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(documents)
    }

    fn path_for(&self, filename: &str) -> IntakeResult<PathBuf> {
        if !is_safe_filename(filename) {
            return Err(IntakeError::NotFound(format!("document {filename}")));
        }
        Ok(self.dir.join(filename))
    }
}

fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains("..")
        && filename
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}
