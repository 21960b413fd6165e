//! JSON file storage for the bookmark dataset.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info, warn};

use bookmark_common::{BookmarkDocument, BookmarkRecord};

use crate::traits::BookmarkStorage;

/// Older exports were a bare array of records.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredOutput {
    Document(BookmarkDocument),
    Records(Vec<BookmarkRecord>),
}

/// Whole-document JSON file. Writes go to a sibling temp file first and are
/// renamed into place, so a crash never leaves a half-written dataset.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored document. `None` when nothing has been written yet.
    pub async fn read_document(&self) -> Result<Option<BookmarkDocument>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };

        let stored: StoredOutput = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a bookmark dataset", self.path.display()))?;
        Ok(Some(match stored {
            StoredOutput::Document(doc) => doc,
            StoredOutput::Records(records) => {
                let timestamp = records
                    .iter()
                    .map(|r| r.extracted_at)
                    .max()
                    .unwrap_or_default();
                BookmarkDocument::new(records, timestamp)
            }
        }))
    }

    /// Sibling file for a run whose prior output could not be read:
    /// `bookmarks.json` becomes `bookmarks.<run_id>.json`.
    pub fn recovery_path(&self, run_id: &str) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bookmarks".to_string());
        let ext = self
            .path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "json".to_string());
        self.path.with_file_name(format!("{stem}.{run_id}.{ext}"))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bookmarks.json".to_string());
    path.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}

async fn write_document(path: &Path, document: &BookmarkDocument) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(document)?;
    let tmp_path = temp_path(path);
    fs::write(&tmp_path, &json)
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e).with_context(|| {
            format!(
                "failed to replace {} with {}",
                path.display(),
                tmp_path.display()
            )
        });
    }
    Ok(())
}

#[async_trait]
impl BookmarkStorage for JsonFileStorage {
    async fn load_prior_output(&self) -> Result<Vec<BookmarkRecord>> {
        match self.read_document().await? {
            Some(doc) => {
                debug!(path = %self.path.display(), count = doc.bookmarks.len(), "Read prior output");
                Ok(doc.bookmarks)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn persist(&self, document: &BookmarkDocument) -> Result<()> {
        write_document(&self.path, document).await?;
        info!(path = %self.path.display(), count = document.count, "Bookmarks saved");
        Ok(())
    }

    async fn persist_recovery(&self, document: &BookmarkDocument, run_id: &str) -> Result<String> {
        let path = self.recovery_path(run_id);
        write_document(&path, document).await?;
        warn!(
            path = %path.display(),
            original = %self.path.display(),
            count = document.count,
            "Prior output unreadable, bookmarks saved beside it"
        );
        Ok(path.display().to_string())
    }
}
