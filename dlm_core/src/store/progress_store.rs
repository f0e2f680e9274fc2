use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::progress_record::{record_key, ProgressRecord, RECORD_EXTENSION};
use crate::types::types::DownloadError;

/// Directory of progress records, one file per download URL.
///
/// Writes go to a uniquely named temporary file in the same directory which is
/// synced and then renamed over the record, so a reader (or a crash) only ever
/// sees the previous or the new record. Writers to different keys share
/// nothing but the directory.
pub struct ProgressStore {
    dir: PathBuf,
    session: String,
}

impl ProgressStore {
    /// Opens (creating if needed) the store directory and mints the session id
    /// stamped on every record this process writes.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DownloadError::storage(&dir, e))?;
        let session = Uuid::new_v4().to_string();
        log::debug!("[store] opened {:?} session={}", dir, session);
        Ok(Self { dir, session })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Identifies records written by this process.
    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn record_path(&self, url: &str) -> PathBuf {
        self.dir.join(record_key(url))
    }

    /// Creates or atomically replaces the record for `record.url`.
    pub async fn write(&self, record: &ProgressRecord) -> Result<(), DownloadError> {
        let path = self.record_path(&record.url);
        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", record.key(), Uuid::new_v4()));

        if let Err(e) = write_synced(&tmp_path, record.to_string().as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(DownloadError::storage(&tmp_path, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(DownloadError::storage(&path, e));
        }
        log::trace!(
            "[store] wrote {:?} status={} bytes={}/{}",
            path,
            record.status,
            record.bytes_downloaded,
            record.total_bytes
        );
        Ok(())
    }

    /// `Ok(None)` when no record exists for `url`.
    pub async fn read(&self, url: &str) -> Result<Option<ProgressRecord>, DownloadError> {
        let path = self.record_path(url);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents.parse().map(Some),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(DownloadError::storage(&path, e)),
        }
    }

    /// Removes the record for `url`. Deleting a missing record succeeds.
    pub async fn delete(&self, url: &str) -> Result<(), DownloadError> {
        let path = self.record_path(url);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::debug!("[store] deleted {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::storage(&path, e)),
        }
    }

    /// Snapshot of every committed record. Unreadable or malformed records are
    /// skipped with a warning rather than failing the whole listing.
    pub async fn list_all(&self) -> Result<Vec<ProgressRecord>, DownloadError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DownloadError::storage(&self.dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DownloadError::storage(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                // Deleted between read_dir and now.
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => {
                    log::warn!("[store] skipping unreadable record {:?}: {}", path, e);
                    continue;
                }
            };
            match contents.parse::<ProgressRecord>() {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("[store] skipping {:?}: {}", path, e),
            }
        }
        Ok(records)
    }
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}
