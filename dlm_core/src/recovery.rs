use std::sync::Arc;

use crate::downloader::supervisor::DownloadSupervisor;
use crate::store::progress_record::ProgressRecord;
use crate::store::progress_store::ProgressStore;
use crate::types::types::{DownloadError, DownloadHandle, DownloadStatus};

/// Outcome of one recovery pass.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// URL and handle of every download that was resubmitted.
    pub resumed: Vec<(String, DownloadHandle)>,
    /// URLs left alone because a live worker in this process owns them.
    pub skipped: Vec<String>,
    /// URLs whose resubmission failed, with the cause.
    pub failed: Vec<(String, String)>,
}

/// Resubmits downloads that a previous process left unfinished.
pub struct RecoveryScanner {
    store: Arc<ProgressStore>,
}

impl RecoveryScanner {
    pub fn new(store: Arc<ProgressStore>) -> Self {
        Self { store }
    }

    /// Whether `record` was left behind rather than being written right now
    /// by a worker of this process. An in-progress record carrying this
    /// process's session is live; any other record is an orphan.
    pub fn is_orphaned(&self, record: &ProgressRecord) -> bool {
        record.status != DownloadStatus::InProgress
            || record.session.as_deref() != Some(self.store.session())
    }

    /// Reads every record and resubmits the orphaned ones. Meant to run once
    /// at startup before new submissions; a failure for one record never stops
    /// the others.
    pub async fn scan_and_resume(
        &self,
        supervisor: &DownloadSupervisor,
    ) -> Result<RecoveryReport, DownloadError> {
        let records = self.store.list_all().await?;
        log::info!("[recovery] found {} progress record(s)", records.len());

        let mut report = RecoveryReport::default();
        for record in records {
            if !self.is_orphaned(&record) || supervisor.is_active(&record.url).await {
                log::debug!("[recovery] {} is owned by a live download", record.url);
                report.skipped.push(record.url);
                continue;
            }

            log::info!(
                "[recovery] resuming {} ({} / {} bytes, was {})",
                record.url,
                record.bytes_downloaded,
                record.total_bytes,
                record.status
            );
            match supervisor.submit(&record.url).await {
                Ok(handle) => report.resumed.push((record.url, handle)),
                Err(e) => {
                    log::warn!("[recovery] could not resume {}: {}", record.url, e);
                    report.failed.push((record.url, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}

/// Convenience wrapper: one recovery pass against the supervisor's own store.
pub async fn scan_and_resume(supervisor: &DownloadSupervisor) -> Result<RecoveryReport, DownloadError> {
    RecoveryScanner::new(Arc::clone(supervisor.store()))
        .scan_and_resume(supervisor)
        .await
}
