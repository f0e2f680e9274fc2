use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::{mpsc, RwLock};
use url::Url;

use crate::config::DownloadConfig;
use crate::downloader::http_range::filename_from_url;
use crate::downloader::transfer_worker::TransferWorker;
use crate::store::progress_store::ProgressStore;
use crate::types::types::{
    DownloadError, DownloadEvent, DownloadHandle, DownloadSnapshot, DownloadStatus,
};

/// Receiving end of the supervisor's event feed. Events for one handle arrive
/// in state-machine order; events for different handles may interleave.
pub type EventReceiver = mpsc::UnboundedReceiver<DownloadEvent>;

/// Creates, tracks and controls the set of downloads.
///
/// The supervisor's map is only consulted to find a worker; all per-download
/// work happens under that worker's own lock, so downloads never wait on each
/// other.
pub struct DownloadSupervisor {
    client: Client,
    store: Arc<ProgressStore>,
    download_dir: PathBuf,
    events_tx: mpsc::UnboundedSender<DownloadEvent>,
    downloads: RwLock<HashMap<DownloadHandle, Arc<TransferWorker>>>,
    next_handle: AtomicU64,
}

impl DownloadSupervisor {
    /// Opens the progress store and HTTP client described by `config`.
    /// Returns the supervisor together with its single event feed.
    pub async fn new(config: DownloadConfig) -> Result<(Self, EventReceiver), DownloadError> {
        let store = Arc::new(ProgressStore::open(&config.progress_dir).await?);
        let client = config.build_client()?;
        Ok(Self::with_parts(client, store, config.download_dir))
    }

    /// Builds a supervisor around an existing client and store.
    pub fn with_parts(
        client: Client,
        store: Arc<ProgressStore>,
        download_dir: PathBuf,
    ) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            client,
            store,
            download_dir,
            events_tx,
            downloads: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        };
        (supervisor, events_rx)
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn download_dir(&self) -> &PathBuf {
        &self.download_dir
    }

    /// Local path a URL downloads to.
    pub fn destination_for(&self, url: &str) -> PathBuf {
        self.download_dir.join(filename_from_url(url))
    }

    /// Starts downloading `url` and returns its handle.
    ///
    /// Submitting a URL that already has a live (non-terminal) download
    /// returns the existing handle instead of starting a second transfer.
    /// A different URL that resolves to the same destination file as any
    /// tracked download, finished or not, is rejected with
    /// [`DownloadError::DestinationInUse`]; [`forget`](Self::forget) the old
    /// entry first to reuse the file. A finished or failed entry for the same
    /// URL is replaced.
    ///
    /// Only request errors are returned here. If the new download cannot
    /// open its destination or write its record, the handle is still
    /// returned and the failure arrives as a `Failed` event.
    pub async fn submit(&self, url: &str) -> Result<DownloadHandle, DownloadError> {
        let url = url.trim();
        let parsed = Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidUrl(url.to_string()));
        }
        let destination = self.destination_for(url);

        // Held for the whole registration so two concurrent submissions of the
        // same URL cannot both start a worker.
        let mut downloads = self.downloads.write().await;

        let mut replaced = Vec::new();
        for (handle, worker) in downloads.iter() {
            let same_url = worker.url() == url;
            let same_destination = worker.destination() == destination.as_path();
            if !same_url && !same_destination {
                continue;
            }
            if !same_url {
                return Err(DownloadError::DestinationInUse(destination));
            }
            if worker.status().await.is_terminal() {
                replaced.push(*handle);
            } else {
                log::info!("[supervisor] {} already active as {}", url, handle);
                return Ok(*handle);
            }
        }
        for handle in replaced {
            downloads.remove(&handle);
        }

        let handle = DownloadHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let worker = Arc::new(TransferWorker::new(
            handle,
            url.to_string(),
            destination,
            self.client.clone(),
            Arc::clone(&self.store),
            self.events_tx.clone(),
        ));
        let started = worker.start().await;
        downloads.insert(handle, worker);
        match started {
            Ok(()) => log::info!("[supervisor] submitted {} as {}", url, handle),
            Err(e) => log::warn!("[supervisor] {} could not start {}: {}", handle, url, e),
        }
        Ok(handle)
    }

    pub async fn pause(&self, handle: DownloadHandle) -> Result<(), DownloadError> {
        self.worker(handle).await?.pause().await
    }

    pub async fn resume(&self, handle: DownloadHandle) -> Result<(), DownloadError> {
        self.worker(handle).await?.resume().await
    }

    /// Abandons the download: stops it, drops it from the active set and
    /// deletes its progress record.
    pub async fn cancel(&self, handle: DownloadHandle) -> Result<(), DownloadError> {
        let worker = self
            .downloads
            .write()
            .await
            .remove(&handle)
            .ok_or(DownloadError::UnknownHandle(handle))?;
        worker.cancel().await
    }

    /// Drops a completed or failed download from the tracked set. Live
    /// downloads must be paused or cancelled through their own commands, so
    /// forgetting one is refused with [`DownloadError::StillActive`]. The
    /// destination file and any progress record are left alone.
    pub async fn forget(&self, handle: DownloadHandle) -> Result<(), DownloadError> {
        let mut downloads = self.downloads.write().await;
        let worker = downloads
            .get(&handle)
            .ok_or(DownloadError::UnknownHandle(handle))?;
        if !worker.status().await.is_terminal() {
            return Err(DownloadError::StillActive(handle));
        }
        downloads.remove(&handle);
        log::debug!("[supervisor] forgot {}", handle);
        Ok(())
    }

    pub async fn snapshot(&self, handle: DownloadHandle) -> Result<DownloadSnapshot, DownloadError> {
        Ok(self.worker(handle).await?.snapshot().await)
    }

    /// Snapshots of every tracked download, ordered by handle.
    pub async fn snapshots(&self) -> Vec<DownloadSnapshot> {
        let workers = self.workers().await;
        let mut snapshots = Vec::with_capacity(workers.len());
        for worker in workers {
            snapshots.push(worker.snapshot().await);
        }
        snapshots.sort_by_key(|s| s.handle);
        snapshots
    }

    /// Whether a non-terminal download for `url` exists in this process.
    pub async fn is_active(&self, url: &str) -> bool {
        for worker in self.workers().await {
            if worker.url() == url && !worker.status().await.is_terminal() {
                return true;
            }
        }
        false
    }

    /// Whether anything is still running or waiting to be resumed.
    pub async fn has_unsettled(&self) -> bool {
        for worker in self.workers().await {
            if matches!(
                worker.status().await,
                DownloadStatus::InProgress | DownloadStatus::Paused | DownloadStatus::Idle
            ) {
                return true;
            }
        }
        false
    }

    async fn worker(&self, handle: DownloadHandle) -> Result<Arc<TransferWorker>, DownloadError> {
        self.downloads
            .read()
            .await
            .get(&handle)
            .cloned()
            .ok_or(DownloadError::UnknownHandle(handle))
    }

    /// Clones the worker list so queries release the map lock before waiting
    /// on individual workers.
    async fn workers(&self) -> Vec<Arc<TransferWorker>> {
        self.downloads.read().await.values().cloned().collect()
    }
}
