use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::downloader::http_range::{range_from, resolve_total, total_from_content_range};
use crate::store::progress_record::ProgressRecord;
use crate::store::progress_store::ProgressStore;
use crate::types::types::{
    DownloadError, DownloadEvent, DownloadEventKind, DownloadHandle, DownloadSnapshot,
    DownloadStatus,
};

/// Mutable state of one download. Every change to it, every write to the
/// destination file, every record write and every event emission happens
/// while holding the worker's lock, so observers see them in one order.
struct WorkerState {
    status: DownloadStatus,
    bytes_downloaded: u64,
    total_bytes: u64,
    /// Bumped on every start. A run whose number is stale has been paused,
    /// cancelled or superseded and must not touch anything.
    run: u64,
    cancel: CancellationToken,
}

/// How a network run stopped before the worker settles its state.
enum RunEnd {
    /// The body was fully consumed.
    Exhausted,
    /// The server answered 416 and reports exactly the length already on disk.
    AlreadyComplete(u64),
    /// Paused or cancelled from outside.
    Aborted,
}

/// Owns the lifecycle of a single download.
///
/// `Idle → InProgress ⇄ Paused`, then `Completed` or `Failed`. Each
/// `start`/`resume` spawns one tokio task that streams the response body to
/// the destination file, appending from the file's real on-disk length.
pub struct TransferWorker {
    handle: DownloadHandle,
    url: String,
    destination: PathBuf,
    client: Client,
    store: Arc<ProgressStore>,
    events: mpsc::UnboundedSender<DownloadEvent>,
    state: Mutex<WorkerState>,
}

impl TransferWorker {
    pub fn new(
        handle: DownloadHandle,
        url: String,
        destination: PathBuf,
        client: Client,
        store: Arc<ProgressStore>,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) -> Self {
        Self {
            handle,
            url,
            destination,
            client,
            store,
            events,
            state: Mutex::new(WorkerState {
                status: DownloadStatus::Idle,
                bytes_downloaded: 0,
                total_bytes: 0,
                run: 0,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn handle(&self) -> DownloadHandle {
        self.handle
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub async fn status(&self) -> DownloadStatus {
        self.state.lock().await.status
    }

    pub async fn snapshot(&self) -> DownloadSnapshot {
        let state = self.state.lock().await;
        DownloadSnapshot {
            handle: self.handle,
            url: self.url.clone(),
            destination: self.destination.clone(),
            bytes_downloaded: state.bytes_downloaded,
            total_bytes: state.total_bytes,
            status: state.status,
        }
    }

    /// Idle → InProgress. If the destination or the progress record cannot
    /// be written the worker moves to Failed, emits `Failed` and the error is
    /// returned as well.
    pub async fn start(self: &Arc<Self>) -> Result<(), DownloadError> {
        let mut state = self.state.lock().await;
        if state.status != DownloadStatus::Idle {
            log::debug!("[worker] {} start ignored in state {}", self.handle, state.status);
            return Ok(());
        }
        self.launch_or_fail(&mut state).await
    }

    /// InProgress → Paused. Aborts the in-flight request and checkpoints the
    /// bytes already on disk. A no-op in any other state.
    pub async fn pause(&self) -> Result<(), DownloadError> {
        let mut state = self.state.lock().await;
        if state.status != DownloadStatus::InProgress {
            log::debug!("[worker] {} pause ignored in state {}", self.handle, state.status);
            return Ok(());
        }

        state.cancel.cancel();
        state.status = DownloadStatus::Paused;
        if let Some(len) = self.on_disk_len().await {
            state.bytes_downloaded = len;
        }
        log::info!(
            "[worker] {} paused at {} / {} bytes",
            self.handle,
            state.bytes_downloaded,
            state.total_bytes
        );

        let persisted = self.persist(&state).await;
        self.emit(DownloadEventKind::PauseStateChanged { paused: true });
        persisted
    }

    /// Paused → InProgress, restarting from the on-disk length. A worker that
    /// was never started starts fresh. Anything else is a no-op, so resuming
    /// twice in a row is harmless.
    pub async fn resume(self: &Arc<Self>) -> Result<(), DownloadError> {
        let mut state = self.state.lock().await;
        match state.status {
            DownloadStatus::Idle => self.launch_or_fail(&mut state).await,
            DownloadStatus::Paused => {
                self.launch_or_fail(&mut state).await?;
                self.emit(DownloadEventKind::PauseStateChanged { paused: false });
                Ok(())
            }
            status => {
                log::debug!("[worker] {} resume ignored in state {}", self.handle, status);
                Ok(())
            }
        }
    }

    /// Stops the worker for good and deletes its progress record. The partial
    /// destination file is left in place.
    pub async fn cancel(&self) -> Result<(), DownloadError> {
        let mut state = self.state.lock().await;
        if matches!(
            state.status,
            DownloadStatus::Completed | DownloadStatus::Cancelled
        ) {
            return Ok(());
        }
        state.cancel.cancel();
        state.status = DownloadStatus::Cancelled;
        log::info!("[worker] {} cancelled", self.handle);
        self.store.delete(&self.url).await
    }

    async fn launch_or_fail(self: &Arc<Self>, state: &mut WorkerState) -> Result<(), DownloadError> {
        if let Err(e) = self.launch(state).await {
            self.fail_locked(state, &e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Opens the destination, reads the resume offset from disk, marks the
    /// record in-progress and spawns the network run.
    async fn launch(self: &Arc<Self>, state: &mut WorkerState) -> Result<(), DownloadError> {
        if let Some(parent) = self.destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::filesystem(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.destination)
            .await
            .map_err(|e| DownloadError::filesystem(&self.destination, e))?;
        let offset = file
            .metadata()
            .await
            .map_err(|e| DownloadError::filesystem(&self.destination, e))?
            .len();

        let record = ProgressRecord {
            url: self.url.clone(),
            bytes_downloaded: offset,
            total_bytes: state.total_bytes,
            status: DownloadStatus::InProgress,
            session: Some(self.store.session().to_string()),
        };
        self.store.write(&record).await?;

        state.status = DownloadStatus::InProgress;
        state.bytes_downloaded = offset;
        state.run += 1;
        state.cancel = CancellationToken::new();

        log::info!(
            "[worker] {} starting {} from offset {} -> {:?}",
            self.handle,
            self.url,
            offset,
            self.destination
        );

        let worker = Arc::clone(self);
        let run = state.run;
        let cancel = state.cancel.clone();
        tokio::spawn(async move {
            worker.run(file, offset, run, cancel).await;
        });
        Ok(())
    }

    async fn run(self: Arc<Self>, mut file: File, offset: u64, run: u64, cancel: CancellationToken) {
        let outcome = self.transfer(&mut file, offset, run, &cancel).await;
        self.settle(&mut file, run, outcome).await;
    }

    /// Issues the request and streams the body into `file`, one chunk at a
    /// time, each committed under the lock.
    async fn transfer(
        &self,
        file: &mut File,
        offset: u64,
        run: u64,
        cancel: &CancellationToken,
    ) -> Result<RunEnd, DownloadError> {
        let mut request = self.client.get(&self.url);
        if offset > 0 {
            request = request.header(RANGE, range_from(offset));
        }
        log::debug!(
            "[worker] {} GET {} range={}",
            self.handle,
            self.url,
            if offset > 0 { range_from(offset) } else { "-".to_string() }
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(RunEnd::Aborted),
            response = request.send() => response?,
        };

        let status = response.status();
        log::debug!(
            "[worker] {} response status={} content_length={:?}",
            self.handle,
            status,
            response.content_length()
        );

        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            // Nothing left past our offset: the file on disk is already whole.
            return match total_from_content_range(response.headers()) {
                Some(total) if total == offset => Ok(RunEnd::AlreadyComplete(total)),
                _ => Err(DownloadError::HttpStatus(status)),
            };
        }
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status));
        }

        // A 200 to a ranged request carries the whole body again.
        let restart = offset > 0 && status != StatusCode::PARTIAL_CONTENT;
        let base = if restart { 0 } else { offset };
        let total = resolve_total(status, response.headers(), response.content_length(), base);

        {
            let mut state = self.state.lock().await;
            if !is_current(&state, run) {
                return Ok(RunEnd::Aborted);
            }
            if restart {
                log::warn!(
                    "[worker] {} server ignored Range: bytes={}- and sent the full body; restarting from 0",
                    self.handle,
                    offset
                );
                file.set_len(0)
                    .await
                    .map_err(|e| DownloadError::filesystem(&self.destination, e))?;
                state.bytes_downloaded = 0;
            }
            state.total_bytes = total;
            self.persist(&state).await?;
            if restart {
                self.emit(DownloadEventKind::Progress {
                    bytes_downloaded: 0,
                    total_bytes: total,
                });
            }
        }

        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(RunEnd::Aborted),
                next = stream.next() => next,
            };
            match next {
                None => return Ok(RunEnd::Exhausted),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(chunk)) => {
                    if !self.commit_chunk(file, run, &chunk).await? {
                        return Ok(RunEnd::Aborted);
                    }
                }
            }
        }
    }

    /// Appends one chunk, advances the counter, checkpoints and reports it.
    /// Returns `false` when the run lost a race with pause or cancel, in which
    /// case the chunk is discarded untouched.
    async fn commit_chunk(&self, file: &mut File, run: u64, chunk: &[u8]) -> Result<bool, DownloadError> {
        let mut state = self.state.lock().await;
        if !is_current(&state, run) {
            return Ok(false);
        }
        if chunk.is_empty() {
            return Ok(true);
        }

        file.write_all(chunk)
            .await
            .map_err(|e| DownloadError::filesystem(&self.destination, e))?;
        file.flush()
            .await
            .map_err(|e| DownloadError::filesystem(&self.destination, e))?;
        state.bytes_downloaded += chunk.len() as u64;

        self.persist(&state).await?;
        self.emit(DownloadEventKind::Progress {
            bytes_downloaded: state.bytes_downloaded,
            total_bytes: state.total_bytes,
        });
        Ok(true)
    }

    /// Moves a finished run to Completed or Failed, unless pause or cancel got
    /// there first.
    async fn settle(&self, file: &mut File, run: u64, outcome: Result<RunEnd, DownloadError>) {
        if matches!(outcome, Ok(RunEnd::Aborted)) {
            log::debug!("[worker] {} run {} aborted", self.handle, run);
            return;
        }

        let mut state = self.state.lock().await;
        if !is_current(&state, run) {
            if let Err(e) = &outcome {
                log::debug!("[worker] {} dropping error from stale run: {}", self.handle, e);
            }
            return;
        }

        let verified = match outcome {
            Ok(RunEnd::Exhausted) => self.verify_length(file, &mut state).await,
            Ok(RunEnd::AlreadyComplete(total)) => {
                state.total_bytes = total;
                self.verify_length(file, &mut state).await
            }
            Ok(RunEnd::Aborted) => return,
            Err(e) => Err(e),
        };

        match verified {
            Ok(()) => self.complete_locked(&mut state).await,
            Err(e) => self.fail_locked(&mut state, &e).await,
        }
    }

    /// Flushes and checks the on-disk length against the announced total. An
    /// unknown total becomes the observed size.
    async fn verify_length(&self, file: &mut File, state: &mut WorkerState) -> Result<(), DownloadError> {
        file.flush()
            .await
            .map_err(|e| DownloadError::filesystem(&self.destination, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| DownloadError::filesystem(&self.destination, e))?
            .len();
        state.bytes_downloaded = len;

        if state.total_bytes == 0 {
            state.total_bytes = len;
        } else if len < state.total_bytes {
            return Err(DownloadError::Truncated {
                received: len,
                expected: state.total_bytes,
            });
        }
        Ok(())
    }

    async fn complete_locked(&self, state: &mut WorkerState) {
        state.status = DownloadStatus::Completed;
        if let Err(e) = self.persist(state).await {
            log::warn!("[worker] {} could not mark record completed: {}", self.handle, e);
        }
        if let Err(e) = self.store.delete(&self.url).await {
            log::error!("[worker] {} could not delete progress record: {}", self.handle, e);
        }
        log::info!(
            "[worker] {} finished {} ({} bytes) -> {:?}",
            self.handle,
            self.url,
            state.bytes_downloaded,
            self.destination
        );
        self.emit(DownloadEventKind::Finished {
            path: self.destination.clone(),
        });
    }

    /// Leaves the record on disk with status failed so recovery can retry it.
    async fn fail_locked(&self, state: &mut WorkerState, error: &DownloadError) {
        state.cancel.cancel();
        state.status = DownloadStatus::Failed;
        if let Some(len) = self.on_disk_len().await {
            state.bytes_downloaded = len;
        }
        if let Err(e) = self.persist(state).await {
            log::error!("[worker] {} could not record failure: {}", self.handle, e);
        }
        log::error!("[worker] {} failed {}: {}", self.handle, self.url, error);
        self.emit(DownloadEventKind::Failed {
            cause: error.to_string(),
        });
    }

    async fn persist(&self, state: &WorkerState) -> Result<(), DownloadError> {
        let record = ProgressRecord {
            url: self.url.clone(),
            bytes_downloaded: state.bytes_downloaded,
            total_bytes: state.total_bytes,
            status: state.status,
            session: Some(self.store.session().to_string()),
        };
        self.store.write(&record).await
    }

    async fn on_disk_len(&self) -> Option<u64> {
        tokio::fs::metadata(&self.destination)
            .await
            .ok()
            .map(|m| m.len())
    }

    fn emit(&self, kind: DownloadEventKind) {
        // The receiver going away only means nobody is listening.
        let _ = self.events.send(DownloadEvent {
            handle: self.handle,
            kind,
        });
    }
}

fn is_current(state: &WorkerState, run: u64) -> bool {
    state.run == run && state.status == DownloadStatus::InProgress
}
