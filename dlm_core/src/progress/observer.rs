use std::path::Path;

use async_trait::async_trait;

use crate::types::types::DownloadHandle;

/// Anything that wants to follow downloads as they happen.
///
/// The [`EventNotifier`](super::notifier::EventNotifier) calls these in the
/// order events were emitted. For one handle that order matches the worker's
/// state transitions: no `on_finished` before the last `on_progress`.
#[async_trait]
pub trait DownloadObserver: Send + Sync + 'static {
    /// `total_bytes` is 0 when the server did not report a length.
    async fn on_progress(&self, handle: DownloadHandle, bytes_downloaded: u64, total_bytes: u64);

    async fn on_finished(&self, handle: DownloadHandle, path: &Path);

    async fn on_failed(&self, handle: DownloadHandle, cause: &str);

    async fn on_pause_changed(&self, handle: DownloadHandle, paused: bool);
}

#[async_trait]
impl<T: DownloadObserver> DownloadObserver for std::sync::Arc<T> {
    async fn on_progress(&self, handle: DownloadHandle, bytes_downloaded: u64, total_bytes: u64) {
        (**self).on_progress(handle, bytes_downloaded, total_bytes).await
    }

    async fn on_finished(&self, handle: DownloadHandle, path: &Path) {
        (**self).on_finished(handle, path).await
    }

    async fn on_failed(&self, handle: DownloadHandle, cause: &str) {
        (**self).on_failed(handle, cause).await
    }

    async fn on_pause_changed(&self, handle: DownloadHandle, paused: bool) {
        (**self).on_pause_changed(handle, paused).await
    }
}
