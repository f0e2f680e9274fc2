use crate::downloader::supervisor::EventReceiver;
use crate::types::types::{DownloadEvent, DownloadEventKind};

use super::observer::DownloadObserver;

/// Drains the supervisor's event feed and fans every event out to the
/// registered observers.
///
/// | Event                 | Observer method      |
/// |-----------------------|----------------------|
/// | `Progress`            | `on_progress`        |
/// | `Finished`            | `on_finished`        |
/// | `Failed`              | `on_failed`          |
/// | `PauseStateChanged`   | `on_pause_changed`   |
#[derive(Default)]
pub struct EventNotifier {
    observers: Vec<Box<dyn DownloadObserver>>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Must be called before `run()`.
    pub fn add_observer(&mut self, observer: Box<dyn DownloadObserver>) {
        self.observers.push(observer);
    }

    /// Consume events until the supervisor (every sender) is dropped.
    pub async fn run(self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            self.dispatch(&event).await;
        }
    }

    pub async fn dispatch(&self, event: &DownloadEvent) {
        for observer in &self.observers {
            match &event.kind {
                DownloadEventKind::Progress {
                    bytes_downloaded,
                    total_bytes,
                } => {
                    observer
                        .on_progress(event.handle, *bytes_downloaded, *total_bytes)
                        .await
                }
                DownloadEventKind::Finished { path } => observer.on_finished(event.handle, path).await,
                DownloadEventKind::Failed { cause } => observer.on_failed(event.handle, cause).await,
                DownloadEventKind::PauseStateChanged { paused } => {
                    observer.on_pause_changed(event.handle, *paused).await
                }
            }
        }
    }
}
