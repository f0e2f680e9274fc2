mod common;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use dlm_core::progress::{DownloadObserver, EventNotifier};
use dlm_core::DownloadHandle;

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Progress(u64, u64),
    Finished(String),
    Failed,
    Paused(bool),
}

#[derive(Default)]
struct RecordingObserver {
    seen: Mutex<Vec<(DownloadHandle, Seen)>>,
}

impl RecordingObserver {
    fn for_handle(&self, handle: DownloadHandle) -> Vec<Seen> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| *h == handle)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl DownloadObserver for RecordingObserver {
    async fn on_progress(&self, handle: DownloadHandle, bytes_downloaded: u64, total_bytes: u64) {
        self.seen
            .lock()
            .unwrap()
            .push((handle, Seen::Progress(bytes_downloaded, total_bytes)));
    }

    async fn on_finished(&self, handle: DownloadHandle, path: &Path) {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        self.seen.lock().unwrap().push((handle, Seen::Finished(name)));
    }

    async fn on_failed(&self, handle: DownloadHandle, _cause: &str) {
        self.seen.lock().unwrap().push((handle, Seen::Failed));
    }

    async fn on_pause_changed(&self, handle: DownloadHandle, paused: bool) {
        self.seen.lock().unwrap().push((handle, Seen::Paused(paused)));
    }
}

#[tokio::test]
async fn test_notifier_delivers_events_in_order_to_every_observer() {
    let body = generate_test_data(100_000);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { body: body.clone() })
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (supervisor, events) = supervisor_in(tmp.path()).await;

    let first = Arc::new(RecordingObserver::default());
    let second = Arc::new(RecordingObserver::default());
    let mut notifier = EventNotifier::new();
    notifier.add_observer(Box::new(Arc::clone(&first)));
    notifier.add_observer(Box::new(Arc::clone(&second)));
    let notifier_task = tokio::spawn(notifier.run(events));

    let handle = supervisor
        .submit(&format!("{}/observed.bin", server.uri()))
        .await
        .unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while !first
            .for_handle(handle)
            .iter()
            .any(|s| matches!(s, Seen::Finished(_)))
        {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("download should finish");

    drop(supervisor);
    notifier_task.await.unwrap();

    let seen = first.for_handle(handle);
    assert_eq!(seen, second.for_handle(handle));
    assert_eq!(seen.last(), Some(&Seen::Finished("observed.bin".to_string())));
    assert_eq!(
        seen[seen.len() - 2],
        Seen::Progress(body.len() as u64, body.len() as u64)
    );
    assert!(!seen.contains(&Seen::Failed));
}

#[tokio::test]
async fn test_notifier_reports_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (supervisor, events) = supervisor_in(tmp.path()).await;
    let observer = Arc::new(RecordingObserver::default());
    let mut notifier = EventNotifier::new();
    notifier.add_observer(Box::new(Arc::clone(&observer)));
    let notifier_task = tokio::spawn(notifier.run(events));

    let handle = supervisor
        .submit(&format!("{}/broken.bin", server.uri()))
        .await
        .unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while observer.for_handle(handle).is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("failure should be reported");

    drop(supervisor);
    notifier_task.await.unwrap();
    assert_eq!(observer.for_handle(handle), vec![Seen::Failed]);
}
