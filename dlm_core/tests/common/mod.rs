#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::{Request, ResponseTemplate};

use dlm_core::{
    DownloadConfig, DownloadEvent, DownloadEventKind, DownloadHandle, DownloadSupervisor,
    EventReceiver,
};

/// Generates deterministic test data.
pub fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

pub async fn supervisor_in(root: &Path) -> (DownloadSupervisor, EventReceiver) {
    DownloadSupervisor::new(DownloadConfig::in_dir(root))
        .await
        .expect("supervisor should open its store")
}

/// Receives events until `done` matches one for `handle`, returning every
/// event seen for that handle (the matching one included).
pub async fn collect_until(
    events: &mut EventReceiver,
    handle: DownloadHandle,
    done: impl Fn(&DownloadEventKind) -> bool,
) -> Vec<DownloadEventKind> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(DownloadEvent { handle: h, kind }) = events.recv().await {
            if h != handle {
                continue;
            }
            let stop = done(&kind);
            seen.push(kind);
            if stop {
                return;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for event; saw {:?}", seen);
    seen
}

/// Waits for a `Finished` event from every handle in `handles`, failing on
/// the first `Failed` one.
pub async fn wait_all_finished(events: &mut EventReceiver, handles: &[DownloadHandle]) {
    let mut pending: HashSet<DownloadHandle> = handles.iter().copied().collect();
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            match event.kind {
                DownloadEventKind::Failed { cause } if pending.contains(&event.handle) => {
                    panic!("{} failed: {}", event.handle, cause)
                }
                DownloadEventKind::Finished { .. } => {
                    pending.remove(&event.handle);
                    if pending.is_empty() {
                        return;
                    }
                }
                _ => {}
            }
        }
    })
    .await;
    assert!(result.is_ok(), "still waiting on {:?}", pending);
}

pub fn is_finished(kind: &DownloadEventKind) -> bool {
    matches!(kind, DownloadEventKind::Finished { .. })
}

pub fn is_failed(kind: &DownloadEventKind) -> bool {
    matches!(kind, DownloadEventKind::Failed { .. })
}

pub fn reached(bytes: u64) -> impl Fn(&DownloadEventKind) -> bool {
    move |kind| {
        matches!(kind, DownloadEventKind::Progress { bytes_downloaded, .. } if *bytes_downloaded >= bytes)
    }
}

/// Asserts progress counts never go backwards.
pub fn assert_monotonic(events: &[DownloadEventKind]) {
    let mut last = 0;
    for kind in events {
        if let DownloadEventKind::Progress { bytes_downloaded, .. } = kind {
            assert!(*bytes_downloaded >= last, "progress went backwards: {:?}", events);
            last = *bytes_downloaded;
        }
    }
}

/// A wiremock responder that correctly handles Range requests
/// by slicing the body and returning the appropriate byte range.
pub struct RangeResponder {
    pub body: Vec<u8>,
}

impl wiremock::Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if let Some(range_header) = request.headers.get("range") {
            let range_str = range_header.to_str().unwrap_or("");
            if let Some((start, end)) = parse_range(range_str, self.body.len()) {
                if start >= self.body.len() {
                    return ResponseTemplate::new(416)
                        .insert_header("Content-Range", format!("bytes */{}", self.body.len()));
                }
                return ResponseTemplate::new(206)
                    .set_body_bytes(self.body[start..=end].to_vec())
                    .insert_header(
                        "Content-Range",
                        format!("bytes {}-{}/{}", start, end, self.body.len()),
                    )
                    .insert_header("Content-Type", "application/octet-stream");
            }
        }
        ResponseTemplate::new(200)
            .set_body_bytes(self.body.clone())
            .insert_header("Content-Type", "application/octet-stream")
    }
}

/// Parses a Range header like "bytes=0-" or "bytes=1024-2047"
pub fn parse_range(header: &str, body_len: usize) -> Option<(usize, usize)> {
    let s = header.strip_prefix("bytes=")?;
    let (start, end) = s.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = if end.is_empty() {
        body_len.saturating_sub(1)
    } else {
        end.parse().ok()?
    };
    Some((start, end.min(body_len.saturating_sub(1))))
}

/// Range headers of every request wiremock received, in arrival order.
pub async fn received_ranges(server: &wiremock::MockServer) -> Vec<Option<String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| {
            r.headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .collect()
}

/// How the raw server treats one request. `stall_at` and `close_at` are
/// absolute body offsets, so a ranged request starting at or past them gets
/// headers and no body bytes.
#[derive(Clone, Copy, Default)]
pub struct FirstResponse {
    /// Send this many bytes, then hold the connection open without sending more.
    pub stall_at: Option<usize>,
    /// Send this many bytes, then close the connection.
    pub close_at: Option<usize>,
    /// Omit Content-Length on every response (body delimited by close).
    pub hide_length: bool,
}

/// Minimal HTTP/1.1 server over raw TCP, for body timings wiremock cannot
/// express (stalling mid-body, closing early).
pub struct RawServer {
    addr: SocketAddr,
    ranges: Arc<Mutex<Vec<Option<String>>>>,
}

impl RawServer {
    /// Applies `first` to the first request; later requests are answered in
    /// full (honouring `Range`).
    pub async fn start(body: Vec<u8>, first: FirstResponse) -> Self {
        Self::scripted(body, vec![first]).await
    }

    /// Applies `script[n]` to the n-th request. Requests past the end of the
    /// script are answered in full, keeping the last entry's `hide_length`.
    pub async fn scripted(body: Vec<u8>, script: Vec<FirstResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ranges = Arc::new(Mutex::new(Vec::new()));
        let body = Arc::new(body);
        let served = Arc::new(AtomicUsize::new(0));
        let hide_length = script.last().map(|b| b.hide_length).unwrap_or(false);

        let ranges_for_accept = Arc::clone(&ranges);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let n = served.fetch_add(1, Ordering::SeqCst);
                let behaviour = script.get(n).copied().unwrap_or(FirstResponse {
                    hide_length,
                    ..FirstResponse::default()
                });
                tokio::spawn(serve(
                    socket,
                    Arc::clone(&body),
                    Arc::clone(&ranges_for_accept),
                    behaviour,
                ));
            }
        });

        Self { addr, ranges }
    }

    pub fn url(&self, file: &str) -> String {
        format!("http://{}/{}", self.addr, file)
    }

    pub fn ranges(&self) -> Vec<Option<String>> {
        self.ranges.lock().unwrap().clone()
    }

    /// Waits until `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize) {
        let result = tokio::time::timeout(Duration::from_secs(10), async {
            while self.ranges.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "only saw requests {:?}", self.ranges());
    }
}

async fn serve(
    mut socket: TcpStream,
    body: Arc<Vec<u8>>,
    ranges: Arc<Mutex<Vec<Option<String>>>>,
    behaviour: FirstResponse,
) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    let head = String::from_utf8_lossy(&head).to_string();
    let range = head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("range")
            .then(|| value.trim().to_string())
    });
    ranges.lock().unwrap().push(range.clone());

    let start = range
        .as_deref()
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok())
        .unwrap_or(0)
        .min(body.len());

    let length_header = if behaviour.hide_length {
        String::new()
    } else {
        format!("Content-Length: {}\r\n", body.len() - start)
    };
    let response_head = if start > 0 {
        format!(
            "HTTP/1.1 206 Partial Content\r\n{}Content-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
            length_header,
            start,
            body.len() - 1,
            body.len()
        )
    } else {
        format!("HTTP/1.1 200 OK\r\n{}Connection: close\r\n\r\n", length_header)
    };
    if socket.write_all(response_head.as_bytes()).await.is_err() {
        return;
    }

    let end = behaviour
        .stall_at
        .or(behaviour.close_at)
        .unwrap_or(body.len())
        .clamp(start, body.len());
    if socket.write_all(&body[start..end]).await.is_err() {
        return;
    }
    let _ = socket.flush().await;

    if behaviour.stall_at.is_some() {
        // Hold the connection until the client gives up on it.
        while let Ok(n) = socket.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
        return;
    }
    let _ = socket.shutdown().await;
}
