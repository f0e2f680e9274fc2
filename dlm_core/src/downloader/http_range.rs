use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, CONTENT_RANGE};
use reqwest::StatusCode;
use url::Url;

/// Used when a URL has no usable final path segment.
const FALLBACK_FILENAME: &str = "download";

/// `Range` header value asking for everything from `offset` onwards.
pub fn range_from(offset: u64) -> String {
    format!("bytes={}-", offset)
}

/// Extracts the last non-empty path segment from a URL as the destination
/// file name. The segment is percent-decoded and stripped of anything that
/// could escape the download directory.
pub fn filename_from_url(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(|s| s.to_string()),
        // Not absolute; fall back to plain splitting like a relative path.
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').find(|s| !s.is_empty()))
            .map(|s| s.to_string()),
    };

    segment
        .map(|s| sanitize(&percent_decode_str(&s).decode_utf8_lossy()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');
    cleaned.to_string()
}

/// Total resource size from a `Content-Range` header (`bytes 400-999/1000`
/// or `bytes */1000`). `None` when absent or when the total is `*`.
pub fn total_from_content_range(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.rsplit('/').next())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Works out the full resource length for a response to a request that
/// started at `offset`. Returns 0 when the server gives no usable length.
pub fn resolve_total(
    status: StatusCode,
    headers: &HeaderMap,
    content_length: Option<u64>,
    offset: u64,
) -> u64 {
    if status == StatusCode::PARTIAL_CONTENT {
        total_from_content_range(headers)
            .or_else(|| content_length.map(|len| offset + len))
            .unwrap_or(0)
    } else {
        content_length.unwrap_or(0)
    }
}
