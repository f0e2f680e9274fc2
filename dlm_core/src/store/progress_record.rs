use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::downloader::http_range::filename_from_url;
use crate::types::types::{DownloadError, DownloadStatus};

/// File extension of committed records. Anything else in the store directory
/// (temporary files in particular) is ignored when listing.
pub const RECORD_EXTENSION: &str = "progress";

const URL_KEY: &str = "Download URL";
const DOWNLOADED_KEY: &str = "Downloaded";
const STATUS_KEY: &str = "Status";
const SESSION_KEY: &str = "Session";

/// Durable projection of a download, one file per URL.
///
/// ```text
/// Download URL: http://example.com/file.bin
/// Downloaded: 400 / 1000
/// Status: paused
/// Session: 5b7e...
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub url: String,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub status: DownloadStatus,
    /// Session id of the process that wrote the record, if any.
    pub session: Option<String>,
}

impl ProgressRecord {
    /// Store key for this record's URL.
    pub fn key(&self) -> String {
        record_key(&self.url)
    }
}

/// Derives the record file name for `url`: the URL's file name followed by a
/// SHA-256 prefix of the full URL, so two URLs ending in the same file name
/// never share a record.
pub fn record_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hash = hex::encode(&digest[..8]);
    format!("{}-{}.{}", filename_from_url(url), hash, RECORD_EXTENSION)
}

impl fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", URL_KEY, self.url)?;
        writeln!(
            f,
            "{}: {} / {}",
            DOWNLOADED_KEY, self.bytes_downloaded, self.total_bytes
        )?;
        writeln!(f, "{}: {}", STATUS_KEY, self.status.as_record_str())?;
        if let Some(session) = &self.session {
            writeln!(f, "{}: {}", SESSION_KEY, session)?;
        }
        Ok(())
    }
}

impl FromStr for ProgressRecord {
    type Err = DownloadError;

    /// Each line is split on its first colon. Unknown lines are ignored and a
    /// `Downloaded:` line without a total reads as an unknown total.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut url = None;
        let mut bytes_downloaded = 0;
        let mut total_bytes = 0;
        let mut status = None;
        let mut session = None;

        for line in s.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                URL_KEY => url = Some(value.to_string()),
                DOWNLOADED_KEY => {
                    let (done, total) = match value.split_once('/') {
                        Some((done, total)) => (done.trim(), Some(total.trim())),
                        None => (value, None),
                    };
                    bytes_downloaded = done.parse().map_err(|_| {
                        DownloadError::MalformedRecord(format!("bad byte count {:?}", done))
                    })?;
                    total_bytes = match total {
                        Some(total) => total.parse().map_err(|_| {
                            DownloadError::MalformedRecord(format!("bad total {:?}", total))
                        })?,
                        None => 0,
                    };
                }
                STATUS_KEY => {
                    status = Some(DownloadStatus::from_record_str(value).ok_or_else(|| {
                        DownloadError::MalformedRecord(format!("unknown status {:?}", value))
                    })?);
                }
                SESSION_KEY if !value.is_empty() => session = Some(value.to_string()),
                _ => {}
            }
        }

        let url = url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| DownloadError::MalformedRecord("missing download url".into()))?;
        let status =
            status.ok_or_else(|| DownloadError::MalformedRecord("missing status".into()))?;

        Ok(Self {
            url,
            bytes_downloaded,
            total_bytes,
            status,
            session,
        })
    }
}
