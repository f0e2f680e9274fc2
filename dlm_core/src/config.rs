use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;

use crate::types::types::DownloadError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where downloads and progress records live, plus transport knobs.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub download_dir: PathBuf,
    pub progress_dir: PathBuf,
    pub connect_timeout: Duration,
    /// Per-read idle timeout. `None` leaves the transfer unbounded.
    pub read_timeout: Option<Duration>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            download_dir: home.join("Downloads").join("dlm"),
            progress_dir: home.join(".dlm").join("progress"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
        }
    }
}

impl DownloadConfig {
    /// Both directories rooted under `root`. Mostly useful for tests.
    pub fn in_dir(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            download_dir: root.join("downloads"),
            progress_dir: root.join("progress"),
            ..Self::default()
        }
    }

    /// Defaults overridden by `DLM_DOWNLOAD_DIR`, `DLM_PROGRESS_DIR`,
    /// `DLM_CONNECT_TIMEOUT_SECS` and `DLM_READ_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("DLM_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("DLM_PROGRESS_DIR") {
            config.progress_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_secs("DLM_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = secs;
        }
        if let Some(secs) = env_secs("DLM_READ_TIMEOUT_SECS") {
            config.read_timeout = Some(secs);
        }
        config
    }

    pub fn build_client(&self) -> Result<Client, DownloadError> {
        let mut builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .tcp_nodelay(true);
        if let Some(timeout) = self.read_timeout {
            builder = builder.read_timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            log::warn!("[config] ignoring {}={:?}: not a number of seconds", name, raw);
            None
        }
    }
}
