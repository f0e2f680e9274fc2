//! Resumable, pausable HTTP downloads that survive a process restart.
//!
//! [`DownloadSupervisor`] accepts URLs and hands back handles for
//! pause / resume / cancel; progress is checkpointed to a [`ProgressStore`]
//! and [`recovery::scan_and_resume`] picks unfinished downloads back up on
//! the next start.

pub mod config;
pub mod downloader;
pub mod progress;
pub mod recovery;
pub mod store;
pub mod types;

pub use config::DownloadConfig;
pub use downloader::supervisor::{DownloadSupervisor, EventReceiver};
pub use store::progress_store::ProgressStore;
pub use types::types::{
    DownloadError, DownloadEvent, DownloadEventKind, DownloadHandle, DownloadSnapshot,
    DownloadStatus, ErrorKind,
};
