use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use dlm_core::progress::{format_bytes, DownloadObserver};
use dlm_core::DownloadHandle;

const BAR_TEMPLATE: &str =
    "{prefix} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}) ETA {eta} {msg}";
const SPINNER_TEMPLATE: &str = "{prefix} {spinner} {bytes} ({binary_bytes_per_sec}) {msg}";

/// Renders one indicatif bar per download. Downloads with an unknown length
/// get a spinner until the server reports one.
pub struct TerminalProgressObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<DownloadHandle, ProgressBar>>,
}

impl TerminalProgressObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Print a line above the bars without tearing them.
    pub fn println(&self, line: impl AsRef<str>) {
        let _ = self.multi.println(line);
    }

    fn with_bar(&self, handle: DownloadHandle, total_bytes: u64, f: impl FnOnce(&ProgressBar)) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let bar = bars.entry(handle).or_insert_with(|| {
            let bar = if total_bytes > 0 {
                self.multi.add(ProgressBar::new(total_bytes))
            } else {
                self.multi.add(ProgressBar::new_spinner())
            };
            bar.set_style(style_for(total_bytes));
            bar.set_prefix(handle.to_string());
            bar
        });
        if total_bytes > 0 && bar.length() != Some(total_bytes) {
            bar.set_length(total_bytes);
            bar.set_style(style_for(total_bytes));
        }
        f(bar);
    }
}

fn style_for(total_bytes: u64) -> ProgressStyle {
    let template = if total_bytes > 0 {
        BAR_TEMPLATE
    } else {
        SPINNER_TEMPLATE
    };
    ProgressStyle::with_template(template)
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

#[async_trait]
impl DownloadObserver for TerminalProgressObserver {
    async fn on_progress(&self, handle: DownloadHandle, bytes_downloaded: u64, total_bytes: u64) {
        self.with_bar(handle, total_bytes, |bar| {
            bar.set_position(bytes_downloaded);
            bar.set_message("");
        });
    }

    async fn on_finished(&self, handle: DownloadHandle, path: &Path) {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        self.with_bar(handle, size, |bar| {
            bar.set_position(size);
            bar.finish_with_message(format!("done {} -> {}", format_bytes(size), path.display()));
        });
    }

    async fn on_failed(&self, handle: DownloadHandle, cause: &str) {
        self.with_bar(handle, 0, |bar| {
            bar.abandon_with_message(format!("failed: {}", cause));
        });
    }

    async fn on_pause_changed(&self, handle: DownloadHandle, paused: bool) {
        self.with_bar(handle, 0, |bar| {
            bar.set_message(if paused { "paused" } else { "" });
        });
    }
}
