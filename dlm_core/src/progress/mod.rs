pub mod notifier;
pub mod observer;
pub mod snapshot;

pub use notifier::EventNotifier;
pub use observer::DownloadObserver;
pub use snapshot::{format_bytes, percent};
