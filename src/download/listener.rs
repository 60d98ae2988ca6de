//! Caller-facing status callback interface.
//!
//! Callbacks are delivered from the worker task's execution context; hosts
//! must marshal them to their own presentation context if needed.

/// Progress and terminal-outcome notifications for downloads.
///
/// Every method has a no-op default so hosts implement only what they need.
pub trait DownloadStatusListener: Send + Sync {
    /// A chunk was written. `percent` is `floor(downloaded_bytes * 100 /
    /// total_bytes)`; not delivered while the total size is unknown.
    fn on_progress(&self, _id: &str, _downloaded_bytes: i64, _percent: i32) {}

    /// The transfer finished and the record is `Complete`.
    fn on_download_complete(&self, _id: &str) {}

    /// The transfer failed. `error_code` is one of the stable codes in
    /// [`error::codes`](super::error::codes); the record reverts to `Queued`
    /// and stays eligible for a future resume.
    fn on_download_failed(&self, _id: &str, _error_code: i32, _message: &str) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl DownloadStatusListener for NoopListener {}
