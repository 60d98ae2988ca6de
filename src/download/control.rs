//! Cooperative control signaling between callers and the in-flight transfer.
//!
//! Callers set a per-id signal; the transfer executor polls it between
//! streamed chunks and stops cooperatively. Signals never interrupt a chunk
//! mid-write, so a signal can take up to one chunk's worth of latency to act.

use std::collections::HashMap;

use tokio::sync::Mutex;

/// A stop request for an in-flight transfer, ordered by strength:
/// a cancel overrides a pause, which overrides a requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ControlSignal {
    /// Stop and return the record to the queued state, progress kept.
    Requeue,
    /// Stop and leave the record paused, progress kept.
    Pause,
    /// Stop, delete the destination file and the stored record.
    Cancel,
}

#[derive(Debug, Default)]
struct ControlInner {
    /// Id of the record currently owned by the transfer executor.
    current: Option<String>,
    /// Pending signal per record id. At most one entry per id; a weaker
    /// signal never replaces a stronger one.
    signals: HashMap<String, ControlSignal>,
}

/// Shared table of control signals keyed by record id.
#[derive(Debug, Default)]
pub struct ControlTable {
    inner: Mutex<ControlInner>,
}

impl ControlTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop for the given id. If a signal is already pending,
    /// the stronger of the two wins.
    pub async fn signal(&self, id: &str, signal: ControlSignal) {
        let mut inner = self.inner.lock().await;
        inner
            .signals
            .entry(id.to_string())
            .and_modify(|existing| *existing = (*existing).max(signal))
            .or_insert(signal);
    }

    /// Consumes the pending signal for the given id, if any.
    pub async fn take(&self, id: &str) -> Option<ControlSignal> {
        self.inner.lock().await.signals.remove(id)
    }

    /// Drops any stale signal for the given id without acting on it.
    pub async fn clear(&self, id: &str) {
        self.inner.lock().await.signals.remove(id);
    }

    /// Marks which record the worker currently owns (or none).
    pub async fn set_current(&self, id: Option<String>) {
        self.inner.lock().await.current = id;
    }

    /// Id of the in-flight record, if any.
    pub async fn current(&self) -> Option<String> {
        self.inner.lock().await.current.clone()
    }

    /// Whether the given id is the in-flight record.
    pub async fn is_current(&self, id: &str) -> bool {
        self.inner.lock().await.current.as_deref() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_take_roundtrip() {
        let table = ControlTable::new();
        table.signal("a1", ControlSignal::Pause).await;

        assert_eq!(table.take("a1").await, Some(ControlSignal::Pause));
        assert_eq!(table.take("a1").await, None);
    }

    #[tokio::test]
    async fn test_cancel_overrides_pause() {
        let table = ControlTable::new();
        table.signal("a1", ControlSignal::Pause).await;
        table.signal("a1", ControlSignal::Cancel).await;

        assert_eq!(table.take("a1").await, Some(ControlSignal::Cancel));
    }

    #[tokio::test]
    async fn test_weaker_signal_does_not_downgrade() {
        let table = ControlTable::new();
        table.signal("a1", ControlSignal::Cancel).await;
        table.signal("a1", ControlSignal::Requeue).await;

        assert_eq!(table.take("a1").await, Some(ControlSignal::Cancel));
    }

    #[tokio::test]
    async fn test_signals_are_per_id() {
        let table = ControlTable::new();
        table.signal("a1", ControlSignal::Pause).await;

        assert_eq!(table.take("a2").await, None);
        assert_eq!(table.take("a1").await, Some(ControlSignal::Pause));
    }

    #[tokio::test]
    async fn test_current_tracking() {
        let table = ControlTable::new();
        assert_eq!(table.current().await, None);

        table.set_current(Some("a1".to_string())).await;
        assert!(table.is_current("a1").await);
        assert!(!table.is_current("a2").await);

        table.set_current(None).await;
        assert_eq!(table.current().await, None);
    }

    #[tokio::test]
    async fn test_signal_strength_ordering() {
        assert!(ControlSignal::Cancel > ControlSignal::Pause);
        assert!(ControlSignal::Pause > ControlSignal::Requeue);
    }
}
