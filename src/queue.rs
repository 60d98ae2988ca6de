//! In-memory priority scheduling queue.
//!
//! Pending records are ordered by priority tier (`Immediate` > `High` >
//! `Normal` > `Low`); ties within a tier are served FIFO using a
//! monotonically increasing sequence counter as a secondary sort key, so
//! dequeue order is deterministic for equal priorities.
//!
//! [`SchedulingQueue::pop`] suspends the caller while the queue is empty and
//! wakes as soon as a record is enqueued or promoted. All operations are safe
//! to call concurrently with the worker draining the queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::record::{DownloadRecord, Priority};

/// Heap entry: priority first, then FIFO by sequence number.
#[derive(Debug)]
struct Entry {
    priority: i64,
    seq: u64,
    record: DownloadRecord,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the earlier sequence number.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl Inner {
    fn contains(&self, id: &str) -> bool {
        self.heap.iter().any(|entry| entry.record.id == id)
    }

    fn push(&mut self, record: DownloadRecord) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority: record.priority,
            seq,
            record,
        });
    }

    /// Removes the entry with the given id, keeping the rest of the heap.
    fn remove(&mut self, id: &str) -> Option<DownloadRecord> {
        if !self.contains(id) {
            return None;
        }
        let entries = std::mem::take(&mut self.heap).into_vec();
        let mut removed = None;
        for entry in entries {
            if removed.is_none() && entry.record.id == id {
                removed = Some(entry.record);
            } else {
                self.heap.push(entry);
            }
        }
        removed
    }
}

/// Thread-safe priority queue of pending download records.
#[derive(Debug, Default)]
pub struct SchedulingQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl SchedulingQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record to the queue at the priority it carries.
    ///
    /// Adding a record whose id is already present is a no-op; returns
    /// whether the record was actually inserted.
    pub async fn enqueue(&self, record: DownloadRecord) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.contains(&record.id) {
            debug!(id = %record.id, "enqueue skipped, id already queued");
            return false;
        }
        debug!(id = %record.id, priority = record.priority, "enqueued");
        inner.push(record);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Moves a queued record to the front by reinserting it at the
    /// `Immediate` tier with a fresh sequence number.
    ///
    /// Returns whether the record was found and promoted.
    pub async fn promote(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(mut record) = inner.remove(id) else {
            return false;
        };
        record.set_priority(Priority::Immediate);
        inner.push(record);
        drop(inner);
        debug!(id, "promoted to front of queue");
        self.notify.notify_one();
        true
    }

    /// Removes a record by id, returning it if it was queued.
    pub async fn remove_by_id(&self, id: &str) -> Option<DownloadRecord> {
        self.inner.lock().await.remove(id)
    }

    /// Drains the queue, returning the removed records so the caller can
    /// fix up their persisted state.
    pub async fn clear(&self) -> Vec<DownloadRecord> {
        let mut inner = self.inner.lock().await;
        std::mem::take(&mut inner.heap)
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|entry| entry.record)
            .collect()
    }

    /// Whether a record with the given id is queued.
    pub async fn contains(&self, id: &str) -> bool {
        self.inner.lock().await.contains(id)
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.heap.is_empty()
    }

    /// Number of queued records.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    /// Removes and returns the highest-priority record, suspending while the
    /// queue is empty until a record is enqueued or promoted.
    pub async fn pop(&self) -> DownloadRecord {
        loop {
            // The future is created before the emptiness check so a
            // notification arriving in between is not lost.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.heap.pop() {
                    debug!(id = %entry.record.id, "popped");
                    return entry.record;
                }
            }
            notified.await;
        }
    }
}
