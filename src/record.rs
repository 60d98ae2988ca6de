//! Download record data model: lifecycle state and scheduling priority.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a download record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Waiting in the scheduling queue (or eligible to re-enter it).
    Queued,
    /// Currently owned by the transfer executor.
    InProgress,
    /// Stopped by the caller; progress preserved for a later resume.
    Paused,
    /// Terminally failed. Kept for the taxonomy; the executor reverts
    /// failed records to `Queued` so they stay eligible for retry.
    Failed,
    /// Transfer finished; the record remains in the store as history.
    Complete,
}

impl DownloadState {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            "complete" => Ok(Self::Complete),
            _ => Err(format!("invalid download state: {s}")),
        }
    }
}

/// Scheduling priority. Requests are served from higher priorities to lower,
/// FIFO within a tier.
///
/// The integer values are stable and persisted; renumbering them would break
/// existing databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Below-normal priority.
    Low,
    /// Default priority for new and re-enqueued records.
    Normal,
    /// Above-normal priority.
    High,
    /// Front-of-queue tier used by `promote`.
    Immediate,
}

impl Priority {
    /// Returns the stable integer value stored in the database.
    #[must_use]
    pub fn value(&self) -> i64 {
        match self {
            Self::Low => 101,
            Self::Normal => 102,
            Self::High => 103,
            Self::Immediate => 104,
        }
    }

    /// Parses a stored integer value.
    ///
    /// Unknown values fall back to `Normal`.
    #[must_use]
    pub fn from_value(value: i64) -> Self {
        match value {
            101 => Self::Low,
            103 => Self::High,
            104 => Self::Immediate,
            _ => Self::Normal,
        }
    }
}

/// Sentinel for an unknown total size (Content-Length not yet determined).
pub const TOTAL_BYTES_UNKNOWN: i64 = -1;

/// A single download request's full persistent state.
///
/// `id`, `url`, `destination_path` and `wifi_only` are immutable after
/// creation; `priority` is mutated only by the scheduler and `state` /
/// byte counters only by the engine and executor.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRecord {
    /// Caller-supplied unique identifier; primary key in the store and
    /// identity in the scheduling queue.
    pub id: String,
    /// Source URL.
    pub url: String,
    /// File the transfer writes to.
    pub destination_path: String,
    /// Gates enqueue when the connectivity signal says the preferred
    /// network is unavailable.
    pub wifi_only: bool,
    /// Stored priority value (see [`Priority`]).
    pub priority: i64,
    /// Current lifecycle state (stored as text, parsed via `state()`).
    #[sqlx(rename = "state")]
    pub state_str: String,
    /// Bytes written to the destination so far.
    pub downloaded_bytes: i64,
    /// Expected total size, or [`TOTAL_BYTES_UNKNOWN`].
    pub total_bytes: i64,
    /// When the record was created (insertion tiebreaker for listings).
    pub created_at: String,
    /// When the record was last updated.
    pub updated_at: String,
}

impl DownloadRecord {
    /// Creates a new record in the `Queued` state with `Normal` priority.
    ///
    /// Timestamps are assigned by the store on insert.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        destination_path: impl Into<String>,
        wifi_only: bool,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            destination_path: destination_path.into(),
            wifi_only,
            priority: Priority::Normal.value(),
            state_str: DownloadState::Queued.as_str().to_string(),
            downloaded_bytes: 0,
            total_bytes: TOTAL_BYTES_UNKNOWN,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    /// Returns the parsed state enum.
    ///
    /// Falls back to `Queued` if the stored string is invalid.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        self.state_str.parse().unwrap_or(DownloadState::Queued)
    }

    /// Sets the state, keeping the stored string in sync.
    pub fn set_state(&mut self, state: DownloadState) {
        self.state_str = state.as_str().to_string();
    }

    /// Returns the parsed priority tier.
    #[must_use]
    pub fn priority(&self) -> Priority {
        Priority::from_value(self.priority)
    }

    /// Sets the priority tier.
    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority.value();
    }

    /// Whether the expected total size is known.
    #[must_use]
    pub fn total_bytes_known(&self) -> bool {
        self.total_bytes > 0
    }
}

impl fmt::Display for DownloadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DownloadRecord {{ id: {}, url: {}, state: {} }}",
            self.id,
            self.url,
            self.state()
        )
    }
}
