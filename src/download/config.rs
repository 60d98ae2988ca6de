//! Engine configuration (timeouts, redirect budget).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default redirect-retry budget.
///
/// Zero preserves the original policy: redirect responses are never followed
/// and terminate the transfer with a too-many-redirects failure. Raise this
/// to allow the executor to retry the request a bounded number of times.
pub const DEFAULT_MAX_REDIRECTS: u32 = 0;

/// Tunables for the download engine and transfer executor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Read timeout between received chunks.
    pub read_timeout: Duration,
    /// Bounded retry budget shared by redirect responses and transient
    /// transport errors.
    pub max_redirects: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}
