//! Transfer execution and engine orchestration.
//!
//! [`TransferExecutor`] performs a single HTTP(S) transfer with byte-range
//! resume, manual redirect handling and cooperative stop signals.
//! [`DownloadEngine`] owns the scheduling queue and the worker task that
//! feeds records to the executor one at a time.

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod listener;
pub mod transfer;

pub use config::EngineConfig;
pub use control::{ControlSignal, ControlTable};
pub use engine::{DownloadEngine, EngineError};
pub use error::{DownloadError, codes};
pub use listener::{DownloadStatusListener, NoopListener};
pub use transfer::{TransferExecutor, TransferOutcome};
