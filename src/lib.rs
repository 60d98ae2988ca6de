//! Download Manager Core Library
//!
//! A resumable, queued file-download engine. Callers submit download requests
//! identified by a stable id and a source URL; the engine persists their
//! state, transfers bytes to a destination path over HTTP(S), and supports
//! pause, resume, cancel and priority-based reordering while reporting
//! progress and terminal outcomes through a callback interface.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`record`] - Download record data model (state, priority)
//! - [`store`] - Persistent record store backed by `SQLite`
//! - [`queue`] - In-memory priority scheduling queue
//! - [`download`] - Transfer executor and engine orchestration
//!
//! The engine runs a single worker task that drains the scheduling queue and
//! hands one record at a time to the transfer executor. Control operations
//! (pause/resume/cancel) signal the in-flight transfer cooperatively; signals
//! take effect between streamed chunks.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod db;
pub mod download;
pub mod queue;
pub mod record;
pub mod store;

// Re-export commonly used types
pub use db::Database;
pub use download::{
    ControlSignal, ControlTable, DownloadEngine, DownloadError, DownloadStatusListener,
    EngineConfig, EngineError, NoopListener, TransferExecutor, TransferOutcome,
};
pub use queue::SchedulingQueue;
pub use record::{DownloadRecord, DownloadState, Priority};
pub use store::{RecordStore, StoreError};
