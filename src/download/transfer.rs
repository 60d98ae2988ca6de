//! Transfer executor: performs one HTTP(S) transfer for a single record.
//!
//! The executor is single-flight — it owns exactly one record at a time. It
//! decides between a fresh fetch and a byte-range resume, streams the body to
//! the destination file, persists progress atomically per chunk, polls the
//! control table between chunks, and classifies every failure into the
//! stable error-code taxonomy.
//!
//! Redirects are disabled at the transport layer; redirect status codes and
//! transient transport errors share one bounded retry budget
//! ([`EngineConfig::max_redirects`]). HTTP-classified failures move the
//! record back to `Queued` so it stays eligible for a later resume.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, RANGE, TRANSFER_ENCODING};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::config::EngineConfig;
use super::control::{ControlSignal, ControlTable};
use super::error::DownloadError;
use super::listener::DownloadStatusListener;
use crate::record::{DownloadRecord, DownloadState, TOTAL_BYTES_UNKNOWN};
use crate::store::RecordStore;

/// Terminal outcome of one executor pass over a record.
#[derive(Debug)]
pub enum TransferOutcome {
    /// End of stream reached; record persisted as `Complete`.
    Completed,
    /// Stopped by a pause signal; record persisted as `Paused`.
    Paused,
    /// Stopped by a requeue signal; record persisted as `Queued`.
    Requeued,
    /// Stopped by a cancel signal; destination file and record deleted.
    Cancelled,
    /// Transfer failed; record reverted to `Queued` and the error surfaced
    /// through the listener.
    Failed(DownloadError),
}

/// Whether a failed attempt may be retried within the redirect budget.
enum Attempt {
    Done(TransferOutcome),
    Retry(RetryReason),
}

enum RetryReason {
    /// 301/302/303/307 response.
    Redirect(u16),
    /// Connect/read failure before the body started streaming.
    Transport(DownloadError),
}

/// Executes HTTP transfers for the engine's worker.
pub struct TransferExecutor {
    client: Client,
    store: RecordStore,
    listener: Arc<dyn DownloadStatusListener>,
    max_redirects: u32,
}

impl std::fmt::Debug for TransferExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferExecutor")
            .field("max_redirects", &self.max_redirects)
            .finish_non_exhaustive()
    }
}

impl TransferExecutor {
    /// Creates an executor with a client configured per the engine config.
    ///
    /// Redirects are disabled so redirect status codes reach the bounded
    /// retry handling instead of being followed silently.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(
        config: &EngineConfig,
        store: RecordStore,
        listener: Arc<dyn DownloadStatusListener>,
    ) -> Self {
        let client = ClientBuilder::new()
            .redirect(Policy::none())
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            client,
            store,
            listener,
            max_redirects: config.max_redirects,
        }
    }

    /// Runs one transfer to its terminal outcome.
    ///
    /// Persists every state transition; on failure the record reverts to
    /// `Queued` and the listener receives the error code and message.
    #[instrument(skip(self, record, control), fields(id = %record.id, url = %record.url))]
    pub async fn run(
        &self,
        record: &mut DownloadRecord,
        control: &ControlTable,
    ) -> TransferOutcome {
        let outcome = self.execute(record, control).await;

        match &outcome {
            TransferOutcome::Completed => {
                info!(bytes = record.downloaded_bytes, "download complete");
                self.listener.on_download_complete(&record.id);
            }
            TransferOutcome::Failed(error) => {
                warn!(error = %error, code = error.code(), "download failed");
                // Recoverable until proven otherwise: the record goes back to
                // queued so a later pass can resume it.
                if let Err(store_error) = self
                    .store
                    .update_progress(&record.id, record.downloaded_bytes, DownloadState::Queued)
                    .await
                {
                    warn!(error = %store_error, "failed to requeue record after failure");
                }
                record.set_state(DownloadState::Queued);
                self.listener
                    .on_download_failed(&record.id, error.code(), &error.to_string());
            }
            TransferOutcome::Paused | TransferOutcome::Requeued | TransferOutcome::Cancelled => {}
        }

        outcome
    }

    async fn execute(
        &self,
        record: &mut DownloadRecord,
        control: &ControlTable,
    ) -> TransferOutcome {
        if Url::parse(&record.url).is_err() {
            return TransferOutcome::Failed(DownloadError::malformed_url(&record.url));
        }

        // Resume only when the partial file is still there and bytes were
        // written; otherwise start over with a clean destination.
        let mut resume =
            Path::new(&record.destination_path).exists() && record.downloaded_bytes > 0;
        if resume {
            // An interrupted run can leave the file out of step with the
            // persisted counter. Trim a longer file down to the counter;
            // adopt a shorter file's length as the resume offset.
            match tokio::fs::metadata(&record.destination_path).await {
                Ok(metadata) => {
                    let on_disk = i64::try_from(metadata.len()).unwrap_or(i64::MAX);
                    if on_disk > record.downloaded_bytes {
                        warn!(
                            on_disk,
                            counter = record.downloaded_bytes,
                            "destination longer than recorded progress, trimming tail"
                        );
                        if let Err(error) =
                            truncate_destination(&record.destination_path, record.downloaded_bytes)
                                .await
                        {
                            return TransferOutcome::Failed(DownloadError::file(
                                PathBuf::from(&record.destination_path),
                                error,
                            ));
                        }
                    } else if on_disk < record.downloaded_bytes {
                        warn!(
                            on_disk,
                            counter = record.downloaded_bytes,
                            "destination shorter than recorded progress, resuming from file length"
                        );
                        record.downloaded_bytes = on_disk;
                        resume = on_disk > 0;
                    }
                }
                Err(_) => resume = false,
            }
        }
        if !resume {
            record.downloaded_bytes = 0;
            cleanup_destination(&record.destination_path).await;
        }
        debug!(resume, offset = record.downloaded_bytes, "starting transfer");

        let mut redirect_count = 0u32;
        loop {
            match self.attempt(record, resume, control).await {
                Attempt::Done(outcome) => return outcome,
                Attempt::Retry(reason) => {
                    if redirect_count < self.max_redirects {
                        redirect_count += 1;
                        debug!(redirect_count, "retrying connect");
                    } else {
                        return TransferOutcome::Failed(match reason {
                            RetryReason::Redirect(status) => {
                                debug!(status, "redirect budget exhausted");
                                DownloadError::too_many_redirects(&record.url)
                            }
                            RetryReason::Transport(error) => error,
                        });
                    }
                }
            }
        }
    }

    /// One connect-and-stream attempt.
    async fn attempt(
        &self,
        record: &mut DownloadRecord,
        resume: bool,
        control: &ControlTable,
    ) -> Attempt {
        let mut request = self.client.get(&record.url);
        if resume {
            request = request.header(RANGE, format!("bytes={}-", record.downloaded_bytes));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                return Attempt::Retry(RetryReason::Transport(DownloadError::network(
                    &record.url,
                    error,
                )));
            }
        };

        let status = response.status();
        debug!(status = status.as_u16(), "response received");

        match status {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {
                let Some(total) = derive_total_bytes(&response, record, resume) else {
                    return Attempt::Done(TransferOutcome::Failed(DownloadError::unknown_size(
                        &record.url,
                    )));
                };
                if total != record.total_bytes {
                    record.total_bytes = total;
                    if let Err(error) = self.store.set_total_bytes(&record.id, total).await {
                        warn!(error = %error, "failed to persist total size");
                    }
                }
                Attempt::Done(self.stream_body(response, record, control, resume).await)
            }
            StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT => {
                Attempt::Retry(RetryReason::Redirect(status.as_u16()))
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                Attempt::Done(TransferOutcome::Failed(DownloadError::RangeNotSatisfiable {
                    url: record.url.clone(),
                }))
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                Attempt::Done(TransferOutcome::Failed(DownloadError::ServiceUnavailable {
                    url: record.url.clone(),
                }))
            }
            StatusCode::INTERNAL_SERVER_ERROR => Attempt::Done(TransferOutcome::Failed(
                DownloadError::InternalServerError {
                    url: record.url.clone(),
                },
            )),
            other => Attempt::Done(TransferOutcome::Failed(DownloadError::http(
                &record.url,
                other.as_u16(),
            ))),
        }
    }

    /// Streams the response body to the destination, checking control
    /// signals between chunks (cancel > pause > requeue).
    async fn stream_body(
        &self,
        response: Response,
        record: &mut DownloadRecord,
        control: &ControlTable,
        append: bool,
    ) -> TransferOutcome {
        let path = PathBuf::from(&record.destination_path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(error) = tokio::fs::create_dir_all(parent).await
        {
            return TransferOutcome::Failed(DownloadError::file(path, error));
        }

        // Append for a true resume; create/truncate otherwise.
        let file = if append {
            OpenOptions::new().create(true).append(true).open(&path).await
        } else {
            File::create(&path).await
        };
        let mut file = match file {
            Ok(file) => file,
            Err(error) => return TransferOutcome::Failed(DownloadError::file(path, error)),
        };

        let mut stream = response.bytes_stream();

        loop {
            // A signal stops the transfer before the next read. Stronger
            // signals already won at insertion time (cancel > pause > requeue).
            if let Some(signal) = control.take(&record.id).await {
                let _ = file.flush().await;
                drop(file);
                return match signal {
                    ControlSignal::Cancel => self.finish_cancelled(record).await,
                    ControlSignal::Pause => {
                        self.finish_stopped(record, DownloadState::Paused).await;
                        TransferOutcome::Paused
                    }
                    ControlSignal::Requeue => {
                        self.finish_stopped(record, DownloadState::Queued).await;
                        TransferOutcome::Requeued
                    }
                };
            }

            match stream.next().await {
                None => {
                    // Durable flush at end of stream.
                    if let Err(error) = file.flush().await {
                        return TransferOutcome::Failed(DownloadError::file(path.clone(), error));
                    }
                    if let Err(error) = file.sync_all().await {
                        return TransferOutcome::Failed(DownloadError::file(path.clone(), error));
                    }
                    record.set_state(DownloadState::Complete);
                    if let Err(error) = self
                        .store
                        .update_progress(&record.id, record.downloaded_bytes, DownloadState::Complete)
                        .await
                    {
                        warn!(error = %error, "failed to persist completion");
                    }
                    return TransferOutcome::Completed;
                }
                Some(Ok(chunk)) => {
                    if let Err(error) = file.write_all(&chunk).await {
                        return TransferOutcome::Failed(DownloadError::file(path.clone(), error));
                    }
                    record.downloaded_bytes += chunk.len() as i64;
                    // Byte count and state persist together so a crash can't
                    // leave them out of step.
                    if let Err(error) = self
                        .store
                        .update_progress(
                            &record.id,
                            record.downloaded_bytes,
                            DownloadState::InProgress,
                        )
                        .await
                    {
                        warn!(error = %error, "failed to persist progress");
                    }
                    if record.total_bytes_known() {
                        #[allow(clippy::cast_possible_truncation)]
                        let percent =
                            ((record.downloaded_bytes * 100) / record.total_bytes) as i32;
                        self.listener
                            .on_progress(&record.id, record.downloaded_bytes, percent);
                    }
                }
                Some(Err(error)) => {
                    // Broken stream mid-body: bytes written so far are kept,
                    // the failure path requeues the record for a resume.
                    let _ = file.flush().await;
                    return TransferOutcome::Failed(DownloadError::network(&record.url, error));
                }
            }
        }
    }

    /// Cancel: the partial output and the stored record are both removed.
    async fn finish_cancelled(&self, record: &DownloadRecord) -> TransferOutcome {
        info!(id = %record.id, "transfer cancelled");
        cleanup_destination(&record.destination_path).await;
        if let Err(error) = self.store.delete(&record.id).await {
            warn!(error = %error, "failed to delete cancelled record");
        }
        TransferOutcome::Cancelled
    }

    /// Pause/requeue: progress is preserved for a later resume.
    async fn finish_stopped(&self, record: &mut DownloadRecord, state: DownloadState) {
        info!(id = %record.id, state = %state, bytes = record.downloaded_bytes, "transfer stopped");
        record.set_state(state);
        if let Err(error) = self
            .store
            .update_progress(&record.id, record.downloaded_bytes, state)
            .await
        {
            warn!(error = %error, "failed to persist stop state");
        }
    }
}

/// Determines the expected total size for this transfer.
///
/// Returns `None` when the size cannot be determined (no Content-Length and
/// no chunked Transfer-Encoding), [`TOTAL_BYTES_UNKNOWN`] for a chunked body
/// of unknown length, and the absolute total otherwise. For a resumed
/// transfer the Content-Length covers the remainder, so the stored offset is
/// added back; a total recorded by the original fetch takes precedence.
fn derive_total_bytes(response: &Response, record: &DownloadRecord, resume: bool) -> Option<i64> {
    if resume && record.total_bytes_known() {
        return Some(record.total_bytes);
    }

    let content_length = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok());

    let chunked = response
        .headers()
        .get(TRANSFER_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"));

    match content_length {
        // Content-Length is authoritative when the body is not chunked.
        Some(length) if !chunked => {
            let offset = if resume { record.downloaded_bytes } else { 0 };
            Some(offset + length)
        }
        _ if chunked => Some(TOTAL_BYTES_UNKNOWN),
        _ => None,
    }
}

/// Brings the destination file back to the recorded length before a resume
/// appends to it.
async fn truncate_destination(destination_path: &str, len: i64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(destination_path).await?;
    file.set_len(u64::try_from(len).unwrap_or(0)).await?;
    file.sync_all().await?;
    Ok(())
}

/// Best-effort removal of a stale destination file.
async fn cleanup_destination(destination_path: &str) {
    if Path::new(destination_path).exists() {
        debug!(path = %destination_path, "deleting destination file");
        if let Err(error) = tokio::fs::remove_file(destination_path).await {
            warn!(path = %destination_path, error = %error, "failed to delete destination");
        }
    }
}
