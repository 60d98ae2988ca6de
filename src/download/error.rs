//! Error types for the transfer executor, with the stable integer error
//! codes surfaced to callers through the status listener.

use std::path::PathBuf;

use thiserror::Error;

/// Stable error codes delivered via
/// [`DownloadStatusListener::on_download_failed`](super::DownloadStatusListener::on_download_failed).
///
/// The 1xx values are part of the listener contract and must stay stable;
/// 416/500/503 are the raw HTTP status codes they correspond to.
pub mod codes {
    /// Unhandled HTTP status or network-level failure.
    pub const HTTP_ERROR: i32 = 102;
    /// The request URL failed to parse.
    pub const MALFORMED_URL: i32 = 103;
    /// Filesystem failure while writing the destination.
    pub const FILE_ERROR: i32 = 104;
    /// Redirect-retry budget exhausted.
    pub const TOO_MANY_REDIRECTS: i32 = 105;
    /// No Content-Length and no chunked Transfer-Encoding.
    pub const UNKNOWN_SIZE: i32 = 106;
    /// HTTP 416 Range Not Satisfiable.
    pub const RANGE_NOT_SATISFIABLE: i32 = 416;
    /// HTTP 500 Internal Server Error.
    pub const INTERNAL_SERVER_ERROR: i32 = 500;
    /// HTTP 503 Service Unavailable.
    pub const SERVICE_UNAVAILABLE: i32 = 503;
}

/// Errors that terminate a single transfer.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    MalformedUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Unhandled HTTP error response.
    #[error("HTTP {status} downloading {url}")]
    Http {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Network-level error (DNS resolution, connect/read timeout, TLS, or a
    /// broken stream mid-body).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// File system error while writing the destination.
    #[error("IO error writing to {path}: {source}")]
    File {
        /// The destination path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Redirect-retry budget exhausted.
    #[error("too many redirects downloading {url}")]
    TooManyRedirects {
        /// The URL that kept redirecting.
        url: String,
    },

    /// Neither Content-Length nor chunked Transfer-Encoding present; the
    /// transfer size cannot be determined.
    #[error("cannot determine download size for {url}")]
    UnknownSize {
        /// The URL with an undeterminable size.
        url: String,
    },

    /// HTTP 416: the requested byte range is not satisfiable.
    #[error("HTTP 416 range not satisfiable downloading {url}")]
    RangeNotSatisfiable {
        /// The URL that rejected the range.
        url: String,
    },

    /// HTTP 500 from the server.
    #[error("HTTP 500 internal server error downloading {url}")]
    InternalServerError {
        /// The URL that failed.
        url: String,
    },

    /// HTTP 503 from the server.
    #[error("HTTP 503 service unavailable downloading {url}")]
    ServiceUnavailable {
        /// The URL that failed.
        url: String,
    },
}

impl DownloadError {
    /// Creates a malformed-URL error.
    pub fn malformed_url(url: impl Into<String>) -> Self {
        Self::MalformedUrl { url: url.into() }
    }

    /// Creates an unhandled-HTTP-status error.
    pub fn http(url: impl Into<String>, status: u16) -> Self {
        Self::Http {
            url: url.into(),
            status,
        }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a file IO error.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Creates a too-many-redirects error.
    pub fn too_many_redirects(url: impl Into<String>) -> Self {
        Self::TooManyRedirects { url: url.into() }
    }

    /// Creates an unknown-size error.
    pub fn unknown_size(url: impl Into<String>) -> Self {
        Self::UnknownSize { url: url.into() }
    }

    /// Returns the stable integer code for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::MalformedUrl { .. } => codes::MALFORMED_URL,
            Self::Http { .. } | Self::Network { .. } => codes::HTTP_ERROR,
            Self::File { .. } => codes::FILE_ERROR,
            Self::TooManyRedirects { .. } => codes::TOO_MANY_REDIRECTS,
            Self::UnknownSize { .. } => codes::UNKNOWN_SIZE,
            Self::RangeNotSatisfiable { .. } => codes::RANGE_NOT_SATISFIABLE,
            Self::InternalServerError { .. } => codes::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => codes::SERVICE_UNAVAILABLE,
        }
    }
}

// No `From<reqwest::Error>`/`From<std::io::Error>`: every variant needs the
// url/path context the source errors don't carry, so the helper constructors
// are the conversion points.
