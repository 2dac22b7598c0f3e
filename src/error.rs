use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DownloadError>;

/// Fatal conditions. Any of these aborts the current download session and is
/// handed back to the caller, which may move on to the next item of a batch.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("could not determine the size of {url}: {reason}")]
    SizeUnavailable { url: String, reason: String },

    #[error("segment {ordinal} gave up after {attempts} attempts: {source}")]
    Exhausted {
        ordinal: usize,
        attempts: u32,
        #[source]
        source: TransferError,
    },

    #[error("server ignored the range request for segment {ordinal} (status {status})")]
    RangeUnsupported { ordinal: usize, status: StatusCode },

    #[error("segment {ordinal} was refused with status {status}")]
    HttpStatus { ordinal: usize, status: StatusCode },

    #[error("could not merge segment file {}: {source}", path.display())]
    MergeIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("merged file is {actual} bytes but the server announced {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("key url returned a JSON document instead of key bytes: {url}")]
    InvalidKeyUrl { url: String },

    #[error("decryption failed: {0}")]
    Decryption(#[from] DecryptError),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not build the http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("could not read download list {}: {source}", path.display())]
    Batch {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("fetch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("payload of {0} bytes is shorter than one cipher block")]
    TooShort(usize),

    #[error("ciphertext of {0} bytes is not a multiple of the block size")]
    Unaligned(usize),

    #[error("cipher error: {0}")]
    Cipher(String),
}

/// A failed attempt at streaming one segment. The fetcher retries these;
/// they only reach the caller wrapped in [`DownloadError::Exhausted`].
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("server responded with {0}")]
    Status(StatusCode),

    #[error("stream closed after {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("no data received for {0:?}")]
    Stalled(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

impl TransferError {
    /// Statuses worth asking again for. Everything else is a definitive answer.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
    }
}
