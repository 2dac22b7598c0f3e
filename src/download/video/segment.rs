use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};
use url::Url;

use super::range::ByteRange;
use crate::download::progress::ProgressTracker;
use crate::download::RangeSource;
use crate::error::{DownloadError, Result, TransferError};
use crate::options::RetryPolicy;

const WRITE_BUFF_SZ: usize = 64 * 1024;

enum Failure {
    Transient(TransferError),
    Fatal(DownloadError),
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Failure::Fatal(DownloadError::Io(err))
    }
}

impl From<TransferError> for Failure {
    fn from(err: TransferError) -> Self {
        Failure::Transient(err)
    }
}

/// One planned range and the on-disk file it is streamed into.
#[derive(Debug, Clone)]
pub struct VideoSegment {
    pub range: ByteRange,
    pub path: PathBuf,
}

impl VideoSegment {
    /// Segment files sit next to the destination as `<ordinal>_<file name>`.
    pub fn new(range: ByteRange, destination: &Path) -> Self {
        Self {
            range,
            path: segment_path(destination, range.ordinal),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.range.ordinal
    }

    async fn bytes_present(&self) -> Result<u64> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Stream the range into the segment file until it is complete.
    ///
    /// Bytes already on disk are kept and only the rest of the range is
    /// requested, on the first attempt as well as on every retry. Transient
    /// failures are retried according to `retry`.
    pub async fn download<S>(
        &self,
        source: &S,
        url: &Url,
        total: u64,
        progress: &ProgressTracker,
        retry: RetryPolicy,
        stall_timeout: Duration,
    ) -> Result<()>
    where
        S: RangeSource + ?Sized,
    {
        let expected = self.range.len_within(total);
        let mut attempts = 0u32;

        loop {
            let present = self.bytes_present().await?;

            // earlier attempts of this session already reported their chunks
            if attempts == 0 {
                progress.advance(present);
            }

            if present >= expected {
                if present > expected {
                    warn!(
                        ordinal = self.ordinal(),
                        present, expected, "segment file is larger than its range"
                    );
                }
                if !self.path.exists() {
                    tokio::fs::File::create(&self.path).await?;
                }
                debug!(ordinal = self.ordinal(), "segment already complete");
                return Ok(());
            }

            attempts += 1;

            match self
                .attempt(source, url, present, expected, progress, stall_timeout)
                .await
            {
                Ok(()) => {
                    debug!(ordinal = self.ordinal(), attempts, "segment finished");
                    return Ok(());
                }
                Err(Failure::Fatal(err)) => return Err(err),
                Err(Failure::Transient(err)) => {
                    if !retry.allows(attempts) {
                        return Err(DownloadError::Exhausted {
                            ordinal: self.ordinal(),
                            attempts,
                            source: err,
                        });
                    }

                    let delay = retry.delay(attempts);
                    warn!(
                        ordinal = self.ordinal(),
                        attempt = attempts,
                        error = %err,
                        "segment request failed, reconnecting in {:?}",
                        delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn attempt<S>(
        &self,
        source: &S,
        url: &Url,
        present: u64,
        expected: u64,
        progress: &ProgressTracker,
        stall_timeout: Duration,
    ) -> std::result::Result<(), Failure>
    where
        S: RangeSource + ?Sized,
    {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFF_SZ, file);

        let outcome = self
            .stream_into(&mut writer, source, url, present, expected, progress, stall_timeout)
            .await;

        // whatever arrived stays on disk for the next attempt
        writer.flush().await?;

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_into<S, W>(
        &self,
        writer: &mut W,
        source: &S,
        url: &Url,
        present: u64,
        expected: u64,
        progress: &ProgressTracker,
        stall_timeout: Duration,
    ) -> std::result::Result<(), Failure>
    where
        S: RangeSource + ?Sized,
        W: AsyncWrite + Unpin,
    {
        let header = self.range.header_from(present);
        debug!(ordinal = self.ordinal(), range = %header, "requesting segment");

        let response = tokio::time::timeout(stall_timeout, source.open_range(url, &header))
            .await
            .map_err(|_| TransferError::Stalled(stall_timeout))??;

        match response.status {
            StatusCode::PARTIAL_CONTENT => {}
            // a full body is only acceptable when the full body was asked for
            StatusCode::OK if self.range.start + present == 0 && self.range.is_open_ended() => {}
            StatusCode::OK => {
                return Err(Failure::Fatal(DownloadError::RangeUnsupported {
                    ordinal: self.ordinal(),
                    status: response.status,
                }))
            }
            status if TransferError::is_retryable_status(status) => {
                return Err(TransferError::Status(status).into())
            }
            status => {
                return Err(Failure::Fatal(DownloadError::HttpStatus {
                    ordinal: self.ordinal(),
                    status,
                }))
            }
        }

        let mut body = response.body;
        let mut received = present;

        loop {
            let next = tokio::time::timeout(stall_timeout, body.next())
                .await
                .map_err(|_| TransferError::Stalled(stall_timeout))?;

            let chunk = match next {
                Some(chunk) => chunk?,
                None => break,
            };

            if chunk.is_empty() {
                continue;
            }

            writer.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress.advance(chunk.len() as u64);
        }

        if received < expected {
            return Err(TransferError::Incomplete { received, expected }.into());
        }

        Ok(())
    }
}

pub fn segment_path(destination: &Path, ordinal: usize) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let folder = destination.parent().unwrap_or_else(|| Path::new(""));

    folder.join(format!("{}_{}", ordinal, name))
}
