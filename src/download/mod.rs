pub mod progress;
pub mod video;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::error::{DownloadError, Result, TransferError};
use crate::options::Options;

pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, TransferError>>;

/// Response to a ranged request: the status line and the body as it arrives.
pub struct RangeResponse {
    pub status: StatusCode,
    pub body: ByteStream,
}

/// Everything the download pipeline needs from the network.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Total size of the resource, read from the response headers of a GET
    /// whose body is never consumed.
    async fn content_length(&self, url: &Url) -> Result<u64>;

    /// Issue a GET carrying `Range: <range>`.
    async fn open_range(&self, url: &Url, range: &str) -> std::result::Result<RangeResponse, TransferError>;

    /// Plain GET returning the whole body.
    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes>;
}

pub struct DownloadClient {
    client: reqwest::Client,
}

impl DownloadClient {
    pub fn new(options: &Options) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; rv:78.0) Gecko/20100101 Firefox/78.0")
            .connect_timeout(options.timeout)
            .build()
            .map_err(DownloadError::Client)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RangeSource for DownloadClient {
    async fn content_length(&self, url: &Url) -> Result<u64> {
        let unavailable = |reason: String| DownloadError::SizeUnavailable {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|err| unavailable(err.to_string()))?;

        if let Err(err) = response.error_for_status_ref() {
            return Err(unavailable(err.to_string()));
        }

        let size = match response.headers().get(CONTENT_LENGTH) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| unavailable(format!("malformed Content-Length {:?}", value)))?,
            None => return Err(unavailable("response has no Content-Length".to_string())),
        };

        debug!(%url, size, "probed content length");

        // the body is dropped unread; the connection is simply not reused
        drop(response);

        Ok(size)
    }

    async fn open_range(&self, url: &Url, range: &str) -> std::result::Result<RangeResponse, TransferError> {
        let response = self.client.get(url.as_str()).header(RANGE, range).send().await?;

        let status = response.status();
        let body = response.bytes_stream().map_err(TransferError::from).boxed();

        Ok(RangeResponse { status, body })
    }

    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes> {
        let request_failed = |source: reqwest::Error| DownloadError::Request {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url.as_str()).send().await.map_err(request_failed)?;
        let response = response.error_for_status().map_err(request_failed)?;

        response.bytes().await.map_err(request_failed)
    }
}

pub fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|source| DownloadError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}
