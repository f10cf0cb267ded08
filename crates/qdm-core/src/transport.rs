//! Wire transport abstraction and the default reqwest-backed implementation.
//!
//! The engine never talks HTTP itself; it consumes a [`Transport`] capable
//! of opening a byte stream at an offset. Production code uses
//! [`HttpTransport`]; tests substitute scripted transports.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use reqwest::{header, StatusCode};

use crate::error::DownloadError;

/// Stream of body chunks from an open transfer.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DownloadError>> + Send>>;

/// An accepted response, ready to be read.
pub struct OpenedStream {
    /// Offset the server actually honored. Equals the requested offset when
    /// the range was accepted; 0 when the server ignored the range and is
    /// sending the full body.
    pub start_offset: u64,
    pub stream: ByteStream,
}

/// Something that can open a (possibly ranged) transfer for a uri.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open `uri` for reading at `start_offset`. Implementations must treat
    /// non-success responses as errors.
    async fn open(&self, uri: &str, start_offset: u64) -> Result<OpenedStream, DownloadError>;
}

/// Default transport: HTTP(S) GET with a `Range: bytes=offset-` header and
/// a streamed response body.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(DownloadError::transport)?;
        Ok(Self { client })
    }

    /// Build from a preconfigured client (shared pools, proxies, etc.).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, uri: &str, start_offset: u64) -> Result<OpenedStream, DownloadError> {
        let mut request = self.client.get(uri);
        if start_offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", start_offset));
        }

        let response = request.send().await.map_err(DownloadError::transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Transport(format!(
                "GET {} returned HTTP {}",
                uri, status
            )));
        }

        // A 200 answer to a ranged request means the server is sending the
        // whole body from 0; the caller restarts its cursor accordingly.
        let honored = if start_offset > 0 && status != StatusCode::PARTIAL_CONTENT {
            0
        } else {
            start_offset
        };

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(DownloadError::transport))
            .boxed();

        Ok(OpenedStream {
            start_offset: honored,
            stream,
        })
    }
}
