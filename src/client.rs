//! HTTP client: HEAD probing and ranged GET streaming.
//!
//! One `reqwest::Client` is shared by every worker of an engine, so
//! connection pooling and HTTP/2 multiplexing happen under the hood:
//! idle connections are evicted after 60 s, redirects are capped, and h2
//! is negotiated via ALPN whenever the server offers it over TLS.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header;
use tracing::debug;

use crate::config::{DownloadConfig, MAX_REDIRECTS, POOL_IDLE_TIMEOUT};
use crate::error::{DownloadError, Result};
use crate::url::Url;

/// What a HEAD request learned about the resource.
///
/// Immutable once built. `content_length == 0` means the size is unknown.
#[derive(Debug, Clone, Default)]
pub struct ResourceInfo {
    pub status: u16,
    pub content_length: u64,
    pub accepts_ranges: bool,
    pub content_type: String,
    /// Filename from `Content-Disposition`, when the server names one.
    pub filename: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Every response header, keys lowercased.
    pub headers: HashMap<String, String>,
}

/// HTTP operations used by the engine and its workers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .read_timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .map_err(DownloadError::from_http)?;
        Ok(Self { inner })
    }

    /// Probe the resource with a HEAD request.
    pub async fn head(&self, url: &Url) -> Result<ResourceInfo> {
        let response = self
            .inner
            .head(url.as_inner().clone())
            .send()
            .await
            .map_err(DownloadError::from_http)?;

        let status = response.status().as_u16();
        let headers = lowercase_headers(response.headers());

        if !response.status().is_success() {
            return Err(DownloadError::from_status(status));
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let accepts_ranges = headers
            .get("accept-ranges")
            .is_some_and(|v| v.contains("bytes"));
        let content_type = headers.get("content-type").cloned().unwrap_or_default();
        let filename = headers
            .get("content-disposition")
            .and_then(|v| parse_content_disposition(v));

        debug!(
            url = %url,
            status,
            content_length,
            accepts_ranges,
            "HEAD complete"
        );

        Ok(ResourceInfo {
            status,
            content_length,
            accepts_ranges,
            content_type,
            filename,
            etag: headers.get("etag").cloned(),
            last_modified: headers.get("last-modified").cloned(),
            headers,
        })
    }

    /// Open a (possibly ranged) GET and return the body stream.
    ///
    /// `length == 0` requests everything from `offset` onward; with
    /// `offset == 0` as well, no `Range` header is sent at all so servers
    /// without range support behave normally.
    pub async fn get_range(&self, url: &Url, offset: u64, length: u64) -> Result<BodyStream> {
        let mut request = self.inner.get(url.as_inner().clone());
        if length > 0 {
            request = request.header(
                header::RANGE,
                format!("bytes={}-{}", offset, offset + length - 1),
            );
        } else if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={offset}-"));
        }

        let response = request.send().await.map_err(DownloadError::from_http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::from_status(status.as_u16()));
        }

        Ok(BodyStream {
            partial: status == reqwest::StatusCode::PARTIAL_CONTENT,
            response,
        })
    }
}

/// A streaming response body.
pub struct BodyStream {
    response: reqwest::Response,
    partial: bool,
}

impl BodyStream {
    /// Whether the server honored the range request (206).
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Next chunk of the body; `None` at end of stream.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.response.chunk().await.map_err(DownloadError::from_http)
    }
}

fn lowercase_headers(headers: &header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Pull a filename out of a `Content-Disposition` value like
/// `attachment; filename="archive.zip"`.
fn parse_content_disposition(value: &str) -> Option<String> {
    let rest = &value[value.find("filename=")? + "filename=".len()..];
    let rest = rest.split(';').next().unwrap_or(rest).trim();
    let name = rest.trim_matches(|c| c == '"' || c == '\'');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
