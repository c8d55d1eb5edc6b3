//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse},
};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("sonic-client-core/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based HTTP client implementation
///
/// A single pooled `Client` serves every request. Reqwest only knows
/// timeouts fixed at construction, while the request executor grows them on
/// every retry and scales them with the resume offset, so both are enforced
/// here per request:
///
/// - the response head must arrive within `connect + read`
/// - every body chunk must arrive within `read` of the previous one
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<(reqwest::Response, Duration)> {
        let connect = request.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let read = request.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT);

        let mut req = self
            .client
            .request(Self::convert_method(request.method), &request.url);
        for (key, value) in request.headers {
            req = req.header(key, value);
        }
        if let Some(body) = request.body {
            req = req.body(body);
        }

        let response = core_async::time::timeout(connect + read, req.send())
            .await
            .map_err(|_| {
                BridgeError::Timeout(format!("no response within {} ms", (connect + read).as_millis()))
            })?
            .map_err(map_reqwest_error)?;
        Ok((response, read))
    }

    fn collect_headers(response: &reqwest::Response) -> HashMap<String, String> {
        response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect()
    }
}

/// Classify a reqwest failure so the executor can tell retryable I/O apart.
fn map_reqwest_error(e: reqwest::Error) -> BridgeError {
    if e.is_timeout() {
        BridgeError::Timeout(e.to_string())
    } else if e.is_connect() {
        BridgeError::Connection(e.to_string())
    } else if e.is_builder() || e.is_redirect() {
        BridgeError::OperationFailed(e.to_string())
    } else {
        warn!(error = %e, "HTTP transfer failed");
        BridgeError::Io(std::io::Error::other(e))
    }
}

/// Fail a body read that stalls for longer than `read` between chunks.
fn with_read_timeout<S, E>(body: S, read: Duration) -> BoxStream<'static, io::Result<Bytes>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    stream::unfold(Some(body), move |body| async move {
        let mut body = body?;
        match core_async::time::timeout(read, body.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(e))) => Some((Err(io::Error::other(e)), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data for {} ms", read.as_millis()),
                )),
                None,
            )),
        }
    })
    .boxed()
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let (response, read) = self.send(request).await?;
        let status = response.status().as_u16();
        let headers = Self::collect_headers(&response);
        let body = core_async::time::timeout(read, response.bytes())
            .await
            .map_err(|_| BridgeError::Timeout(format!("body not read within {} ms", read.as_millis())))?
            .map_err(map_reqwest_error)?;

        debug!(status, size = body.len(), "HTTP response received");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn execute_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse> {
        let (response, read) = self.send(request).await?;
        let status = response.status().as_u16();
        let headers = Self::collect_headers(&response);
        let content_length = response.content_length();

        debug!(status, ?content_length, "HTTP stream opened");

        let stream = with_read_timeout(response.bytes_stream().boxed(), read);
        let reader = tokio_util::io::StreamReader::new(stream);

        Ok(HttpStreamResponse {
            status,
            headers,
            content_length,
            body: Box::new(reader),
        })
    }
}
