//! # Request Executor
//!
//! Runs one logical request with retry, growing timeouts and cancellation.
//!
//! ## Retry Loop
//!
//! ```text
//!          ┌────────────────────────────────────────────────┐
//!          ▼                                                │
//!   ┌─────────────┐  ok    ┌──────────┐                     │
//!   │  attempt n  ├───────>│ response │                     │
//!   └──────┬──────┘        └──────────┘                     │
//!          │ transient I/O error                            │
//!          ▼                                                │
//!   n == max? ──yes──> NetworkExhausted                     │
//!          │ no                                             │
//!          ▼                                                │
//!   progress "retrying, attempt n of max-1"                 │
//!   connect ×1.3, read ×1.5, sleep(backoff) ────────────────┘
//! ```
//!
//! The cancellation token is raced against every attempt and every back-off
//! sleep. Once it fires the executor returns [`RemoteError::Cancelled`] and
//! sends nothing further. Non-transient errors (bad URL, local failures) are
//! returned on first occurrence.

use crate::error::{RemoteError, Result};
use crate::request::{RequestSpec, ServerEndpoint};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, HttpStreamResponse};
use core_async::sync::CancellationToken;
use core_runtime::config::NetworkConfig;
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent};
use core_runtime::logging::redact_url;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Receives human-readable progress while a request is retried.
pub trait ProgressSink: Send + Sync {
    fn update_progress(&self, message: &str);
}

/// State of one logical request across its retries. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestAttempt {
    /// 1-based number of the attempt in flight.
    pub attempt: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub cancelled: bool,
}

impl RequestAttempt {
    fn first(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            attempt: 1,
            connect_timeout,
            read_timeout,
            cancelled: false,
        }
    }
}

pub struct RequestExecutor {
    http: Arc<dyn HttpClient>,
    server: ServerEndpoint,
    network: NetworkConfig,
    events: Option<EventBus>,
}

impl RequestExecutor {
    pub fn new(http: Arc<dyn HttpClient>, server: ServerEndpoint, network: NetworkConfig) -> Self {
        Self {
            http,
            server,
            network,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn server(&self) -> &ServerEndpoint {
        &self.server
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Execute and buffer the whole body.
    #[instrument(skip_all, fields(endpoint = %spec.endpoint))]
    pub async fn execute(
        &self,
        spec: &RequestSpec,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<HttpResponse> {
        let http = Arc::clone(&self.http);
        self.run(spec, cancel, progress, move |request| {
            let http = Arc::clone(&http);
            async move { http.execute(request).await }
        })
        .await
    }

    /// Execute and hand back the body as a stream. Retries cover establishing
    /// the response only; reading the body is the caller's business.
    #[instrument(skip_all, fields(endpoint = %spec.endpoint, offset = spec.range_offset))]
    pub async fn execute_stream(
        &self,
        spec: &RequestSpec,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<HttpStreamResponse> {
        let http = Arc::clone(&self.http);
        self.run(spec, cancel, progress, move |request| {
            let http = Arc::clone(&http);
            async move { http.execute_stream(request).await }
        })
        .await
    }

    fn build_request(&self, spec: &RequestSpec, attempt: &RequestAttempt) -> HttpRequest {
        let mut request = HttpRequest::get(self.server.url_for(spec))
            .connect_timeout(attempt.connect_timeout)
            .read_timeout(attempt.read_timeout);
        if let Some(range) = spec.range_header() {
            request = request.header("Range", range);
        }
        request
    }

    async fn run<T, F, Fut>(
        &self,
        spec: &RequestSpec,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressSink>,
        send: F,
    ) -> Result<T>
    where
        F: Fn(HttpRequest) -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let policy = &self.network.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = RequestAttempt::first(
            self.network.connect_timeout,
            spec.read_timeout.unwrap_or(self.network.read_timeout),
        );

        loop {
            if cancel.is_cancelled() {
                attempt.cancelled = true;
                return Err(RemoteError::Cancelled);
            }

            let request = self.build_request(spec, &attempt);
            debug!(
                attempt = attempt.attempt,
                connect_ms = attempt.connect_timeout.as_millis() as u64,
                read_ms = attempt.read_timeout.as_millis() as u64,
                url = %redact_url(&request.url),
                "Sending request"
            );

            let outcome = core_async::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = send(request) => Some(result),
            };

            let error = match outcome {
                None => {
                    attempt.cancelled = true;
                    debug!(attempt = attempt.attempt, "Request cancelled in flight");
                    return Err(RemoteError::Cancelled);
                }
                Some(Ok(response)) => return Ok(response),
                Some(Err(e)) if e.is_transient() => e,
                Some(Err(e)) => return Err(RemoteError::Bridge(e)),
            };

            if attempt.attempt >= max_attempts {
                return Err(self.exhausted(spec, attempt.attempt, error));
            }

            let message = format!("retrying, attempt {} of {}", attempt.attempt, max_attempts - 1);
            warn!(attempt = attempt.attempt, error = %error, "{}", message);
            if let Some(progress) = progress {
                progress.update_progress(&message);
            }
            self.emit(NetworkEvent::Retrying {
                endpoint: spec.endpoint.clone(),
                attempt: attempt.attempt,
                max_retries: max_attempts - 1,
                message,
            });

            let (connect, read) = policy.grow(attempt.connect_timeout, attempt.read_timeout);
            attempt.connect_timeout = connect;
            attempt.read_timeout = read;
            attempt.attempt += 1;

            let interrupted = core_async::select! {
                biased;
                _ = cancel.cancelled() => true,
                _ = core_async::sleep(policy.backoff) => false,
            };
            if interrupted {
                attempt.cancelled = true;
                return Err(RemoteError::Cancelled);
            }
        }
    }

    fn exhausted(&self, spec: &RequestSpec, attempts: u32, source: BridgeError) -> RemoteError {
        warn!(attempts, error = %source, "Giving up on request");
        self.emit(NetworkEvent::Exhausted {
            endpoint: spec.endpoint.clone(),
            attempts,
        });
        RemoteError::NetworkExhausted {
            endpoint: spec.endpoint.clone(),
            attempts,
            source,
        }
    }

    fn emit(&self, event: NetworkEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine.
            let _ = events.emit(CoreEvent::Network(event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::http::RetryPolicy;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Plays back scripted outcomes and records every request.
    struct ScriptedHttp {
        outcomes: Mutex<VecDeque<BridgeResult<HttpResponse>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedHttp {
        fn new(outcomes: Vec<BridgeResult<HttpResponse>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedHttp {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.seen.lock().push(request);
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(BridgeError::Connection("script exhausted".into())))
        }

        async fn execute_stream(&self, _request: HttpRequest) -> BridgeResult<HttpStreamResponse> {
            Err(BridgeError::NotAvailable("stream".into()))
        }
    }

    #[derive(Default)]
    struct Messages(Mutex<Vec<String>>);

    impl ProgressSink for Messages {
        fn update_progress(&self, message: &str) {
            self.0.lock().push(message.to_string());
        }
    }

    fn executor(http: Arc<ScriptedHttp>) -> RequestExecutor {
        let network = NetworkConfig {
            retry: RetryPolicy::default().with_backoff(Duration::ZERO),
            ..NetworkConfig::default()
        };
        let server = ServerEndpoint::new("http://srv", "u", "p", "1.8.0", "test");
        RequestExecutor::new(http, server, network)
    }

    fn ok() -> BridgeResult<HttpResponse> {
        Ok(HttpResponse::new(200, "ok"))
    }

    fn reset() -> BridgeResult<HttpResponse> {
        Err(BridgeError::Connection("connection reset".into()))
    }

    #[tokio::test]
    async fn timeouts_compound_across_retries() {
        let http = ScriptedHttp::new(vec![reset(), reset(), ok()]);
        let executor = executor(http.clone());
        let cancel = CancellationToken::new();

        executor
            .execute(&RequestSpec::new("ping"), &cancel, None)
            .await
            .unwrap();

        let seen = http.seen.lock();
        let reads: Vec<u128> = seen
            .iter()
            .map(|r| r.read_timeout.unwrap().as_millis())
            .collect();
        let connects: Vec<u128> = seen
            .iter()
            .map(|r| r.connect_timeout.unwrap().as_millis())
            .collect();
        assert_eq!(reads, vec![10_000, 15_000, 22_500]);
        assert_eq!(connects[0], 10_000);
        assert!((connects[2] as i128 - 16_900).abs() <= 1);
    }

    #[tokio::test]
    async fn progress_messages_count_retries() {
        let http = ScriptedHttp::new(vec![reset(), reset(), ok()]);
        let executor = executor(http);
        let messages = Messages::default();

        executor
            .execute(&RequestSpec::new("ping"), &CancellationToken::new(), Some(&messages))
            .await
            .unwrap();

        assert_eq!(
            *messages.0.lock(),
            vec!["retrying, attempt 1 of 4", "retrying, attempt 2 of 4"]
        );
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let http = ScriptedHttp::new(vec![Err(BridgeError::OperationFailed("bad url".into()))]);
        let executor = executor(http.clone());

        let err = executor
            .execute(&RequestSpec::new("ping"), &CancellationToken::new(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteError::Bridge(_)));
        assert_eq!(http.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_sends_nothing() {
        let http = ScriptedHttp::new(vec![ok()]);
        let executor = executor(http.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor
            .execute(&RequestSpec::new("ping"), &cancel, None)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(http.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn range_header_follows_offset() {
        let http = ScriptedHttp::new(vec![ok(), ok()]);
        let executor = executor(http.clone());
        let cancel = CancellationToken::new();

        executor.execute(&RequestSpec::new("stream"), &cancel, None).await.unwrap();
        executor
            .execute(&RequestSpec::new("stream").range_from(4096), &cancel, None)
            .await
            .unwrap();

        let seen = http.seen.lock();
        assert_eq!(seen[0].header_value("range"), None);
        assert_eq!(seen[1].header_value("Range"), Some("bytes=4096-"));
    }
}
