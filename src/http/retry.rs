//! Retrying transport decorator.
//!
//! Network errors and 5xx responses are retried with exponential backoff
//! until the elapsed-time budget runs out or the request context ends.
//! Everything else, 4xx included, is returned to the caller on first sight.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Request, Response, StatusCode};
use std::fmt;

use super::backoff::BackoffConfig;
use super::context::{ContextError, RequestContext};
use super::{HttpTransport, Transport};

/// A 5xx response, kept as an error after its body was drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub status: StatusCode,
    /// Response body, when it could be read.
    pub body: Option<String>,
    /// 1-based attempt that produced this response.
    pub attempt: usize,
}

impl ServerError {
    /// Consumes the response, reading its body to the end.
    async fn from_response(response: Response, attempt: usize) -> Self {
        let status = response.status();
        let body = response.text().await.ok();
        Self {
            status,
            body,
            attempt,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Some(body) => write!(
                f,
                "unexpected status {} from graph api, body: {}, attempt {}",
                self.status, body, self.attempt
            ),
            None => write!(
                f,
                "unexpected status {} from graph api, attempt {}",
                self.status, self.attempt
            ),
        }
    }
}

impl std::error::Error for ServerError {}

/// Transport that retries transient failures of the wrapped transport.
///
/// Holds no per-call state: every `round_trip` starts its own backoff, so one
/// instance can serve concurrent requests.
#[derive(Debug, Clone)]
pub struct RetryTransport<T = HttpTransport> {
    next: T,
    backoff: BackoffConfig,
}

impl Default for RetryTransport<HttpTransport> {
    fn default() -> Self {
        Self::new(HttpTransport::default())
    }
}

impl<T: Transport> RetryTransport<T> {
    pub fn new(next: T) -> Self {
        Self {
            next,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn inner(&self) -> &T {
        &self.next
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Runs one attempt; 5xx responses come back as [`ServerError`].
    async fn attempt(
        &self,
        ctx: &RequestContext,
        request: Request,
        attempt: usize,
    ) -> Result<Response> {
        let response = self.next.round_trip(ctx, request).await?;
        if response.status().as_u16() >= 500 {
            return Err(ServerError::from_response(response, attempt).await.into());
        }
        Ok(response)
    }

    /// Single attempt for a request that cannot be replayed. Still classifies
    /// 5xx and still yields to the context.
    async fn send_once(&self, ctx: &RequestContext, request: Request) -> Result<Response> {
        tokio::select! {
            biased;
            kind = ctx.done() => Err(ContextError {
                kind,
                attempts: 1,
                last_error: None,
            }
            .into()),
            result = self.attempt(ctx, request, 1) => result,
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryTransport<T> {
    #[tracing::instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
    async fn round_trip(&self, ctx: &RequestContext, request: Request) -> Result<Response> {
        let mut backoff = self.backoff.start();
        let mut attempts = 0;
        let mut last_error: Option<String> = None;

        loop {
            if let Some(kind) = ctx.status() {
                return Err(ContextError {
                    kind,
                    attempts,
                    last_error,
                }
                .into());
            }

            let Some(attempt_request) = request.try_clone() else {
                debug!("Request body cannot be replayed, sending it once");
                return self.send_once(ctx, request).await;
            };

            attempts += 1;
            let result = tokio::select! {
                biased;
                kind = ctx.done() => {
                    return Err(ContextError { kind, attempts, last_error }.into());
                }
                result = self.attempt(ctx, attempt_request, attempts) => result,
            };

            let failure = match result {
                Ok(response) => {
                    debug!("Attempt {} returned {}", attempts, response.status());
                    return Ok(response);
                }
                Err(e) => e,
            };

            let Some(delay) = backoff.next_backoff() else {
                warn!(
                    "Giving up after {} attempt(s) over {:?}: {:#}",
                    attempts,
                    backoff.elapsed(),
                    failure
                );
                return Err(failure);
            };

            warn!(
                "Attempt {} failed ({:#}), retrying in {:?}...",
                attempts, failure, delay
            );
            last_error = Some(format!("{:#}", failure));

            tokio::select! {
                biased;
                kind = ctx.done() => {
                    return Err(ContextError { kind, attempts, last_error }.into());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::backoff::DEFAULT_MAX_ELAPSED_TIME;
    use crate::http::context::ContextErrorKind;
    use crate::http::MockTransport;
    use mockall::Sequence;
    use reqwest::Method;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn request() -> Request {
        Request::new(
            Method::GET,
            "https://graph.example.com/v19.0/act_1/campaigns"
                .parse()
                .unwrap(),
        )
    }

    fn response(status: u16, body: &'static str) -> Response {
        Response::from(http::Response::builder().status(status).body(body).unwrap())
    }

    /// A transport that never answers.
    struct PendingTransport;

    #[async_trait]
    impl Transport for PendingTransport {
        async fn round_trip(&self, _ctx: &RequestContext, _request: Request) -> Result<Response> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_single_call() {
        let mut next = MockTransport::new();
        next.expect_round_trip()
            .times(1)
            .returning(|_, _| Ok(response(200, r#"{"id":"1"}"#)));

        let transport = RetryTransport::new(next);
        let started = Instant::now();
        let response = transport
            .round_trip(&RequestContext::new(), request())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), r#"{"id":"1"}"#);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let mut next = MockTransport::new();
        next.expect_round_trip()
            .times(1)
            .returning(|_, _| Ok(response(400, r#"{"error":{"code":100}}"#)));

        let transport = RetryTransport::new(next);
        let response = transport
            .round_trip(&RequestContext::new(), request())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.text().await.unwrap(), r#"{"error":{"code":100}}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_then_success() {
        let mut next = MockTransport::new();
        let mut seq = Sequence::new();
        next.expect_round_trip()
            .times(3)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(response(503, "Service Unavailable")));
        next.expect_round_trip()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(response(200, "ok")));

        let transport = RetryTransport::new(next);
        let response = transport
            .round_trip(&RequestContext::new(), request())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_are_retried() {
        let mut next = MockTransport::new();
        let mut seq = Sequence::new();
        next.expect_round_trip()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(anyhow::anyhow!("connection reset by peer")));
        next.expect_round_trip()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(response(200, "ok")));

        let transport = RetryTransport::new(next);
        let result = transport.round_trip(&RequestContext::new(), request()).await;
        assert_eq!(result.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_elapsed_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut next = MockTransport::new();
        next.expect_round_trip().returning(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("connection refused"))
        });

        let transport = RetryTransport::new(next);
        let started = Instant::now();
        let err = transport
            .round_trip(&RequestContext::new(), request())
            .await
            .unwrap_err();

        assert!(started.elapsed() > DEFAULT_MAX_ELAPSED_TIME);
        assert!(err.to_string().contains("connection refused"));
        assert!(err.downcast_ref::<ContextError>().is_none());

        let total = calls.load(Ordering::SeqCst);
        assert!(total > 5);

        // The call is over; nothing else reaches the delegate.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), total);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_details_on_exhaustion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut next = MockTransport::new();
        next.expect_round_trip().returning(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(response(502, "Bad Gateway"))
        });

        let backoff = BackoffConfig {
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Duration::from_secs(1),
            ..Default::default()
        };
        let transport = RetryTransport::new(next).with_backoff(backoff);
        let err = transport
            .round_trip(&RequestContext::new(), request())
            .await
            .unwrap_err();

        let server_error = err.downcast_ref::<ServerError>().unwrap();
        assert_eq!(server_error.status, StatusCode::BAD_GATEWAY);
        assert_eq!(server_error.body.as_deref(), Some("Bad Gateway"));
        assert_eq!(server_error.attempt, calls.load(Ordering::SeqCst));
        assert!(err.to_string().contains("unexpected status 502 Bad Gateway"));
        assert!(err.to_string().contains("body: Bad Gateway"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let token = CancellationToken::new();
        let ctx = RequestContext::with_token(token.clone());

        let mut next = MockTransport::new();
        next.expect_round_trip().times(1).returning(move |_, _| {
            token.cancel();
            Ok(response(500, "boom"))
        });

        let transport = RetryTransport::new(next);
        let started = Instant::now();
        let err = transport.round_trip(&ctx, request()).await.unwrap_err();

        assert_eq!(started.elapsed(), Duration::ZERO);
        let ctx_err = err.downcast_ref::<ContextError>().unwrap();
        assert!(ctx_err.is_cancelled());
        assert_eq!(ctx_err.attempts, 1);
        assert!(ctx_err.last_error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let mut next = MockTransport::new();
        next.expect_round_trip().times(0);

        let ctx = RequestContext::new();
        ctx.cancel();

        let err = RetryTransport::new(next)
            .round_trip(&ctx, request())
            .await
            .unwrap_err();
        let ctx_err = err.downcast_ref::<ContextError>().unwrap();
        assert_eq!(ctx_err.attempts, 0);
        assert!(ctx_err.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_in_flight_attempt() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = RetryTransport::new(PendingTransport)
            .round_trip(&ctx, request())
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(err.downcast_ref::<ContextError>().unwrap().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let mut next = MockTransport::new();
        next.expect_round_trip()
            .returning(|_, _| Err(anyhow::anyhow!("dns error: failed to lookup address")));

        let ctx = RequestContext::new().with_timeout(Duration::from_secs(30));
        let started = Instant::now();
        let err = RetryTransport::new(next)
            .round_trip(&ctx, request())
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));
        let ctx_err = err.downcast_ref::<ContextError>().unwrap();
        assert_eq!(ctx_err.kind, ContextErrorKind::DeadlineExceeded);
        assert!(ctx_err.attempts >= 2);
        assert!(ctx_err.last_error.as_deref().unwrap().contains("dns error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_499_is_not_retried() {
        let mut next = MockTransport::new();
        next.expect_round_trip()
            .times(1)
            .returning(|_, _| Ok(response(499, "client closed request")));

        let response = RetryTransport::new(next)
            .round_trip(&RequestContext::new(), request())
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 499);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_500_is_retried() {
        let mut next = MockTransport::new();
        let mut seq = Sequence::new();
        next.expect_round_trip()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(response(500, "Internal Server Error")));
        next.expect_round_trip()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(response(200, "ok")));

        let started = Instant::now();
        let response = RetryTransport::new(next)
            .round_trip(&RequestContext::new(), request())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(started.elapsed() > Duration::ZERO);
    }

    fn streaming_request() -> Request {
        let mut request = Request::new(
            Method::POST,
            "https://graph.example.com/v19.0/act_1/adsets"
                .parse()
                .unwrap(),
        );
        *request.body_mut() = Some(reqwest::Body::wrap(http_body_util::Full::new(
            &b"name=Sale"[..],
        )));
        request
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreplayable_body_server_error_is_reported() {
        let mut next = MockTransport::new();
        next.expect_round_trip()
            .times(1)
            .returning(|_, _| Ok(response(503, "Service Unavailable")));

        let request = streaming_request();
        assert!(request.try_clone().is_none());

        let err = RetryTransport::new(next)
            .round_trip(&RequestContext::new(), request)
            .await
            .unwrap_err();
        let server_error = err.downcast_ref::<ServerError>().unwrap();
        assert_eq!(server_error.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(server_error.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreplayable_body_success() {
        let mut next = MockTransport::new();
        next.expect_round_trip()
            .times(1)
            .returning(|_, _| Ok(response(200, r#"{"id":"6001"}"#)));

        let response = RetryTransport::new(next)
            .round_trip(&RequestContext::new(), streaming_request())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_unreplayable_attempt() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = RetryTransport::new(PendingTransport)
            .round_trip(&ctx, streaming_request())
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
        let ctx_err = err.downcast_ref::<ContextError>().unwrap();
        assert!(ctx_err.is_cancelled());
        assert_eq!(ctx_err.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_keep_separate_state() {
        let flaky_calls = Arc::new(AtomicUsize::new(0));
        let flaky_clone = Arc::clone(&flaky_calls);

        let mut next = MockTransport::new();
        next.expect_round_trip()
            .withf(|_, request| request.url().path() == "/v19.0/flaky")
            .times(3)
            .returning(move |_, _| {
                if flaky_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(response(503, "Service Unavailable"))
                } else {
                    Ok(response(200, "flaky"))
                }
            });
        next.expect_round_trip()
            .withf(|_, request| request.url().path() == "/v19.0/healthy")
            .times(1)
            .returning(|_, _| Ok(response(200, "healthy")));

        let transport = Arc::new(RetryTransport::new(next));
        let call = |path: &'static str| {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                let url = format!("https://graph.example.com/v19.0/{}", path);
                let request = Request::new(Method::GET, url.parse().unwrap());
                let started = Instant::now();
                let response = transport
                    .round_trip(&RequestContext::new(), request)
                    .await
                    .unwrap();
                let elapsed = started.elapsed();
                (response.text().await.unwrap(), elapsed)
            })
        };

        let flaky = call("flaky");
        let healthy = call("healthy");
        let (healthy_body, healthy_elapsed) = healthy.await.unwrap();
        let (flaky_body, flaky_elapsed) = flaky.await.unwrap();

        assert_eq!(healthy_body, "healthy");
        assert_eq!(healthy_elapsed, Duration::ZERO);
        assert_eq!(flaky_body, "flaky");
        assert!(flaky_elapsed > Duration::ZERO);
        assert_eq!(flaky_calls.load(Ordering::SeqCst), 3);
    }
}
