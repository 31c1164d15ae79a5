//! HTTP transport abstraction, retry decorator and Graph API client.
//!
//! # Structure
//!
//! - `backoff` - Exponential backoff policy with jitter and an elapsed-time budget
//! - `context` - Per-request cancellation token and deadline
//! - `retry` - `RetryTransport`, the retrying `Transport` decorator
//! - `client` - `GraphClient`, JSON/form/batch calls on top of a `Transport`

mod backoff;
mod client;
mod context;
mod retry;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reqwest::{Client, Request, Response};

pub use backoff::{
    BackoffConfig, DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_ELAPSED_TIME, ExponentialBackoff,
};
pub use client::{ApiStatusError, GraphClient};
pub use context::{ContextError, ContextErrorKind, RequestContext};
pub use retry::{RetryTransport, ServerError};

/// Sends a single HTTP request and returns the server's response.
///
/// Any response the server produced is `Ok`, whatever its status; `Err` is
/// reserved for failures to obtain a response at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, ctx: &RequestContext, request: Request) -> Result<Response>;
}

/// Transport backed by a `reqwest::Client`.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    // Cancellation aborts the in-flight request by dropping this future.
    async fn round_trip(&self, _ctx: &RequestContext, request: Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();

        self.client
            .execute(request)
            .await
            .with_context(|| format!("Failed to send {} {}", method, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    #[tokio::test]
    async fn test_http_transport_returns_any_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v19.0/me")
            .with_status(404)
            .with_body("missing")
            .create_async()
            .await;

        let transport = HttpTransport::default();
        let request = Request::new(
            Method::GET,
            format!("{}/v19.0/me", server.url()).parse().unwrap(),
        );

        let response = transport
            .round_trip(&RequestContext::new(), request)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status().as_u16(), 404);
        assert_eq!(response.text().await.unwrap(), "missing");
    }

    #[tokio::test]
    async fn test_http_transport_connection_error() {
        // Nothing listens on port 9 (discard) on test hosts.
        let request = Request::new(Method::GET, "http://127.0.0.1:9/".parse().unwrap());
        let result = HttpTransport::default()
            .round_trip(&RequestContext::new(), request)
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to send GET http://127.0.0.1:9/"));
    }
}
