//! Graph API client issuing JSON, form and batch calls through a `Transport`.

use anyhow::{Context, Result};
use log::debug;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;

use super::context::RequestContext;
use super::retry::RetryTransport;
use super::Transport;
use crate::batch::{AsyncBatchCreateRequest, BatchRequest, BatchResponse, Params};
use crate::error::ErrorContainer;
use crate::types::AsyncBatchCreateResponse;

/// A non-2xx response whose body carried no Graph API error object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiStatusError {
    pub status: StatusCode,
    pub body: String,
}

impl fmt::Display for ApiStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}: {}", self.status, self.body)
    }
}

impl std::error::Error for ApiStatusError {}

/// Client for a versioned Graph API root.
pub struct GraphClient<T: Transport = RetryTransport> {
    transport: T,
    base_url: String,
    version: String,
}

impl<T: Transport> GraphClient<T> {
    /// Creates a client for `base_url` (e.g. `https://graph.facebook.com`) and
    /// `version` (e.g. `v19.0`).
    pub fn new(transport: T, base_url: &str, version: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            version: version.trim_matches('/').to_string(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Resolves `path` against the versioned root. Absolute URLs, such as
    /// `paging.next`, are used unchanged.
    pub fn url(&self, path: &str) -> Result<Url> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}/{}",
                self.base_url,
                self.version,
                path.trim_start_matches('/')
            )
        };
        Url::parse(&raw).with_context(|| format!("Invalid Graph API URL: {}", raw))
    }

    /// Performs a GET request and deserializes the JSON response.
    #[tracing::instrument(skip(self, ctx, params))]
    pub async fn get_json<R: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        params: &Params,
    ) -> Result<R> {
        let mut url = self.url(path)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        debug!("GET JSON from {}...", url);

        self.send(ctx, Request::new(Method::GET, url)).await
    }

    /// Performs a form-encoded POST request and deserializes the JSON response.
    #[tracing::instrument(skip(self, ctx, params))]
    pub async fn post_form<R: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        params: &Params,
    ) -> Result<R> {
        let url = self.url(path)?;
        debug!("POST form to {}...", url);

        let mut request = Request::new(Method::POST, url);
        request.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        *request.body_mut() = Some(params.encode().into());

        self.send(ctx, request).await
    }

    /// Runs a synchronous batch.
    ///
    /// The returned list lines up with `requests`; see [`crate::batch::decode_batch`].
    #[tracing::instrument(skip(self, ctx, requests), fields(count = requests.len()))]
    pub async fn batch(
        &self,
        ctx: &RequestContext,
        requests: &[BatchRequest],
    ) -> Result<Vec<Option<BatchResponse>>> {
        let mut params = Params::new();
        params
            .set("batch", BatchRequest::encode_list(requests)?)
            .set("include_headers", "false");

        self.post_form(ctx, "", &params).await
    }

    /// Submits an asynchronous batch job to `path`, e.g. `act_1/async_batch_requests`.
    #[tracing::instrument(skip(self, ctx, request), fields(count = request.async_batch.len()))]
    pub async fn create_async_batch(
        &self,
        ctx: &RequestContext,
        path: &str,
        request: &AsyncBatchCreateRequest,
    ) -> Result<AsyncBatchCreateResponse> {
        let url = self.url(path)?;
        debug!("POST async batch to {}...", url);

        let body = serde_json::to_vec(request).context("Failed to encode async batch")?;
        let mut request = Request::new(Method::POST, url);
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(body.into());

        self.send(ctx, request).await
    }

    async fn send<R: DeserializeOwned>(&self, ctx: &RequestContext, request: Request) -> Result<R> {
        let response = self.transport.round_trip(ctx, request).await?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            return Err(decode_error(status, &body));
        }

        serde_json::from_slice(&body).context("Failed to parse JSON response")
    }
}

/// Maps a non-2xx body to a [`crate::error::GraphError`] when it carries one.
fn decode_error(status: StatusCode, body: &[u8]) -> anyhow::Error {
    match serde_json::from_slice::<ErrorContainer>(body).map(ErrorContainer::into_result) {
        Ok(Err(graph_error)) => {
            debug!("Graph API error (HTTP {}): {}", status, graph_error);
            graph_error.into()
        }
        _ => ApiStatusError {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        }
        .into(),
    }
}
