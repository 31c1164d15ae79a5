//! Resilient transport and wire codec for the Graph API.
//!
//! - [`http`] - `Transport` abstraction, the retrying `RetryTransport` decorator
//!   and `GraphClient`
//! - [`batch`] - Batch request envelopes and doubly-encoded batch responses
//! - [`error`] - Provider error payloads and their classification
//! - [`types`] - Plain payload records (paging, ids, async batch results)
//! - [`config`] - Access token, API root and HTTP client setup

pub mod batch;
pub mod config;
pub mod error;
pub mod http;
pub mod types;

pub use batch::{BatchRequest, BatchResponse, Params};
pub use error::{ErrorContainer, GraphError, is_not_found};
pub use http::{GraphClient, HttpTransport, RequestContext, RetryTransport, Transport};
