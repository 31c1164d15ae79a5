//! Batch request envelopes and their doubly-encoded responses.
//!
//! A batch sub-request carries its parameters as a form-encoded string in the
//! `body` field. Each sub-response comes back as `{"code": .., "body": ".."}`
//! where `body` is itself a JSON document serialized into a string.

use anyhow::{Context, Result};
use serde::de::{self, DeserializeOwned};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Form parameters of a request, kept sorted by key.
///
/// A key may carry several values; they are encoded in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params(BTreeMap<String, Vec<String>>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any existing values for `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), vec![value.into()]);
        self
    }

    /// Appends a value to `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Returns the first value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Encodes the parameters as `application/x-www-form-urlencoded`.
    pub fn encode(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer.extend_pairs(self.iter());
        serializer.finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.add(k, v);
        }
        params
    }
}

/// One sub-request of a batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchRequest {
    pub method: String,
    /// Path relative to the versioned API root, e.g. `act_1/adsets`.
    pub relative_url: String,
    /// Optional name other sub-requests can reference for dependencies.
    pub name: Option<String>,
    pub body: Params,
}

impl BatchRequest {
    pub fn new(method: impl Into<String>, relative_url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            relative_url: relative_url.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_body(mut self, body: Params) -> Self {
        self.body = body;
        self
    }

    /// Serializes a list of sub-requests into the value of the `batch` form field.
    pub fn encode_list(requests: &[BatchRequest]) -> Result<String> {
        serde_json::to_string(requests).context("Failed to encode batch requests")
    }
}

impl Serialize for BatchRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.name.is_some() { 4 } else { 3 };
        let mut state = serializer.serialize_struct("BatchRequest", len)?;
        state.serialize_field("method", &self.method)?;
        state.serialize_field("relative_url", &self.relative_url)?;
        if let Some(name) = &self.name {
            state.serialize_field("name", name)?;
        }
        state.serialize_field("body", &self.body.encode())?;
        state.end()
    }
}

/// One sub-response of a batch, with its body already parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    pub code: u16,
    /// Parsed body; its shape depends on the sub-request.
    pub body: serde_json::Value,
}

impl BatchResponse {
    /// Decodes the body into the shape the caller expects.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.body).context("Failed to decode batch response body")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

#[derive(Deserialize)]
struct RawBatchResponse {
    code: u16,
    body: String,
}

impl<'de> Deserialize<'de> for BatchResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawBatchResponse::deserialize(deserializer)?;
        let body = serde_json::from_str(&raw.body).map_err(de::Error::custom)?;

        Ok(BatchResponse {
            code: raw.code,
            body,
        })
    }
}

/// Decodes a batch response array.
///
/// Entries are `None` for sub-requests the server did not run, e.g. when a
/// dependency failed or the batch timed out.
pub fn decode_batch(payload: &[u8]) -> Result<Vec<Option<BatchResponse>>> {
    serde_json::from_slice(payload).context("Failed to decode batch response")
}

/// One operation of an asynchronous batch.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct AsyncBatchOperation {
    pub method: String,
    pub relative_url: String,
    pub name: String,
    pub body: String,
}

impl From<&BatchRequest> for AsyncBatchOperation {
    fn from(request: &BatchRequest) -> Self {
        Self {
            method: request.method.clone(),
            relative_url: request.relative_url.clone(),
            name: request.name.clone().unwrap_or_default(),
            body: request.body.encode(),
        }
    }
}

/// Envelope for creating an asynchronous batch job.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct AsyncBatchCreateRequest {
    #[serde(rename = "asyncbatch")]
    pub async_batch: Vec<AsyncBatchOperation>,
}

impl FromIterator<AsyncBatchOperation> for AsyncBatchCreateRequest {
    fn from_iter<I: IntoIterator<Item = AsyncBatchOperation>>(iter: I) -> Self {
        Self {
            async_batch: iter.into_iter().collect(),
        }
    }
}
