//! Provider error payloads and their classification.
//!
//! The Graph API reports failures as a top-level `{"error": {...}}` object.
//! Classification goes through the provider's numeric `code`/`error_subcode`
//! pair rather than the HTTP status, which is frequently just 400.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;

/// Error code the Graph API uses for invalid parameters.
pub const CODE_INVALID_PARAMETER: u64 = 100;

/// Subcode paired with [`CODE_INVALID_PARAMETER`] when the object does not exist.
pub const SUBCODE_OBJECT_NOT_FOUND: u64 = 33;

/// An error reported by the Graph API.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct GraphError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: u64,
    pub error_subcode: u64,
    pub fbtrace_id: String,
    pub is_transient: bool,
    pub error_user_title: String,
    pub error_user_msg: String,
    /// Opaque, endpoint specific details.
    pub error_data: serde_json::Value,
}

impl GraphError {
    /// Returns true if the error denotes a missing object.
    pub fn is_not_found(&self) -> bool {
        self.code == CODE_INVALID_PARAMETER && self.error_subcode == SUBCODE_OBJECT_NOT_FOUND
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.error_user_msg.is_empty() {
            return write!(f, "{}", self.error_user_msg);
        }

        write!(
            f,
            "graph api: type='{}' message='{}' error_user_title='{}'",
            self.error_type, self.message, self.error_user_title
        )
    }
}

impl StdError for GraphError {}

/// Holder for the optional `error` field of a response payload.
///
/// Meant to be flattened into response structs with `#[serde(flatten)]`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct ErrorContainer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GraphError>,
}

impl ErrorContainer {
    /// Returns the embedded error, if any.
    pub fn error(&self) -> Option<&GraphError> {
        self.error.as_ref()
    }

    /// Converts the container into a `Result`, yielding the embedded error as `Err`.
    pub fn into_result(self) -> Result<(), GraphError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Returns whether `err` is a [`GraphError`] for a missing object.
///
/// Any other error type, or no error at all, yields false.
pub fn is_not_found(err: Option<&(dyn StdError + 'static)>) -> bool {
    err.and_then(|e| e.downcast_ref::<GraphError>())
        .is_some_and(GraphError::is_not_found)
}

/// Like [`is_not_found`], for errors carried in an `anyhow::Error`.
///
/// Looks through any context layers added on top of the original error.
pub fn is_not_found_anyhow(err: &anyhow::Error) -> bool {
    err.downcast_ref::<GraphError>()
        .is_some_and(GraphError::is_not_found)
}
