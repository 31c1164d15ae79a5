//! Plain payload records shared by Graph API responses.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ErrorContainer;

/// Cursor pair of a paginated response.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Cursors {
    pub before: String,
    pub after: String,
}

/// Pagination block embedded in list responses.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Paging {
    pub cursors: Cursors,
    pub next: String,
}

impl Paging {
    /// Full URL of the next page, if the server reported one.
    pub fn next_url(&self) -> Option<&str> {
        if self.next.is_empty() {
            None
        } else {
            Some(&self.next)
        }
    }

    pub fn has_next(&self) -> bool {
        self.next_url().is_some()
    }
}

/// `{"data": [...], "paging": {...}}` list response.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub paging: Paging,
}

/// Standard time range used by insights endpoints.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct TimeRange {
    pub since: String,
    pub until: String,
}

/// Action/value pair of an insights response.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct KeyValue {
    pub action_type: String,
    /// Numbers arrive either as JSON numbers or as strings.
    pub value: serde_json::Value,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Default)]
#[serde(default)]
pub struct Id {
    pub id: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct MetadataField {
    pub name: String,
    pub description: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub field_type: String,
}

/// Object metadata returned with `?metadata=1`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Metadata {
    #[serde(rename = "type")]
    pub object_type: String,
    pub connections: HashMap<String, String>,
    pub fields: Vec<MetadataField>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct MetadataContainer {
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Response of an update call.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct MinimalResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub updated_time: Option<String>,
    #[serde(flatten)]
    pub error: ErrorContainer,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Summary {
    pub total_count: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct SummaryContainer {
    pub summary: Summary,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AsyncSession {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct AsyncBatchCreateResponse {
    #[serde(default)]
    pub async_sessions: Vec<AsyncSession>,
}

/// Status of one asynchronous batch operation.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AsyncBatch {
    pub result: String,
    pub status: String,
    pub error_code: i64,
    pub exception: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AdObjectId {
    pub ad_object_type: String,
    pub source_id: String,
    pub copied_id: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct CopiedAdsetAsyncBatchResult {
    pub copied_adset_id: String,
    pub ad_object_ids: Vec<AdObjectId>,
}
