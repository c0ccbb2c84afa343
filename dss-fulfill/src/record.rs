//! Record model
//!
//! A record is a product/datasheet submission under review. Only the fields
//! that drive classification are typed; everything else the server sends
//! (`productIdentifier`, `manName`, `clientName`, ...) rides along untouched
//! in [`Record::payload`].

use dss_common::time::WireTimestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Origin of a record, assigned when it enters the master store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocType {
    /// Pending product record from the bulk `records` collection
    Record,
    /// Revision-tree item from the `needsReview` collection
    RevTree,
}

impl DocType {
    /// Wire name, as used in API paths
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Record => "record",
            DocType::RevTree => "revTree",
        }
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocType {
    type Err = dss_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record" => Ok(DocType::Record),
            "revTree" => Ok(DocType::RevTree),
            other => Err(dss_common::Error::InvalidInput(format!(
                "Unknown doc type: {}",
                other
            ))),
        }
    }
}

/// Server-side processing status
///
/// Values outside `inprocess`/`active` are preserved but never classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordStatus {
    InProcess,
    Active,
    Other(String),
}

impl From<String> for RecordStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "inprocess" => RecordStatus::InProcess,
            "active" => RecordStatus::Active,
            _ => RecordStatus::Other(s),
        }
    }
}

impl From<RecordStatus> for String {
    fn from(status: RecordStatus) -> Self {
        match status {
            RecordStatus::InProcess => "inprocess".to_string(),
            RecordStatus::Active => "active".to_string(),
            RecordStatus::Other(s) => s,
        }
    }
}

/// Fulfillment workflow status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FulfillmentStatus {
    Queued,
    Other(String),
}

impl From<String> for FulfillmentStatus {
    fn from(s: String) -> Self {
        if s == "queued" {
            FulfillmentStatus::Queued
        } else {
            FulfillmentStatus::Other(s)
        }
    }
}

impl From<FulfillmentStatus> for String {
    fn from(status: FulfillmentStatus) -> Self {
        match status {
            FulfillmentStatus::Queued => "queued".to_string(),
            FulfillmentStatus::Other(s) => s,
        }
    }
}

/// Workflow state attached to a record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fulfillment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FulfillmentStatus>,

    /// Actor who queued the record; only meaningful while queued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_by: Option<String>,

    /// Used for queue ordering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<WireTimestamp>,

    /// Any further workflow fields, passed through unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Fulfillment {
    /// Queued fulfillment owned by `actor`
    pub fn queued(actor: impl Into<String>, queued_at: Option<WireTimestamp>) -> Self {
        Self {
            status: Some(FulfillmentStatus::Queued),
            queued_by: Some(actor.into()),
            queued_at,
            extra: Map::new(),
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.status, Some(FulfillmentStatus::Queued))
    }
}

/// A product/datasheet submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Opaque unique id
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordStatus>,

    /// Content hash; present once the datasheet has been processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<DocType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment: Option<Fulfillment>,

    /// Descriptive attributes, opaque to this crate
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Record {
    /// Bare record with only an id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: None,
            file_hash: None,
            doc_type: None,
            fulfillment: None,
            payload: Map::new(),
        }
    }

    /// True when a non-empty content hash is present
    pub fn has_file_hash(&self) -> bool {
        self.file_hash.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// True when queued by exactly `actor`
    pub fn is_queued_by(&self, actor: &str) -> bool {
        self.fulfillment
            .as_ref()
            .is_some_and(|f| f.is_queued() && f.queued_by.as_deref() == Some(actor))
    }

    /// `productIdentifier` payload field, if it is a string
    pub fn product_identifier(&self) -> Option<&str> {
        self.payload.get("productIdentifier").and_then(Value::as_str)
    }
}

/// Replacement of one record's `fulfillment`
#[derive(Debug, Clone, PartialEq)]
pub struct FulfillmentPatch {
    pub record_id: String,
    /// New value; `None` clears the field
    pub fulfillment: Option<Fulfillment>,
}

/// Result of the bulk fetch, one list per source collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingBatch {
    /// Pending records (tagged `record` on ingestion)
    pub records: Vec<Record>,
    /// Review items (tagged `revTree` on ingestion)
    pub needs_review: Vec<Record>,
}

/// Decode a list of raw JSON records, skipping malformed entries
///
/// Malformed entries (missing `_id`, wrong field types) are logged and
/// excluded; the rest of the batch is kept.
pub fn decode_records(values: Vec<Value>, collection: &str) -> Vec<Record> {
    let total = values.len();
    let records: Vec<Record> = values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<Record>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(collection, index, error = %e, "Skipping malformed record");
                None
            }
        })
        .collect();

    if records.len() < total {
        warn!(
            collection,
            skipped = total - records.len(),
            "Excluded malformed records from bulk fetch"
        );
    }
    records
}
