//! Inbound live feed messages
//!
//! Payloads are JSON objects `{type, recordId, fulfillment}`. Both
//! `RECORD_UPDATE` and `REVISION_UPDATE` carry a fulfillment patch; any other
//! type is surfaced as [`FeedUpdate::Unrecognized`] so newer servers can add
//! message kinds without breaking older consoles.

use crate::error::{Error, Result};
use crate::record::{Fulfillment, FulfillmentPatch};
use serde::Deserialize;
use serde_json::Value;

pub const RECORD_UPDATE: &str = "RECORD_UPDATE";
pub const REVISION_UPDATE: &str = "REVISION_UPDATE";

/// A parsed live feed message
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    /// Fulfillment change on a pending record
    Record(FulfillmentPatch),
    /// Fulfillment change on a revision-tree item
    Revision(FulfillmentPatch),
    /// Any other `type`; ignored by the reconciler
    Unrecognized { kind: String },
}

impl FeedUpdate {
    /// Message type as sent on the wire
    pub fn kind(&self) -> &str {
        match self {
            FeedUpdate::Record(_) => RECORD_UPDATE,
            FeedUpdate::Revision(_) => REVISION_UPDATE,
            FeedUpdate::Unrecognized { kind } => kind,
        }
    }

    pub fn patch(&self) -> Option<&FulfillmentPatch> {
        match self {
            FeedUpdate::Record(p) | FeedUpdate::Revision(p) => Some(p),
            FeedUpdate::Unrecognized { .. } => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchBody {
    record_id: String,
    #[serde(default)]
    fulfillment: Option<Fulfillment>,
}

/// Parse one text frame
///
/// Errors only for invalid JSON or a recognised type with a malformed body.
pub fn parse_message(text: &str) -> Result<FeedUpdate> {
    let value: Value = serde_json::from_str(text)?;

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => {
            return Ok(FeedUpdate::Unrecognized {
                kind: "<missing>".to_string(),
            })
        }
    };

    let is_record = match kind.as_str() {
        RECORD_UPDATE => true,
        REVISION_UPDATE => false,
        _ => return Ok(FeedUpdate::Unrecognized { kind }),
    };

    let body: PatchBody = serde_json::from_value(value)
        .map_err(|e| Error::Decode(format!("{} body: {}", kind, e)))?;
    let patch = FulfillmentPatch {
        record_id: body.record_id,
        fulfillment: body.fulfillment,
    };

    Ok(if is_record {
        FeedUpdate::Record(patch)
    } else {
        FeedUpdate::Revision(patch)
    })
}
