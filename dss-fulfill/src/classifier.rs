//! Record classifier
//!
//! Pure mapping from the master store contents and the current actor to the
//! five bucket views. Precedence:
//! 1. queued by the actor -> Queued (queued by anyone else -> no bucket)
//! 2. `docType == revTree` -> NeedsReview
//! 3. `(status, fileHash)`: inprocess/none -> Tier1, inprocess/hash -> Tier2,
//!    active/hash -> Tier3, anything else -> no bucket
//!
//! Without an actor every bucket is empty.

use crate::buckets::{Bucket, BucketViews};
use crate::record::{DocType, Record, RecordStatus};

/// Bucket for a single record, or None when it is not shown anywhere
pub fn assign(record: &Record, actor: &str) -> Option<Bucket> {
    if let Some(fulfillment) = &record.fulfillment {
        if fulfillment.is_queued() {
            return if fulfillment.queued_by.as_deref() == Some(actor) {
                Some(Bucket::Queued)
            } else {
                None
            };
        }
    }

    if record.doc_type == Some(DocType::RevTree) {
        return Some(Bucket::NeedsReview);
    }

    match (&record.status, record.has_file_hash()) {
        (Some(RecordStatus::InProcess), false) => Some(Bucket::Tier1),
        (Some(RecordStatus::InProcess), true) => Some(Bucket::Tier2),
        (Some(RecordStatus::Active), true) => Some(Bucket::Tier3),
        _ => None,
    }
}

/// Partition `records` into bucket views for `actor`
///
/// Buckets keep input order, except Queued which is ordered by `queuedAt`
/// (oldest first, undated last; ties keep input order).
pub fn classify(records: &[Record], actor: Option<&str>) -> BucketViews {
    let mut views = BucketViews::default();
    let Some(actor) = actor else {
        return views;
    };

    for record in records {
        if let Some(bucket) = assign(record, actor) {
            views.get_mut(bucket).push(record.clone());
        }
    }

    views.queued.sort_by_key(|record| {
        let queued_at = record
            .fulfillment
            .as_ref()
            .and_then(|f| f.queued_at.as_ref())
            .and_then(|ts| ts.to_datetime());
        (queued_at.is_none(), queued_at)
    });

    views
}
