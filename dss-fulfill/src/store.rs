//! Master store
//!
//! The single authoritative collection of fetched records for the session.
//! Insertion order is preserved; patches mutate records in place.

use crate::record::{DocType, FulfillmentPatch, PendingBatch, Record};
use std::collections::HashMap;
use tracing::warn;

/// Result of applying a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Record found and its fulfillment replaced
    Applied,
    /// No record with that id is loaded; store unchanged
    NotFound,
}

/// Ordered, id-indexed record collection
#[derive(Debug, Default)]
pub struct MasterStore {
    records: Vec<Record>,
    /// record id -> position in `records`
    index: HashMap<String, usize>,
}

impl MasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole store with a bulk fetch result
    ///
    /// Pending records are tagged `record` and review items `revTree`
    /// unless they already carry a doc type. If an id appears more than
    /// once the first occurrence wins.
    pub fn initialize(&mut self, batch: PendingBatch) -> usize {
        self.clear();

        let tagged = batch
            .records
            .into_iter()
            .map(|r| (r, DocType::Record))
            .chain(batch.needs_review.into_iter().map(|r| (r, DocType::RevTree)));

        for (mut record, source) in tagged {
            if self.index.contains_key(&record.id) {
                warn!(record_id = %record.id, "Duplicate record id in bulk fetch; keeping first");
                continue;
            }
            if record.doc_type.is_none() {
                record.doc_type = Some(source);
            }
            self.index.insert(record.id.clone(), self.records.len());
            self.records.push(record);
        }

        self.records.len()
    }

    /// Replace the `fulfillment` of one record, leaving every other field alone
    pub fn apply_patch(&mut self, patch: FulfillmentPatch) -> PatchOutcome {
        match self.index.get(&patch.record_id) {
            Some(&position) => {
                self.records[position].fulfillment = patch.fulfillment;
                PatchOutcome::Applied
            }
            None => PatchOutcome::NotFound,
        }
    }

    /// Copy of the full ordered collection
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.clone()
    }

    /// Borrowed view of the ordered collection
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, record_id: &str) -> Option<&Record> {
        self.index.get(record_id).map(|&i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}
