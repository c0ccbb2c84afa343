//! Update reconciler
//!
//! Owns the master store. Every mutation (bulk load, feed patch, actor
//! change) is followed by a full reclassification and one atomic publish of
//! all five bucket views:
//!
//! `(master store, actor) -> BucketViews`

use crate::buckets::{BucketPublisher, BucketSubscriber, PublishedBuckets};
use crate::classifier::classify;
use crate::feed::message::FeedUpdate;
use crate::record::PendingBatch;
use crate::store::{MasterStore, PatchOutcome};
use dss_common::events::{DssEvent, EventBus};
use dss_common::time;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `on_update` did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Patch applied; views republished at this revision
    Applied { revision: u64 },
    /// Patch target not loaded; nothing published
    UnknownRecord,
    /// Unrecognized message type; nothing published
    Ignored,
}

pub struct Reconciler {
    store: MasterStore,
    actor: Option<String>,
    publisher: BucketPublisher,
    event_bus: EventBus,
}

impl Reconciler {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            store: MasterStore::new(),
            actor: None,
            publisher: BucketPublisher::new(),
            event_bus,
        }
    }

    pub fn subscribe(&self) -> BucketSubscriber {
        self.publisher.subscribe()
    }

    pub fn store(&self) -> &MasterStore {
        &self.store
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// Replace the master store with a bulk fetch result and publish
    pub fn initialize(&mut self, batch: PendingBatch) -> Arc<PublishedBuckets> {
        let records = batch.records.len();
        let needs_review = batch.needs_review.len();
        let loaded = self.store.initialize(batch);
        info!(loaded, records, needs_review, "Master store initialized");

        self.event_bus.emit_lossy(DssEvent::BulkFetchCompleted {
            records,
            needs_review,
            timestamp: time::now(),
        });
        self.republish()
    }

    /// Change the actor and reclassify
    ///
    /// Returns None when the actor is unchanged.
    pub fn set_actor(&mut self, actor: Option<String>) -> Option<Arc<PublishedBuckets>> {
        if self.actor == actor {
            return None;
        }
        info!(old = ?self.actor, new = ?actor, "Actor changed");
        self.actor = actor;
        Some(self.republish())
    }

    /// Apply one live feed message
    pub fn on_update(&mut self, update: FeedUpdate) -> UpdateOutcome {
        let kind = update.kind().to_string();
        let patch = match update {
            FeedUpdate::Record(patch) | FeedUpdate::Revision(patch) => patch,
            FeedUpdate::Unrecognized { kind } => {
                debug!(kind = %kind, "Unhandled update type");
                return UpdateOutcome::Ignored;
            }
        };

        let record_id = patch.record_id.clone();
        match self.store.apply_patch(patch) {
            PatchOutcome::Applied => {
                let published = self.republish();
                debug!(
                    kind = %kind,
                    record_id = %record_id,
                    revision = published.revision,
                    "Applied fulfillment patch"
                );
                UpdateOutcome::Applied {
                    revision: published.revision,
                }
            }
            PatchOutcome::NotFound => {
                warn!(kind = %kind, record_id = %record_id, "Patch target not loaded; ignoring");
                UpdateOutcome::UnknownRecord
            }
        }
    }

    /// Drop all records and publish empty views
    pub fn clear(&mut self) {
        self.store.clear();
        self.republish();
    }

    fn republish(&mut self) -> Arc<PublishedBuckets> {
        if self.actor.is_none() && !self.store.is_empty() {
            warn!("Actor identity unavailable; bucket views are empty");
        }

        let views = classify(self.store.records(), self.actor.as_deref());
        let published = self.publisher.publish(views, self.actor.clone());

        let counts = published.counts;
        self.event_bus.emit_lossy(DssEvent::BucketsPublished {
            revision: published.revision,
            queued: counts.queued,
            needs_review: counts.needs_review,
            tier1: counts.tier1,
            tier2: counts.tier2,
            tier3: counts.tier3,
            timestamp: published.published_at,
        });
        published
    }
}
