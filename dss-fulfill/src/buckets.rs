//! Bucket views
//!
//! Read-only projections of the master store. A publish replaces the whole
//! set of five buckets in one `watch` send, so a reader holding a snapshot
//! always sees every bucket from the same classification pass.

use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// One of the mutually exclusive record groupings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Queued by the current actor
    Queued,
    /// Revision-tree items awaiting review
    NeedsReview,
    /// In process, no content hash yet
    Tier1,
    /// In process, content hash present
    Tier2,
    /// Active, content hash present
    Tier3,
}

impl Bucket {
    pub const ALL: [Bucket; 5] = [
        Bucket::Queued,
        Bucket::NeedsReview,
        Bucket::Tier1,
        Bucket::Tier2,
        Bucket::Tier3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Queued => "queued",
            Bucket::NeedsReview => "needs_review",
            Bucket::Tier1 => "tier1",
            Bucket::Tier2 => "tier2",
            Bucket::Tier3 => "tier3",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Bucket {
    type Err = dss_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bucket::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| dss_common::Error::NotFound(format!("bucket {}", s)))
    }
}

/// The five derived collections
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BucketViews {
    pub queued: Vec<Record>,
    pub needs_review: Vec<Record>,
    pub tier1: Vec<Record>,
    pub tier2: Vec<Record>,
    pub tier3: Vec<Record>,
}

impl BucketViews {
    pub fn get(&self, bucket: Bucket) -> &[Record] {
        match bucket {
            Bucket::Queued => &self.queued,
            Bucket::NeedsReview => &self.needs_review,
            Bucket::Tier1 => &self.tier1,
            Bucket::Tier2 => &self.tier2,
            Bucket::Tier3 => &self.tier3,
        }
    }

    pub(crate) fn get_mut(&mut self, bucket: Bucket) -> &mut Vec<Record> {
        match bucket {
            Bucket::Queued => &mut self.queued,
            Bucket::NeedsReview => &mut self.needs_review,
            Bucket::Tier1 => &mut self.tier1,
            Bucket::Tier2 => &mut self.tier2,
            Bucket::Tier3 => &mut self.tier3,
        }
    }

    pub fn counts(&self) -> BucketCounts {
        BucketCounts {
            queued: self.queued.len(),
            needs_review: self.needs_review.len(),
            tier1: self.tier1.len(),
            tier2: self.tier2.len(),
            tier3: self.tier3.len(),
        }
    }

    /// Bucket containing `record_id`, if any
    pub fn bucket_of(&self, record_id: &str) -> Option<Bucket> {
        Bucket::ALL
            .into_iter()
            .find(|&b| self.get(b).iter().any(|r| r.id == record_id))
    }
}

/// Per-bucket sizes plus the pending total shown in the console header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    pub queued: usize,
    pub needs_review: usize,
    pub tier1: usize,
    pub tier2: usize,
    pub tier3: usize,
}

impl BucketCounts {
    /// tier1 + tier2 + tier3
    pub fn pending(&self) -> usize {
        self.tier1 + self.tier2 + self.tier3
    }
}

/// One published snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PublishedBuckets {
    /// Monotonic; 0 is the empty view published at startup
    pub revision: u64,
    pub published_at: DateTime<Utc>,
    /// Actor the views were classified for
    pub actor: Option<String>,
    pub counts: BucketCounts,
    pub views: BucketViews,
}

impl PublishedBuckets {
    fn empty() -> Self {
        Self {
            revision: 0,
            published_at: Utc::now(),
            actor: None,
            counts: BucketCounts::default(),
            views: BucketViews::default(),
        }
    }
}

/// Write side of the bucket views; owned by the reconciler
pub struct BucketPublisher {
    tx: watch::Sender<Arc<PublishedBuckets>>,
}

impl BucketPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(PublishedBuckets::empty()));
        Self { tx }
    }

    /// Replace all five buckets at once
    pub fn publish(&self, views: BucketViews, actor: Option<String>) -> Arc<PublishedBuckets> {
        let revision = self.tx.borrow().revision + 1;
        let snapshot = Arc::new(PublishedBuckets {
            revision,
            published_at: Utc::now(),
            actor,
            counts: views.counts(),
            views,
        });
        self.tx.send_replace(snapshot.clone());
        snapshot
    }

    pub fn latest(&self) -> Arc<PublishedBuckets> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> BucketSubscriber {
        BucketSubscriber {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for BucketPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the bucket views
#[derive(Clone)]
pub struct BucketSubscriber {
    rx: watch::Receiver<Arc<PublishedBuckets>>,
}

impl BucketSubscriber {
    /// Latest published snapshot
    pub fn latest(&self) -> Arc<PublishedBuckets> {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish
    ///
    /// Returns None once the publisher is gone.
    pub async fn changed(&mut self) -> Option<Arc<PublishedBuckets>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Narrow the subscription to a single bucket
    pub fn bucket(self, bucket: Bucket) -> BucketWatch {
        BucketWatch { inner: self, bucket }
    }
}

/// Subscription to one bucket of the published views
pub struct BucketWatch {
    inner: BucketSubscriber,
    bucket: Bucket,
}

impl BucketWatch {
    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    pub fn current(&self) -> Vec<Record> {
        self.inner.latest().views.get(self.bucket).to_vec()
    }

    /// Wait for the next publish and return this bucket's records
    pub async fn changed(&mut self) -> Option<Vec<Record>> {
        let snapshot = self.inner.changed().await?;
        Some(snapshot.views.get(self.bucket).to_vec())
    }
}
