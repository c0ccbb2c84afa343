//! # DSS Fulfillment Engine (dss-fulfill)
//!
//! Keeps a live, partitioned view of pending fulfillment records for the
//! console.
//!
//! **Purpose:** Bulk-load pending records, keep them current from the live
//! feed, and publish five mutually exclusive bucket views (queued, needs
//! review, tier 1-3) for the current actor.
//!
//! **Architecture:** One session task owns the master store and applies
//! bulk loads and feed patches in order; every change republishes all
//! buckets through a `watch` channel. A supervisor task owns the WebSocket
//! and its reconnect and credential-freshness timers.

pub mod api;
pub mod buckets;
pub mod classifier;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod feed;
pub mod reconciler;
pub mod record;
pub mod session;
pub mod store;

pub use buckets::{Bucket, BucketSubscriber, BucketViews, PublishedBuckets};
pub use error::{Error, Result};
pub use session::{Session, SessionHandle, SessionStatus};
