//! Fulfillment session
//!
//! Wires the pieces together and is the single writer of the master store.
//! One task processes, one at a time and each to completion:
//! - actor resolution and bulk fetch results
//! - live feed updates, in receive order
//! - reload and shutdown requests
//!
//! Fetches run in their own tasks and check a liveness flag before
//! reporting back, so a fetch finishing after shutdown is a no-op.

use crate::buckets::{BucketSubscriber, PublishedBuckets};
use crate::client::FulfillClient;
use crate::credentials::CredentialProvider;
use crate::feed::{self, FeedConfig, FeedTransport, FeedUpdate, LiveFeedHandle};
use crate::reconciler::Reconciler;
use crate::record::PendingBatch;
use chrono::{DateTime, Utc};
use dss_common::events::{ConnectionState, DssEvent, EventBus};
use dss_common::time;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

/// Buffered feed updates before the reader applies backpressure
const UPDATE_QUEUE_DEPTH: usize = 256;

/// Snapshot of session health for the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStatus {
    pub actor_id: Option<String>,
    pub connection: ConnectionState,
    /// Records in the master store
    pub records_loaded: usize,
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// Set when the most recent bulk fetch failed
    pub last_fetch_error: Option<String>,
}

enum SessionEvent {
    ActorResolved {
        generation: u64,
        actor_id: Option<String>,
    },
    /// Profile lookup failed; the previous actor stays in effect
    ActorLookupFailed {
        generation: u64,
        error: String,
    },
    BulkLoaded {
        generation: u64,
        result: crate::error::Result<PendingBatch>,
    },
    Reload,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    buckets: BucketSubscriber,
    status_rx: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Subscribe to published bucket views
    pub fn buckets(&self) -> BucketSubscriber {
        self.buckets.clone()
    }

    pub fn latest(&self) -> Arc<PublishedBuckets> {
        self.buckets.latest()
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Re-resolve the actor and repeat the bulk fetch
    ///
    /// Returns false if the session has stopped.
    pub fn reload(&self) -> bool {
        self.events_tx.send(SessionEvent::Reload).is_ok()
    }

    /// Stop the live feed and clear the store
    ///
    /// Returns once teardown finished. Calling it again is harmless.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.events_tx.send(SessionEvent::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

pub struct Session<C> {
    client: Arc<FulfillClient<C>>,
    reconciler: Reconciler,
    feed: Option<LiveFeedHandle>,
    event_bus: EventBus,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    status_tx: watch::Sender<SessionStatus>,
    alive: Arc<AtomicBool>,
    fetch_generation: u64,
}

impl<C: CredentialProvider> Session<C> {
    /// Start the session: live feed, actor resolution and bulk fetch
    pub fn spawn<T: FeedTransport>(
        client: Arc<FulfillClient<C>>,
        feed_config: FeedConfig,
        transport: T,
        event_bus: EventBus,
    ) -> SessionHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());

        let reconciler = Reconciler::new(event_bus.clone());
        let buckets = reconciler.subscribe();

        let feed = feed::spawn(
            feed_config,
            transport,
            client.credentials().clone(),
            updates_tx,
            event_bus.clone(),
        );
        let feed_state = feed.subscribe_state();

        let session = Session {
            client,
            reconciler,
            feed: Some(feed),
            event_bus,
            events_tx: events_tx.clone(),
            status_tx,
            alive: Arc::new(AtomicBool::new(true)),
            fetch_generation: 0,
        };
        tokio::spawn(session.run(events_rx, updates_rx, feed_state));

        SessionHandle {
            events_tx,
            buckets,
            status_rx,
        }
    }

    async fn run(
        mut self,
        mut events_rx: mpsc::UnboundedReceiver<SessionEvent>,
        mut updates_rx: mpsc::Receiver<FeedUpdate>,
        mut feed_state: watch::Receiver<ConnectionState>,
    ) {
        info!("Fulfillment session started");
        self.start_fetch();

        loop {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(SessionEvent::Shutdown(ack)) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(event) => self.on_event(event),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(update) = updates_rx.recv() => {
                    self.reconciler.on_update(update);
                    self.refresh_store_status();
                }
                Ok(()) = feed_state.changed() => {
                    let connection = *feed_state.borrow_and_update();
                    self.status_tx.send_modify(|s| s.connection = connection);
                }
            }
        }

        info!("Fulfillment session stopped");
    }

    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ActorResolved {
                generation,
                actor_id,
            } => {
                if generation != self.fetch_generation {
                    return;
                }
                self.event_bus.emit_lossy(DssEvent::ActorResolved {
                    actor_id: actor_id.clone(),
                    timestamp: time::now(),
                });
                self.status_tx
                    .send_modify(|s| s.actor_id = actor_id.clone());
                self.reconciler.set_actor(actor_id);
            }
            SessionEvent::ActorLookupFailed { generation, error } => {
                if generation != self.fetch_generation {
                    return;
                }
                warn!(
                    error = %error,
                    actor = ?self.reconciler.actor(),
                    "Could not resolve actor identity; keeping current actor"
                );
            }
            SessionEvent::BulkLoaded { generation, result } => {
                if generation != self.fetch_generation {
                    return;
                }
                match result {
                    Ok(batch) => {
                        self.reconciler.initialize(batch);
                        self.status_tx.send_modify(|s| {
                            s.last_fetch_at = Some(time::now());
                            s.last_fetch_error = None;
                        });
                        self.refresh_store_status();
                    }
                    Err(e) => {
                        error!(error = %e, "Bulk fetch failed");
                        let message = e.to_string();
                        self.event_bus.emit_lossy(DssEvent::BulkFetchFailed {
                            error: message.clone(),
                            timestamp: time::now(),
                        });
                        self.status_tx.send_modify(|s| {
                            s.last_fetch_at = Some(time::now());
                            s.last_fetch_error = Some(message);
                        });
                    }
                }
            }
            SessionEvent::Reload => {
                info!("Reloading pending records");
                self.start_fetch();
            }
            SessionEvent::Shutdown(_) => {}
        }
    }

    /// Resolve the actor, then bulk fetch, in a background task
    fn start_fetch(&mut self) {
        self.fetch_generation += 1;
        let generation = self.fetch_generation;
        let client = self.client.clone();
        let alive = self.alive.clone();
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            let resolved = match client.fetch_actor().await {
                Ok(profile) => SessionEvent::ActorResolved {
                    generation,
                    actor_id: profile.actor_id().map(str::to_string),
                },
                Err(e) => SessionEvent::ActorLookupFailed {
                    generation,
                    error: e.to_string(),
                },
            };
            if !alive.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(resolved);

            let result = client.fetch_pending().await;
            if !alive.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(SessionEvent::BulkLoaded { generation, result });
        });
    }

    fn refresh_store_status(&self) {
        let loaded = self.reconciler.store().len();
        self.status_tx.send_if_modified(|s| {
            let changed = s.records_loaded != loaded;
            s.records_loaded = loaded;
            changed
        });
    }

    async fn shutdown(&mut self) {
        info!("Shutting down fulfillment session");
        self.alive.store(false, Ordering::SeqCst);
        if let Some(feed) = self.feed.take() {
            feed.shutdown().await;
        }
        self.reconciler.clear();
        self.status_tx.send_modify(|s| {
            s.connection = ConnectionState::Disconnected;
            s.records_loaded = 0;
        });
    }
}
