//! Event system for the DSS fulfillment services
//!
//! Provides the shared event definitions and the EventBus used to fan out
//! engine activity (bucket publishes, live feed connection changes, bulk
//! fetch results) to SSE clients and diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Live feed connection state
///
/// Transitions: `Disconnected -> Connecting -> Open -> {Closing -> Disconnected | Disconnected}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket and no handshake in progress
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Socket open, receiving updates
    Open,
    /// Local close requested, waiting for the socket to finish
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

/// DSS event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DssEvent {
    /// A new set of bucket views was published
    ///
    /// Carries counts only; consumers fetch the records they render.
    BucketsPublished {
        /// Monotonic publish revision
        revision: u64,
        /// Records queued by the current actor
        queued: usize,
        /// Records awaiting review
        needs_review: usize,
        /// Tier 1 pending records
        tier1: usize,
        /// Tier 2 pending records
        tier2: usize,
        /// Tier 3 pending records
        tier3: usize,
        /// When the views were published
        timestamp: DateTime<Utc>,
    },

    /// Live feed connection changed state
    ConnectionStateChanged {
        old_state: ConnectionState,
        new_state: ConnectionState,
        timestamp: DateTime<Utc>,
    },

    /// Bulk fetch finished and the master store was replaced
    BulkFetchCompleted {
        /// Pending records loaded
        records: usize,
        /// Review items loaded
        needs_review: usize,
        timestamp: DateTime<Utc>,
    },

    /// Bulk fetch failed; views keep their previous contents
    BulkFetchFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Current actor identity resolved (None when unavailable)
    ActorResolved {
        actor_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An inbound feed message was dropped without touching the store
    FeedMessageDropped {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The bearer credential changed since the connection was opened
    CredentialRotated { timestamp: DateTime<Utc> },
}

impl DssEvent {
    /// Get event type as string for filtering and SSE event names
    pub fn event_type(&self) -> &'static str {
        match self {
            DssEvent::BucketsPublished { .. } => "BucketsPublished",
            DssEvent::ConnectionStateChanged { .. } => "ConnectionStateChanged",
            DssEvent::BulkFetchCompleted { .. } => "BulkFetchCompleted",
            DssEvent::BulkFetchFailed { .. } => "BulkFetchFailed",
            DssEvent::ActorResolved { .. } => "ActorResolved",
            DssEvent::FeedMessageDropped { .. } => "FeedMessageDropped",
            DssEvent::CredentialRotated { .. } => "CredentialRotated",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Uses tokio::broadcast internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use dss_common::events::{ConnectionState, DssEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(DssEvent::ConnectionStateChanged {
///     old_state: ConnectionState::Disconnected,
///     new_state: ConnectionState::Connecting,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "ConnectionStateChanged");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DssEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before slow subscribers lag
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<DssEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DssEvent) -> Result<usize, broadcast::error::SendError<DssEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DssEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_change(old_state: ConnectionState, new_state: ConnectionState) -> DssEvent {
        DssEvent::ConnectionStateChanged {
            old_state,
            new_state,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit_without_subscribers_errors() {
        let bus = EventBus::new(10);
        assert!(bus
            .emit(state_change(ConnectionState::Disconnected, ConnectionState::Connecting))
            .is_err());
    }

    #[test]
    fn test_eventbus_multiple_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let delivered = bus
            .emit(state_change(ConnectionState::Connecting, ConnectionState::Open))
            .expect("emit should succeed");
        assert_eq!(delivered, 2);

        assert_eq!(rx1.try_recv().unwrap().event_type(), "ConnectionStateChanged");
        assert_eq!(rx2.try_recv().unwrap().event_type(), "ConnectionStateChanged");
    }

    #[test]
    fn test_eventbus_emit_lossy_on_full_channel() {
        let bus = EventBus::new(2);
        let _rx = bus.subscribe();

        for _ in 0..10 {
            bus.emit_lossy(DssEvent::CredentialRotated { timestamp: Utc::now() });
        }

        assert_eq!(bus.capacity(), 2);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = DssEvent::BucketsPublished {
            revision: 3,
            queued: 1,
            needs_review: 0,
            tier1: 2,
            tier2: 0,
            tier3: 5,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BucketsPublished");
        assert_eq!(json["revision"], 3);
        assert_eq!(json["tier3"], 5);

        let change = serde_json::to_value(state_change(
            ConnectionState::Open,
            ConnectionState::Closing,
        ))
        .unwrap();
        assert_eq!(change["old_state"], "open");
        assert_eq!(change["new_state"], "closing");
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }
}
