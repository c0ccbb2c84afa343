//! Live feed connection supervisor
//!
//! One task owns the socket lifecycle and never awaits the network itself:
//! - connects with a just-in-time credential in the `token` query parameter
//! - forwards parsed messages to the session over an mpsc channel
//! - schedules a single debounced reconnect after any close or failure
//! - periodically checks whether the credential rotated and, if so, closes
//!   the connection so the reconnect picks up the new token
//!
//! Credential refresh and the handshake run in a cancellable attempt task
//! that reports back to the supervisor, so teardown is never stuck behind a
//! slow token endpoint or a stalled handshake.
//!
//! State is published on a `watch` channel and every transition is emitted
//! as [`DssEvent::ConnectionStateChanged`].

use super::message::{parse_message, FeedUpdate};
use super::task::CancellableTask;
use super::transport::{redacted, FeedFrame, FeedSocket, FeedTransport};
use crate::credentials::{CredentialProvider, DEFAULT_MIN_VALIDITY};
use dss_common::events::{ConnectionState, DssEvent, EventBus};
use dss_common::time;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_FRESHNESS_INTERVAL: Duration = Duration::from_secs(60);

/// How long teardown waits for the reader to close the socket
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Live feed endpoint, without the credential
    pub url: Url,
    pub reconnect_delay: Duration,
    pub freshness_interval: Duration,
    /// Minimum remaining credential lifetime requested at connect time
    pub min_validity: Duration,
}

impl FeedConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            freshness_interval: DEFAULT_FRESHNESS_INTERVAL,
            min_validity: DEFAULT_MIN_VALIDITY,
        }
    }

    /// Endpoint with `token` appended
    fn url_with_token(&self, token: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("token", token);
        url
    }
}

#[derive(Debug)]
enum Control {
    Connect,
    Dropped { generation: u64, reason: String },
    /// Freshness timer obtained a token valid for `min_validity`
    Fresh { token: String },
    Shutdown,
}

/// Progress of one connect attempt, reported by the attempt task
enum Attempt<S> {
    /// Credential obtained; handshake under way
    Handshaking { generation: u64 },
    Connected { generation: u64, token: String, socket: S },
    Failed { generation: u64 },
}

/// Handle to a running live feed
pub struct LiveFeedHandle {
    control_tx: mpsc::UnboundedSender<Control>,
    state_rx: watch::Receiver<ConnectionState>,
    join: Option<JoinHandle<()>>,
}

impl LiveFeedHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Tear down and wait for the supervisor to exit
    ///
    /// Cancels the freshness timer, then any pending reconnect or in-flight
    /// connect attempt, then closes the connection.
    pub async fn shutdown(mut self) {
        let _ = self.control_tx.send(Control::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for LiveFeedHandle {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Shutdown);
    }
}

/// Start the live feed supervisor
///
/// Parsed messages are delivered to `updates` in receive order.
pub fn spawn<T, C>(
    config: FeedConfig,
    transport: T,
    credentials: Arc<C>,
    updates: mpsc::Sender<FeedUpdate>,
    event_bus: EventBus,
) -> LiveFeedHandle
where
    T: FeedTransport,
    C: CredentialProvider,
{
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let supervisor = Supervisor {
        config,
        transport: Arc::new(transport),
        credentials,
        updates,
        event_bus,
        control_tx: control_tx.clone(),
        attempt_tx,
        state_tx,
        generation: 0,
        active_token: None,
        connection: None,
        connecting: None,
        reconnect: None,
        freshness: None,
    };
    let join = tokio::spawn(supervisor.run(control_rx, attempt_rx));

    LiveFeedHandle {
        control_tx,
        state_rx,
        join: Some(join),
    }
}

struct ActiveConnection {
    generation: u64,
    close_tx: Option<oneshot::Sender<()>>,
    reader: CancellableTask,
}

impl ActiveConnection {
    fn request_close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }
}

struct Supervisor<T: FeedTransport, C> {
    config: FeedConfig,
    transport: Arc<T>,
    credentials: Arc<C>,
    updates: mpsc::Sender<FeedUpdate>,
    event_bus: EventBus,
    control_tx: mpsc::UnboundedSender<Control>,
    attempt_tx: mpsc::UnboundedSender<Attempt<T::Socket>>,
    state_tx: watch::Sender<ConnectionState>,
    /// Bumped for every connect attempt; results and closes carry it
    generation: u64,
    active_token: Option<String>,
    connection: Option<ActiveConnection>,
    connecting: Option<CancellableTask>,
    reconnect: Option<CancellableTask>,
    freshness: Option<CancellableTask>,
}

impl<T: FeedTransport, C: CredentialProvider> Supervisor<T, C> {
    async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut attempt_rx: mpsc::UnboundedReceiver<Attempt<T::Socket>>,
    ) {
        info!(url = %redacted(&self.config.url), "Starting live feed");

        self.freshness = Some(self.spawn_freshness_timer());
        self.start_connect();

        loop {
            tokio::select! {
                biased;
                control = control_rx.recv() => match control {
                    Some(Control::Connect) => {
                        self.reconnect = None;
                        if self.connection.is_none() && self.connecting.is_none() {
                            self.start_connect();
                        }
                    }
                    Some(Control::Dropped { generation, reason }) => {
                        self.on_dropped(generation, reason);
                    }
                    Some(Control::Fresh { token }) => self.check_freshness(token),
                    Some(Control::Shutdown) | None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some(attempt) = attempt_rx.recv() => self.on_attempt(attempt),
            }
        }

        info!("Live feed stopped");
    }

    fn set_state(&self, new_state: ConnectionState) {
        let old_state = self.state_tx.send_replace(new_state);
        if old_state == new_state {
            return;
        }
        debug!(%old_state, %new_state, "Live feed state changed");
        self.event_bus.emit_lossy(DssEvent::ConnectionStateChanged {
            old_state,
            new_state,
            timestamp: time::now(),
        });
    }

    /// Refresh the credential off the supervisor loop and report the token
    fn spawn_freshness_timer(&self) -> CancellableTask {
        let tx = self.control_tx.clone();
        let credentials = self.credentials.clone();
        let min_validity = self.config.min_validity;
        CancellableTask::interval("feed-freshness", self.config.freshness_interval, move || {
            let tx = tx.clone();
            let credentials = credentials.clone();
            async move {
                match credentials.refresh(min_validity).await {
                    Ok(token) => tx.send(Control::Fresh { token }).is_ok(),
                    Err(e) => {
                        warn!(error = %e, "Credential refresh failed during freshness check");
                        !tx.is_closed()
                    }
                }
            }
        })
    }

    /// Run credential refresh and handshake as a cancellable attempt
    fn start_connect(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let credentials = self.credentials.clone();
        let transport = self.transport.clone();
        let config = self.config.clone();
        let tx = self.attempt_tx.clone();

        self.connecting = Some(CancellableTask::spawn("feed-connect", async move {
            let token = match credentials.refresh(config.min_validity).await {
                Ok(token) => token,
                Err(e) => {
                    warn!(error = %e, "No credential available; live feed connection deferred");
                    let _ = tx.send(Attempt::Failed { generation });
                    return;
                }
            };

            let _ = tx.send(Attempt::Handshaking { generation });
            let url = config.url_with_token(&token);
            let attempt = match transport.connect(&url).await {
                Ok(socket) => Attempt::Connected {
                    generation,
                    token,
                    socket,
                },
                Err(e) => {
                    warn!(error = %e, "Live feed connection failed");
                    Attempt::Failed { generation }
                }
            };
            let _ = tx.send(attempt);
        }));
    }

    fn on_attempt(&mut self, attempt: Attempt<T::Socket>) {
        match attempt {
            Attempt::Handshaking { generation } if generation == self.generation => {
                self.set_state(ConnectionState::Connecting);
            }
            Attempt::Connected {
                generation,
                token,
                socket,
            } if generation == self.generation && self.connecting.is_some() => {
                self.connecting = None;
                let (close_tx, close_rx) = oneshot::channel();
                let reader = CancellableTask::spawn(
                    "feed-reader",
                    read_loop(
                        socket,
                        generation,
                        close_rx,
                        self.updates.clone(),
                        self.control_tx.clone(),
                        self.event_bus.clone(),
                    ),
                );

                self.active_token = Some(token);
                self.connection = Some(ActiveConnection {
                    generation,
                    close_tx: Some(close_tx),
                    reader,
                });
                self.set_state(ConnectionState::Open);
                info!(generation, "Live feed connected");
            }
            Attempt::Failed { generation } if generation == self.generation => {
                self.connecting = None;
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
            _ => debug!("Ignoring result of superseded connect attempt"),
        }
    }

    fn on_dropped(&mut self, generation: u64, reason: String) {
        let current = self
            .connection
            .as_ref()
            .is_some_and(|conn| conn.generation == generation);
        if !current {
            debug!(generation, "Ignoring close of superseded connection");
            return;
        }

        self.connection = None;
        self.active_token = None;
        info!(generation, reason = %reason, "Live feed closed");
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    /// Schedule one reconnect, replacing any pending one
    fn schedule_reconnect(&mut self) {
        let delay = self.config.reconnect_delay;
        let tx = self.control_tx.clone();
        debug!(delay_ms = delay.as_millis() as u64, "Scheduling live feed reconnect");
        self.reconnect = Some(CancellableTask::delayed(
            "feed-reconnect",
            delay,
            async move {
                let _ = tx.send(Control::Connect);
            },
        ));
    }

    fn check_freshness(&mut self, token: String) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if self.active_token.as_deref() == Some(token.as_str()) {
            return;
        }

        info!(generation = connection.generation, "Credential rotated; closing live feed");
        self.event_bus.emit_lossy(DssEvent::CredentialRotated {
            timestamp: time::now(),
        });
        connection.request_close();
        self.set_state(ConnectionState::Closing);
    }

    async fn teardown(&mut self) {
        if let Some(mut freshness) = self.freshness.take() {
            freshness.cancel();
        }
        if let Some(mut reconnect) = self.reconnect.take() {
            reconnect.cancel();
        }
        if let Some(mut connecting) = self.connecting.take() {
            if connecting.cancel() {
                debug!("Abandoned in-flight connect attempt");
            }
        }
        if let Some(mut connection) = self.connection.take() {
            self.set_state(ConnectionState::Closing);
            connection.request_close();
            connection.reader.finish(CLOSE_GRACE).await;
        }
        self.active_token = None;
        self.set_state(ConnectionState::Disconnected);
    }
}

enum Step {
    Close,
    Frame(Option<crate::error::Result<FeedFrame>>),
}

async fn read_loop<S: FeedSocket>(
    mut socket: S,
    generation: u64,
    mut close_rx: oneshot::Receiver<()>,
    updates: mpsc::Sender<FeedUpdate>,
    control_tx: mpsc::UnboundedSender<Control>,
    event_bus: EventBus,
) {
    let reason = loop {
        let step = tokio::select! {
            biased;
            _ = &mut close_rx => Step::Close,
            frame = socket.next_frame() => Step::Frame(frame),
        };

        match step {
            Step::Close => {
                socket.close().await;
                break "closed locally".to_string();
            }
            Step::Frame(None) => break "stream ended".to_string(),
            Step::Frame(Some(Err(e))) => break e.to_string(),
            Step::Frame(Some(Ok(FeedFrame::Close))) => break "closed by server".to_string(),
            Step::Frame(Some(Ok(FeedFrame::Other))) => {}
            Step::Frame(Some(Ok(FeedFrame::Text(text)))) => match parse_message(&text) {
                Ok(update) => {
                    if updates.send(update).await.is_err() {
                        socket.close().await;
                        break "update receiver dropped".to_string();
                    }
                }
                Err(e) => {
                    warn!(generation, error = %e, "Dropping malformed feed message");
                    event_bus.emit_lossy(DssEvent::FeedMessageDropped {
                        reason: e.to_string(),
                        timestamp: time::now(),
                    });
                }
            },
        }
    };

    let _ = control_tx.send(Control::Dropped { generation, reason });
}
