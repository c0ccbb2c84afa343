//! Live feed transport
//!
//! The connection supervisor only needs "open a socket for this URL" and
//! "give me the next frame". [`WsTransport`] does that over a real
//! WebSocket; [`ChannelTransport`] does it over in-process channels so the
//! supervisor can be driven deterministically.

use crate::error::{Error, Result};
use futures::StreamExt;
use reqwest::Url;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// One inbound frame, reduced to what the feed cares about
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    Text(String),
    /// Peer sent a close frame
    Close,
    /// Binary, ping, pong; ignored
    Other,
}

/// Opens live feed sockets
pub trait FeedTransport: Send + Sync + 'static {
    type Socket: FeedSocket;

    /// Perform the handshake against `url` (already carrying the credential)
    fn connect(&self, url: &Url) -> impl Future<Output = Result<Self::Socket>> + Send;
}

/// An open live feed socket
pub trait FeedSocket: Send + 'static {
    /// Next frame; `None` once the stream has ended
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<FeedFrame>>> + Send;

    /// Close the socket; errors are swallowed
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// URL for display in logs, without the credential query
pub fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

// ========================================
// WebSocket
// ========================================

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket transport backed by tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsTransport {
    handshake_timeout: Duration,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedTransport for WsTransport {
    type Socket = WsSocket;

    async fn connect(&self, url: &Url) -> Result<WsSocket> {
        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let (stream, response) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| Error::Transport(format!("handshake with {} timed out", redacted(url))))?
            .map_err(|e| Error::Transport(e.to_string()))?;

        debug!(url = %redacted(url), status = %response.status(), "WebSocket handshake complete");
        Ok(WsSocket { stream })
    }
}

pub struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FeedSocket for WsSocket {
    async fn next_frame(&mut self) -> Option<Result<FeedFrame>> {
        let message = self.stream.next().await?;
        Some(match message {
            Ok(Message::Text(text)) => Ok(FeedFrame::Text(text)),
            Ok(Message::Close(_)) => Ok(FeedFrame::Close),
            Ok(_) => Ok(FeedFrame::Other),
            Err(e) => Err(Error::Transport(e.to_string())),
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}

// ========================================
// In-process channels
// ========================================

/// In-process transport; every successful connect hands a [`ChannelPeer`]
/// to the paired [`ChannelListener`]
#[derive(Clone)]
pub struct ChannelTransport {
    accept_tx: mpsc::UnboundedSender<ChannelPeer>,
    refuse: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

pub struct ChannelListener {
    accept_rx: mpsc::UnboundedReceiver<ChannelPeer>,
}

impl ChannelTransport {
    pub fn new() -> (Self, ChannelListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let transport = Self {
            accept_tx,
            refuse: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (transport, ChannelListener { accept_rx })
    }

    /// Make subsequent handshakes fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Handshakes attempted so far, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl FeedTransport for ChannelTransport {
    type Socket = ChannelSocket;

    async fn connect(&self, url: &Url) -> Result<ChannelSocket> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection refused".to_string()));
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let peer = ChannelPeer {
            url: url.clone(),
            frames: frames_tx,
            closed: closed_rx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| Error::Transport("listener dropped".to_string()))?;

        Ok(ChannelSocket {
            frames: frames_rx,
            closed: closed_tx,
        })
    }
}

impl ChannelListener {
    /// Wait for the next successful connect
    pub async fn accept(&mut self) -> Option<ChannelPeer> {
        self.accept_rx.recv().await
    }

    pub fn try_accept(&mut self) -> Option<ChannelPeer> {
        self.accept_rx.try_recv().ok()
    }
}

/// Server side of one in-process connection
///
/// Dropping the peer ends the client's stream.
pub struct ChannelPeer {
    url: Url,
    frames: mpsc::UnboundedSender<FeedFrame>,
    closed: watch::Receiver<bool>,
}

impl ChannelPeer {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Value of the `token` query parameter the client connected with
    pub fn token(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.frames.send(FeedFrame::Text(text.into())).is_ok()
    }

    /// Send a close frame
    pub fn close(&self) -> bool {
        self.frames.send(FeedFrame::Close).is_ok()
    }

    /// True once the client closed or dropped its socket
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.closed.has_changed().is_err()
    }

    /// Wait until the client closes or drops its socket
    pub async fn closed(&mut self) {
        let _ = self.closed.wait_for(|closed| *closed).await;
    }
}

pub struct ChannelSocket {
    frames: mpsc::UnboundedReceiver<FeedFrame>,
    closed: watch::Sender<bool>,
}

impl FeedSocket for ChannelSocket {
    async fn next_frame(&mut self) -> Option<Result<FeedFrame>> {
        self.frames.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.send_replace(true);
        self.frames.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_strips_token() {
        let url = Url::parse("wss://feed.example.com/ws?token=secret").unwrap();
        assert_eq!(redacted(&url), "wss://feed.example.com/ws");
    }

    #[tokio::test]
    async fn test_channel_round_trip() {
        let (transport, mut listener) = ChannelTransport::new();
        let url = Url::parse("ws://local/ws?token=t1").unwrap();

        let mut socket = transport.connect(&url).await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.token().as_deref(), Some("t1"));

        assert!(peer.send_text("hello"));
        assert_eq!(
            socket.next_frame().await.unwrap().unwrap(),
            FeedFrame::Text("hello".into())
        );

        assert!(!peer.is_closed());
        socket.close().await;
        peer.closed().await;
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_peer_ends_stream() {
        let (transport, mut listener) = ChannelTransport::new();
        let url = Url::parse("ws://local/ws").unwrap();

        let mut socket = transport.connect(&url).await.unwrap();
        drop(listener.accept().await.unwrap());
        assert!(socket.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_refused_connections_counted() {
        let (transport, mut listener) = ChannelTransport::new();
        let url = Url::parse("ws://local/ws").unwrap();
        transport.refuse_connections(true);

        assert!(transport.connect(&url).await.is_err());
        assert!(transport.connect(&url).await.is_err());
        assert_eq!(transport.attempts(), 2);
        assert!(listener.try_accept().is_none());
    }
}
