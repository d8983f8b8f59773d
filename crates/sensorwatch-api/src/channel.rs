//! WebSocket push channel.
//!
//! A [`PushChannel`] owns one logical connection to one push endpoint.
//! Each call to [`connect`](PushChannel::connect) starts a single
//! connection attempt on a background task and reports its lifecycle to a
//! [`ChannelSink`]: one `Opened` on success, any number of `Message`s, and
//! exactly one `Closed` per attempt whether it succeeded or not.
//!
//! The channel holds no business state and never retries on its own.
//! Reconnection policy belongs to whoever owns the sink.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sensorwatch_api::channel::{ChannelEvent, PushChannel};
//!
//! let sink = Arc::new(|event: ChannelEvent| println!("{event:?}"));
//! let channel = PushChannel::new("ws://127.0.0.1:8000/ws/devices".parse()?, sink);
//! channel.connect();
//! // ...
//! channel.disconnect("page closed");
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, protocol::CloseFrame, protocol::frame::coding};
use tokio_util::sync::CancellationToken;
use url::Url;

// ── Events ───────────────────────────────────────────────────────────

/// Why a connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: closed on purpose by either side.
    Normal,
    /// 1001: the peer is going away.
    GoingAway,
    /// The handshake never completed.
    ConnectFailed,
    /// Any other close code, or `None` if the stream dropped without one.
    Abnormal(Option<u16>),
}

impl CloseCode {
    /// `true` for codes that mean "do not reconnect".
    pub fn is_clean(self) -> bool {
        matches!(self, Self::Normal | Self::GoingAway)
    }

    /// Numeric WebSocket close code, where one exists.
    pub fn code(self) -> Option<u16> {
        match self {
            Self::Normal => Some(1000),
            Self::GoingAway => Some(1001),
            Self::ConnectFailed => None,
            Self::Abnormal(code) => code,
        }
    }

    fn from_wire(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            other => Self::Abnormal(Some(other)),
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{code}"),
            None if *self == Self::ConnectFailed => f.write_str("connect-failed"),
            None => f.write_str("abnormal"),
        }
    }
}

/// What happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEventKind {
    Opened,
    Message(String),
    Closed(CloseCode),
}

/// A channel lifecycle event, tagged with the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    /// Id returned by the [`PushChannel::connect`] call that started the attempt.
    pub connection: u64,
    pub kind: ChannelEventKind,
}

/// Receiver of channel events.
pub trait ChannelSink: Send + Sync + 'static {
    fn emit(&self, event: ChannelEvent);
}

impl<F> ChannelSink for F
where
    F: Fn(ChannelEvent) + Send + Sync + 'static,
{
    fn emit(&self, event: ChannelEvent) {
        self(event);
    }
}

// ── PushChannel ──────────────────────────────────────────────────────

struct ActiveConnection {
    id: u64,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

/// One logical push connection to one endpoint.
pub struct PushChannel {
    url: Url,
    sink: Arc<dyn ChannelSink>,
    next_connection: AtomicU64,
    active: Mutex<Option<ActiveConnection>>,
}

impl PushChannel {
    pub fn new(url: Url, sink: Arc<dyn ChannelSink>) -> Self {
        Self {
            url,
            sink,
            next_connection: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Start a connection attempt and return its id.
    ///
    /// Any attempt still running is cancelled first; its `Closed` event is
    /// still emitted, tagged with the old id. Must be called from within a
    /// tokio runtime.
    pub fn connect(&self) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let previous = self.lock_active().replace(ActiveConnection {
            id,
            cancel: cancel.clone(),
            outbound,
            connected: Arc::clone(&connected),
        });
        if let Some(prev) = previous {
            prev.cancel.cancel();
        }

        let url = self.url.clone();
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            run_connection(id, url, sink, cancel, outbound_rx, connected).await;
        });
        id
    }

    /// Close the current connection with code 1000.
    pub fn disconnect(&self, reason: &str) {
        if let Some(active) = self.lock_active().take() {
            tracing::info!(url = %self.url, connection = active.id, reason, "closing push channel");
            active.cancel.cancel();
        }
    }

    /// Queue a text frame. Dropped with a warning if not connected.
    pub fn send(&self, message: &str) {
        let guard = self.lock_active();
        match guard.as_ref() {
            Some(active) if active.connected.load(Ordering::Acquire) => {
                if active.outbound.send(message.to_owned()).is_err() {
                    tracing::warn!(url = %self.url, "push channel writer gone, message dropped");
                }
            }
            _ => tracing::warn!(url = %self.url, "send on disconnected push channel dropped"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock_active()
            .as_ref()
            .is_some_and(|a| a.connected.load(Ordering::Acquire))
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveConnection>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Some(active) = self.lock_active().take() {
            active.cancel.cancel();
        }
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn run_connection(
    id: u64,
    url: Url,
    sink: Arc<dyn ChannelSink>,
    cancel: CancellationToken,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
) {
    let emit = |kind| sink.emit(ChannelEvent { connection: id, kind });

    tracing::debug!(url = %url, connection = id, "connecting push channel");
    let handshake = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            emit(ChannelEventKind::Closed(CloseCode::Normal));
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let ws_stream = match handshake {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "push channel connect failed");
            emit(ChannelEventKind::Closed(CloseCode::ConnectFailed));
            return;
        }
    };

    connected.store(true, Ordering::Release);
    tracing::info!(url = %url, connection = id, "push channel connected");
    emit(ChannelEventKind::Opened);

    let (mut write, mut read) = ws_stream.split();

    let code = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: coding::CloseCode::Normal,
                    reason: "closed by client".into(),
                };
                if let Err(e) = write.send(tungstenite::Message::Close(Some(frame))).await {
                    tracing::debug!(error = %e, "close frame not delivered");
                }
                break CloseCode::Normal;
            }
            Some(text) = outbound_rx.recv() => {
                if let Err(e) = write.send(tungstenite::Message::text(text)).await {
                    tracing::warn!(url = %url, error = %e, "push channel write failed");
                    break CloseCode::Abnormal(None);
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        tracing::trace!(connection = id, bytes = text.len(), "push frame");
                        emit(ChannelEventKind::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let code = frame.as_ref().map_or(1005, |cf| u16::from(cf.code));
                        tracing::info!(url = %url, code, "push channel close frame received");
                        break CloseCode::from_wire(code);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(url = %url, error = %e, "push channel read failed");
                        break CloseCode::Abnormal(None);
                    }
                    None => {
                        tracing::info!(url = %url, "push channel stream ended");
                        break CloseCode::Abnormal(None);
                    }
                    _ => {
                        // Binary, Ping, Pong, Frame -- tungstenite answers pings itself
                    }
                }
            }
        }
    };

    connected.store(false, Ordering::Release);
    emit(ChannelEventKind::Closed(code));
}
