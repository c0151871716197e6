//! Managed duplex websocket connection.
//!
//! [`Connection::open`] takes ownership of an established websocket and
//! splits it into two tasks:
//!
//! - **send task**: drains the bounded outbound queue into batched text
//!   frames, writes keepalive pings, and runs the shutdown path
//! - **receive task**: decodes text frames and forwards each object, in
//!   order, to the shared inbound queue tagged with the connection id
//!
//! Every failure converges on [`Connection::close`]. The connection id is
//! pushed onto the closed-notification queue exactly once, after the close
//! frame has been attempted.

use std::sync::Arc;
use std::time::Duration;

use cos_settings::TransportSettings;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::{Result, TransportError};
use crate::frame::{decode_frame, encode_batch};

/// Reason sent in the close frame when this side tears a socket down.
pub const CLOSE_REASON: &str = "forcibly disconnecting";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Per-connection timing and queue sizing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Maximum silence before the socket is considered dead.
    pub read_timeout: Duration,
    /// Deadline for each frame write.
    pub write_timeout: Duration,
    /// Interval between protocol-level pings.
    pub keepalive_interval: Duration,
    /// Capacity of the outbound queue.
    pub outbound_capacity: usize,
    /// Maximum messages coalesced into one frame.
    pub batch_limit: usize,
}

impl ConnectionConfig {
    /// Derive connection config from transport settings.
    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self {
            read_timeout: settings.read_timeout(),
            write_timeout: settings.write_timeout(),
            keepalive_interval: settings.keepalive_interval(),
            outbound_capacity: settings.outbound_capacity.max(1),
            batch_limit: settings.batch_limit.max(1),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_settings(&TransportSettings::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queues
// ─────────────────────────────────────────────────────────────────────────────

/// One decoded object received on a connection.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    /// Id of the connection that received it.
    pub conn_id: Arc<str>,
    /// The decoded object.
    pub payload: Map<String, Value>,
}

/// Receiving ends of a connection's dedicated queues.
#[derive(Debug)]
pub struct ConnectionEvents {
    /// Decoded inbound objects in socket order.
    pub inbound: mpsc::Receiver<InboundMessage>,
    /// Receives the connection id once the connection has shut down.
    pub closed: mpsc::Receiver<String>,
}

/// Cloneable handle for submitting outbound messages.
///
/// Session handlers hold one of these. It never owns the socket.
#[derive(Clone, Debug)]
pub struct ConnectionSender {
    id: Arc<str>,
    outbound: mpsc::Sender<Value>,
    token: CancellationToken,
}

impl ConnectionSender {
    /// The connection id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a message, waiting for space if the queue is full.
    pub async fn send(&self, message: Value) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            res = self.outbound.send(message) => res.map_err(|_| TransportError::Closed),
            () = self.token.cancelled() => Err(TransportError::Closed),
        }
    }

    /// Queue a message without waiting.
    pub fn try_send(&self, message: Value) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Serialize and queue any packet type.
    pub async fn send_packet<T: Serialize + ?Sized>(&self, packet: &T) -> Result<()> {
        let value = serde_json::to_value(packet)?;
        self.send(value).await
    }

    /// Request shutdown of the underlying connection. Idempotent.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been requested.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────────────────────────────────────

/// An open websocket driven by a send task and a receive task.
#[derive(Debug)]
pub struct Connection {
    sender: ConnectionSender,
    send_task: JoinHandle<()>,
    recv_task: JoinHandle<()>,
}

impl Connection {
    /// Take ownership of `ws` and start its tasks.
    ///
    /// Inbound objects go to `inbound`; the id is pushed onto `closed` once
    /// the connection has shut down.
    pub fn open<S>(
        ws: WebSocketStream<S>,
        id: impl Into<Arc<str>>,
        inbound: mpsc::Sender<InboundMessage>,
        closed: mpsc::Sender<String>,
        config: &ConnectionConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id: Arc<str> = id.into();
        let token = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (sink, stream) = ws.split();

        let send_task = tokio::spawn(run_send_loop(
            SendLoop {
                id: id.clone(),
                sink,
                outbound: outbound_rx,
                token: token.clone(),
                config: config.clone(),
            },
            closed,
        ));
        let recv_task = tokio::spawn(run_receive_loop(
            id.clone(),
            stream,
            inbound,
            token.clone(),
            config.read_timeout,
        ));

        debug!(conn_id = %id, "connection opened");
        Self {
            sender: ConnectionSender {
                id,
                outbound: outbound_tx,
                token,
            },
            send_task,
            recv_task,
        }
    }

    /// Open with freshly allocated inbound and closed queues.
    pub fn open_dedicated<S>(
        ws: WebSocketStream<S>,
        id: impl Into<Arc<str>>,
        inbound_capacity: usize,
        config: &ConnectionConfig,
    ) -> (Self, ConnectionEvents)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        let (closed_tx, closed_rx) = mpsc::channel(1);
        let conn = Self::open(ws, id, inbound_tx, closed_tx, config);
        (
            conn,
            ConnectionEvents {
                inbound: inbound_rx,
                closed: closed_rx,
            },
        )
    }

    /// The connection id.
    pub fn id(&self) -> &str {
        self.sender.id()
    }

    /// A cloneable handle to the outbound queue.
    pub fn sender(&self) -> ConnectionSender {
        self.sender.clone()
    }

    /// Request shutdown. Idempotent and non-blocking.
    pub fn close(&self) {
        self.sender.close();
    }

    /// Whether shutdown has been requested.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Wait for both tasks to finish.
    pub async fn join(self) {
        let Self {
            sender,
            send_task,
            recv_task,
        } = self;
        drop(sender);
        for task in [send_task, recv_task] {
            if let Err(e) = task.await {
                error!(error = %e, "connection task panicked");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Send task
// ─────────────────────────────────────────────────────────────────────────────

struct SendLoop<S> {
    id: Arc<str>,
    sink: SplitSink<WebSocketStream<S>, Message>,
    outbound: mpsc::Receiver<Value>,
    token: CancellationToken,
    config: ConnectionConfig,
}

async fn run_send_loop<S>(mut lp: SendLoop<S>, closed: mpsc::Sender<String>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let period = lp.config.keepalive_interval.max(Duration::from_millis(1));
    let mut keepalive = time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = lp.token.cancelled() => {
                let batch = drain(&mut lp.outbound, Vec::new(), lp.config.batch_limit);
                if !batch.is_empty() {
                    if let Err(e) = write_batch(&mut lp.sink, &batch, lp.config.write_timeout).await {
                        log_write_failure(&lp.id, "final flush", &e);
                    }
                }
                break;
            }
            msg = lp.outbound.recv() => {
                let Some(first) = msg else {
                    debug!(conn_id = %lp.id, "all senders dropped");
                    break;
                };
                let batch = drain(&mut lp.outbound, vec![first], lp.config.batch_limit);
                if let Err(e) = write_batch(&mut lp.sink, &batch, lp.config.write_timeout).await {
                    log_write_failure(&lp.id, "frame write", &e);
                    break;
                }
            }
            _ = keepalive.tick() => {
                let ping = Message::Ping(Vec::new().into());
                if let Err(e) = write_frame(&mut lp.sink, ping, lp.config.write_timeout).await {
                    log_write_failure(&lp.id, "keepalive ping", &e);
                    break;
                }
            }
        }
    }

    lp.token.cancel();
    shutdown_sink(&lp.id, &mut lp.sink, lp.config.write_timeout).await;
    let SendLoop { id, sink, .. } = lp;
    drop(sink);
    // The receiver side may already be gone during teardown.
    let _ = closed.send(id.to_string()).await;
}

/// Pull up to `limit` already-queued messages without waiting.
fn drain(outbound: &mut mpsc::Receiver<Value>, mut batch: Vec<Value>, limit: usize) -> Vec<Value> {
    while batch.len() < limit {
        match outbound.try_recv() {
            Ok(msg) => batch.push(msg),
            Err(_) => break,
        }
    }
    batch
}

async fn write_batch<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    batch: &[Value],
    deadline: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = encode_batch(batch)?;
    write_frame(sink, Message::Text(text.into()), deadline).await
}

async fn write_frame<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    frame: Message,
    deadline: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match time::timeout(deadline, sink.send(frame)).await {
        Ok(res) => res.map_err(TransportError::from),
        Err(_) => Err(TransportError::timeout("frame write", deadline)),
    }
}

async fn shutdown_sink<S>(
    id: &str,
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    deadline: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: CLOSE_REASON.into(),
    }));
    if let Err(e) = write_frame(sink, frame, deadline).await {
        log_write_failure(id, "close frame", &e);
    }
    match time::timeout(deadline, sink.close()).await {
        Ok(Err(e)) => debug!(conn_id = %id, error = %e, "socket close reported an error"),
        Err(_) => debug!(conn_id = %id, "socket close timed out"),
        Ok(Ok(())) => {}
    }
    debug!(conn_id = %id, "connection closed");
}

fn log_write_failure(id: &str, what: &'static str, err: &TransportError) {
    match err {
        e if e.is_closed() => debug!(conn_id = %id, what, "socket already closed"),
        TransportError::Serialize(e) => error!(conn_id = %id, what, error = %e, "failed to serialize"),
        e => warn!(conn_id = %id, what, error = %e, "write failed"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Receive task
// ─────────────────────────────────────────────────────────────────────────────

async fn run_receive_loop<S>(
    id: Arc<str>,
    mut stream: SplitStream<WebSocketStream<S>>,
    inbound: mpsc::Sender<InboundMessage>,
    token: CancellationToken,
    read_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    'frames: loop {
        let next = tokio::select! {
            () = token.cancelled() => break,
            next = time::timeout(read_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                warn!(conn_id = %id, timeout = ?read_timeout, "read deadline exceeded");
                break;
            }
            Ok(None) => {
                debug!(conn_id = %id, "socket ended");
                break;
            }
            Ok(Some(Err(e))) => {
                let e = TransportError::from(e);
                if e.is_closed() {
                    debug!(conn_id = %id, "socket already closed");
                } else {
                    warn!(conn_id = %id, error = %e, "read failed");
                }
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            Message::Close(frame) => {
                debug!(conn_id = %id, ?frame, "peer sent close frame");
                break;
            }
            Message::Binary(data) => {
                warn!(conn_id = %id, len = data.len(), "unexpected binary frame");
                break;
            }
        };

        let objects = match decode_frame(&text) {
            Ok(objects) => objects,
            Err(e) => {
                warn!(conn_id = %id, error = %e, "undecodable frame");
                break;
            }
        };

        for payload in objects {
            let message = InboundMessage {
                conn_id: id.clone(),
                payload,
            };
            tokio::select! {
                res = inbound.send(message) => {
                    if res.is_err() {
                        debug!(conn_id = %id, "inbound queue dropped");
                        break 'frames;
                    }
                }
                () = token.cancelled() => break 'frames,
            }
        }
    }

    token.cancel();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
