//! Dialing and handshaking websocket endpoints.
//!
//! Both planes authenticate the same way: the first frame written after the
//! websocket upgrade is the raw credential as text. The control plane then
//! answers with a welcome message; session sockets start streaming packets
//! straight away.
//!
//! Any failure after the upgrade sends a close frame with a matching close
//! code before the error is returned.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::connection::ConnectionConfig;
use crate::errors::{Result, TransportError};

/// A websocket dialed over TCP, with or without TLS.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─────────────────────────────────────────────────────────────────────────────
// Dial
// ─────────────────────────────────────────────────────────────────────────────

/// Open a websocket to `url` with the given `Origin` header.
pub async fn dial(url: &str, origin: &str, config: &ConnectionConfig) -> Result<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::Connect {
            url: url.to_owned(),
            message: e.to_string(),
        })?;
    let origin = HeaderValue::from_str(origin).map_err(|e| TransportError::Connect {
        url: url.to_owned(),
        message: format!("invalid origin header: {e}"),
    })?;
    let _ = request.headers_mut().insert(ORIGIN, origin);

    let deadline = config.read_timeout;
    let (ws, response) = time::timeout(deadline, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| TransportError::timeout("websocket upgrade", deadline))??;
    debug!(url, status = %response.status(), "websocket upgraded");
    Ok(ws)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

/// Write the credential frame. On failure the socket is closed with a
/// policy-violation code.
pub async fn present_credential<S>(
    ws: &mut WebSocketStream<S>,
    jwt: &str,
    config: &ConnectionConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = config.write_timeout;
    let result = match time::timeout(deadline, ws.send(Message::Text(jwt.into()))).await {
        Ok(res) => res.map_err(TransportError::from),
        Err(_) => Err(TransportError::timeout("credential write", deadline)),
    };
    if let Err(e) = result {
        reject(ws, CloseCode::Policy, "credential write failed", config).await;
        return Err(e);
    }
    Ok(())
}

/// Read and validate the control-plane welcome message.
///
/// The welcome must be a text frame holding a JSON object, or an array whose
/// first element is an object. On failure the socket is closed with the
/// matching close code.
pub async fn read_welcome<S>(
    ws: &mut WebSocketStream<S>,
    config: &ConnectionConfig,
) -> Result<Map<String, Value>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match next_welcome(ws, config).await {
        Ok(welcome) => Ok(welcome),
        Err(WelcomeFailure { code, error }) => {
            reject(ws, code, "invalid welcome", config).await;
            Err(error)
        }
    }
}

struct WelcomeFailure {
    code: CloseCode,
    error: TransportError,
}

impl WelcomeFailure {
    fn policy(error: TransportError) -> Self {
        Self {
            code: CloseCode::Policy,
            error,
        }
    }
}

async fn next_welcome<S>(
    ws: &mut WebSocketStream<S>,
    config: &ConnectionConfig,
) -> std::result::Result<Map<String, Value>, WelcomeFailure>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = config.read_timeout;
    let text = loop {
        let next = time::timeout(deadline, ws.next()).await.map_err(|_| {
            WelcomeFailure::policy(TransportError::timeout("welcome read", deadline))
        })?;
        match next {
            None => return Err(WelcomeFailure::policy(TransportError::Closed)),
            Some(Err(e)) => return Err(WelcomeFailure::policy(e.into())),
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                return Err(WelcomeFailure::policy(TransportError::Protocol(format!(
                    "closed before welcome: {frame:?}"
                ))));
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(WelcomeFailure {
                    code: CloseCode::Unsupported,
                    error: TransportError::Protocol("welcome is not a text frame".into()),
                });
            }
        }
    };

    let parsed: Value = serde_json::from_str(&text).map_err(|e| {
        WelcomeFailure::policy(TransportError::Protocol(format!(
            "could not parse welcome ({}): {e}",
            text.as_str()
        )))
    })?;

    match parsed {
        Value::Object(map) => Ok(map),
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(map)) => Ok(map),
            _ => Err(WelcomeFailure::policy(TransportError::Protocol(
                "welcome array does not start with an object".into(),
            ))),
        },
        _ => Err(WelcomeFailure::policy(TransportError::Protocol(
            "welcome is neither an object nor an array".into(),
        ))),
    }
}

/// Best-effort close with a code, bounded by the write timeout.
async fn reject<S>(
    ws: &mut WebSocketStream<S>,
    code: CloseCode,
    reason: &str,
    config: &ConnectionConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    match time::timeout(config.write_timeout, ws.close(Some(frame))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "close after failed handshake errored"),
        Err(_) => debug!("close after failed handshake timed out"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Planes
// ─────────────────────────────────────────────────────────────────────────────

/// Dial the control-plane socket, authenticate, and read the welcome.
pub async fn connect_lobby(
    url: &str,
    jwt: &str,
    origin: &str,
    config: &ConnectionConfig,
) -> Result<(WsStream, Map<String, Value>)> {
    let mut ws = dial(url, origin, config).await?;
    present_credential(&mut ws, jwt, config).await?;
    let welcome = read_welcome(&mut ws, config).await?;
    info!(url, "connected to lobby");
    Ok((ws, welcome))
}

/// Dial a session socket and authenticate. No welcome is expected.
pub async fn connect_session(
    url: &str,
    jwt: &str,
    origin: &str,
    config: &ConnectionConfig,
) -> Result<WsStream> {
    let mut ws = dial(url, origin, config).await?;
    present_credential(&mut ws, jwt, config).await?;
    Ok(ws)
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionConnector
// ─────────────────────────────────────────────────────────────────────────────

/// Establishes data-plane sockets for the registry.
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    /// Underlying byte stream of the produced websocket.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Dial `url` and present `jwt`.
    async fn connect(&self, url: &str, jwt: &str) -> Result<WebSocketStream<Self::Stream>>;
}

/// Production connector: real TCP/TLS websockets.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    origin: String,
    config: ConnectionConfig,
}

impl WebSocketConnector {
    /// Create a connector sending `origin` on every dial.
    pub fn new(origin: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            origin: origin.into(),
            config,
        }
    }
}

#[async_trait]
impl SessionConnector for WebSocketConnector {
    type Stream = MaybeTlsStream<TcpStream>;

    async fn connect(&self, url: &str, jwt: &str) -> Result<WsStream> {
        connect_session(url, jwt, &self.origin, &self.config)
            .await
            .inspect_err(|e| warn!(url, error = %e, "session connect failed"))
    }
}
