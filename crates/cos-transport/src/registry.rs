//! Control-plane multiplexer.
//!
//! The [`Registry`] watches the control connection for `match-available`
//! notifications, dials a session socket for each one, and runs a
//! [`SessionDriver`] per session. It owns the session map exclusively; drivers
//! report back through a shared completion queue.
//!
//! On exit every remaining driver is cancelled and the completion queue is
//! drained until the map is empty, so no session outlives its registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cos_core::SessionUid;
use cos_protocol::{ControlNotification, PacketRegistry, ParseError};
use cos_settings::CosSettings;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connect::SessionConnector;
use crate::connection::{Connection, ConnectionConfig, ConnectionEvents, InboundMessage};
use crate::driver::{DriverConfig, HandlerFactory, SessionDriver};

/// Why a registry stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalReason {
    /// The control connection closed or failed.
    ConnectionLost,
    /// [`RegistryHandle::cancel`] was called.
    Canceled,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::Canceled => f.write_str("canceled"),
        }
    }
}

/// Sizing and timing for sessions spawned by a registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Config for each session connection.
    pub connection: ConnectionConfig,
    /// Tick timing for each session driver.
    pub driver: DriverConfig,
    /// Capacity of each session's inbound queue.
    pub session_inbound_capacity: usize,
    /// Capacity of the completion queue.
    pub completion_capacity: usize,
}

impl RegistryConfig {
    /// Derive registry config from settings.
    pub fn from_settings(settings: &CosSettings) -> Self {
        Self {
            connection: ConnectionConfig::from_settings(&settings.transport),
            driver: DriverConfig::from_settings(&settings.session),
            session_inbound_capacity: settings.transport.session_inbound_capacity.max(1),
            completion_capacity: settings.transport.completion_capacity.max(1),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from_settings(&CosSettings::default())
    }
}

/// Cancels a running [`Registry`] from another task.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    token: CancellationToken,
}

impl RegistryHandle {
    /// Request shutdown. Idempotent and non-blocking.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Control-plane event loop and owner of all running sessions.
pub struct Registry<C: SessionConnector> {
    control: Connection,
    control_events: ConnectionEvents,
    welcome: Map<String, Value>,
    connector: C,
    factory: Arc<dyn HandlerFactory>,
    parser: Arc<PacketRegistry>,
    config: RegistryConfig,
    sessions: HashMap<SessionUid, SessionDriver>,
    completion_tx: mpsc::Sender<SessionUid>,
    completion_rx: mpsc::Receiver<SessionUid>,
    token: CancellationToken,
}

impl<C: SessionConnector> Registry<C> {
    /// Build a registry over an open control connection.
    pub fn new(
        control: Connection,
        control_events: ConnectionEvents,
        welcome: Map<String, Value>,
        connector: C,
        factory: Arc<dyn HandlerFactory>,
        parser: Arc<PacketRegistry>,
        config: RegistryConfig,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel(config.completion_capacity.max(1));
        Self {
            control,
            control_events,
            welcome,
            connector,
            factory,
            parser,
            config,
            sessions: HashMap::new(),
            completion_tx,
            completion_rx,
            token: CancellationToken::new(),
        }
    }

    /// Also stop when `parent` is cancelled.
    #[must_use]
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.token = parent.child_token();
        self
    }

    /// A handle that can cancel this registry while it runs.
    pub fn handle(&self) -> RegistryHandle {
        RegistryHandle {
            token: self.token.clone(),
        }
    }

    /// The welcome payload received on the control connection.
    pub fn welcome(&self) -> &Map<String, Value> {
        &self.welcome
    }

    /// Number of sessions currently tracked.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Run until the control connection is lost or the registry is
    /// cancelled, then shut every session down.
    pub async fn run(mut self) -> TerminalReason {
        info!(conn_id = self.control.id(), "registry running");

        let reason = loop {
            tokio::select! {
                () = self.token.cancelled() => break TerminalReason::Canceled,
                closed = self.control_events.closed.recv() => {
                    debug!(conn_id = ?closed, "control connection closed");
                    break TerminalReason::ConnectionLost;
                }
                done = self.completion_rx.recv() => {
                    if let Some(uid) = done {
                        let _ = self.finish_session(&uid);
                    }
                }
                inbound = self.control_events.inbound.recv() => match inbound {
                    Some(message) => {
                        if self.handle_control(message).await.is_err() {
                            break TerminalReason::Canceled;
                        }
                    }
                    None => break TerminalReason::ConnectionLost,
                },
            }
        };

        self.shutdown().await;
        info!(reason = %reason, "registry stopped");
        reason
    }

    /// React to one control message. `Err` means cancellation arrived while
    /// a session was being established.
    async fn handle_control(&mut self, message: InboundMessage) -> Result<(), Canceled> {
        match ControlNotification::parse(&message.payload) {
            Ok(ControlNotification::MatchAvailable { url, jwt }) => {
                let token = self.token.clone();
                tokio::select! {
                    () = token.cancelled() => Err(Canceled),
                    () = self.start_session(&url, &jwt) => Ok(()),
                }
            }
            Err(ParseError::UnknownType(packet_type)) => {
                debug!(packet_type = %packet_type, "ignoring control notification");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "malformed control notification");
                Ok(())
            }
        }
    }

    async fn start_session(&mut self, url: &str, jwt: &str) {
        let ws = match self.connector.connect(url, jwt).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(url, error = %e, "dropping match notification");
                return;
            }
        };

        let mut uid = SessionUid::generate();
        while self.sessions.contains_key(&uid) {
            uid = SessionUid::generate();
        }

        let (connection, events) = Connection::open_dedicated(
            ws,
            uid.as_str(),
            self.config.session_inbound_capacity,
            &self.config.connection,
        );
        let handler = self.factory.create(&uid, connection.sender());
        let driver = SessionDriver::start(
            connection,
            events,
            handler,
            uid.clone(),
            self.completion_tx.clone(),
            self.parser.clone(),
            &self.config.driver,
        );
        info!(session_id = %uid, url, sessions = self.sessions.len() + 1, "session assigned");
        let _ = self.sessions.insert(uid, driver);
    }

    /// Drop a finished session from the map. Returns whether it was tracked.
    fn finish_session(&mut self, uid: &SessionUid) -> bool {
        if self.sessions.remove(uid).is_some() {
            info!(session_id = %uid, sessions = self.sessions.len(), "session removed");
            true
        } else {
            debug!(session_id = %uid, "completion for unknown session");
            false
        }
    }

    async fn shutdown(mut self) {
        self.control.close();
        for driver in self.sessions.values() {
            driver.cancel();
        }

        let mut drained = 0_usize;
        while !self.sessions.is_empty() {
            match self.completion_rx.recv().await {
                Some(uid) => {
                    if self.finish_session(&uid) {
                        drained += 1;
                    }
                }
                None => break,
            }
        }
        info!(drained, remaining = self.sessions.len(), "all sessions finished");

        self.control.join().await;
    }
}

impl<C: SessionConnector> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("control", &self.control.id())
            .field("sessions", &self.sessions.len())
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

struct Canceled;
