//! Failure-recovery policy around the whole stack.
//!
//! The [`SupervisoryLoop`] cycles through
//! `Authenticating → RequestingSession → Running → (Restart | Stopped)`:
//!
//! - login failures back off exponentially and retry forever
//! - session-request failures back off the same way; after
//!   `max_session_request_failures` in a row the loop logs in again
//! - a registry that loses its control connection is rebuilt after a short
//!   pause; only [`SupervisorHandle::stop`] ends the loop
//!
//! Every sleep and every collaborator call races the stop token, so a stop
//! takes effect immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cos_auth::{ApiClient, AuthError, AuthToken};
use cos_core::constants::CONTROL_CONNECTION_ID;
use cos_core::{BackoffPolicy, BackoffState};
use cos_protocol::PacketRegistry;
use cos_settings::{AccountSettings, AiSettings, CosSettings};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connect::{SessionConnector, WebSocketConnector, connect_lobby};
use crate::connection::{Connection, ConnectionConfig};
use crate::driver::HandlerFactory;
use crate::errors::Result;
use crate::registry::{Registry, RegistryConfig, TerminalReason};

// ─────────────────────────────────────────────────────────────────────────────
// Collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// Exchanges account credentials for a token.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Log in once.
    async fn authenticate(
        &self,
        account: &AccountSettings,
    ) -> std::result::Result<AuthToken, AuthError>;
}

/// An authenticated control-plane socket and its welcome payload.
#[derive(Debug)]
pub struct LobbyConnection<S> {
    /// The socket, credential already presented.
    pub ws: WebSocketStream<S>,
    /// The first message the lobby sent.
    pub welcome: Map<String, Value>,
}

/// Requests a control-plane connection for the AI personality.
#[async_trait]
pub trait SessionRequester: Send + Sync + 'static {
    /// Underlying byte stream of the control socket.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Request and establish the control connection.
    async fn request_session(
        &self,
        ai: &AiSettings,
        token: &AuthToken,
    ) -> Result<LobbyConnection<Self::Stream>>;
}

/// Logs in through the HTTP API.
#[derive(Clone, Debug)]
pub struct ApiAuthenticator {
    client: ApiClient,
}

impl ApiAuthenticator {
    /// Wrap an API client.
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Authenticator for ApiAuthenticator {
    async fn authenticate(
        &self,
        account: &AccountSettings,
    ) -> std::result::Result<AuthToken, AuthError> {
        self.client.login(account).await
    }
}

/// Requests a lobby endpoint over HTTP, then dials and handshakes it.
#[derive(Clone, Debug)]
pub struct LobbyRequester {
    client: ApiClient,
    origin: String,
    config: ConnectionConfig,
}

impl LobbyRequester {
    /// Create a requester dialing with the given `Origin` header.
    pub fn new(client: ApiClient, origin: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            client,
            origin: origin.into(),
            config,
        }
    }
}

#[async_trait]
impl SessionRequester for LobbyRequester {
    type Stream = MaybeTlsStream<TcpStream>;

    async fn request_session(
        &self,
        ai: &AiSettings,
        token: &AuthToken,
    ) -> Result<LobbyConnection<Self::Stream>> {
        let endpoint = self.client.request_lobby_endpoint(ai, token).await?;
        let (ws, welcome) =
            connect_lobby(&endpoint.url, &endpoint.jwt, &self.origin, &self.config).await?;
        Ok(LobbyConnection { ws, welcome })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the loop needs besides its collaborators.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Credentials passed to the authenticator.
    pub account: AccountSettings,
    /// Personality passed to the session requester.
    pub ai: AiSettings,
    /// Schedule for login and session-request retries.
    pub backoff: BackoffPolicy,
    /// Consecutive session-request failures before logging in again.
    pub max_session_request_failures: u32,
    /// Pause before restarting after the control connection is lost.
    pub restart_delay: Duration,
    /// Capacity of the control connection's inbound queue.
    pub control_inbound_capacity: usize,
    /// Config for each registry.
    pub registry: RegistryConfig,
}

impl SupervisorConfig {
    /// Derive supervisor config from settings.
    pub fn from_settings(settings: &CosSettings) -> Self {
        Self {
            account: settings.account.clone(),
            ai: settings.ai.clone(),
            backoff: settings.retry.backoff_policy(),
            max_session_request_failures: settings.retry.max_session_request_failures.max(1),
            restart_delay: settings.retry.restart_delay(),
            control_inbound_capacity: settings.transport.control_inbound_capacity.max(1),
            registry: RegistryConfig::from_settings(settings),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SupervisoryLoop
// ─────────────────────────────────────────────────────────────────────────────

/// Stops a running [`SupervisoryLoop`] from another task.
#[derive(Clone, Debug)]
pub struct SupervisorHandle {
    token: CancellationToken,
}

impl SupervisorHandle {
    /// Request a stop. Idempotent and non-blocking.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Production loop: HTTP login, HTTP lobby request, real websockets.
pub type DefaultSupervisoryLoop =
    SupervisoryLoop<ApiAuthenticator, LobbyRequester, WebSocketConnector>;

/// Login, lobby, registry, repeat.
pub struct SupervisoryLoop<A, R, C> {
    authenticator: A,
    requester: R,
    connector: C,
    factory: Arc<dyn HandlerFactory>,
    parser: Arc<PacketRegistry>,
    config: SupervisorConfig,
    token: CancellationToken,
}

impl DefaultSupervisoryLoop {
    /// Build the production loop from settings.
    pub fn from_settings(
        settings: &CosSettings,
        factory: Arc<dyn HandlerFactory>,
        parser: Arc<PacketRegistry>,
    ) -> Result<Self> {
        let client = ApiClient::new(&settings.api)?;
        let connection = ConnectionConfig::from_settings(&settings.transport);
        let origin = settings.api.websocket_origin.clone();
        Ok(Self::new(
            ApiAuthenticator::new(client.clone()),
            LobbyRequester::new(client, origin.clone(), connection.clone()),
            WebSocketConnector::new(origin, connection),
            factory,
            parser,
            SupervisorConfig::from_settings(settings),
        ))
    }
}

impl<A, R, C> SupervisoryLoop<A, R, C>
where
    A: Authenticator,
    R: SessionRequester,
    C: SessionConnector + Clone,
{
    /// Assemble a loop from its collaborators.
    pub fn new(
        authenticator: A,
        requester: R,
        connector: C,
        factory: Arc<dyn HandlerFactory>,
        parser: Arc<PacketRegistry>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            authenticator,
            requester,
            connector,
            factory,
            parser,
            config,
            token: CancellationToken::new(),
        }
    }

    /// A handle that can stop this loop while it runs.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            token: self.token.clone(),
        }
    }

    /// Request a stop. Idempotent and non-blocking.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Run until stopped.
    pub async fn run(self) {
        let mut auth_backoff = BackoffState::new(self.config.backoff);
        let mut request_backoff = BackoffState::new(self.config.backoff);

        'cycle: loop {
            // Authenticating
            let token = loop {
                let attempt = tokio::select! {
                    () = self.token.cancelled() => break 'cycle,
                    res = self.authenticator.authenticate(&self.config.account) => res,
                };
                match attempt {
                    Ok(token) => {
                        auth_backoff.reset();
                        break token;
                    }
                    Err(e) => {
                        let delay = auth_backoff.record_failure();
                        warn!(
                            attempt = auth_backoff.failures(),
                            delay_secs = delay.as_secs(),
                            error = %e,
                            "login failed"
                        );
                        if !self.pause(delay).await {
                            break 'cycle;
                        }
                    }
                }
            };

            // RequestingSession
            let lobby = loop {
                let attempt = tokio::select! {
                    () = self.token.cancelled() => break 'cycle,
                    res = self.requester.request_session(&self.config.ai, &token) => res,
                };
                match attempt {
                    Ok(lobby) => {
                        request_backoff.reset();
                        break lobby;
                    }
                    Err(e) => {
                        let delay = request_backoff.record_failure();
                        warn!(
                            attempt = request_backoff.failures(),
                            delay_secs = delay.as_secs(),
                            error = %e,
                            "session request failed"
                        );
                        if !self.pause(delay).await {
                            break 'cycle;
                        }
                        if request_backoff.failures() >= self.config.max_session_request_failures {
                            warn!(
                                failures = request_backoff.failures(),
                                "too many session request failures, logging in again"
                            );
                            request_backoff.reset();
                            continue 'cycle;
                        }
                    }
                }
            };
            drop(token);

            // Running
            let reason = self.run_registry(lobby).await;
            if reason == TerminalReason::Canceled || self.token.is_cancelled() {
                break 'cycle;
            }
            info!(
                delay_secs = self.config.restart_delay.as_secs(),
                "control connection lost, restarting"
            );
            if !self.pause(self.config.restart_delay).await {
                break 'cycle;
            }
        }

        info!("supervisor stopped");
    }

    async fn run_registry(&self, lobby: LobbyConnection<R::Stream>) -> TerminalReason {
        let (control, events) = Connection::open_dedicated(
            lobby.ws,
            CONTROL_CONNECTION_ID,
            self.config.control_inbound_capacity,
            &self.config.registry.connection,
        );
        let registry = Registry::new(
            control,
            events,
            lobby.welcome,
            self.connector.clone(),
            self.factory.clone(),
            self.parser.clone(),
            self.config.registry.clone(),
        )
        .with_parent(&self.token);
        registry.run().await
    }

    /// Sleep unless stopped first. Returns `false` on stop.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.token.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SessionHandler;
    use crate::errors::TransportError;
    use cos_protocol::ServerPacket;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use tokio::io::DuplexStream;
    use tokio::time::{self, Instant};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::protocol::Role;

    type Peer = WebSocketStream<DuplexStream>;

    async fn ws_pair() -> (Peer, Peer) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
        (client, server)
    }

    // -- fakes --

    #[derive(Clone, Default)]
    struct ScriptedAuth {
        calls: Arc<Mutex<Vec<Instant>>>,
        failures: usize,
    }

    impl ScriptedAuth {
        fn failing(failures: usize) -> Self {
            Self {
                failures,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Authenticator for ScriptedAuth {
        async fn authenticate(
            &self,
            _account: &AccountSettings,
        ) -> std::result::Result<AuthToken, AuthError> {
            let attempt = {
                let mut calls = self.calls.lock();
                calls.push(Instant::now());
                calls.len()
            };
            if attempt <= self.failures {
                return Err(AuthError::Status {
                    status: 401,
                    body: "bad credentials".into(),
                });
            }
            Ok(AuthToken::from_unix("token".into(), 0.0))
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedRequester {
        calls: Arc<Mutex<Vec<Instant>>>,
        peers: Arc<Mutex<Vec<Peer>>>,
        always_fail: bool,
    }

    impl ScriptedRequester {
        fn failing() -> Self {
            Self {
                always_fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().clone()
        }

        fn take_peer(&self) -> Option<Peer> {
            self.peers.lock().pop()
        }
    }

    #[async_trait]
    impl SessionRequester for ScriptedRequester {
        type Stream = DuplexStream;

        async fn request_session(
            &self,
            _ai: &AiSettings,
            _token: &AuthToken,
        ) -> Result<LobbyConnection<DuplexStream>> {
            self.calls.lock().push(Instant::now());
            if self.always_fail {
                return Err(TransportError::Protocol("lobby unavailable".into()));
            }
            let (client, server) = ws_pair().await;
            self.peers.lock().push(server);
            let mut welcome = Map::new();
            let _ = welcome.insert("type".into(), Value::from("welcome"));
            Ok(LobbyConnection {
                ws: client,
                welcome,
            })
        }
    }

    #[derive(Clone)]
    struct RefusingConnector;

    #[async_trait]
    impl SessionConnector for RefusingConnector {
        type Stream = DuplexStream;

        async fn connect(&self, url: &str, _jwt: &str) -> Result<Peer> {
            Err(TransportError::Connect {
                url: url.to_owned(),
                message: "refused".into(),
            })
        }
    }

    struct IdleHandler;

    #[async_trait]
    impl SessionHandler for IdleHandler {
        async fn on_message(&mut self, _packet: ServerPacket) {}
        async fn on_disconnected(&mut self) {}
        async fn on_tick(&mut self, _elapsed: Duration) {}
    }

    fn supervisor(
        auth: ScriptedAuth,
        requester: ScriptedRequester,
    ) -> SupervisoryLoop<ScriptedAuth, ScriptedRequester, RefusingConnector> {
        let factory = |_uid: &cos_core::SessionUid,
                       _sender: crate::connection::ConnectionSender|
         -> Box<dyn SessionHandler> { Box::new(IdleHandler) };
        SupervisoryLoop::new(
            auth,
            requester,
            RefusingConnector,
            Arc::new(factory),
            Arc::new(PacketRegistry::with_defaults()),
            SupervisorConfig::from_settings(&CosSettings::default()),
        )
    }

    fn gaps(instants: &[Instant]) -> Vec<u64> {
        instants
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect()
    }

    async fn wait_for_peer(requester: &ScriptedRequester) -> Peer {
        for _ in 0..1000 {
            if let Some(peer) = requester.take_peer() {
                return peer;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no lobby connection was requested");
    }

    async fn expect_close(peer: &mut Peer) {
        loop {
            match peer.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    }

    // -- backoff --

    #[tokio::test(start_paused = true)]
    async fn login_failures_follow_backoff_schedule() {
        let auth = ScriptedAuth::failing(usize::MAX);
        let sup = supervisor(auth.clone(), ScriptedRequester::failing());
        let handle = sup.handle();
        let run = tokio::spawn(sup.run());

        time::sleep(Duration::from_secs(60 + 120 + 240 + 480 + 960 + 960 + 1)).await;
        handle.stop();
        run.await.unwrap();

        assert_eq!(gaps(&auth.calls()), vec![60, 120, 240, 480, 960, 960]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_request_failures_force_relogin() {
        let auth = ScriptedAuth::default();
        let requester = ScriptedRequester::failing();
        let sup = supervisor(auth.clone(), requester.clone());
        let handle = sup.handle();
        let run = tokio::spawn(sup.run());

        time::sleep(Duration::from_secs(60 + 120 + 240 + 480 + 960 + 1)).await;
        handle.stop();
        run.await.unwrap();

        let logins = auth.calls();
        let requests = requester.calls();
        assert_eq!(logins.len(), 2);
        assert_eq!(requests.len(), 6);
        assert_eq!(gaps(&requests[..5]), vec![60, 120, 240, 480]);
        assert_eq!(logins[1] - logins[0], Duration::from_secs(1860));
        assert_eq!(requests[5], logins[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn request_backoff_is_separate_from_login_backoff() {
        let auth = ScriptedAuth::failing(2);
        let requester = ScriptedRequester::failing();
        let sup = supervisor(auth.clone(), requester.clone());
        let handle = sup.handle();
        let run = tokio::spawn(sup.run());

        time::sleep(Duration::from_secs(60 + 120 + 60 + 1)).await;
        handle.stop();
        run.await.unwrap();

        assert_eq!(gaps(&auth.calls()), vec![60, 120]);
        assert_eq!(gaps(&requester.calls()), vec![60]);
    }

    // -- stop --

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_backoff_sleep() {
        let auth = ScriptedAuth::failing(usize::MAX);
        let sup = supervisor(auth.clone(), ScriptedRequester::failing());
        let handle = sup.handle();
        let run = tokio::spawn(sup.run());

        time::sleep(Duration::from_secs(1)).await;
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());

        let started = Instant::now();
        run.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(auth.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_running_closes_control_connection() {
        let requester = ScriptedRequester::default();
        let sup = supervisor(ScriptedAuth::default(), requester.clone());
        let handle = sup.handle();
        let run = tokio::spawn(sup.run());

        let mut control = wait_for_peer(&requester).await;
        handle.stop();
        run.await.unwrap();
        expect_close(&mut control).await;
        assert_eq!(requester.calls().len(), 1);
    }

    // -- restart --

    #[tokio::test(start_paused = true)]
    async fn lost_control_connection_restarts_after_delay() {
        let auth = ScriptedAuth::default();
        let requester = ScriptedRequester::default();
        let sup = supervisor(auth.clone(), requester.clone());
        let handle = sup.handle();
        let run = tokio::spawn(sup.run());

        let mut first = wait_for_peer(&requester).await;
        first.close(None).await.unwrap();

        let mut second = wait_for_peer(&requester).await;
        let logins = auth.calls();
        assert_eq!(logins.len(), 2);
        assert!(logins[1] - logins[0] >= Duration::from_secs(5));

        handle.stop();
        run.await.unwrap();
        expect_close(&mut second).await;
    }

    // -- config --

    #[test]
    fn config_from_default_settings() {
        let config = SupervisorConfig::from_settings(&CosSettings::default());
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.max_session_request_failures, 5);
        assert_eq!(config.restart_delay, Duration::from_secs(5));
        assert_eq!(config.control_inbound_capacity, 64);
    }
}
