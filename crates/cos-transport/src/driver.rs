//! Per-session event loop.
//!
//! A [`SessionDriver`] owns one session [`Connection`] and a fixed-rate
//! ticker. It merges parsed inbound packets and ticks into one ordered
//! stream of calls against a [`SessionHandler`]:
//!
//! ```text
//! inbound ──parse──▶ on_message ─┐
//! ticker ──TickClock─▶ on_tick ──┼──▶ handler
//! closed / cancel ──────────────┘     on_disconnected (once) ──▶ completion
//! ```
//!
//! A tick that fires long after its scheduled instant is dropped rather than
//! delivered as one huge `elapsed`, see [`TickClock`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cos_core::SessionUid;
use cos_protocol::{PacketRegistry, ServerPacket};
use cos_settings::SessionSettings;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionEvents, ConnectionSender, InboundMessage};

// ─────────────────────────────────────────────────────────────────────────────
// Handler capability
// ─────────────────────────────────────────────────────────────────────────────

/// Application logic for one session.
///
/// Calls are strictly sequential: the driver awaits each one before taking
/// the next event.
#[async_trait]
pub trait SessionHandler: Send {
    /// A packet arrived on the session socket.
    async fn on_message(&mut self, packet: ServerPacket);

    /// The session ended. Called exactly once, after which no further calls
    /// are made.
    async fn on_disconnected(&mut self);

    /// A tick was serviced; `elapsed` is the time since the previous
    /// serviced tick.
    async fn on_tick(&mut self, elapsed: Duration);
}

/// Builds a handler for every new session.
pub trait HandlerFactory: Send + Sync + 'static {
    /// Create the handler. `sender` queues outbound messages on the
    /// session's connection.
    fn create(&self, uid: &SessionUid, sender: ConnectionSender) -> Box<dyn SessionHandler>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&SessionUid, ConnectionSender) -> Box<dyn SessionHandler> + Send + Sync + 'static,
{
    fn create(&self, uid: &SessionUid, sender: ConnectionSender) -> Box<dyn SessionHandler> {
        self(uid, sender)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tick timing for a driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    /// Nominal tick period.
    pub tick_interval: Duration,
    /// A tick serviced later than this after its scheduled instant is dropped.
    pub staleness_threshold: Duration,
    /// Minimum spacing between stale-tick warnings.
    pub stale_warn_cooldown: Duration,
}

impl DriverConfig {
    /// Derive driver config from session settings.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            tick_interval: settings.tick_interval(),
            staleness_threshold: settings.staleness_threshold(),
            stale_warn_cooldown: settings.stale_warn_cooldown(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from_settings(&SessionSettings::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TickClock
// ─────────────────────────────────────────────────────────────────────────────

/// What to do with one ticker firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Deliver the tick with this elapsed time.
    Service(Duration),
    /// Drop the tick. `warn` is set when the rate-limited warning is due.
    Stale {
        /// How far behind schedule the tick was serviced.
        behind: Duration,
        /// Whether to log a warning for this drop.
        warn: bool,
    },
}

/// Staleness and elapsed-time bookkeeping for a ticker.
///
/// Elapsed time is measured between the scheduled instants of serviced ticks,
/// so dropped ticks neither produce a callback nor get counted twice.
#[derive(Clone, Debug)]
pub struct TickClock {
    threshold: Duration,
    cooldown: Duration,
    last_serviced: Instant,
    last_warned: Option<Instant>,
}

impl TickClock {
    /// Start a clock whose first elapsed interval is measured from `start`.
    pub fn new(start: Instant, config: &DriverConfig) -> Self {
        Self {
            threshold: config.staleness_threshold,
            cooldown: config.stale_warn_cooldown,
            last_serviced: start,
            last_warned: None,
        }
    }

    /// Classify a tick scheduled for `scheduled` and observed at `now`.
    pub fn observe(&mut self, scheduled: Instant, now: Instant) -> TickOutcome {
        let behind = now.saturating_duration_since(scheduled);
        if behind > self.threshold {
            let warn = self
                .last_warned
                .is_none_or(|at| now.saturating_duration_since(at) >= self.cooldown);
            if warn {
                self.last_warned = Some(now);
            }
            return TickOutcome::Stale { behind, warn };
        }
        let elapsed = scheduled.saturating_duration_since(self.last_serviced);
        self.last_serviced = scheduled;
        TickOutcome::Service(elapsed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionDriver
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a running session event loop.
#[derive(Debug)]
pub struct SessionDriver {
    uid: SessionUid,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionDriver {
    /// Start the event loop on a dedicated task.
    ///
    /// `uid` is pushed onto `completion` exactly once when the loop has
    /// finished, including when the handler panics.
    pub fn start(
        connection: Connection,
        events: ConnectionEvents,
        handler: Box<dyn SessionHandler>,
        uid: SessionUid,
        completion: mpsc::Sender<SessionUid>,
        parser: Arc<PacketRegistry>,
        config: &DriverConfig,
    ) -> Self {
        let token = CancellationToken::new();
        let closer = connection.sender();
        let event_loop = EventLoop {
            uid: uid.clone(),
            connection,
            events,
            handler,
            parser,
            token: token.clone(),
            config: config.clone(),
        };

        let done_uid = uid.clone();
        let task = tokio::spawn(async move {
            let inner = tokio::spawn(event_loop.run());
            if let Err(e) = inner.await {
                error!(session_id = %done_uid, error = %e, "session event loop panicked");
                closer.close();
            }
            if completion.send(done_uid.clone()).await.is_err() {
                debug!(session_id = %done_uid, "completion queue closed");
            }
        });

        Self { uid, token, task }
    }

    /// The session uid.
    pub fn uid(&self) -> &SessionUid {
        &self.uid
    }

    /// Request shutdown. Idempotent and non-blocking.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the driver task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Why the event loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExitCause {
    Canceled,
    ConnectionClosed,
}

struct EventLoop {
    uid: SessionUid,
    connection: Connection,
    events: ConnectionEvents,
    handler: Box<dyn SessionHandler>,
    parser: Arc<PacketRegistry>,
    token: CancellationToken,
    config: DriverConfig,
}

impl EventLoop {
    async fn run(mut self) {
        let period = self.config.tick_interval.max(Duration::from_micros(1));
        let start = Instant::now();
        let mut ticker = time::interval_at(start + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut clock = TickClock::new(start, &self.config);

        info!(session_id = %self.uid, conn_id = self.connection.id(), "session started");

        let cause = loop {
            tokio::select! {
                () = self.token.cancelled() => break ExitCause::Canceled,
                closed = self.events.closed.recv() => {
                    debug!(session_id = %self.uid, conn_id = ?closed, "session connection closed");
                    break ExitCause::ConnectionClosed;
                }
                inbound = self.events.inbound.recv() => match inbound {
                    Some(message) => self.dispatch(message).await,
                    None => break ExitCause::ConnectionClosed,
                },
                scheduled = ticker.tick() => {
                    match clock.observe(scheduled, Instant::now()) {
                        TickOutcome::Service(elapsed) => self.handler.on_tick(elapsed).await,
                        TickOutcome::Stale { behind, warn: true } => warn!(
                            session_id = %self.uid,
                            behind_ms = u64::try_from(behind.as_millis()).unwrap_or(u64::MAX),
                            "dropping stale tick"
                        ),
                        TickOutcome::Stale { .. } => {}
                    }
                }
            }
        };

        drop(ticker);
        self.handler.on_disconnected().await;
        self.connection.close();
        self.connection.join().await;
        info!(session_id = %self.uid, cause = ?cause, "session finished");
    }

    async fn dispatch(&mut self, message: InboundMessage) {
        match self.parser.parse(&message.payload) {
            Ok(packet) => self.handler.on_message(packet).await,
            Err(e) => warn!(
                session_id = %self.uid,
                packet_type = e.packet_type().unwrap_or("?"),
                error = %e,
                "dropping unparseable packet"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use cos_core::logging::capture_logs;
    use futures::{SinkExt, StreamExt};
    use parking_lot::Mutex;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tracing::Level;

    type Peer = WebSocketStream<DuplexStream>;

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Message(String),
        Tick(Duration),
        Disconnected,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn messages(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Message(t) => Some(t),
                    _ => None,
                })
                .collect()
        }

        fn ticks(&self) -> Vec<Duration> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Tick(d) => Some(d),
                    _ => None,
                })
                .collect()
        }

        fn disconnects(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| **c == Call::Disconnected)
                .count()
        }
    }

    struct RecordingHandler {
        recorder: Recorder,
        stall_first_tick: Option<Duration>,
    }

    #[async_trait]
    impl SessionHandler for RecordingHandler {
        async fn on_message(&mut self, packet: ServerPacket) {
            let text = match &packet {
                ServerPacket::ChatMessage(m) => m.text.clone(),
                other => other.packet_type().to_owned(),
            };
            self.recorder.calls.lock().push(Call::Message(text));
        }

        async fn on_disconnected(&mut self) {
            self.recorder.calls.lock().push(Call::Disconnected);
        }

        async fn on_tick(&mut self, elapsed: Duration) {
            self.recorder.calls.lock().push(Call::Tick(elapsed));
            if let Some(stall) = self.stall_first_tick.take() {
                time::sleep(stall).await;
            }
        }
    }

    async fn ws_pair() -> (Peer, Peer) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
        (client, server)
    }

    struct Harness {
        driver: SessionDriver,
        server: Peer,
        recorder: Recorder,
        completion: mpsc::Receiver<SessionUid>,
    }

    async fn start_driver(config: DriverConfig, stall_first_tick: Option<Duration>) -> Harness {
        let (client, server) = ws_pair().await;
        let (conn, events) =
            Connection::open_dedicated(client, "session", 1024, &ConnectionConfig::default());
        let recorder = Recorder::default();
        let handler = Box::new(RecordingHandler {
            recorder: recorder.clone(),
            stall_first_tick,
        });
        let (completion_tx, completion) = mpsc::channel(4);
        let driver = SessionDriver::start(
            conn,
            events,
            handler,
            SessionUid::generate(),
            completion_tx,
            Arc::new(PacketRegistry::with_defaults()),
            &config,
        );
        Harness {
            driver,
            server,
            recorder,
            completion,
        }
    }

    fn slow_ticks() -> DriverConfig {
        DriverConfig {
            tick_interval: Duration::from_secs(3600),
            staleness_threshold: Duration::from_secs(5 * 3600),
            stale_warn_cooldown: Duration::from_secs(300),
        }
    }

    fn chat(text: &str) -> String {
        serde_json::json!({
            "type": "chat-message",
            "game_time": 1.0,
            "time": 1.0,
            "author_uid": "a",
            "text": text,
        })
        .to_string()
    }

    async fn wait_for_messages(recorder: &Recorder, n: usize) {
        for _ in 0..200 {
            if recorder.messages().len() >= n {
                return;
            }
            tokio::task::yield_now().await;
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {n} messages, got {:?}", recorder.calls());
    }

    // -- TickClock --

    #[test]
    fn clock_services_on_time_ticks() {
        let start = Instant::now();
        let config = DriverConfig::default();
        let period = config.tick_interval;
        let mut clock = TickClock::new(start, &config);

        assert_eq!(
            clock.observe(start + period, start + period),
            TickOutcome::Service(period)
        );
        assert_eq!(
            clock.observe(start + period * 2, start + period * 3),
            TickOutcome::Service(period)
        );
    }

    #[test]
    fn clock_drops_tick_serviced_six_periods_late() {
        let start = Instant::now();
        let config = DriverConfig::default();
        let period = config.tick_interval;
        let mut clock = TickClock::new(start, &config);

        assert_eq!(
            clock.observe(start + period, start + period),
            TickOutcome::Service(period)
        );

        let scheduled = start + period * 2;
        assert_eq!(
            clock.observe(scheduled, scheduled + period * 6),
            TickOutcome::Stale {
                behind: period * 6,
                warn: true
            }
        );

        // Next serviced tick measures from the last serviced one.
        let next = start + period * 9;
        assert_eq!(clock.observe(next, next), TickOutcome::Service(period * 8));
    }

    #[test]
    fn clock_tick_exactly_at_threshold_is_serviced() {
        let start = Instant::now();
        let config = DriverConfig::default();
        let period = config.tick_interval;
        let mut clock = TickClock::new(start, &config);

        let scheduled = start + period;
        assert_eq!(
            clock.observe(scheduled, scheduled + period * 5),
            TickOutcome::Service(period)
        );
    }

    #[test]
    fn clock_rate_limits_warnings() {
        let start = Instant::now();
        let config = DriverConfig::default();
        let period = config.tick_interval;
        let cooldown = config.stale_warn_cooldown;
        let mut clock = TickClock::new(start, &config);

        let late = period * 10;
        let first = clock.observe(start, start + late);
        let second = clock.observe(start + period, start + period + late);
        let after_cooldown = clock.observe(start + cooldown, start + cooldown + late);

        assert_eq!(first, TickOutcome::Stale { behind: late, warn: true });
        assert_eq!(second, TickOutcome::Stale { behind: late, warn: false });
        assert_eq!(after_cooldown, TickOutcome::Stale { behind: late, warn: true });
    }

    #[test]
    fn config_from_default_settings() {
        let config = DriverConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(1) / 60);
        assert_eq!(config.staleness_threshold, config.tick_interval * 5);
        assert_eq!(config.stale_warn_cooldown, Duration::from_secs(300));
    }

    // -- messages --

    #[tokio::test]
    async fn delivers_packets_in_order() {
        let mut h = start_driver(slow_ticks(), None).await;
        let frame = format!("[{},{}]", chat("one"), chat("two"));
        h.server.send(Message::Text(frame.into())).await.unwrap();
        h.server.send(Message::Text(chat("three").into())).await.unwrap();

        wait_for_messages(&h.recorder, 3).await;
        assert_eq!(h.recorder.messages(), vec!["one", "two", "three"]);
        h.driver.cancel();
        assert_eq!(h.completion.recv().await, Some(h.driver.uid().clone()));
    }

    #[tokio::test]
    async fn unparseable_packet_is_skipped() {
        let mut h = start_driver(slow_ticks(), None).await;
        let frame = format!(
            r#"[{},{{"type":"mystery"}},{{"type":"chat-message","text":5}},{}]"#,
            chat("before"),
            chat("after")
        );
        h.server.send(Message::Text(frame.into())).await.unwrap();

        wait_for_messages(&h.recorder, 2).await;
        assert_eq!(h.recorder.messages(), vec!["before", "after"]);
        assert!(!h.driver.is_cancelled());
        h.driver.cancel();
        assert!(h.completion.recv().await.is_some());
    }

    #[tokio::test]
    async fn world_packets_are_delivered_without_warnings() {
        let (logs, _guard) = capture_logs();
        let mut h = start_driver(slow_ticks(), None).await;
        let frame = serde_json::json!([
            {"type": "game-object-added", "game_time": 1, "object": {"uid": "g1"}},
            {"type": "game-object-update", "game_time": 2, "uid": "g1"},
            {"type": "smart-object-added", "game_time": 3, "object": {"uid": "s1", "current_health": 9}},
            {"type": "smart-object-update", "game_time": 4, "uid": "s1", "current_health": "8"},
            {"type": "player-added", "game_time": 5, "object": {"uid": "p1", "role": "economy"}},
            {"type": "chat-author-update", "game_time": 6, "uid": "p1", "name": "P"},
        ])
        .to_string();
        h.server.send(Message::Text(frame.into())).await.unwrap();

        wait_for_messages(&h.recorder, 6).await;
        assert_eq!(
            h.recorder.messages(),
            vec![
                "game-object-added",
                "game-object-update",
                "smart-object-added",
                "smart-object-update",
                "player-added",
                "chat-author-update",
            ]
        );
        assert_eq!(logs.count_matching(Level::WARN, "dropping unparseable packet"), 0);
        h.driver.cancel();
        assert!(h.completion.recv().await.is_some());
    }

    // -- shutdown --

    #[tokio::test]
    async fn cancel_disconnects_once_and_completes_once() {
        let mut h = start_driver(slow_ticks(), None).await;
        h.driver.cancel();
        h.driver.cancel();

        assert_eq!(h.completion.recv().await, Some(h.driver.uid().clone()));
        assert_eq!(h.recorder.disconnects(), 1);
        assert_eq!(h.recorder.calls().last(), Some(&Call::Disconnected));

        // The session socket was closed by this side.
        loop {
            match h.server.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
        drop(h.driver);
        assert!(h.completion.recv().await.is_none());
    }

    #[tokio::test]
    async fn peer_close_ends_session() {
        let mut h = start_driver(slow_ticks(), None).await;
        h.server.close(None).await.unwrap();

        assert_eq!(h.completion.recv().await, Some(h.driver.uid().clone()));
        assert_eq!(h.recorder.disconnects(), 1);
        assert!(!h.driver.is_cancelled());
    }

    // -- ticks --

    #[tokio::test(start_paused = true)]
    async fn ticks_report_nominal_interval() {
        let config = DriverConfig {
            tick_interval: Duration::from_millis(10),
            staleness_threshold: Duration::from_millis(50),
            stale_warn_cooldown: Duration::from_secs(300),
        };
        let mut h = start_driver(config, None).await;
        time::sleep(Duration::from_millis(105)).await;
        h.driver.cancel();
        assert!(h.completion.recv().await.is_some());

        let ticks = h.recorder.ticks();
        assert!(ticks.len() >= 5, "got {ticks:?}");
        assert!(ticks.iter().all(|d| *d == Duration::from_millis(10)), "got {ticks:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_handler_drops_stale_tick_with_one_warning() {
        let (logs, _guard) = capture_logs();
        let config = DriverConfig {
            tick_interval: Duration::from_millis(10),
            staleness_threshold: Duration::from_millis(50),
            stale_warn_cooldown: Duration::from_secs(300),
        };
        let mut h = start_driver(config, Some(Duration::from_millis(100))).await;
        time::sleep(Duration::from_millis(300)).await;
        h.driver.cancel();
        assert!(h.completion.recv().await.is_some());

        let warnings = logs.matching(Level::WARN, "dropping stale tick");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].field("session_id").is_some());

        let ticks = h.recorder.ticks();
        assert_eq!(ticks[0], Duration::from_millis(10));
        // Elapsed stays cumulative across the dropped tick.
        let total: Duration = ticks.iter().sum();
        assert!(total <= Duration::from_millis(300), "got {ticks:?}");
        assert!(ticks.iter().skip(1).any(|d| *d > Duration::from_millis(50)), "got {ticks:?}");
    }

    #[tokio::test]
    async fn closure_factory_builds_handlers() {
        let recorder = Recorder::default();
        let rec = recorder.clone();
        let factory = move |_uid: &SessionUid, _sender: ConnectionSender| -> Box<dyn SessionHandler> {
            Box::new(RecordingHandler {
                recorder: rec.clone(),
                stall_first_tick: None,
            })
        };
        let (client, _server) = ws_pair().await;
        let (conn, _events) =
            Connection::open_dedicated(client, "x", 4, &ConnectionConfig::default());
        let mut handler = factory.create(&SessionUid::generate(), conn.sender());
        handler.on_disconnected().await;
        assert_eq!(recorder.disconnects(), 1);
        conn.close();
    }
}
