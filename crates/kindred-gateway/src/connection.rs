use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use kindred_types::events::{Envelope, user_topic};
use kindred_types::models::UserId;
use kindred_types::stomp::{Command, Frame, HEARTBEAT, HEARTBEAT_GRACE, HeartBeat};

use crate::codec::decode_envelope;
use crate::router::EventRouter;
use crate::socket::{Dialer, FrameSink, FrameStream};

/// Source of the signed-in user, read once per session.
///
/// A session opened while this returns `None` stays connected but subscribes
/// to nothing.
pub trait Identity: Send + Sync + 'static {
    fn current_user_id(&self) -> Option<UserId>;
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How often we offer to send heart-beats.
    pub heartbeat_outgoing: Duration,
    /// How often we ask the server to send heart-beats.
    pub heartbeat_incoming: Duration,
    /// Fixed pause between a lost session and the next dial.
    pub reconnect_delay: Duration,
    /// Upper bound on dial plus CONNECT/CONNECTED.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_outgoing: Duration::from_millis(1000),
            heartbeat_incoming: Duration::from_millis(1000),
            reconnect_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionConfig {
    pub fn heart_beat(&self) -> HeartBeat {
        HeartBeat::new(self.heartbeat_outgoing, self.heartbeat_incoming)
    }
}

/// The live subscription of the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub topic: String,
    pub user_id: UserId,
}

/// Why a single session ended.
#[derive(Debug)]
enum SessionExit {
    /// Closed on request. Do not reconnect.
    Closed,
    /// Dropped by the network, the server, or a heart-beat timeout.
    Lost(String),
}

// -- Connection --

/// Push connection manager.
///
/// Owns at most one session at a time. A session dials, performs the STOMP
/// handshake, subscribes to `/topic/{userId}` and queues every MESSAGE for
/// the [`EventRouter`]. Handlers run in order on a separate task, so a slow
/// handler never delays heart-beats or reads. Lost sessions are redialed after a fixed delay until
/// [`Connection::close`] is called or the connection is dropped.
pub struct Connection<C> {
    shared: Arc<Shared<C>>,
    session: Mutex<Option<SessionHandle>>,
}

struct Shared<C> {
    dialer: Box<dyn Dialer>,
    router: Arc<EventRouter<C>>,
    context: C,
    config: ConnectionConfig,
    open: AtomicBool,
    subscription: RwLock<Option<Subscription>>,
}

struct SessionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Push session task ended abnormally: {}", e);
        }
    }
}

impl<C> Connection<C>
where
    C: Identity + Clone,
{
    pub fn new(dialer: impl Dialer, context: C, config: ConnectionConfig) -> Self {
        Self::with_router(dialer, Arc::new(EventRouter::new()), context, config)
    }

    /// Build around an existing router, e.g. one shared with other screens.
    pub fn with_router(
        dialer: impl Dialer,
        router: Arc<EventRouter<C>>,
        context: C,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                dialer: Box::new(dialer),
                router,
                context,
                config,
                open: AtomicBool::new(false),
                subscription: RwLock::new(None),
            }),
            session: Mutex::new(None),
        }
    }

    pub fn router(&self) -> &Arc<EventRouter<C>> {
        &self.shared.router
    }

    /// Start a session. Any session already running is closed first, so at
    /// most one subscription is ever live.
    pub async fn connect(&self) {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            debug!("Closing previous push session before connecting");
            previous.shutdown().await;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_session_loop(self.shared.clone(), cancel.clone()));
        *session = Some(SessionHandle { cancel, task });
    }

    /// Tear down and redial immediately, picking up a changed identity.
    pub async fn reconnect(&self) {
        self.connect().await;
    }

    /// Send DISCONNECT, drop the socket and stop reconnecting.
    pub async fn close(&self) {
        if let Some(previous) = self.session.lock().await.take() {
            previous.shutdown().await;
        }
    }

    /// Whether a session has completed its handshake and is still up.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    pub fn subscription(&self) -> Option<Subscription> {
        self.shared.subscription()
    }
}

impl<C> Drop for Connection<C> {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

impl<C> Shared<C> {
    fn subscription(&self) -> Option<Subscription> {
        self.subscription
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_subscription(&self, subscription: Option<Subscription>) {
        *self.subscription.write().unwrap_or_else(PoisonError::into_inner) = subscription;
    }

    fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }
}

// -- Session loop --

async fn run_session_loop<C>(shared: Arc<Shared<C>>, cancel: CancellationToken)
where
    C: Identity + Clone,
{
    let (events, queue) = mpsc::unbounded_channel();
    tokio::spawn(run_dispatcher(shared.clone(), queue, cancel.clone()));

    loop {
        let exit = run_session(&shared, &cancel, &events).await;

        shared.set_open(false);
        shared.set_subscription(None);

        match exit {
            SessionExit::Closed => break,
            SessionExit::Lost(reason) => {
                let delay = shared.config.reconnect_delay;
                warn!("Push session lost: {}. Reconnecting in {}ms", reason, delay.as_millis());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    info!("Push connection closed");
}

/// Runs handlers one envelope at a time, in arrival order, across reconnects.
async fn run_dispatcher<C>(
    shared: Arc<Shared<C>>,
    mut queue: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
) where
    C: Identity + Clone,
{
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            envelope = queue.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        shared
            .router
            .dispatch(&envelope.event_type, envelope.payload, shared.context.clone())
            .await;
    }

    debug!("Push dispatcher stopped");
}

async fn run_session<C>(
    shared: &Shared<C>,
    cancel: &CancellationToken,
    events: &mpsc::UnboundedSender<Envelope>,
) -> SessionExit
where
    C: Identity + Clone,
{
    let config = &shared.config;

    let handshake = async {
        let (mut sink, mut stream) = shared.dialer.dial().await.map_err(|e| format!("dial failed: {:#}", e))?;

        let connect = Frame::connect(&shared.dialer.host(), config.heart_beat());
        sink.send(connect.encode())
            .await
            .map_err(|e| format!("CONNECT failed: {:#}", e))?;

        let connected = wait_for_connected(&mut stream).await?;
        Ok::<_, String>((sink, stream, connected))
    };

    let (mut sink, mut stream, connected) =
        match or_cancelled(cancel, tokio::time::timeout(config.connect_timeout, handshake)).await {
            None => return SessionExit::Closed,
            Some(Err(_)) => return SessionExit::Lost("handshake timed out".to_string()),
            Some(Ok(Err(reason))) => return SessionExit::Lost(reason),
            Some(Ok(Ok(parts))) => parts,
        };

    let server_beat = HeartBeat::parse(connected.get("heart-beat").unwrap_or("0,0"));
    let (send_every, expect_every) = config.heart_beat().negotiate(&server_beat);
    debug!(
        "Push heart-beat negotiated: send every {}ms, expect every {}ms",
        send_every.as_millis(),
        expect_every.as_millis()
    );

    match shared.context.current_user_id() {
        Some(user_id) => {
            let subscription = Subscription {
                id: format!("sub-{}", user_id),
                topic: user_topic(user_id),
                user_id,
            };
            let frame = Frame::subscribe(&subscription.id, &subscription.topic);
            if let Err(e) = sink.send(frame.encode()).await {
                return SessionExit::Lost(format!("SUBSCRIBE failed: {:#}", e));
            }
            info!("Push session open, subscribed to {}", subscription.topic);
            shared.set_subscription(Some(subscription));
        }
        None => warn!("Push session open without a signed-in user, not subscribing"),
    }
    shared.set_open(true);

    let mut heartbeat = (!send_every.is_zero()).then(|| {
        let mut interval = tokio::time::interval_at(Instant::now() + send_every, send_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let stale_after = expect_every * HEARTBEAT_GRACE;
    let mut last_received = Instant::now();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                disconnect(&mut sink).await;
                return SessionExit::Closed;
            }

            msg = stream.next() => match msg {
                Some(Ok(text)) => {
                    last_received = Instant::now();
                    if let Some(exit) = handle_text(&text, events) {
                        return exit;
                    }
                }
                Some(Err(e)) => return SessionExit::Lost(format!("{:#}", e)),
                None => return SessionExit::Lost("socket closed by server".to_string()),
            },

            _ = tick(&mut heartbeat) => {
                if let Err(e) = sink.send(HEARTBEAT.to_string()).await {
                    return SessionExit::Lost(format!("heart-beat send failed: {:#}", e));
                }
            }

            _ = tokio::time::sleep_until(last_received + stale_after), if !stale_after.is_zero() => {
                return SessionExit::Lost(format!("no data from server for {}ms", stale_after.as_millis()));
            }
        }
    }
}

/// Read until CONNECTED. An ERROR frame or a closed socket fails the handshake.
async fn wait_for_connected(stream: &mut FrameStream) -> Result<Frame, String> {
    while let Some(msg) = stream.next().await {
        let text = msg.map_err(|e| format!("{:#}", e))?;
        match Frame::decode(&text) {
            Ok(Some(frame)) if frame.command == Command::Connected => return Ok(frame),
            Ok(Some(frame)) if frame.command == Command::Error => {
                return Err(format!(
                    "server refused CONNECT: {}",
                    frame.get("message").unwrap_or(frame.body.as_str())
                ));
            }
            Ok(Some(frame)) => debug!("Ignoring {} frame during handshake", frame.command),
            Ok(None) => {}
            Err(e) => warn!("Undecodable frame during handshake: {}", e),
        }
    }
    Err("socket closed during handshake".to_string())
}

/// Returns an exit when the frame ends the session.
fn handle_text(text: &str, events: &mpsc::UnboundedSender<Envelope>) -> Option<SessionExit> {
    let frame = match Frame::decode(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            trace!("Push heart-beat received");
            return None;
        }
        Err(e) => {
            warn!("Dropping undecodable push frame: {}", e);
            return None;
        }
    };

    match frame.command {
        Command::Message => {
            handle_message(&frame, events);
            None
        }
        Command::Error => Some(SessionExit::Lost(format!(
            "server error: {}",
            frame.get("message").unwrap_or(frame.body.as_str())
        ))),
        other => {
            debug!("Ignoring {} frame", other);
            None
        }
    }
}

fn handle_message(frame: &Frame, events: &mpsc::UnboundedSender<Envelope>) {
    let envelope = match decode_envelope(&frame.body) {
        Ok(envelope) => envelope,
        Err(e) => {
            let preview: String = frame.body.chars().take(200).collect();
            warn!("Dropping push message ({}): {}", e, preview);
            return;
        }
    };

    debug!("Push event {} on {}", envelope.event_type, frame.get("destination").unwrap_or("?"));
    if events.send(envelope).is_err() {
        debug!("Push dispatcher gone, dropping event");
    }
}

async fn disconnect(sink: &mut FrameSink) {
    let frame = Frame::new(Command::Disconnect).encode();
    let sent = tokio::time::timeout(Duration::from_secs(1), async {
        sink.send(frame).await?;
        sink.close().await
    })
    .await;

    if !matches!(sent, Ok(Ok(()))) {
        debug!("DISCONNECT not delivered, dropping socket");
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn or_cancelled<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        value = fut => Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_push_endpoint() {
        let config = ConnectionConfig::default();
        assert_eq!(config.heart_beat().to_string(), "1000,1000");
        assert_eq!(config.reconnect_delay, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_without_interval_never_fires() {
        let mut none: Option<Interval> = None;
        let fired = tokio::time::timeout(Duration::from_secs(60), tick(&mut none)).await;
        assert!(fired.is_err());
    }
}
