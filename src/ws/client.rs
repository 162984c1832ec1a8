use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::connection::{
    self, ConnectionState, DISCONNECT_REASON, Heartbeat, SessionEnd, SessionHandler,
};
use super::error::WsError;
use super::events::{Event, EventKind, ListenerId, Listeners};
use super::router::{RoutedMessage, Router};
use super::subscription::SubscriptionTracker;
use super::transport::{NORMAL_CLOSURE, Outbound, Transport, TungsteniteTransport};
use super::types::request::Request;
use super::types::response::{AuthResponse, Envelope, ServerMessage};
use crate::Result;
use crate::auth::Credentials;
use crate::error::Error;

/// Authenticated streaming client for the eToro WebSocket API.
///
/// One client owns at most one live connection. [`Client::connect`] opens it and performs the
/// `Authenticate` handshake; afterwards data frames are routed by topic and dispatched to the
/// listeners registered with [`Client::on`]/[`Client::once`], or consumed as a stream with
/// [`Client::events`].
///
/// When an authenticated connection drops without [`Client::disconnect`] being called, the
/// client reconnects with exponential backoff and replays every tracked subscription.
///
/// # Examples
///
/// ```rust,no_run
/// use etoro_client_sdk::auth::Credentials;
/// use etoro_client_sdk::ws::config::Config;
/// use etoro_client_sdk::ws::{Client, Event, EventKind};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let credentials = Credentials::new("api-key".to_owned(), "user-key".to_owned());
///     let client = Client::new("wss://ws.etoro.com/ws", credentials, Config::default())?;
///
///     client.on(EventKind::InstrumentRate, |event| {
///         if let Event::InstrumentRate { instrument_id, rate } = event {
///             println!("{instrument_id}: {} / {}", rate.bid, rate.ask);
///         }
///     });
///
///     client.connect().await?;
///     client.subscribe(&["instrument:1001", "private"], true)?;
///
///     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

struct ClientInner {
    endpoint: String,
    config: Config,
    credentials: Credentials,
    transport: Arc<dyn Transport>,
    router: Router,
    listeners: Arc<Listeners>,
    subscriptions: Mutex<SubscriptionTracker>,
    /// The live connection, if any
    session: Mutex<Option<Session>>,
    next_generation: AtomicU64,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    /// Cancelled by `disconnect`, by the next `connect` and on drop. Every session and
    /// reconnect loop started under a token stops with it.
    lifecycle: Mutex<CancellationToken>,
    pending_auth: Mutex<Option<PendingAuth>>,
    state_tx: watch::Sender<ConnectionState>,
    authenticated: AtomicBool,
    intentional_close: AtomicBool,
    last_pong: Mutex<Option<Instant>>,
}

struct Session {
    generation: u64,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

struct PendingAuth {
    id: String,
    tx: oneshot::Sender<Result<()>>,
}

impl Client {
    /// Create a client for `endpoint` over `tokio-tungstenite`.
    ///
    /// No connection is opened until [`Client::connect`] is called.
    pub fn new(endpoint: &str, credentials: Credentials, config: Config) -> Result<Self> {
        Self::with_transport(endpoint, credentials, config, TungsteniteTransport)
    }

    /// Create a client from the SDK-wide configuration, using its `ws_url` and credentials.
    pub fn from_config(config: &crate::config::Config, ws_config: Config) -> Result<Self> {
        Self::new(&config.ws_url, config.credentials.clone(), ws_config)
    }

    /// Create a client that opens its connections through `transport`.
    pub fn with_transport<T: Transport>(
        endpoint: &str,
        credentials: Credentials,
        config: Config,
        transport: T,
    ) -> Result<Self> {
        Url::parse(endpoint)?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint: endpoint.to_owned(),
                config,
                credentials,
                transport: Arc::new(transport),
                router: Router::default(),
                listeners: Arc::new(Listeners::default()),
                subscriptions: Mutex::new(SubscriptionTracker::new()),
                session: Mutex::new(None),
                next_generation: AtomicU64::new(0),
                reconnect_task: Mutex::new(None),
                lifecycle: Mutex::new(CancellationToken::new()),
                pending_auth: Mutex::new(None),
                state_tx,
                authenticated: AtomicBool::new(false),
                intentional_close: AtomicBool::new(false),
                last_pong: Mutex::new(None),
            }),
        })
    }

    /// Replace the message router, e.g. to plug in a different payload codec.
    ///
    /// Returns an error if there are other references to this client (e.g., from clones).
    pub fn with_router(mut self, router: Router) -> Result<Self> {
        let inner = Arc::get_mut(&mut self.inner).ok_or(Error::validation(
            "Cannot replace the router while other references to this client exist",
        ))?;
        inner.router = router;
        Ok(self)
    }

    /// Open the connection and authenticate.
    ///
    /// Resolves once the server accepted the credentials. Rejection and
    /// [`Config::auth_timeout`] expiry fail this call; neither is retried. Calling `connect` on a
    /// connected client replaces the connection.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.intentional_close.store(false, Ordering::Release);

        let lifecycle = inner.renew_lifecycle();
        inner.stop_reconnect().await;
        inner.teardown_session().await;
        inner.authenticated.store(false, Ordering::Release);

        inner.establish(&lifecycle).await
    }

    /// Close the connection with a normal-closure frame and forget every subscription.
    ///
    /// Never triggers a reconnect, and cancels one that is already waiting. Safe to call in any
    /// state, any number of times.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.intentional_close.store(true, Ordering::Release);
        lock(&inner.lifecycle).cancel();

        if inner.connection_state() != ConnectionState::Disconnected {
            inner.set_state(ConnectionState::Closing);
        }

        inner.stop_reconnect().await;
        inner.teardown_session().await;

        _ = lock(&inner.pending_auth).take();
        inner.authenticated.store(false, Ordering::Release);
        lock(&inner.subscriptions).clear();
        inner.set_state(ConnectionState::Disconnected);

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %inner.endpoint, "WebSocket disconnected");
    }

    /// Subscribe to `topics` (e.g. `instrument:1001`, `private`).
    ///
    /// The topics are tracked even when sending fails, so they are replayed after the next
    /// (re)connect. With `snapshot` the server first pushes the current value of each topic.
    /// An empty list is a no-op.
    pub fn subscribe<T: AsRef<str>>(&self, topics: &[T], snapshot: bool) -> Result<()> {
        if topics.is_empty() {
            return Ok(());
        }

        let topics: Vec<String> = topics.iter().map(|t| t.as_ref().to_owned()).collect();
        lock(&self.inner.subscriptions).add(topics.iter().cloned());

        #[cfg(feature = "tracing")]
        tracing::debug!(?topics, snapshot, "Subscribing");

        self.inner.send(&Request::subscribe(topics, snapshot))
    }

    /// Unsubscribe from `topics`. An empty list is a no-op.
    pub fn unsubscribe<T: AsRef<str>>(&self, topics: &[T]) -> Result<()> {
        if topics.is_empty() {
            return Ok(());
        }

        let topics: Vec<String> = topics.iter().map(|t| t.as_ref().to_owned()).collect();
        lock(&self.inner.subscriptions).remove(&topics);

        #[cfg(feature = "tracing")]
        tracing::debug!(?topics, "Unsubscribing");

        self.inner.send(&Request::unsubscribe(topics))
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.session)
            .as_ref()
            .is_some_and(|session| !session.outbound.is_closed())
    }

    /// Whether the current connection completed the `Authenticate` handshake.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::Acquire)
    }

    /// Topics currently tracked for replay.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.inner.subscriptions).all()
    }

    /// Register `handler` for every event of `kind`.
    ///
    /// Handlers run on the receive loop, in registration order; a slow handler delays every
    /// message behind it.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.on(kind, handler)
    }

    /// Register `handler` for the next event of `kind` only.
    pub fn once<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.once(kind, handler)
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.listeners.off(kind, id)
    }

    /// Remove every listener for `kind`, or all listeners when `kind` is `None`.
    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        self.inner.listeners.remove_all(kind);
    }

    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.listeners.count(kind)
    }

    /// Stream of every event of `kind` emitted from now on.
    ///
    /// The backing listener is removed when the stream is dropped.
    pub fn events(&self, kind: EventKind) -> impl Stream<Item = Event> + use<> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.inner.listeners.on(kind, move |event| {
            _ = tx.send(event.clone());
        });
        let guard = ListenerGuard {
            listeners: Arc::clone(&self.inner.listeners),
            kind,
            id,
        };

        async_stream::stream! {
            let _guard = guard;
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// When the last PONG was received on any connection of this client.
    #[must_use]
    pub fn last_pong_at(&self) -> Option<Instant> {
        *lock(&self.inner.last_pong)
    }
}

impl ClientInner {
    fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        #[cfg(feature = "tracing")]
        tracing::debug!(?state, "WebSocket state changed");
        self.state_tx.send_replace(state);
    }

    /// Cancel the current lifecycle and start a new one.
    fn renew_lifecycle(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *lock(&self.lifecycle), token.clone());
        previous.cancel();
        token
    }

    /// Runs `f` unless `lifecycle` was cancelled and reports whether it ran.
    ///
    /// `disconnect` cancels while holding the same lock, so nothing `f` does can land after it.
    fn while_live<F: FnOnce()>(&self, lifecycle: &CancellationToken, f: F) -> bool {
        let _current = lock(&self.lifecycle);
        if lifecycle.is_cancelled() {
            return false;
        }
        f();
        true
    }

    async fn stop_reconnect(&self) {
        let task = lock(&self.reconnect_task).take();
        if let Some(task) = task {
            task.abort();
            _ = task.await;
        }
    }

    /// Close the live session, if any, and wait for its loop to finish.
    async fn teardown_session(&self) {
        let session = lock(&self.session).take();
        if let Some(Session {
            cancel,
            outbound,
            task,
            ..
        }) = session
        {
            cancel.cancel();
            drop(outbound);
            _ = task.await;
        }
    }

    /// Open a connection, start its receive loop and authenticate.
    async fn establish(self: &Arc<Self>, lifecycle: &CancellationToken) -> Result<()> {
        if !self.while_live(lifecycle, || self.set_state(ConnectionState::Connecting)) {
            return Err(WsError::ConnectionClosed.into());
        }

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, "Connecting to WebSocket");

        let (sink, stream) = match self.transport.open(&self.endpoint).await {
            Ok(halves) => halves,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = lifecycle.child_token();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let heartbeat = Heartbeat {
            interval: self.config.heartbeat_interval,
            timeout: self.config.heartbeat_timeout,
        };
        let dispatcher = Dispatcher {
            inner: Arc::downgrade(self),
        };

        // The receive loop must be running before the handshake is sent, or the response is
        // never observed.
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let end =
                    connection::run(sink, stream, outbound_rx, cancel, heartbeat, &dispatcher)
                        .await;
                if let Some(inner) = dispatcher.inner.upgrade() {
                    inner.session_ended(generation, end);
                }
            }
        });

        let mut session = Some(Session {
            generation,
            cancel,
            outbound,
            task,
        });
        self.while_live(lifecycle, || *lock(&self.session) = session.take());
        if let Some(orphan) = session {
            // Disconnected while the transport was opening.
            orphan.cancel.cancel();
            _ = orphan.task.await;
            return Err(WsError::ConnectionClosed.into());
        }

        self.listeners.emit(&Event::Open);
        self.set_state(ConnectionState::Authenticating);

        if let Err(e) = self.authenticate().await {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "WebSocket authentication failed");

            self.teardown_session().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, "WebSocket authenticated");

        Ok(())
    }

    async fn authenticate(&self) -> Result<()> {
        let request = Request::authenticate(&self.credentials);
        let (tx, rx) = oneshot::channel();
        *lock(&self.pending_auth) = Some(PendingAuth {
            id: request.id.clone(),
            tx,
        });

        if let Err(e) = self.send(&request) {
            _ = lock(&self.pending_auth).take();
            return Err(e);
        }

        let outcome = tokio::time::timeout(self.config.auth_timeout, rx).await;
        _ = lock(&self.pending_auth).take();

        match outcome {
            Ok(Ok(result)) => result,
            // The session ended before answering.
            Ok(Err(_closed)) => Err(WsError::ConnectionClosed.into()),
            Err(_elapsed) => Err(WsError::AuthenticationTimeout(self.config.auth_timeout).into()),
        }
    }

    /// Queue a request on the live session.
    fn send(&self, request: &Request) -> Result<()> {
        let text = serde_json::to_string(request)?;

        let session = lock(&self.session);
        let session = session.as_ref().ok_or(WsError::NotConnected)?;
        session
            .outbound
            .send(Outbound::Text(text))
            .map_err(|_e| WsError::NotConnected)?;

        Ok(())
    }

    fn handle_text(&self, text: &str) {
        match ServerMessage::parse(text) {
            Ok(ServerMessage::Authenticate(response)) => self.handle_auth_response(&response),
            Ok(ServerMessage::Data(envelope)) => self.dispatch(envelope),
            Ok(ServerMessage::Other(_)) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(text, "Ignoring unrecognized WebSocket frame");
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Dropping malformed WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    fn handle_auth_response(&self, response: &AuthResponse) {
        let waiter = {
            let mut pending = lock(&self.pending_auth);
            if let (Some(waiting), Some(id)) = (pending.as_ref(), response.id.as_deref())
                && waiting.id != id
            {
                #[cfg(feature = "tracing")]
                tracing::debug!(id, "Ignoring Authenticate response for another request");
                return;
            }
            pending.take()
        };

        if let Some(code) = response.rejection() {
            #[cfg(feature = "tracing")]
            tracing::error!(
                %code,
                message = ?response.error_message,
                "WebSocket authentication rejected"
            );

            let error = Error::from(WsError::AuthenticationFailed { code: code.clone() });
            self.listeners.emit(&Event::Error(Arc::new(error)));
            if let Some(waiter) = waiter {
                _ = waiter
                    .tx
                    .send(Err(WsError::AuthenticationFailed { code }.into()));
            }
            return;
        }

        self.authenticated.store(true, Ordering::Release);
        self.set_state(ConnectionState::Ready {
            since: Instant::now(),
        });
        self.listeners.emit(&Event::Authenticated);
        if let Some(waiter) = waiter {
            _ = waiter.tx.send(Ok(()));
        }
    }

    /// Emit the raw batch, then one event per routed message.
    fn dispatch(&self, envelope: Envelope) {
        let routed = self.router.route(&envelope);
        self.listeners.emit(&Event::Message(Arc::new(envelope)));

        for message in routed {
            match message {
                RoutedMessage::InstrumentRate {
                    instrument_id,
                    rate,
                } => {
                    self.listeners.emit(&Event::InstrumentRate {
                        instrument_id,
                        rate,
                    });
                }
                RoutedMessage::PrivateEvent(event) => {
                    self.listeners.emit(&Event::PrivateEvent(Arc::new(event)));
                }
                RoutedMessage::Unknown(message) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(topic = %message.topic, "Message on unrouted topic");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &message;
                }
            }
        }
    }

    /// Bookkeeping once a session loop returned; schedules a reconnect when the connection of an
    /// authenticated session was lost.
    fn session_ended(self: &Arc<Self>, generation: u64, end: SessionEnd) {
        let (code, reason) = match end {
            // Closed by this client; whoever cancelled it owns the session slot.
            SessionEnd::Cancelled => {
                self.listeners.emit(&Event::Close {
                    code: NORMAL_CLOSURE,
                    reason: DISCONNECT_REASON.to_owned(),
                });
                return;
            }
            SessionEnd::Closed { code, reason } => (code, reason),
        };

        let torn_down = {
            let mut slot = lock(&self.session);
            match slot.as_ref() {
                Some(session) if session.generation == generation => {
                    let cancelled = session.cancel.is_cancelled();
                    _ = slot.take();
                    cancelled
                }
                // Superseded by a newer connection.
                _ => return,
            }
        };

        // Wakes a pending `connect` with `ConnectionClosed`.
        drop(lock(&self.pending_auth).take());
        let was_authenticated = self.authenticated.swap(false, Ordering::AcqRel);

        #[cfg(feature = "tracing")]
        tracing::info!(code, %reason, "WebSocket closed");

        self.listeners.emit(&Event::Close { code, reason });

        if torn_down || self.intentional_close.load(Ordering::Acquire) {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        if !was_authenticated {
            // `connect` is still waiting on this session and reports the failure itself.
            return;
        }

        // Stored under the lifecycle lock: a concurrent `disconnect` either prevents the spawn or
        // finds the task and stops it.
        let lifecycle = lock(&self.lifecycle).clone();
        self.while_live(&lifecycle, || {
            let task = tokio::spawn(reconnect(Arc::downgrade(self), lifecycle.clone()));
            if let Some(previous) = lock(&self.reconnect_task).replace(task) {
                previous.abort();
            }
        });
    }

    /// Resubscribe to every tracked topic in a single request.
    fn replay_subscriptions(&self) {
        let topics = lock(&self.subscriptions).all();
        if topics.is_empty() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(count = topics.len(), "Replaying subscriptions");

        if let Err(e) = self.send(&Request::subscribe(topics, false)) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Failed to replay subscriptions");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

/// Reconnect loop started after an authenticated connection was lost.
///
/// Only holds a weak reference between attempts, so dropping the last [`Client`] ends it.
async fn reconnect(inner: Weak<ClientInner>, lifecycle: CancellationToken) {
    let Some(reconnect) = inner.upgrade().map(|inner| inner.config.reconnect.clone()) else {
        return;
    };
    let max_attempts = reconnect.max_attempts;
    let max_backoff = reconnect.max_backoff;
    let mut backoff: ExponentialBackoff = reconnect.into();
    let mut attempt = 0_u32;

    loop {
        let Some(client) = inner.upgrade() else {
            return;
        };

        if attempt >= max_attempts {
            client.while_live(&lifecycle, || {
                #[cfg(feature = "tracing")]
                tracing::error!(attempts = attempt, "Max reconnect attempts reached, giving up");

                client.set_state(ConnectionState::Disconnected);
                let error = Error::from(WsError::ReconnectExhausted { attempts: attempt });
                client.listeners.emit(&Event::Error(Arc::new(error)));
            });
            return;
        }

        let delay = backoff.next_backoff().unwrap_or(max_backoff);
        attempt += 1;
        if !client.while_live(&lifecycle, || {
            client.set_state(ConnectionState::Reconnecting { attempt });
        }) {
            return;
        }
        drop(client);

        #[cfg(feature = "tracing")]
        tracing::info!(attempt, ?delay, "Reconnecting to WebSocket");

        tokio::select! {
            () = lifecycle.cancelled() => return,
            () = sleep(delay) => {}
        }

        let Some(client) = inner.upgrade() else {
            return;
        };
        match client.establish(&lifecycle).await {
            Ok(()) => {
                client.replay_subscriptions();
                return;
            }
            Err(e) => {
                if lifecycle.is_cancelled() {
                    return;
                }

                #[cfg(feature = "tracing")]
                tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

/// Session handler that forwards into the client without keeping it alive.
struct Dispatcher {
    inner: Weak<ClientInner>,
}

impl SessionHandler for Dispatcher {
    fn on_text(&self, text: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_text(text);
        }
    }

    fn on_pong(&self) {
        if let Some(inner) = self.inner.upgrade() {
            *lock(&inner.last_pong) = Some(Instant::now());
        }
    }

    fn on_error(&self, error: Error) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.emit(&Event::Error(Arc::new(error)));
        }
    }
}

/// Removes the listener backing [`Client::events`] when the stream is dropped.
struct ListenerGuard {
    listeners: Arc<Listeners>,
    kind: EventKind,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.listeners.off(self.kind, self.id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::ws::config::ReconnectConfig;
    use crate::ws::transport::{FrameSink, FrameStream};

    #[derive(Clone, Default)]
    struct CountingTransport {
        opens: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn open(&self, _url: &str) -> Result<(FrameSink, FrameStream)> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(Error::validation("connection refused"))
        }
    }

    fn client(max_attempts: u32, transport: CountingTransport) -> Client {
        let config = Config::default()
            .with_heartbeat(Duration::ZERO, Duration::ZERO)
            .with_reconnect(ReconnectConfig::new(max_attempts, Duration::from_secs(1)));
        let credentials = Credentials::new("api".to_owned(), "user".to_owned());
        Client::with_transport("wss://ws.example.test/ws", credentials, config, transport).unwrap()
    }

    fn cancelled() -> CancellationToken {
        let token = CancellationToken::new();
        token.cancel();
        token
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_disconnect_does_not_touch_state() {
        let transport = CountingTransport::default();
        let client = client(3, transport.clone());

        reconnect(Arc::downgrade(&client.inner), cancelled()).await;

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reconnect_after_disconnect_emits_nothing() {
        let client = client(0, CountingTransport::default());
        let errors = Arc::new(AtomicUsize::new(0));
        client.on(EventKind::Error, {
            let errors = Arc::clone(&errors);
            move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            }
        });

        reconnect(Arc::downgrade(&client.inner), cancelled()).await;

        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn establish_under_cancelled_lifecycle_never_opens() {
        let transport = CountingTransport::default();
        let client = client(3, transport.clone());

        let error = client.inner.establish(&cancelled()).await.unwrap_err();

        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::ConnectionClosed)
        ));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn live_reconnect_counts_attempts_until_exhausted() {
        let transport = CountingTransport::default();
        let client = client(2, transport.clone());
        let errors = Arc::new(AtomicUsize::new(0));
        client.on(EventKind::Error, {
            let errors = Arc::clone(&errors);
            move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            }
        });

        reconnect(Arc::downgrade(&client.inner), CancellationToken::new()).await;

        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }
}
