//! The pub/sub client engine.
//!
//! `PubSubClient` owns the connection lifecycle:
//!
//! ```text
//!  connect ─► Connecting ─► Authenticating ─► AwaitingHandshake ─► Ready
//!                 (dial with credentials)  (auto session-uuid)   (user commands)
//! ```
//!
//! One driver task per connection attempt reads transport signals,
//! classifies inbound frames, resolves pending requests and sweeps
//! expired ones. All shared state sits behind a single mutex that is
//! never held across an `.await`. Each attempt carries an epoch number so
//! signals from a replaced connection are ignored.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::OptionFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{self, CommandKeys};
use crate::command::{Action, CommandEncoder};
use crate::dialect::{self, Response};
use crate::error::{CogsError, NORMAL_CLOSURE};
use crate::event::{ClientEvent, EventStream};
use crate::network::{
    ConnectRequest, Outbound, Transport, TransportLink, TransportSignal, WebSocketTransport,
};
use crate::options::{ConnectionOptions, RequestLimits};
use crate::state::{ConnectionPhase, CorrelationTable, Outcome};

// ── Reply ────────────────────────────────────────────────────────

/// The eventual outcome of one command.
///
/// Resolves with the reply, a service error, `RequestTimeout`, or
/// `ConnectionClosed`.
#[must_use = "a Reply does nothing unless awaited"]
pub struct Reply<T> {
    seq: u64,
    rx: oneshot::Receiver<Outcome>,
    extract: fn(Response) -> Result<T, CogsError>,
}

impl<T> Reply<T> {
    /// The sequence number the command was sent with.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl<T> std::fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply").field("seq", &self.seq).finish()
    }
}

impl<T> Future for Reply<T> {
    type Output = Result<T, CogsError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(response))) => Poll::Ready((self.extract)(response)),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CogsError::ConnectionClosed)),
        }
    }
}

fn channels(response: Response) -> Result<Vec<String>, CogsError> {
    match response {
        Response::SubscriptionList(list) => Ok(list.channels),
        other => Err(CogsError::UnexpectedResponse {
            expected: "subscription list",
            actual: other.kind(),
        }),
    }
}

fn message_id(response: Response) -> Result<String, CogsError> {
    match response {
        Response::PublishAck(ack) => Ok(ack.message_id),
        other => Err(CogsError::UnexpectedResponse {
            expected: "publish ack",
            actual: other.kind(),
        }),
    }
}

fn session_uuid(response: Response) -> Result<String, CogsError> {
    match response {
        Response::SessionIdentity(identity) => Ok(identity.uuid),
        other => Err(CogsError::UnexpectedResponse {
            expected: "session identity",
            actual: other.kind(),
        }),
    }
}

// ── Shared state ─────────────────────────────────────────────────

struct ClientState {
    phase: ConnectionPhase,
    options: ConnectionOptions,
    session: Option<String>,
    encoder: CommandEncoder,
    pending: CorrelationTable<oneshot::Sender<Outcome>>,
    link: Option<mpsc::UnboundedSender<Outbound>>,
    epoch: u64,
    cancel: CancellationToken,
}

impl ClientState {
    /// Encode `action` and hand it to the transport. Does not check the
    /// phase.
    ///
    /// Commands the service answers are tracked in the table; the
    /// receiver for their outcome is returned with the sequence number.
    fn dispatch(
        &mut self,
        action: &Action,
    ) -> Result<(u64, Option<oneshot::Receiver<Outcome>>), CogsError> {
        let Some(link) = self.link.clone() else {
            return Err(CogsError::NotConnected);
        };
        let tracked = action.expects_reply();
        if tracked && self.pending.len() >= self.pending.capacity() {
            return Err(CogsError::TableFull {
                capacity: self.pending.capacity(),
            });
        }

        let cmd = self.encoder.encode(action)?;
        let receiver = if tracked {
            let (tx, rx) = oneshot::channel();
            self.pending.register(cmd.seq, tx).map_err(|(e, _)| e)?;
            Some(rx)
        } else {
            None
        };

        if link.send(Outbound::Frame(cmd.payload)).is_err() {
            self.pending.resolve(cmd.seq, Err(CogsError::ConnectionClosed));
            return Err(CogsError::ConnectionClosed);
        }
        debug!(seq = cmd.seq, action = %action, "command sent");
        Ok((cmd.seq, receiver))
    }

    fn connect_request(&self, headers: Vec<(String, String)>) -> ConnectRequest {
        ConnectRequest {
            url: self.options.url.clone(),
            headers,
            timeout: self.options.connect_timeout,
        }
    }
}

struct Shared {
    keys: CommandKeys,
    transport: Arc<dyn Transport>,
    limits: RequestLimits,
    events: mpsc::UnboundedSender<ClientEvent>,
    state: Mutex<ClientState>,
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Derive credentials and start a driver for a new epoch. The phase
    /// must already be `Connecting`.
    fn start_attempt(self: &Arc<Self>, state: &mut ClientState) -> Result<(), CogsError> {
        let credentials = auth::authenticate(&self.keys, state.session.as_deref())?;
        state.epoch += 1;
        let epoch = state.epoch;
        let request = state.connect_request(credentials.headers());
        let cancel = state.cancel.clone();
        debug!(epoch, url = %request.url, "connection attempt");
        tokio::spawn(drive(Arc::clone(self), epoch, request, cancel));
        Ok(())
    }

    fn enter_authenticating(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        state.epoch == epoch && state.phase.begin_authenticate().is_ok()
    }

    fn attach(&self, epoch: u64, outbound: mpsc::UnboundedSender<Outbound>) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        state.link = Some(outbound);
        true
    }

    fn begin_handshake(&self, epoch: u64) -> Result<oneshot::Receiver<Outcome>, CogsError> {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return Err(CogsError::ConnectionClosed);
        }
        state.phase.begin_handshake()?;
        let (seq, Some(rx)) = state.dispatch(&Action::SessionUuid)? else {
            return Err(CogsError::ProtocolViolation("handshake sent untracked"));
        };
        debug!(seq, "handshake sent");
        Ok(rx)
    }

    /// Returns `false` when the handshake failed and the connection
    /// must be torn down.
    fn finish_handshake(&self, epoch: u64, outcome: Outcome) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        let identity = match outcome {
            Ok(Response::SessionIdentity(identity)) => identity,
            Ok(other) => {
                self.emit(ClientEvent::TransportError(CogsError::HandshakeFailed(
                    format!("unexpected {} reply", other.kind()),
                )));
                return false;
            }
            Err(e) => {
                self.emit(ClientEvent::TransportError(CogsError::HandshakeFailed(
                    e.to_string(),
                )));
                return false;
            }
        };
        if let Err(e) = state.phase.complete_handshake() {
            warn!("handshake reply in phase {}: {e}", state.phase);
            return false;
        }

        if state.session.as_deref() == Some(identity.uuid.as_str()) {
            info!(session = %identity.uuid, "session restored");
            self.emit(ClientEvent::SessionRestored);
        } else {
            info!(session = %identity.uuid, "new session");
            state.session = Some(identity.uuid.clone());
            self.emit(ClientEvent::NewSession(identity.uuid));
        }
        true
    }

    fn on_frame(&self, epoch: u64, raw: &str) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return;
        }
        if state.options.raw_records {
            self.emit(ClientEvent::RawRecord(raw.to_owned()));
        }

        let response = match dialect::classify(raw) {
            Ok(response) => response,
            Err(CogsError::UnrecognizedFrame) => {
                debug!("ignoring unrecognized frame");
                return;
            }
            Err(e) => {
                warn!("dropping inbound frame: {e}");
                self.emit(ClientEvent::TransportError(e));
                return;
            }
        };

        if let Response::SessionIdentity(identity) = &response {
            if state.phase.is_ready() && state.session.as_deref() != Some(identity.uuid.as_str()) {
                state.session = Some(identity.uuid.clone());
                self.emit(ClientEvent::NewSession(identity.uuid.clone()));
            }
        }

        if let Some(seq) = response.seq() {
            if state.pending.contains(seq) {
                let outcome = match response {
                    Response::ServiceError(e) => Err(e.into()),
                    other => Ok(other),
                };
                state.pending.resolve(seq, outcome);
                return;
            }
        }

        match response {
            Response::Message(message) => self.emit(ClientEvent::Message(message)),
            Response::ServiceError(e) => self.emit(ClientEvent::ServiceError(e)),
            // Session changes were raised above.
            Response::SessionIdentity(_) if state.phase.is_ready() => {}
            other => {
                debug!(seq = ?other.seq(), kind = other.kind(), "reply without pending request");
                self.emit(ClientEvent::UnmatchedReply(other));
            }
        }
    }

    fn sweep(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return;
        }
        let evicted = state.pending.sweep(self.limits.request_timeout);
        if evicted > 0 {
            debug!(evicted, "expired pending requests");
        }
    }

    /// The connection for `epoch` is gone. A close code of 1000 is
    /// treated as intended; anything else may trigger a reconnect.
    fn on_transport_lost(self: &Arc<Self>, epoch: u64, code: Option<u16>) {
        let mut state = self.state.lock();
        if state.epoch != epoch || state.phase.is_closed() {
            return;
        }
        if let Some(link) = state.link.take() {
            let _ = link.send(Outbound::Close);
        }
        let failed = state.pending.fail_all(|| CogsError::ConnectionClosed);
        let _ = state.phase.lose_transport();
        debug!(epoch, ?code, failed, "transport lost");

        if code == Some(NORMAL_CLOSURE) {
            self.emit(ClientEvent::ConnectionClosed(None));
            return;
        }
        self.emit(ClientEvent::ConnectionClosed(Some(CogsError::AbnormalClose {
            code,
        })));
        self.schedule_reconnect(&mut state, epoch);
    }

    /// The dial for `epoch` failed before a connection existed. Only the
    /// error is reported; there was no connection to close.
    fn on_dial_failed(self: &Arc<Self>, epoch: u64, err: CogsError) {
        let mut state = self.state.lock();
        if state.epoch != epoch || state.phase.is_closed() {
            return;
        }
        warn!("connect failed: {err}");
        let _ = state.phase.lose_transport();
        self.emit(ClientEvent::TransportError(err));
        self.schedule_reconnect(&mut state, epoch);
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ClientState, epoch: u64) {
        if state.options.auto_reconnect && state.phase.begin_reconnect().is_ok() {
            let delay = state.options.reconnect_delay;
            warn!(?delay, "scheduling reconnect");
            tokio::spawn(reconnect_after(
                Arc::clone(self),
                epoch,
                delay,
                state.cancel.clone(),
            ));
        }
    }

    fn resume(self: &Arc<Self>, epoch: u64) {
        let mut state = self.state.lock();
        if state.epoch != epoch || state.phase.resume_connect().is_err() {
            return;
        }
        if let Err(e) = self.start_attempt(&mut state) {
            let _ = state.phase.lose_transport();
            self.emit(ClientEvent::TransportError(e));
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn reconnect_after(
    shared: Arc<Shared>,
    epoch: u64,
    delay: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }
    shared.resume(epoch);
}

async fn drive(
    shared: Arc<Shared>,
    epoch: u64,
    request: ConnectRequest,
    cancel: CancellationToken,
) {
    if !shared.enter_authenticating(epoch) {
        return;
    }

    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = shared.transport.connect(request) => result,
    };
    let TransportLink {
        outbound,
        mut signals,
    } = match connected {
        Ok(link) => link,
        Err(e) => {
            shared.on_dial_failed(epoch, e);
            return;
        }
    };
    if !shared.attach(epoch, outbound.clone()) {
        let _ = outbound.send(Outbound::Close);
        return;
    }
    drop(outbound);

    let mut sweep = tokio::time::interval(shared.limits.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut handshake: Option<oneshot::Receiver<Outcome>> = None;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return,

            Some(received) = OptionFuture::from(handshake.as_mut()), if handshake.is_some() => {
                handshake = None;
                let outcome = received.unwrap_or(Err(CogsError::ConnectionClosed));
                if !shared.finish_handshake(epoch, outcome) {
                    shared.on_transport_lost(epoch, None);
                    return;
                }
            }

            signal = signals.recv() => match signal {
                Some(TransportSignal::Opened) => match shared.begin_handshake(epoch) {
                    Ok(rx) => handshake = Some(rx),
                    Err(e) => {
                        shared.emit(ClientEvent::TransportError(CogsError::HandshakeFailed(
                            e.to_string(),
                        )));
                        shared.on_transport_lost(epoch, None);
                        return;
                    }
                },
                Some(TransportSignal::Frame(raw)) => shared.on_frame(epoch, &raw),
                Some(TransportSignal::Error(e)) => {
                    shared.emit(ClientEvent::TransportError(CogsError::Transport(e)));
                }
                Some(TransportSignal::Closed(code)) => {
                    shared.on_transport_lost(epoch, code);
                    return;
                }
                None => {
                    shared.on_transport_lost(epoch, None);
                    return;
                }
            },

            _ = sweep.tick() => shared.sweep(epoch),
        }
    }
}

// ── PubSubClient ─────────────────────────────────────────────────

/// Handle to one pub/sub connection. Cheap to clone; all clones drive
/// the same connection.
///
/// Background tasks hold the engine alive until [`close`](Self::close)
/// is called.
#[derive(Clone)]
pub struct PubSubClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PubSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("PubSubClient")
            .field("phase", &state.phase)
            .field("session", &state.session)
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl PubSubClient {
    /// Create a client over `transport` with default request limits.
    pub fn new(
        keys: CommandKeys,
        options: ConnectionOptions,
        transport: impl Transport,
    ) -> (Self, EventStream) {
        Self::with_limits(keys, options, RequestLimits::default(), transport)
    }

    /// Create a client that talks to the service over a WebSocket.
    pub fn websocket(keys: CommandKeys, options: ConnectionOptions) -> (Self, EventStream) {
        Self::new(keys, options, WebSocketTransport::new())
    }

    /// Create a client with explicit request limits. Limits the engine
    /// cannot run with are clamped, see [`RequestLimits::normalized`].
    pub fn with_limits(
        keys: CommandKeys,
        options: ConnectionOptions,
        limits: RequestLimits,
        transport: impl Transport,
    ) -> (Self, EventStream) {
        let normalized = limits.normalized();
        if normalized != limits {
            warn!(?limits, ?normalized, "request limits adjusted");
        }
        let limits = normalized;
        let (events, rx) = mpsc::unbounded_channel();
        let state = ClientState {
            phase: ConnectionPhase::default(),
            options,
            session: None,
            encoder: CommandEncoder::new(),
            pending: CorrelationTable::new(limits.max_pending),
            link: None,
            epoch: 0,
            cancel: CancellationToken::new(),
        };
        let shared = Arc::new(Shared {
            keys,
            transport: Arc::new(transport),
            limits,
            events,
            state: Mutex::new(state),
        });
        (Self { shared }, EventStream::new(rx))
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Start connecting, asking the service to restore `prior_session`
    /// if given.
    ///
    /// Returns immediately; progress is reported through events. Must be
    /// called from within a Tokio runtime.
    pub fn connect(&self, prior_session: Option<String>) -> Result<(), CogsError> {
        let mut state = self.shared.state.lock();
        if !state.phase.can_connect() {
            return Err(CogsError::AlreadyConnecting);
        }
        // Validate keys before touching any state.
        auth::authenticate(&self.shared.keys, prior_session.as_deref())?;

        state.phase.begin_connect()?;
        state.session = prior_session;
        state.cancel = CancellationToken::new();
        if let Err(e) = self.shared.start_attempt(&mut state) {
            state.phase.force_disconnect();
            return Err(e);
        }
        Ok(())
    }

    /// Close the connection. Valid in any phase; later calls do nothing.
    ///
    /// Cancels any pending reconnect and fails outstanding requests with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.phase.close() {
            return;
        }
        state.epoch += 1;
        state.cancel.cancel();
        if let Some(link) = state.link.take() {
            let _ = link.send(Outbound::Close);
        }
        let failed = state.pending.fail_all(|| CogsError::ConnectionClosed);
        info!(failed, "connection closed by caller");
        self.shared.emit(ClientEvent::ConnectionClosed(None));
    }

    // ── Commands ──────────────────────────────────────────────────

    fn request<T>(
        &self,
        action: Action,
        extract: fn(Response) -> Result<T, CogsError>,
    ) -> Result<Reply<T>, CogsError> {
        let mut state = self.shared.state.lock();
        if !state.phase.is_ready() {
            return Err(CogsError::NotConnected);
        }
        let (seq, Some(rx)) = state.dispatch(&action)? else {
            return Err(CogsError::ProtocolViolation("command expects no reply"));
        };
        Ok(Reply { seq, rx, extract })
    }

    /// Subscribe to `channel`. Resolves with the session's channel list.
    pub fn subscribe(&self, channel: impl Into<String>) -> Result<Reply<Vec<String>>, CogsError> {
        self.request(
            Action::Subscribe {
                channel: channel.into(),
            },
            channels,
        )
    }

    /// Unsubscribe from `channel`. Resolves with the remaining channels.
    pub fn unsubscribe(
        &self,
        channel: impl Into<String>,
    ) -> Result<Reply<Vec<String>>, CogsError> {
        self.request(
            Action::Unsubscribe {
                channel: channel.into(),
            },
            channels,
        )
    }

    /// Drop every subscription. Resolves with the channels that were dropped.
    pub fn unsubscribe_all(&self) -> Result<Reply<Vec<String>>, CogsError> {
        self.request(Action::UnsubscribeAll, channels)
    }

    pub fn list_subscriptions(&self) -> Result<Reply<Vec<String>>, CogsError> {
        self.request(Action::Subscriptions, channels)
    }

    /// Publish without acknowledgement.
    ///
    /// Returns the sequence number used. The service only answers on
    /// failure; such errors arrive as `ServiceError` events.
    pub fn publish(
        &self,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<u64, CogsError> {
        let mut state = self.shared.state.lock();
        if !state.phase.is_ready() {
            return Err(CogsError::NotConnected);
        }
        let action = Action::Publish {
            channel: channel.into(),
            message: message.into(),
            ack: false,
        };
        state.dispatch(&action).map(|(seq, _)| seq)
    }

    /// Publish and wait for the service to acknowledge. Resolves with the
    /// message id.
    pub fn publish_with_ack(
        &self,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Reply<String>, CogsError> {
        self.request(
            Action::Publish {
                channel: channel.into(),
                message: message.into(),
                ack: true,
            },
            message_id,
        )
    }

    /// Ask the service for the current session id.
    pub fn session_uuid(&self) -> Result<Reply<String>, CogsError> {
        self.request(Action::SessionUuid, session_uuid)
    }

    // ── Inspection ────────────────────────────────────────────────

    pub fn phase(&self) -> ConnectionPhase {
        self.shared.state.lock().phase.clone()
    }

    /// The last session id confirmed by the service.
    pub fn session_id(&self) -> Option<String> {
        self.shared.state.lock().session.clone()
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn options(&self) -> ConnectionOptions {
        self.shared.state.lock().options.clone()
    }

    /// Replace the connection options. Takes effect on the next connect
    /// or reconnect.
    pub fn set_options(&self, options: ConnectionOptions) {
        self.shared.state.lock().options = options;
    }
}
