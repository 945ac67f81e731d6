//! Events raised by the client outside any caller's command.

use tokio::sync::mpsc;

use crate::dialect::{PubSubMessage, Response, ServiceError};
use crate::error::CogsError;

/// Something the service or the connection did that no pending request
/// was waiting for.
#[derive(Debug)]
pub enum ClientEvent {
    /// The handshake produced a session id different from the last one.
    NewSession(String),
    /// The handshake restored the previously known session.
    SessionRestored,
    /// An opened connection ended, or `close` was called. `None` for an
    /// intended close. A dial that fails before the transport opens only
    /// raises `TransportError`.
    ConnectionClosed(Option<CogsError>),
    /// The transport, the handshake or frame decoding failed.
    TransportError(CogsError),
    /// An error response that answered no pending request.
    ServiceError(ServiceError),
    /// A message delivered on a subscribed channel.
    Message(PubSubMessage),
    /// Every inbound frame, verbatim, when raw records are enabled.
    RawRecord(String),
    /// A reply whose request already completed or timed out.
    UnmatchedReply(Response),
}

/// Receiving half of the client's event channel.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ClientEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. `None` once every client handle and
    /// background task is gone.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    /// Take an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.rx.try_recv().ok()
    }
}
