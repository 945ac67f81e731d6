//! The transport seam between the engine and a duplex text socket.
//!
//! A transport dials an endpoint and hands back a [`TransportLink`]: a
//! sender for outbound frames and a receiver of lifecycle signals. The
//! engine never touches sockets directly.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CogsError;

/// Capacity of the signal channel from transport to engine.
pub const SIGNAL_BUFFER: usize = 100;

/// Everything a transport needs to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// Frames and control requests from engine to transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write one text frame.
    Frame(String),
    /// Close the socket with a normal-closure code.
    Close,
}

/// Lifecycle signals from transport to engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The socket is open and ready for frames.
    Opened,
    /// One inbound text frame.
    Frame(String),
    /// A non-fatal transport error.
    Error(String),
    /// The socket closed, with the peer's close code if one was sent.
    Closed(Option<u16>),
}

/// One live connection, as seen by the engine.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub signals: mpsc::Receiver<TransportSignal>,
}

/// Opens connections to the service.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Dial `request.url` with the handshake headers attached.
    ///
    /// The returned link must emit `Opened` before any `Frame`, and
    /// exactly one `Closed` when the connection ends.
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, CogsError>;
}
