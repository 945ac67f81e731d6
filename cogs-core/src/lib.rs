//! # cogs-core
//!
//! Connection, session and protocol engine for the Cogs pub/sub service.
//!
//! This crate contains:
//! - **Auth**: `authenticate` derives handshake credentials from a `CommandKeys` triple
//! - **Commands**: `Action` and the sequencing `CommandEncoder`
//! - **Dialect**: `classify` turns an inbound frame into a typed `Response`
//! - **State**: `ConnectionPhase` lifecycle and the `CorrelationTable` of pending requests
//! - **Network**: the `Transport` seam and a `tokio-tungstenite` `WebSocketTransport`
//! - **Client**: `PubSubClient`, which ties it all together and raises `ClientEvent`s
//! - **Error**: `CogsError`, a typed, `thiserror`-based error hierarchy

pub mod auth;
pub mod client;
pub mod command;
pub mod dialect;
pub mod error;
pub mod event;
pub mod network;
pub mod options;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use auth::{CommandKeys, Credentials, authenticate};
pub use client::{PubSubClient, Reply};
pub use command::{Action, CommandEncoder, EncodedCommand};
pub use dialect::{
    PubSubMessage, PublishAck, Response, ServiceError, SessionIdentity, SubscriptionList, classify,
};
pub use error::{CogsError, NORMAL_CLOSURE};
pub use event::{ClientEvent, EventStream};
pub use network::{
    ConnectRequest, Outbound, Transport, TransportLink, TransportSignal, WebSocketTransport,
};
pub use options::{ConnectionOptions, RequestLimits};
pub use state::{ConnectionPhase, Continuation, CorrelationTable, PendingRequest};
