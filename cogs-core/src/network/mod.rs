pub mod transport;
pub mod websocket;

pub use transport::{ConnectRequest, Outbound, Transport, TransportLink, TransportSignal};
pub use websocket::WebSocketTransport;
