//! WebSocket transport built on `tokio-tungstenite`.
//!
//! After the upgrade succeeds the socket is split and bridged to the
//! engine by two background tasks: a writer draining the outbound channel
//! and a reader forwarding frames and the final close as signals.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

use crate::error::CogsError;
use crate::network::transport::{
    ConnectRequest, Outbound, SIGNAL_BUFFER, Transport, TransportLink, TransportSignal,
};

/// Dials the service over `ws://` or `wss://`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, CogsError> {
        let mut upgrade = request.url.as_str().into_client_request()?;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CogsError::Transport(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| CogsError::Transport(e.to_string()))?;
            upgrade.headers_mut().insert(name, value);
        }

        let (stream, response) = tokio::time::timeout(request.timeout, connect_async(upgrade))
            .await
            .map_err(|_| CogsError::Timeout(request.timeout))??;
        debug!(url = %request.url, status = %response.status(), "websocket opened");

        let (mut net_writer, mut net_reader) = stream.split();

        // Engine -> Network
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

        // Network -> Engine
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        signal_tx.send(TransportSignal::Opened).await?;

        // Writer task: Engine -> Network
        tokio::spawn(async move {
            while let Some(out) = outbound_rx.recv().await {
                match out {
                    Outbound::Frame(text) => {
                        if let Err(e) = net_writer.send(Message::text(text)).await {
                            warn!("websocket write error: {e}");
                            break;
                        }
                    }
                    Outbound::Close => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        let _ = net_writer.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
            let _ = net_writer.close().await;
        });

        // Reader task: Network -> Engine
        tokio::spawn(async move {
            let closed = loop {
                let signal = match net_reader.next().await {
                    Some(Ok(Message::Text(text))) => TransportSignal::Frame(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportSignal::Frame(text),
                        Err(e) => TransportSignal::Error(format!("non-utf8 binary frame: {e}")),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break TransportSignal::Closed(frame.map(|f| u16::from(f.code)));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        // Stop on protocol or I/O errors.
                        let _ = signal_tx.send(TransportSignal::Error(e.to_string())).await;
                        break TransportSignal::Closed(None);
                    }
                    None => break TransportSignal::Closed(None),
                };
                if signal_tx.send(signal).await.is_err() {
                    // Engine dropped the link, stop reading.
                    return;
                }
            };
            let _ = signal_tx.send(closed).await;
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            signals: signal_rx,
        })
    }
}
