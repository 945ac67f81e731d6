//! Connection and request options.

use std::time::Duration;

/// Default service endpoint.
pub const DEFAULT_URL: &str = "wss://api.cogswell.io/pubsub";

/// Per-connection settings. Replaced wholesale between connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// WebSocket endpoint.
    pub url: String,
    /// Upper bound on the transport handshake.
    pub connect_timeout: Duration,
    /// Reconnect after an abnormal close.
    pub auto_reconnect: bool,
    /// Delay before a reconnect attempt.
    pub reconnect_delay: Duration,
    /// Emit every inbound frame as a `RawRecord` event before routing it.
    pub raw_records: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.into(),
            connect_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            raw_records: false,
        }
    }
}

impl ConnectionOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Bounds on outstanding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Maximum number of requests awaiting a reply.
    pub max_pending: usize,
    /// Age at which an unanswered request fails with `RequestTimeout`.
    pub request_timeout: Duration,
    /// How often outstanding requests are checked for expiry.
    pub sweep_interval: Duration,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_pending: 10_000,
            request_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl RequestLimits {
    /// Shortest sweep period and request timeout the engine runs with.
    pub const MIN_PERIOD: Duration = Duration::from_millis(1);

    /// Clamp to limits the engine can run with.
    ///
    /// At least one request may be pending (the handshake needs a slot),
    /// the timeout is non-zero, and the sweep runs at least once per
    /// request timeout.
    pub fn normalized(self) -> Self {
        let request_timeout = self.request_timeout.max(Self::MIN_PERIOD);
        Self {
            max_pending: self.max_pending.max(1),
            request_timeout,
            sweep_interval: self
                .sweep_interval
                .min(request_timeout)
                .max(Self::MIN_PERIOD),
        }
    }
}
