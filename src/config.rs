//! Tunables for a signing session.
//!
//! All values have defaults matching the hosted TSS servers; callers only
//! need to override them for local testing or unusual network conditions.

use std::time::Duration;

/// Settings consumed by [`TssClient`](crate::TssClient) and the socket layer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum time a single protocol read waits for its message.
    pub read_timeout: Duration,

    /// Upper bound on how long a blocked waiter sleeps before re-checking
    /// the stores for an abort condition.
    pub poll_interval: Duration,

    /// Timeout applied to every REST call issued to a peer.
    pub http_timeout: Duration,

    /// Normalize `s` to the lower half of the curve order after signing.
    pub s_less_than_half: bool,

    pub socket: SocketConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            http_timeout: Duration::from_secs(10),
            s_less_than_half: true,
            socket: SocketConfig::default(),
        }
    }
}

/// Options handed to a [`SocketConnector`](crate::transport::SocketConnector)
/// when a duplex connection to a remote party is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketConfig {
    /// Server side mount point of the socket endpoint, if any.
    pub path: Option<String>,
    pub reconnect_attempts: u32,
    /// Cap on the backoff between two reconnection attempts.
    pub reconnect_wait_max: Duration,
    pub force_websockets: bool,
    pub compress: bool,
}

impl SocketConfig {
    /// Variant used when the servers run locally without a reverse proxy.
    pub fn local_servers() -> Self {
        Self {
            path: None,
            reconnect_attempts: 3,
            ..Self::default()
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: Some(String::from("/tss/socket.io")),
            reconnect_attempts: 10,
            reconnect_wait_max: Duration::from_secs(1),
            force_websockets: true,
            compress: true,
        }
    }
}
