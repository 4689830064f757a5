use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payload of the fire-and-forget `latency` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyNotice {
    pub ms: u64,
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("timeout")]
    Timeout,
    #[error("io error: {0}")]
    Io(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for PeerError {
    fn from(err: std::io::Error) -> Self {
        PeerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PeerError {
    fn from(err: serde_json::Error) -> Self {
        PeerError::Protocol(err.to_string())
    }
}

/// The server side a prober round-trips against.
#[async_trait]
pub trait LatencyPeer: Send {
    /// Sends a zero-payload `ping` and resolves once the peer acknowledges it.
    async fn ping(&mut self) -> Result<(), PeerError>;

    async fn notify_latency(&mut self, notice: LatencyNotice) -> Result<(), PeerError>;
}

