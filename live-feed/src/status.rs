//! Connection state of a live feed
//!
//! Published by the renderer through a `tokio::sync::watch` channel so a user facing status
//! indicator can follow it without touching renderer state.

use derive_more::Display;

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionStatus {
    #[display("CONNECTED")]
    Connected,
    #[display("DISCONNECTED")]
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}
