//! Error types for the relay client.

use capyrelay_protocol::ProtocolError;

/// Errors produced by [`RelayClient`](crate::RelayClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed by server")]
    Closed,

    #[error("unexpected packet: {0}")]
    UnexpectedPacket(String),
}
