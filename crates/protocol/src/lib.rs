//! Wire protocol for the CapyRelay server and its clients.
//!
//! Every packet starts with a 4-byte packet type tag, followed by a
//! type-dependent payload. See the [`wire`] module for the byte layout
//! and the async read/write helpers.

pub mod packet;
pub mod wire;

pub use packet::{Packet, PacketType};
pub use wire::{read_data_buffer, read_packet, read_packet_tag, read_string, write_packet};

/// Default payload size of one `FileDataBuffer` packet (8 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Upper bound on the payload of a single `FileDataBuffer` packet (1 MiB).
///
/// Readers reject larger counts instead of allocating them.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Upper bound on a length-prefixed string (64 KiB).
pub const MAX_STRING_LEN: usize = 64 * 1024;

/// Errors produced while decoding or encoding packets.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid length prefix: {0}")]
    InvalidLength(i32),

    #[error("length {len} exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },

    #[error("invalid UTF-8 string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("unknown packet type: {0}")]
    UnknownPacketType(i32),
}

impl ProtocolError {
    /// Returns `true` if the error is a clean end of stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
