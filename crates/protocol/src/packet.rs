//! Packet types and their in-memory representation.

use crate::{MAX_CHUNK_SIZE, MAX_STRING_LEN, ProtocolError};

/// Packet type identifier, sent as a big-endian `i32` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    ChatMessage,
    FileTransferRequestFile,
    FileTransferEndOfFile,
    FileDataBuffer,
    FileTransferRequestNextBuffer,
    ErrorNotice,
}

impl PacketType {
    /// Returns the wire tag for this packet type.
    pub fn tag(self) -> i32 {
        match self {
            PacketType::ChatMessage => 0,
            PacketType::FileTransferRequestFile => 1,
            PacketType::FileTransferEndOfFile => 2,
            PacketType::FileDataBuffer => 3,
            PacketType::FileTransferRequestNextBuffer => 4,
            PacketType::ErrorNotice => 5,
        }
    }

    /// Maps a wire tag back to a packet type. Returns `None` for unknown tags.
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(PacketType::ChatMessage),
            1 => Some(PacketType::FileTransferRequestFile),
            2 => Some(PacketType::FileTransferEndOfFile),
            3 => Some(PacketType::FileDataBuffer),
            4 => Some(PacketType::FileTransferRequestNextBuffer),
            5 => Some(PacketType::ErrorNotice),
            _ => None,
        }
    }
}

/// A fully decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Chat text, relayed to every other connected client.
    ChatMessage(String),
    /// Request to start streaming the named file.
    FileTransferRequestFile(String),
    /// Request for the next chunk of the active transfer.
    FileTransferRequestNextBuffer,
    /// One chunk of file data; the byte count is `data.len()`.
    FileDataBuffer(Vec<u8>),
    /// Sent right after the final `FileDataBuffer` of a transfer.
    FileTransferEndOfFile,
    /// Recoverable error reported to the requesting client.
    ErrorNotice(String),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ChatMessage(_) => PacketType::ChatMessage,
            Packet::FileTransferRequestFile(_) => PacketType::FileTransferRequestFile,
            Packet::FileTransferRequestNextBuffer => PacketType::FileTransferRequestNextBuffer,
            Packet::FileDataBuffer(_) => PacketType::FileDataBuffer,
            Packet::FileTransferEndOfFile => PacketType::FileTransferEndOfFile,
            Packet::ErrorNotice(_) => PacketType::ErrorNotice,
        }
    }

    /// Encodes the packet into its wire representation.
    ///
    /// Fails if a string or data payload is larger than the protocol allows,
    /// since the peer would reject it anyway.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(4 + self.payload_len());
        buf.extend_from_slice(&self.packet_type().tag().to_be_bytes());

        match self {
            Packet::ChatMessage(text)
            | Packet::FileTransferRequestFile(text)
            | Packet::ErrorNotice(text) => {
                put_prefixed(&mut buf, text.as_bytes(), MAX_STRING_LEN)?;
            }
            Packet::FileDataBuffer(data) => {
                put_prefixed(&mut buf, data, MAX_CHUNK_SIZE)?;
            }
            Packet::FileTransferRequestNextBuffer | Packet::FileTransferEndOfFile => {}
        }

        Ok(buf)
    }

    fn payload_len(&self) -> usize {
        match self {
            Packet::ChatMessage(text)
            | Packet::FileTransferRequestFile(text)
            | Packet::ErrorNotice(text) => 4 + text.len(),
            Packet::FileDataBuffer(data) => 4 + data.len(),
            Packet::FileTransferRequestNextBuffer | Packet::FileTransferEndOfFile => 0,
        }
    }
}

fn put_prefixed(buf: &mut Vec<u8>, bytes: &[u8], max: usize) -> Result<(), ProtocolError> {
    if bytes.len() > max {
        return Err(ProtocolError::TooLarge {
            len: bytes.len(),
            max,
        });
    }
    buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}
