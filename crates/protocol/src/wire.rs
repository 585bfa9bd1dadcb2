//! Binary wire format for relay packets.
//!
//! # Wire format
//!
//! ```text
//! PACKET:       [4 bytes BE i32: packet type tag][payload]
//!
//! PAYLOADS:
//!   ChatMessage / FileTransferRequestFile / ErrorNotice:
//!     [4 bytes BE i32: len][len bytes: UTF-8 text]
//!   FileDataBuffer:
//!     [4 bytes BE i32: count][count bytes: raw file data]
//!   FileTransferRequestNextBuffer / FileTransferEndOfFile:
//!     (empty)
//! ```
//!
//! Any decode failure leaves the stream at an unknown position, so callers
//! must treat it as fatal for that connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::packet::{Packet, PacketType};
use crate::{MAX_CHUNK_SIZE, MAX_STRING_LEN, ProtocolError};

/// Reads a packet type tag.
pub async fn read_packet_tag<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, ProtocolError> {
    Ok(reader.read_i32().await?)
}

/// Reads a length-prefixed UTF-8 string.
pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, ProtocolError> {
    let bytes = read_prefixed(reader, MAX_STRING_LEN).await?;
    Ok(String::from_utf8(bytes)?)
}

/// Reads a `FileDataBuffer` payload: byte count followed by the raw bytes.
pub async fn read_data_buffer<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, ProtocolError> {
    read_prefixed(reader, MAX_CHUNK_SIZE).await
}

async fn read_prefixed<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let len = reader.read_i32().await?;
    if len < 0 {
        return Err(ProtocolError::InvalidLength(len));
    }
    let len = len as usize;
    if len > max {
        return Err(ProtocolError::TooLarge { len, max });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Reads one complete packet.
///
/// Returns `None` if the stream ends cleanly before a tag. Unknown tags are
/// an error here because their payload length cannot be known.
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Packet>, ProtocolError> {
    let tag = match read_packet_tag(reader).await {
        Ok(tag) => tag,
        Err(e) if e.is_eof() => return Ok(None),
        Err(e) => return Err(e),
    };

    let packet = match PacketType::from_tag(tag) {
        Some(PacketType::ChatMessage) => Packet::ChatMessage(read_string(reader).await?),
        Some(PacketType::FileTransferRequestFile) => {
            Packet::FileTransferRequestFile(read_string(reader).await?)
        }
        Some(PacketType::FileTransferRequestNextBuffer) => Packet::FileTransferRequestNextBuffer,
        Some(PacketType::FileDataBuffer) => Packet::FileDataBuffer(read_data_buffer(reader).await?),
        Some(PacketType::FileTransferEndOfFile) => Packet::FileTransferEndOfFile,
        Some(PacketType::ErrorNotice) => Packet::ErrorNotice(read_string(reader).await?),
        None => return Err(ProtocolError::UnknownPacketType(tag)),
    };

    Ok(Some(packet))
}

/// Encodes and writes one packet, then flushes.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), ProtocolError> {
    let bytes = packet.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
