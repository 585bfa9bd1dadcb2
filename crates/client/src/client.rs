//! Relay client over a split byte stream.

use std::net::SocketAddr;

use capyrelay_protocol::{Packet, read_packet, write_packet};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

use crate::error::ClientError;

/// How a download ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The server sent `FileTransferEndOfFile`.
    Completed { bytes: u64 },
    /// The server answered with an `ErrorNotice`.
    Rejected { message: String },
}

/// Result of [`RelayClient::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub outcome: DownloadOutcome,
    /// Chat messages that arrived while the download was running, in order.
    pub chat: Vec<String>,
}

/// Connection to a relay server.
pub struct RelayClient<R = BufReader<OwnedReadHalf>, W = OwnedWriteHalf> {
    reader: R,
    writer: W,
}

impl RelayClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!(%addr, "connected to relay");

        let (reader, writer) = stream.into_split();
        Ok(Self::from_parts(BufReader::new(reader), writer))
    }
}

impl<R, W> RelayClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wraps an already-connected stream pair.
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Splits the client so reading and writing can run on separate tasks.
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    pub async fn send_chat(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(&Packet::ChatMessage(text.to_owned())).await
    }

    pub async fn request_file(&mut self, name: &str) -> Result<(), ClientError> {
        self.send(&Packet::FileTransferRequestFile(name.to_owned())).await
    }

    pub async fn request_next_buffer(&mut self) -> Result<(), ClientError> {
        self.send(&Packet::FileTransferRequestNextBuffer).await
    }

    /// Reads the next packet. `None` means the server closed the connection.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>, ClientError> {
        Ok(read_packet(&mut self.reader).await?)
    }

    /// Requests `name` and writes its contents to `sink`, pulling one buffer
    /// at a time.
    pub async fn download<S>(
        &mut self,
        name: &str,
        sink: &mut S,
    ) -> Result<DownloadResult, ClientError>
    where
        S: AsyncWrite + Unpin,
    {
        self.request_file(name).await?;

        let mut bytes = 0u64;
        let mut chat = Vec::new();

        let outcome = loop {
            let packet = self.next_packet().await?.ok_or(ClientError::Closed)?;
            match packet {
                Packet::FileDataBuffer(data) => {
                    sink.write_all(&data).await?;
                    bytes += data.len() as u64;
                    self.request_next_buffer().await?;
                }
                Packet::FileTransferEndOfFile => {
                    sink.flush().await?;
                    break DownloadOutcome::Completed { bytes };
                }
                Packet::ErrorNotice(message) => {
                    break DownloadOutcome::Rejected { message };
                }
                Packet::ChatMessage(text) => chat.push(text),
                other => {
                    return Err(ClientError::UnexpectedPacket(format!(
                        "{:?}",
                        other.packet_type()
                    )));
                }
            }
        };

        debug!(file = name, ?outcome, "download finished");
        Ok(DownloadResult { outcome, chat })
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), ClientError> {
        write_packet(&mut self.writer, packet).await?;
        Ok(())
    }
}
