//! Packet-type dispatch for inbound client packets.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use capyrelay_protocol::{Packet, PacketType, read_data_buffer, read_string};
use capyrelay_transfer::{FileTransferSession, TransferError, resolve_request_path};
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::ServerError;
use crate::table::{ConnectionHandle, ConnectionTable};

/// Longest piece of client-supplied text echoed back in an `ErrorNotice`, in chars.
const MAX_ECHOED_CHARS: usize = 256;

/// Interprets one inbound packet for one connection.
pub struct Dispatcher<W> {
    table: Arc<ConnectionTable<W>>,
    serve_root: PathBuf,
    chunk_size: usize,
}

impl<W> Dispatcher<W> {
    pub fn new(table: Arc<ConnectionTable<W>>, serve_root: PathBuf, chunk_size: usize) -> Self {
        Self {
            table,
            serve_root,
            chunk_size,
        }
    }

    /// Handles the packet whose tag has just been read from `reader`.
    ///
    /// An `Err` means the stream is in an unknown state and the connection
    /// must be dropped. Recoverable problems (missing file, unknown tag) are
    /// handled here and return `Ok`.
    pub async fn dispatch<R: AsyncRead + Unpin>(
        &self,
        conn: &ConnectionHandle,
        tag: i32,
        reader: &mut R,
    ) -> Result<(), ServerError> {
        match PacketType::from_tag(tag) {
            Some(PacketType::ChatMessage) => {
                let text = read_string(reader).await?;
                self.broadcast_chat(conn, text)?;
            }
            Some(PacketType::FileTransferRequestFile) => {
                let file_name = read_string(reader).await?;
                self.start_transfer(conn, file_name);
            }
            Some(PacketType::FileTransferRequestNextBuffer) => {
                self.continue_transfer(conn);
            }
            // Server-to-client packets: consume the payload so the stream
            // stays aligned, then ignore.
            Some(ty @ PacketType::ErrorNotice) => {
                read_string(reader).await?;
                warn!(id = conn.id(), packet = ?ty, "ignoring server-only packet");
            }
            Some(ty @ PacketType::FileDataBuffer) => {
                read_data_buffer(reader).await?;
                warn!(id = conn.id(), packet = ?ty, "ignoring server-only packet");
            }
            Some(ty @ PacketType::FileTransferEndOfFile) => {
                warn!(id = conn.id(), packet = ?ty, "ignoring server-only packet");
            }
            None => {
                warn!(id = conn.id(), tag, "unrecognized packet");
            }
        }
        Ok(())
    }

    /// Queues `text` to every active connection except the sender.
    fn broadcast_chat(&self, sender: &ConnectionHandle, text: String) -> Result<(), ServerError> {
        let bytes = Packet::ChatMessage(text).encode()?;
        let mut recipients = 0usize;
        self.table.for_each_active(|id, outbound| {
            if id == sender.id() {
                return;
            }
            if outbound.push(bytes.clone()) {
                recipients += 1;
            }
        });
        debug!(id = sender.id(), recipients, "processed chat message");
        Ok(())
    }

    fn start_transfer(&self, conn: &ConnectionHandle, file_name: String) {
        let session = resolve_request_path(&self.serve_root, &file_name).and_then(|path| {
            FileTransferSession::open(&path, file_name.as_str(), self.chunk_size)
        });

        let session = match session {
            Ok(session) => session,
            Err(e) => {
                info!(id = conn.id(), file = %file_name, error = %e, "requested file unavailable");
                send(
                    conn,
                    Packet::ErrorNotice(format!(
                        "Requested file: {} does not exist or was not found.",
                        elide(&file_name)
                    )),
                );
                return;
            }
        };

        debug!(
            id = conn.id(),
            file = %file_name,
            size = session.total_size(),
            "starting file transfer"
        );
        conn.with_transfer(|slot| {
            // A new request replaces any transfer still in progress.
            *slot = Some(session);
            step_transfer(conn, slot);
        });
    }

    fn continue_transfer(&self, conn: &ConnectionHandle) {
        conn.with_transfer(|slot| {
            if slot.is_none() {
                debug!(id = conn.id(), "next buffer requested with no active transfer");
                return;
            }
            step_transfer(conn, slot);
        });
    }
}

/// Produces the next chunk(s) of the active transfer and queues them.
/// The session is removed once complete or if reading fails.
fn step_transfer(conn: &ConnectionHandle, slot: &mut Option<FileTransferSession>) {
    let Some(session) = slot.as_mut() else {
        return;
    };

    match session.step() {
        Ok(packets) => {
            for packet in packets {
                send(conn, packet);
            }
            if session.is_complete() {
                *slot = None;
            }
        }
        Err(e) => {
            let file_name = session.file_name().to_owned();
            *slot = None;
            report_read_failure(conn, &file_name, &e);
        }
    }
}

fn report_read_failure(conn: &ConnectionHandle, file_name: &str, error: &TransferError) {
    warn!(id = conn.id(), file = %file_name, %error, "file transfer aborted");
    send(
        conn,
        Packet::ErrorNotice(format!(
            "Transfer of {} failed: {}",
            elide(file_name),
            elide(&error.to_string())
        )),
    );
}

/// Shortens `text` so a notice quoting it always fits in one string field.
fn elide(text: &str) -> Cow<'_, str> {
    match text.char_indices().nth(MAX_ECHOED_CHARS) {
        Some((end, _)) => Cow::Owned(format!("{}...", &text[..end])),
        None => Cow::Borrowed(text),
    }
}

fn send(conn: &ConnectionHandle, packet: Packet) {
    match conn.enqueue(&packet) {
        Ok(true) => {}
        Ok(false) => debug!(id = conn.id(), "connection released, packet dropped"),
        Err(e) => warn!(id = conn.id(), error = %e, "failed to encode packet"),
    }
}
