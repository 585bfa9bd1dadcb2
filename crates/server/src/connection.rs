//! Per-connection inbound task.

use std::sync::Arc;

use capyrelay_protocol::read_packet_tag;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::table::{ConnectionHandle, ConnectionTable};

/// Reads packets from `reader` and dispatches them until the peer goes
/// away, the stream is corrupt, or the connection is closed from our side.
/// Always ends by releasing the connection's slot.
pub(crate) async fn read_pump<R, W>(
    mut reader: R,
    conn: ConnectionHandle,
    dispatcher: Arc<Dispatcher<W>>,
    table: Arc<ConnectionTable<W>>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let tag = tokio::select! {
            biased;
            _ = conn.closed_token().cancelled() => break,
            result = read_packet_tag(&mut reader) => match result {
                Ok(tag) => tag,
                Err(e) if e.is_eof() => {
                    debug!(id = conn.id(), "peer closed connection");
                    break;
                }
                Err(e) => {
                    warn!(id = conn.id(), error = %e, "read failed");
                    break;
                }
            },
        };

        if let Err(e) = dispatcher.dispatch(&conn, tag, &mut reader).await {
            warn!(id = conn.id(), tag, error = %e, "dropping connection");
            break;
        }
    }

    if table.release_connection(&conn).await {
        info!(id = conn.id(), "connection released");
    }
}
