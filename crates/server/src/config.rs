use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use capyrelay_protocol::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the acceptor binds to (port 0 = OS-assigned).
    pub listen: SocketAddr,

    /// Directory requested file names are resolved against.
    pub serve_root: PathBuf,

    /// Payload size of one `FileDataBuffer` packet.
    pub chunk_size: usize,

    /// Period of the delivery loop.
    pub delivery_interval: Duration,

    /// Packets written per connection per delivery tick (0 = drain the queue).
    pub packets_per_tick: usize,

    /// Longest a single packet write may take before the connection is
    /// closed as stalled.
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: ([127, 0, 0, 1], 1111).into(),
            serve_root: PathBuf::from("."),
            chunk_size: DEFAULT_CHUNK_SIZE,
            delivery_interval: Duration::from_millis(5),
            packets_per_tick: 1,
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Chunk size clamped to `1..=MAX_CHUNK_SIZE`.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }
}
