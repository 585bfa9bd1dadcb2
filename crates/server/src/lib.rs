//! Relay server: chat broadcast and pull-based file streaming.
//!
//! Each accepted connection occupies a reusable slot in the
//! [`ConnectionTable`]. A per-connection inbound task decodes packets and
//! hands them to the [`Dispatcher`], which queues encoded replies on the
//! slot's [`OutboundQueue`]. A single [`DeliveryLoop`] drains those queues
//! to the transports.

mod config;
mod connection;
mod delivery;
mod dispatch;
mod queue;
mod server;
mod table;

pub use config::ServerConfig;
pub use delivery::DeliveryLoop;
pub use dispatch::Dispatcher;
pub use queue::OutboundQueue;
pub use server::{Relay, TcpRelay};
pub use table::{ConnectionHandle, ConnectionId, ConnectionTable, Outbound};

use capyrelay_protocol::ProtocolError;

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
