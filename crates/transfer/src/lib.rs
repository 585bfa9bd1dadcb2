//! Chunked file transfer for relay clients.
//!
//! A [`FileTransferSession`] owns an open file and produces one
//! `FileDataBuffer` packet per [`step`](FileTransferSession::step), followed
//! by `FileTransferEndOfFile` once the whole file has been sent. The client
//! pulls every chunk after the first one.

mod session;
mod validation;

pub use session::FileTransferSession;
pub use validation::{resolve_request_path, validate_request_path};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),
}
