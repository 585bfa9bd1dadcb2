//! Client side of the relay protocol.
//!
//! [`RelayClient`] sends chat, requests files, and drives the pull-based
//! download loop: one `FileTransferRequestNextBuffer` per received buffer
//! until the server reports end of file.

mod client;
mod error;

pub use client::{DownloadOutcome, DownloadResult, RelayClient};
pub use error::ClientError;
