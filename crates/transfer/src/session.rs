use std::fs::File;
use std::io::Read;
use std::path::Path;

use capyrelay_protocol::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, Packet};

use crate::TransferError;

/// Streams one file to one client in fixed-size chunks.
///
/// The file handle is released as soon as the last chunk has been produced;
/// from then on [`step`](Self::step) is a no-op.
#[derive(Debug)]
pub struct FileTransferSession {
    file: Option<File>,
    file_name: String,
    total_size: u64,
    offset: u64,
    chunk_size: usize,
}

impl FileTransferSession {
    /// Opens `path` read-only for a new transfer.
    ///
    /// `file_name` is kept for diagnostics. A `chunk_size` of 0 selects
    /// [`DEFAULT_CHUNK_SIZE`]; larger values are capped at [`MAX_CHUNK_SIZE`].
    pub fn open(
        path: &Path,
        file_name: impl Into<String>,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        let file_name = file_name.into();
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(TransferError::NotAFile(file_name));
        }

        let chunk_size = match chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            n => n.min(MAX_CHUNK_SIZE),
        };

        Ok(Self {
            file: Some(file),
            file_name,
            total_size: metadata.len(),
            offset: 0,
            chunk_size,
        })
    }

    /// Produces the next packets of the transfer.
    ///
    /// Returns one `FileDataBuffer`, or a `FileDataBuffer` followed by
    /// `FileTransferEndOfFile` when the chunk reaches the end of the file.
    /// Once complete, returns no packets. An empty file yields an empty
    /// `FileDataBuffer` and `FileTransferEndOfFile` on the first call.
    pub fn step(&mut self) -> Result<Vec<Packet>, TransferError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(Vec::new());
        };

        let remaining = self.total_size.saturating_sub(self.offset);
        let n = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; n];
        file.read_exact(&mut buf)?;
        self.offset += n as u64;

        let mut packets = vec![Packet::FileDataBuffer(buf)];
        if self.offset >= self.total_size {
            packets.push(Packet::FileTransferEndOfFile);
            self.file = None;
            tracing::info!(
                file = %self.file_name,
                size = self.total_size,
                "file sent"
            );
        }
        Ok(packets)
    }

    /// Returns `true` once the final chunk and end-of-file marker were produced.
    pub fn is_complete(&self) -> bool {
        self.file.is_none()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Total file size in bytes, captured at open time.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes produced so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}
