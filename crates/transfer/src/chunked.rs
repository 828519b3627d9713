use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::source::UploadSource;

/// One bounded, contiguous slice of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset within the source.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.len()
    }
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 over the whole source, reading it in 64 KiB blocks.
pub fn source_checksum(source: &dyn UploadSource) -> Result<String, TransferError> {
    const BLOCK: usize = 64 * 1024;
    let mut hasher = Sha256::new();
    let mut offset = 0u64;
    let total = source.size();
    while offset < total {
        let chunk = read_chunk(source, offset, BLOCK, total)?;
        hasher.update(&chunk.data);
        offset = chunk.end();
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Derives the code under which the server files a transfer.
///
/// Stable for the same owner, domain and source metadata, so a query for
/// the finished record needs no extra round trip.
pub fn transfer_code(
    owner: &str,
    domain: &str,
    name: &str,
    size: u64,
    last_modified: i64,
) -> String {
    let mut hasher = Sha256::new();
    for part in [owner, domain, name] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(size.to_be_bytes());
    hasher.update(last_modified.to_be_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Reads the range `[offset, offset + limit)` clipped to `total_size`.
///
/// Any read failure, including a source that delivers fewer bytes than the
/// range needs, is reported as [`TransferError::SourceUnavailable`].
pub fn read_chunk(
    source: &dyn UploadSource,
    offset: u64,
    limit: usize,
    total_size: u64,
) -> Result<Chunk, TransferError> {
    if offset > total_size {
        return Err(TransferError::InvariantViolation(format!(
            "chunk offset {offset} beyond total size {total_size}"
        )));
    }
    let len = (total_size - offset).min(limit as u64) as usize;
    let data = source
        .read_at(offset, len)
        .map_err(|e| TransferError::SourceUnavailable(format!("{}: {e}", source.name())))?;
    if data.len() != len {
        return Err(TransferError::SourceUnavailable(format!(
            "{}: short read at offset {offset} ({} of {len} bytes)",
            source.name(),
            data.len()
        )));
    }
    let checksum = checksum_bytes(&data);
    Ok(Chunk {
        offset,
        data,
        checksum,
    })
}
