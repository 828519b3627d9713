//! Transfer primitives for chunked uploads.
//!
//! - [`TransferAnchor`]: identity, byte cursor and outcome of one transfer.
//! - [`RateMeasurer`]: feedback throttle keeping throughput under a ceiling.
//! - [`UploadSource`]: positional, read-only access to the bytes being sent.
//! - [`read_chunk`]: slices one bounded chunk out of a source.

mod anchor;
mod chunked;
mod rate;
mod source;

pub use anchor::{AnchorSnapshot, TransferAnchor, TransferOutcome};
pub use chunked::{Chunk, checksum_bytes, read_chunk, source_checksum, transfer_code};
pub use rate::{RateMeasurer, Throttle};
pub use source::{FileSource, MemorySource, UploadSource};

/// Default chunk size: 100 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 100 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
