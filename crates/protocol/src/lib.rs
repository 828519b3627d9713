//! Wire protocol types for stowage chunked uploads.
//!
//! The transport itself is external: these types describe what travels
//! over it (chunk headers, acknowledgements, completion queries) and the
//! response codes the engine interprets.

pub mod constants;
pub mod envelope;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::{MessageType, ResponseCode};
pub use envelope::{Message, WireError};
pub use messages::{
    ChunkAckPayload, ChunkHeader, FileRecord, FileRecordPayload, FileRecordQuery,
    UploadChunkRequest,
};
