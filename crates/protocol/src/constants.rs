use serde::{Deserialize, Serialize};

/// Request accepted, or record found.
pub const CODE_OK: i32 = 0;

/// The server is still writing the previous chunk; the record will appear.
pub const CODE_WRITING: i32 = 202;

/// The requested record is not visible (yet).
pub const CODE_NOT_FOUND: i32 = 404;

/// Generic code recorded for transport-level failures (no or garbled response).
pub const CODE_TRANSMIT_FAILED: i32 = -1;

/// Common application error codes.
pub const CODE_BAD_REQUEST: i32 = 400;
pub const CODE_CONFLICT: i32 = 409;
pub const CODE_INTERNAL: i32 = 500;

/// Message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "upload_chunk")]
    UploadChunk,
    #[serde(rename = "get_file_by_code")]
    GetFileByCode,

    // Responses from server to client
    #[serde(rename = "upload_chunk_ack")]
    UploadChunkAck,
    #[serde(rename = "file_record")]
    FileRecord,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Classification of a response code.
///
/// `Writing` is kept apart from the other failures because it promises
/// eventual success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    Writing,
    Other(i32),
}

impl ResponseCode {
    /// Classifies a raw wire code.
    pub fn from_code(code: i32) -> Self {
        match code {
            CODE_OK => Self::Ok,
            CODE_WRITING => Self::Writing,
            other => Self::Other(other),
        }
    }

    /// Returns the raw wire code.
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => CODE_OK,
            Self::Writing => CODE_WRITING,
            Self::Other(c) => c,
        }
    }
}
