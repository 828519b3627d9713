//! Reads chunks from the source and hands them to the transport.

use std::sync::Arc;

use stowage_protocol::constants::{MessageType, ResponseCode};
use stowage_protocol::messages::{ChunkAckPayload, ChunkHeader};
use stowage_transfer::{Chunk, TransferAnchor, UploadSource, read_chunk};
use tracing::trace;

use crate::error::UploadError;
use crate::transport::UploadTransport;

/// Server verdict on one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkReply {
    /// Accepted; `position` is the new cursor.
    Ack {
        position: u64,
        file_id: Option<String>,
    },
    /// Refused with an application code. Terminal for the transfer.
    Reject { code: i32, message: String },
}

/// Wraps chunks with transfer metadata and interprets the answers.
pub struct ChunkTransmitter<'a> {
    transport: &'a dyn UploadTransport,
    owner: &'a str,
    domain: &'a str,
}

impl<'a> ChunkTransmitter<'a> {
    pub fn new(transport: &'a dyn UploadTransport, owner: &'a str, domain: &'a str) -> Self {
        Self {
            transport,
            owner,
            domain,
        }
    }

    /// Reads `[anchor.position, anchor.position + limit)` clipped to the
    /// anchor's total size.
    pub async fn read_chunk(
        &self,
        anchor: &TransferAnchor,
        source: &Arc<dyn UploadSource>,
        limit: usize,
    ) -> Result<Chunk, UploadError> {
        let offset = anchor.position();
        let total = anchor.total_size();
        let source = Arc::clone(source);
        let chunk = tokio::task::spawn_blocking(move || {
            read_chunk(source.as_ref(), offset, limit, total)
        })
        .await
        .map_err(|e| UploadError::SourceUnavailable(format!("read task failed: {e}")))??;
        Ok(chunk)
    }

    /// Builds the metadata header for `chunk`.
    pub fn header_for(&self, anchor: &TransferAnchor, chunk: &Chunk) -> ChunkHeader {
        ChunkHeader {
            owner: self.owner.to_string(),
            domain: self.domain.to_string(),
            file_name: anchor.source_name().to_string(),
            total_size: anchor.total_size(),
            last_modified: anchor.source_last_modified(),
            offset: chunk.offset,
            length: chunk.len(),
            transfer_code: anchor.transfer_code().to_string(),
            checksum: chunk.checksum.clone(),
        }
    }

    /// Sends `chunk` and classifies the answer.
    ///
    /// Transport failures and unreadable answers come back as
    /// [`UploadError::TransmitFailed`].
    pub async fn transmit(
        &self,
        anchor: &TransferAnchor,
        chunk: &Chunk,
    ) -> Result<ChunkReply, UploadError> {
        let header = self.header_for(anchor, chunk);
        trace!(
            transfer = anchor.id(),
            offset = header.offset,
            length = header.length,
            "sending chunk"
        );

        let resp = self
            .transport
            .send_chunk(&header, &chunk.data)
            .await
            .map_err(|e| match e {
                UploadError::TransmitFailed(_) => e,
                other => UploadError::TransmitFailed(other.to_string()),
            })?;

        if let Some(err) = resp.error {
            return Ok(ChunkReply::Reject {
                code: err.code,
                message: err.message,
            });
        }
        if resp.msg_type != MessageType::UploadChunkAck {
            return Err(UploadError::TransmitFailed(format!(
                "unexpected response type {:?}",
                resp.msg_type
            )));
        }

        let ack = resp
            .parse_payload::<ChunkAckPayload>()
            .map_err(|e| UploadError::TransmitFailed(format!("malformed ack: {e}")))?
            .ok_or_else(|| UploadError::TransmitFailed("empty ack".into()))?;

        match ResponseCode::from_code(ack.code) {
            ResponseCode::Ok => Ok(ChunkReply::Ack {
                position: ack.position,
                file_id: ack.file_id,
            }),
            other => Ok(ChunkReply::Reject {
                code: other.code(),
                message: "chunk rejected".into(),
            }),
        }
    }
}
