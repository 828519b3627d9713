//! Confirms that a fully sent transfer became a durable file record.
//!
//! The server finalizes files asynchronously, so the record may not be
//! visible right after the last ack. Two answers are told apart:
//!
//! - "still writing" guarantees eventual success: it resets the attempt
//!   count and never exhausts it;
//! - anything else (not found, other codes, transport errors) counts
//!   against the attempt ceiling.

use std::time::Duration;

use stowage_protocol::constants::{CODE_TRANSMIT_FAILED, MessageType, ResponseCode};
use stowage_protocol::messages::{FileRecord, FileRecordPayload, FileRecordQuery};
use stowage_transfer::TransferAnchor;
use tracing::{debug, info, warn};

use crate::config::ConfirmConfig;
use crate::error::UploadError;
use crate::transport::UploadTransport;

/// Classified answer to one completion query.
#[derive(Debug, Clone, PartialEq)]
enum Lookup {
    Found(FileRecord),
    Writing,
    Missing(i32),
}

/// Polls the server for a transfer's file record.
pub struct CompletionPoller<'a> {
    transport: &'a dyn UploadTransport,
    max_attempts: u32,
    interval: Duration,
}

impl<'a> CompletionPoller<'a> {
    pub fn new(transport: &'a dyn UploadTransport, config: &ConfirmConfig) -> Self {
        Self {
            transport,
            max_attempts: config.max_attempts,
            interval: config.interval(),
        }
    }

    /// Polls until the record is visible, then marks the anchor succeeded.
    ///
    /// Fails with [`UploadError::ConfirmationTimeout`] once more than
    /// `max_attempts` consecutive non-writing misses occurred, even though
    /// every byte was acknowledged.
    pub async fn confirm(&self, anchor: &TransferAnchor) -> Result<FileRecord, UploadError> {
        let mut not_found_attempts: u32 = 0;
        let mut writing_polls: u32 = 0;

        loop {
            match self.lookup(anchor).await {
                Lookup::Found(record) => {
                    anchor.bind_server_file_id(record.id.clone());
                    anchor.mark_succeeded(record.id.clone());
                    info!(
                        transfer = anchor.id(),
                        file_id = %record.id,
                        writing_polls,
                        "file record confirmed"
                    );
                    return Ok(record);
                }
                Lookup::Writing => {
                    not_found_attempts = 0;
                    writing_polls += 1;
                    debug!(transfer = anchor.id(), writing_polls, "server still writing");
                }
                Lookup::Missing(code) => {
                    if not_found_attempts >= self.max_attempts {
                        warn!(
                            transfer = anchor.id(),
                            code,
                            attempts = not_found_attempts + 1,
                            "file record never became visible"
                        );
                        return Err(UploadError::ConfirmationTimeout {
                            attempts: not_found_attempts + 1,
                        });
                    }
                    not_found_attempts += 1;
                    debug!(
                        transfer = anchor.id(),
                        code,
                        attempt = not_found_attempts,
                        "file record not visible yet"
                    );
                }
            }

            let cancel = anchor.cancel_token();
            tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn lookup(&self, anchor: &TransferAnchor) -> Lookup {
        let query = FileRecordQuery {
            code: anchor.transfer_code().to_string(),
        };
        let payload = match serde_json::to_value(&query) {
            Ok(p) => p,
            Err(_) => return Lookup::Missing(CODE_TRANSMIT_FAILED),
        };

        let resp = match self
            .transport
            .send_request(MessageType::GetFileByCode, &payload)
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!(transfer = anchor.id(), error = %e, "completion query failed");
                return Lookup::Missing(CODE_TRANSMIT_FAILED);
            }
        };

        if let Some(err) = resp.error {
            return match ResponseCode::from_code(err.code) {
                ResponseCode::Writing => Lookup::Writing,
                other => Lookup::Missing(other.code()),
            };
        }

        let payload = match resp.parse_payload::<FileRecordPayload>() {
            Ok(Some(p)) => p,
            _ => return Lookup::Missing(CODE_TRANSMIT_FAILED),
        };
        match (ResponseCode::from_code(payload.code), payload.record) {
            (ResponseCode::Ok, Some(record)) => Lookup::Found(record),
            (ResponseCode::Ok, None) => Lookup::Missing(CODE_TRANSMIT_FAILED),
            (ResponseCode::Writing, _) => Lookup::Writing,
            (ResponseCode::Other(code), _) => Lookup::Missing(code),
        }
    }
}
