//! Serial chunk loop for a single transfer.
//!
//! One chunk is in flight at a time: the next read starts only after the
//! previous chunk was acknowledged, and the read offset is always the
//! anchor's acknowledged cursor.

use std::sync::Arc;
use std::time::Duration;

use stowage_transfer::{Chunk, RateMeasurer, Throttle, TransferAnchor, UploadSource};
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::transmitter::{ChunkReply, ChunkTransmitter};
use crate::types::UploadCallbacks;

/// Where the driver is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Reading,
    Transmitting,
    Throttling,
    Completed,
    Aborted,
}

/// Drives one transfer from its current cursor to the last byte.
pub struct SerialUploadDriver<'a> {
    transmitter: ChunkTransmitter<'a>,
    rate: &'a mut RateMeasurer,
    config: &'a UploadConfig,
    state: DriverState,
}

impl<'a> SerialUploadDriver<'a> {
    pub fn new(
        transmitter: ChunkTransmitter<'a>,
        rate: &'a mut RateMeasurer,
        config: &'a UploadConfig,
    ) -> Self {
        Self {
            transmitter,
            rate,
            config,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Runs the loop until every byte is acknowledged.
    ///
    /// On error the anchor is marked failed with the error's code and the
    /// cursor stays at the last acknowledged position.
    pub async fn run(
        &mut self,
        anchor: &TransferAnchor,
        source: &Arc<dyn UploadSource>,
        callbacks: &UploadCallbacks,
    ) -> Result<(), UploadError> {
        let result = self.drive(anchor, source, callbacks).await;
        match &result {
            Ok(()) => {
                self.state = DriverState::Completed;
                info!(
                    transfer = anchor.id(),
                    bytes = anchor.total_size(),
                    rate = ?self.rate.average_rate(),
                    "byte stream complete"
                );
            }
            Err(e) => {
                self.state = DriverState::Aborted;
                anchor.mark_failed(e.code(), e.to_string());
                warn!(
                    transfer = anchor.id(),
                    position = anchor.position(),
                    error = %e,
                    "transfer aborted"
                );
            }
        }
        result
    }

    async fn drive(
        &mut self,
        anchor: &TransferAnchor,
        source: &Arc<dyn UploadSource>,
        callbacks: &UploadCallbacks,
    ) -> Result<(), UploadError> {
        self.rate.reset();
        anchor.start();
        callbacks.start(&anchor.snapshot());

        let limit = self.config.effective_chunk_size();
        let total = anchor.total_size();

        while anchor.position() < total {
            if anchor.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            self.state = DriverState::Reading;
            let chunk = self.transmitter.read_chunk(anchor, source, limit).await?;
            callbacks.progress(&anchor.snapshot());

            self.state = DriverState::Transmitting;
            let (position, file_id) = match self.transmit_with_retry(anchor, &chunk).await? {
                ChunkReply::Ack { position, file_id } => (position, file_id),
                ChunkReply::Reject { code, message } => {
                    return Err(UploadError::ApplicationReject { code, message });
                }
            };
            if let Some(id) = file_id {
                anchor.bind_server_file_id(id);
            }

            let acked = self.validate_ack(anchor, &chunk, position)?;
            let position = anchor.advance(acked)?;
            debug!(transfer = anchor.id(), position, total, "chunk acknowledged");

            if position < total {
                if let Throttle::Wait(delay) = self.rate.tick(acked) {
                    self.state = DriverState::Throttling;
                    debug!(transfer = anchor.id(), delay_ms = delay.as_millis() as u64, "throttling");
                    pause(anchor, delay).await?;
                }
            } else {
                self.rate.finish(acked);
            }
        }

        // Empty sources never send a chunk.
        if !self.rate.is_finished() {
            self.rate.finish(0);
        }
        Ok(())
    }

    /// Returns the number of newly acknowledged bytes.
    fn validate_ack(
        &self,
        anchor: &TransferAnchor,
        chunk: &Chunk,
        position: u64,
    ) -> Result<u64, UploadError> {
        let current = anchor.position();
        if position <= current {
            return Err(UploadError::TransmitFailed(format!(
                "ack position {position} does not advance cursor {current}"
            )));
        }
        if position <= anchor.total_size() && position > chunk.end() {
            return Err(UploadError::TransmitFailed(format!(
                "ack position {position} beyond chunk end {}",
                chunk.end()
            )));
        }
        // Past-total acks surface as an invariant violation from `advance`.
        Ok(position - current)
    }

    /// Sends a chunk, resending it after transport failures up to the
    /// configured retry count. Rejections are returned as-is.
    async fn transmit_with_retry(
        &self,
        anchor: &TransferAnchor,
        chunk: &Chunk,
    ) -> Result<ChunkReply, UploadError> {
        let mut attempt: u32 = 0;
        loop {
            match self.transmitter.transmit(anchor, chunk).await {
                Err(UploadError::TransmitFailed(msg)) if attempt < self.config.chunk_retries => {
                    attempt += 1;
                    warn!(
                        transfer = anchor.id(),
                        offset = chunk.offset,
                        attempt,
                        error = %msg,
                        "chunk transmit failed, retrying"
                    );
                    pause(anchor, self.config.chunk_retry_delay()).await?;
                }
                other => return other,
            }
        }
    }
}

/// Sleeps for `delay` unless the transfer is cancelled first.
async fn pause(anchor: &TransferAnchor, delay: Duration) -> Result<(), UploadError> {
    let cancel = anchor.cancel_token();
    tokio::select! {
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
