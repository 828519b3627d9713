//! Serial chunked upload engine.
//!
//! Files are uploaded one at a time through a FIFO backlog. Each transfer
//! streams its bytes chunk by chunk, one chunk in flight, under an optional
//! throughput ceiling, then polls the server until the uploaded file shows
//! up as a durable record.
//!
//! ```ignore
//! let scheduler = UploadScheduler::new(transport, UploadConfig::load(&path)?);
//! let anchor = scheduler.submit(
//!     UploadTask::from_path(&file)?.on_outcome(|r| println!("{r:?}")),
//! );
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod poller;
pub mod scheduler;
pub mod transmitter;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{ConfirmConfig, UploadConfig};
pub use driver::{DriverState, SerialUploadDriver};
pub use error::UploadError;
pub use poller::CompletionPoller;
pub use scheduler::UploadScheduler;
pub use transmitter::{ChunkReply, ChunkTransmitter};
pub use transport::UploadTransport;
pub use types::{CompletedUpload, OutcomeCallback, SnapshotCallback, UploadCallbacks, UploadTask};
