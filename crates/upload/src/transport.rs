//! Transport seam between the engine and the embedding application.
//!
//! The application implements [`UploadTransport`] on top of its real
//! connection. Keeping it a trait keeps the engine testable with mocks.

use std::future::Future;
use std::pin::Pin;

use stowage_protocol::constants::MessageType;
use stowage_protocol::envelope::Message;
use stowage_protocol::messages::ChunkHeader;

use crate::error::UploadError;

/// Request/response transport to the storage server.
///
/// Implementations report a missing or unreadable response as
/// [`UploadError::TransmitFailed`]. Application-level failures travel
/// inside the returned [`Message`].
pub trait UploadTransport: Send + Sync {
    /// Sends one chunk and waits for the server's answer.
    fn send_chunk(
        &self,
        header: &ChunkHeader,
        data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>>;

    /// Sends a JSON request and waits for the response.
    fn send_request(
        &self,
        msg_type: MessageType,
        payload: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<Message, UploadError>> + Send + '_>>;
}
