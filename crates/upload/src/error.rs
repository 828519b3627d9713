//! Upload error types.

use stowage_protocol::constants::CODE_TRANSMIT_FAILED;
use stowage_transfer::TransferError;

/// Errors that end a transfer.
///
/// Every variant is terminal for the affected transfer only; the scheduler
/// reports it through the outcome callback and moves on.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("transmit failed: {0}")]
    TransmitFailed(String),

    #[error("rejected by server (code {code}): {message}")]
    ApplicationReject { code: i32, message: String },

    #[error("file record not confirmed after {attempts} attempts")]
    ConfirmationTimeout { attempts: u32 },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("cancelled")]
    Cancelled,

    /// The task driving the transfer panicked, typically inside a hook.
    #[error("upload task aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UploadError {
    /// Code recorded on a failed anchor.
    ///
    /// Server rejections keep their code verbatim; everything else maps to
    /// the generic transmit-failed code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ApplicationReject { code, .. } => *code,
            _ => CODE_TRANSMIT_FAILED,
        }
    }
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Io(e) => Self::SourceUnavailable(e.to_string()),
            TransferError::SourceUnavailable(m) => Self::SourceUnavailable(m),
            TransferError::InvariantViolation(m) => Self::InvariantViolation(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_code_is_verbatim() {
        let e = UploadError::ApplicationReject {
            code: 403,
            message: "forbidden".into(),
        };
        assert_eq!(e.code(), 403);
        assert!(e.to_string().contains("403"));
    }

    #[test]
    fn other_errors_use_generic_code() {
        assert_eq!(UploadError::TransmitFailed("x".into()).code(), -1);
        assert_eq!(UploadError::ConfirmationTimeout { attempts: 6 }.code(), -1);
        assert_eq!(UploadError::Cancelled.code(), -1);
        assert_eq!(UploadError::Aborted("panicked".into()).code(), -1);
    }

    #[test]
    fn transfer_errors_map_to_taxonomy() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            UploadError::from(TransferError::Io(io)),
            UploadError::SourceUnavailable(_)
        ));
        assert!(matches!(
            UploadError::from(TransferError::InvariantViolation("x".into())),
            UploadError::InvariantViolation(_)
        ));
    }
}
