//! Tasks, callbacks and results exchanged with callers.

use std::path::Path;
use std::sync::Arc;

use stowage_protocol::messages::FileRecord;
use stowage_transfer::{AnchorSnapshot, FileSource, UploadSource};

use crate::error::UploadError;

/// Hook receiving an anchor snapshot.
pub type SnapshotCallback = Box<dyn Fn(&AnchorSnapshot) + Send + Sync>;

/// Hook receiving the terminal result of a transfer.
pub type OutcomeCallback = Box<dyn FnOnce(Result<CompletedUpload, UploadError>) + Send + Sync>;

/// Caller-supplied continuations for one transfer.
///
/// Hooks run on the upload worker and must return quickly.
#[derive(Default)]
pub struct UploadCallbacks {
    /// Fires once, when the driver starts consuming the task.
    pub on_start: Option<SnapshotCallback>,
    /// Fires after every chunk is read, before it is transmitted.
    pub on_progress: Option<SnapshotCallback>,
    /// Fires exactly once with the terminal result.
    pub on_outcome: Option<OutcomeCallback>,
}

impl UploadCallbacks {
    pub(crate) fn start(&self, snapshot: &AnchorSnapshot) {
        if let Some(cb) = &self.on_start {
            cb(snapshot);
        }
    }

    pub(crate) fn progress(&self, snapshot: &AnchorSnapshot) {
        if let Some(cb) = &self.on_progress {
            cb(snapshot);
        }
    }
}

/// A source waiting to be uploaded, with its callbacks.
pub struct UploadTask {
    pub(crate) source: Arc<dyn UploadSource>,
    pub(crate) callbacks: UploadCallbacks,
}

impl UploadTask {
    /// Creates a task without callbacks.
    pub fn new(source: impl UploadSource + 'static) -> Self {
        Self::from_shared(Arc::new(source))
    }

    /// Creates a task around an already shared source.
    pub fn from_shared(source: Arc<dyn UploadSource>) -> Self {
        Self {
            source,
            callbacks: UploadCallbacks::default(),
        }
    }

    /// Opens a local file as the task's source.
    pub fn from_path(path: &Path) -> Result<Self, UploadError> {
        Ok(Self::new(FileSource::open(path)?))
    }

    pub fn on_start(mut self, f: impl Fn(&AnchorSnapshot) + Send + Sync + 'static) -> Self {
        self.callbacks.on_start = Some(Box::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl Fn(&AnchorSnapshot) + Send + Sync + 'static) -> Self {
        self.callbacks.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_outcome(
        mut self,
        f: impl FnOnce(Result<CompletedUpload, UploadError>) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_outcome = Some(Box::new(f));
        self
    }

    pub fn source(&self) -> &dyn UploadSource {
        self.source.as_ref()
    }
}

/// Result delivered for a confirmed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedUpload {
    /// Anchor state after success.
    pub snapshot: AnchorSnapshot,
    /// Authoritative record returned by the server.
    pub record: FileRecord,
    /// Mean rate measured on the client, in bytes/second.
    pub client_average_rate: Option<u64>,
}

impl CompletedUpload {
    pub fn server_file_id(&self) -> &str {
        &self.record.id
    }

    /// Effective average rate, preferring the server's figure.
    pub fn average_rate(&self) -> Option<u64> {
        self.record.average_rate.or(self.client_average_rate)
    }
}
