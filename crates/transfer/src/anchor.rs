use std::sync::RwLock;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TransferError;

/// Lifecycle state of a transfer.
///
/// `Succeeded` and `Failed` are terminal and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransferOutcome {
    Pending,
    InProgress,
    Succeeded,
    Failed { code: i32, reason: String },
}

impl TransferOutcome {
    /// Returns `true` for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

/// Point-in-time view of an anchor, handed to progress callbacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorSnapshot {
    pub id: u64,
    pub source_name: String,
    pub total_size: u64,
    pub position: u64,
    pub outcome: TransferOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_file_id: Option<String>,
}

impl AnchorSnapshot {
    /// Returns the acknowledged share of the transfer as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 {
            return if self.outcome == TransferOutcome::Succeeded {
                100.0
            } else {
                0.0
            };
        }
        (self.position as f64 / self.total_size as f64) * 100.0
    }
}

/// Tracks a single transfer (thread-safe).
///
/// Identity and source metadata are fixed at construction; the cursor,
/// server file id and outcome live behind a lock.
pub struct TransferAnchor {
    id: u64,
    source_name: String,
    source_last_modified: i64,
    total_size: u64,
    transfer_code: String,
    cancel: CancellationToken,
    inner: RwLock<AnchorInner>,
}

struct AnchorInner {
    position: u64,
    server_file_id: Option<String>,
    outcome: TransferOutcome,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

impl TransferAnchor {
    /// Creates a pending anchor with the cursor at zero.
    pub fn new(
        id: u64,
        source_name: impl Into<String>,
        total_size: u64,
        source_last_modified: i64,
        transfer_code: impl Into<String>,
    ) -> Self {
        Self {
            id,
            source_name: source_name.into(),
            source_last_modified,
            total_size,
            transfer_code: transfer_code.into(),
            cancel: CancellationToken::new(),
            inner: RwLock::new(AnchorInner {
                position: 0,
                server_file_id: None,
                outcome: TransferOutcome::Pending,
                started_at: None,
                ended_at: None,
            }),
        }
    }

    /// Marks the transfer as in-progress. No-op unless still pending.
    pub fn start(&self) {
        let mut s = self.inner.write().unwrap();
        if s.outcome == TransferOutcome::Pending {
            s.outcome = TransferOutcome::InProgress;
            s.started_at = Some(Instant::now());
        }
    }

    /// Moves the cursor forward by `acked` bytes and returns the new position.
    ///
    /// Fails without touching the cursor if it would pass `total_size`.
    pub fn advance(&self, acked: u64) -> Result<u64, TransferError> {
        let mut s = self.inner.write().unwrap();
        let next = s.position.checked_add(acked).filter(|p| *p <= self.total_size);
        match next {
            Some(p) => {
                s.position = p;
                Ok(p)
            }
            None => Err(TransferError::InvariantViolation(format!(
                "cursor {} + {acked} exceeds total size {}",
                s.position, self.total_size
            ))),
        }
    }

    /// Records the server-assigned file id. Only the first id is kept.
    pub fn bind_server_file_id(&self, file_id: impl Into<String>) {
        let mut s = self.inner.write().unwrap();
        if s.server_file_id.is_none() {
            s.server_file_id = Some(file_id.into());
        }
    }

    /// Transitions to `Succeeded`. Returns `false` if already terminal.
    pub fn mark_succeeded(&self, server_file_id: impl Into<String>) -> bool {
        let mut s = self.inner.write().unwrap();
        if s.outcome.is_terminal() {
            debug!(transfer = self.id, "ignoring success on terminal anchor");
            return false;
        }
        if s.server_file_id.is_none() {
            s.server_file_id = Some(server_file_id.into());
        }
        s.outcome = TransferOutcome::Succeeded;
        s.ended_at = Some(Instant::now());
        true
    }

    /// Transitions to `Failed`. Returns `false` if already terminal.
    pub fn mark_failed(&self, code: i32, reason: impl Into<String>) -> bool {
        let mut s = self.inner.write().unwrap();
        if s.outcome.is_terminal() {
            debug!(transfer = self.id, "ignoring failure on terminal anchor");
            return false;
        }
        s.outcome = TransferOutcome::Failed {
            code,
            reason: reason.into(),
        };
        s.ended_at = Some(Instant::now());
        true
    }

    /// Requests cooperative cancellation of this transfer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns a token that resolves when cancellation is requested.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Client-local sequence number.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Source last-modified time in epoch milliseconds.
    pub fn source_last_modified(&self) -> i64 {
        self.source_last_modified
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Code the server uses to look up the finished file.
    pub fn transfer_code(&self) -> &str {
        &self.transfer_code
    }

    /// Bytes acknowledged by the server so far.
    pub fn position(&self) -> u64 {
        self.inner.read().unwrap().position
    }

    pub fn server_file_id(&self) -> Option<String> {
        self.inner.read().unwrap().server_file_id.clone()
    }

    pub fn outcome(&self) -> TransferOutcome {
        self.inner.read().unwrap().outcome.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.read().unwrap().outcome.is_terminal()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.inner.read().unwrap().started_at
    }

    /// Set exactly once, on the transition into a terminal state.
    pub fn ended_at(&self) -> Option<Instant> {
        self.inner.read().unwrap().ended_at
    }

    /// Returns the current state as a serializable snapshot.
    pub fn snapshot(&self) -> AnchorSnapshot {
        let s = self.inner.read().unwrap();
        AnchorSnapshot {
            id: self.id,
            source_name: self.source_name.clone(),
            total_size: self.total_size,
            position: s.position,
            outcome: s.outcome.clone(),
            server_file_id: s.server_file_id.clone(),
        }
    }
}

impl std::fmt::Debug for TransferAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.inner.read().unwrap();
        f.debug_struct("TransferAnchor")
            .field("id", &self.id)
            .field("source_name", &self.source_name)
            .field("position", &s.position)
            .field("total_size", &self.total_size)
            .field("outcome", &s.outcome)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_anchor(total: u64) -> TransferAnchor {
        TransferAnchor::new(1, "report.pdf", total, 1_700_000_000_000, "code-1")
    }

    #[test]
    fn new_anchor_is_pending() {
        let anchor = sample_anchor(1024);
        assert_eq!(anchor.outcome(), TransferOutcome::Pending);
        assert_eq!(anchor.position(), 0);
        assert!(anchor.server_file_id().is_none());
        assert!(anchor.ended_at().is_none());
        assert!(!anchor.is_terminal());
    }

    #[test]
    fn start_sets_in_progress() {
        let anchor = sample_anchor(1024);
        anchor.start();
        assert_eq!(anchor.outcome(), TransferOutcome::InProgress);
        assert!(anchor.started_at().is_some());
    }

    #[test]
    fn advance_is_monotonic_and_bounded() {
        let anchor = sample_anchor(1000);
        let mut last = 0;
        for step in [100, 0, 250, 400, 250] {
            let pos = anchor.advance(step).unwrap();
            assert!(pos >= last);
            assert!(pos <= anchor.total_size());
            last = pos;
        }
        assert_eq!(anchor.position(), 1000);
    }

    #[test]
    fn advance_past_total_is_rejected() {
        let anchor = sample_anchor(1000);
        anchor.advance(900).unwrap();
        let err = anchor.advance(101).unwrap_err();
        assert!(matches!(err, TransferError::InvariantViolation(_)));
        // Cursor untouched.
        assert_eq!(anchor.position(), 900);
    }

    #[test]
    fn advance_overflow_is_rejected() {
        let anchor = sample_anchor(u64::MAX);
        anchor.advance(10).unwrap();
        assert!(anchor.advance(u64::MAX).is_err());
        assert_eq!(anchor.position(), 10);
    }

    #[test]
    fn mark_failed_twice_keeps_first() {
        let anchor = sample_anchor(1000);
        anchor.start();
        assert!(anchor.mark_failed(403, "forbidden"));
        let ended = anchor.ended_at();
        assert!(ended.is_some());

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(!anchor.mark_failed(500, "again"));
        assert!(!anchor.mark_succeeded("f-1"));
        assert_eq!(anchor.ended_at(), ended);
        assert_eq!(
            anchor.outcome(),
            TransferOutcome::Failed {
                code: 403,
                reason: "forbidden".into()
            }
        );
    }

    #[test]
    fn mark_succeeded_twice_keeps_first() {
        let anchor = sample_anchor(10);
        anchor.start();
        anchor.advance(10).unwrap();
        assert!(anchor.mark_succeeded("f-1"));
        let ended = anchor.ended_at();

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(!anchor.mark_succeeded("f-2"));
        assert_eq!(anchor.ended_at(), ended);
        assert_eq!(anchor.server_file_id().as_deref(), Some("f-1"));
        assert_eq!(anchor.outcome(), TransferOutcome::Succeeded);
    }

    #[test]
    fn server_file_id_bound_once() {
        let anchor = sample_anchor(10);
        anchor.bind_server_file_id("f-1");
        anchor.bind_server_file_id("f-2");
        assert!(anchor.mark_succeeded("f-3"));
        assert_eq!(anchor.server_file_id().as_deref(), Some("f-1"));
    }

    #[test]
    fn cancel_is_observable() {
        let anchor = sample_anchor(10);
        let token = anchor.cancel_token();
        assert!(!anchor.is_cancelled());
        anchor.cancel();
        assert!(anchor.is_cancelled());
        assert!(token.is_cancelled());
        // Cancellation alone does not change the outcome.
        assert_eq!(anchor.outcome(), TransferOutcome::Pending);
    }

    #[test]
    fn snapshot_reflects_state() {
        let anchor = sample_anchor(400);
        anchor.start();
        anchor.advance(100).unwrap();
        let snap = anchor.snapshot();
        assert_eq!(snap.id, 1);
        assert_eq!(snap.position, 100);
        assert_eq!(snap.total_size, 400);
        assert_eq!(snap.percentage(), 25.0);

        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"sourceName\":\"report.pdf\""));
        assert!(json.contains("\"state\":\"in_progress\""));
        assert!(!json.contains("serverFileId"));
    }

    #[test]
    fn concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let anchor = Arc::new(sample_anchor(100_000));
        anchor.start();

        let mut handles = vec![];
        for _ in 0..10 {
            let a = Arc::clone(&anchor);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    a.advance(1).unwrap();
                }
            }));
        }
        for _ in 0..10 {
            let a = Arc::clone(&anchor);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let _ = a.snapshot();
                    let _ = a.position();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(anchor.position(), 1000);
    }
}
