//! FIFO backlog with at most one active transfer.
//!
//! `submit` appends to the backlog and starts a worker if none is running.
//! The worker drains the backlog one task at a time: byte stream through
//! [`SerialUploadDriver`], then confirmation through [`CompletionPoller`].
//! Every task ends with exactly one `on_outcome` call, and the worker moves
//! on to the next entry whatever that outcome was.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use stowage_transfer::{RateMeasurer, TransferAnchor, UploadSource, transfer_code};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::driver::SerialUploadDriver;
use crate::error::UploadError;
use crate::poller::CompletionPoller;
use crate::transmitter::ChunkTransmitter;
use crate::transport::UploadTransport;
use crate::types::{CompletedUpload, OutcomeCallback, UploadCallbacks, UploadTask};

struct QueuedUpload {
    anchor: Arc<TransferAnchor>,
    task: UploadTask,
}

#[derive(Default)]
struct SchedulerState {
    backlog: VecDeque<QueuedUpload>,
    active: Option<Arc<TransferAnchor>>,
    /// A worker task exists and will look at the backlog again.
    running: bool,
    next_id: u64,
}

struct Shared {
    transport: Arc<dyn UploadTransport>,
    config: UploadConfig,
    state: Mutex<SchedulerState>,
    /// Reset at the start of every transfer; only the worker touches it.
    rate: tokio::sync::Mutex<RateMeasurer>,
    busy: watch::Sender<bool>,
}

/// Serial upload scheduler.
///
/// Cheap to clone; clones share the same backlog and worker.
#[derive(Clone)]
pub struct UploadScheduler {
    shared: Arc<Shared>,
}

impl UploadScheduler {
    pub fn new(transport: Arc<dyn UploadTransport>, config: UploadConfig) -> Self {
        let (busy, _) = watch::channel(false);
        let rate = RateMeasurer::new(config.rate_ceiling);
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                state: Mutex::new(SchedulerState {
                    next_id: 1,
                    ..Default::default()
                }),
                rate: tokio::sync::Mutex::new(rate),
                busy,
            }),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.shared.config
    }

    /// Enqueues a task and returns its anchor right away.
    ///
    /// Must be called from within a Tokio runtime: the first submission on
    /// an idle scheduler spawns the worker.
    pub fn submit(&self, task: UploadTask) -> Arc<TransferAnchor> {
        let config = &self.shared.config;
        let source = task.source();
        let code = transfer_code(
            &config.owner,
            &config.domain,
            source.name(),
            source.size(),
            source.last_modified(),
        );

        let mut state = self.shared.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        let anchor = Arc::new(TransferAnchor::new(
            id,
            source.name(),
            source.size(),
            source.last_modified(),
            code,
        ));
        state.backlog.push_back(QueuedUpload {
            anchor: Arc::clone(&anchor),
            task,
        });
        debug!(
            transfer = id,
            file = %anchor.source_name(),
            size = anchor.total_size(),
            backlog = state.backlog.len(),
            "upload queued"
        );

        if !state.running {
            state.running = true;
            self.shared.busy.send_replace(true);
            tokio::spawn(run_worker(Arc::clone(&self.shared)));
        }
        anchor
    }

    /// Number of tasks waiting behind the active one.
    pub fn backlog_len(&self) -> usize {
        self.shared.state.lock().unwrap().backlog.len()
    }

    /// The transfer currently being driven, if any.
    pub fn active_transfer(&self) -> Option<Arc<TransferAnchor>> {
        self.shared.state.lock().unwrap().active.clone()
    }

    pub fn is_idle(&self) -> bool {
        !self.shared.state.lock().unwrap().running
    }

    /// Resolves once the backlog is drained and no transfer is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.busy.subscribe();
        // The sender lives in `shared`, so the channel cannot close here.
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Cancels a queued or active transfer.
    ///
    /// A queued task is removed and its `on_outcome` receives
    /// [`UploadError::Cancelled`] before this returns. An active one stops at
    /// its next suspension point. Returns `false` if the transfer is neither
    /// queued nor active.
    pub fn cancel(&self, anchor: &TransferAnchor) -> bool {
        anchor.cancel();

        let (removed, is_active) = {
            let mut state = self.shared.state.lock().unwrap();
            let removed = state
                .backlog
                .iter()
                .position(|q| q.anchor.id() == anchor.id())
                .and_then(|i| state.backlog.remove(i));
            let is_active = state.active.as_ref().is_some_and(|a| a.id() == anchor.id());
            (removed, is_active)
        };

        match removed {
            Some(queued) => {
                let err = UploadError::Cancelled;
                queued.anchor.mark_failed(err.code(), err.to_string());
                info!(transfer = anchor.id(), "queued upload cancelled");
                if let Some(on_outcome) = queued.task.callbacks.on_outcome {
                    on_outcome(Err(err));
                }
                true
            }
            None => {
                if is_active {
                    info!(transfer = anchor.id(), "cancelling active upload");
                }
                is_active
            }
        }
    }
}

async fn run_worker(shared: Arc<Shared>) {
    loop {
        let mut next = {
            let mut state = shared.state.lock().unwrap();
            match state.backlog.pop_front() {
                Some(queued) => {
                    state.active = Some(Arc::clone(&queued.anchor));
                    queued
                }
                None => {
                    state.active = None;
                    state.running = false;
                    shared.busy.send_replace(false);
                    debug!("upload backlog drained");
                    return;
                }
            }
        };

        let on_outcome = next.task.callbacks.on_outcome.take();
        let anchor = Arc::clone(&next.anchor);
        // A panicking hook takes down this task only.
        let result = match tokio::spawn(process(Arc::clone(&shared), next)).await {
            Ok(result) => result,
            Err(e) => {
                let err = UploadError::Aborted(e.to_string());
                anchor.mark_failed(err.code(), err.to_string());
                error!(transfer = anchor.id(), error = %e, "upload task aborted");
                Err(err)
            }
        };

        if let Some(on_outcome) = on_outcome {
            deliver(&anchor, on_outcome, result);
        }
        shared.state.lock().unwrap().active = None;
    }
}

/// Hands the terminal result to the caller, keeping the worker alive if the
/// hook panics.
fn deliver(
    anchor: &TransferAnchor,
    on_outcome: OutcomeCallback,
    result: Result<CompletedUpload, UploadError>,
) {
    if panic::catch_unwind(AssertUnwindSafe(move || on_outcome(result))).is_err() {
        error!(transfer = anchor.id(), "outcome callback panicked");
    }
}

async fn process(
    shared: Arc<Shared>,
    queued: QueuedUpload,
) -> Result<CompletedUpload, UploadError> {
    let QueuedUpload { anchor, task } = queued;

    info!(
        transfer = anchor.id(),
        file = %anchor.source_name(),
        size = anchor.total_size(),
        "upload started"
    );
    let result = upload(&shared, &anchor, &task.source, &task.callbacks).await;

    match &result {
        Ok(done) => info!(
            transfer = anchor.id(),
            file_id = %done.server_file_id(),
            rate = ?done.average_rate(),
            "upload succeeded"
        ),
        Err(e) => {
            anchor.mark_failed(e.code(), e.to_string());
            warn!(
                transfer = anchor.id(),
                code = e.code(),
                position = anchor.position(),
                error = %e,
                "upload failed"
            );
        }
    }
    result
}

async fn upload(
    shared: &Shared,
    anchor: &TransferAnchor,
    source: &Arc<dyn UploadSource>,
    callbacks: &UploadCallbacks,
) -> Result<CompletedUpload, UploadError> {
    if anchor.is_cancelled() {
        return Err(UploadError::Cancelled);
    }

    let config = &shared.config;
    let client_average_rate = {
        let mut rate = shared.rate.lock().await;
        rate.set_ceiling(config.rate_ceiling);
        let transmitter =
            ChunkTransmitter::new(shared.transport.as_ref(), &config.owner, &config.domain);
        SerialUploadDriver::new(transmitter, &mut rate, config)
            .run(anchor, source, callbacks)
            .await?;
        rate.average_rate()
    };

    let record = CompletionPoller::new(shared.transport.as_ref(), &config.confirm)
        .confirm(anchor)
        .await?;

    Ok(CompletedUpload {
        snapshot: anchor.snapshot(),
        record,
        client_average_rate,
    })
}
