//! stowage command-line uploader.
//!
//! Uploads local files into a store directory through the serial upload
//! engine, one file at a time, then waits for every record to be confirmed.

mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, bail};
use stowage_transfer::{AnchorSnapshot, source_checksum};
use stowage_upload::{UploadConfig, UploadScheduler, UploadTask, UploadTransport};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::store::LocalStore;

const USAGE: &str = "usage: stowage [--config FILE] --store DIR FILE...";

#[derive(Debug, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    store: PathBuf,
    files: Vec<PathBuf>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut config = None;
        let mut store = None;
        let mut files = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => config = Some(args.next().context(USAGE)?.into()),
                "--store" => store = Some(args.next().context(USAGE)?.into()),
                flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
                _ => files.push(arg.into()),
            }
        }

        let Some(store) = store else {
            bail!("missing --store\n{USAGE}");
        };
        if files.is_empty() {
            bail!("no files given\n{USAGE}");
        }
        Ok(Self {
            config,
            store,
            files,
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stowage=debug")),
        )
        .init();

    let args = Args::parse(std::env::args().skip(1))?;
    let config = match &args.config {
        Some(path) => UploadConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => UploadConfig::default(),
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        store = %args.store.display(),
        files = args.files.len(),
        "starting stowage"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let failures = rt.block_on(run(args, config))?;
    if failures > 0 {
        bail!("{failures} upload(s) failed");
    }
    Ok(())
}

async fn run(args: Args, config: UploadConfig) -> anyhow::Result<usize> {
    let store = LocalStore::open(&args.store)
        .with_context(|| format!("opening store {}", args.store.display()))?;
    let transport: Arc<dyn UploadTransport> = Arc::new(store);
    let scheduler = UploadScheduler::new(transport, config);
    let failures = Arc::new(AtomicUsize::new(0));

    for path in &args.files {
        let task = match UploadTask::from_path(path) {
            Ok(task) => task,
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot open file");
                failures.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        if task.source().size() == 0 {
            // The store only creates records from chunks.
            warn!(path = %path.display(), "skipping empty file");
            continue;
        }

        let expected = match source_checksum(task.source()) {
            Ok(sum) => sum,
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot read file");
                failures.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let failed = Arc::clone(&failures);
        let task = task
            .on_progress(|s: &AnchorSnapshot| {
                debug!(
                    transfer = s.id,
                    file = %s.source_name,
                    percent = s.percentage(),
                    "uploading"
                );
            })
            .on_outcome(move |result| match result {
                Ok(done) if done.record.checksum.as_deref() != Some(expected.as_str()) => {
                    error!(
                        file = %done.record.name,
                        expected = %expected,
                        stored = ?done.record.checksum,
                        "stored file does not match source"
                    );
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(done) => info!(
                    file = %done.record.name,
                    file_id = %done.server_file_id(),
                    bytes = done.record.size,
                    rate = ?done.average_rate(),
                    "uploaded"
                ),
                Err(e) => {
                    error!(code = e.code(), error = %e, "upload failed");
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            });
        scheduler.submit(task);
    }

    scheduler.wait_idle().await;
    Ok(failures.load(Ordering::Relaxed))
}
