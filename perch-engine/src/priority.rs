//! Priority ingestion: a bounded feed of discovered handles plus a periodic
//! catch-up pass over everything discovered so far.
//!
//! Producers push handles through [`PriorityFeed::offer`], which never blocks:
//! when the queue is full the handle is dropped, counted, and logged. The
//! pipeline ingests each handle as it arrives and additionally re-walks the
//! whole priority table on a fixed period so dropped or failed handles are
//! eventually picked up anyway. Fetch and store failures are per-handle and
//! logged; the loop itself only exits on shutdown or feed closure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchError, Dispatcher};
use crate::store::IngestStore;

#[derive(Clone, Copy, Debug)]
pub struct PriorityOptions {
    /// Period of the catch-up pass over the priority table.
    pub pass_interval: Duration,
    /// Pause between rows within a catch-up pass.
    pub row_delay: Duration,
    /// Posts requested per handle.
    pub batch: u32,
}

impl Default for PriorityOptions {
    fn default() -> Self {
        Self {
            pass_interval: Duration::from_secs(6 * 60 * 60),
            row_delay: Duration::from_secs(10),
            batch: 20,
        }
    }
}

/// Non-blocking sending half of the priority queue. Cheap to clone.
#[derive(Clone)]
pub struct PriorityFeed {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl PriorityFeed {
    /// Queue a handle for ingestion. Drops it when the queue is full or the
    /// pipeline has shut down; the periodic pass covers dropped handles.
    pub fn offer(&self, handle: impl Into<String>) {
        let handle = handle.into();
        if let Err(rejected) = self.tx.try_send(handle) {
            let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let handle = match &rejected {
                mpsc::error::TrySendError::Full(h) => h,
                mpsc::error::TrySendError::Closed(h) => h,
            };
            tracing::warn!(handle, total_dropped = n, "priority.offer_dropped");
        }
    }

    /// Total handles dropped since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Build the bounded queue between discovery producers and the pipeline.
pub fn priority_channel(capacity: usize) -> (PriorityFeed, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        PriorityFeed {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

#[derive(Debug, PartialEq, Eq)]
enum IngestEnd {
    Done,
    Cancelled,
}

pub async fn run_priority_pipeline(
    store: IngestStore,
    dispatcher: Dispatcher,
    mut rx: mpsc::Receiver<String>,
    options: PriorityOptions,
    cancel: CancellationToken,
) {
    // First tick fires one full period from now; startup already ingests
    // whatever the feed delivers.
    let mut ticker = interval_at(Instant::now() + options.pass_interval, options.pass_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            received = rx.recv() => {
                match received {
                    Some(handle) => {
                        if ingest_one(&store, &dispatcher, &handle, options.batch).await
                            == IngestEnd::Cancelled
                        {
                            return;
                        }
                    }
                    // All producers are gone; nothing will ever arrive again.
                    None => {
                        tracing::info!("priority.feed_closed");
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if catchup_pass(&store, &dispatcher, &options, &cancel).await
                    == IngestEnd::Cancelled
                {
                    return;
                }
            }
        }
    }
}

async fn catchup_pass(
    store: &IngestStore,
    dispatcher: &Dispatcher,
    options: &PriorityOptions,
    cancel: &CancellationToken,
) -> IngestEnd {
    let handles = match store.priority_handles().await {
        Ok(handles) => handles,
        // The next tick retries the whole pass.
        Err(error) => {
            tracing::warn!(?error, "priority.worklist_read_failed");
            return IngestEnd::Done;
        }
    };
    tracing::info!(rows = handles.len(), "priority.catchup_start");
    for handle in handles {
        if ingest_one(store, dispatcher, &handle, options.batch).await == IngestEnd::Cancelled {
            return IngestEnd::Cancelled;
        }
        tokio::select! {
            _ = cancel.cancelled() => return IngestEnd::Cancelled,
            _ = tokio::time::sleep(options.row_delay) => {}
        }
    }
    IngestEnd::Done
}

/// Ingest one priority handle: resolve its remote id on first contact, then
/// pull a batch of recent posts. Fetch and store failures are logged and
/// skipped, never fatal; the catch-up pass retries them.
async fn ingest_one(
    store: &IngestStore,
    dispatcher: &Dispatcher,
    handle: &str,
    batch: u32,
) -> IngestEnd {
    let known = match store.priority_remote_id(handle).await {
        Ok(remote_id) => remote_id.is_some(),
        Err(error) => {
            tracing::warn!(handle, ?error, "priority.lookup_failed");
            return IngestEnd::Done;
        }
    };
    if !known {
        match dispatcher.profile(handle).await {
            Ok(attributed) => {
                if let Err(error) = store
                    .add_priority_account(
                        handle,
                        Some(&attributed.value.remote_id),
                        attributed.value.followers,
                    )
                    .await
                {
                    tracing::warn!(handle, ?error, "priority.register_failed");
                    return IngestEnd::Done;
                }
            }
            Err(DispatchError::Cancelled) => return IngestEnd::Cancelled,
            Err(error) => {
                tracing::warn!(handle, ?error, "priority.profile_failed");
                return IngestEnd::Done;
            }
        }
    }

    match dispatcher.content(handle, batch).await {
        Ok(attributed) => {
            let mut stored = 0usize;
            for item in &attributed.value {
                match store.upsert_priority_post(handle, item).await {
                    Ok(()) => stored += 1,
                    Err(error) => {
                        tracing::warn!(handle, id = item.id, ?error, "priority.persist_failed");
                    }
                }
            }
            tracing::info!(
                handle,
                posts = stored,
                via = attributed.via,
                "priority.ingested"
            );
        }
        Err(DispatchError::Cancelled) => return IngestEnd::Cancelled,
        Err(error) => {
            tracing::warn!(handle, ?error, "priority.content_failed");
        }
    }
    IngestEnd::Done
}
