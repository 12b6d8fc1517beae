//! The two steady-state ingestion sweeps over the watchlist.
//!
//! The profile sweep fills in profile data for watchlist rows that have none
//! yet; the content sweep re-fetches recent posts for every watched handle.
//! Both run forever: one pass over the table, a long pause, another pass.
//! A row that fails is logged and skipped, never marked, so the next pass
//! retries it; persist failures are per-item in the same way. Only worklist
//! read errors abort the pass and surface to the supervisor, which restarts
//! the sweep with backoff.

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchError, Dispatcher};
use crate::store::IngestStore;

#[derive(Clone, Copy, Debug)]
pub struct SweepOptions {
    /// Pause between two passes over the whole table.
    pub pass_interval: Duration,
    /// Pause between rows within one pass.
    pub row_delay: Duration,
    /// Posts requested per handle in the content sweep.
    pub batch: u32,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            pass_interval: Duration::from_secs(12 * 60 * 60),
            row_delay: Duration::from_secs(10),
            batch: 20,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PassEnd {
    Completed,
    Cancelled,
}

/// Sleep unless shutdown fires first. Returns false on shutdown.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

pub async fn run_profile_sweep(
    store: IngestStore,
    dispatcher: Dispatcher,
    options: SweepOptions,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        if profile_pass(&store, &dispatcher, &options, &cancel).await? == PassEnd::Cancelled {
            return Ok(());
        }
        if !pause(options.pass_interval, &cancel).await {
            return Ok(());
        }
    }
}

pub async fn run_content_sweep(
    store: IngestStore,
    dispatcher: Dispatcher,
    options: SweepOptions,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        if content_pass(&store, &dispatcher, &options, &cancel).await? == PassEnd::Cancelled {
            return Ok(());
        }
        if !pause(options.pass_interval, &cancel).await {
            return Ok(());
        }
    }
}

async fn profile_pass(
    store: &IngestStore,
    dispatcher: &Dispatcher,
    options: &SweepOptions,
    cancel: &CancellationToken,
) -> Result<PassEnd> {
    let handles = store.accounts_missing_profile().await?;
    if handles.is_empty() {
        tracing::debug!("sweep.profile.nothing_missing");
        return Ok(PassEnd::Completed);
    }
    tracing::info!(rows = handles.len(), "sweep.profile.pass_start");

    for handle in handles {
        match dispatcher.profile(&handle).await {
            Ok(attributed) => match store.upsert_profile(&attributed.value).await {
                Ok(()) => {
                    tracing::info!(handle, via = attributed.via, "sweep.profile.ingested");
                }
                Err(error) => {
                    tracing::warn!(handle, ?error, "sweep.profile.persist_failed");
                }
            },
            Err(DispatchError::Cancelled) => return Ok(PassEnd::Cancelled),
            // Skip the row; it stays unmarked and the next pass retries it.
            Err(error) => {
                tracing::warn!(handle, ?error, "sweep.profile.row_failed");
            }
        }
        if !pause(options.row_delay, cancel).await {
            return Ok(PassEnd::Cancelled);
        }
    }
    Ok(PassEnd::Completed)
}

async fn content_pass(
    store: &IngestStore,
    dispatcher: &Dispatcher,
    options: &SweepOptions,
    cancel: &CancellationToken,
) -> Result<PassEnd> {
    let handles = store.watch_handles().await?;
    tracing::info!(rows = handles.len(), "sweep.content.pass_start");

    for handle in handles {
        match dispatcher.content(&handle, options.batch).await {
            Ok(attributed) => {
                let mut stored = 0usize;
                for item in &attributed.value {
                    match store.upsert_post(item).await {
                        Ok(()) => stored += 1,
                        Err(error) => {
                            tracing::warn!(
                                handle,
                                id = item.id,
                                ?error,
                                "sweep.content.persist_failed"
                            );
                        }
                    }
                }
                if let Err(error) = store.mark_content_synced(&handle).await {
                    tracing::warn!(handle, ?error, "sweep.content.stamp_failed");
                }
                tracing::info!(
                    handle,
                    posts = stored,
                    via = attributed.via,
                    "sweep.content.ingested"
                );
            }
            Err(DispatchError::Cancelled) => return Ok(PassEnd::Cancelled),
            Err(error) => {
                tracing::warn!(handle, ?error, "sweep.content.row_failed");
            }
        }
        if !pause(options.row_delay, cancel).await {
            return Ok(PassEnd::Cancelled);
        }
    }
    Ok(PassEnd::Completed)
}
