//! Process assembly: storage, identity pool, dispatcher, and the three
//! long-running ingestion loops, all bound to one shutdown token.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use perch_config::{IngestSettings, PerchConfig, RateSettings};
use perch_drivers::GatewayCapability;
use perch_engine::{
    priority_channel, run_content_sweep, run_priority_pipeline, run_profile_sweep, supervise,
    AgentPool, Dispatcher, IngestStore, PriorityOptions, RateLimiter, RatePolicy, SweepOptions,
};
use perch_social::{load_credentials, Capability, SessionStore};

fn rate_policy(limits: &RateSettings) -> RatePolicy {
    RatePolicy {
        min_spacing: Duration::from_millis(limits.min_spacing_ms),
        window: Duration::from_secs(limits.window_secs),
        max_calls: limits.max_calls,
    }
}

fn profile_sweep_options(ingest: &IngestSettings) -> SweepOptions {
    SweepOptions {
        pass_interval: Duration::from_secs(ingest.profile_pass_secs),
        row_delay: Duration::from_secs(ingest.row_delay_secs),
        batch: ingest.content_batch,
    }
}

fn content_sweep_options(ingest: &IngestSettings) -> SweepOptions {
    SweepOptions {
        pass_interval: Duration::from_secs(ingest.content_pass_secs),
        row_delay: Duration::from_secs(ingest.row_delay_secs),
        batch: ingest.content_batch,
    }
}

fn priority_options(ingest: &IngestSettings) -> PriorityOptions {
    PriorityOptions {
        pass_interval: Duration::from_secs(ingest.priority_pass_secs),
        row_delay: Duration::from_secs(ingest.row_delay_secs),
        batch: ingest.content_batch,
    }
}

pub async fn run(cfg: PerchConfig) -> Result<()> {
    let cancel = CancellationToken::new();

    let store = IngestStore::connect(&cfg.database_url).await?;
    store.migrate().await?;
    for handle in &cfg.watchlist {
        store.add_watch_account(handle).await?;
    }

    let data_dir = Path::new(&cfg.data_dir);
    let credentials = load_credentials(data_dir)?;
    let sessions = SessionStore::new(data_dir);

    let capability: Arc<dyn Capability> = Arc::new(GatewayCapability::new(
        &cfg.gateway.base_url,
        cfg.gateway.auth_token.clone(),
    ));
    let pool = Arc::new(AgentPool::bootstrap(capability.as_ref(), &sessions, credentials).await?);
    tracing::info!(accounts = pool.count(), "harness.pool_ready");

    let limiter = Arc::new(RateLimiter::new(rate_policy(&cfg.limits)));
    let dispatcher = Dispatcher::new(capability, pool, limiter, cancel.clone());

    let mut tasks = JoinSet::new();

    tasks.spawn({
        let store = store.clone();
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        let options = profile_sweep_options(&cfg.ingest);
        async move {
            supervise(
                "profile_sweep",
                {
                    let cancel = cancel.clone();
                    move || {
                        run_profile_sweep(store.clone(), dispatcher.clone(), options, cancel.clone())
                    }
                },
                cancel,
            )
            .await;
        }
    });

    tasks.spawn({
        let store = store.clone();
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        let options = content_sweep_options(&cfg.ingest);
        async move {
            supervise(
                "content_sweep",
                {
                    let cancel = cancel.clone();
                    move || {
                        run_content_sweep(store.clone(), dispatcher.clone(), options, cancel.clone())
                    }
                },
                cancel,
            )
            .await;
        }
    });

    // The feed handle stays here for the process lifetime; dropping it would
    // close the queue and drain the pipeline.
    let (feed, feed_rx) = priority_channel(cfg.ingest.queue_capacity);

    tasks.spawn({
        let store = store.clone();
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        let options = priority_options(&cfg.ingest);
        async move {
            // The pipeline owns its receiver, so it runs unsupervised; its
            // failures are per-handle and it only exits on shutdown.
            run_priority_pipeline(store, dispatcher, feed_rx, options, cancel).await;
        }
    });

    tracing::info!("harness.running");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("harness.interrupt");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    while let Some(joined) = tasks.join_next().await {
        if let Err(error) = joined {
            tracing::error!(?error, "harness.task_panicked");
        }
    }
    tracing::info!(priority_dropped = feed.dropped(), "harness.stopped");
    Ok(())
}
