//! Restart wrapper for the long-running ingestion loops.

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// Run a fallible unit repeatedly until shutdown, with exponential backoff.
///
/// A clean `Ok(())` return stops the supervisor; an error restarts the unit
/// after a backoff that doubles up to a 30s cap and resets on success.
pub async fn supervise<F, Fut>(name: &'static str, mut run_once: F, cancel: CancellationToken)
where
    F: FnMut() -> Fut + Send,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    let mut backoff = Duration::from_millis(100);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(task = name, "supervise.shutdown");
                return;
            }
            res = run_once() => {
                match res {
                    Ok(()) => {
                        tracing::info!(task = name, "supervise.finished");
                        return;
                    }
                    Err(error) => {
                        tracing::warn!(
                            task = name,
                            ?error,
                            backoff_ms = backoff.as_millis() as u64,
                            "supervise.restarting"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                tracing::info!(task = name, "supervise.shutdown");
                                return;
                            }
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(Duration::from_secs(30));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn restarts_after_errors_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = attempts.clone();
        supervise(
            "test",
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow!("boom"))
                    } else {
                        Ok(())
                    }
                }
            },
            cancel,
        )
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_backoff_sleep() {
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                supervise(
                    "test",
                    || async { Err(anyhow!("always fails")) },
                    cancel,
                )
                .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
