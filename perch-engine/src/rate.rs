//! Process-wide rate limiting for outbound service calls.
//!
//! Two layers, both enforced by [`RateLimiter::acquire`]:
//! - a rolling per-endpoint window (calls per window length), created lazily
//!   the first time an endpoint name is seen;
//! - a global minimum spacing between *any* two outbound calls, regardless
//!   of endpoint.
//!
//! `acquire` never fails on its own; it waits as long as it has to. The only
//! early exit is the shutdown token, which is honored at every sleep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// A rate-limit wait was interrupted by shutdown. Cooperative, not a failure.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("rate-limit wait interrupted by shutdown")]
pub struct Cancelled;

/// Quota knobs shared by every endpoint. One authoritative default; tune per
/// deployment through configuration, never at call sites.
#[derive(Clone, Copy, Debug)]
pub struct RatePolicy {
    /// Minimum spacing between any two outbound calls.
    pub min_spacing: Duration,
    /// Rolling window length per endpoint.
    pub window: Duration,
    /// Calls allowed per endpoint within one window.
    pub max_calls: u32,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_millis(1500),
            window: Duration::from_secs(15 * 60),
            max_calls: 150,
        }
    }
}

#[derive(Debug)]
struct EndpointWindow {
    started: Instant,
    calls: u32,
}

impl EndpointWindow {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            calls: 0,
        }
    }

    /// Claim one call, or report how long until the window has room again.
    fn try_claim(&mut self, now: Instant, policy: &RatePolicy) -> Result<(), Duration> {
        if now.duration_since(self.started) >= policy.window {
            self.started = now;
            self.calls = 0;
        }
        if self.calls < policy.max_calls {
            self.calls += 1;
            Ok(())
        } else {
            Err(policy.window.saturating_sub(now.duration_since(self.started)))
        }
    }
}

pub struct RateLimiter {
    policy: RatePolicy,
    // Serializes the pacing check; holding the lock across the pacing sleep
    // is what makes completions at least `min_spacing` apart.
    last_call: Mutex<Option<Instant>>,
    endpoints: Mutex<HashMap<String, Arc<Mutex<EndpointWindow>>>>,
}

impl RateLimiter {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            last_call: Mutex::new(None),
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    async fn window_for(&self, endpoint: &str) -> Arc<Mutex<EndpointWindow>> {
        let mut map = self.endpoints.lock().await;
        map.entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(EndpointWindow::new(Instant::now()))))
            .clone()
    }

    /// Block until a call to `endpoint` is allowed, or until `cancel` fires.
    pub async fn acquire(
        &self,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            let window = self.window_for(endpoint).await;
            let claim = {
                let mut w = window.lock().await;
                w.try_claim(Instant::now(), &self.policy)
            };
            match claim {
                Ok(()) => break,
                Err(wait) => {
                    tracing::debug!(
                        endpoint,
                        wait_ms = wait.as_millis() as u64,
                        "rate.window_exhausted"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Cancelled),
                        _ = sleep(wait) => {}
                    }
                }
            }
        }

        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = Instant::now().duration_since(prev);
            if elapsed < self.policy.min_spacing {
                let wait = self.policy.min_spacing - elapsed;
                tokio::select! {
                    // The window slot claimed above stays consumed; the
                    // process is shutting down, so no call is made with it.
                    _ = cancel.cancelled() => return Err(Cancelled),
                    _ = sleep(wait) => {}
                }
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}
