//! Dispatch: the single choke point for outbound service calls.
//!
//! Every call selects the next identity from the pool, waits for the rate
//! limiter, then goes through the capability facade. Results come back
//! attributed to the identity that performed the call, so failures can be
//! traced to a specific account without the caller knowing pool internals.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentPool;
use crate::rate::RateLimiter;
use perch_social::{Capability, ContentItem, MutateAction, ProfileData};

pub const EP_GET_PROFILE: &str = "get_profile";
pub const EP_GET_CONTENT: &str = "get_content";
pub const EP_SEARCH: &str = "search";
pub const EP_MUTATE: &str = "mutate";

/// A result paired with the label of the identity that produced it.
#[derive(Clone, Debug)]
pub struct Attributed<T> {
    pub value: T,
    /// Label of the identity the call went out through.
    pub via: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Shutdown fired while waiting for a rate-limit slot. Not a failure.
    #[error("dispatch interrupted by shutdown")]
    Cancelled,
    #[error("{endpoint} failed via account {via}")]
    Failed {
        endpoint: &'static str,
        via: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Clone)]
pub struct Dispatcher {
    capability: Arc<dyn Capability>,
    pool: Arc<AgentPool>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        capability: Arc<dyn Capability>,
        pool: Arc<AgentPool>,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            capability,
            pool,
            limiter,
            cancel,
        }
    }

    pub async fn profile(&self, handle: &str) -> Result<Attributed<ProfileData>, DispatchError> {
        let identity = self.pool.next();
        self.limiter
            .acquire(EP_GET_PROFILE, &self.cancel)
            .await
            .map_err(|_| DispatchError::Cancelled)?;
        tracing::debug!(handle, via = identity.label, "dispatch.get_profile");
        let value = self
            .capability
            .fetch_profile(&identity, handle)
            .await
            .map_err(|source| DispatchError::Failed {
                endpoint: EP_GET_PROFILE,
                via: identity.label.clone(),
                source,
            })?;
        Ok(Attributed {
            value,
            via: identity.label.clone(),
        })
    }

    pub async fn content(
        &self,
        handle: &str,
        limit: u32,
    ) -> Result<Attributed<Vec<ContentItem>>, DispatchError> {
        let identity = self.pool.next();
        self.limiter
            .acquire(EP_GET_CONTENT, &self.cancel)
            .await
            .map_err(|_| DispatchError::Cancelled)?;
        tracing::debug!(handle, limit, via = identity.label, "dispatch.get_content");
        let value = self
            .capability
            .fetch_content(&identity, handle, limit)
            .await
            .map_err(|source| DispatchError::Failed {
                endpoint: EP_GET_CONTENT,
                via: identity.label.clone(),
                source,
            })?;
        Ok(Attributed {
            value,
            via: identity.label.clone(),
        })
    }

    pub async fn search(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Attributed<Vec<ContentItem>>, DispatchError> {
        let identity = self.pool.next();
        self.limiter
            .acquire(EP_SEARCH, &self.cancel)
            .await
            .map_err(|_| DispatchError::Cancelled)?;
        tracing::debug!(query, limit, via = identity.label, "dispatch.search");
        let value = self
            .capability
            .search_content(&identity, query, limit)
            .await
            .map_err(|source| DispatchError::Failed {
                endpoint: EP_SEARCH,
                via: identity.label.clone(),
                source,
            })?;
        Ok(Attributed {
            value,
            via: identity.label.clone(),
        })
    }

    pub async fn mutate(&self, action: &MutateAction) -> Result<Attributed<()>, DispatchError> {
        let identity = self.pool.next();
        self.limiter
            .acquire(EP_MUTATE, &self.cancel)
            .await
            .map_err(|_| DispatchError::Cancelled)?;
        tracing::info!(kind = action.kind(), via = identity.label, "dispatch.mutate");
        self.capability
            .mutate(&identity, action)
            .await
            .map_err(|source| DispatchError::Failed {
                endpoint: EP_MUTATE,
                via: identity.label.clone(),
                source,
            })?;
        Ok(Attributed {
            value: (),
            via: identity.label.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::RatePolicy;
    use crate::testsupport::ScriptedCapability;
    use perch_social::{Credential, Identity};
    use std::time::Duration;

    fn dispatcher(capability: Arc<ScriptedCapability>, labels: &[&str]) -> Dispatcher {
        let identities = labels
            .iter()
            .map(|l| {
                Identity::new(Credential {
                    username: l.to_string(),
                    password: "pw".into(),
                })
            })
            .collect();
        let pool = Arc::new(AgentPool::from_identities(identities).unwrap());
        let limiter = Arc::new(RateLimiter::new(RatePolicy {
            min_spacing: Duration::ZERO,
            ..RatePolicy::default()
        }));
        Dispatcher::new(capability, pool, limiter, CancellationToken::new())
    }

    #[tokio::test]
    async fn results_are_attributed_to_rotating_identities() {
        let capability = Arc::new(ScriptedCapability::default());
        capability.put_profile(ScriptedCapability::profile("target", "42"));
        let d = dispatcher(capability, &["a", "b", "c"]);

        let first = d.profile("target").await.unwrap();
        let second = d.profile("target").await.unwrap();
        let third = d.profile("target").await.unwrap();

        assert_eq!(first.value.remote_id, "42");
        assert_eq!(
            vec![first.via, second.via, third.via],
            vec!["b", "c", "a"]
        );
    }

    #[tokio::test]
    async fn failures_carry_endpoint_and_account_attribution() {
        let capability = Arc::new(ScriptedCapability::default());
        capability.fail_handle("broken");
        let d = dispatcher(capability, &["solo"]);

        let err = d.content("broken", 20).await.unwrap_err();
        match err {
            DispatchError::Failed { endpoint, via, .. } => {
                assert_eq!(endpoint, EP_GET_CONTENT);
                assert_eq!(via, "solo");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_shutdown_maps_to_dispatch_cancelled() {
        let capability = Arc::new(ScriptedCapability::default());
        let identities = vec![Identity::new(Credential {
            username: "solo".into(),
            password: "pw".into(),
        })];
        let pool = Arc::new(AgentPool::from_identities(identities).unwrap());
        let limiter = Arc::new(RateLimiter::new(RatePolicy::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let d = Dispatcher::new(capability, pool, limiter, cancel);

        assert!(matches!(
            d.profile("anyone").await,
            Err(DispatchError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn mutations_reach_the_facade() {
        let capability = Arc::new(ScriptedCapability::default());
        let d = dispatcher(capability.clone(), &["solo"]);

        d.mutate(&MutateAction::Like {
            post_id: "p1".into(),
        })
        .await
        .unwrap();

        let recorded = capability.mutations();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind(), "like");
    }
}
