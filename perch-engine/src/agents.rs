//! The identity pool: bootstrap, session restore, and round-robin rotation.
//!
//! Bootstrap runs exactly once at startup. For every configured credential it
//! tries the persisted session first and only logs in when that leaves the
//! identity unauthenticated; every fresh login is persisted so the next
//! process start can skip it. A pool is all-or-nothing: any login failure
//! aborts the whole bootstrap, because callers size their expectations to the
//! full credential list.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;

use perch_social::{Capability, Credential, Identity, SessionStore};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("no accounts configured")]
    NoAccounts,
    #[error("login failed for account {label}")]
    LoginFailed {
        label: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to persist session for account {label}")]
    PersistFailed {
        label: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("invalid identity index {index} (pool size {size})")]
    InvalidIndex { index: usize, size: usize },
}

/// Fixed-size pool of authenticated identities with an atomic rotation
/// cursor. Never shrinks or grows after construction.
#[derive(Debug)]
pub struct AgentPool {
    identities: Vec<Arc<Identity>>,
    cursor: AtomicUsize,
}

impl AgentPool {
    /// Build a pool from already-authenticated identities.
    ///
    /// ```
    /// use perch_engine::AgentPool;
    /// use perch_social::{Credential, Identity};
    ///
    /// let identities: Vec<Identity> = ["a", "b"]
    ///     .iter()
    ///     .map(|name| {
    ///         Identity::new(Credential {
    ///             username: name.to_string(),
    ///             password: "pw".into(),
    ///         })
    ///     })
    ///     .collect();
    /// let pool = AgentPool::from_identities(identities).unwrap();
    /// assert_eq!(pool.count(), 2);
    /// // Rotation starts one past the head and wraps.
    /// assert_eq!(pool.next().label, "b");
    /// assert_eq!(pool.next().label, "a");
    /// assert_eq!(pool.next().label, "b");
    /// ```
    pub fn from_identities(identities: Vec<Identity>) -> Result<Self, BootstrapError> {
        if identities.is_empty() {
            return Err(BootstrapError::NoAccounts);
        }
        Ok(Self {
            identities: identities.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Restore-or-login every configured credential and build the pool.
    pub async fn bootstrap(
        capability: &dyn Capability,
        sessions: &SessionStore,
        credentials: Vec<Credential>,
    ) -> Result<Self, BootstrapError> {
        if credentials.is_empty() {
            return Err(BootstrapError::NoAccounts);
        }

        let mut identities = Vec::with_capacity(credentials.len());
        for credential in credentials {
            let mut identity = Identity::new(credential);
            let label = identity.label.clone();

            match sessions.load(&label) {
                Ok(Some(blob)) => match capability.restore_session(&identity, &blob).await {
                    Ok(()) => {
                        tracing::info!(label, "agents.session_restored");
                        identity.session = Some(blob);
                    }
                    Err(error) => {
                        tracing::warn!(label, ?error, "agents.session_restore_failed");
                    }
                },
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(label, ?error, "agents.session_load_failed");
                }
            }

            if capability.is_authenticated(&identity).await {
                identity.authenticated = true;
            } else {
                tracing::info!(label, "agents.login_attempt");
                let blob = capability
                    .login(&identity.credential)
                    .await
                    .map_err(|source| BootstrapError::LoginFailed {
                        label: label.clone(),
                        source,
                    })?;
                sessions
                    .save(&label, &blob)
                    .map_err(|source| BootstrapError::PersistFailed {
                        label: label.clone(),
                        source,
                    })?;
                identity.session = Some(blob);
                if !capability.is_authenticated(&identity).await {
                    return Err(BootstrapError::LoginFailed {
                        label,
                        source: anyhow!("session not authenticated after login"),
                    });
                }
                identity.authenticated = true;
                tracing::info!(label = identity.label, "agents.login_ok");
            }

            identities.push(identity);
        }

        Self::from_identities(identities)
    }

    /// Hand out the next identity, round-robin. Concurrent callers each see
    /// a distinct cursor value; wrap-around is bias-free.
    pub fn next(&self) -> Arc<Identity> {
        let n = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let identity = self.identities[n % self.identities.len()].clone();
        tracing::trace!(label = identity.label, "agents.selected");
        identity
    }

    pub fn get(&self, index: usize) -> Result<Arc<Identity>, PoolError> {
        self.identities
            .get(index)
            .cloned()
            .ok_or(PoolError::InvalidIndex {
                index,
                size: self.identities.len(),
            })
    }

    pub fn count(&self) -> usize {
        self.identities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::ScriptedCapability;
    use perch_social::SessionBlob;
    use serde_json::json;
    use tempfile::TempDir;

    fn identities(labels: &[&str]) -> Vec<Identity> {
        labels
            .iter()
            .map(|l| {
                Identity::new(Credential {
                    username: l.to_string(),
                    password: "pw".into(),
                })
            })
            .collect()
    }

    fn credentials(labels: &[&str]) -> Vec<Credential> {
        labels
            .iter()
            .map(|l| Credential {
                username: l.to_string(),
                password: "pw".into(),
            })
            .collect()
    }

    #[test]
    fn rotation_cycles_with_pool_period() {
        let pool = AgentPool::from_identities(identities(&["a", "b", "c"])).unwrap();

        let seen: Vec<String> = (0..7).map(|_| pool.next().label.clone()).collect();
        // Cursor is post-increment: indices 1,2,0,1,2,0,1.
        assert_eq!(seen, vec!["b", "c", "a", "b", "c", "a", "b"]);

        // One full period returns each member exactly once.
        let mut period: Vec<String> = (0..3).map(|_| pool.next().label.clone()).collect();
        period.sort();
        assert_eq!(period, vec!["a", "b", "c"]);
    }

    #[test]
    fn get_rejects_out_of_range_indices() {
        let pool = AgentPool::from_identities(identities(&["a", "b"])).unwrap();
        assert_eq!(pool.count(), 2);
        assert!(pool.get(1).is_ok());
        assert_eq!(
            pool.get(2).unwrap_err(),
            PoolError::InvalidIndex { index: 2, size: 2 }
        );
    }

    #[test]
    fn empty_pool_is_rejected_at_construction() {
        assert!(matches!(
            AgentPool::from_identities(Vec::new()),
            Err(BootstrapError::NoAccounts)
        ));
    }

    #[tokio::test]
    async fn bootstrap_logs_in_fresh_credentials_and_persists_sessions() {
        let tmp = TempDir::new().unwrap();
        let sessions = SessionStore::new(tmp.path());
        let capability = ScriptedCapability::default();

        let pool = AgentPool::bootstrap(&capability, &sessions, credentials(&["alice", "bob"]))
            .await
            .unwrap();

        assert_eq!(pool.count(), 2);
        assert_eq!(capability.login_count(), 2);
        // Sessions were written so a restart can skip both logins.
        assert!(sessions.load("alice").unwrap().is_some());
        assert!(sessions.load("bob").unwrap().is_some());
    }

    #[tokio::test]
    async fn bootstrap_restores_persisted_sessions_without_login() {
        let tmp = TempDir::new().unwrap();
        let sessions = SessionStore::new(tmp.path());
        sessions
            .save("alice", &SessionBlob(json!({"token": "stored"})))
            .unwrap();

        let capability = ScriptedCapability::default();
        let pool = AgentPool::bootstrap(&capability, &sessions, credentials(&["alice"]))
            .await
            .unwrap();

        assert_eq!(pool.count(), 1);
        assert_eq!(capability.login_count(), 0);
        assert!(pool.get(0).unwrap().authenticated);
    }

    #[tokio::test]
    async fn bootstrap_falls_back_to_login_when_restore_fails() {
        let tmp = TempDir::new().unwrap();
        let sessions = SessionStore::new(tmp.path());
        let stale = SessionBlob(json!({"token": "stale"}));
        sessions.save("alice", &stale).unwrap();

        let capability = ScriptedCapability::default();
        capability.fail_restore("alice");

        let pool = AgentPool::bootstrap(&capability, &sessions, credentials(&["alice"]))
            .await
            .unwrap();

        assert_eq!(pool.count(), 1);
        assert_eq!(capability.login_count(), 1);
        assert!(pool.get(0).unwrap().authenticated);
        // The fresh login replaced the stale blob on disk.
        let reloaded = sessions.load("alice").unwrap().unwrap();
        assert_ne!(reloaded, stale);
    }

    #[tokio::test]
    async fn bootstrap_aborts_whole_pool_on_login_failure() {
        let tmp = TempDir::new().unwrap();
        let sessions = SessionStore::new(tmp.path());
        let capability = ScriptedCapability::default();
        capability.fail_login("bob");

        let err = AgentPool::bootstrap(&capability, &sessions, credentials(&["alice", "bob"]))
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::LoginFailed { label, .. } if label == "bob"));
    }

    #[tokio::test]
    async fn bootstrap_requires_at_least_one_credential() {
        let tmp = TempDir::new().unwrap();
        let sessions = SessionStore::new(tmp.path());
        let capability = ScriptedCapability::default();

        assert!(matches!(
            AgentPool::bootstrap(&capability, &sessions, Vec::new()).await,
            Err(BootstrapError::NoAccounts)
        ));
    }
}
