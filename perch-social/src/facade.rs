//! The capability facade: the one seam between the engine and the remote
//! social service.
//!
//! The engine only ever sees this trait. Concrete implementations (an HTTP
//! gateway driver in production, a scripted double in tests) decide how the
//! calls actually reach the service.

use anyhow::Result;
use async_trait::async_trait;

use crate::session::Credential;
use crate::types::{ContentItem, Identity, MutateAction, ProfileData, SessionBlob};

#[async_trait]
pub trait Capability: Send + Sync {
    /// Whether the identity currently holds a usable session.
    async fn is_authenticated(&self, identity: &Identity) -> bool;

    /// Install a previously persisted session for this identity.
    async fn restore_session(&self, identity: &Identity, session: &SessionBlob) -> Result<()>;

    /// Perform a fresh login; the returned blob is what bootstrap persists.
    async fn login(&self, credential: &Credential) -> Result<SessionBlob>;

    async fn fetch_profile(&self, identity: &Identity, handle: &str) -> Result<ProfileData>;

    /// Most recent posts for a handle, newest first, at most `limit`.
    async fn fetch_content(
        &self,
        identity: &Identity,
        handle: &str,
        limit: u32,
    ) -> Result<Vec<ContentItem>>;

    async fn search_content(
        &self,
        identity: &Identity,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ContentItem>>;

    async fn mutate(&self, identity: &Identity, action: &MutateAction) -> Result<()>;
}
