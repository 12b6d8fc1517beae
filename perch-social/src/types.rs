//! Normalized data types exchanged with the capability facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Credential;

/// Opaque persisted session state for one identity. The engine never looks
/// inside; it only shuttles the blob between disk and the facade.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionBlob(pub serde_json::Value);

/// An authenticated (or not-yet-authenticated) account usable for outbound
/// calls. Owned by the agent pool; constructed during bootstrap and never
/// mutated afterwards, only replaced.
#[derive(Clone, Debug)]
pub struct Identity {
    /// Unique account label (the service-side username).
    pub label: String,
    pub credential: Credential,
    pub session: Option<SessionBlob>,
    pub authenticated: bool,
}

impl Identity {
    pub fn new(credential: Credential) -> Self {
        Self {
            label: credential.username.clone(),
            credential,
            session: None,
            authenticated: false,
        }
    }
}

/// Snapshot of an account profile, keyed by handle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProfileData {
    pub remote_id: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub joined: Option<DateTime<Utc>>,
    #[serde(default)]
    pub followers: i64,
    #[serde(default)]
    pub following: i64,
    #[serde(default)]
    pub posts_count: i64,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub private: bool,
}

/// A single post, keyed by its service-assigned id (the natural key for
/// upserts). Engagement counts are the only fields a re-fetch may change.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub author_id: String,
    pub author_handle: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub replies: i64,
    #[serde(default)]
    pub reposts: i64,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub is_repost: bool,
}

/// Write actions the surrounding system may issue through the facade.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MutateAction {
    Like { post_id: String },
    Unlike { post_id: String },
    Repost { post_id: String },
    Follow { handle: String },
    Unfollow { handle: String },
    Publish { text: String },
}

impl MutateAction {
    /// Short name used for logging and rate-limit attribution.
    pub fn kind(&self) -> &'static str {
        match self {
            MutateAction::Like { .. } => "like",
            MutateAction::Unlike { .. } => "unlike",
            MutateAction::Repost { .. } => "repost",
            MutateAction::Follow { .. } => "follow",
            MutateAction::Unfollow { .. } => "unfollow",
            MutateAction::Publish { .. } => "publish",
        }
    }
}
