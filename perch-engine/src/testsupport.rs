//! Scripted stand-in for the remote service facade. Tests program it with
//! canned profiles, content, and failure sets, then run the real engine
//! against it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;

use perch_social::{
    Capability, ContentItem, Credential, Identity, MutateAction, ProfileData, SessionBlob,
};

use crate::store::IngestStore;

/// Fresh migrated store on a single-connection in-memory database. One
/// connection so every query sees the same database.
pub async fn memory_store() -> IngestStore {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = IngestStore::new(pool);
    store.migrate().await.unwrap();
    store
}

#[derive(Default)]
pub struct ScriptedCapability {
    login_failures: Mutex<HashSet<String>>,
    restore_failures: Mutex<HashSet<String>>,
    logins: AtomicU64,
    profiles: Mutex<HashMap<String, ProfileData>>,
    content: Mutex<HashMap<String, Vec<ContentItem>>>,
    failing_handles: Mutex<HashSet<String>>,
    mutations: Mutex<Vec<MutateAction>>,
}

impl ScriptedCapability {
    pub fn fail_login(&self, label: &str) {
        self.login_failures.lock().unwrap().insert(label.into());
    }

    pub fn fail_restore(&self, label: &str) {
        self.restore_failures.lock().unwrap().insert(label.into());
    }

    /// Make every fetch for `handle` return an error.
    pub fn fail_handle(&self, handle: &str) {
        self.failing_handles.lock().unwrap().insert(handle.into());
    }

    pub fn put_profile(&self, profile: ProfileData) {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.handle.clone(), profile);
    }

    pub fn put_content(&self, handle: &str, items: Vec<ContentItem>) {
        self.content.lock().unwrap().insert(handle.into(), items);
    }

    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    pub fn mutations(&self) -> Vec<MutateAction> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn profile(handle: &str, remote_id: &str) -> ProfileData {
        ProfileData {
            remote_id: remote_id.to_string(),
            handle: handle.to_string(),
            display_name: format!("The {handle}"),
            bio: String::new(),
            avatar_url: String::new(),
            location: String::new(),
            website: String::new(),
            joined: None,
            followers: 10,
            following: 5,
            posts_count: 3,
            verified: false,
            private: false,
        }
    }

    pub fn post(id: &str, author: &str, likes: i64) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            author_id: format!("id-{author}"),
            author_handle: author.to_string(),
            author_name: author.to_string(),
            text: format!("post {id}"),
            posted_at: None,
            permalink: format!("https://service.example/{author}/{id}"),
            likes,
            replies: 0,
            reposts: 0,
            views: 0,
            is_reply: false,
            is_repost: false,
        }
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    async fn is_authenticated(&self, identity: &Identity) -> bool {
        identity.session.is_some()
    }

    async fn restore_session(&self, identity: &Identity, _session: &SessionBlob) -> Result<()> {
        if self
            .restore_failures
            .lock()
            .unwrap()
            .contains(&identity.label)
        {
            return Err(anyhow!("scripted restore failure for {}", identity.label));
        }
        Ok(())
    }

    async fn login(&self, credential: &Credential) -> Result<SessionBlob> {
        if self
            .login_failures
            .lock()
            .unwrap()
            .contains(&credential.username)
        {
            return Err(anyhow!("scripted login failure for {}", credential.username));
        }
        self.logins.fetch_add(1, Ordering::Relaxed);
        Ok(SessionBlob(json!({"token": credential.username})))
    }

    async fn fetch_profile(&self, _identity: &Identity, handle: &str) -> Result<ProfileData> {
        if self.failing_handles.lock().unwrap().contains(handle) {
            return Err(anyhow!("scripted fetch failure for {handle}"));
        }
        self.profiles
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted profile for {handle}"))
    }

    async fn fetch_content(
        &self,
        _identity: &Identity,
        handle: &str,
        limit: u32,
    ) -> Result<Vec<ContentItem>> {
        if self.failing_handles.lock().unwrap().contains(handle) {
            return Err(anyhow!("scripted fetch failure for {handle}"));
        }
        let items = self
            .content
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .unwrap_or_default();
        Ok(items.into_iter().take(limit as usize).collect())
    }

    async fn search_content(
        &self,
        _identity: &Identity,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ContentItem>> {
        let map = self.content.lock().unwrap();
        let mut hits: Vec<ContentItem> = map
            .values()
            .flatten()
            .filter(|item| item.text.contains(query))
            .cloned()
            .collect();
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn mutate(&self, _identity: &Identity, action: &MutateAction) -> Result<()> {
        self.mutations.lock().unwrap().push(action.clone());
        Ok(())
    }
}
