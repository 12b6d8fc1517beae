//! Capability implementation backed by the HTTP gateway sidecar.
//!
//! The gateway owns the actual service protocol; this driver only shapes
//! JSON requests against its stable local API. Each call names the acting
//! account with the `x-perch-account` header so the gateway binds it to the
//! right session.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use perch_social::{
    Capability, ContentItem, Credential, Identity, MutateAction, ProfileData, SessionBlob,
};

const ACCOUNT_HEADER: &str = "x-perch-account";

#[derive(Clone)]
pub struct GatewayCapability {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    authenticated: bool,
}

#[derive(Deserialize)]
struct ContentResponse {
    items: Vec<ContentItem>,
}

impl GatewayCapability {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        identity: Option<&Identity>,
    ) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, self.url(path));
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        if let Some(identity) = identity {
            req = req.header(ACCOUNT_HEADER, &identity.label);
        }
        req
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("gateway {what} returned {status}: {body}"));
        }
        response
            .json()
            .await
            .with_context(|| format!("failed to decode gateway {what} response"))
    }
}

#[async_trait]
impl Capability for GatewayCapability {
    async fn is_authenticated(&self, identity: &Identity) -> bool {
        if identity.session.is_none() {
            return false;
        }
        let result = async {
            let response = self
                .request(reqwest::Method::GET, "v1/session/status", Some(identity))
                .send()
                .await?;
            Self::read_json::<StatusResponse>(response, "session status").await
        }
        .await;
        match result {
            Ok(status) => status.authenticated,
            // Unreachable gateway reads as "not authenticated"; bootstrap
            // will fall through to a login attempt and surface the failure.
            Err(error) => {
                tracing::warn!(label = identity.label, ?error, "gateway.status_failed");
                false
            }
        }
    }

    async fn restore_session(&self, identity: &Identity, session: &SessionBlob) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, "v1/session/restore", Some(identity))
            .json(&json!({ "session": session.0 }))
            .send()
            .await
            .context("gateway session restore request failed")?;
        Self::read_json::<serde_json::Value>(response, "session restore").await?;
        Ok(())
    }

    async fn login(&self, credential: &Credential) -> Result<SessionBlob> {
        let response = self
            .request(reqwest::Method::POST, "v1/login", None)
            .json(&json!({
                "username": credential.username,
                "password": credential.password,
            }))
            .send()
            .await
            .context("gateway login request failed")?;
        let session: serde_json::Value = Self::read_json(response, "login").await?;
        Ok(SessionBlob(session))
    }

    async fn fetch_profile(&self, identity: &Identity, handle: &str) -> Result<ProfileData> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("v1/profile/{handle}"),
                Some(identity),
            )
            .send()
            .await
            .context("gateway profile request failed")?;
        Self::read_json(response, "profile").await
    }

    async fn fetch_content(
        &self,
        identity: &Identity,
        handle: &str,
        limit: u32,
    ) -> Result<Vec<ContentItem>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("v1/content/{handle}"),
                Some(identity),
            )
            .query(&[("limit", limit)])
            .send()
            .await
            .context("gateway content request failed")?;
        let content: ContentResponse = Self::read_json(response, "content").await?;
        Ok(content.items)
    }

    async fn search_content(
        &self,
        identity: &Identity,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ContentItem>> {
        let response = self
            .request(reqwest::Method::GET, "v1/search", Some(identity))
            .query(&[("q", query)])
            .query(&[("limit", limit)])
            .send()
            .await
            .context("gateway search request failed")?;
        let content: ContentResponse = Self::read_json(response, "search").await?;
        Ok(content.items)
    }

    async fn mutate(&self, identity: &Identity, action: &MutateAction) -> Result<()> {
        tracing::info!(
            kind = action.kind(),
            label = identity.label,
            "gateway.mutate"
        );
        let response = self
            .request(reqwest::Method::POST, "v1/mutate", Some(identity))
            .json(action)
            .send()
            .await
            .context("gateway mutate request failed")?;
        Self::read_json::<serde_json::Value>(response, "mutate").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let gw = GatewayCapability::new("http://localhost:8080/", None);
        assert_eq!(gw.url("v1/login"), "http://localhost:8080/v1/login");
        assert_eq!(gw.url("/v1/login"), "http://localhost:8080/v1/login");
    }
}
