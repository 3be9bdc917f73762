//! services/api/src/adapters/mirror.rs
//!
//! HTTP client for the remote history mirror. Implements the `RemoteMirror` port.
//!
//! The mirror exposes one document per user at `{base}/users/{username}/history`:
//! `GET` returns `{ "history": [...] }` (404 when the user is unknown) and `PUT` replaces it.

use async_trait::async_trait;
use asset_history_core::{HistoryItem, PortError, PortResult, RemoteMirror};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize)]
struct MirrorDocument {
    #[serde(default)]
    history: Vec<Value>,
}

#[derive(Serialize)]
struct ReplaceHistoryBody<'a> {
    username: &'a str,
    history: &'a [HistoryItem],
}

/// An adapter that implements `RemoteMirror` over HTTP.
#[derive(Clone)]
pub struct HttpMirrorAdapter {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpMirrorAdapter {
    pub fn new(client: reqwest::Client, base_url: &str, token: Option<String>) -> PortResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PortError::Unexpected(format!("invalid mirror URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(PortError::Unexpected(format!(
                "mirror URL {} cannot be a base URL",
                base_url
            )));
        }
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn history_url(&self, username: &str) -> PortResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PortError::Unexpected("mirror URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["users", username, "history"]);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteMirror for HttpMirrorAdapter {
    async fn fetch_history(&self, username: &str) -> PortResult<Vec<Value>> {
        let url = self.history_url(username)?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = response
            .error_for_status()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let document: MirrorDocument = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(document.history)
    }

    async fn replace_history(&self, username: &str, history: &[HistoryItem]) -> PortResult<()> {
        let url = self.history_url(username)?;
        self.authorize(self.client.put(url))
            .json(&ReplaceHistoryBody { username, history })
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .error_for_status()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}
