//! Cedexis (Fusion) purge.
//!
//! An OAuth2 client-credentials token is fetched for each purge, then the
//! URI paths are posted to the Fusion purge action.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use super::UriSource;
use crate::engine::Trigger;
use crate::error::{Error, Result};
use crate::resource::{value_text, FieldMap};
use crate::transport::{ApiRequest, Transport};

pub const TOKEN_URL: &str = "https://api.cedexis.com/api/oauth/token";
pub const PURGE_URL: &str = "https://api.cedexis.com/api/v2/actions/fusion/purge.json";

/// OAuth client and endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CedexisSettings {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_purge_url")]
    pub purge_url: String,
}

fn default_token_url() -> String {
    TOKEN_URL.to_string()
}

fn default_purge_url() -> String {
    PURGE_URL.to_string()
}

impl CedexisSettings {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: default_token_url(),
            purge_url: default_purge_url(),
        }
    }
}

/// Platform ids from a `:`-separated string.
pub fn split_platform_ids(text: &str) -> Vec<String> {
    text.split(':')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reduce a URI to its percent-encoded path with a leading `/`.
pub fn uri_path(uri: &str) -> Result<String> {
    let parsed = match url::Url::parse(uri) {
        Ok(url) => url,
        Err(_) => url::Url::parse("http://purge.invalid/")
            .and_then(|base| base.join(uri))
            .map_err(|e| Error::validation(format!("invalid URI '{}': {}", uri, e)))?,
    };
    let path = parsed.path();
    Ok(if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    })
}

/// Purge URIs on the given platforms.
pub struct CedexisPurge {
    name: String,
    settings: CedexisSettings,
    platform_ids: Vec<String>,
    source: UriSource,
    transport: Arc<dyn Transport>,
}

impl CedexisPurge {
    pub fn new(
        name: impl Into<String>,
        settings: CedexisSettings,
        platform_ids: Vec<String>,
        source: UriSource,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            platform_ids,
            source,
            transport,
        }
    }

    fn access_token(&self) -> Result<String> {
        let request = ApiRequest::post(&self.settings.token_url)
            .header("Accept", "application/json")
            .form(vec![
                ("grant_type".to_string(), "client_credentials".to_string()),
                ("client_id".to_string(), self.settings.client_id.clone()),
                ("client_secret".to_string(), self.settings.client_secret.clone()),
            ]);
        let response = self.transport.send(&request)?;
        let token = response
            .json()
            .ok()
            .and_then(|body| body.get("access_token").map(value_text))
            .filter(|token| !token.is_empty());
        match token {
            Some(token) if response.is_success() => Ok(token),
            _ => Err(Error::rejected(
                Some(response.status),
                "unable to generate token, check client_id and client_secret",
            )),
        }
    }
}

impl Trigger for CedexisPurge {
    type Payload = Vec<String>;

    fn kind(&self) -> &str {
        "cedexis purge"
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn prepare(&self) -> Result<Vec<String>> {
        if self.platform_ids.is_empty() {
            return Err(Error::validation("at least one platform id is required"));
        }
        if self.settings.client_id.is_empty() || self.settings.client_secret.is_empty() {
            return Err(Error::Config("cedexis client_id and client_secret are required".to_string()));
        }
        self.source.load()?.iter().map(|uri| uri_path(uri)).collect()
    }

    fn preview(&self, payload: &Vec<String>) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("uris".into(), json!(payload));
        map.insert("platformIds".into(), json!(self.platform_ids));
        map
    }

    fn fire(&self, payload: Vec<String>) -> Result<FieldMap> {
        let token = self.access_token()?;
        debug!(uris = payload.len(), "cedexis token obtained");
        let request = ApiRequest::post(&self.settings.purge_url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json")
            .json(&json!({ "uris": payload, "platformIds": self.platform_ids }))?;
        let response = self.transport.send(&request)?;
        if response.body.trim().is_empty() {
            return Err(Error::rejected(Some(response.status), "request denied by cedexis API"));
        }
        let body = response.json()?;
        if !response.is_success() {
            return Err(Error::rejected(Some(response.status), body.to_string()));
        }
        info!(platforms = self.platform_ids.len(), "cedexis purge accepted");
        let mut details = self.preview(&payload);
        details.insert("response".into(), body);
        Ok(details)
    }
}
