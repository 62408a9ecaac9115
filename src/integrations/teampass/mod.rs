//! Team Password Manager (TPM) integration.
//!
//! Talks to the v4 REST API under `<base_url>/index.php/api/v4/`. Requests
//! are authenticated either with HTTP Basic credentials or with an HMAC
//! signature over `api_path + timestamp + body`:
//!
//! ```text
//! X-Public-Key:        <public key>
//! X-Request-Timestamp: <unix seconds>
//! X-Request-Hash:      hex(HMAC-SHA256(private_key, api_path + timestamp + body))
//! ```

pub mod groups;
pub mod mypasswords;
pub mod passwords;
pub mod projects;
pub mod security;
pub mod users;

pub use groups::GroupClient;
pub use mypasswords::MyPasswordClient;
pub use passwords::PasswordClient;
pub use projects::ProjectClient;
pub use security::SecurityUpdate;
pub use users::{LdapConversion, PasswordChange, UserClient};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resolve::{Candidate, EntityKind, NameResolver};
use crate::resource::{value_text, Resource, ResourceId};
use crate::transport::hmac::hmac_sha256_hex;
use crate::transport::{next_link, ApiRequest, ApiResponse, Method, Transport};

const API_PREFIX: &str = "api/v4/";

/// How requests are authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeampassAuth {
    Basic { username: String, password: String },
    Hmac { public_key: String, private_key: String },
}

/// Connection settings for one TPM instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeampassSettings {
    pub base_url: String,
    pub auth: TeampassAuth,
    /// Sent as `X-Unlock-Reason` on every request when set
    pub unlock_reason: Option<String>,
}

impl TeampassSettings {
    pub fn new(base_url: impl Into<String>, auth: TeampassAuth) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            unlock_reason: None,
        }
    }

    /// Pick the authentication method from optional credentials. Exactly one
    /// complete pair must be present.
    pub fn from_credentials(
        base_url: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
        public_key: Option<String>,
        private_key: Option<String>,
    ) -> Result<Self> {
        let auth = match (username, password, public_key, private_key) {
            (None, None, Some(public_key), Some(private_key)) => TeampassAuth::Hmac {
                public_key,
                private_key,
            },
            (Some(username), Some(password), None, None) => TeampassAuth::Basic { username, password },
            _ => {
                return Err(Error::Config(
                    "teampass needs either username/password or public_key/private_key".to_string(),
                ))
            }
        };
        Ok(Self::new(base_url, auth))
    }

    pub fn with_unlock_reason(mut self, reason: impl Into<String>) -> Self {
        self.unlock_reason = Some(reason.into());
        self
    }

    fn root(&self) -> String {
        format!("{}/index.php/", self.base_url)
    }
}

/// Signature headers for HMAC authentication.
pub fn signature_headers(
    public_key: &str,
    private_key: &str,
    api_path: &str,
    timestamp: i64,
    body: &str,
) -> Vec<(String, String)> {
    let timestamp = timestamp.to_string();
    let message = format!("{}{}{}", api_path, timestamp, body);
    vec![
        ("X-Public-Key".to_string(), public_key.to_string()),
        ("X-Request-Hash".to_string(), hmac_sha256_hex(private_key.as_bytes(), message.as_bytes())),
        ("X-Request-Timestamp".to_string(), timestamp),
    ]
}

/// Encode a search term for a `search/<term>.json` path segment.
pub fn encode_search(term: &str) -> String {
    url::form_urlencoded::byte_serialize(term.as_bytes()).collect()
}

/// Low-level TPM API access shared by the resource clients.
#[derive(Clone)]
pub struct TpmApi {
    settings: TeampassSettings,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for TpmApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TpmApi")
            .field("base_url", &self.settings.base_url)
            .finish()
    }
}

impl TpmApi {
    pub fn new(settings: TeampassSettings, transport: Arc<dyn Transport>) -> Self {
        debug!(base_url = %settings.base_url, "teampass API configured");
        Self { settings, transport }
    }

    pub fn settings(&self) -> &TeampassSettings {
        &self.settings
    }

    /// `path` relative to the API root, or an absolute URL from a `Link`
    /// header, turned into the `api/v4/...` path that gets signed.
    fn api_path(&self, path: &str) -> String {
        let root = self.settings.root();
        let relative = path.strip_prefix(root.as_str()).unwrap_or(path);
        if relative.starts_with(API_PREFIX) {
            relative.to_string()
        } else {
            format!("{}{}", API_PREFIX, relative.trim_start_matches('/'))
        }
    }

    fn build(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiRequest> {
        let api_path = self.api_path(path);
        let mut request = ApiRequest::new(method, format!("{}{}", self.settings.root(), api_path));
        if let Some(body) = body {
            request = request.json(body)?;
        }
        match &self.settings.auth {
            TeampassAuth::Basic { username, password } => {
                request = request.basic_auth(username, password);
            }
            TeampassAuth::Hmac {
                public_key,
                private_key,
            } => {
                let timestamp = chrono::Utc::now().timestamp();
                for (name, value) in
                    signature_headers(public_key, private_key, &api_path, timestamp, &request.body_text())
                {
                    request = request.header(name, value);
                }
            }
        }
        if let Some(reason) = &self.settings.unlock_reason {
            request = request.header("X-Unlock-Reason", reason);
        }
        Ok(request)
    }

    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<(Value, ApiResponse)> {
        let request = self.build(method, path, body)?;
        debug!(%method, url = %request.url, "teampass request");
        let response = self.transport.send(&request)?;
        let value = interpret(&request.url, &response)?;
        Ok((value, response))
    }

    pub fn get(&self, path: &str) -> Result<Value> {
        self.send(Method::Get, path, None).map(|(v, _)| v)
    }

    pub fn post(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.send(Method::Post, path, body).map(|(v, _)| v)
    }

    pub fn put(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.send(Method::Put, path, body).map(|(v, _)| v)
    }

    pub fn delete(&self, path: &str) -> Result<Value> {
        self.send(Method::Delete, path, None).map(|(v, _)| v)
    }

    /// Every item of a paginated list, following `Link: rel="next"`.
    pub fn collection(&self, path: &str) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut next = Some(path.to_string());
        while let Some(page) = next.take() {
            let (value, response) = self.send(Method::Get, &page, None)?;
            match value {
                Value::Array(page_items) => items.extend(page_items),
                Value::Null => {}
                other => {
                    return Err(Error::rejected(
                        Some(response.status),
                        format!("expected a list from {}, got {}", page, other),
                    ))
                }
            }
            next = response.header("Link").and_then(next_link);
        }
        Ok(items)
    }

    /// POST a create request and return the new id.
    pub fn create(&self, path: &str, body: &Value) -> Result<ResourceId> {
        let response = self.post(path, Some(body))?;
        let id = response
            .get("id")
            .and_then(ResourceId::from_value)
            .ok_or_else(|| Error::rejected(None, format!("{} returned no id", path)))?;
        info!(path, %id, "teampass resource created");
        Ok(id)
    }
}

/// Map a TPM response to its JSON value or a typed error.
fn interpret(url: &str, response: &ApiResponse) -> Result<Value> {
    if response.body.trim().is_empty() {
        return if response.is_success() {
            Ok(Value::Null)
        } else {
            Err(status_error(url, response.status))
        };
    }
    let value: Value = match serde_json::from_str(&response.body) {
        Ok(value) => value,
        Err(e) => {
            return Err(match response.status {
                403 | 404 => status_error(url, response.status),
                status => Error::rejected(Some(status), format!("{}: {} {}", e, url, response.body)),
            })
        }
    };
    if value.get("error").and_then(Value::as_bool).unwrap_or(false) {
        let message = value
            .get("message")
            .map(value_text)
            .unwrap_or_else(|| response.body.clone());
        return Err(Error::rejected(Some(response.status), message));
    }
    if !response.is_success() {
        return Err(Error::rejected(Some(response.status), response.body.trim().to_string()));
    }
    Ok(value)
}

fn status_error(url: &str, status: u16) -> Error {
    let reason = match status {
        403 => "forbidden",
        404 => "not found",
        _ => "failed",
    };
    Error::rejected(Some(status), format!("{} {}", url, reason))
}

/// Resolves user, group and project names to TPM ids.
#[derive(Debug, Clone)]
pub struct TpmResolver {
    api: TpmApi,
}

impl TpmResolver {
    pub fn new(api: TpmApi) -> Self {
        Self { api }
    }
}

impl NameResolver for TpmResolver {
    fn candidates(&self, kind: EntityKind, name: &str) -> Result<Vec<Candidate>> {
        let items = match kind {
            EntityKind::User => self.api.collection("users.json")?,
            EntityKind::Group => self.api.collection("groups.json")?,
            EntityKind::Project => self
                .api
                .collection(&format!("projects/search/{}.json", encode_search(name)))?,
            other => return Err(Error::Unsupported(format!("teampass cannot resolve {}", other))),
        };
        Ok(items.iter().filter_map(candidate).collect())
    }
}

fn candidate(item: &Value) -> Option<Candidate> {
    let id = item.get("id").and_then(ResourceId::from_value)?;
    let name = item.get("name")?.as_str()?;
    Some(Candidate::new(id, name))
}

/// Snapshot from a TPM object with a numeric `id`.
pub(crate) fn to_resource(value: &Value) -> Result<Resource> {
    Resource::from_json(value, "id")
        .ok_or_else(|| Error::rejected(None, format!("unexpected teampass object: {}", value)))
}
