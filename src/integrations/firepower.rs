//! Cisco Firepower Management Center object lookups.
//!
//! Only name-to-id resolution is provided: network, host and network group
//! objects within a domain, and the domains themselves.

use once_cell::sync::OnceCell;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resolve::{Candidate, EntityKind, NameResolver};
use crate::resource::{value_text, ResourceId};
use crate::transport::{ApiRequest, ApiResponse, Transport};

pub const TOKEN_PATH: &str = "/api/fmc_platform/v1/auth/generatetoken";
pub const DOMAIN_INFO_PATH: &str = "/api/fmc_platform/v1/info/domain";
/// The Global domain every FMC ships with.
pub const GLOBAL_DOMAIN: &str = "e276abec-e0f2-11e3-8169-6d9ed49b625f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirepowerSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Domain UUID object lookups run in
    pub domain: String,
}

impl FirepowerSettings {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            domain: GLOBAL_DOMAIN.to_string(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }
}

#[derive(Debug, Clone)]
struct Session {
    token: String,
    domain_uuid: Option<String>,
}

/// Token-authenticated FMC access.
#[derive(Clone)]
pub struct FirepowerApi {
    settings: FirepowerSettings,
    transport: Arc<dyn Transport>,
    session: Arc<OnceCell<Session>>,
}

impl std::fmt::Debug for FirepowerApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirepowerApi")
            .field("base_url", &self.settings.base_url)
            .field("domain", &self.settings.domain)
            .finish()
    }
}

impl FirepowerApi {
    pub fn new(settings: FirepowerSettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            transport,
            session: Arc::new(OnceCell::new()),
        }
    }

    fn session(&self) -> Result<&Session> {
        self.session.get_or_try_init(|| {
            let request = ApiRequest::post(format!("{}{}", self.settings.base_url, TOKEN_PATH))
                .header("Content-Type", "application/json")
                .basic_auth(&self.settings.username, &self.settings.password);
            let response = self.transport.send(&request)?;
            let token = response
                .header("X-auth-access-token")
                .filter(|_| response.is_success())
                .ok_or_else(|| {
                    Error::rejected(Some(response.status), "firepower did not return an access token")
                })?
                .to_string();
            info!(base_url = %self.settings.base_url, "firepower token generated");
            Ok(Session {
                token,
                domain_uuid: response.header("DOMAIN_UUID").map(str::to_string),
            })
        })
    }

    /// Authenticated GET of `path` (with query), mapped like the TPM API:
    /// non-JSON 403/404 bodies become "<url> forbidden|not found".
    pub fn get(&self, path: &str) -> Result<Value> {
        let session = self.session()?;
        let url = format!("{}{}", self.settings.base_url, path);
        let mut request = ApiRequest::get(&url).header("X-auth-access-token", &session.token);
        if let Some(domain) = &session.domain_uuid {
            request = request.header("DOMAIN_UUID", domain);
        }
        debug!(url = %url, "firepower request");
        let response = self.transport.send(&request)?;
        interpret(&url, &response)
    }

    fn items(&self, path: &str) -> Result<Vec<Value>> {
        Ok(self
            .get(path)?
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

fn interpret(url: &str, response: &ApiResponse) -> Result<Value> {
    match response.json() {
        Ok(value) if response.is_success() => Ok(value),
        Ok(value) => {
            let message = value
                .get("error")
                .and_then(|e| e.get("messages"))
                .map(value_text)
                .unwrap_or_else(|| response.body.trim().to_string());
            Err(Error::rejected(Some(response.status), message))
        }
        Err(_) => Err(match response.status {
            403 => Error::rejected(Some(403), format!("{} forbidden", url)),
            404 => Error::rejected(Some(404), format!("{} not found", url)),
            status => Error::rejected(Some(status), format!("{} {}", url, response.body.trim())),
        }),
    }
}

/// Resolves network, host, network group and domain names.
#[derive(Debug, Clone)]
pub struct FirepowerResolver {
    api: FirepowerApi,
}

impl FirepowerResolver {
    pub fn new(api: FirepowerApi) -> Self {
        Self { api }
    }

    fn objects(&self, collection: &str, object_type: &str) -> Result<Vec<Candidate>> {
        let path = format!(
            "/api/fmc_config/v1/domain/{}/object/{}?limit=1000",
            self.api.settings.domain, collection
        );
        Ok(self
            .api
            .items(&path)?
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some(object_type))
            .filter_map(|item| candidate(item, "id"))
            .collect())
    }
}

fn candidate(item: &Value, id_field: &str) -> Option<Candidate> {
    let id = item.get(id_field).and_then(ResourceId::from_value)?;
    let name = item.get("name")?.as_str()?;
    Some(Candidate::new(id, name))
}

impl NameResolver for FirepowerResolver {
    fn candidates(&self, kind: EntityKind, name: &str) -> Result<Vec<Candidate>> {
        debug!(%kind, name, "firepower lookup");
        match kind {
            EntityKind::Network => self.objects("networks", "Network"),
            EntityKind::Host => self.objects("hosts", "Host"),
            EntityKind::NetworkGroup => self.objects("networkgroups", "NetworkGroup"),
            EntityKind::Domain => Ok(self
                .api
                .items(DOMAIN_INFO_PATH)?
                .iter()
                .filter_map(|item| candidate(item, "uuid"))
                .collect()),
            other => Err(Error::Unsupported(format!("firepower cannot resolve {}", other))),
        }
    }
}
