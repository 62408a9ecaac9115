//! Zabbix maintenance windows over the JSON-RPC 2.0 API.
//!
//! Every call is a `POST` to the API URL:
//!
//! ```text
//! {"jsonrpc": "2.0", "id": 0, "method": "...", "params": {...}, "auth": "<token>"}
//! ```
//!
//! `user.login` is sent without `auth` and its result becomes the token for
//! every later call made through the same [`ZabbixApi`].

pub mod maintenance;

pub use maintenance::{shorten_spec, MaintenanceActivity, MaintenanceClient, MaintenanceRequest};

use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resolve::{Candidate, EntityKind, NameResolver};
use crate::resource::{value_text, ResourceId};
use crate::transport::{ApiRequest, Transport};

const UNAUTHENTICATED: &[&str] = &["user.login", "apiinfo.version"];

/// Connection settings for one Zabbix frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZabbixSettings {
    /// Full API URL, e.g. `https://zabbix.example.com/api_jsonrpc.php`
    pub url: String,
    pub user: String,
    pub password: String,
}

impl ZabbixSettings {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password: password.into(),
        }
    }
}

/// JSON-RPC access with a lazily obtained auth token.
#[derive(Clone)]
pub struct ZabbixApi {
    settings: ZabbixSettings,
    transport: Arc<dyn Transport>,
    token: Arc<OnceCell<String>>,
}

impl std::fmt::Debug for ZabbixApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZabbixApi")
            .field("url", &self.settings.url)
            .field("logged_in", &self.token.get().is_some())
            .finish()
    }
}

impl ZabbixApi {
    pub fn new(settings: ZabbixSettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            transport,
            token: Arc::new(OnceCell::new()),
        }
    }

    fn token(&self) -> Result<&str> {
        self.token
            .get_or_try_init(|| {
                let result = self.rpc(
                    "user.login",
                    json!({"user": self.settings.user, "password": self.settings.password}),
                    None,
                )?;
                info!(url = %self.settings.url, "logged in to zabbix");
                Ok(value_text(&result))
            })
            .map(String::as_str)
    }

    /// Call `method`, logging in first when the method needs it.
    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        if UNAUTHENTICATED.contains(&method) {
            self.rpc(method, params, None)
        } else {
            let token = self.token()?.to_string();
            self.rpc(method, params, Some(&token))
        }
    }

    fn rpc(&self, method: &str, params: Value, auth: Option<&str>) -> Result<Value> {
        let mut envelope = json!({"jsonrpc": "2.0", "id": 0, "method": method, "params": params});
        if let (Some(auth), Some(object)) = (auth, envelope.as_object_mut()) {
            object.insert("auth".to_string(), json!(auth));
        }
        debug!(method, "zabbix call");
        let request = ApiRequest::post(&self.settings.url).json(&envelope)?;
        let response = self.transport.send(&request)?;
        if !response.is_success() {
            return Err(Error::rejected(
                Some(response.status),
                format!("Zabbix API: status {} ({})", response.status, response.body.trim()),
            ));
        }
        let body = response.json()?;
        if let Some(error) = body.get("error") {
            let message = error.get("message").map(value_text).unwrap_or_default();
            let data = error.get("data").map(value_text).unwrap_or_default();
            return Err(Error::rejected(None, format!("{} ({})", message, data)));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| Error::rejected(None, format!("{} returned no result", method)))
    }
}

/// Resolves host and host group names through `host.get` / `hostgroup.get`
/// exact filters.
#[derive(Debug, Clone)]
pub struct ZabbixResolver {
    api: ZabbixApi,
}

impl ZabbixResolver {
    pub fn new(api: ZabbixApi) -> Self {
        Self { api }
    }
}

impl NameResolver for ZabbixResolver {
    fn candidates(&self, kind: EntityKind, name: &str) -> Result<Vec<Candidate>> {
        let (method, filter, id_field, name_field) = match kind {
            EntityKind::Host => ("host.get", json!({"host": name}), "hostid", "host"),
            EntityKind::HostGroup => ("hostgroup.get", json!({"name": name}), "groupid", "name"),
            other => return Err(Error::Unsupported(format!("zabbix cannot resolve {}", other))),
        };
        let result = self.api.call(method, json!({"output": "extend", "filter": filter}))?;
        let items = result.as_array().cloned().unwrap_or_default();
        Ok(items
            .iter()
            .filter_map(|item| {
                let id = item.get(id_field).and_then(ResourceId::from_value)?;
                let name = item.get(name_field)?.as_str()?;
                Some(Candidate::new(id, name))
            })
            .collect())
    }
}
