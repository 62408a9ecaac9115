//! Akamai Fast Purge (CCU v3) with EdgeGrid request signing.
//!
//! ```text
//! Authorization: EG1-HMAC-SHA256 client_token=..;access_token=..;timestamp=..;nonce=..;signature=..
//! ```
//!
//! The signing key is `base64(HMAC(client_secret, timestamp))`; the signature
//! is `base64(HMAC(signing_key, data))` where `data` joins method, scheme,
//! host, path, canonical headers (none), `base64(SHA-256(body))` and the
//! unsigned header with tabs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::UriSource;
use crate::engine::Trigger;
use crate::error::{Error, Result};
use crate::resource::{value_text, FieldMap};
use crate::transport::hmac::{hmac_sha256_base64, sha256_base64};
use crate::transport::{ApiRequest, Transport};

pub const INVALIDATE_PATH: &str = "/ccu/v3/invalidate/url";

/// EdgeGrid API client credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeGridCredentials {
    /// API host, e.g. `akab-xxxx.luna.akamaiapis.net`
    pub host: String,
    pub client_token: String,
    pub client_secret: String,
    pub access_token: String,
}

/// EdgeGrid timestamp format.
pub fn edgegrid_timestamp(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y%m%dT%H:%M:%S+0000").to_string()
}

/// `Authorization` header value for a request.
pub fn edgegrid_authorization(
    credentials: &EdgeGridCredentials,
    method: &str,
    path: &str,
    body: &str,
    timestamp: &str,
    nonce: &str,
) -> String {
    let unsigned = format!(
        "EG1-HMAC-SHA256 client_token={};access_token={};timestamp={};nonce={};",
        credentials.client_token, credentials.access_token, timestamp, nonce
    );
    let content_hash = if method == "POST" && !body.is_empty() {
        sha256_base64(body.as_bytes())
    } else {
        String::new()
    };
    let data = [method, "https", credentials.host.as_str(), path, "", content_hash.as_str(), unsigned.as_str()]
        .join("\t");
    let signing_key = hmac_sha256_base64(credentials.client_secret.as_bytes(), timestamp.as_bytes());
    let signature = hmac_sha256_base64(signing_key.as_bytes(), data.as_bytes());
    format!("{}signature={}", unsigned, signature)
}

/// Diagnostic text for the statuses Akamai documents.
fn http_error(status: u16, body: &Value) -> Error {
    let details = body
        .get("detail")
        .or_else(|| body.get("details"))
        .map(value_text)
        .unwrap_or_default();
    let text = match status {
        403 => format!(
            "call to {} failed with a 403 result: this indicates a problem with authorization; \
             ensure the API credentials have the necessary permissions. Problem details: {}",
            INVALIDATE_PATH, details
        ),
        400 | 401 => format!(
            "call to {} failed with a {} result: this indicates a problem with authentication or headers. \
             Problem details: {}",
            INVALIDATE_PATH, status, body
        ),
        404 => format!(
            "call to {} failed with a 404 result: the page does not exist as requested. Problem details: {}",
            INVALIDATE_PATH, details
        ),
        _ => match body.get("errorString").map(value_text) {
            Some(fault) if !fault.is_empty() => format!("call caused a server fault. Problem details: {}", fault),
            _ => body.to_string(),
        },
    };
    Error::rejected(Some(status), text)
}

const RESERVED_HEADERS: &[&str] = &["Authorization", "Content-Type"];

/// Invalidate a list of URLs.
pub struct AkamaiPurge {
    name: String,
    credentials: EdgeGridCredentials,
    source: UriSource,
    /// Extra request headers, sent unsigned
    headers: Vec<(String, String)>,
    transport: Arc<dyn Transport>,
}

impl AkamaiPurge {
    pub fn new(
        name: impl Into<String>,
        credentials: EdgeGridCredentials,
        source: UriSource,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            credentials,
            source,
            headers: Vec::new(),
            transport,
        }
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }
}

impl Trigger for AkamaiPurge {
    type Payload = Vec<String>;

    fn kind(&self) -> &str {
        "akamai purge"
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn prepare(&self) -> Result<Vec<String>> {
        if self.credentials.host.is_empty() {
            return Err(Error::Config("akamai host is not set".to_string()));
        }
        if let Some((name, _)) = self
            .headers
            .iter()
            .find(|(name, _)| RESERVED_HEADERS.iter().any(|r| r.eq_ignore_ascii_case(name)))
        {
            return Err(Error::validation(format!("header '{}' is set by the purge request itself", name)));
        }
        self.source.load()
    }

    fn preview(&self, payload: &Vec<String>) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("objects".into(), json!(payload));
        map
    }

    fn fire(&self, payload: Vec<String>) -> Result<FieldMap> {
        let url = format!("https://{}{}", self.credentials.host, INVALIDATE_PATH);
        let request = ApiRequest::post(url).json(&json!({ "objects": payload }))?;
        let timestamp = edgegrid_timestamp(chrono::Utc::now());
        let nonce = uuid::Uuid::new_v4().to_string();
        let authorization = edgegrid_authorization(
            &self.credentials,
            request.method.as_str(),
            INVALIDATE_PATH,
            &request.body_text(),
            &timestamp,
            &nonce,
        );
        let mut request = request.header("Authorization", authorization);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        debug!(objects = payload.len(), "akamai invalidate");
        let response = self.transport.send(&request)?;
        let body = if response.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&response.body).unwrap_or_else(|_| Value::String(response.body.clone()))
        };
        if !response.is_success() {
            return Err(http_error(response.status, &body));
        }

        let mut details = self.preview(&payload);
        if let Value::Object(fields) = body {
            details.extend(fields);
        }
        Ok(details)
    }
}
