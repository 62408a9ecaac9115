//! Personal passwords ("My Passwords") of the API user, selected by name.

use tracing::debug;

use super::{encode_search, to_resource, TpmApi};
use crate::client::RemoteClient;
use crate::diff::FieldDiff;
use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceId, ResourceSelector, ResourceSpec};

const FIELDS: &[&str] = &["name", "tags", "access_info", "username", "email", "password", "notes"];

#[derive(Debug, Clone)]
pub struct MyPasswordClient {
    api: TpmApi,
}

impl MyPasswordClient {
    pub fn new(api: TpmApi) -> Self {
        Self { api }
    }

    fn show(&self, id: &ResourceId) -> Result<Resource> {
        to_resource(&self.api.get(&format!("my_passwords/{}.json", id))?)
    }
}

impl RemoteClient for MyPasswordClient {
    fn kind(&self) -> &str {
        "my password"
    }

    fn sensitive_fields(&self) -> &[&str] {
        &["password"]
    }

    fn prepare(&self, _selector: &ResourceSelector, desired: &ResourceSpec) -> Result<ResourceSpec> {
        if let Some(field) = desired.field_names().find(|f| !FIELDS.contains(f)) {
            return Err(Error::validation(format!("unknown my password field '{}'", field)));
        }
        Ok(desired.clone())
    }

    /// Search results omit the secret, so exact name matches are re-read.
    fn find(&self, selector: &ResourceSelector) -> Result<Vec<Resource>> {
        let term = selector.search_term();
        let items = self
            .api
            .collection(&format!("my_passwords/search/{}.json", encode_search(&term)))?;
        debug!(term, hits = items.len(), "my password search");
        items
            .iter()
            .map(|item| {
                let summary = to_resource(item)?;
                if selector.matches(&summary) {
                    self.show(&summary.id)
                } else {
                    Ok(summary)
                }
            })
            .collect()
    }

    fn read(&self, id: &ResourceId) -> Result<Resource> {
        self.show(id)
    }

    fn create(&self, spec: &ResourceSpec) -> Result<ResourceId> {
        self.api.create("my_passwords.json", &spec.to_json())
    }

    fn update(&self, id: &ResourceId, changes: &FieldDiff) -> Result<()> {
        self.api
            .put(&format!("my_passwords/{}.json", id), Some(&changes.to_spec().to_json()))?;
        Ok(())
    }

    fn delete(&self, id: &ResourceId) -> Result<()> {
        self.api.delete(&format!("my_passwords/{}.json", id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConvergenceEngine;
    use crate::integrations::teampass::{TeampassAuth, TeampassSettings};
    use crate::outcome::REDACTED;
    use crate::transport::{ApiResponse, Method, MockTransport};
    use serde_json::json;
    use std::sync::Arc;

    fn client(mock: &Arc<MockTransport>) -> MyPasswordClient {
        let settings = TeampassSettings::new(
            "https://tpm",
            TeampassAuth::Basic {
                username: "u".into(),
                password: "p".into(),
            },
        );
        MyPasswordClient::new(TpmApi::new(settings, mock.clone()))
    }

    fn script_vpn(mock: &MockTransport) {
        mock.on_json(
            Method::Get,
            "my_passwords/search/vpn.json",
            json!([{"id": 3, "name": "vpn"}, {"id": 4, "name": "vpn-old"}]),
        );
        mock.on_json(
            Method::Get,
            "my_passwords/3.json",
            json!({"id": 3, "name": "vpn", "username": "me", "password": "old", "notes": ""}),
        );
    }

    #[test]
    fn test_changed_secret_is_put_once_and_redacted() {
        let mock = Arc::new(MockTransport::new());
        script_vpn(&mock);
        mock.on(Method::Put, "my_passwords/3.json", ApiResponse::new(204, ""));

        let record = ConvergenceEngine::new().ensure_present(
            &client(&mock),
            &ResourceSelector::by_name("my password", "vpn"),
            &ResourceSpec::new().with("username", "me").with("password", "new"),
        );
        assert!(record.changed, "{}", record.message);
        let writes = mock.mutating_requests();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].json_body(), Some(json!({"password": "new"})));
        assert_eq!(record.before.get("password"), Some(&json!(REDACTED)));
        assert!(!record.to_state_return().to_string().contains("\"new\""));
    }

    #[test]
    fn test_created_when_no_exact_match() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json(Method::Get, "my_passwords/search/ssh.json", json!([{"id": 8, "name": "ssh-2"}]));
        mock.on_json(Method::Post, "my_passwords.json", json!({"id": 12}));

        let record = ConvergenceEngine::new().ensure_present(
            &client(&mock),
            &ResourceSelector::by_name("my password", "ssh"),
            &ResourceSpec::new().with("name", "ssh").with("notes", "bastion"),
        );
        assert!(record.changed, "{}", record.message);
        assert_eq!(
            mock.mutating_requests()[0].json_body(),
            Some(json!({"name": "ssh", "notes": "bastion"}))
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let mock = Arc::new(MockTransport::new());
        let err = client(&mock)
            .prepare(
                &ResourceSelector::by_name("my password", "vpn"),
                &ResourceSpec::new().with("project_id", 2),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
