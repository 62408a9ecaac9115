//! TPM groups and their memberships.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

use super::{to_resource, TpmApi, TpmResolver};
use crate::client::RemoteClient;
use crate::diff::FieldDiff;
use crate::error::{Error, Result};
use crate::resolve::{EntityKind, ResolutionScope};
use crate::resource::{value_text, Resource, ResourceId, ResourceSelector, ResourceSpec};

/// Groups, selected by name. `members` is compared as a sorted list of user
/// names.
#[derive(Debug, Clone)]
pub struct GroupClient {
    api: TpmApi,
}

fn member_set(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::Array(items)) => items.iter().map(value_text).collect(),
        _ => BTreeSet::new(),
    }
}

fn member_list(members: BTreeSet<String>) -> Value {
    Value::Array(members.into_iter().map(Value::String).collect())
}

impl GroupClient {
    pub fn new(api: TpmApi) -> Self {
        Self { api }
    }

    /// Group details with `users` flattened into sorted `members`.
    fn show(&self, id: &ResourceId) -> Result<Resource> {
        let mut group = to_resource(&self.api.get(&format!("groups/{}.json", id))?)?;
        let members: BTreeSet<String> = match group.fields.get("users") {
            Some(Value::Array(users)) => users
                .iter()
                .filter_map(|u| u.get("name").map(value_text))
                .collect(),
            _ => BTreeSet::new(),
        };
        group.fields.insert("members".to_string(), member_list(members));
        Ok(group)
    }

    fn change_members(&self, id: &ResourceId, add: &BTreeSet<String>, remove: &BTreeSet<String>) -> Result<()> {
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }
        let resolver = TpmResolver::new(self.api.clone());
        let mut scope = ResolutionScope::new(&resolver);
        for (names, action) in [(add, "add_user"), (remove, "delete_user")] {
            for name in names {
                let user = scope.resolve(EntityKind::User, name)?;
                debug!(group = %id, user = %name, action, "changing membership");
                self.api
                    .put(&format!("groups/{}/{}/{}.json", id, action, user), None)?;
            }
        }
        Ok(())
    }
}

impl RemoteClient for GroupClient {
    fn kind(&self) -> &str {
        "group"
    }

    /// Normalises `members` and checks every member exists.
    fn prepare(&self, _selector: &ResourceSelector, desired: &ResourceSpec) -> Result<ResourceSpec> {
        if let Some(unknown) = desired.field_names().find(|f| !matches!(*f, "name" | "members")) {
            return Err(Error::validation(format!("unknown group field '{}'", unknown)));
        }
        let mut spec = desired.clone();
        if let Some(members) = spec.get("members") {
            let names = match members {
                Value::Array(_) => member_set(Some(members)),
                Value::String(s) => s
                    .split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect(),
                other => return Err(Error::validation(format!("members must be a list, got {}", other))),
            };
            let resolver = TpmResolver::new(self.api.clone());
            let mut scope = ResolutionScope::new(&resolver);
            scope.resolve_all(EntityKind::User, names.iter().map(String::as_str))?;
            spec.insert("members", member_list(names));
        }
        Ok(spec)
    }

    fn find(&self, selector: &ResourceSelector) -> Result<Vec<Resource>> {
        let groups = self.api.collection("groups.json")?;
        groups
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
        let (body, rest) = spec.partition(|f| f == "name");
        let id = self.api.create("groups.json", &body.to_json())?;
        self.change_members(&id, &member_set(rest.get("members")), &BTreeSet::new())?;
        Ok(id)
    }

    fn update(&self, id: &ResourceId, changes: &FieldDiff) -> Result<()> {
        for change in changes.changes() {
            match change.field.as_str() {
                "name" => {
                    self.api.put(
                        &format!("groups/{}.json", id),
                        Some(&serde_json::json!({ "name": change.after })),
                    )?;
                }
                "members" => {
                    let before = member_set(change.before.as_ref());
                    let after = member_set(Some(&change.after));
                    let add = after.difference(&before).cloned().collect();
                    let remove = before.difference(&after).cloned().collect();
                    self.change_members(id, &add, &remove)?;
                }
                other => return Err(Error::validation(format!("unknown group field '{}'", other))),
            }
        }
        Ok(())
    }

    fn delete(&self, id: &ResourceId) -> Result<()> {
        self.api.delete(&format!("groups/{}.json", id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConvergenceEngine;
    use crate::integrations::teampass::{TeampassAuth, TeampassSettings};
    use crate::transport::{ApiResponse, Method, MockTransport};
    use serde_json::json;
    use std::sync::Arc;

    fn client(mock: &Arc<MockTransport>) -> GroupClient {
        let settings = TeampassSettings::new(
            "https://tpm",
            TeampassAuth::Basic {
                username: "admin".into(),
                password: "p".into(),
            },
        );
        GroupClient::new(TpmApi::new(settings, mock.clone()))
    }

    fn script_directory(mock: &MockTransport) {
        mock.on_json(
            Method::Get,
            "api/v4/users.json",
            json!([{"id": 1, "name": "ann"}, {"id": 2, "name": "bob"}, {"id": 3, "name": "cyd"}]),
        );
        mock.on_json(Method::Get, "api/v4/groups.json", json!([{"id": 8, "name": "ops"}]));
        mock.on_json(
            Method::Get,
            "groups/8.json",
            json!({"id": 8, "name": "ops", "users": [{"id": 2, "name": "bob"}, {"id": 1, "name": "ann"}]}),
        );
    }

    #[test]
    fn test_member_order_does_not_matter() {
        let mock = Arc::new(MockTransport::new());
        script_directory(&mock);
        let record = ConvergenceEngine::new().ensure_present(
            &client(&mock),
            &ResourceSelector::by_name("group", "ops"),
            &ResourceSpec::new().with("members", json!(["bob", "ann", "ann"])),
        );
        assert!(!record.changed, "{}", record.message);
        assert_eq!(record.succeeded, Some(true));
    }

    #[test]
    fn test_membership_diff_adds_and_removes() {
        let mock = Arc::new(MockTransport::new());
        script_directory(&mock);
        mock.on(Method::Put, "groups/8/add_user/3.json", ApiResponse::new(204, ""));
        mock.on(Method::Put, "groups/8/delete_user/2.json", ApiResponse::new(204, ""));
        let record = ConvergenceEngine::new().ensure_present(
            &client(&mock),
            &ResourceSelector::by_name("group", "ops"),
            &ResourceSpec::new().with("members", "ann, cyd"),
        );
        assert!(record.changed, "{}", record.message);
        let urls: Vec<String> = mock.mutating_requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://tpm/index.php/api/v4/groups/8/add_user/3.json",
                "https://tpm/index.php/api/v4/groups/8/delete_user/2.json",
            ]
        );
        assert_eq!(record.before.get("members"), Some(&json!(["ann", "bob"])));
        assert_eq!(record.after.get("members"), Some(&json!(["ann", "cyd"])));
    }

    #[test]
    fn test_unknown_member_stops_before_mutation() {
        let mock = Arc::new(MockTransport::new());
        script_directory(&mock);
        let record = ConvergenceEngine::new().ensure_present(
            &client(&mock),
            &ResourceSelector::by_name("group", "ops"),
            &ResourceSpec::new().with("members", json!(["zed"])),
        );
        assert_eq!(record.succeeded, Some(false));
        assert_eq!(record.message, "user 'zed' does not exist");
        assert!(mock.mutating_requests().is_empty());
    }
}
