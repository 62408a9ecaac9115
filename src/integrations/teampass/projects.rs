//! TPM projects.

use serde_json::{json, Value};
use tracing::debug;

use super::{encode_search, to_resource, TpmApi, TpmResolver};
use crate::client::RemoteClient;
use crate::diff::FieldDiff;
use crate::error::{Error, Result};
use crate::resolve::{EntityKind, ResolutionScope};
use crate::resource::{value_text, Resource, ResourceId, ResourceSelector, ResourceSpec};

/// Fields sent with `PUT projects/<id>.json`.
const CONTENT_FIELDS: &[&str] = &["name", "tags", "notes"];
const ACCEPTED_FIELDS: &[&str] = &["name", "tags", "notes", "parent", "parent_id", "archived", "favorite"];

/// Projects, selected by name.
#[derive(Debug, Clone)]
pub struct ProjectClient {
    api: TpmApi,
}

impl ProjectClient {
    pub fn new(api: TpmApi) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &TpmApi {
        &self.api
    }

    fn show(&self, id: &ResourceId) -> Result<Resource> {
        to_resource(&self.api.get(&format!("projects/{}.json", id))?)
    }

    fn set_archived(&self, id: &ResourceId, archived: bool) -> Result<()> {
        let action = if archived { "archive" } else { "unarchive" };
        self.api.put(&format!("projects/{}/{}.json", id, action), None)?;
        Ok(())
    }

    fn set_favorite(&self, id: &ResourceId, favorite: bool) -> Result<()> {
        let path = format!("favorite_projects/{}.json", id);
        if favorite {
            self.api.post(&path, None)?;
        } else {
            self.api.delete(&path)?;
        }
        Ok(())
    }
}

impl RemoteClient for ProjectClient {
    fn kind(&self) -> &str {
        "project"
    }

    /// Resolves a `parent` project name into `parent_id`; an empty parent
    /// means the root (0).
    fn prepare(&self, _selector: &ResourceSelector, desired: &ResourceSpec) -> Result<ResourceSpec> {
        if let Some(unknown) = desired.field_names().find(|f| !ACCEPTED_FIELDS.contains(f)) {
            return Err(Error::validation(format!("unknown project field '{}'", unknown)));
        }
        let mut spec = desired.clone();
        for flag in ["archived", "favorite"] {
            if let Some(value) = spec.get(flag) {
                if !value.is_boolean() {
                    return Err(Error::validation(format!("{} must be a boolean", flag)));
                }
            }
        }
        if let Some(parent) = spec.remove("parent") {
            let parent = value_text(&parent);
            let parent_id = if parent.is_empty() {
                json!(0)
            } else {
                let resolver = TpmResolver::new(self.api.clone());
                let mut scope = ResolutionScope::new(&resolver);
                scope.resolve(EntityKind::Project, &parent)?.to_value()
            };
            spec.insert("parent_id", parent_id);
        }
        Ok(spec)
    }

    /// Search results are summaries; exact-name hits are re-read in full so
    /// every field can be compared.
    fn find(&self, selector: &ResourceSelector) -> Result<Vec<Resource>> {
        let term = selector.search_term();
        let items = self
            .api
            .collection(&format!("projects/search/{}.json", encode_search(&term)))?;
        debug!(term, hits = items.len(), "project search");
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
        let (content, state) = spec.partition(|f| f != "archived" && f != "favorite");
        let mut body = content.to_json();
        if let Some(object) = body.as_object_mut() {
            object.entry("parent_id").or_insert(json!(0));
        }
        let id = self.api.create("projects.json", &body)?;
        if state.get("archived") == Some(&Value::Bool(true)) {
            self.set_archived(&id, true)?;
        }
        if state.get("favorite") == Some(&Value::Bool(true)) {
            self.set_favorite(&id, true)?;
        }
        Ok(id)
    }

    /// One request per endpoint the diff touches: content, parent, archive
    /// state, favorite. Stops at the first failure.
    fn update(&self, id: &ResourceId, changes: &FieldDiff) -> Result<()> {
        let changed = changes.to_spec();
        let (content, _) = changed.partition(|f| CONTENT_FIELDS.contains(&f));
        if !content.is_empty() {
            self.api
                .put(&format!("projects/{}.json", id), Some(&content.to_json()))?;
        }
        if let Some(parent_id) = changed.get("parent_id") {
            self.api.put(
                &format!("projects/{}/change_parent.json", id),
                Some(&json!({ "parent_id": parent_id })),
            )?;
        }
        if let Some(archived) = changed.get("archived").and_then(Value::as_bool) {
            self.set_archived(id, archived)?;
        }
        if let Some(favorite) = changed.get("favorite").and_then(Value::as_bool) {
            self.set_favorite(id, favorite)?;
        }
        Ok(())
    }

    /// Only leaf projects can be deleted.
    fn delete(&self, id: &ResourceId) -> Result<()> {
        let project = self.show(id)?;
        if project.get("is_leaf") == Some(&Value::Bool(false)) {
            return Err(Error::validation(format!(
                "project {} is not a leaf; only leaf projects can be deleted",
                id
            )));
        }
        self.api.delete(&format!("projects/{}.json", id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::teampass::{TeampassAuth, TeampassSettings};
    use crate::transport::{Method, MockTransport};
    use std::sync::Arc;

    fn client(mock: &Arc<MockTransport>) -> ProjectClient {
        let settings = TeampassSettings::new(
            "https://tpm",
            TeampassAuth::Basic {
                username: "u".into(),
                password: "p".into(),
            },
        );
        ProjectClient::new(TpmApi::new(settings, mock.clone()))
    }

    #[test]
    fn test_prepare_resolves_parent() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json(
            Method::Get,
            "projects/search/infra.json",
            json!([{"id": 3, "name": "infra"}, {"id": 4, "name": "infra-old"}]),
        );
        let spec = client(&mock)
            .prepare(
                &ResourceSelector::by_name("project", "db"),
                &ResourceSpec::new().with("parent", "infra"),
            )
            .unwrap();
        assert_eq!(spec, ResourceSpec::new().with("parent_id", 3));
    }

    #[test]
    fn test_prepare_rejects_unknown_fields() {
        let mock = Arc::new(MockTransport::new());
        let err = client(&mock)
            .prepare(
                &ResourceSelector::by_name("project", "db"),
                &ResourceSpec::new().with("colour", "red"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn test_update_routes_fields_to_endpoints() {
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::Put, "projects/9.json", crate::transport::ApiResponse::new(204, ""));
        mock.on(Method::Put, "projects/9/change_parent.json", crate::transport::ApiResponse::new(204, ""));
        mock.on(Method::Put, "projects/9/archive.json", crate::transport::ApiResponse::new(204, ""));
        mock.on(Method::Post, "favorite_projects/9.json", crate::transport::ApiResponse::new(204, ""));

        let current = Resource::from_json(
            &json!({"id": 9, "name": "db", "notes": "old", "parent_id": 0, "archived": false, "favorite": false}),
            "id",
        )
        .unwrap();
        let desired = ResourceSpec::new()
            .with("notes", "new")
            .with("parent_id", 3)
            .with("archived", true)
            .with("favorite", true);
        let diff = FieldDiff::between(&desired, &current);
        client(&mock).update(&ResourceId::from("9"), &diff).unwrap();

        let urls: Vec<String> = mock.mutating_requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://tpm/index.php/api/v4/projects/9.json",
                "https://tpm/index.php/api/v4/projects/9/change_parent.json",
                "https://tpm/index.php/api/v4/projects/9/archive.json",
                "https://tpm/index.php/api/v4/favorite_projects/9.json",
            ]
        );
        assert_eq!(mock.mutating_requests()[0].json_body(), Some(json!({"notes": "new"})));
    }

    #[test]
    fn test_delete_refuses_non_leaf() {
        let mock = Arc::new(MockTransport::new());
        mock.on_json(Method::Get, "projects/5.json", json!({"id": 5, "name": "p", "is_leaf": false}));
        let err = client(&mock).delete(&ResourceId::from("5")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(mock.mutating_requests().is_empty());
    }
}
