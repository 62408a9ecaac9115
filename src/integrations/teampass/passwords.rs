//! TPM passwords, selected by name within a project.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{encode_search, to_resource, TpmApi, TpmResolver};
use crate::client::RemoteClient;
use crate::diff::FieldDiff;
use crate::error::{Error, Result};
use crate::resolve::{EntityKind, ResolutionScope};
use crate::resource::{value_text, Resource, ResourceId, ResourceSelector, ResourceSpec};

/// Selector key holding the owning project's name.
pub const PROJECT_KEY: &str = "project.name";

const CONTENT_FIELDS: &[&str] = &[
    "name",
    "project_id",
    "tags",
    "access_info",
    "username",
    "email",
    "password",
    "expiry_date",
    "notes",
];

/// Custom field data often holds further secrets, so it is hidden as well.
const SENSITIVE: &[&str] = &[
    "password",
    "custom_data1",
    "custom_data2",
    "custom_data3",
    "custom_data4",
    "custom_data5",
    "custom_data6",
    "custom_data7",
    "custom_data8",
    "custom_data9",
    "custom_data10",
];

static CUSTOM_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^custom_(data|label|type)(\d+)$").expect("Invalid custom field regex")
});

/// Classification of a custom field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Custom {
    /// `custom_dataN`, sent with the password content
    Data,
    /// `custom_labelN` / `custom_typeN`, sent to `custom_fields.json`
    Definition,
}

fn custom_field(field: &str) -> Option<(Custom, u32)> {
    let caps = CUSTOM_FIELD.captures(field)?;
    let index = caps[2].parse().ok()?;
    let kind = if &caps[1] == "data" {
        Custom::Data
    } else {
        Custom::Definition
    };
    Some((kind, index))
}

/// Selector for a password in a project.
pub fn password_selector(name: impl Into<String>, project: impl Into<String>) -> ResourceSelector {
    ResourceSelector::by_name("password", name).key(PROJECT_KEY, Value::String(project.into()))
}

#[derive(Debug, Clone)]
pub struct PasswordClient {
    api: TpmApi,
}

impl PasswordClient {
    pub fn new(api: TpmApi) -> Self {
        Self { api }
    }

    fn show(&self, id: &ResourceId) -> Result<Resource> {
        let value = self.api.get(&format!("passwords/{}.json", id))?;
        Ok(normalise(to_resource(&value)?))
    }

    fn set_locked(&self, id: &ResourceId, locked: bool) -> Result<()> {
        let action = if locked { "lock" } else { "unlock" };
        self.api.put(&format!("passwords/{}/{}.json", id, action), None)?;
        Ok(())
    }

    fn set_favorite(&self, id: &ResourceId, favorite: bool) -> Result<()> {
        let path = format!("favorite_passwords/{}.json", id);
        if favorite {
            self.api.post(&path, None)?;
        } else {
            self.api.delete(&path)?;
        }
        Ok(())
    }
}

/// Brings a password into the shape specs use: `project.id` is copied to
/// `project_id`, and `custom_fieldN: {type, label, data}` becomes
/// `custom_dataN`, `custom_labelN` and `custom_typeN`.
fn normalise(mut resource: Resource) -> Resource {
    if let Some(project_id) = resource.get("project.id").cloned() {
        resource.fields.insert("project_id".to_string(), project_id);
    }
    for index in 1..=10 {
        let key = format!("custom_field{}", index);
        if let Some(Value::Object(field)) = resource.fields.get(&key).cloned() {
            for (part, target) in [("data", "custom_data"), ("label", "custom_label"), ("type", "custom_type")] {
                if let Some(value) = field.get(part) {
                    resource
                        .fields
                        .insert(format!("{}{}", target, index), value.clone());
                }
            }
        }
    }
    resource
}

impl RemoteClient for PasswordClient {
    fn kind(&self) -> &str {
        "password"
    }

    fn sensitive_fields(&self) -> &[&str] {
        SENSITIVE
    }

    /// Validates field names and custom field indexes (1 to 10), then
    /// resolves the project named by `project` or the selector into
    /// `project_id`.
    fn prepare(&self, selector: &ResourceSelector, desired: &ResourceSpec) -> Result<ResourceSpec> {
        for field in desired.field_names() {
            if CONTENT_FIELDS.contains(&field) || matches!(field, "project" | "locked" | "favorite") {
                continue;
            }
            match custom_field(field) {
                Some((_, 1..=10)) => {}
                Some((_, index)) => {
                    return Err(Error::validation(format!(
                        "custom field index {} in '{}' is out of range 1-10",
                        index, field
                    )))
                }
                None => return Err(Error::validation(format!("unknown password field '{}'", field))),
            }
        }

        let mut spec = desired.clone();
        let project = spec
            .remove("project")
            .map(|v| value_text(&v))
            .or_else(|| selector.get_text(PROJECT_KEY));
        if let Some(project) = project {
            if !spec.contains("project_id") {
                let resolver = TpmResolver::new(self.api.clone());
                let mut scope = ResolutionScope::new(&resolver);
                let id = scope.resolve(EntityKind::Project, &project)?;
                spec.insert("project_id", id.to_value());
            }
        }
        Ok(spec)
    }

    fn find(&self, selector: &ResourceSelector) -> Result<Vec<Resource>> {
        let term = selector.search_term();
        let items = self
            .api
            .collection(&format!("passwords/search/{}.json", encode_search(&term)))?;
        debug!(term, hits = items.len(), "password search");
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

    fn validate_create(&self, spec: &ResourceSpec) -> Result<()> {
        if !spec.contains("project_id") {
            return Err(Error::validation("a password needs a project"));
        }
        Ok(())
    }

    fn create(&self, spec: &ResourceSpec) -> Result<ResourceId> {
        self.validate_create(spec)?;
        let (body, rest) = spec.partition(|f| {
            CONTENT_FIELDS.contains(&f) || matches!(custom_field(f), Some((Custom::Data, _)))
        });
        let id = self.api.create("passwords.json", &body.to_json())?;

        let (definitions, state) = rest.partition(|f| custom_field(f).is_some());
        if !definitions.is_empty() {
            self.api
                .put(&format!("passwords/{}/custom_fields.json", id), Some(&definitions.to_json()))?;
        }
        if state.get("locked") == Some(&Value::Bool(true)) {
            self.set_locked(&id, true)?;
        }
        if state.get("favorite") == Some(&Value::Bool(true)) {
            self.set_favorite(&id, true)?;
        }
        Ok(id)
    }

    fn update(&self, id: &ResourceId, changes: &FieldDiff) -> Result<()> {
        let changed = changes.to_spec();
        let (content, rest) = changed.partition(|f| {
            CONTENT_FIELDS.contains(&f) || matches!(custom_field(f), Some((Custom::Data, _)))
        });
        if !content.is_empty() {
            self.api
                .put(&format!("passwords/{}.json", id), Some(&content.to_json()))?;
        }
        let (definitions, state) = rest.partition(|f| custom_field(f).is_some());
        if !definitions.is_empty() {
            self.api
                .put(&format!("passwords/{}/custom_fields.json", id), Some(&definitions.to_json()))?;
        }
        if let Some(locked) = state.get("locked").and_then(Value::as_bool) {
            self.set_locked(id, locked)?;
        }
        if let Some(favorite) = state.get("favorite").and_then(Value::as_bool) {
            self.set_favorite(id, favorite)?;
        }
        Ok(())
    }

    fn delete(&self, id: &ResourceId) -> Result<()> {
        self.api.delete(&format!("passwords/{}.json", id))?;
        Ok(())
    }
}
