//! Project and password security (who manages a resource and who may do
//! what with it).
//!
//! TPM replaces the whole permission set on every `PUT .../security.json`, so
//! this is an action rather than a field diff.

use indexmap::IndexMap;
use serde_json::{json, Value};

use super::passwords::{password_selector, PasswordClient};
use super::projects::ProjectClient;
use super::{TpmApi, TpmResolver};
use crate::client::RemoteClient;
use crate::engine::TargetedAction;
use crate::error::{Error, Result};
use crate::permission::{validate_permission, validate_permissions, PermissionScope};
use crate::resolve::{EntityKind, ResolutionScope};
use crate::resource::{FieldMap, Resource, ResourceSelector};

/// Replacement security settings for one project or password.
#[derive(Debug, Clone)]
pub struct SecurityUpdate {
    api: TpmApi,
    scope: PermissionScope,
    target: ResourceSelector,
    managed_by: Option<String>,
    grant_all_permission: Option<i64>,
    users_permissions: IndexMap<String, i64>,
    groups_permissions: IndexMap<String, i64>,
}

impl SecurityUpdate {
    pub fn for_project(api: TpmApi, project: impl Into<String>) -> Self {
        Self::new(api, PermissionScope::Project, ResourceSelector::by_name("project", project))
    }

    pub fn for_password(api: TpmApi, name: impl Into<String>, project: impl Into<String>) -> Self {
        Self::new(api, PermissionScope::Password, password_selector(name, project))
    }

    fn new(api: TpmApi, scope: PermissionScope, target: ResourceSelector) -> Self {
        Self {
            api,
            scope,
            target,
            managed_by: None,
            grant_all_permission: None,
            users_permissions: IndexMap::new(),
            groups_permissions: IndexMap::new(),
        }
    }

    pub fn managed_by(mut self, user: impl Into<String>) -> Self {
        self.managed_by = Some(user.into());
        self
    }

    /// Project security only.
    pub fn grant_all(mut self, level: i64) -> Self {
        self.grant_all_permission = Some(level);
        self
    }

    pub fn user(mut self, name: impl Into<String>, level: i64) -> Self {
        self.users_permissions.insert(name.into(), level);
        self
    }

    pub fn group(mut self, name: impl Into<String>, level: i64) -> Self {
        self.groups_permissions.insert(name.into(), level);
        self
    }

    pub fn scope(&self) -> PermissionScope {
        self.scope
    }

    /// Client used to look up the target.
    pub fn target_client(&self) -> Box<dyn RemoteClient> {
        match self.scope {
            PermissionScope::Project => Box::new(ProjectClient::new(self.api.clone())),
            PermissionScope::Password => Box::new(PasswordClient::new(self.api.clone())),
        }
    }

    fn collection(&self) -> &'static str {
        match self.scope {
            PermissionScope::Project => "projects",
            PermissionScope::Password => "passwords",
        }
    }

    /// Levels checked without touching the network.
    fn validate(&self) -> Result<()> {
        if let Some(level) = self.grant_all_permission {
            if self.scope != PermissionScope::Project {
                return Err(Error::validation("grant_all_permission only applies to projects"));
            }
            validate_permission(level, self.scope)?;
        }
        validate_permissions(self.users_permissions.values().copied(), self.scope)?;
        validate_permissions(self.groups_permissions.values().copied(), self.scope)
    }
}

impl TargetedAction for SecurityUpdate {
    type Payload = Value;

    fn kind(&self) -> &str {
        "security"
    }

    fn target(&self) -> &ResourceSelector {
        &self.target
    }

    fn prepare(&self) -> Result<Value> {
        self.validate()?;

        let resolver = TpmResolver::new(self.api.clone());
        let mut scope = ResolutionScope::new(&resolver);
        let mut body = serde_json::Map::new();
        if let Some(manager) = &self.managed_by {
            body.insert("managed_by".into(), scope.resolve(EntityKind::User, manager)?.to_value());
        }
        if let Some(level) = self.grant_all_permission {
            body.insert("grant_all_permission".into(), json!(level));
        }
        let mut users = Vec::with_capacity(self.users_permissions.len());
        for (name, level) in &self.users_permissions {
            users.push(json!([scope.resolve(EntityKind::User, name)?.to_value(), level]));
        }
        let mut groups = Vec::with_capacity(self.groups_permissions.len());
        for (name, level) in &self.groups_permissions {
            groups.push(json!([scope.resolve(EntityKind::Group, name)?.to_value(), level]));
        }
        body.insert("users_permissions".into(), Value::Array(users));
        body.insert("groups_permissions".into(), Value::Array(groups));
        Ok(Value::Object(body))
    }

    fn preview(&self, payload: &Value) -> FieldMap {
        match payload {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => FieldMap::new(),
        }
    }

    fn apply(&self, target: &Resource, payload: Value) -> Result<FieldMap> {
        self.api.put(
            &format!("{}/{}/security.json", self.collection(), target.id),
            Some(&payload),
        )?;
        Ok(self.preview(&payload))
    }
}
