//! TPM users, selected by display name.

use serde_json::{json, Value};

use super::{to_resource, TpmApi};
use crate::client::RemoteClient;
use crate::diff::FieldDiff;
use crate::engine::TargetedAction;
use crate::error::{Error, Result};
use crate::outcome::REDACTED;
use crate::resource::{FieldMap, Resource, ResourceId, ResourceSelector, ResourceSpec};

const PROFILE_FIELDS: &[&str] = &["name", "username", "email_address", "role"];
/// The API never returns these, so they are only sent on create.
const CREATE_ONLY: &[&str] = &["password", "login_dn"];
const SENSITIVE: &[&str] = &["password"];
const ROLES: &[&str] = &["admin", "project manager", "normal user", "read only", "only read"];

#[derive(Debug, Clone)]
pub struct UserClient {
    api: TpmApi,
}

impl UserClient {
    pub fn new(api: TpmApi) -> Self {
        Self { api }
    }

    fn set_active(&self, id: &ResourceId, active: bool) -> Result<()> {
        let action = if active { "activate" } else { "deactivate" };
        self.api.put(&format!("users/{}/{}.json", id, action), None)?;
        Ok(())
    }
}

impl RemoteClient for UserClient {
    fn kind(&self) -> &str {
        "user"
    }

    fn create_only_fields(&self) -> &[&str] {
        CREATE_ONLY
    }

    fn sensitive_fields(&self) -> &[&str] {
        SENSITIVE
    }

    fn prepare(&self, _selector: &ResourceSelector, desired: &ResourceSpec) -> Result<ResourceSpec> {
        for field in desired.field_names() {
            if !(PROFILE_FIELDS.contains(&field) || CREATE_ONLY.contains(&field) || field == "active") {
                return Err(Error::validation(format!("unknown user field '{}'", field)));
            }
        }
        if let Some(role) = desired.get("role").and_then(Value::as_str) {
            if !ROLES.contains(&role) {
                return Err(Error::validation(format!(
                    "invalid role '{}': expected one of {}",
                    role,
                    ROLES.join(", ")
                )));
            }
        }
        if desired.contains("password") && desired.contains("login_dn") {
            return Err(Error::validation("password and login_dn are mutually exclusive"));
        }
        Ok(desired.clone())
    }

    /// TPM has no user search; the full list is returned and filtered by the
    /// engine.
    fn find(&self, _selector: &ResourceSelector) -> Result<Vec<Resource>> {
        self.api
            .collection("users.json")?
            .iter()
            .map(to_resource)
            .collect()
    }

    fn read(&self, id: &ResourceId) -> Result<Resource> {
        to_resource(&self.api.get(&format!("users/{}.json", id))?)
    }

    fn validate_create(&self, spec: &ResourceSpec) -> Result<()> {
        if !spec.contains("password") && !spec.contains("login_dn") {
            return Err(Error::validation("a new user needs either password or login_dn"));
        }
        Ok(())
    }

    fn create(&self, spec: &ResourceSpec) -> Result<ResourceId> {
        self.validate_create(spec)?;
        let (body, state) = spec.partition(|f| f != "active");
        let id = self.api.create("users.json", &body.to_json())?;
        if state.get("active") == Some(&Value::Bool(false)) {
            self.set_active(&id, false)?;
        }
        Ok(id)
    }

    fn update(&self, id: &ResourceId, changes: &FieldDiff) -> Result<()> {
        let changed = changes.to_spec();
        let (profile, state) = changed.partition(|f| PROFILE_FIELDS.contains(&f));
        if !profile.is_empty() {
            self.api
                .put(&format!("users/{}.json", id), Some(&profile.to_json()))?;
        }
        if let Some(active) = state.get("active").and_then(Value::as_bool) {
            self.set_active(id, active)?;
        }
        Ok(())
    }

    fn delete(&self, id: &ResourceId) -> Result<()> {
        self.api.delete(&format!("users/{}.json", id))?;
        Ok(())
    }
}

/// Sets a new password for an existing user. The API never returns the
/// current password, so the change is sent every run.
#[derive(Clone)]
pub struct PasswordChange {
    api: TpmApi,
    target: ResourceSelector,
    password: String,
}

impl std::fmt::Debug for PasswordChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordChange")
            .field("target", &self.target)
            .field("password", &REDACTED)
            .finish()
    }
}

impl PasswordChange {
    pub fn new(api: TpmApi, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            api,
            target: ResourceSelector::by_name("user", user),
            password: password.into(),
        }
    }
}

impl TargetedAction for PasswordChange {
    type Payload = ();

    fn kind(&self) -> &str {
        "password change"
    }

    fn target(&self) -> &ResourceSelector {
        &self.target
    }

    fn prepare(&self) -> Result<()> {
        if self.password.is_empty() {
            return Err(Error::validation("the new password is empty"));
        }
        Ok(())
    }

    fn preview(&self, _payload: &()) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("password".into(), json!(REDACTED));
        map
    }

    fn apply(&self, target: &Resource, payload: ()) -> Result<FieldMap> {
        self.api.put(
            &format!("users/{}/change_password.json", target.id),
            Some(&json!({ "password": self.password })),
        )?;
        Ok(self.preview(&payload))
    }
}

/// Converts a user to LDAP authentication with the given DN, or back to a
/// normal user when no DN is given.
#[derive(Debug, Clone)]
pub struct LdapConversion {
    api: TpmApi,
    target: ResourceSelector,
    login_dn: Option<String>,
}

impl LdapConversion {
    pub fn to_ldap(api: TpmApi, user: impl Into<String>, login_dn: impl Into<String>) -> Self {
        Self {
            api,
            target: ResourceSelector::by_name("user", user),
            login_dn: Some(login_dn.into()),
        }
    }

    pub fn to_normal(api: TpmApi, user: impl Into<String>) -> Self {
        Self {
            api,
            target: ResourceSelector::by_name("user", user),
            login_dn: None,
        }
    }
}

impl TargetedAction for LdapConversion {
    type Payload = Option<String>;

    fn kind(&self) -> &str {
        "LDAP conversion"
    }

    fn target(&self) -> &ResourceSelector {
        &self.target
    }

    fn prepare(&self) -> Result<Option<String>> {
        match self.login_dn.as_deref().map(str::trim) {
            Some("") => Err(Error::validation("login_dn is empty")),
            Some(dn) => Ok(Some(dn.to_string())),
            None => Ok(None),
        }
    }

    fn preview(&self, payload: &Option<String>) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("login_dn".into(), json!(payload));
        map
    }

    fn apply(&self, target: &Resource, payload: Option<String>) -> Result<FieldMap> {
        match &payload {
            Some(dn) => self.api.put(
                &format!("users/{}/convert_to_ldap.json", target.id),
                Some(&json!({ "login_dn": dn })),
            )?,
            None => self
                .api
                .put(&format!("users/{}/convert_to_normal.json", target.id), None)?,
        };
        Ok(self.preview(&payload))
    }
}
