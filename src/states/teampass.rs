//! Team Password Manager states.

use super::{spec_from_params, Ensure, ParamExt, StateContext, StateHandler, StateParams};
use crate::error::Result;
use crate::integrations::teampass::passwords::password_selector;
use crate::integrations::teampass::{
    GroupClient, LdapConversion, MyPasswordClient, PasswordChange, PasswordClient, ProjectClient, SecurityUpdate,
    UserClient,
};
use crate::outcome::OutcomeRecord;
use crate::permission::{validate_permission, validate_permissions, PermissionScope};
use crate::resource::ResourceSelector;

/// `teampass.project`: a project by name.
pub struct ProjectState;

impl StateHandler for ProjectState {
    fn name(&self) -> &'static str {
        "teampass.project"
    }

    fn description(&self) -> &'static str {
        "Project with tags, notes, parent, archived and favorite flags"
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        params.get_string_required("name")?;
        params.get_bool("archived")?;
        params.get_bool("favorite")?;
        Ok(())
    }

    fn apply(&self, params: &StateParams, ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let client = ProjectClient::new(ctx.teampass()?);
        let selector = ResourceSelector::by_name("project", params.get_string_required("name")?);
        Ok(match ensure {
            Ensure::Absent => ctx.engine.ensure_absent(&client, &selector),
            _ => ctx
                .engine
                .ensure_present(&client, &selector, &spec_from_params(params, &["name"])),
        })
    }
}

/// `teampass.password`: a password by name within a project.
pub struct PasswordState;

impl StateHandler for PasswordState {
    fn name(&self) -> &'static str {
        "teampass.password"
    }

    fn description(&self) -> &'static str {
        "Password entry, including custom fields, in a named project"
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        params.get_string_required("name")?;
        params.get_string_required("project")?;
        Ok(())
    }

    fn apply(&self, params: &StateParams, ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let client = PasswordClient::new(ctx.teampass()?);
        let selector = password_selector(params.get_string_required("name")?, params.get_string_required("project")?);
        Ok(match ensure {
            Ensure::Absent => ctx.engine.ensure_absent(&client, &selector),
            _ => ctx
                .engine
                .ensure_present(&client, &selector, &spec_from_params(params, &["name", "project"])),
        })
    }
}

/// `teampass.user`: a user by display name.
pub struct UserState;

impl StateHandler for UserState {
    fn name(&self) -> &'static str {
        "teampass.user"
    }

    fn description(&self) -> &'static str {
        "User account; password and login_dn only apply on creation"
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        params.get_string_required("name")?;
        params.get_bool("active")?;
        Ok(())
    }

    fn apply(&self, params: &StateParams, ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let client = UserClient::new(ctx.teampass()?);
        let selector = ResourceSelector::by_name("user", params.get_string_required("name")?);
        Ok(match ensure {
            Ensure::Absent => ctx.engine.ensure_absent(&client, &selector),
            _ => ctx
                .engine
                .ensure_present(&client, &selector, &spec_from_params(params, &["name"])),
        })
    }
}

/// `teampass.mypassword`: a personal password of the API user, by name.
pub struct MyPasswordState;

impl StateHandler for MyPasswordState {
    fn name(&self) -> &'static str {
        "teampass.mypassword"
    }

    fn description(&self) -> &'static str {
        "Personal password entry of the connecting user"
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        params.get_string_required("name")?;
        Ok(())
    }

    fn apply(&self, params: &StateParams, ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let client = MyPasswordClient::new(ctx.teampass()?);
        let selector = ResourceSelector::by_name("my password", params.get_string_required("name")?);
        Ok(match ensure {
            Ensure::Absent => ctx.engine.ensure_absent(&client, &selector),
            _ => ctx
                .engine
                .ensure_present(&client, &selector, &spec_from_params(params, &["name"])),
        })
    }
}

/// `teampass.user_password`: sets the password of an existing user.
pub struct UserPasswordState;

impl StateHandler for UserPasswordState {
    fn name(&self) -> &'static str {
        "teampass.user_password"
    }

    fn description(&self) -> &'static str {
        "New password for an existing user, sent on every run"
    }

    fn supported(&self) -> &'static [Ensure] {
        &[Ensure::Updated]
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        params.get_string_required("name")?;
        params.get_string_required("password")?;
        Ok(())
    }

    fn apply(&self, params: &StateParams, _ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let api = ctx.teampass()?;
        let change = PasswordChange::new(
            api.clone(),
            params.get_string_required("name")?,
            params.get_string_required("password")?,
        );
        Ok(ctx.engine.apply_to(&UserClient::new(api), &change))
    }
}

/// `teampass.user_ldap`: present converts a user to LDAP with `login_dn`,
/// absent converts it back to a normal user.
pub struct UserLdapState;

impl StateHandler for UserLdapState {
    fn name(&self) -> &'static str {
        "teampass.user_ldap"
    }

    fn description(&self) -> &'static str {
        "LDAP authentication of an existing user"
    }

    fn validate(&self, params: &StateParams, ensure: Ensure) -> Result<()> {
        params.get_string_required("name")?;
        if ensure == Ensure::Present {
            params.get_string_required("login_dn")?;
        }
        Ok(())
    }

    fn apply(&self, params: &StateParams, ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let api = ctx.teampass()?;
        let name = params.get_string_required("name")?;
        let conversion = match ensure {
            Ensure::Absent => LdapConversion::to_normal(api.clone(), name),
            _ => LdapConversion::to_ldap(api.clone(), name, params.get_string_required("login_dn")?),
        };
        Ok(ctx.engine.apply_to(&UserClient::new(api), &conversion))
    }
}

/// `teampass.group`: a group and its members.
pub struct GroupState;

impl StateHandler for GroupState {
    fn name(&self) -> &'static str {
        "teampass.group"
    }

    fn description(&self) -> &'static str {
        "Group with an exact member list"
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        params.get_string_required("name")?;
        params.get_vec_string("members")?;
        Ok(())
    }

    fn apply(&self, params: &StateParams, ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let client = GroupClient::new(ctx.teampass()?);
        let selector = ResourceSelector::by_name("group", params.get_string_required("name")?);
        Ok(match ensure {
            Ensure::Absent => ctx.engine.ensure_absent(&client, &selector),
            _ => ctx
                .engine
                .ensure_present(&client, &selector, &spec_from_params(params, &["name"])),
        })
    }
}

/// `teampass.security`: replaces the permission set of a project, or of a
/// password when `password` is given.
pub struct SecurityState;

fn security_scope(params: &StateParams) -> Result<PermissionScope> {
    Ok(if params.get_string("password")?.is_some() {
        PermissionScope::Password
    } else {
        PermissionScope::Project
    })
}

impl StateHandler for SecurityState {
    fn name(&self) -> &'static str {
        "teampass.security"
    }

    fn description(&self) -> &'static str {
        "Managing user and user/group permission levels of a project or password"
    }

    fn supported(&self) -> &'static [Ensure] {
        &[Ensure::Updated]
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        params.get_string_required("project")?;
        let scope = security_scope(params)?;
        if let Some(level) = params.get_i64("grant_all")? {
            validate_permission(level, scope)?;
        }
        for key in ["users", "groups"] {
            if let Some(levels) = params.get_level_map(key)? {
                validate_permissions(levels.into_iter().map(|(_, level)| level), scope)?;
            }
        }
        Ok(())
    }

    fn apply(&self, params: &StateParams, _ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let api = ctx.teampass()?;
        let project = params.get_string_required("project")?;
        let mut update = match params.get_string("password")? {
            Some(password) => SecurityUpdate::for_password(api, password, project),
            None => SecurityUpdate::for_project(api, project),
        };
        if let Some(manager) = params.get_string("managed_by")? {
            update = update.managed_by(manager);
        }
        if let Some(level) = params.get_i64("grant_all")? {
            update = update.grant_all(level);
        }
        for (name, level) in params.get_level_map("users")?.unwrap_or_default() {
            update = update.user(name, level);
        }
        for (name, level) in params.get_level_map("groups")?.unwrap_or_default() {
            update = update.group(name, level);
        }
        let client = update.target_client();
        Ok(ctx.engine.apply_to(client.as_ref(), &update))
    }
}
