//! Permission level validation.
//!
//! Team Password Manager accepts a different set of permission levels for each
//! kind of resource. Levels are checked locally, before any remote call, so a
//! bad level never costs a round trip and never reaches a mutating endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Project levels: -1 do not set, 0 no access, 10 traverse, 20 read,
/// 30 read/create, 40 read/edit, 50 read/manage, 60 manage, 99 inherit.
const PROJECT_LEVELS: &[i64] = &[-1, 0, 10, 20, 30, 40, 50, 60, 99];

/// Password levels: 0 no access, 10 read, 20 edit data, 30 manage.
const PASSWORD_LEVELS: &[i64] = &[0, 10, 20, 30];

/// The resource kind a permission level applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    /// Project security (`grant_all_permission`, user and group levels)
    Project,
    /// Password security
    Password,
}

impl PermissionScope {
    /// Levels accepted for this scope.
    pub fn allowed(self) -> &'static [i64] {
        match self {
            PermissionScope::Project => PROJECT_LEVELS,
            PermissionScope::Password => PASSWORD_LEVELS,
        }
    }

    /// Comma-separated rendering of [`allowed`](Self::allowed).
    pub fn allowed_list(self) -> String {
        self.allowed()
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionScope::Project => write!(f, "project"),
            PermissionScope::Password => write!(f, "password"),
        }
    }
}

/// Check that `level` belongs to the set allowed for `scope`.
pub fn validate_permission(level: i64, scope: PermissionScope) -> Result<()> {
    if scope.allowed().contains(&level) {
        Ok(())
    } else {
        Err(Error::InvalidPermission { level, scope })
    }
}

/// Check every level; the first offending one is reported.
pub fn validate_permissions<I>(levels: I, scope: PermissionScope) -> Result<()>
where
    I: IntoIterator<Item = i64>,
{
    levels
        .into_iter()
        .try_for_each(|level| validate_permission(level, scope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_levels() {
        for level in [-1, 0, 10, 20, 30, 40, 50, 60, 99] {
            assert!(validate_permission(level, PermissionScope::Project).is_ok());
        }
        assert!(validate_permission(70, PermissionScope::Project).is_err());
        assert!(validate_permission(-2, PermissionScope::Project).is_err());
    }

    #[test]
    fn test_password_levels_are_a_strict_subset() {
        for level in [0, 10, 20, 30] {
            assert!(validate_permission(level, PermissionScope::Password).is_ok());
        }
        for level in [-1, 40, 50, 60, 99] {
            assert!(matches!(
                validate_permission(level, PermissionScope::Password),
                Err(Error::InvalidPermission { level: l, scope: PermissionScope::Password }) if l == level
            ));
        }
    }

    #[test]
    fn test_validate_permissions_reports_first_offender() {
        let err = validate_permissions([10, 45, 77], PermissionScope::Project).unwrap_err();
        assert!(matches!(err, Error::InvalidPermission { level: 45, .. }));
        assert!(validate_permissions(Vec::<i64>::new(), PermissionScope::Password).is_ok());
    }
}
