//! Named-entity resolution.
//!
//! Vendor APIs address related entities (users, groups, projects, hosts) by
//! id while declarations name them. Resolvers return possibly-superset
//! candidates from a search endpoint; [`ResolutionScope`] filters them by exact
//! name and memoises the result for the lifetime of one convergence call.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::ResourceId;

/// Kinds of entities that can be resolved by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Group,
    Project,
    Host,
    HostGroup,
    Network,
    NetworkGroup,
    Domain,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::User => "user",
            EntityKind::Group => "group",
            EntityKind::Project => "project",
            EntityKind::Host => "host",
            EntityKind::HostGroup => "host group",
            EntityKind::Network => "network",
            EntityKind::NetworkGroup => "network group",
            EntityKind::Domain => "domain",
        };
        f.write_str(s)
    }
}

/// A named entity as returned by a search endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: ResourceId,
    pub name: String,
}

impl Candidate {
    pub fn new(id: impl Into<ResourceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Source of name candidates. Results may be a superset of the exact match.
pub trait NameResolver: Send + Sync {
    fn candidates(&self, kind: EntityKind, name: &str) -> Result<Vec<Candidate>>;
}

/// Per-call memoising resolver.
pub struct ResolutionScope<'a> {
    resolver: &'a dyn NameResolver,
    cache: HashMap<(EntityKind, String), ResourceId>,
}

impl<'a> ResolutionScope<'a> {
    pub fn new(resolver: &'a dyn NameResolver) -> Self {
        Self {
            resolver,
            cache: HashMap::new(),
        }
    }

    /// Resolve `name` to exactly one id.
    pub fn resolve(&mut self, kind: EntityKind, name: &str) -> Result<ResourceId> {
        let key = (kind, name.to_string());
        if let Some(id) = self.cache.get(&key) {
            return Ok(id.clone());
        }
        let id = resolve_name(self.resolver, kind, name)?;
        self.cache.insert(key, id.clone());
        Ok(id)
    }

    /// Resolve each name in order, failing on the first that does not resolve.
    pub fn resolve_all<'n, I>(&mut self, kind: EntityKind, names: I) -> Result<Vec<ResourceId>>
    where
        I: IntoIterator<Item = &'n str>,
    {
        names.into_iter().map(|n| self.resolve(kind, n)).collect()
    }

    /// Number of distinct names looked up so far.
    pub fn lookups(&self) -> usize {
        self.cache.len()
    }
}

/// One-shot resolution without memoisation.
pub fn resolve_name(resolver: &dyn NameResolver, kind: EntityKind, name: &str) -> Result<ResourceId> {
    let candidates = resolver.candidates(kind, name)?;
    let mut exact = candidates.into_iter().filter(|c| c.name == name);
    match (exact.next(), exact.next()) {
        (None, _) => Err(Error::not_found(kind.to_string(), name)),
        (Some(only), None) => {
            debug!(%kind, name, id = %only.id, "resolved name");
            Ok(only.id)
        }
        (Some(_), Some(_)) => Err(Error::AmbiguousSelector {
            selector: format!("{} name={}", kind, name),
            matches: 2 + exact.count(),
        }),
    }
}
