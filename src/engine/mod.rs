//! The convergence engine.
//!
//! Given a client, a selector and a desired spec, the engine reads current
//! state, decides the minimal action and performs it:
//!
//! 1. `client.prepare` validates and resolves names (no mutation).
//! 2. `client.find` results are filtered to exact matches on every selector key.
//! 3. More than one match is an ambiguity failure.
//! 4. No match creates the resource (or reports it missing in update-only mode).
//! 5. One match is diffed; an empty diff is a no-op, otherwise only the changed
//!    fields are sent to `update`.
//!
//! A call issues at most one mutating client call, and none in dry-run mode.
//! Nothing is cached between calls.

pub mod action;
pub mod batch;

pub use action::{TargetedAction, Trigger};
pub use batch::{converge_batch, BatchItem, BatchOperation, SelectorLocks};

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, instrument, warn};

use crate::client::RemoteClient;
use crate::diff::FieldDiff;
use crate::error::{Error, Result};
use crate::outcome::{OutcomeRecord, Reporter};
use crate::resource::{Resource, ResourceId, ResourceSelector, ResourceSpec};

/// Whether a missing resource should be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Create when absent, update when different
    #[default]
    Present,
    /// Only update an existing resource; absence is a failure
    UpdateOnly,
}

/// The action the engine settled on. Computed per call, never persisted.
///
/// `Debug` lists field names only, so specs carrying secrets can be logged.
#[derive(Clone, PartialEq)]
pub enum Decision {
    Create(ResourceSpec),
    Update { id: ResourceId, diff: FieldDiff },
    NoOp(ResourceId),
    Ambiguous(usize),
    DryRunCreate(ResourceSpec),
    DryRunUpdate { id: ResourceId, diff: FieldDiff },
    /// Update-only mode and nothing matched
    Missing,
    Delete(ResourceId),
    DryRunDelete(ResourceId),
    AlreadyAbsent,
}

impl Decision {
    /// True if executing the decision calls create, update or delete.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Decision::Create(_) | Decision::Update { .. } | Decision::Delete(_)
        )
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(
            self,
            Decision::DryRunCreate(_) | Decision::DryRunUpdate { .. } | Decision::DryRunDelete(_)
        )
    }
}

impl fmt::Debug for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Create(spec) => write!(f, "Create([{}])", spec_fields(spec)),
            Decision::DryRunCreate(spec) => write!(f, "DryRunCreate([{}])", spec_fields(spec)),
            Decision::Update { id, diff } => write!(f, "Update({}, [{}])", id, diff_fields(diff)),
            Decision::DryRunUpdate { id, diff } => write!(f, "DryRunUpdate({}, [{}])", id, diff_fields(diff)),
            Decision::NoOp(id) => write!(f, "NoOp({})", id),
            Decision::Ambiguous(n) => write!(f, "Ambiguous({})", n),
            Decision::Missing => write!(f, "Missing"),
            Decision::Delete(id) => write!(f, "Delete({})", id),
            Decision::DryRunDelete(id) => write!(f, "DryRunDelete({})", id),
            Decision::AlreadyAbsent => write!(f, "AlreadyAbsent"),
        }
    }
}

fn spec_fields(spec: &ResourceSpec) -> String {
    spec.field_names().collect::<Vec<_>>().join(", ")
}

fn diff_fields(diff: &FieldDiff) -> String {
    diff.fields().collect::<Vec<_>>().join(", ")
}

/// Idempotent convergence over any [`RemoteClient`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergenceEngine {
    dry_run: bool,
}

impl ConvergenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that computes decisions but never mutates.
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Create or update so the resource matches `desired`.
    pub fn ensure_present(
        &self,
        client: &dyn RemoteClient,
        selector: &ResourceSelector,
        desired: &ResourceSpec,
    ) -> OutcomeRecord {
        self.converge(client, selector, desired, Presence::Present)
    }

    /// Update an existing resource; never create one.
    pub fn ensure_existing(
        &self,
        client: &dyn RemoteClient,
        selector: &ResourceSelector,
        desired: &ResourceSpec,
    ) -> OutcomeRecord {
        self.converge(client, selector, desired, Presence::UpdateOnly)
    }

    #[instrument(skip(self, client, desired), fields(kind = client.kind(), selector = %selector, dry_run = self.dry_run))]
    pub fn converge(
        &self,
        client: &dyn RemoteClient,
        selector: &ResourceSelector,
        desired: &ResourceSpec,
        presence: Presence,
    ) -> OutcomeRecord {
        let reporter = Reporter::for_selector(selector).with_sensitive(client.sensitive_fields());
        match self.plan(client, selector, desired, presence) {
            Ok(decision) => self.execute(client, selector, &reporter, decision),
            Err(e) => {
                warn!(error = %e, "convergence failed before any mutation");
                reporter.failed(&e)
            }
        }
    }

    /// Compute the decision without executing it. Issues only `prepare` and
    /// `find` calls.
    pub fn plan(
        &self,
        client: &dyn RemoteClient,
        selector: &ResourceSelector,
        desired: &ResourceSpec,
        presence: Presence,
    ) -> Result<Decision> {
        let prepared = client.prepare(selector, desired)?;
        let mut matches = exact_matches(client, selector)?;

        let decision = match matches.len() {
            0 => match presence {
                Presence::UpdateOnly => Decision::Missing,
                Presence::Present => {
                    let spec = with_selector_keys(prepared, selector);
                    client.validate_create(&spec)?;
                    if self.dry_run {
                        Decision::DryRunCreate(spec)
                    } else {
                        Decision::Create(spec)
                    }
                }
            },
            1 => {
                let current = matches.remove(0);
                let mut compared = prepared;
                for field in client.create_only_fields() {
                    compared.remove(field);
                }
                let diff = FieldDiff::between(&compared, &current);
                if diff.is_empty() {
                    Decision::NoOp(current.id)
                } else if self.dry_run {
                    Decision::DryRunUpdate {
                        id: current.id,
                        diff,
                    }
                } else {
                    Decision::Update {
                        id: current.id,
                        diff,
                    }
                }
            }
            n => Decision::Ambiguous(n),
        };
        debug!(?decision, "planned");
        Ok(decision)
    }

    /// Delete the resource if it exists.
    #[instrument(skip(self, client), fields(kind = client.kind(), selector = %selector, dry_run = self.dry_run))]
    pub fn ensure_absent(
        &self,
        client: &dyn RemoteClient,
        selector: &ResourceSelector,
    ) -> OutcomeRecord {
        let reporter = Reporter::for_selector(selector).with_sensitive(client.sensitive_fields());
        match self.plan_absent(client, selector) {
            Ok(decision) => self.execute(client, selector, &reporter, decision),
            Err(e) => {
                warn!(error = %e, "lookup failed");
                reporter.failed(&e)
            }
        }
    }

    pub fn plan_absent(
        &self,
        client: &dyn RemoteClient,
        selector: &ResourceSelector,
    ) -> Result<Decision> {
        let mut matches = exact_matches(client, selector)?;
        Ok(match matches.len() {
            0 => Decision::AlreadyAbsent,
            1 => {
                let id = matches.remove(0).id;
                if self.dry_run {
                    Decision::DryRunDelete(id)
                } else {
                    Decision::Delete(id)
                }
            }
            n => Decision::Ambiguous(n),
        })
    }

    /// Run a decision. At most one mutating call is made.
    pub fn execute(
        &self,
        client: &dyn RemoteClient,
        selector: &ResourceSelector,
        reporter: &Reporter,
        decision: Decision,
    ) -> OutcomeRecord {
        if self.dry_run && decision.is_mutating() {
            // A decision planned by a non-dry-run engine; downgrade it.
            return self.execute(client, selector, reporter, downgrade(decision));
        }
        match decision {
            Decision::Create(spec) => match client.create(&spec) {
                Ok(id) => {
                    info!(%id, "created");
                    reporter.created(&id, &spec)
                }
                Err(e) => reporter.failed(&e),
            },
            Decision::Update { id, diff } => match client.update(&id, &diff) {
                Ok(()) => {
                    info!(%id, fields = diff.len(), "updated");
                    reporter.updated(&diff)
                }
                Err(e) => reporter.failed(&e),
            },
            Decision::Delete(id) => match client.delete(&id) {
                Ok(()) => {
                    info!(%id, "deleted");
                    reporter.deleted(&id)
                }
                Err(e) => reporter.failed(&e),
            },
            Decision::NoOp(_) => reporter.no_op(),
            Decision::AlreadyAbsent => reporter.already_absent(),
            Decision::Missing => reporter.missing(selector),
            Decision::Ambiguous(n) => reporter.ambiguous(selector, n),
            Decision::DryRunCreate(spec) => reporter.would_create(&spec),
            Decision::DryRunUpdate { diff, .. } => reporter.would_update(&diff),
            Decision::DryRunDelete(id) => reporter.would_delete(&id),
        }
    }
}

/// `find` results narrowed to exact matches on every selector key.
pub fn exact_matches(client: &dyn RemoteClient, selector: &ResourceSelector) -> Result<Vec<Resource>> {
    let candidates = client.find(selector)?;
    let total = candidates.len();
    let matches: Vec<Resource> = candidates
        .into_iter()
        .filter(|r| selector.matches(r))
        .collect();
    debug!(candidates = total, exact = matches.len(), "filtered search results");
    Ok(matches)
}

/// Exactly one match or an error.
pub fn find_one(client: &dyn RemoteClient, selector: &ResourceSelector) -> Result<Resource> {
    let mut matches = exact_matches(client, selector)?;
    match matches.len() {
        0 => Err(Error::not_found(selector.kind(), selector.display_name())),
        1 => Ok(matches.remove(0)),
        n => Err(Error::AmbiguousSelector {
            selector: selector.to_string(),
            matches: n,
        }),
    }
}

fn with_selector_keys(mut spec: ResourceSpec, selector: &ResourceSelector) -> ResourceSpec {
    for (field, value) in selector.flat_keys() {
        if !spec.contains(field) {
            spec.insert(field.clone(), value.clone());
        }
    }
    spec
}

fn downgrade(decision: Decision) -> Decision {
    match decision {
        Decision::Create(spec) => Decision::DryRunCreate(spec),
        Decision::Update { id, diff } => Decision::DryRunUpdate { id, diff },
        Decision::Delete(id) => Decision::DryRunDelete(id),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientCall, MemoryClient};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn billing() -> ResourceSelector {
        ResourceSelector::by_name("project", "billing")
    }

    #[test]
    fn test_create_merges_selector_keys() {
        let client = MemoryClient::new("project");
        let engine = ConvergenceEngine::new();
        let record = engine.ensure_present(&client, &billing(), &ResourceSpec::new().with("notes", "x"));

        assert!(record.changed);
        assert_eq!(record.succeeded, Some(true));
        assert_eq!(
            client.mutating_calls(),
            vec![ClientCall::Create(
                ResourceSpec::new().with("notes", "x").with("name", "billing")
            )]
        );
        assert_eq!(record.after.get("id"), Some(&json!(1)));
    }

    #[test]
    fn test_plan_does_not_mutate() {
        let client = MemoryClient::new("project");
        client.insert_json(json!({"name": "billing", "notes": "old"}));
        let decision = ConvergenceEngine::new()
            .plan(&client, &billing(), &ResourceSpec::new().with("notes", "new"), Presence::Present)
            .unwrap();
        assert!(matches!(decision, Decision::Update { ref diff, .. } if diff.len() == 1));
        assert!(client.mutating_calls().is_empty());
    }

    #[test]
    fn test_update_only_reports_missing() {
        let client = MemoryClient::new("host");
        let record = ConvergenceEngine::new().ensure_existing(
            &client,
            &ResourceSelector::by_name("host", "web1"),
            &ResourceSpec::new().with("status", 0),
        );
        assert_eq!(record.succeeded, Some(false));
        assert_eq!(record.message, "host name=web1 was not found");
        assert!(client.mutating_calls().is_empty());
    }

    #[test]
    fn test_failed_create_is_not_changed() {
        let client = MemoryClient::new("project");
        client.reject_mutations("name is required");
        let record = ConvergenceEngine::new().ensure_present(&client, &billing(), &ResourceSpec::new());
        assert!(!record.changed);
        assert_eq!(record.succeeded, Some(false));
        assert!(record.message.contains("name is required"));
    }

    #[test]
    fn test_dry_run_engine_downgrades_mutating_decisions() {
        let client = MemoryClient::new("project");
        let record = ConvergenceEngine::dry_run().execute(
            &client,
            &billing(),
            &Reporter::for_selector(&billing()),
            Decision::Create(ResourceSpec::new()),
        );
        assert_eq!(record.succeeded, None);
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_decision_debug_lists_field_names_only() {
        let spec = ResourceSpec::new().with("username", "john").with("password", "s3cret");
        let text = format!("{:?}", Decision::DryRunCreate(spec));
        assert_eq!(text, "DryRunCreate([username, password])");
    }

    #[test]
    fn test_create_checks_run_before_dry_run() {
        struct NeedsOwner(MemoryClient);

        impl RemoteClient for NeedsOwner {
            fn kind(&self) -> &str {
                self.0.kind()
            }
            fn validate_create(&self, spec: &ResourceSpec) -> Result<()> {
                if spec.contains("owner") {
                    Ok(())
                } else {
                    Err(Error::validation("a new project needs an owner"))
                }
            }
            fn find(&self, selector: &ResourceSelector) -> Result<Vec<Resource>> {
                self.0.find(selector)
            }
            fn read(&self, id: &ResourceId) -> Result<Resource> {
                self.0.read(id)
            }
            fn create(&self, spec: &ResourceSpec) -> Result<ResourceId> {
                self.0.create(spec)
            }
            fn update(&self, id: &ResourceId, changes: &FieldDiff) -> Result<()> {
                self.0.update(id, changes)
            }
            fn delete(&self, id: &ResourceId) -> Result<()> {
                self.0.delete(id)
            }
        }

        let client = NeedsOwner(MemoryClient::new("project"));
        let record = ConvergenceEngine::dry_run().ensure_present(&client, &billing(), &ResourceSpec::new());
        assert_eq!(record.succeeded, Some(false));
        assert_eq!(record.message, "validation failed: a new project needs an owner");

        client.0.insert_json(json!({"name": "billing"}));
        let record = ConvergenceEngine::dry_run().ensure_present(&client, &billing(), &ResourceSpec::new());
        assert_eq!(record.succeeded, Some(true));
    }

    #[test]
    fn test_find_one() {
        let client = MemoryClient::new("project");
        assert!(matches!(find_one(&client, &billing()), Err(Error::NotFound { .. })));
        client.insert_json(json!({"name": "billing"}));
        assert!(find_one(&client, &billing()).is_ok());
        client.insert_json(json!({"name": "billing"}));
        assert!(matches!(
            find_one(&client, &billing()),
            Err(Error::AmbiguousSelector { matches: 2, .. })
        ));
    }
}
