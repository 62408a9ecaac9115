//! Actions without a field diff.
//!
//! Some operations cannot be compared against current state: a CDN purge has
//! no remote snapshot, and a security update replaces the whole permission
//! set. They still follow the engine's rules: validation runs first, dry-run
//! stops before the remote mutation, and at most one mutation is issued.

use tracing::{info, instrument, warn};

use super::{find_one, ConvergenceEngine};
use crate::client::RemoteClient;
use crate::error::Result;
use crate::outcome::{OutcomeRecord, Reporter};
use crate::resource::{FieldMap, Resource, ResourceSelector};

/// An untargeted action such as a purge request.
pub trait Trigger {
    type Payload;

    /// Kind used in messages (`akamai purge`).
    fn kind(&self) -> &str;

    /// Record name.
    fn name(&self) -> String;

    /// Validate inputs and build the payload. No remote mutation.
    fn prepare(&self) -> Result<Self::Payload>;

    /// What a dry run reports.
    fn preview(&self, payload: &Self::Payload) -> FieldMap;

    /// Perform the action; returns details for the record.
    fn fire(&self, payload: Self::Payload) -> Result<FieldMap>;
}

/// An action on one existing resource, such as replacing its security.
pub trait TargetedAction {
    type Payload;

    fn kind(&self) -> &str;

    /// Selector of the resource acted upon.
    fn target(&self) -> &ResourceSelector;

    /// Validate and resolve names. Read calls only.
    fn prepare(&self) -> Result<Self::Payload>;

    fn preview(&self, payload: &Self::Payload) -> FieldMap;

    fn apply(&self, target: &Resource, payload: Self::Payload) -> Result<FieldMap>;
}

impl ConvergenceEngine {
    #[instrument(skip_all, fields(kind = trigger.kind(), dry_run = self.is_dry_run()))]
    pub fn trigger<T: Trigger>(&self, trigger: &T) -> OutcomeRecord {
        let name = trigger.name();
        let reporter = Reporter::new(trigger.kind(), &name);
        let payload = match trigger.prepare() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "validation failed");
                return reporter.failed(&e);
            }
        };
        if self.is_dry_run() {
            let preview = trigger.preview(&payload);
            return reporter.would_fire(format!("{} '{}' would be submitted", trigger.kind(), name), preview);
        }
        match trigger.fire(payload) {
            Ok(details) => {
                info!(name = %name, "submitted");
                reporter.fired(format!("{} '{}' submitted", trigger.kind(), name), details)
            }
            Err(e) => reporter.failed(&e),
        }
    }

    /// Look up the action's target through `client`, then apply the action.
    #[instrument(skip_all, fields(kind = action.kind(), target = %action.target(), dry_run = self.is_dry_run()))]
    pub fn apply_to<A: TargetedAction>(&self, client: &dyn RemoteClient, action: &A) -> OutcomeRecord {
        let selector = action.target();
        let reporter = Reporter::new(action.kind(), selector.display_name());
        let label = format!("{} of {} '{}'", action.kind(), selector.kind(), selector.display_name());

        let result = action
            .prepare()
            .and_then(|payload| find_one(client, selector).map(|target| (target, payload)));
        let (target, payload) = match result {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "precondition failed");
                return reporter.failed(&e);
            }
        };

        if self.is_dry_run() {
            return reporter.would_fire(format!("{} would be updated", label), action.preview(&payload));
        }
        match action.apply(&target, payload) {
            Ok(details) => {
                info!(id = %target.id, "applied");
                reporter.fired(format!("{} updated", label), details)
            }
            Err(e) => reporter.failed(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::error::Error;
    use serde_json::{json, Value};
    use std::cell::Cell;

    struct Purge {
        urls: Vec<String>,
        fired: Cell<usize>,
    }

    impl Trigger for Purge {
        type Payload = Vec<String>;

        fn kind(&self) -> &str {
            "purge"
        }

        fn name(&self) -> String {
            "edge".to_string()
        }

        fn prepare(&self) -> Result<Vec<String>> {
            if self.urls.is_empty() {
                return Err(Error::validation("no URLs to purge"));
            }
            Ok(self.urls.clone())
        }

        fn preview(&self, payload: &Vec<String>) -> FieldMap {
            let mut map = FieldMap::new();
            map.insert("objects".into(), json!(payload));
            map
        }

        fn fire(&self, payload: Vec<String>) -> Result<FieldMap> {
            self.fired.set(self.fired.get() + 1);
            Ok(self.preview(&payload))
        }
    }

    fn purge(urls: &[&str]) -> Purge {
        Purge {
            urls: urls.iter().map(|s| s.to_string()).collect(),
            fired: Cell::new(0),
        }
    }

    #[test]
    fn test_trigger_fires_once() {
        let p = purge(&["https://a/x"]);
        let record = ConvergenceEngine::new().trigger(&p);
        assert!(record.changed);
        assert_eq!(p.fired.get(), 1);
        assert_eq!(record.after.get("objects"), Some(&json!(["https://a/x"])));
    }

    #[test]
    fn test_trigger_dry_run_and_validation() {
        let p = purge(&["https://a/x"]);
        let record = ConvergenceEngine::dry_run().trigger(&p);
        assert_eq!(record.succeeded, None);
        assert_eq!(p.fired.get(), 0);

        let empty = purge(&[]);
        let record = ConvergenceEngine::new().trigger(&empty);
        assert_eq!(record.succeeded, Some(false));
        assert_eq!(empty.fired.get(), 0);
    }

    struct Tag {
        target: ResourceSelector,
    }

    impl TargetedAction for Tag {
        type Payload = Value;

        fn kind(&self) -> &str {
            "tagging"
        }

        fn target(&self) -> &ResourceSelector {
            &self.target
        }

        fn prepare(&self) -> Result<Value> {
            Ok(json!("t1"))
        }

        fn preview(&self, payload: &Value) -> FieldMap {
            let mut map = FieldMap::new();
            map.insert("tag".into(), payload.clone());
            map
        }

        fn apply(&self, target: &Resource, payload: Value) -> Result<FieldMap> {
            let mut map = self.preview(&payload);
            map.insert("id".into(), target.id.to_value());
            Ok(map)
        }
    }

    #[test]
    fn test_targeted_action_requires_target() {
        let client = MemoryClient::new("project");
        let action = Tag {
            target: ResourceSelector::by_name("project", "infra"),
        };
        let record = ConvergenceEngine::new().apply_to(&client, &action);
        assert_eq!(record.message, "project 'infra' does not exist");

        client.insert_json(json!({"name": "infra"}));
        let record = ConvergenceEngine::new().apply_to(&client, &action);
        assert!(record.changed);
        assert_eq!(record.message, "tagging of project 'infra' updated");
    }
}
