//! Outcome records: the uniform tri-state result of every convergence call.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::diff::FieldDiff;
use crate::error::Error;
use crate::resource::{FieldMap, ResourceId, ResourceSelector, ResourceSpec};

/// Message used when nothing needs to change.
pub const NO_OP_MESSAGE: &str = "already in desired state";

/// Stands in for the value of a sensitive field in records.
pub const REDACTED: &str = "********";

/// Result of one convergence call.
///
/// `succeeded` is `None` for dry-run: the action was computed but not
/// performed, so neither success nor failure is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub name: String,
    pub changed: bool,
    pub succeeded: Option<bool>,
    pub message: String,
    #[serde(default)]
    pub before: FieldMap,
    #[serde(default)]
    pub after: FieldMap,
}

/// Coarse status derived from an [`OutcomeRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// A mutation was performed
    Changed,
    /// Nothing needed to change
    Unchanged,
    /// Dry-run; the change was only previewed
    Pending,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Changed => write!(f, "changed"),
            OutcomeStatus::Unchanged => write!(f, "ok"),
            OutcomeStatus::Pending => write!(f, "pending"),
            OutcomeStatus::Failed => write!(f, "failed"),
        }
    }
}

impl OutcomeRecord {
    /// A successful record that changed nothing.
    pub fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            changed: false,
            succeeded: Some(true),
            message: message.into(),
            before: FieldMap::new(),
            after: FieldMap::new(),
        }
    }

    /// A successful record that performed a mutation.
    pub fn changed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            changed: true,
            ..Self::ok(name, message)
        }
    }

    /// A dry-run preview of a mutation.
    pub fn pending(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            succeeded: None,
            ..Self::ok(name, message)
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            succeeded: Some(false),
            ..Self::ok(name, message)
        }
    }

    pub fn with_before(mut self, before: FieldMap) -> Self {
        self.before = before;
        self
    }

    pub fn with_after(mut self, after: FieldMap) -> Self {
        self.after = after;
        self
    }

    pub fn status(&self) -> OutcomeStatus {
        match self.succeeded {
            None => OutcomeStatus::Pending,
            Some(false) => OutcomeStatus::Failed,
            Some(true) if self.changed => OutcomeStatus::Changed,
            Some(true) => OutcomeStatus::Unchanged,
        }
    }

    /// Render in the `{name, result, comment, changes: {old, new}}` shape
    /// configuration-management hosts expect from a state function.
    pub fn to_state_return(&self) -> Value {
        let changes = if self.before.is_empty() && self.after.is_empty() {
            json!({})
        } else {
            json!({ "old": self.before, "new": self.after })
        };
        json!({
            "name": self.name,
            "result": self.succeeded,
            "comment": self.message,
            "changes": changes,
        })
    }
}

/// Counters over a run of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub ok: usize,
    pub changed: usize,
    pub pending: usize,
    pub failed: usize,
}

impl OutcomeSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a OutcomeRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.add(record);
        }
        summary
    }

    pub fn add(&mut self, record: &OutcomeRecord) {
        match record.status() {
            OutcomeStatus::Unchanged => self.ok += 1,
            OutcomeStatus::Changed => self.changed += 1,
            OutcomeStatus::Pending => self.pending += 1,
            OutcomeStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.ok + self.changed + self.pending + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Builds the records for each engine decision so wording stays uniform
/// across integrations.
#[derive(Debug, Clone)]
pub struct Reporter {
    kind: String,
    name: String,
    sensitive: Vec<String>,
}

impl Reporter {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            sensitive: Vec::new(),
        }
    }

    /// Values of these fields are replaced by [`REDACTED`] in `before` and
    /// `after`.
    pub fn with_sensitive(mut self, fields: &[&str]) -> Self {
        self.sensitive.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn for_selector(selector: &ResourceSelector) -> Self {
        Self::new(selector.kind(), selector.display_name())
    }

    fn redact(&self, mut fields: FieldMap) -> FieldMap {
        for (field, value) in fields.iter_mut() {
            if self.sensitive.iter().any(|s| s == field) {
                *value = json!(REDACTED);
            }
        }
        fields
    }

    fn label(&self) -> String {
        format!("{} '{}'", self.kind, self.name)
    }

    pub fn created(&self, id: &ResourceId, spec: &ResourceSpec) -> OutcomeRecord {
        let mut after = self.redact(spec.fields().clone());
        after.insert("id".to_string(), id.to_value());
        OutcomeRecord::changed(&self.name, format!("{} created", self.label())).with_after(after)
    }

    pub fn would_create(&self, spec: &ResourceSpec) -> OutcomeRecord {
        OutcomeRecord::pending(&self.name, format!("{} would be created", self.label()))
            .with_after(self.redact(spec.fields().clone()))
    }

    pub fn updated(&self, diff: &FieldDiff) -> OutcomeRecord {
        OutcomeRecord::changed(
            &self.name,
            format!("{} updated ({})", self.label(), join_fields(diff)),
        )
        .with_before(self.redact(diff.before_map()))
        .with_after(self.redact(diff.after_map()))
    }

    pub fn would_update(&self, diff: &FieldDiff) -> OutcomeRecord {
        OutcomeRecord::pending(
            &self.name,
            format!("{} would be updated ({})", self.label(), join_fields(diff)),
        )
        .with_before(self.redact(diff.before_map()))
        .with_after(self.redact(diff.after_map()))
    }

    pub fn no_op(&self) -> OutcomeRecord {
        OutcomeRecord::ok(&self.name, format!("{} {}", self.label(), NO_OP_MESSAGE))
    }

    pub fn deleted(&self, id: &ResourceId) -> OutcomeRecord {
        OutcomeRecord::changed(&self.name, format!("{} deleted", self.label()))
            .with_before(id_map(id))
    }

    pub fn would_delete(&self, id: &ResourceId) -> OutcomeRecord {
        OutcomeRecord::pending(&self.name, format!("{} would be deleted", self.label()))
            .with_before(id_map(id))
    }

    pub fn already_absent(&self) -> OutcomeRecord {
        OutcomeRecord::ok(&self.name, format!("{} is already absent", self.label()))
    }

    pub fn missing(&self, selector: &ResourceSelector) -> OutcomeRecord {
        OutcomeRecord::failed(&self.name, format!("{} was not found", selector))
    }

    pub fn ambiguous(&self, selector: &ResourceSelector, matches: usize) -> OutcomeRecord {
        self.failed(&Error::AmbiguousSelector {
            selector: selector.to_string(),
            matches,
        })
    }

    /// Record for an action that has no field diff (purges, security).
    pub fn fired(&self, message: impl Into<String>, details: FieldMap) -> OutcomeRecord {
        OutcomeRecord::changed(&self.name, message).with_after(details)
    }

    pub fn would_fire(&self, message: impl Into<String>, preview: FieldMap) -> OutcomeRecord {
        OutcomeRecord::pending(&self.name, message).with_after(preview)
    }

    /// Failure record carrying the error text verbatim.
    pub fn failed(&self, error: &Error) -> OutcomeRecord {
        OutcomeRecord::failed(&self.name, error.to_string())
    }
}

fn join_fields(diff: &FieldDiff) -> String {
    diff.fields().collect::<Vec<_>>().join(", ")
}

fn id_map(id: &ResourceId) -> FieldMap {
    let mut map = FieldMap::new();
    map.insert("id".to_string(), id.to_value());
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_mapping() {
        assert_eq!(OutcomeRecord::ok("a", "m").status(), OutcomeStatus::Unchanged);
        assert_eq!(OutcomeRecord::changed("a", "m").status(), OutcomeStatus::Changed);
        assert_eq!(OutcomeRecord::pending("a", "m").status(), OutcomeStatus::Pending);
        assert_eq!(OutcomeRecord::failed("a", "m").status(), OutcomeStatus::Failed);
    }

    #[test]
    fn test_state_return_shape() {
        let reporter = Reporter::new("project", "billing");
        let record = reporter.created(&ResourceId::from("12"), &ResourceSpec::new().with("notes", "x"));
        let ret = record.to_state_return();
        assert_eq!(ret["name"], json!("billing"));
        assert_eq!(ret["result"], json!(true));
        assert_eq!(ret["comment"], json!("project 'billing' created"));
        assert_eq!(ret["changes"]["new"], json!({"notes": "x", "id": 12}));

        let pending = reporter.would_create(&ResourceSpec::new()).to_state_return();
        assert_eq!(pending["result"], Value::Null);
        assert_eq!(pending["changes"], json!({}));
    }

    #[test]
    fn test_sensitive_fields_are_redacted() {
        let reporter = Reporter::new("user", "John").with_sensitive(&["password"]);
        let spec = ResourceSpec::new().with("username", "john").with("password", "s3cret");

        for record in [reporter.created(&ResourceId::from("9"), &spec), reporter.would_create(&spec)] {
            let text = record.to_state_return().to_string();
            assert!(!text.contains("s3cret"), "{}", text);
            assert_eq!(record.after.get("password"), Some(&json!(REDACTED)));
            assert_eq!(record.after.get("username"), Some(&json!("john")));
        }
    }

    #[test]
    fn test_no_op_message() {
        let record = Reporter::new("project", "billing").no_op();
        assert!(record.message.ends_with(NO_OP_MESSAGE));
        assert!(!record.changed);
        assert_eq!(record.succeeded, Some(true));
    }

    #[test]
    fn test_summary_counts() {
        let records = vec![
            OutcomeRecord::ok("a", ""),
            OutcomeRecord::changed("b", ""),
            OutcomeRecord::failed("c", ""),
            OutcomeRecord::failed("d", ""),
        ];
        let summary = OutcomeSummary::from_records(&records);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.total(), 4);
        assert!(summary.has_failures());
    }
}
