//! Field-level diff between a desired spec and a remote snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resource::{FieldMap, Resource, ResourceSpec};

/// One field whose desired value differs from the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    /// Current value; `None` when the remote resource lacks the field.
    pub before: Option<Value>,
    pub after: Value,
}

/// The set of changed fields, in spec order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    changes: Vec<FieldChange>,
}

impl FieldDiff {
    /// Compare every field of `desired` against `current`.
    ///
    /// Fields absent from `desired` are never part of the diff. Comparison is
    /// strict JSON equality: `"1"` differs from `1`.
    pub fn between(desired: &ResourceSpec, current: &Resource) -> Self {
        let changes = desired
            .iter()
            .filter_map(|(field, wanted)| {
                let have = current.get(field);
                if have == Some(wanted) {
                    None
                } else {
                    Some(FieldChange {
                        field: field.clone(),
                        before: have.cloned(),
                        after: wanted.clone(),
                    })
                }
            })
            .collect();
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.field.as_str())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.changes.iter().any(|c| c.field == field)
    }

    /// Previous values of the changed fields; missing ones become `null`.
    pub fn before_map(&self) -> FieldMap {
        self.changes
            .iter()
            .map(|c| (c.field.clone(), c.before.clone().unwrap_or(Value::Null)))
            .collect()
    }

    /// New values of the changed fields.
    pub fn after_map(&self) -> FieldMap {
        self.changes
            .iter()
            .map(|c| (c.field.clone(), c.after.clone()))
            .collect()
    }

    /// The changed fields as a spec, which is what `update` receives.
    pub fn to_spec(&self) -> ResourceSpec {
        ResourceSpec::from(self.after_map())
    }
}
