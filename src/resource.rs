//! Resource data model: desired specs, selectors and remote snapshots.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Ordered mapping of field name to JSON value.
pub type FieldMap = IndexMap<String, Value>;

/// Opaque identifier assigned by the remote system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build an id from a JSON value; vendors return ids as numbers or strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// The id as a JSON value, numeric when it parses as an integer.
    pub fn to_value(&self) -> Value {
        self.0
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(self.0.clone()))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for ResourceId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// Desired field values for one resource instance.
///
/// Only the fields present are applied; omitting a field never means "set it
/// to empty".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceSpec {
    fields: FieldMap,
}

impl ResourceSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.shift_remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Split off the fields matching `predicate` into a new spec.
    pub fn partition(&self, predicate: impl Fn(&str) -> bool) -> (ResourceSpec, ResourceSpec) {
        let mut matched = ResourceSpec::new();
        let mut rest = ResourceSpec::new();
        for (field, value) in &self.fields {
            if predicate(field) {
                matched.insert(field.clone(), value.clone());
            } else {
                rest.insert(field.clone(), value.clone());
            }
        }
        (matched, rest)
    }

    /// Render as a JSON object, e.g. for a request body.
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone().into_iter().collect())
    }
}

impl From<FieldMap> for ResourceSpec {
    fn from(fields: FieldMap) -> Self {
        Self { fields }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ResourceSpec {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A read-only snapshot of a remote resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub fields: FieldMap,
}

impl Resource {
    pub fn new(id: impl Into<ResourceId>, fields: FieldMap) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a snapshot from a JSON object, reading the id from `id_field`.
    pub fn from_json(value: &Value, id_field: &str) -> Option<Self> {
        let object = value.as_object()?;
        let id = object.get(id_field).and_then(ResourceId::from_value)?;
        Some(Self {
            id,
            fields: object.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    /// Look up a field; dotted paths descend into nested objects
    /// (`project.name`). A literal key containing dots wins over descent.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.fields.get(path) {
            return Some(value);
        }
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Snapshot of the named fields, `null` where absent.
    pub fn snapshot<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> FieldMap {
        fields
            .into_iter()
            .map(|f| (f.to_string(), self.get(f).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}

/// Key fields identifying at most one resource of a kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSelector {
    kind: String,
    keys: FieldMap,
}

impl ResourceSelector {
    /// An empty selector; add keys with [`key`](Self::key).
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            keys: FieldMap::new(),
        }
    }

    /// Selector keyed on `name`.
    pub fn by_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(kind).key("name", Value::String(name.into()))
    }

    /// Add a key field. Dotted fields address nested values of the
    /// fetched resource, e.g. `project.name` to scope a password.
    pub fn key(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keys.insert(field.into(), value.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn keys(&self) -> &FieldMap {
        &self.keys
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.keys.get(field)
    }

    /// Key value rendered as text (strings without quotes).
    pub fn get_text(&self, field: &str) -> Option<String> {
        self.keys.get(field).map(value_text)
    }

    /// The first key; search endpoints are queried with it.
    pub fn primary(&self) -> Option<(&str, &Value)> {
        self.keys.first().map(|(k, v)| (k.as_str(), v))
    }

    /// Primary key value as a search term.
    pub fn search_term(&self) -> String {
        self.primary().map(|(_, v)| value_text(v)).unwrap_or_default()
    }

    /// Human-readable name used in outcome records.
    pub fn display_name(&self) -> String {
        self.search_term()
    }

    /// Exact equality on every key field.
    pub fn matches(&self, resource: &Resource) -> bool {
        self.keys
            .iter()
            .all(|(field, expected)| resource.get(field).is_some_and(|v| values_match(v, expected)))
    }

    /// Flat (non-dotted) key fields, merged into specs on create.
    pub fn flat_keys(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.keys.iter().filter(|(k, _)| !k.contains('.'))
    }
}

impl fmt::Display for ResourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for (field, value) in &self.keys {
            write!(f, " {}={}", field, value_text(value))?;
        }
        Ok(())
    }
}

/// Render a JSON value as plain text (strings unquoted).
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Selector key comparison: strict JSON equality, except that a numeric key
/// matches the same number returned as a string and vice versa. Vendors are
/// inconsistent about id types; names stay case- and whitespace-sensitive.
fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
        }
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(value: Value) -> Resource {
        Resource::from_json(&value, "id").unwrap()
    }

    #[test]
    fn test_selector_exact_match() {
        let selector = ResourceSelector::by_name("project", "foo");
        assert!(selector.matches(&resource(json!({"id": 1, "name": "foo"}))));
        assert!(!selector.matches(&resource(json!({"id": 2, "name": "foo-bar"}))));
        assert!(!selector.matches(&resource(json!({"id": 3, "name": "Foo"}))));
        assert!(!selector.matches(&resource(json!({"id": 4}))));
    }

    #[test]
    fn test_selector_dotted_scope() {
        let selector = ResourceSelector::by_name("password", "db").key("project.name", "infra");
        let hit = resource(json!({"id": 1, "name": "db", "project": {"id": 7, "name": "infra"}}));
        let other_project =
            resource(json!({"id": 2, "name": "db", "project": {"id": 8, "name": "web"}}));
        assert!(selector.matches(&hit));
        assert!(!selector.matches(&other_project));
        assert_eq!(selector.flat_keys().count(), 1);
        assert_eq!(selector.to_string(), "password name=db project.name=infra");
    }

    #[test]
    fn test_numeric_keys_match_string_ids() {
        let selector = ResourceSelector::new("host").key("hostid", 10084);
        assert!(selector.matches(&resource(json!({"id": "1", "hostid": "10084"}))));
    }

    #[test]
    fn test_resource_id_from_value() {
        assert_eq!(ResourceId::from_value(&json!(42)), Some(ResourceId::from("42")));
        assert_eq!(ResourceId::from_value(&json!("abc")), Some(ResourceId::from("abc")));
        assert_eq!(ResourceId::from_value(&json!("")), None);
        assert_eq!(ResourceId::from("42").to_value(), json!(42));
        assert_eq!(ResourceId::from("a-1").to_value(), json!("a-1"));
    }

    #[test]
    fn test_snapshot_fills_missing_with_null() {
        let r = resource(json!({"id": 1, "name": "p", "notes": "y"}));
        let snap = r.snapshot(["notes", "tags"]);
        assert_eq!(snap.get("notes"), Some(&json!("y")));
        assert_eq!(snap.get("tags"), Some(&Value::Null));
    }

    #[test]
    fn test_spec_partition() {
        let spec = ResourceSpec::new()
            .with("notes", "x")
            .with("archived", true)
            .with("tags", "a,b");
        let (state, content) = spec.partition(|f| f == "archived");
        assert_eq!(state.len(), 1);
        assert_eq!(content.field_names().collect::<Vec<_>>(), vec!["notes", "tags"]);
    }
}
