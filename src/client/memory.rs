//! In-memory client.
//!
//! A stateful fake of a remote system. Used to exercise the engine without a
//! network, and as a scratch backend for dry runs of state files.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::RemoteClient;
use crate::diff::FieldDiff;
use crate::error::{Error, Result};
use crate::resource::{value_text, FieldMap, Resource, ResourceId, ResourceSelector, ResourceSpec};

/// Pre-check hook installed with [`MemoryClient::with_prepare`].
pub type PrepareHook =
    Box<dyn Fn(&ResourceSelector, &ResourceSpec) -> Result<ResourceSpec> + Send + Sync>;

/// One recorded client call.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    Prepare,
    Find(String),
    Read(ResourceId),
    Create(ResourceSpec),
    Update(ResourceId, ResourceSpec),
    Delete(ResourceId),
}

impl ClientCall {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ClientCall::Create(_) | ClientCall::Update(..) | ClientCall::Delete(_)
        )
    }
}

/// How `find` matches the search term against stored resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Substring on the primary key, like most vendor search endpoints
    #[default]
    Substring,
    Exact,
}

pub struct MemoryClient {
    kind: String,
    search: SearchMode,
    resources: RwLock<Vec<Resource>>,
    calls: Mutex<Vec<ClientCall>>,
    next_id: AtomicU64,
    fail_mutations: Mutex<Option<String>>,
    unreachable: AtomicBool,
    prepare_hook: Option<PrepareHook>,
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient")
            .field("kind", &self.kind)
            .field("resources", &self.resources.read().len())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl MemoryClient {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            search: SearchMode::default(),
            resources: RwLock::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            fail_mutations: Mutex::new(None),
            unreachable: AtomicBool::new(false),
            prepare_hook: None,
        }
    }

    pub fn with_search_mode(mut self, mode: SearchMode) -> Self {
        self.search = mode;
        self
    }

    pub fn with_prepare(mut self, hook: PrepareHook) -> Self {
        self.prepare_hook = Some(hook);
        self
    }

    /// Seed a resource; returns its id.
    pub fn insert(&self, fields: FieldMap) -> ResourceId {
        let id = self.allocate_id();
        self.resources.write().push(Resource::new(id.clone(), fields));
        id
    }

    /// Seed a resource from a JSON object.
    pub fn insert_json(&self, value: Value) -> ResourceId {
        let fields = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => FieldMap::new(),
        };
        self.insert(fields)
    }

    /// Make every mutating call fail with `RemoteRejected(details)`.
    pub fn reject_mutations(&self, details: impl Into<String>) {
        *self.fail_mutations.lock() = Some(details.into());
    }

    /// Make every call fail with `ConnectionFailure`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().clone()
    }

    pub fn mutating_calls(&self) -> Vec<ClientCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.resources.read().clone()
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }

    fn allocate_id(&self) -> ResourceId {
        ResourceId::from(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, call: ClientCall) -> Result<()> {
        self.calls.lock().push(call);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::connection(format!("{} backend unreachable", self.kind)));
        }
        Ok(())
    }

    fn check_mutation(&self) -> Result<()> {
        match self.fail_mutations.lock().as_ref() {
            Some(details) => Err(Error::rejected(Some(400), details.clone())),
            None => Ok(()),
        }
    }
}

impl RemoteClient for MemoryClient {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn prepare(&self, selector: &ResourceSelector, desired: &ResourceSpec) -> Result<ResourceSpec> {
        match &self.prepare_hook {
            Some(hook) => {
                self.calls.lock().push(ClientCall::Prepare);
                hook(selector, desired)
            }
            None => Ok(desired.clone()),
        }
    }

    fn find(&self, selector: &ResourceSelector) -> Result<Vec<Resource>> {
        let term = selector.search_term();
        self.record(ClientCall::Find(term.clone()))?;
        let Some((field, _)) = selector.primary() else {
            return Ok(self.resources());
        };
        Ok(self
            .resources
            .read()
            .iter()
            .filter(|r| {
                r.get(field).map(value_text).is_some_and(|v| match self.search {
                    SearchMode::Substring => v.contains(&term),
                    SearchMode::Exact => v == term,
                })
            })
            .cloned()
            .collect())
    }

    fn read(&self, id: &ResourceId) -> Result<Resource> {
        self.record(ClientCall::Read(id.clone()))?;
        self.resources
            .read()
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(self.kind.clone(), id.to_string()))
    }

    fn create(&self, spec: &ResourceSpec) -> Result<ResourceId> {
        self.record(ClientCall::Create(spec.clone()))?;
        self.check_mutation()?;
        Ok(self.insert(spec.fields().clone()))
    }

    fn update(&self, id: &ResourceId, changes: &FieldDiff) -> Result<()> {
        self.record(ClientCall::Update(id.clone(), changes.to_spec()))?;
        self.check_mutation()?;
        let mut resources = self.resources.write();
        let resource = resources
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| Error::not_found(self.kind.clone(), id.to_string()))?;
        for change in changes.changes() {
            resource
                .fields
                .insert(change.field.clone(), change.after.clone());
        }
        Ok(())
    }

    fn delete(&self, id: &ResourceId) -> Result<()> {
        self.record(ClientCall::Delete(id.clone()))?;
        self.check_mutation()?;
        let mut resources = self.resources.write();
        let before = resources.len();
        resources.retain(|r| &r.id != id);
        if resources.len() == before {
            return Err(Error::not_found(self.kind.clone(), id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_substring_search_returns_superset() {
        let client = MemoryClient::new("project");
        client.insert_json(json!({"name": "foo-bar"}));
        client.insert_json(json!({"name": "foo"}));
        let found = client.find(&ResourceSelector::by_name("project", "foo")).unwrap();
        assert_eq!(found.len(), 2);

        let exact = MemoryClient::new("project").with_search_mode(SearchMode::Exact);
        exact.insert_json(json!({"name": "foo-bar"}));
        assert!(exact.find(&ResourceSelector::by_name("project", "foo")).unwrap().is_empty());
    }

    #[test]
    fn test_unreachable_fails_every_call() {
        let client = MemoryClient::new("project");
        client.set_unreachable(true);
        let err = client.find(&ResourceSelector::by_name("project", "x")).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_mutations_are_logged() {
        let client = MemoryClient::new("project");
        let id = client.create(&ResourceSpec::new().with("name", "a")).unwrap();
        client.delete(&id).unwrap();
        assert_eq!(client.mutating_calls().len(), 2);
        assert!(client.is_empty());
        assert!(matches!(client.read(&id), Err(Error::NotFound { .. })));
    }
}
