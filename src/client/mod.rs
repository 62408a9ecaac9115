//! Remote resource clients.
//!
//! A [`RemoteClient`] is the imperative half of an integration: it knows how
//! to search, read and mutate one kind of resource on one remote system. The
//! [`ConvergenceEngine`](crate::engine::ConvergenceEngine) supplies the
//! idempotent half on top of it.

pub mod memory;

pub use memory::{ClientCall, MemoryClient};

use crate::diff::FieldDiff;
use crate::error::Result;
use crate::resource::{Resource, ResourceId, ResourceSelector, ResourceSpec};

/// Imperative access to one kind of remote resource.
///
/// "Resource absent" is `Ok(vec![])` from [`find`](Self::find), never an
/// error; an unreachable system is `Err(ConnectionFailure)`.
pub trait RemoteClient: Send + Sync {
    /// Resource kind, used in messages and logs.
    fn kind(&self) -> &str;

    /// Pre-checks and name resolution before anything else happens.
    ///
    /// Runs validation locally and may issue read calls to turn names into
    /// ids. Returns the spec the rest of the call works with. An error here
    /// stops the call before `find`.
    fn prepare(&self, _selector: &ResourceSelector, desired: &ResourceSpec) -> Result<ResourceSpec> {
        Ok(desired.clone())
    }

    /// Checks that only apply to a new resource, such as required initial
    /// credentials. Runs before the dry-run split, so a preview never
    /// promises a create that would be refused.
    fn validate_create(&self, _spec: &ResourceSpec) -> Result<()> {
        Ok(())
    }

    /// Fields that are sent on create but never compared, such as an
    /// initial password the remote system will not return.
    fn create_only_fields(&self) -> &[&str] {
        &[]
    }

    /// Fields whose values never appear in records or logs.
    fn sensitive_fields(&self) -> &[&str] {
        &[]
    }

    /// Candidates for the selector. May return a superset; exact filtering
    /// happens in the engine.
    fn find(&self, selector: &ResourceSelector) -> Result<Vec<Resource>>;

    /// Fetch one resource by id; `NotFound` if it vanished.
    fn read(&self, id: &ResourceId) -> Result<Resource>;

    /// Create a resource and return its id.
    fn create(&self, spec: &ResourceSpec) -> Result<ResourceId>;

    /// Apply the changed fields only.
    fn update(&self, id: &ResourceId, changes: &FieldDiff) -> Result<()>;

    fn delete(&self, id: &ResourceId) -> Result<()>;
}
