//! Parallel convergence of independent declarations.

use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

use super::{ConvergenceEngine, Presence};
use crate::client::RemoteClient;
use crate::outcome::OutcomeRecord;
use crate::resource::{ResourceSelector, ResourceSpec};

/// What to do with one selector.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    Converge(ResourceSpec, Presence),
    Absent,
}

/// One unit of batch work.
#[derive(Clone)]
pub struct BatchItem {
    pub client: Arc<dyn RemoteClient>,
    pub selector: ResourceSelector,
    pub operation: BatchOperation,
}

impl BatchItem {
    pub fn present(client: Arc<dyn RemoteClient>, selector: ResourceSelector, spec: ResourceSpec) -> Self {
        Self {
            client,
            selector,
            operation: BatchOperation::Converge(spec, Presence::Present),
        }
    }

    pub fn absent(client: Arc<dyn RemoteClient>, selector: ResourceSelector) -> Self {
        Self {
            client,
            selector,
            operation: BatchOperation::Absent,
        }
    }

    fn run(&self, engine: &ConvergenceEngine) -> OutcomeRecord {
        match &self.operation {
            BatchOperation::Converge(spec, presence) => {
                engine.converge(self.client.as_ref(), &self.selector, spec, *presence)
            }
            BatchOperation::Absent => engine.ensure_absent(self.client.as_ref(), &self.selector),
        }
    }
}

impl std::fmt::Debug for BatchItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchItem")
            .field("kind", &self.client.kind())
            .field("selector", &self.selector)
            .field("operation", &self.operation)
            .finish()
    }
}

/// Per-selector mutual exclusion.
///
/// Items sharing a selector run one after another; different selectors run
/// freely in parallel.
#[derive(Debug, Default)]
pub struct SelectorLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SelectorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `selector`, created on first use.
    pub fn lock_for(&self, selector: &ResourceSelector) -> Arc<Mutex<()>> {
        self.locks
            .entry(selector.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Converge every item on the rayon pool. Records come back in input order.
pub fn converge_batch(
    engine: &ConvergenceEngine,
    items: &[BatchItem],
    locks: Option<&SelectorLocks>,
) -> Vec<OutcomeRecord> {
    debug!(items = items.len(), locked = locks.is_some(), "converging batch");
    items
        .par_iter()
        .map(|item| match locks {
            Some(locks) => {
                let lock = locks.lock_for(&item.selector);
                let _guard = lock.lock();
                item.run(engine)
            }
            None => item.run(engine),
        })
        .collect()
}
