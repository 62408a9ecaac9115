//! # Convergent - Desired-State Convergence for Remote APIs
//!
//! Convergent drives remote resources (password manager entries, monitoring
//! maintenance windows, CDN purges, firewall objects) and local XML files
//! toward a declared state. Every operation is idempotent: it reads current
//! state, compares it with the desired state and only then mutates.
//!
//! ## Core Concepts
//!
//! - **Resources**: remote objects addressed by a [`resource::ResourceSelector`]
//! - **Clients**: per-kind adapters implementing [`client::RemoteClient`]
//! - **Engine**: the [`engine::ConvergenceEngine`] deciding create, update or delete
//! - **Outcomes**: uniform [`outcome::OutcomeRecord`] results for every operation
//! - **States**: YAML declarations dispatched through [`states::StateRegistry`]
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      CLI Interface                        │
//! │               (clap-based command parsing)                │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                     State Registry                        │
//! │          (declarations -> handlers, rayon fan-out)        │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                   Convergence Engine                      │
//! │        (read, diff, decide, mutate, report outcome)       │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!          ┌──────────────┬────┴─────────┬──────────────┐
//!          ▼              ▼              ▼              ▼
//!     ┌─────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//!     │TeamPass │   │  Zabbix  │   │ Akamai / │   │ XML file │
//!     │ clients │   │ clients  │   │ Cedexis  │   │  client  │
//!     └─────────┘   └──────────┘   └──────────┘   └──────────┘
//!          │              │              │
//!          └──────────────┴──────┬───────┘
//!                                ▼
//!                 ┌─────────────────────────────┐
//!                 │  Transport (reqwest / mock) │
//!                 └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use convergent::prelude::*;
//! use convergent::client::MemoryClient;
//!
//! let client = MemoryClient::new("project");
//! let engine = ConvergenceEngine::new();
//! let selector = ResourceSelector::by_name("project", "billing");
//! let record = engine.ensure_present(&client, &selector, &ResourceSpec::new());
//! assert!(record.changed);
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::client::RemoteClient;
    pub use crate::engine::{ConvergenceEngine, Decision, TargetedAction, Trigger};
    pub use crate::error::{Error, Result};
    pub use crate::outcome::{OutcomeRecord, OutcomeStatus, OutcomeSummary};
    pub use crate::resource::{FieldMap, Resource, ResourceId, ResourceSelector, ResourceSpec};
    pub use crate::states::{Ensure, StateContext, StateHandler, StateRegistry};
    pub use crate::transport::{ApiRequest, ApiResponse, Transport};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
pub mod error;

/// Resource identity, desired specs and selectors.
pub mod resource;

/// Field-level comparison of current and desired state.
pub mod diff;

/// Uniform operation results and run summaries.
pub mod outcome;

/// Permission levels and their validation.
pub mod permission;

/// Name to identifier resolution for referenced entities.
pub mod resolve;

// ============================================================================
// Convergence
// ============================================================================

/// The remote client seam and an in-memory implementation.
pub mod client;

/// The convergence engine and batch/trigger operations.
pub mod engine;

/// HTTP transport, request signing and a scripted mock.
pub mod transport;

/// Clients for the supported remote systems and file formats.
pub mod integrations;

// ============================================================================
// Declarations and Ambient Concerns
// ============================================================================

/// State file parsing and the handler registry.
pub mod states;

/// Configuration loading.
pub mod config;

/// Tracing subscriber setup.
pub mod logging;

pub use error::{Error, Result};

/// Returns the current version of Convergent.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
