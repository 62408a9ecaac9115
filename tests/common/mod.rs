//! Shared test utilities for the convergent integration tests.
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use convergent::client::MemoryClient;
use convergent::config::{Config, TeampassConfig, ZabbixConfig};
use convergent::engine::ConvergenceEngine;
use convergent::integrations::cdn::{CedexisSettings, EdgeGridCredentials};
use convergent::outcome::{OutcomeRecord, OutcomeStatus};
use convergent::states::{StateContext, StateFile, StateRegistry};
use convergent::transport::{ApiRequest, MockTransport};

pub const TPM_URL: &str = "https://tpm.example.com";
pub const ZABBIX_URL: &str = "https://zabbix.example.com/api_jsonrpc.php";

// ============================================================================
// Configuration
// ============================================================================

/// Config with every remote section pointing at example hosts.
pub fn test_config() -> Config {
    Config {
        teampass: Some(TeampassConfig {
            base_url: TPM_URL.to_string(),
            username: Some("svc-convergent".to_string()),
            password: Some("hunter2".to_string()),
            ..Default::default()
        }),
        zabbix: Some(ZabbixConfig {
            url: ZABBIX_URL.to_string(),
            user: "Admin".to_string(),
            password: "zabbix".to_string(),
        }),
        akamai: Some(EdgeGridCredentials {
            host: "akab-test.luna.akamaiapis.net".to_string(),
            client_token: "akab-client".to_string(),
            client_secret: "c2VjcmV0".to_string(),
            access_token: "akab-access".to_string(),
        }),
        cedexis: Some(CedexisSettings::new("fusion-client", "s3cret")),
        ..Default::default()
    }
}

/// A state context over a scripted transport.
pub fn state_context(mock: &Arc<MockTransport>, dry_run: bool) -> StateContext {
    StateContext::new(
        ConvergenceEngine::new().with_dry_run(dry_run),
        mock.clone(),
        test_config(),
    )
}

/// Parse a state file and run it through the builtin registry.
pub fn run_states(yaml: &str, ctx: &StateContext) -> Vec<OutcomeRecord> {
    let file = StateFile::from_yaml(yaml).expect("state file should parse");
    StateRegistry::with_builtins().run_all(&file, ctx, false)
}

// ============================================================================
// Fixtures
// ============================================================================

/// Write `contents` to `name` inside a fresh temp dir.
pub fn temp_file(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write fixture");
    (dir, path)
}

/// A memory backend seeded with named projects.
pub fn seeded_projects(names: &[&str]) -> MemoryClient {
    let client = MemoryClient::new("project");
    for name in names {
        client.insert_json(json!({"name": name, "notes": ""}));
    }
    client
}

/// Method names of the JSON-RPC calls sent through `mock`.
pub fn rpc_methods(mock: &MockTransport) -> Vec<String> {
    mock.requests()
        .iter()
        .filter_map(ApiRequest::json_body)
        .filter_map(|body| body.get("method").and_then(Value::as_str).map(str::to_string))
        .collect()
}

// ============================================================================
// Assertions
// ============================================================================

pub fn assert_status(record: &OutcomeRecord, status: OutcomeStatus) {
    assert_eq!(
        record.status(),
        status,
        "unexpected status for '{}': {}",
        record.name,
        record.message
    );
}

pub fn assert_changed(record: &OutcomeRecord) {
    assert_status(record, OutcomeStatus::Changed);
}

pub fn assert_unchanged(record: &OutcomeRecord) {
    assert_status(record, OutcomeStatus::Unchanged);
}

pub fn assert_failed(record: &OutcomeRecord, fragment: &str) {
    assert_status(record, OutcomeStatus::Failed);
    assert!(
        record.message.contains(fragment),
        "expected '{}' in failure message: {}",
        fragment,
        record.message
    );
}
