//! Convergence engine behavior over the in-memory client.
//!
//! Covers the idempotency contract: a second run against converged state
//! issues no mutations, absent resources are created exactly once, near-miss
//! search hits are never touched and dry-run never mutates.

mod common;

use std::sync::Arc;

use convergent::client::{ClientCall, MemoryClient, RemoteClient};
use convergent::engine::{converge_batch, exact_matches, BatchItem, ConvergenceEngine, SelectorLocks};
use convergent::error::Error;
use convergent::outcome::{OutcomeStatus, OutcomeSummary};
use convergent::resource::{ResourceSelector, ResourceSpec};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

use common::*;

fn project(name: &str) -> ResourceSelector {
    ResourceSelector::by_name("project", name)
}

#[test]
fn test_create_then_no_op() {
    let client = MemoryClient::new("project");
    let engine = ConvergenceEngine::new();
    let desired = ResourceSpec::new().with("notes", "invoices");

    let first = engine.ensure_present(&client, &project("billing"), &desired);
    assert_changed(&first);
    assert!(first.message.contains("created"), "{}", first.message);

    let second = engine.ensure_present(&client, &project("billing"), &desired);
    assert_unchanged(&second);
    assert_eq!(client.len(), 1);
    assert_eq!(client.mutating_calls().len(), 1);
}

#[test]
fn test_update_sends_only_changed_fields() {
    let client = MemoryClient::new("project");
    client.insert_json(json!({"name": "billing", "notes": "old", "tags": "finance"}));

    let desired = ResourceSpec::new().with("notes", "new").with("tags", "finance");
    let record = ConvergenceEngine::new().ensure_present(&client, &project("billing"), &desired);

    assert_changed(&record);
    assert_eq!(record.before.get("notes"), Some(&json!("old")));
    assert_eq!(record.after.get("notes"), Some(&json!("new")));
    assert!(!record.after.contains_key("tags"));
    match client.mutating_calls().as_slice() {
        [ClientCall::Update(_, changes)] => {
            assert_eq!(changes, &ResourceSpec::new().with("notes", "new"));
        }
        other => panic!("expected a single update, got {:?}", other),
    }
}

#[test]
fn test_near_miss_is_ignored() {
    let client = seeded_projects(&["billing-archive", "billing-old"]);
    let record = ConvergenceEngine::new().ensure_present(&client, &project("billing"), &ResourceSpec::new());

    assert_changed(&record);
    assert_eq!(client.len(), 3);
    assert!(matches!(client.mutating_calls().as_slice(), [ClientCall::Create(_)]));
}

#[test]
fn test_duplicates_are_ambiguous() {
    let client = seeded_projects(&["billing", "billing"]);
    let record = ConvergenceEngine::new().ensure_present(
        &client,
        &project("billing"),
        &ResourceSpec::new().with("notes", "x"),
    );
    assert_failed(&record, "billing");
    assert!(client.mutating_calls().is_empty());
}

#[test]
fn test_update_only_reports_missing() {
    let client = MemoryClient::new("project");
    let record = ConvergenceEngine::new().ensure_existing(
        &client,
        &project("billing"),
        &ResourceSpec::new().with("notes", "x"),
    );
    assert_failed(&record, "not found");
    assert!(client.is_empty());
}

#[test]
fn test_absent_deletes_once() {
    let client = seeded_projects(&["billing"]);
    let engine = ConvergenceEngine::new();

    assert_changed(&engine.ensure_absent(&client, &project("billing")));
    let again = engine.ensure_absent(&client, &project("billing"));
    assert_unchanged(&again);
    assert!(again.message.contains("already absent"));
    assert!(client.is_empty());
}

#[test]
fn test_dry_run_never_mutates() {
    let client = seeded_projects(&["billing"]);
    let engine = ConvergenceEngine::dry_run();

    let records = vec![
        engine.ensure_present(&client, &project("payroll"), &ResourceSpec::new()),
        engine.ensure_present(&client, &project("billing"), &ResourceSpec::new().with("notes", "x")),
        engine.ensure_absent(&client, &project("billing")),
    ];

    for record in &records {
        assert_status(record, OutcomeStatus::Pending);
    }
    assert!(client.mutating_calls().is_empty());
    assert_eq!(OutcomeSummary::from_records(&records).pending, 3);
}

#[test]
fn test_unreachable_backend_fails_without_mutation() {
    let client = seeded_projects(&["billing"]);
    client.set_unreachable(true);
    let record = ConvergenceEngine::new().ensure_present(&client, &project("billing"), &ResourceSpec::new());
    assert_status(&record, OutcomeStatus::Failed);
    assert!(client.mutating_calls().is_empty());
}

#[test]
fn test_rejected_mutation_is_reported() {
    let client = MemoryClient::new("project");
    client.reject_mutations("name already taken");
    let record = ConvergenceEngine::new().ensure_present(&client, &project("billing"), &ResourceSpec::new());
    assert_failed(&record, "name already taken");
}

#[test]
fn test_prepare_failure_stops_before_find() {
    let client = MemoryClient::new("project").with_prepare(Box::new(|_: &ResourceSelector, _: &ResourceSpec| {
        Err(Error::validation("parent 'infra' does not exist"))
    }));
    let record = ConvergenceEngine::new().ensure_present(&client, &project("billing"), &ResourceSpec::new());

    assert_failed(&record, "parent 'infra'");
    assert_eq!(client.calls(), vec![ClientCall::Prepare]);
}

#[test]
fn test_batch_with_locks_creates_each_selector_once() {
    let client = Arc::new(MemoryClient::new("project"));
    let items: Vec<BatchItem> = ["a", "b", "a", "b", "a"]
        .iter()
        .map(|name| BatchItem::present(client.clone(), project(name), ResourceSpec::new()))
        .collect();
    let locks = SelectorLocks::new();

    let records = converge_batch(&ConvergenceEngine::new(), &items, Some(&locks));

    assert_eq!(records.len(), 5);
    assert_eq!(records.iter().filter(|r| r.changed).count(), 2);
    assert_eq!(client.len(), 2);
    assert_eq!(locks.len(), 2);
}

#[test]
fn test_exact_matches_requires_every_key() {
    let client = MemoryClient::new("password");
    client.insert_json(json!({"name": "db", "project": {"name": "ops"}}));
    client.insert_json(json!({"name": "db", "project": {"name": "dev"}}));

    let selector = ResourceSelector::by_name("password", "db").key("project.name", "ops");
    let matches = exact_matches(&client, &selector).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].get("project.name"), Some(&json!("ops")));
}

proptest! {
    /// Converging any name against a backend seeded with names that share its
    /// prefix touches only the exact match and is a no-op the second time.
    #[test]
    fn prop_converge_is_idempotent(
        name in "[a-z]{1,6}",
        suffixes in proptest::collection::vec("[a-z0-9-]{1,4}", 0..5),
        seed_exact in any::<bool>(),
    ) {
        let client = MemoryClient::new("project");
        for suffix in &suffixes {
            client.insert_json(json!({"name": format!("{}{}", name, suffix), "notes": "other"}));
        }
        if seed_exact {
            client.insert_json(json!({"name": name.clone(), "notes": "stale"}));
        }
        let engine = ConvergenceEngine::new();
        let desired = ResourceSpec::new().with("notes", "managed");
        let selector = project(&name);

        let first = engine.ensure_present(&client, &selector, &desired);
        prop_assert!(first.changed, "{}", first.message);
        prop_assert_eq!(client.mutating_calls().len(), 1);

        client.clear_calls();
        let second = engine.ensure_present(&client, &selector, &desired);
        prop_assert!(!second.changed);
        prop_assert_eq!(second.succeeded, Some(true));
        prop_assert!(client.mutating_calls().is_empty());

        let untouched = client
            .resources()
            .iter()
            .filter(|r| r.get("notes") == Some(&json!("other")))
            .count();
        prop_assert_eq!(untouched, suffixes.len());
    }
}

#[test]
fn test_client_kind_is_reported() {
    let client = MemoryClient::new("project");
    assert_eq!(client.kind(), "project");
}
