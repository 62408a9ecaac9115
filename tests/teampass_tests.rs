//! Team Password Manager states run end to end against a scripted transport.

mod common;

use std::sync::Arc;

use convergent::config::Config;
use convergent::engine::ConvergenceEngine;
use convergent::outcome::OutcomeStatus;
use convergent::states::StateContext;
use convergent::transport::{ApiResponse, Method, MockTransport};
use pretty_assertions::assert_eq;
use serde_json::json;

use common::*;

const PROJECT_NOTES: &str = r#"
- id: billing project
  state: teampass.project
  params:
    name: billing
    notes: invoices and receipts
"#;

fn script_billing(mock: &MockTransport, notes: &str) {
    mock.on_json(
        Method::Get,
        "projects/search/billing.json",
        json!([{"id": 5, "name": "billing"}, {"id": 6, "name": "billing-2019"}]),
    );
    mock.on_json(
        Method::Get,
        "projects/5.json",
        json!({"id": 5, "name": "billing", "notes": notes, "tags": "", "parent_id": 0}),
    );
}

#[test]
fn test_project_notes_updated_once() {
    let mock = Arc::new(MockTransport::new());
    script_billing(&mock, "old");
    mock.on(Method::Put, "projects/5.json", ApiResponse::new(204, ""));

    let records = run_states(PROJECT_NOTES, &state_context(&mock, false));
    assert_changed(&records[0]);
    assert_eq!(records[0].name, "billing project");

    let puts = mock.mutating_requests();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].url, "https://tpm.example.com/index.php/api/v4/projects/5.json");
    assert_eq!(puts[0].json_body(), Some(json!({"notes": "invoices and receipts"})));
    assert_eq!(
        puts[0].basic_auth,
        Some(("svc-convergent".to_string(), "hunter2".to_string()))
    );
}

#[test]
fn test_project_in_desired_state_is_untouched() {
    let mock = Arc::new(MockTransport::new());
    script_billing(&mock, "invoices and receipts");

    let records = run_states(PROJECT_NOTES, &state_context(&mock, false));
    assert_unchanged(&records[0]);
    assert!(mock.mutating_requests().is_empty());
    // The near-miss search hit is never read in full.
    assert!(mock.requests_to("projects/6.json").is_empty());
}

#[test]
fn test_check_mode_previews_without_writing() {
    let mock = Arc::new(MockTransport::new());
    script_billing(&mock, "old");

    let records = run_states(PROJECT_NOTES, &state_context(&mock, true));
    assert_status(&records[0], OutcomeStatus::Pending);
    assert_eq!(records[0].before.get("notes"), Some(&json!("old")));
    assert!(mock.mutating_requests().is_empty());
}

#[test]
fn test_password_with_custom_field_resolves_project() {
    let mock = Arc::new(MockTransport::new());
    mock.on_json(Method::Get, "projects/search/ops.json", json!([{"id": 3, "name": "ops"}]));
    mock.on_json(
        Method::Get,
        "passwords/search/db.json",
        json!([
            {"id": 8, "name": "db", "project": {"id": 3, "name": "ops"}},
            {"id": 9, "name": "db", "project": {"id": 4, "name": "dev"}}
        ]),
    );
    mock.on_json(
        Method::Get,
        "passwords/8.json",
        json!({
            "id": 8, "name": "db", "username": "postgres",
            "project": {"id": 3, "name": "ops"},
            "custom_field1": {"type": "Text", "label": "port", "data": "5432"}
        }),
    );
    mock.on(Method::Put, "passwords/8.json", ApiResponse::new(204, ""));

    let yaml = r#"
- id: ops database
  state: teampass.password
  params:
    name: db
    project: ops
    username: postgres
    custom_data1: "6432"
"#;
    let records = run_states(yaml, &state_context(&mock, false));
    assert_changed(&records[0]);

    let puts = mock.mutating_requests();
    assert_eq!(puts.len(), 1);
    assert!(puts[0].url.ends_with("passwords/8.json"));
    assert_eq!(puts[0].json_body(), Some(json!({"custom_data1": "6432"})));
}

#[test]
fn test_unknown_project_fails_before_search() {
    let mock = Arc::new(MockTransport::new());
    mock.on_json(Method::Get, "projects/search/nowhere.json", json!([]));

    let yaml = r#"
- id: orphan
  state: teampass.password
  params:
    name: db
    project: nowhere
"#;
    let records = run_states(yaml, &state_context(&mock, false));
    assert_failed(&records[0], "nowhere");
    assert!(mock.requests_to("passwords/search").is_empty());
}

#[test]
fn test_forbidden_search_is_a_failure() {
    let mock = Arc::new(MockTransport::new());
    mock.on(Method::Get, "projects/search/billing.json", ApiResponse::new(403, ""));

    let records = run_states(PROJECT_NOTES, &state_context(&mock, false));
    assert_failed(&records[0], "forbidden");
}

#[test]
fn test_security_level_rejected_locally() {
    let mock = Arc::new(MockTransport::new());
    let yaml = r#"
- id: db access
  state: teampass.security
  params:
    project: ops
    password: db
    users:
      alice: 40
"#;
    let records = run_states(yaml, &state_context(&mock, false));
    assert_failed(&records[0], "40");
    assert_eq!(mock.request_count(), 0);
}

#[test]
fn test_missing_teampass_section() {
    let mock = Arc::new(MockTransport::new());
    let ctx = StateContext::new(ConvergenceEngine::new(), mock.clone(), Config::default());
    let records = run_states(PROJECT_NOTES, &ctx);
    assert_failed(&records[0], "teampass");
    assert_eq!(mock.request_count(), 0);
}

#[test]
fn test_user_password_and_ldap_states() {
    let mock = Arc::new(MockTransport::new());
    mock.on_json(Method::Get, "users.json", json!([{"id": 4, "name": "John", "username": "john"}]));
    mock.on(Method::Put, "users/4/change_password.json", ApiResponse::new(204, ""));
    mock.on(Method::Put, "users/4/convert_to_normal.json", ApiResponse::new(204, ""));

    let yaml = r#"
- id: rotate john
  state: teampass.user_password
  params:
    name: John
    password: correct-horse
- id: john leaves ldap
  state: teampass.user_ldap
  ensure: absent
  params:
    name: John
"#;
    let records = run_states(yaml, &state_context(&mock, false));
    assert_changed(&records[0]);
    assert_changed(&records[1]);
    assert!(!records[0].to_state_return().to_string().contains("correct-horse"));

    let puts = mock.mutating_requests();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[0].json_body(), Some(json!({"password": "correct-horse"})));
    assert!(puts[1].url.ends_with("users/4/convert_to_normal.json"));
}

#[test]
fn test_mypassword_absent() {
    let mock = Arc::new(MockTransport::new());
    mock.on_json(Method::Get, "my_passwords/search/vpn.json", json!([{"id": 3, "name": "vpn"}]));
    mock.on_json(Method::Get, "my_passwords/3.json", json!({"id": 3, "name": "vpn"}));
    mock.on(Method::Delete, "my_passwords/3.json", ApiResponse::new(204, ""));

    let yaml = r#"
- id: drop vpn
  state: teampass.mypassword
  ensure: absent
  params:
    name: vpn
"#;
    let records = run_states(yaml, &state_context(&mock, false));
    assert_changed(&records[0]);
    let writes = mock.mutating_requests();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].method, Method::Delete);
}
