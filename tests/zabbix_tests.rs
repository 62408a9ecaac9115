//! Zabbix maintenance states against a scripted JSON-RPC endpoint.
//!
//! Every call goes to the same URL, so replies are queued in call order.

mod common;

use std::sync::Arc;

use chrono::Utc;
use convergent::outcome::OutcomeStatus;
use convergent::transport::{Method, MockTransport};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use common::*;

const WINDOW_START: i64 = 1_709_287_200;

fn window(active_till: &str) -> Value {
    json!({
        "maintenanceid": "7",
        "name": "patching",
        "active_since": WINDOW_START.to_string(),
        "active_till": active_till,
        "maintenance_type": "0",
        "description": "Created by convergent",
        "groups": [{"groupid": "2", "name": "Linux servers"}],
        "hosts": [],
        "timeperiods": [{
            "timeperiod_type": "0",
            "start_date": WINDOW_START.to_string(),
            "period": "86400",
            "every": "1"
        }]
    })
}

fn reply(mock: &MockTransport, result: Value) {
    mock.on_json(Method::Post, ZABBIX_URL, json!({"jsonrpc": "2.0", "id": 0, "result": result}));
}

#[test]
fn test_absent_deletes_existing_window() {
    let mock = Arc::new(MockTransport::new());
    reply(&mock, json!("token"));
    reply(&mock, json!([window("1709373600")]));
    reply(&mock, json!({"maintenanceids": ["7"]}));

    let yaml = r#"
- id: end patching
  state: zabbix.maintenance
  ensure: absent
  params:
    name: patching
"#;
    let records = run_states(yaml, &state_context(&mock, false));
    assert_changed(&records[0]);
    assert_eq!(
        rpc_methods(&mock),
        vec!["user.login", "maintenance.get", "maintenance.delete"]
    );
    let delete = mock.requests()[2].json_body().unwrap();
    assert_eq!(delete["params"], json!(["7"]));
    assert_eq!(delete["auth"], json!("token"));
}

#[test]
fn test_absent_without_window_is_ok() {
    let mock = Arc::new(MockTransport::new());
    reply(&mock, json!("token"));
    reply(&mock, json!([]));

    let yaml = r#"
- id: end patching
  state: zabbix.maintenance
  ensure: absent
  params:
    name: patching
"#;
    let records = run_states(yaml, &state_context(&mock, false));
    assert_unchanged(&records[0]);
    assert_eq!(rpc_methods(&mock), vec!["user.login", "maintenance.get"]);
}

#[test]
fn test_shortened_resizes_periods() {
    let mock = Arc::new(MockTransport::new());
    reply(&mock, json!("token"));
    reply(&mock, json!([window("4102444800")]));
    reply(&mock, json!([window("4102444800")]));
    reply(&mock, json!({"maintenanceids": ["7"]}));

    let yaml = r#"
- id: cut patching short
  state: zabbix.maintenance
  ensure: shortened
  params:
    name: patching
    minutes: 5
"#;
    let before = Utc::now().timestamp();
    let records = run_states(yaml, &state_context(&mock, false));
    assert_changed(&records[0]);
    assert_eq!(
        rpc_methods(&mock),
        vec!["user.login", "maintenance.get", "maintenance.get", "maintenance.update"]
    );

    let update = mock.requests()[3].json_body().unwrap();
    let till: i64 = update["params"]["active_till"].as_str().unwrap().parse().unwrap();
    assert!(till > before && till <= before + 6 * 60, "active_till {}", till);
    assert_eq!(till % 60, 0);
    assert_eq!(update["params"]["maintenanceid"], json!("7"));
    assert_eq!(
        update["params"]["timeperiods"][0]["period"],
        json!((till - WINDOW_START).to_string())
    );
}

#[test]
fn test_shortened_dry_run_reads_only() {
    let mock = Arc::new(MockTransport::new());
    reply(&mock, json!("token"));
    reply(&mock, json!([window("4102444800")]));

    let yaml = r#"
- id: cut patching short
  state: zabbix.maintenance
  ensure: shortened
  params:
    name: patching
    minutes: 10
"#;
    let records = run_states(yaml, &state_context(&mock, true));
    assert_status(&records[0], OutcomeStatus::Pending);
    assert_eq!(records[0].before.get("active_till"), Some(&json!("4102444800")));
    assert!(!rpc_methods(&mock).contains(&"maintenance.update".to_string()));
}

#[test]
fn test_shortening_missing_window_fails() {
    let mock = Arc::new(MockTransport::new());
    reply(&mock, json!("token"));
    reply(&mock, json!([]));

    let yaml = r#"
- id: cut patching short
  state: zabbix.maintenance
  ensure: shortened
  params:
    name: patching
    minutes: 10
"#;
    let records = run_states(yaml, &state_context(&mock, false));
    assert_failed(&records[0], "not found");
}

#[test]
fn test_api_error_is_reported() {
    let mock = Arc::new(MockTransport::new());
    mock.on_json(
        Method::Post,
        ZABBIX_URL,
        json!({"jsonrpc": "2.0", "id": 0, "error": {"code": -32602, "message": "Invalid params.", "data": "Login name or password is incorrect."}}),
    );

    let yaml = r#"
- id: end patching
  state: zabbix.maintenance
  ensure: absent
  params:
    name: patching
"#;
    let records = run_states(yaml, &state_context(&mock, false));
    assert_failed(&records[0], "Login name or password is incorrect.");
    assert_eq!(rpc_methods(&mock), vec!["user.login"]);
}

#[test]
fn test_one_login_per_run() {
    let mock = Arc::new(MockTransport::new());
    reply(&mock, json!("token"));
    reply(&mock, json!([]));

    let yaml = r#"
- id: end patching
  state: zabbix.maintenance
  ensure: absent
  params:
    name: patching
- id: end reboot
  state: zabbix.maintenance
  ensure: absent
  params:
    name: reboot
"#;
    let records = run_states(yaml, &state_context(&mock, false));
    assert!(records.iter().all(|r| r.succeeded == Some(true)));
    assert_eq!(
        rpc_methods(&mock),
        vec!["user.login", "maintenance.get", "maintenance.get"]
    );
}

#[test]
fn test_maintenance_active_check() {
    let mock = Arc::new(MockTransport::new());
    reply(&mock, json!("token"));
    let mut active = window("1709373600");
    active["hosts"] = json!([
        {"hostid": "10084", "host": "web1", "maintenance_status": "1"},
        {"hostid": "10085", "host": "web2", "maintenance_status": "0"}
    ]);
    reply(&mock, json!([active]));

    let yaml = r#"
- id: patching started
  state: zabbix.maintenance_active
  params:
    name: patching
    wait_minutes: 0
    interval_minutes: 0
"#;
    let records = run_states(yaml, &state_context(&mock, true));
    assert_failed(&records[0], "1 of 2 hosts");
    assert_eq!(records[0].after.get("active"), Some(&json!(false)));
    assert_eq!(rpc_methods(&mock), vec!["user.login", "maintenance.get"]);
}
