//! Maintenance windows.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{ZabbixApi, ZabbixResolver};
use crate::client::RemoteClient;
use crate::diff::FieldDiff;
use crate::error::{Error, Result};
use crate::resolve::{EntityKind, ResolutionScope};
use crate::resource::{value_text, Resource, ResourceId, ResourceSelector, ResourceSpec};

pub const DEFAULT_DESCRIPTION: &str = "Created by convergent";

const ACCEPTED_FIELDS: &[&str] = &[
    "name",
    "active_since",
    "active_till",
    "groupids",
    "hostids",
    "host_groups",
    "host_names",
    "maintenance_type",
    "description",
    "timeperiods",
];

/// Parse a start time given as RFC 3339 or `YYYY-MM-DD HH:MM[:SS]` (UTC)
/// into unix seconds.
pub fn parse_start_time(text: &str) -> Result<i64> {
    let text = text.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(time.timestamp());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|time| time.and_utc().timestamp())
        .ok_or_else(|| Error::validation(format!("cannot parse start time '{}'", text)))
}

/// A maintenance window as declared: names instead of ids, a start time and a
/// length in minutes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceRequest {
    pub name: String,
    pub start_time: String,
    pub period_minutes: u64,
    pub host_groups: Vec<String>,
    pub host_names: Vec<String>,
    /// Keep collecting data during the window (`maintenance_type` 0)
    pub collect_data: bool,
    pub description: String,
}

impl MaintenanceRequest {
    pub fn new(name: impl Into<String>, start_time: impl Into<String>, period_minutes: u64) -> Self {
        Self {
            name: name.into(),
            start_time: start_time.into(),
            period_minutes,
            host_groups: Vec::new(),
            host_names: Vec::new(),
            collect_data: true,
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }

    pub fn host_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn host_names<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_names = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn collect_data(mut self, collect: bool) -> Self {
        self.collect_data = collect;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn selector(&self) -> ResourceSelector {
        ResourceSelector::by_name("maintenance", &self.name)
    }

    /// Desired spec with host and group names still unresolved; the client's
    /// `prepare` turns them into ids.
    pub fn to_spec(&self) -> Result<ResourceSpec> {
        if self.host_groups.is_empty() && self.host_names.is_empty() {
            return Err(Error::validation(
                "at least one of host_groups or host_names must be given for a maintenance",
            ));
        }
        if self.period_minutes == 0 {
            return Err(Error::validation("maintenance period must be at least one minute"));
        }
        let since = parse_start_time(&self.start_time)?;
        let period = self.period_minutes as i64 * 60;
        let mut spec = ResourceSpec::new()
            .with("name", self.name.as_str())
            .with("active_since", since.to_string())
            .with("active_till", (since + period).to_string())
            .with("maintenance_type", if self.collect_data { "0" } else { "1" })
            .with("description", self.description.as_str())
            .with(
                "timeperiods",
                json!([{"timeperiod_type": "0", "start_date": since.to_string(), "period": period.to_string()}]),
            );
        if !self.host_groups.is_empty() {
            spec.insert("host_groups", json!(self.host_groups));
        }
        if !self.host_names.is_empty() {
            spec.insert("host_names", json!(self.host_names));
        }
        Ok(spec)
    }
}

/// Spec that ends an existing window `minutes` from `now` (seconds dropped).
pub fn shorten_spec(minutes: u64, now: DateTime<Utc>) -> ResourceSpec {
    let now = now.with_second(0).unwrap_or(now).timestamp();
    ResourceSpec::new().with("active_till", (now + minutes as i64 * 60).to_string())
}

fn sort_ids(ids: &mut [String]) {
    ids.sort_by(|a, b| (a.len(), a).cmp(&(b.len(), b)));
}

fn ids_from(items: Option<&Value>, id_field: &str) -> Value {
    let mut ids: Vec<String> = items
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|i| i.get(id_field)).map(value_text).collect())
        .unwrap_or_default();
    sort_ids(&mut ids);
    json!(ids)
}

/// One-time periods reduced to the fields a request sets.
fn timeperiods_from(value: Option<&Value>) -> Value {
    let periods = value.and_then(Value::as_array).cloned().unwrap_or_default();
    Value::Array(
        periods
            .iter()
            .map(|p| {
                json!({
                    "timeperiod_type": p.get("timeperiod_type").map(value_text).unwrap_or_default(),
                    "start_date": p.get("start_date").map(value_text).unwrap_or_default(),
                    "period": p.get("period").map(value_text).unwrap_or_default(),
                })
            })
            .collect(),
    )
}

fn normalise(item: &Value) -> Result<Resource> {
    let mut resource = Resource::from_json(item, "maintenanceid")
        .ok_or_else(|| Error::rejected(None, format!("unexpected maintenance object: {}", item)))?;
    for field in ["active_since", "active_till", "maintenance_type"] {
        if let Some(value) = resource.fields.get(field).map(value_text) {
            resource.fields.insert(field.to_string(), json!(value));
        }
    }
    let groupids = ids_from(item.get("groups"), "groupid");
    let hostids = ids_from(item.get("hosts"), "hostid");
    let timeperiods = timeperiods_from(item.get("timeperiods"));
    resource.fields.insert("groupids".into(), groupids);
    resource.fields.insert("hostids".into(), hostids);
    resource.fields.insert("timeperiods".into(), timeperiods);
    Ok(resource)
}

/// How many hosts of a window Zabbix already reports in maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceActivity {
    pub hosts: usize,
    pub in_maintenance: usize,
}

impl MaintenanceActivity {
    fn of(resource: &Resource) -> Self {
        let hosts = resource.get("hosts").and_then(Value::as_array).cloned().unwrap_or_default();
        let in_maintenance = hosts
            .iter()
            .filter(|host| host.get("maintenance_status").map(value_text).as_deref() == Some("1"))
            .count();
        Self {
            hosts: hosts.len(),
            in_maintenance,
        }
    }

    /// Every host listed on the window has `maintenance_status` 1.
    pub fn is_active(&self) -> bool {
        self.in_maintenance == self.hosts
    }
}

/// Maintenance windows, selected by name.
#[derive(Debug, Clone)]
pub struct MaintenanceClient {
    api: ZabbixApi,
}

impl MaintenanceClient {
    pub fn new(api: ZabbixApi) -> Self {
        Self { api }
    }

    fn get(&self, filter: Value) -> Result<Vec<Resource>> {
        let result = self.api.call(
            "maintenance.get",
            json!({
                "output": "extend",
                "selectGroups": "extend",
                "selectHosts": "extend",
                "selectTimeperiods": "extend",
                "filter": filter,
            }),
        )?;
        result
            .as_array()
            .map(|items| items.iter().map(normalise).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Current host activity of the window called `name`.
    pub fn activity(&self, name: &str) -> Result<MaintenanceActivity> {
        let found = self.get(json!({ "name": name }))?;
        found
            .first()
            .map(MaintenanceActivity::of)
            .ok_or_else(|| Error::not_found("maintenance", name))
    }

    /// Re-checks `name` every `interval` until it is active or `wait` has
    /// passed, and returns the last activity seen.
    pub fn wait_until_active(&self, name: &str, wait: Duration, interval: Duration) -> Result<MaintenanceActivity> {
        if interval > wait {
            return Err(Error::validation("the check interval cannot be longer than the wait period"));
        }
        if interval.is_zero() && !wait.is_zero() {
            return Err(Error::validation("the check interval must be positive"));
        }
        let mut elapsed = Duration::ZERO;
        loop {
            let activity = self.activity(name)?;
            if activity.is_active() {
                info!(name, hosts = activity.hosts, "maintenance active");
                return Ok(activity);
            }
            if elapsed >= wait {
                return Ok(activity);
            }
            debug!(name, in_maintenance = activity.in_maintenance, hosts = activity.hosts, "waiting for maintenance");
            std::thread::sleep(interval);
            elapsed += interval;
        }
    }
}

impl RemoteClient for MaintenanceClient {
    fn kind(&self) -> &str {
        "maintenance"
    }

    /// Resolves `host_groups` and `host_names` into sorted `groupids` and
    /// `hostids`.
    fn prepare(&self, _selector: &ResourceSelector, desired: &ResourceSpec) -> Result<ResourceSpec> {
        if let Some(unknown) = desired.field_names().find(|f| !ACCEPTED_FIELDS.contains(f)) {
            return Err(Error::validation(format!("unknown maintenance field '{}'", unknown)));
        }
        let mut spec = desired.clone();
        let resolver = ZabbixResolver::new(self.api.clone());
        let mut scope = ResolutionScope::new(&resolver);
        for (names_field, ids_field, kind) in [
            ("host_groups", "groupids", EntityKind::HostGroup),
            ("host_names", "hostids", EntityKind::Host),
        ] {
            let Some(names) = spec.remove(names_field) else {
                continue;
            };
            let names: Vec<String> = match names {
                Value::Array(items) => items.iter().map(value_text).collect(),
                other => vec![value_text(&other)],
            };
            let mut ids: Vec<String> = scope
                .resolve_all(kind, names.iter().map(String::as_str))?
                .into_iter()
                .map(|id| id.as_str().to_string())
                .collect();
            sort_ids(&mut ids);
            spec.insert(ids_field, json!(ids));
        }
        Ok(spec)
    }

    fn find(&self, selector: &ResourceSelector) -> Result<Vec<Resource>> {
        let name = selector.search_term();
        let found = self.get(json!({ "name": name }))?;
        debug!(name, hits = found.len(), "maintenance lookup");
        Ok(found)
    }

    fn read(&self, id: &ResourceId) -> Result<Resource> {
        let result = self.api.call(
            "maintenance.get",
            json!({
                "output": "extend",
                "selectGroups": "extend",
                "selectHosts": "extend",
                "selectTimeperiods": "extend",
                "maintenanceids": [id.as_str()],
            }),
        )?;
        match result.as_array().and_then(|items| items.first()) {
            Some(item) => normalise(item),
            None => Err(Error::not_found("maintenance", id.as_str())),
        }
    }

    fn create(&self, spec: &ResourceSpec) -> Result<ResourceId> {
        if !spec.contains("groupids") && !spec.contains("hostids") {
            return Err(Error::validation(
                "at least one host group or host must be defined for a maintenance",
            ));
        }
        let result = self.api.call("maintenance.create", spec.to_json())?;
        result
            .get("maintenanceids")
            .and_then(|ids| ids.get(0))
            .and_then(ResourceId::from_value)
            .ok_or_else(|| Error::rejected(None, "maintenance.create returned no id"))
    }

    /// A changed `active_till` without new time periods also resizes the
    /// one-time periods so they end with the window.
    fn update(&self, id: &ResourceId, changes: &FieldDiff) -> Result<()> {
        let mut params = changes.to_spec();
        if let (Some(till), false) = (params.get("active_till").cloned(), params.contains("timeperiods")) {
            let till: i64 = value_text(&till)
                .parse()
                .map_err(|_| Error::validation(format!("active_till must be unix seconds, got {}", till)))?;
            let current = self.read(id)?;
            let periods = current
                .get("timeperiods")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let resized: Vec<Value> = periods
                .into_iter()
                .map(|mut period| {
                    let start = period.get("start_date").map(value_text).and_then(|s| s.parse::<i64>().ok());
                    if let (Some(start), Some("0")) = (start, period.get("timeperiod_type").and_then(Value::as_str)) {
                        period["period"] = json!((till - start).max(0).to_string());
                    }
                    period
                })
                .collect();
            if !resized.is_empty() {
                params.insert("timeperiods", Value::Array(resized));
            }
        }
        params.insert("maintenanceid", id.as_str());
        self.api.call("maintenance.update", params.to_json())?;
        Ok(())
    }

    fn delete(&self, id: &ResourceId) -> Result<()> {
        self.api.call("maintenance.delete", json!([id.as_str()]))?;
        Ok(())
    }
}
