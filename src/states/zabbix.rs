//! Zabbix states.

use chrono::Utc;
use serde_json::json;
use std::time::Duration;

use super::{Ensure, ParamExt, StateContext, StateHandler, StateParams};
use crate::error::{Error, Result};
use crate::integrations::zabbix::{shorten_spec, MaintenanceClient, MaintenanceRequest};
use crate::outcome::OutcomeRecord;
use crate::resource::{FieldMap, ResourceSelector};

/// `zabbix.maintenance`: a one-time maintenance window.
///
/// `present` needs `start_time`, `period` (minutes) and `host_groups` or
/// `host_names`; `shortened` ends an existing window `minutes` from now.
pub struct MaintenanceState;

fn request(params: &StateParams) -> Result<MaintenanceRequest> {
    let period = params
        .get_u64("period")?
        .ok_or_else(|| Error::validation("missing required parameter 'period'"))?;
    let mut request = MaintenanceRequest::new(
        params.get_string_required("name")?,
        params.get_string_required("start_time")?,
        period,
    )
    .host_groups(params.get_vec_string("host_groups")?.unwrap_or_default())
    .host_names(params.get_vec_string("host_names")?.unwrap_or_default())
    .collect_data(params.get_bool_or("collect_data", true)?);
    if let Some(description) = params.get_string("description")? {
        request = request.description(description);
    }
    Ok(request)
}

fn minutes(params: &StateParams) -> Result<u64> {
    params
        .get_u64("minutes")?
        .ok_or_else(|| Error::validation("missing required parameter 'minutes'"))
}

impl StateHandler for MaintenanceState {
    fn name(&self) -> &'static str {
        "zabbix.maintenance"
    }

    fn description(&self) -> &'static str {
        "One-time maintenance window for host groups and hosts"
    }

    fn supported(&self) -> &'static [Ensure] {
        &[Ensure::Present, Ensure::Absent, Ensure::Shortened]
    }

    fn validate(&self, params: &StateParams, ensure: Ensure) -> Result<()> {
        match ensure {
            Ensure::Present => request(params)?.to_spec().map(|_| ()),
            Ensure::Shortened => minutes(params).map(|_| ()),
            _ => params.get_string_required("name").map(|_| ()),
        }
    }

    fn apply(&self, params: &StateParams, ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let client = MaintenanceClient::new(ctx.zabbix()?);
        let name = params.get_string_required("name")?;
        let selector = ResourceSelector::by_name("maintenance", &name);
        Ok(match ensure {
            Ensure::Absent => ctx.engine.ensure_absent(&client, &selector),
            Ensure::Shortened => {
                let spec = shorten_spec(minutes(params)?, Utc::now());
                ctx.engine.ensure_existing(&client, &selector, &spec)
            }
            _ => {
                let request = request(params)?;
                ctx.engine.ensure_present(&client, &request.selector(), &request.to_spec()?)
            }
        })
    }
}

/// `zabbix.maintenance_active`: succeeds once every host of a window is in
/// maintenance, re-checking every `interval_minutes` for up to
/// `wait_minutes`. Read-only, so it also runs in check mode.
pub struct MaintenanceActiveState;

fn wait_params(params: &StateParams) -> Result<(Duration, Duration)> {
    let wait = params.get_u64("wait_minutes")?.unwrap_or(5);
    let interval = params.get_u64("interval_minutes")?.unwrap_or(1);
    if interval > wait {
        return Err(Error::validation("interval_minutes cannot be greater than wait_minutes"));
    }
    Ok((Duration::from_secs(wait * 60), Duration::from_secs(interval * 60)))
}

impl StateHandler for MaintenanceActiveState {
    fn name(&self) -> &'static str {
        "zabbix.maintenance_active"
    }

    fn description(&self) -> &'static str {
        "Waits until every host of a maintenance window is in maintenance"
    }

    fn supported(&self) -> &'static [Ensure] {
        &[Ensure::Present]
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        params.get_string_required("name")?;
        wait_params(params).map(|_| ())
    }

    fn apply(&self, params: &StateParams, _ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let client = MaintenanceClient::new(ctx.zabbix()?);
        let name = params.get_string_required("name")?;
        let (wait, interval) = wait_params(params)?;
        let activity = client.wait_until_active(&name, wait, interval)?;

        let mut after = FieldMap::new();
        after.insert("active".into(), json!(activity.is_active()));
        after.insert("hosts".into(), json!(activity.hosts));
        after.insert("in_maintenance".into(), json!(activity.in_maintenance));
        let record = if activity.is_active() {
            OutcomeRecord::ok(&name, format!("maintenance '{}' is active", name))
        } else {
            OutcomeRecord::failed(
                &name,
                format!(
                    "maintenance '{}' is not active: {} of {} hosts in maintenance",
                    name, activity.in_maintenance, activity.hosts
                ),
            )
        };
        Ok(record.with_after(after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_needs_hosts_or_groups() {
        let params: StateParams =
            serde_json::from_value(json!({"name": "patch", "start_time": "2024-03-01 10:00", "period": 30}))
                .unwrap();
        let err = MaintenanceState.validate(&params, Ensure::Present).unwrap_err();
        assert!(err.to_string().contains("host_groups or host_names"));
    }

    #[test]
    fn test_shortened_needs_minutes() {
        let params: StateParams = serde_json::from_value(json!({"name": "patch"})).unwrap();
        assert!(MaintenanceState.validate(&params, Ensure::Shortened).is_err());
    }

    #[test]
    fn test_active_check_interval_within_wait() {
        let params: StateParams =
            serde_json::from_value(json!({"name": "patch", "wait_minutes": 2, "interval_minutes": 3})).unwrap();
        assert!(MaintenanceActiveState.validate(&params, Ensure::Present).is_err());
        let params: StateParams = serde_json::from_value(json!({"name": "patch"})).unwrap();
        assert!(MaintenanceActiveState.validate(&params, Ensure::Present).is_ok());
    }
}
