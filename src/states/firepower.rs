//! Firepower lookups.

use serde_json::json;

use super::{Ensure, ParamExt, StateContext, StateHandler, StateParams};
use crate::error::{Error, Result};
use crate::integrations::firepower::FirepowerResolver;
use crate::outcome::OutcomeRecord;
use crate::resolve::{resolve_name, EntityKind};
use crate::resource::FieldMap;

/// `firepower.lookup`: resolve an object name to its id. Read-only.
pub struct LookupState;

fn entity_kind(text: &str) -> Result<EntityKind> {
    match text.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
        "network" => Ok(EntityKind::Network),
        "host" => Ok(EntityKind::Host),
        "network_group" | "networkgroup" => Ok(EntityKind::NetworkGroup),
        "domain" => Ok(EntityKind::Domain),
        other => Err(Error::validation(format!(
            "unknown object kind '{}'; expected network, host, network_group or domain",
            other
        ))),
    }
}

impl StateHandler for LookupState {
    fn name(&self) -> &'static str {
        "firepower.lookup"
    }

    fn description(&self) -> &'static str {
        "Resolve a network, host, network group or domain name to its id"
    }

    fn supported(&self) -> &'static [Ensure] {
        &[Ensure::Present]
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        entity_kind(&params.get_string_required("kind")?)?;
        params.get_string_required("name").map(|_| ())
    }

    fn apply(&self, params: &StateParams, _ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let kind = entity_kind(&params.get_string_required("kind")?)?;
        let name = params.get_string_required("name")?;
        let resolver = FirepowerResolver::new(ctx.firepower()?);
        let id = resolve_name(&resolver, kind, &name)?;
        let mut found = FieldMap::new();
        found.insert("id".into(), id.to_value());
        found.insert("name".into(), json!(name));
        Ok(OutcomeRecord::ok(&name, format!("{} '{}' is {}", kind, name, id)).with_after(found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_spellings() {
        assert_eq!(entity_kind("Network-Group").unwrap(), EntityKind::NetworkGroup);
        assert_eq!(entity_kind("host").unwrap(), EntityKind::Host);
        assert!(entity_kind("user").is_err());
    }
}
