//! CDN purge states.

use std::path::PathBuf;

use super::{Ensure, ParamExt, StateContext, StateHandler, StateParams};
use crate::error::{Error, Result};
use crate::integrations::cdn::cedexis::split_platform_ids;
use crate::integrations::cdn::{AkamaiPurge, CedexisPurge, UriSource};
use crate::outcome::OutcomeRecord;

fn uri_source(params: &StateParams) -> Result<UriSource> {
    UriSource::from_options(
        params.get_string("uris")?,
        params.get_string("uris_file")?.map(PathBuf::from),
    )
}

/// `akamai.purge`: invalidate URLs through Fast Purge.
pub struct AkamaiPurgeState;

impl StateHandler for AkamaiPurgeState {
    fn name(&self) -> &'static str {
        "akamai.purge"
    }

    fn description(&self) -> &'static str {
        "Invalidate a list of URLs on Akamai"
    }

    fn supported(&self) -> &'static [Ensure] {
        &[Ensure::Present]
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        params.get_string_map("headers")?;
        uri_source(params).map(|_| ())
    }

    fn apply(&self, params: &StateParams, _ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let credentials = ctx
            .config
            .akamai
            .clone()
            .ok_or_else(|| Error::Config("no [akamai] section configured".to_string()))?;
        let name = params.get_string("name")?.unwrap_or_else(|| "urls".to_string());
        let mut headers: Vec<(String, String)> =
            params.get_string_map("headers")?.unwrap_or_default().into_iter().collect();
        headers.sort();
        let purge = AkamaiPurge::new(name, credentials, uri_source(params)?, ctx.transport.clone())
            .with_headers(headers);
        Ok(ctx.engine.trigger(&purge))
    }
}

/// `cedexis.purge`: purge URI paths on Fusion platforms.
pub struct CedexisPurgeState;

fn platform_ids(params: &StateParams) -> Result<Vec<String>> {
    Ok(match params.get("platform_ids") {
        Some(serde_json::Value::String(text)) => split_platform_ids(text),
        _ => params.get_vec_string("platform_ids")?.unwrap_or_default(),
    })
}

impl StateHandler for CedexisPurgeState {
    fn name(&self) -> &'static str {
        "cedexis.purge"
    }

    fn description(&self) -> &'static str {
        "Purge URIs on Cedexis platforms"
    }

    fn supported(&self) -> &'static [Ensure] {
        &[Ensure::Present]
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        if platform_ids(params)?.is_empty() {
            return Err(Error::validation("missing required parameter 'platform_ids'"));
        }
        uri_source(params).map(|_| ())
    }

    fn apply(&self, params: &StateParams, _ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let settings = ctx
            .config
            .cedexis
            .clone()
            .ok_or_else(|| Error::Config("no [cedexis] section configured".to_string()))?;
        let name = params.get_string("name")?.unwrap_or_else(|| "uris".to_string());
        let purge = CedexisPurge::new(
            name,
            settings,
            platform_ids(params)?,
            uri_source(params)?,
            ctx.transport.clone(),
        );
        Ok(ctx.engine.trigger(&purge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_platform_ids_as_string_or_list() {
        let text: StateParams = serde_json::from_value(json!({"platform_ids": "1:2"})).unwrap();
        let list: StateParams = serde_json::from_value(json!({"platform_ids": ["1", 2]})).unwrap();
        assert_eq!(platform_ids(&text).unwrap(), vec!["1", "2"]);
        assert_eq!(platform_ids(&list).unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_uris_and_file_are_exclusive() {
        let params: StateParams = serde_json::from_value(json!({"uris": "/a", "uris_file": "/tmp/x"})).unwrap();
        assert!(AkamaiPurgeState.validate(&params, Ensure::Present).is_err());
    }
}
