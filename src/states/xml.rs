//! XML file states. All three are update-only.

use std::path::PathBuf;

use super::{Ensure, ParamExt, StateContext, StateHandler, StateParams};
use crate::error::{Error, Result};
use crate::integrations::xml::{xml_selector, XmlClient, XmlPath, APPEND_FIELD};
use crate::outcome::OutcomeRecord;
use crate::resource::ResourceSpec;

/// Which part of the selected element a state edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlState {
    /// `xml.value`: element text
    Value,
    /// `xml.append`: text appended unless already contained
    Append,
    /// `xml.attribute`: one attribute
    Attribute,
}

impl XmlState {
    fn desired(&self, params: &StateParams) -> Result<ResourceSpec> {
        let value = params.get_string_required("value")?;
        Ok(match self {
            XmlState::Value => ResourceSpec::new().with("value", value),
            XmlState::Append => ResourceSpec::new().with(APPEND_FIELD, value),
            XmlState::Attribute => {
                let attribute = params.get_string_required("attribute")?;
                ResourceSpec::new().with(format!("@{}", attribute.trim_start_matches('@')), value)
            }
        })
    }
}

impl StateHandler for XmlState {
    fn name(&self) -> &'static str {
        match self {
            XmlState::Value => "xml.value",
            XmlState::Append => "xml.append",
            XmlState::Attribute => "xml.attribute",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            XmlState::Value => "Set the text of the element an xpath selects",
            XmlState::Append => "Append to the text of the element an xpath selects",
            XmlState::Attribute => "Set an attribute of the element an xpath selects",
        }
    }

    fn supported(&self) -> &'static [Ensure] {
        &[Ensure::Updated, Ensure::Present]
    }

    fn validate(&self, params: &StateParams, _ensure: Ensure) -> Result<()> {
        params.get_string_required("file")?;
        XmlPath::parse(&params.get_string_required("xpath")?)?;
        params.get_string_map("namespaces")?;
        self.desired(params).map(|_| ())
    }

    fn apply(&self, params: &StateParams, _ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord> {
        let file = PathBuf::from(params.get_string_required("file")?);
        if !file.exists() {
            return Err(Error::FileNotFound(file));
        }
        let xpath = params.get_string_required("xpath")?;
        let client = XmlClient::new(&file).with_namespaces(params.get_string_map("namespaces")?.unwrap_or_default());
        let selector = xml_selector(&file, &xpath);
        Ok(ctx.engine.ensure_existing(&client, &selector, &self.desired(params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_name_may_carry_at_sign() {
        let params: StateParams =
            serde_json::from_value(json!({"file": "f.xml", "xpath": "./a", "attribute": "@id", "value": 3})).unwrap();
        let spec = XmlState::Attribute.desired(&params).unwrap();
        assert_eq!(spec.get("@id"), Some(&json!("3")));
    }

    #[test]
    fn test_bad_xpath_fails_validation() {
        let params: StateParams =
            serde_json::from_value(json!({"file": "f.xml", "xpath": "./a[", "value": "x"})).unwrap();
        assert!(XmlState::Value.validate(&params, Ensure::Updated).is_err());
    }
}
