//! Local XML file editing.
//!
//! Elements selected by a path expression are treated as resources with a
//! `value` field (the element text) and one `@name` field per attribute.
//! Only updates are possible; creating or deleting elements is unsupported.

pub mod document;
pub mod path;

pub use document::{NodeId, XmlDocument};
pub use path::XmlPath;

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::client::RemoteClient;
use crate::diff::FieldDiff;
use crate::error::{Error, Result};
use crate::resource::{value_text, FieldMap, Resource, ResourceId, ResourceSelector, ResourceSpec};

pub const KIND: &str = "xml";

/// Field of a desired spec holding text to append.
pub const APPEND_FIELD: &str = "append";

/// Selector for the elements `xpath` matches in `file`.
pub fn xml_selector(file: &Path, xpath: &str) -> ResourceSelector {
    ResourceSelector::new(KIND)
        .key("file", file.display().to_string())
        .key("xpath", xpath)
}

/// Update-only client over one XML file.
#[derive(Debug, Clone)]
pub struct XmlClient {
    file: PathBuf,
    namespaces: HashMap<String, String>,
}

impl XmlClient {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            namespaces: HashMap::new(),
        }
    }

    pub fn with_namespaces(mut self, namespaces: HashMap<String, String>) -> Self {
        self.namespaces.extend(namespaces);
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn load(&self) -> Result<XmlDocument> {
        if !self.file.exists() {
            return Err(Error::FileNotFound(self.file.clone()));
        }
        XmlDocument::parse(fs::read_to_string(&self.file)?)
    }

    /// Elements matching `xpath`, in document order.
    pub fn query(&self, xpath: &str) -> Result<Vec<NodeId>> {
        let path = XmlPath::parse(xpath)?;
        self.load()?.select(&path, &self.namespaces)
    }

    /// Number of elements matching `xpath`.
    pub fn count(&self, xpath: &str) -> Result<usize> {
        Ok(self.query(xpath)?.len())
    }

    /// Text of every element matching `xpath`.
    pub fn values(&self, xpath: &str) -> Result<Vec<String>> {
        let document = self.load()?;
        let ids = document.select(&XmlPath::parse(xpath)?, &self.namespaces)?;
        Ok(ids
            .into_iter()
            .filter_map(|id| document.element(id).map(|e| e.text.clone()))
            .collect())
    }

    fn resource(&self, document: &XmlDocument, id: NodeId, xpath: Option<&str>) -> Result<Resource> {
        let element = document
            .element(id)
            .ok_or_else(|| Error::not_found(KIND, format!("#{}", id)))?;
        let mut fields = FieldMap::new();
        fields.insert("file".into(), Value::String(self.file.display().to_string()));
        if let Some(xpath) = xpath {
            fields.insert("xpath".into(), Value::String(xpath.to_string()));
        }
        fields.insert("tag".into(), Value::String(element.qname.clone()));
        fields.insert("value".into(), Value::String(element.text.clone()));
        for attribute in &element.attributes {
            fields.insert(format!("@{}", attribute.qname), Value::String(attribute.value.clone()));
        }
        Ok(Resource::new(ResourceId::from(id as u64), fields))
    }

    fn node_id(id: &ResourceId) -> Result<NodeId> {
        id.as_str()
            .parse()
            .map_err(|_| Error::Xml(format!("invalid element id '{}'", id)))
    }
}

impl RemoteClient for XmlClient {
    fn kind(&self) -> &str {
        KIND
    }

    /// Values become strings; `append` turns into the `value` the element
    /// should end up with.
    fn prepare(&self, selector: &ResourceSelector, desired: &ResourceSpec) -> Result<ResourceSpec> {
        let mut spec = ResourceSpec::new();
        for (field, value) in desired.iter() {
            if field != "value" && field != APPEND_FIELD && !field.starts_with('@') {
                return Err(Error::validation(format!(
                    "unknown xml field '{}'; expected value, append or @attribute",
                    field
                )));
            }
            spec.insert(field.clone(), Value::String(value_text(value)));
        }
        if let Some(suffix) = spec.remove(APPEND_FIELD) {
            if spec.contains("value") {
                return Err(Error::validation("value and append are mutually exclusive"));
            }
            let suffix = value_text(&suffix);
            let xpath = selector
                .get_text("xpath")
                .ok_or_else(|| Error::validation("xml selector needs an xpath"))?;
            let current = self.values(&xpath)?;
            let value = match current.as_slice() {
                [text] if text.contains(&suffix) => text.clone(),
                [text] => format!("{}{}", text, suffix),
                _ => suffix,
            };
            spec.insert("value", value);
        }
        Ok(spec)
    }

    fn find(&self, selector: &ResourceSelector) -> Result<Vec<Resource>> {
        let xpath = selector
            .get_text("xpath")
            .ok_or_else(|| Error::validation("xml selector needs an xpath"))?;
        let document = self.load()?;
        let ids = document.select(&XmlPath::parse(&xpath)?, &self.namespaces)?;
        debug!(file = %self.file.display(), xpath = %xpath, matches = ids.len(), "xml query");
        ids.into_iter()
            .map(|id| self.resource(&document, id, Some(&xpath)))
            .collect()
    }

    fn read(&self, id: &ResourceId) -> Result<Resource> {
        self.resource(&self.load()?, Self::node_id(id)?, None)
    }

    fn create(&self, _spec: &ResourceSpec) -> Result<ResourceId> {
        Err(Error::Unsupported("xml elements cannot be created".to_string()))
    }

    fn update(&self, id: &ResourceId, changes: &FieldDiff) -> Result<()> {
        let node = Self::node_id(id)?;
        let document = self.load()?;
        let mut edits = Vec::new();
        for change in changes.changes() {
            let value = value_text(&change.after);
            let edit = match change.field.strip_prefix('@') {
                Some(attribute) => document.set_attribute(node, attribute, &value)?,
                None if change.field == "value" => document.set_text(node, &value)?,
                None => return Err(Error::validation(format!("cannot update xml field '{}'", change.field))),
            };
            edits.push(edit);
        }
        let updated = document.apply(edits)?;
        fs::write(&self.file, updated.source())?;
        info!(file = %self.file.display(), fields = changes.len(), "xml file written");
        Ok(())
    }

    fn delete(&self, _id: &ResourceId) -> Result<()> {
        Err(Error::Unsupported("xml elements cannot be deleted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConvergenceEngine;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const CONFIG: &str = "<?xml version=\"1.0\"?>\n<config>\n  <!-- ports -->\n  <port secure=\"no\">8080</port>\n  <path>/opt</path>\n</config>\n";

    fn fixture() -> (tempfile::TempDir, XmlClient) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.xml");
        fs::write(&file, CONFIG).unwrap();
        (dir, XmlClient::new(file))
    }

    #[test]
    fn test_set_value_then_no_op() {
        let (_dir, client) = fixture();
        let selector = xml_selector(client.file(), "./port");
        let desired = ResourceSpec::new().with("value", 9090);

        let record = ConvergenceEngine::new().ensure_existing(&client, &selector, &desired);
        assert!(record.changed, "{}", record.message);
        assert_eq!(record.before.get("value"), Some(&json!("8080")));
        let text = fs::read_to_string(client.file()).unwrap();
        assert_eq!(text, CONFIG.replace(">8080<", ">9090<"));

        let again = ConvergenceEngine::new().ensure_existing(&client, &selector, &desired);
        assert!(!again.changed);
        assert_eq!(again.succeeded, Some(true));
    }

    #[test]
    fn test_append_is_idempotent() {
        let (_dir, client) = fixture();
        let selector = xml_selector(client.file(), "./path");
        let desired = ResourceSpec::new().with(APPEND_FIELD, ":/srv");

        assert!(ConvergenceEngine::new().ensure_existing(&client, &selector, &desired).changed);
        assert_eq!(client.values("./path").unwrap(), vec!["/opt:/srv"]);
        assert!(!ConvergenceEngine::new().ensure_existing(&client, &selector, &desired).changed);
    }

    #[test]
    fn test_set_attribute_and_missing_node() {
        let (_dir, client) = fixture();
        let selector = xml_selector(client.file(), "./port");
        let record = ConvergenceEngine::new().ensure_existing(
            &client,
            &selector,
            &ResourceSpec::new().with("@secure", "yes").with("@proto", "https"),
        );
        assert!(record.changed, "{}", record.message);
        assert!(fs::read_to_string(client.file())
            .unwrap()
            .contains("<port secure=\"yes\" proto=\"https\">8080</port>"));

        let missing = ConvergenceEngine::new().ensure_existing(
            &client,
            &xml_selector(client.file(), "./host"),
            &ResourceSpec::new().with("value", "x"),
        );
        assert_eq!(missing.succeeded, Some(false));
        assert!(missing.message.contains("was not found"));
    }

    #[test]
    fn test_dry_run_leaves_file_alone() {
        let (_dir, client) = fixture();
        let record = ConvergenceEngine::dry_run().ensure_existing(
            &client,
            &xml_selector(client.file(), "./port"),
            &ResourceSpec::new().with("value", "1"),
        );
        assert_eq!(record.succeeded, None);
        assert_eq!(fs::read_to_string(client.file()).unwrap(), CONFIG);
    }

    #[test]
    fn test_create_and_delete_unsupported() {
        let (_dir, client) = fixture();
        assert!(matches!(client.create(&ResourceSpec::new()), Err(Error::Unsupported(_))));
        assert!(matches!(client.delete(&ResourceId::from(0u64)), Err(Error::Unsupported(_))));
        assert_eq!(client.count("./*").unwrap(), 2);
    }
}
