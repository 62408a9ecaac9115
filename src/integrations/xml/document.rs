//! Byte-preserving XML documents.
//!
//! The document keeps its source text and an element index built from the
//! `quick-xml` event stream. Edits are byte-range replacements on the source,
//! so the declaration, comments, processing instructions, quoting and
//! whitespace outside an edited node are written back unchanged.

use quick_xml::escape::{escape, partial_escape, unescape};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::ops::Range;

use super::path::{Axis, NameTest, Predicate, QName, Step, XmlPath};
use crate::error::{Error, Result};

/// Index of an element in document order.
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub qname: String,
    pub local: String,
    pub namespace: Option<String>,
    pub value: String,
    value_span: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub qname: String,
    pub local: String,
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    /// Text before the first child or comment
    pub text: String,
    /// Every descendant text node, concatenated
    pub full_text: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    tag: Range<usize>,
    self_closing: bool,
    text_span: Range<usize>,
    leading: bool,
    declared: HashMap<String, String>,
}

impl Element {
    pub fn attribute(&self, qname: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.qname == qname)
    }
}

/// A replacement of `range` in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    range: Range<usize>,
    replacement: String,
}

#[derive(Debug, Clone)]
pub struct XmlDocument {
    source: String,
    elements: Vec<Element>,
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

/// Attribute names and value spans inside a start tag.
fn scan_attributes(tag: &str, offset: usize) -> Result<Vec<(String, Range<usize>)>> {
    let bytes = tag.as_bytes();
    let is_space = |b: u8| b.is_ascii_whitespace();
    let mut i = 1;
    while i < bytes.len() && !is_space(bytes[i]) && bytes[i] != b'>' && bytes[i] != b'/' {
        i += 1;
    }
    let mut found = Vec::new();
    loop {
        while i < bytes.len() && is_space(bytes[i]) {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b'>' || bytes[i] == b'/' {
            return Ok(found);
        }
        let start = i;
        while i < bytes.len() && !is_space(bytes[i]) && bytes[i] != b'=' {
            i += 1;
        }
        let name = tag[start..i].to_string();
        while i < bytes.len() && is_space(bytes[i]) {
            i += 1;
        }
        if bytes.get(i) != Some(&b'=') {
            return Err(Error::Xml(format!("attribute '{}' has no value", name)));
        }
        i += 1;
        while i < bytes.len() && is_space(bytes[i]) {
            i += 1;
        }
        let quote = match bytes.get(i) {
            Some(&q) if q == b'"' || q == b'\'' => q,
            _ => return Err(Error::Xml(format!("attribute '{}' is not quoted", name))),
        };
        let value_start = i + 1;
        let value_end = tag[value_start..]
            .bytes()
            .position(|b| b == quote)
            .map(|p| value_start + p)
            .ok_or_else(|| Error::Xml(format!("attribute '{}' is not terminated", name)))?;
        found.push((name, offset + value_start..offset + value_end));
        i = value_end + 1;
    }
}

fn decode_text(raw: &str) -> String {
    if let Some(inner) = raw.strip_prefix("<![CDATA[").and_then(|r| r.strip_suffix("]]>")) {
        return inner.to_string();
    }
    unescape(raw).map(|t| t.into_owned()).unwrap_or_else(|_| raw.to_string())
}

impl XmlDocument {
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let mut elements: Vec<Element> = Vec::new();
        let mut open: Vec<NodeId> = Vec::new();
        let mut reader = Reader::from_str(&source);
        let mut buf = Vec::new();
        let mut start = 0usize;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| Error::Xml(format!("parse error at byte {}: {}", reader.error_position(), e)))?;
            let end = reader.buffer_position() as usize;
            let raw = &source[start..end];
            match event {
                Event::Start(_) | Event::Empty(_) => {
                    let self_closing = matches!(event, Event::Empty(_));
                    if let Some(&parent) = open.last() {
                        elements[parent].leading = false;
                    }
                    let id = elements.len();
                    let element = Self::build_element(raw, start, self_closing, open.last().copied(), &elements)?;
                    elements.push(element);
                    if let Some(&parent) = open.last() {
                        elements[parent].children.push(id);
                    }
                    if !self_closing {
                        open.push(id);
                    }
                }
                Event::End(_) => {
                    if let Some(id) = open.pop() {
                        elements[id].leading = false;
                    }
                }
                Event::Text(_) | Event::CData(_) | Event::GeneralRef(_) => {
                    let text = decode_text(raw);
                    for &id in &open {
                        elements[id].full_text.push_str(&text);
                    }
                    if let Some(&id) = open.last() {
                        let element = &mut elements[id];
                        if element.leading {
                            element.text.push_str(&text);
                            element.text_span.end = end;
                        }
                    }
                }
                Event::Eof => break,
                _ => {
                    if let Some(&id) = open.last() {
                        elements[id].leading = false;
                    }
                }
            }
            start = end;
            buf.clear();
        }

        if elements.is_empty() {
            return Err(Error::Xml("document has no root element".to_string()));
        }
        Ok(Self { source, elements })
    }

    fn build_element(
        raw: &str,
        start: usize,
        self_closing: bool,
        parent: Option<NodeId>,
        elements: &[Element],
    ) -> Result<Element> {
        let qname: String = raw[1..]
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '>' && *c != '/')
            .collect();
        let spans = scan_attributes(raw, start)?;

        let mut declared = parent.map(|p| elements[p].declared.clone()).unwrap_or_default();
        for (name, span) in &spans {
            let value = decode_text(&raw[span.start - start..span.end - start]);
            if name == "xmlns" {
                declared.insert(String::new(), value);
            } else if let Some(prefix) = name.strip_prefix("xmlns:") {
                declared.insert(prefix.to_string(), value);
            }
        }

        let (prefix, local) = split_qname(&qname);
        let namespace = declared.get(prefix.unwrap_or("")).cloned();
        let attributes = spans
            .into_iter()
            .map(|(name, span)| {
                let (prefix, local) = split_qname(&name);
                Attribute {
                    local: local.to_string(),
                    namespace: prefix.and_then(|p| declared.get(p).cloned()),
                    value: decode_text(&raw[span.start - start..span.end - start]),
                    qname: name.clone(),
                    value_span: span,
                }
            })
            .collect();

        let end = start + raw.len();
        Ok(Element {
            local: local.to_string(),
            qname,
            namespace,
            attributes,
            text: String::new(),
            full_text: String::new(),
            parent,
            children: Vec::new(),
            tag: start..end,
            self_closing,
            text_span: end..end,
            leading: !self_closing,
            declared,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Element {
        &self.elements[0]
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.elements.get(id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements matching `path`, in document order.
    ///
    /// Prefixes resolve through `namespaces` first, then through the
    /// declarations on the root element.
    pub fn select(&self, path: &XmlPath, namespaces: &HashMap<String, String>) -> Result<Vec<NodeId>> {
        let mut resolved = HashMap::new();
        for prefix in path.prefixes() {
            let uri = namespaces
                .get(prefix)
                .or_else(|| self.root().declared.get(prefix))
                .ok_or_else(|| Error::Xml(format!("namespace prefix '{}' is not mapped", prefix)))?;
            resolved.insert(prefix.to_string(), uri.clone());
        }

        // None stands for the document node above the root element.
        let mut context: Vec<Option<NodeId>> = if path.absolute { vec![None] } else { vec![Some(0)] };
        for step in &path.steps {
            let mut next: Vec<NodeId> = Vec::new();
            for node in &context {
                let parents = match step.axis {
                    Axis::Child => vec![*node],
                    Axis::Descendant => {
                        let mut all = vec![*node];
                        all.extend(self.descendants(*node).into_iter().map(Some));
                        all
                    }
                };
                for parent in parents {
                    for id in self.step_from(parent, step, &resolved) {
                        if !next.contains(&id) {
                            next.push(id);
                        }
                    }
                }
            }
            next.sort_unstable();
            context = next.into_iter().map(Some).collect();
        }
        Ok(context.into_iter().flatten().collect())
    }

    fn children_of(&self, node: Option<NodeId>) -> Vec<NodeId> {
        match node {
            Some(id) => self.elements[id].children.clone(),
            None => vec![0],
        }
    }

    fn descendants(&self, node: Option<NodeId>) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children_of(node).into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.elements[id].children.iter().rev().copied());
        }
        out
    }

    fn step_from(&self, parent: Option<NodeId>, step: &Step, namespaces: &HashMap<String, String>) -> Vec<NodeId> {
        let mut selected: Vec<NodeId> = self
            .children_of(parent)
            .into_iter()
            .filter(|&id| match &step.test {
                NameTest::Any => true,
                NameTest::Name(name) => self.name_matches(&self.elements[id].local, &self.elements[id].namespace, name, namespaces),
            })
            .collect();
        for predicate in &step.predicates {
            selected = match predicate {
                Predicate::Position(n) => selected.get(n - 1).map(|&id| vec![id]).unwrap_or_default(),
                other => selected
                    .into_iter()
                    .filter(|&id| self.predicate_holds(id, other, namespaces))
                    .collect(),
            };
        }
        selected
    }

    fn name_matches(
        &self,
        local: &str,
        namespace: &Option<String>,
        name: &QName,
        namespaces: &HashMap<String, String>,
    ) -> bool {
        if local != name.local {
            return false;
        }
        match &name.prefix {
            Some(prefix) => namespace.as_ref() == namespaces.get(prefix),
            None => true,
        }
    }

    fn predicate_holds(&self, id: NodeId, predicate: &Predicate, namespaces: &HashMap<String, String>) -> bool {
        let element = &self.elements[id];
        let attribute = |name: &QName| {
            element
                .attributes
                .iter()
                .filter(|a| !a.qname.starts_with("xmlns"))
                .find(|a| self.name_matches(&a.local, &a.namespace, name, namespaces))
        };
        match predicate {
            Predicate::HasAttribute(name) => attribute(name).is_some(),
            Predicate::AttributeEquals(name, value) => attribute(name).map_or(false, |a| &a.value == value),
            Predicate::ChildText(name, value) => element.children.iter().any(|&child| {
                let child = &self.elements[child];
                self.name_matches(&child.local, &child.namespace, name, namespaces) && &child.full_text == value
            }),
            Predicate::Position(_) => true,
        }
    }

    /// Replace the element's leading text. A self-closing element is
    /// expanded into a start and end tag.
    pub fn set_text(&self, id: NodeId, value: &str) -> Result<Edit> {
        let element = self.get(id)?;
        let escaped = partial_escape(value);
        Ok(if element.self_closing {
            Edit {
                range: element.tag.end - 2..element.tag.end,
                replacement: format!(">{}</{}>", escaped, element.qname),
            }
        } else {
            Edit {
                range: element.text_span.clone(),
                replacement: escaped.into_owned(),
            }
        })
    }

    /// Replace an attribute value in place, or add the attribute at the end
    /// of the start tag.
    pub fn set_attribute(&self, id: NodeId, qname: &str, value: &str) -> Result<Edit> {
        let element = self.get(id)?;
        let escaped = escape(value);
        if let Some(attribute) = element.attribute(qname) {
            return Ok(Edit {
                range: attribute.value_span.clone(),
                replacement: escaped.into_owned(),
            });
        }
        let close = if element.self_closing { 2 } else { 1 };
        let tag = &self.source[element.tag.start..element.tag.end - close];
        let at = element.tag.start + tag.trim_end().len();
        Ok(Edit {
            range: at..at,
            replacement: format!(" {}=\"{}\"", qname, escaped),
        })
    }

    fn get(&self, id: NodeId) -> Result<&Element> {
        self.elements
            .get(id)
            .ok_or_else(|| Error::Xml(format!("element #{} does not exist", id)))
    }

    /// Apply non-overlapping edits and re-parse the result.
    pub fn apply(&self, mut edits: Vec<Edit>) -> Result<XmlDocument> {
        edits.sort_by(|a, b| (b.range.start, b.range.end).cmp(&(a.range.start, a.range.end)));
        let mut text = self.source.clone();
        let mut limit = text.len();
        for edit in edits {
            if edit.range.end > limit {
                return Err(Error::Xml("overlapping edits".to_string()));
            }
            text.replace_range(edit.range.clone(), &edit.replacement);
            limit = edit.range.start;
        }
        XmlDocument::parse(text)
    }
}
