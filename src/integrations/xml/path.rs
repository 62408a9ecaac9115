//! Element paths.
//!
//! A small subset of XPath, as understood by element-tree style `find`:
//!
//! ```text
//! ./a/b            children of the root element
//! .//b             descendants of the root element
//! /root/a          absolute, starting at the document
//! ns:a             prefixed name, resolved through the namespace map
//! *                any element
//! a[@id]           has attribute
//! a[@id='3']       attribute equals
//! a[ns:name='x']   has a child whose text equals
//! a[2]             second matching sibling (1-based)
//! ```

use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
}

/// A possibly prefixed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    pub fn parse(text: &str) -> Result<Self> {
        let valid = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        };
        let (prefix, local) = match text.split_once(':') {
            Some((prefix, local)) => (Some(prefix), local),
            None => (None, text),
        };
        if !valid(local) || prefix.map_or(false, |p| !valid(p)) {
            return Err(Error::Xml(format!("invalid name '{}' in path", text)));
        }
        Ok(Self {
            prefix: prefix.map(str::to_string),
            local: local.to_string(),
        })
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    Any,
    Name(QName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    HasAttribute(QName),
    AttributeEquals(QName, String),
    ChildText(QName, String),
    /// 1-based
    Position(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub axis: Axis,
    pub test: NameTest,
    pub predicates: Vec<Predicate>,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlPath {
    /// Starts at the document rather than at the root element
    pub absolute: bool,
    pub steps: Vec<Step>,
}

impl XmlPath {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(Error::Xml("empty path".to_string()));
        }
        let (absolute, mut rest, mut axis) = if let Some(r) = expr.strip_prefix(".//") {
            (false, r, Axis::Descendant)
        } else if let Some(r) = expr.strip_prefix("./") {
            (false, r, Axis::Child)
        } else if let Some(r) = expr.strip_prefix("//") {
            (true, r, Axis::Descendant)
        } else if let Some(r) = expr.strip_prefix('/') {
            (true, r, Axis::Child)
        } else {
            (false, expr, Axis::Child)
        };

        let mut steps = Vec::new();
        loop {
            let end = step_end(rest)?;
            let (step, tail) = rest.split_at(end);
            steps.push(parse_step(step, axis)?);
            if tail.is_empty() {
                break;
            }
            (rest, axis) = match tail.strip_prefix("//") {
                Some(r) => (r, Axis::Descendant),
                None => (&tail[1..], Axis::Child),
            };
            if rest.is_empty() {
                return Err(Error::Xml(format!("path '{}' ends with a separator", expr)));
            }
        }
        Ok(Self { absolute, steps })
    }

    /// Prefixes used anywhere in the path.
    pub fn prefixes(&self) -> Vec<&str> {
        let mut prefixes = Vec::new();
        for step in &self.steps {
            if let NameTest::Name(name) = &step.test {
                add_prefix(&mut prefixes, name);
            }
            for predicate in &step.predicates {
                match predicate {
                    Predicate::HasAttribute(n) | Predicate::AttributeEquals(n, _) | Predicate::ChildText(n, _) => {
                        add_prefix(&mut prefixes, n)
                    }
                    Predicate::Position(_) => {}
                }
            }
        }
        prefixes
    }
}

fn add_prefix<'a>(prefixes: &mut Vec<&'a str>, name: &'a QName) {
    if let Some(p) = name.prefix.as_deref() {
        if !prefixes.contains(&p) {
            prefixes.push(p);
        }
    }
}

/// Byte offset of the `/` that ends the first step, or the length.
fn step_end(text: &str) -> Result<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::Xml(format!("unbalanced ']' in '{}'", text)))?
            }
            (None, '/') if depth == 0 => return Ok(i),
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return Err(Error::Xml(format!("unterminated predicate in '{}'", text)));
    }
    Ok(text.len())
}

fn parse_step(text: &str, axis: Axis) -> Result<Step> {
    let (name, mut rest) = match text.find('[') {
        Some(i) => text.split_at(i),
        None => (text, ""),
    };
    let test = match name {
        "*" => NameTest::Any,
        "" => return Err(Error::Xml("empty step in path".to_string())),
        name => NameTest::Name(QName::parse(name)?),
    };
    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let close = closing_bracket(rest)?;
        predicates.push(parse_predicate(&rest[1..close])?);
        rest = &rest[close + 1..];
        if !rest.is_empty() && !rest.starts_with('[') {
            return Err(Error::Xml(format!("unexpected '{}' after predicate", rest)));
        }
    }
    Ok(Step { axis, test, predicates })
}

fn closing_bracket(text: &str) -> Result<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Ok(i),
            _ => {}
        }
    }
    Err(Error::Xml(format!("unterminated predicate '{}'", text)))
}

fn unquote(text: &str) -> Result<String> {
    let text = text.trim();
    let quoted = text.len() >= 2
        && ((text.starts_with('\'') && text.ends_with('\'')) || (text.starts_with('"') && text.ends_with('"')));
    if !quoted {
        return Err(Error::Xml(format!("expected a quoted value, got {}", text)));
    }
    Ok(text[1..text.len() - 1].to_string())
}

fn parse_predicate(text: &str) -> Result<Predicate> {
    let text = text.trim();
    if let Ok(position) = text.parse::<usize>() {
        if position == 0 {
            return Err(Error::Xml("positions start at 1".to_string()));
        }
        return Ok(Predicate::Position(position));
    }
    let (lhs, rhs) = match text.split_once('=') {
        Some((lhs, rhs)) => (lhs.trim(), Some(unquote(rhs)?)),
        None => (text, None),
    };
    match (lhs.strip_prefix('@'), rhs) {
        (Some(attr), None) => Ok(Predicate::HasAttribute(QName::parse(attr)?)),
        (Some(attr), Some(value)) => Ok(Predicate::AttributeEquals(QName::parse(attr)?, value)),
        (None, Some(value)) => Ok(Predicate::ChildText(QName::parse(lhs)?, value)),
        (None, None) => Err(Error::Xml(format!("unsupported predicate [{}]", text))),
    }
}
