//! CDN purge integrations.
//!
//! Both vendors take a list of URIs, given inline or in a local file, one per
//! line. Blank lines and lines starting with `#` are skipped.

pub mod akamai;
pub mod cedexis;

pub use akamai::{AkamaiPurge, EdgeGridCredentials};
pub use cedexis::{CedexisPurge, CedexisSettings};

use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Where the URIs to purge come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriSource {
    Inline(String),
    File(PathBuf),
}

impl UriSource {
    /// Exactly one of `uris` and `uris_file` must be given.
    pub fn from_options(uris: Option<String>, uris_file: Option<PathBuf>) -> Result<Self> {
        match (uris, uris_file) {
            (Some(_), Some(_)) => Err(Error::validation(
                "uris and uris_file are mutually exclusive; pass one of them",
            )),
            (Some(text), None) => Ok(UriSource::Inline(text)),
            (None, Some(path)) => Ok(UriSource::File(path)),
            (None, None) => Err(Error::validation("please provide a value for uris or uris_file")),
        }
    }

    /// Read and parse the list. An empty list is a validation error.
    pub fn load(&self) -> Result<Vec<String>> {
        let uris = match self {
            UriSource::Inline(text) => parse_uri_list(text),
            UriSource::File(path) => {
                if !path.exists() {
                    return Err(Error::FileNotFound(path.clone()));
                }
                parse_uri_list(&fs::read_to_string(path)?)
            }
        };
        if uris.is_empty() {
            return Err(Error::validation("no URIs found to purge"));
        }
        Ok(uris)
    }
}

/// Non-blank, non-comment lines, trimmed.
pub fn parse_uri_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
