//! Error types for Convergent.
//!
//! Every failure a convergence call can meet is one of the variants below. The
//! engine converts them into failed [`OutcomeRecord`](crate::outcome::OutcomeRecord)s
//! at its boundary, so callers only ever see the uniform record; the typed
//! error stays available to integrations and to tests.

use std::path::PathBuf;
use thiserror::Error;

use crate::permission::PermissionScope;

/// Result type alias for Convergent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Convergent.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Convergence Errors
    // ========================================================================
    /// The selector matched more than one resource.
    #[error("more than one resource matches selector {selector} ({matches} matches)")]
    AmbiguousSelector {
        /// Rendered selector
        selector: String,
        /// Number of exact matches
        matches: usize,
    },

    /// A named entity or resource id does not exist.
    #[error("{kind} '{name}' does not exist")]
    NotFound {
        /// Entity kind (user, group, project, ...)
        kind: String,
        /// Name or id that was looked up
        name: String,
    },

    /// A permission level outside the set allowed for the resource kind.
    #[error("invalid {scope} permission {level}: allowed values are {}", .scope.allowed_list())]
    InvalidPermission {
        /// Offending level
        level: i64,
        /// Resource kind the level was checked against
        scope: PermissionScope,
    },

    /// Caller-supplied arguments failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// The remote system rejected the request (authn/authz/validation).
    #[error("remote system rejected the request{}: {details}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    RemoteRejected {
        /// HTTP status, when the rejection came with one
        status: Option<u16>,
        /// Vendor diagnostic, verbatim
        details: String,
    },

    /// Transport-level failure; nothing is assumed to have landed.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// The integration cannot perform the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// File not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// XML parsing or path error.
    #[error("XML error: {0}")]
    Xml(String),
}

impl Error {
    /// Creates a new not-found error.
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a new remote rejection.
    pub fn rejected(status: Option<u16>, details: impl Into<String>) -> Self {
        Self::RemoteRejected {
            status,
            details: details.into(),
        }
    }

    /// Creates a new connection failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::ConnectionFailure(message.into())
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns true if re-invoking convergence may succeed without any
    /// change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConnectionFailure(_))
    }

    /// Returns true if the error was raised before any remote call.
    pub fn is_precheck(&self) -> bool {
        matches!(
            self,
            Error::InvalidPermission { .. } | Error::Validation(_) | Error::Config(_)
        )
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::RemoteRejected { .. } | Error::AmbiguousSelector { .. } => 2,
            Error::ConnectionFailure(_) => 3,
            Error::Validation(_) | Error::InvalidPermission { .. } => 4,
            Error::Config(_) | Error::FileNotFound(_) => 5,
            _ => 1,
        }
    }
}
