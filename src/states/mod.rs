//! State declarations and their handlers.
//!
//! A state file is a YAML list of declarations:
//!
//! ```yaml
//! - id: billing project
//!   state: teampass.project
//!   ensure: present
//!   params:
//!     name: billing
//!     notes: invoices
//! ```
//!
//! Each `state` names a [`StateHandler`] in the [`StateRegistry`], which maps
//! the params onto a client, selector and desired spec and runs them through
//! the [`ConvergenceEngine`].

pub mod cdn;
pub mod firepower;
pub mod teampass;
pub mod xml;
pub mod zabbix;

use once_cell::sync::OnceCell;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::ConvergenceEngine;
use crate::error::{Error, Result};
use crate::integrations::firepower::FirepowerApi;
use crate::integrations::teampass::TpmApi;
use crate::integrations::zabbix::ZabbixApi;
use crate::outcome::OutcomeRecord;
use crate::resource::ResourceSpec;
use crate::transport::Transport;

/// Parameters of one declaration.
pub type StateParams = HashMap<String, Value>;

/// What a declaration asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    /// Exists and matches the params
    Present,
    /// Does not exist
    Absent,
    /// An existing resource is changed; never created
    Updated,
    /// An existing maintenance window ends sooner
    Shortened,
}

impl fmt::Display for Ensure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ensure::Present => "present",
            Ensure::Absent => "absent",
            Ensure::Updated => "updated",
            Ensure::Shortened => "shortened",
        };
        f.write_str(s)
    }
}

/// One entry of a state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDeclaration {
    pub id: String,
    pub state: String,
    /// Defaults to the handler's first supported value
    #[serde(default)]
    pub ensure: Option<Ensure>,
    #[serde(default)]
    pub params: StateParams,
}

/// A parsed state file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateFile {
    pub states: Vec<StateDeclaration>,
}

impl StateFile {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let states: Vec<StateDeclaration> = if text.trim().is_empty() {
            Vec::new()
        } else {
            serde_yaml::from_str(text)?
        };
        let mut seen = HashSet::new();
        for declaration in &states {
            if declaration.id.trim().is_empty() {
                return Err(Error::validation(format!(
                    "a '{}' declaration has an empty id",
                    declaration.state
                )));
            }
            if !seen.insert(declaration.id.as_str()) {
                return Err(Error::validation(format!("duplicate state id '{}'", declaration.id)));
            }
        }
        Ok(Self { states })
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Typed access to declaration params.
pub trait ParamExt {
    fn get_string(&self, key: &str) -> Result<Option<String>>;
    fn get_string_required(&self, key: &str) -> Result<String>;
    fn get_bool(&self, key: &str) -> Result<Option<bool>>;
    fn get_bool_or(&self, key: &str, default: bool) -> Result<bool>;
    fn get_i64(&self, key: &str) -> Result<Option<i64>>;
    fn get_u64(&self, key: &str) -> Result<Option<u64>>;
    fn get_vec_string(&self, key: &str) -> Result<Option<Vec<String>>>;
    fn get_string_map(&self, key: &str) -> Result<Option<HashMap<String, String>>>;
    fn get_level_map(&self, key: &str) -> Result<Option<Vec<(String, i64)>>>;
}

impl ParamExt for StateParams {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Null) | None => Ok(None),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
            Some(_) => Err(Error::validation(format!("{} must be a string", key))),
        }
    }

    fn get_string_required(&self, key: &str) -> Result<String> {
        self.get_string(key)?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::validation(format!("missing required parameter '{}'", key)))
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => Err(Error::validation(format!("{} must be a boolean", key))),
            },
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(Error::validation(format!("{} must be a boolean", key))),
        }
    }

    fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self.get_bool(key)?.unwrap_or(default))
    }

    fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| Error::validation(format!("{} must be an integer", key))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Error::validation(format!("{} must be an integer", key))),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(Error::validation(format!("{} must be an integer", key))),
        }
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get_i64(key)? {
            Some(n) => u64::try_from(n)
                .map(Some)
                .map_err(|_| Error::validation(format!("{} must be a positive integer", key))),
            None => Ok(None),
        }
    }

    fn get_vec_string(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.get(key) {
            Some(Value::Array(items)) => Ok(Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        v => v.to_string(),
                    })
                    .collect(),
            )),
            // Comma-separated string
            Some(Value::String(s)) => Ok(Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(Error::validation(format!("{} must be a list", key))),
        }
    }

    fn get_string_map(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        match self.get(key) {
            Some(Value::Object(map)) => Ok(Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), crate::resource::value_text(v)))
                    .collect(),
            )),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(Error::validation(format!("{} must be a mapping", key))),
        }
    }

    /// `{name: level}` mapping, in declaration order.
    fn get_level_map(&self, key: &str) -> Result<Option<Vec<(String, i64)>>> {
        match self.get(key) {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, level)| {
                    level
                        .as_i64()
                        .or_else(|| level.as_str().and_then(|s| s.trim().parse().ok()))
                        .map(|level| (name.clone(), level))
                        .ok_or_else(|| Error::validation(format!("{}.{} must be a permission level", key, name)))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(Error::validation(format!("{} must be a mapping of name to level", key))),
        }
    }
}

/// Params not in `skip`, as a desired spec.
pub fn spec_from_params(params: &StateParams, skip: &[&str]) -> ResourceSpec {
    let mut keys: Vec<&String> = params.keys().filter(|k| !skip.contains(&k.as_str())).collect();
    keys.sort();
    keys.into_iter()
        .map(|k| (k.clone(), params[k].clone()))
        .collect()
}

/// Shared per-run state: the engine, the transport and lazily built API
/// handles so each remote system is logged in to once per run.
pub struct StateContext {
    pub engine: ConvergenceEngine,
    pub transport: Arc<dyn Transport>,
    pub config: Config,
    teampass: OnceCell<TpmApi>,
    zabbix: OnceCell<ZabbixApi>,
    firepower: OnceCell<FirepowerApi>,
}

impl StateContext {
    pub fn new(engine: ConvergenceEngine, transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            engine,
            transport,
            config,
            teampass: OnceCell::new(),
            zabbix: OnceCell::new(),
            firepower: OnceCell::new(),
        }
    }

    pub fn teampass(&self) -> Result<TpmApi> {
        self.teampass
            .get_or_try_init(|| {
                let section = self
                    .config
                    .teampass
                    .as_ref()
                    .ok_or_else(|| Error::Config("no [teampass] section configured".to_string()))?;
                Ok(TpmApi::new(section.settings()?, self.transport.clone()))
            })
            .cloned()
    }

    pub fn zabbix(&self) -> Result<ZabbixApi> {
        self.zabbix
            .get_or_try_init(|| {
                let section = self
                    .config
                    .zabbix
                    .as_ref()
                    .ok_or_else(|| Error::Config("no [zabbix] section configured".to_string()))?;
                Ok(ZabbixApi::new(section.settings(), self.transport.clone()))
            })
            .cloned()
    }

    pub fn firepower(&self) -> Result<FirepowerApi> {
        self.firepower
            .get_or_try_init(|| {
                let section = self
                    .config
                    .firepower
                    .as_ref()
                    .ok_or_else(|| Error::Config("no [firepower] section configured".to_string()))?;
                Ok(FirepowerApi::new(section.settings(), self.transport.clone()))
            })
            .cloned()
    }
}

/// A named state: params in, outcome out.
pub trait StateHandler: Send + Sync {
    /// Name used in the `state:` field
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Accepted `ensure` values; the first is the default.
    fn supported(&self) -> &'static [Ensure] {
        &[Ensure::Present, Ensure::Absent]
    }

    /// Parameter checks that need no remote system.
    fn validate(&self, _params: &StateParams, _ensure: Ensure) -> Result<()> {
        Ok(())
    }

    fn apply(&self, params: &StateParams, ensure: Ensure, ctx: &StateContext) -> Result<OutcomeRecord>;
}

/// Registry for looking up state handlers by name
pub struct StateRegistry {
    handlers: HashMap<String, Arc<dyn StateHandler>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in states
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Team Password Manager
        registry.register(Arc::new(teampass::ProjectState));
        registry.register(Arc::new(teampass::PasswordState));
        registry.register(Arc::new(teampass::UserState));
        registry.register(Arc::new(teampass::UserPasswordState));
        registry.register(Arc::new(teampass::UserLdapState));
        registry.register(Arc::new(teampass::MyPasswordState));
        registry.register(Arc::new(teampass::GroupState));
        registry.register(Arc::new(teampass::SecurityState));

        // Zabbix
        registry.register(Arc::new(zabbix::MaintenanceState));
        registry.register(Arc::new(zabbix::MaintenanceActiveState));

        // Local XML files
        registry.register(Arc::new(xml::XmlState::Value));
        registry.register(Arc::new(xml::XmlState::Append));
        registry.register(Arc::new(xml::XmlState::Attribute));

        // CDN purges
        registry.register(Arc::new(cdn::AkamaiPurgeState));
        registry.register(Arc::new(cdn::CedexisPurgeState));

        // Lookups
        registry.register(Arc::new(firepower::LookupState));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn StateHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StateHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Sorted handler names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn resolve(&self, declaration: &StateDeclaration) -> Result<(Arc<dyn StateHandler>, Ensure)> {
        let handler = self
            .get(&declaration.state)
            .ok_or_else(|| Error::Unsupported(format!("unknown state '{}'", declaration.state)))?;
        let supported = handler.supported();
        let ensure = match declaration.ensure {
            Some(ensure) => ensure,
            None => supported
                .first()
                .copied()
                .ok_or_else(|| Error::Unsupported(format!("{} accepts no ensure value", handler.name())))?,
        };
        if !supported.contains(&ensure) {
            let accepted: Vec<String> = supported.iter().map(Ensure::to_string).collect();
            return Err(Error::validation(format!(
                "{} does not support ensure={}; expected one of {}",
                handler.name(),
                ensure,
                accepted.join(", ")
            )));
        }
        Ok((handler, ensure))
    }

    /// Local checks only: known state, accepted ensure value, params.
    pub fn validate(&self, declaration: &StateDeclaration) -> Result<()> {
        let (handler, ensure) = self.resolve(declaration)?;
        handler.validate(&declaration.params, ensure)
    }

    /// Run one declaration. Errors become failed records named after the id.
    pub fn run(&self, declaration: &StateDeclaration, ctx: &StateContext) -> OutcomeRecord {
        debug!(id = %declaration.id, state = %declaration.state, "running state");
        let result = self.resolve(declaration).and_then(|(handler, ensure)| {
            handler.validate(&declaration.params, ensure)?;
            handler.apply(&declaration.params, ensure, ctx)
        });
        let mut record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(id = %declaration.id, error = %e, "state failed");
                OutcomeRecord::failed(&declaration.id, e.to_string())
            }
        };
        record.name = declaration.id.clone();
        record
    }

    /// Run every declaration; records come back in file order.
    pub fn run_all(&self, file: &StateFile, ctx: &StateContext, parallel: bool) -> Vec<OutcomeRecord> {
        info!(states = file.len(), parallel, dry_run = ctx.engine.is_dry_run(), "applying state file");
        if parallel {
            file.states.par_iter().map(|d| self.run(d, ctx)).collect()
        } else {
            file.states.iter().map(|d| self.run(d, ctx)).collect()
        }
    }
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
