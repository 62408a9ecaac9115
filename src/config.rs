//! Configuration for convergent
//!
//! Loaded from the first file found among:
//! - the path given with `--config`
//! - `./convergent.toml` or `./convergent.yml`
//! - `~/.config/convergent/config.toml`
//!
//! then `CONVERGENT_*` environment variables override credentials and a few
//! defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::integrations::cdn::{CedexisSettings, EdgeGridCredentials};
use crate::integrations::firepower::FirepowerSettings;
use crate::integrations::teampass::TeampassSettings;
use crate::integrations::zabbix::ZabbixSettings;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub logging: LoggingConfig,
    pub teampass: Option<TeampassConfig>,
    pub zabbix: Option<ZabbixConfig>,
    pub akamai: Option<EdgeGridCredentials>,
    pub cedexis: Option<CedexisSettings>,
    pub firepower: Option<FirepowerConfig>,
    /// File the configuration was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Default configuration values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Compute changes without applying them
    pub check_mode: bool,

    /// HTTP request timeout in seconds
    pub timeout: u64,

    /// Verify TLS certificates
    pub validate_certs: bool,

    /// Worker threads for `--parallel`; 0 picks one per CPU
    pub parallelism: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            check_mode: false,
            timeout: 30,
            validate_certs: true,
            parallelism: 0,
        }
    }
}

impl Defaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when neither `-v` nor `RUST_LOG` is given
    pub level: String,

    /// `pretty`, `compact` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Team Password Manager connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeampassConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub public_key: Option<String>,
    pub private_key: Option<String>,
    pub unlock_reason: Option<String>,
}

impl TeampassConfig {
    pub fn settings(&self) -> crate::Result<TeampassSettings> {
        let settings = TeampassSettings::from_credentials(
            &self.base_url,
            self.username.clone(),
            self.password.clone(),
            self.public_key.clone(),
            self.private_key.clone(),
        )?;
        Ok(match &self.unlock_reason {
            Some(reason) => settings.with_unlock_reason(reason),
            None => settings,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZabbixConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

impl ZabbixConfig {
    pub fn settings(&self) -> ZabbixSettings {
        ZabbixSettings::new(&self.url, &self.user, &self.password)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirepowerConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub domain: Option<String>,
}

impl FirepowerConfig {
    pub fn settings(&self) -> FirepowerSettings {
        let settings = FirepowerSettings::new(&self.base_url, &self.username, &self.password);
        match &self.domain {
            Some(domain) => settings.with_domain(domain),
            None => settings,
        }
    }
}

impl Config {
    /// Load configuration from the first file found, then apply
    /// environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => match Self::get_config_paths().into_iter().find(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Config::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Implicit configuration locations, in priority order
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("convergent.toml"), PathBuf::from("convergent.yml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("convergent").join("config.toml"));
        }
        paths
    }

    /// Load from a specific file; the format follows the extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let mut config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(n) = lookup("CONVERGENT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.defaults.timeout = n;
        }
        if let Some(flag) = lookup("CONVERGENT_CHECK_MODE") {
            self.defaults.check_mode = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Some(level) = lookup("CONVERGENT_LOG_LEVEL") {
            self.logging.level = level;
        }

        // Team Password Manager
        let teampass_vars = [
            "CONVERGENT_TEAMPASS_URL",
            "CONVERGENT_TEAMPASS_USERNAME",
            "CONVERGENT_TEAMPASS_PASSWORD",
            "CONVERGENT_TEAMPASS_PUBLIC_KEY",
            "CONVERGENT_TEAMPASS_PRIVATE_KEY",
        ];
        if teampass_vars.iter().any(|v| lookup(v).is_some()) {
            let teampass = self.teampass.get_or_insert_with(TeampassConfig::default);
            if let Some(url) = lookup("CONVERGENT_TEAMPASS_URL") {
                teampass.base_url = url;
            }
            for (var, field) in [
                ("CONVERGENT_TEAMPASS_USERNAME", &mut teampass.username),
                ("CONVERGENT_TEAMPASS_PASSWORD", &mut teampass.password),
                ("CONVERGENT_TEAMPASS_PUBLIC_KEY", &mut teampass.public_key),
                ("CONVERGENT_TEAMPASS_PRIVATE_KEY", &mut teampass.private_key),
            ] {
                if let Some(value) = lookup(var) {
                    *field = Some(value);
                }
            }
        }

        // Zabbix
        if let Some(url) = lookup("CONVERGENT_ZABBIX_URL") {
            self.zabbix.get_or_insert_with(ZabbixConfig::default).url = url;
        }
        if let Some(zabbix) = self.zabbix.as_mut() {
            if let Some(user) = lookup("CONVERGENT_ZABBIX_USER") {
                zabbix.user = user;
            }
            if let Some(password) = lookup("CONVERGENT_ZABBIX_PASSWORD") {
                zabbix.password = password;
            }
        }

        // Akamai
        if let Some(akamai) = self.akamai.as_mut() {
            if let Some(secret) = lookup("CONVERGENT_AKAMAI_CLIENT_SECRET") {
                akamai.client_secret = secret;
            }
            if let Some(token) = lookup("CONVERGENT_AKAMAI_ACCESS_TOKEN") {
                akamai.access_token = token;
            }
        }

        // Cedexis
        if let Some(cedexis) = self.cedexis.as_mut() {
            if let Some(secret) = lookup("CONVERGENT_CEDEXIS_CLIENT_SECRET") {
                cedexis.client_secret = secret;
            }
        }

        // Firepower
        if let Some(firepower) = self.firepower.as_mut() {
            if let Some(password) = lookup("CONVERGENT_FIREPOWER_PASSWORD") {
                firepower.password = password;
            }
        }

        // NO_COLOR is handled by the CLI
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.defaults.timeout, 30);
        assert!(config.defaults.validate_certs);
        assert!(!config.defaults.check_mode);
        assert!(config.teampass.is_none());
    }

    #[test]
    fn test_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[defaults]
timeout = 10

[teampass]
base_url = "https://tpm.example.com"
public_key = "pub"
private_key = "priv"

[cedexis]
client_id = "cid"
client_secret = "secret"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.defaults.timeout, 10);
        assert_eq!(config.cedexis.as_ref().unwrap().purge_url, crate::integrations::cdn::cedexis::PURGE_URL);
        let settings = config.teampass.unwrap().settings().unwrap();
        assert_eq!(settings.base_url, "https://tpm.example.com");
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        write!(file, "zabbix:\n  url: https://zbx/api_jsonrpc.php\n  user: api\n  password: pw\n").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.zabbix.unwrap().settings().user, "api");
    }

    #[test]
    fn test_env_override() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CONVERGENT_TIMEOUT", "5"),
            ("CONVERGENT_TEAMPASS_URL", "https://tpm"),
            ("CONVERGENT_TEAMPASS_USERNAME", "admin"),
            ("CONVERGENT_TEAMPASS_PASSWORD", "pw"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.defaults.timeout, 5);
        let teampass = config.teampass.unwrap();
        assert_eq!(teampass.username.as_deref(), Some("admin"));
        assert!(teampass.settings().is_ok());
    }

    #[test]
    fn test_incomplete_teampass_credentials() {
        let config = TeampassConfig {
            base_url: "https://tpm".into(),
            username: Some("admin".into()),
            ..TeampassConfig::default()
        };
        assert!(config.settings().is_err());
    }
}
