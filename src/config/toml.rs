//! TOML configuration file parsing

use crate::config::AppConfig;
use crate::error::ConfigError;
use serde::Deserialize;

/// TOML configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(rename = "System")]
    pub system: Option<SystemConfig>,
    #[serde(rename = "Network")]
    pub network: Option<NetworkConfig>,
}

/// `[System]` table
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemConfig {
    pub log_level: Option<String>,
    pub generator: Option<String>,
    pub script_dir: Option<String>,
}

/// `[Network]` table
#[derive(Debug, Default, Deserialize)]
pub struct NetworkConfig {
    #[serde(rename = "Links")]
    pub links: Option<String>,
    #[serde(rename = "RoutingPolicyRules")]
    pub routing_policy_rules: Option<String>,
    #[serde(rename = "UseDNS")]
    pub use_dns: Option<bool>,
    #[serde(rename = "UseDomain")]
    pub use_domain: Option<bool>,
    #[serde(rename = "UseHostname")]
    pub use_hostname: Option<bool>,
    #[serde(rename = "EmitJSON")]
    pub emit_json: Option<bool>,
}

impl TomlConfig {
    /// Apply values present in the file over base configuration
    pub fn apply_to_config(self, mut base_config: AppConfig) -> AppConfig {
        if let Some(system) = self.system {
            if let Some(level) = system.log_level {
                base_config.log_level = level;
            }
            if let Some(generator) = system.generator {
                base_config.generator = generator;
            }
            if let Some(dir) = system.script_dir {
                base_config.script_dir = dir;
            }
        }

        if let Some(network) = self.network {
            if let Some(links) = network.links {
                base_config.links = links;
            }
            if let Some(links) = network.routing_policy_rules {
                base_config.routing_policy_rules = links;
            }
            if let Some(v) = network.use_dns {
                base_config.use_dns = v;
            }
            if let Some(v) = network.use_domain {
                base_config.use_domain = v;
            }
            if let Some(v) = network.use_hostname {
                base_config.use_hostname = v;
            }
            if let Some(v) = network.emit_json {
                base_config.emit_json = v;
            }
        }

        base_config
    }
}

pub fn parse_toml_config(content: &str) -> Result<TomlConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
}

/// Load configuration from TOML file
pub fn load_toml_config(path: &str) -> Result<TomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound { path: path.to_string() })?;

    parse_toml_config(&content)
}
