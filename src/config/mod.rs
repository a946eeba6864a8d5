//! Configuration management module
//!
//! Handles loading configuration from multiple sources with proper precedence:
//! CLI arguments > environment variables > TOML files > defaults

use crate::error::ConfigError;
use std::path::Path;
use tracing::debug;

pub mod cli;
pub mod env;
pub mod toml;

use cli::CliArgs;

/// Default configuration directory, also the root of the script directories
pub const CONF_PATH: &str = "/etc/network-broker";

/// Default configuration file
pub const CONF_FILE: &str = "/etc/network-broker/network-broker.toml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Space separated link names whose state changes run scripts; empty means all
    pub links: String,
    /// Space separated link names eligible for routing policy rules
    pub routing_policy_rules: String,
    pub use_dns: bool,
    pub use_domain: bool,
    pub use_hostname: bool,
    pub emit_json: bool,
    pub log_level: String,
    /// Event source: systemd-networkd (default) or dhclient
    pub generator: String,
    pub script_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            links: String::new(),
            routing_policy_rules: String::new(),
            use_dns: false,
            use_domain: false,
            use_hostname: false,
            emit_json: true,
            log_level: "info".to_string(),
            generator: String::new(),
            script_dir: CONF_PATH.to_string(),
        }
    }
}

impl AppConfig {
    /// Whether state changes of `link` should run scripts.
    ///
    /// Substring match against the configured list, so `eth1` also matches
    /// a configured `eth10`.
    pub fn link_allowed(&self, link: &str) -> bool {
        self.links.is_empty() || self.links.contains(link)
    }

    /// Whether `link` gets its own routing table and policy rules (substring match)
    pub fn routing_policy_allowed(&self, link: &str) -> bool {
        !link.is_empty() && self.routing_policy_rules.contains(link)
    }

    /// Whether events come from systemd-networkd rather than dhclient
    pub fn use_networkd(&self) -> bool {
        self.generator.is_empty() || self.generator.contains("systemd-networkd")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Unknown log level '{}', expected one of {:?}",
                self.log_level, LOG_LEVELS
            )));
        }

        if self.script_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError("Script directory must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Configuration file named on the command line, or the default one
pub fn config_path(cli: &CliArgs) -> &str {
    cli.config.as_deref().unwrap_or(CONF_FILE)
}

/// Build the effective configuration from file, environment and CLI
pub fn load_configuration(cli: &CliArgs) -> Result<AppConfig, ConfigError> {
    let path = config_path(cli);

    let mut config = AppConfig::default();
    match toml::load_toml_config(path) {
        Ok(file) => config = file.apply_to_config(config),
        // Only an explicitly requested file has to exist
        Err(ConfigError::FileNotFound { .. }) if cli.config.is_none() => {
            debug!("Configuration file '{}' not found, using defaults", path);
        }
        Err(e) => return Err(e),
    }

    let config = env::apply_env_config(config)?;
    let config = cli.apply_to_config(config);
    config.validate()?;

    Ok(config)
}

/// Script directory relative to the configured root
pub fn script_path(config: &AppConfig, dir: &str) -> std::path::PathBuf {
    Path::new(&config.script_dir).join(dir)
}
