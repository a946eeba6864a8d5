//! Environment variable configuration handling

use crate::config::AppConfig;
use crate::error::ConfigError;
use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "NETWORK_BROKER_";

/// Apply environment variable configuration over base configuration
pub fn apply_env_config(base_config: AppConfig) -> Result<AppConfig, ConfigError> {
    apply_env_lookup(base_config, |key| env::var(format!("{}{}", ENV_PREFIX, key)).ok())
}

/// Apply overrides from any key lookup; keys are given without the prefix
pub fn apply_env_lookup<F>(mut base_config: AppConfig, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(links) = lookup("LINKS") {
        base_config.links = links;
    }

    if let Some(links) = lookup("ROUTING_POLICY_RULES") {
        base_config.routing_policy_rules = links;
    }

    if let Some(level) = lookup("LOG_LEVEL") {
        base_config.log_level = level;
    }

    if let Some(generator) = lookup("GENERATOR") {
        base_config.generator = generator;
    }

    if let Some(dir) = lookup("SCRIPT_DIR") {
        base_config.script_dir = dir;
    }

    if let Some(v) = lookup("USE_DNS") {
        base_config.use_dns = parse_bool("USE_DNS", &v)?;
    }

    if let Some(v) = lookup("USE_DOMAIN") {
        base_config.use_domain = parse_bool("USE_DOMAIN", &v)?;
    }

    if let Some(v) = lookup("USE_HOSTNAME") {
        base_config.use_hostname = parse_bool("USE_HOSTNAME", &v)?;
    }

    if let Some(v) = lookup("EMIT_JSON") {
        base_config.emit_json = parse_bool("EMIT_JSON", &v)?;
    }

    Ok(base_config)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidFormat(format!(
            "Invalid boolean '{}' for {}{}",
            other, ENV_PREFIX, key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_apply_env_config() {
        let lookup = lookup_from(&[
            ("LINKS", "eth0 eth1"),
            ("ROUTING_POLICY_RULES", "eth1"),
            ("LOG_LEVEL", "debug"),
            ("GENERATOR", "dhclient"),
            ("SCRIPT_DIR", "/tmp/broker"),
            ("USE_DNS", "yes"),
            ("EMIT_JSON", "0"),
        ]);

        let config = apply_env_lookup(AppConfig::default(), lookup).unwrap();

        assert_eq!(config.links, "eth0 eth1");
        assert_eq!(config.routing_policy_rules, "eth1");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.generator, "dhclient");
        assert_eq!(config.script_dir, "/tmp/broker");
        assert!(config.use_dns);
        assert!(!config.use_domain);
        assert!(!config.emit_json);
    }

    #[test]
    fn test_apply_env_config_no_vars() {
        let base_config = AppConfig::default();
        let config = apply_env_lookup(base_config.clone(), lookup_from(&[])).unwrap();

        assert_eq!(config, base_config);
    }

    #[test]
    fn test_invalid_bool() {
        let result = apply_env_lookup(AppConfig::default(), lookup_from(&[("USE_HOSTNAME", "sometimes")]));
        assert!(matches!(result, Err(ConfigError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(parse_bool("X", " on ").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "").is_err());
    }
}
