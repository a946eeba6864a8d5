//! Command-line argument parsing

use crate::config::AppConfig;
use clap::Parser;

/// Command-line arguments structure
#[derive(Parser, Debug, Default)]
#[command(name = "network-broker")]
#[command(about = "Network event broker: policy routing for secondary links and link state hook scripts")]
#[command(version)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, help = "Path to TOML configuration file")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, help = "Set the logging level")]
    pub log_level: Option<String>,

    /// Links whose state changes run scripts
    #[arg(long, help = "Space separated link names whose state changes run scripts")]
    pub links: Option<String>,

    /// Links eligible for routing policy rules
    #[arg(long, help = "Space separated link names that get a routing table and policy rules")]
    pub routing_policy_rules: Option<String>,

    /// Event source
    #[arg(long, help = "Event source: systemd-networkd or dhclient")]
    pub generator: Option<String>,

    /// Script root directory
    #[arg(long, help = "Directory holding the <state>.d script directories")]
    pub script_dir: Option<String>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit without starting the service")]
    pub validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    pub print_default_config: bool,
}

impl CliArgs {
    /// Apply CLI arguments over base configuration
    pub fn apply_to_config(&self, mut base_config: AppConfig) -> AppConfig {
        if let Some(ref level) = self.log_level {
            base_config.log_level = level.clone();
        }

        if let Some(ref links) = self.links {
            base_config.links = links.clone();
        }

        if let Some(ref links) = self.routing_policy_rules {
            base_config.routing_policy_rules = links.clone();
        }

        if let Some(ref generator) = self.generator {
            base_config.generator = generator.clone();
        }

        if let Some(ref dir) = self.script_dir {
            base_config.script_dir = dir.clone();
        }

        base_config
    }
}

/// Default configuration in TOML format
pub fn default_config_toml() -> String {
    let config = AppConfig::default();

    format!(
        "# Network Broker Configuration\n\
         \n\
         [System]\n\
         # Log level: trace, debug, info, warn, error\n\
         LogLevel = \"{}\"\n\
         # Event source: systemd-networkd or dhclient\n\
         Generator = \"{}\"\n\
         # Root of the <state>.d script directories\n\
         ScriptDir = \"{}\"\n\
         \n\
         [Network]\n\
         # Space separated links whose state changes run scripts (empty: all)\n\
         Links = \"{}\"\n\
         # Space separated links that get a routing table and policy rules\n\
         RoutingPolicyRules = \"{}\"\n\
         UseDNS = {}\n\
         UseDomain = {}\n\
         UseHostname = {}\n\
         EmitJSON = {}\n",
        config.log_level,
        config.generator,
        config.script_dir,
        config.links,
        config.routing_policy_rules,
        config.use_dns,
        config.use_domain,
        config.use_hostname,
        config.emit_json,
    )
}

/// Print default configuration in TOML format
pub fn print_default_config() {
    print!("{}", default_config_toml());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::toml::parse_toml_config;

    #[test]
    fn test_cli_args_parsing() {
        let args = CliArgs::try_parse_from([
            "network-broker",
            "--config",
            "/etc/network-broker/custom.toml",
            "--log-level",
            "debug",
            "--links",
            "eth0 eth1",
            "--routing-policy-rules",
            "eth1",
            "--generator",
            "dhclient",
            "--script-dir",
            "/opt/broker",
            "--validate-config",
        ])
        .unwrap();

        assert_eq!(args.config, Some("/etc/network-broker/custom.toml".to_string()));
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert_eq!(args.links, Some("eth0 eth1".to_string()));
        assert_eq!(args.routing_policy_rules, Some("eth1".to_string()));
        assert_eq!(args.generator, Some("dhclient".to_string()));
        assert_eq!(args.script_dir, Some("/opt/broker".to_string()));
        assert!(args.validate_config);
        assert!(!args.print_default_config);
    }

    #[test]
    fn test_cli_args_minimal() {
        let args = CliArgs::try_parse_from(["network-broker"]).unwrap();

        assert_eq!(args.config, None);
        assert_eq!(args.log_level, None);
        assert_eq!(args.links, None);
        assert_eq!(args.routing_policy_rules, None);
        assert!(!args.validate_config);
        assert!(!args.print_default_config);
    }

    #[test]
    fn test_apply_cli_to_config() {
        let args = CliArgs {
            log_level: Some("trace".to_string()),
            routing_policy_rules: Some("wlan0".to_string()),
            ..CliArgs::default()
        };

        let config = args.apply_to_config(AppConfig::default());

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.routing_policy_rules, "wlan0");
        assert_eq!(config.links, "");
        assert_eq!(config.script_dir, "/etc/network-broker");
    }

    #[test]
    fn test_apply_cli_to_config_no_overrides() {
        let base_config = AppConfig::default();
        let config = CliArgs::default().apply_to_config(base_config.clone());

        assert_eq!(config, base_config);
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = parse_toml_config(&default_config_toml())
            .unwrap()
            .apply_to_config(AppConfig::default());

        assert_eq!(config, AppConfig::default());
    }
}
