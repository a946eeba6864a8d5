//! dhclient lease file parser

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Default dhclient lease database
pub const DHCLIENT_LEASE_FILE: &str = "/var/lib/dhclient/dhclient.leases";

/// One `lease { ... }` block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lease {
    pub interface: String,
    pub address: String,
    pub subnet_mask: String,
    pub routers: String,
    pub server: String,
    pub hostname: String,
    pub dns: Vec<String>,
    pub domain: Vec<String>,
    pub domain_search: Vec<String>,
}

impl Lease {
    /// DNS servers that parse as IPv4 addresses
    pub fn dns_servers(&self) -> Vec<Ipv4Addr> {
        self.dns.iter().filter_map(|s| s.trim().parse().ok()).collect()
    }

    /// Value of the `DHCP_LEASE` script variable
    pub fn to_env_value(&self) -> String {
        format!(
            "ADDRESS={},DNS={},ROUTER={},SUBNETMASK={},DOMAIN={}",
            self.address,
            self.dns.join(","),
            self.routers,
            self.subnet_mask,
            self.domain.join(",")
        )
    }
}

/// Parse a lease database. Later blocks for the same interface win.
pub fn parse_leases(content: &str) -> HashMap<String, Lease> {
    let mut leases = HashMap::new();
    let mut current: Option<Lease> = None;

    for line in content.lines().map(str::trim) {
        if line.starts_with("lease") && line.ends_with('{') {
            current = Some(Lease::default());
            continue;
        }

        if line.starts_with('}') {
            if let Some(lease) = current.take() {
                if !lease.interface.is_empty() {
                    leases.insert(lease.interface.clone(), lease);
                }
            }
            continue;
        }

        let Some(lease) = current.as_mut() else {
            continue;
        };
        let line = line.trim_end_matches(';');

        if let Some(rest) = line.strip_prefix("interface ") {
            lease.interface = unquote(rest);
        } else if let Some(rest) = line.strip_prefix("fixed-address ") {
            lease.address = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("option ") {
            parse_option(lease, rest);
        }
    }

    leases
}

fn parse_option(lease: &mut Lease, option: &str) {
    let (name, value) = match option.split_once(char::is_whitespace) {
        Some((name, value)) => (name, value.trim()),
        None => return,
    };

    match name {
        "subnet-mask" => lease.subnet_mask = value.to_string(),
        "routers" => lease.routers = value.to_string(),
        "dhcp-server-identifier" => lease.server = value.to_string(),
        "domain-name-servers" => lease.dns = split_list(value),
        "domain-name" => lease.domain = quoted_list(value),
        "domain-search" => lease.domain_search = quoted_list(value),
        "host-name" => lease.hostname = unquote(value),
        _ => {}
    }
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// `"a.example" "b.example"` or `"a.example", "b.example"`
fn quoted_list(value: &str) -> Vec<String> {
    value
        .split('"')
        .map(|s| s.trim().trim_matches(',').trim())
        .filter(|s| !s.is_empty())
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASES: &str = r#"
lease {
  interface "eth1";
  fixed-address 10.0.0.7;
  option subnet-mask 255.255.255.0;
  option routers 10.0.0.254;
  option dhcp-lease-time 600;
  renew 2 2024/01/02 10:00:00;
}
lease {
  interface "eth1";
  fixed-address 10.0.0.2;
  option subnet-mask 255.255.255.0;
  option routers 10.0.0.1;
  option dhcp-server-identifier 10.0.0.1;
  option domain-name-servers 10.0.0.53,1.1.1.1;
  option domain-name "example.com corp.example";
  option domain-search "example.com", "lab.example";
  option host-name "node-1";
}
lease {
  interface "eth2";
  fixed-address 192.168.50.9;
  option domain-name-servers 192.168.50.1, bogus;
}
"#;

    #[test]
    fn test_later_lease_wins() {
        let leases = parse_leases(LEASES);
        assert_eq!(leases.len(), 2);

        let lease = &leases["eth1"];
        assert_eq!(lease.address, "10.0.0.2");
        assert_eq!(lease.subnet_mask, "255.255.255.0");
        assert_eq!(lease.routers, "10.0.0.1");
        assert_eq!(lease.server, "10.0.0.1");
        assert_eq!(lease.hostname, "node-1");
        assert_eq!(lease.dns, vec!["10.0.0.53", "1.1.1.1"]);
        assert_eq!(lease.domain, vec!["example.com", "corp.example"]);
        assert_eq!(lease.domain_search, vec!["example.com", "lab.example"]);
    }

    #[test]
    fn test_dns_servers_skip_garbage() {
        let leases = parse_leases(LEASES);

        assert_eq!(leases["eth2"].dns_servers(), vec![Ipv4Addr::new(192, 168, 50, 1)]);
        assert!(leases["eth2"].domain.is_empty());
    }

    #[test]
    fn test_env_value() {
        let leases = parse_leases(LEASES);

        assert_eq!(
            leases["eth1"].to_env_value(),
            "ADDRESS=10.0.0.2,DNS=10.0.0.53,1.1.1.1,ROUTER=10.0.0.1,SUBNETMASK=255.255.255.0,DOMAIN=example.com,corp.example"
        );
    }

    #[test]
    fn test_unterminated_and_empty_input() {
        assert!(parse_leases("").is_empty());
        assert!(parse_leases("lease {\n  interface \"eth1\";\n").is_empty());
        assert!(parse_leases("  option routers 10.0.0.1;\n}\n").is_empty());
    }
}
