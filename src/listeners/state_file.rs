//! systemd-networkd runtime state and lease files

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Per-link state files, named by ifindex
pub const NETWORKD_LINK_STATE_DIR: &str = "/run/systemd/netif/links";

/// Per-link DHCP lease files, named by ifindex
pub const NETWORKD_LEASE_DIR: &str = "/run/systemd/netif/leases";

/// Parsed `KEY=VALUE` state file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateFile {
    values: HashMap<String, String>,
}

impl StateFile {
    pub fn parse(content: &str) -> Self {
        let values = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();

        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Space separated list value; empty when the key is missing
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn operational_state(&self) -> Option<&str> {
        self.get("OPER_STATE")
    }

    pub fn carrier_state(&self) -> Option<&str> {
        self.get("CARRIER_STATE")
    }

    pub fn address_state(&self) -> Option<&str> {
        self.get("ADDRESS_STATE")
    }

    pub fn online_state(&self) -> Option<&str> {
        self.get("ONLINE_STATE")
    }

    pub fn setup_state(&self) -> Option<&str> {
        self.get("ADMIN_STATE")
    }
}

/// Location of networkd's runtime files
#[derive(Debug, Clone)]
pub struct NetworkdPaths {
    pub link_state_dir: PathBuf,
    pub lease_dir: PathBuf,
}

impl Default for NetworkdPaths {
    fn default() -> Self {
        Self {
            link_state_dir: PathBuf::from(NETWORKD_LINK_STATE_DIR),
            lease_dir: PathBuf::from(NETWORKD_LEASE_DIR),
        }
    }
}

impl NetworkdPaths {
    pub async fn read_link_state(&self, index: u32) -> io::Result<StateFile> {
        let content = tokio::fs::read_to_string(self.link_state_dir.join(index.to_string())).await?;
        Ok(StateFile::parse(&content))
    }

    /// Lease file content as one line, `None` without a lease
    pub async fn read_lease(&self, index: u32) -> Option<String> {
        read_joined_lines(&self.lease_dir.join(index.to_string())).await
    }
}

async fn read_joined_lines(path: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let joined = join_lease_lines(&content);
    (!joined.is_empty()).then_some(joined)
}

/// Non-comment lines joined by single spaces
pub fn join_lease_lines(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LINK_STATE: &str = "# This is private data. Do not parse.\n\
        ADMIN_STATE=configured\n\
        OPER_STATE=routable\n\
        CARRIER_STATE=carrier\n\
        ADDRESS_STATE=routable\n\
        ONLINE_STATE=online\n\
        NETWORK_FILE=/etc/systemd/network/10-eth1.network\n\
        DNS=10.0.0.53 1.1.1.1\n";

    #[test]
    fn test_parse_link_state() {
        let state = StateFile::parse(LINK_STATE);

        assert_eq!(state.operational_state(), Some("routable"));
        assert_eq!(state.carrier_state(), Some("carrier"));
        assert_eq!(state.address_state(), Some("routable"));
        assert_eq!(state.online_state(), Some("online"));
        assert_eq!(state.setup_state(), Some("configured"));
        assert_eq!(state.get("NETWORK_FILE"), Some("/etc/systemd/network/10-eth1.network"));
        assert_eq!(state.list("DNS"), vec!["10.0.0.53", "1.1.1.1"]);
        assert!(state.list("NTP").is_empty());
    }

    #[test]
    fn test_join_lease_lines() {
        let lease = "# comment\nADDRESS=10.0.0.2\nNETMASK=255.255.255.0\nROUTER=10.0.0.1";
        assert_eq!(
            join_lease_lines(lease),
            "ADDRESS=10.0.0.2 NETMASK=255.255.255.0 ROUTER=10.0.0.1"
        );
    }

    #[tokio::test]
    async fn test_read_files() {
        let links = TempDir::new().unwrap();
        let leases = TempDir::new().unwrap();
        std::fs::write(links.path().join("5"), LINK_STATE).unwrap();
        std::fs::write(leases.path().join("5"), "# header\nADDRESS=10.0.0.2\n").unwrap();

        let paths = NetworkdPaths {
            link_state_dir: links.path().to_path_buf(),
            lease_dir: leases.path().to_path_buf(),
        };

        let state = paths.read_link_state(5).await.unwrap();
        assert_eq!(state.operational_state(), Some("routable"));
        assert_eq!(paths.read_lease(5).await.as_deref(), Some("ADDRESS=10.0.0.2"));

        assert!(paths.read_link_state(6).await.is_err());
        assert_eq!(paths.read_lease(6).await, None);
    }
}
