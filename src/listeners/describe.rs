//! Link describe document handed to scripts as `JSON`

use crate::error::BusError;
use crate::listeners::state_file::NetworkdPaths;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[zbus::proxy(
    interface = "org.freedesktop.network1.Manager",
    default_service = "org.freedesktop.network1",
    default_path = "/org/freedesktop/network1"
)]
trait NetworkdManager {
    fn describe(&self) -> zbus::Result<String>;
}

/// One interface as described by systemd-networkd
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LinkDescribe {
    pub index: u32,
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: String,
    pub alternative_names: Vec<String>,
    pub address_state: String,
    #[serde(rename = "IPv4AddressState")]
    pub ipv4_address_state: String,
    #[serde(rename = "IPv6AddressState")]
    pub ipv6_address_state: String,
    pub carrier_state: String,
    pub online_state: String,
    pub operational_state: String,
    pub setup_state: String,
    pub driver: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network_file: String,
    #[serde(rename = "DNS")]
    pub dns: Vec<String>,
    pub domains: Vec<String>,
    #[serde(rename = "NTP")]
    pub ntp: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LinksDescribe {
    pub interfaces: Vec<LinkDescribe>,
}

impl LinksDescribe {
    pub fn parse(json: &str) -> Result<Self, BusError> {
        serde_json::from_str(json).map_err(|e| BusError::InvalidPayload(e.to_string()))
    }

    pub fn take(self, name: &str) -> Option<LinkDescribe> {
        self.interfaces.into_iter().find(|link| link.name == name)
    }
}

/// Ask networkd to describe every link
pub async fn describe_links(connection: &zbus::Connection) -> Result<LinksDescribe, BusError> {
    let call_failed = |e: zbus::Error| BusError::CallFailed {
        method: "Describe".to_string(),
        reason: e.to_string(),
    };

    let proxy = NetworkdManagerProxy::new(connection).await.map_err(call_failed)?;
    let json = proxy.describe().await.map_err(call_failed)?;

    LinksDescribe::parse(&json)
}

/// Build the document from networkd's state file when the bus call fails
pub async fn describe_from_state_file(paths: &NetworkdPaths, index: u32, name: &str) -> LinkDescribe {
    let mut link = LinkDescribe {
        index,
        name: name.to_string(),
        ..LinkDescribe::default()
    };

    let state = match paths.read_link_state(index).await {
        Ok(state) => state,
        Err(e) => {
            debug!("No networkd state for link='{}' ifindex='{}': {}", name, index, e);
            return link;
        }
    };

    let get = |key: &str| state.get(key).unwrap_or_default().to_string();
    link.address_state = get("ADDRESS_STATE");
    link.ipv4_address_state = get("IPV4_ADDRESS_STATE");
    link.ipv6_address_state = get("IPV6_ADDRESS_STATE");
    link.carrier_state = get("CARRIER_STATE");
    link.online_state = get("ONLINE_STATE");
    link.operational_state = get("OPER_STATE");
    link.setup_state = get("ADMIN_STATE");
    link.network_file = get("NETWORK_FILE");
    link.dns = state.list("DNS");
    link.domains = state.list("DOMAINS");
    link.ntp = state.list("NTP");

    link
}

/// Describe one link, preferring the bus
pub async fn describe_link(
    connection: Option<&zbus::Connection>,
    paths: &NetworkdPaths,
    index: u32,
    name: &str,
) -> LinkDescribe {
    if let Some(connection) = connection {
        match describe_links(connection).await {
            Ok(links) => {
                if let Some(link) = links.take(name) {
                    return link;
                }
                debug!("Link='{}' missing from networkd Describe reply", name);
            }
            Err(e) => debug!("Falling back to state file for link='{}': {}", name, e),
        }
    }

    describe_from_state_file(paths, index, name).await
}
