//! System bus clients for systemd-resolved and systemd-hostnamed

use crate::error::BusError;
use std::net::Ipv4Addr;
use tracing::debug;

/// `AF_INET`, the address family tag resolved expects for IPv4 servers
const AF_INET: i32 = 2;

#[zbus::proxy(
    interface = "org.freedesktop.resolve1.Manager",
    default_service = "org.freedesktop.resolve1",
    default_path = "/org/freedesktop/resolve1"
)]
trait Resolve {
    #[zbus(name = "SetLinkDNS")]
    fn set_link_dns(&self, ifindex: i32, addresses: &[(i32, Vec<u8>)]) -> zbus::Result<()>;

    fn set_link_domains(&self, ifindex: i32, domains: &[(String, bool)]) -> zbus::Result<()>;
}

#[zbus::proxy(
    interface = "org.freedesktop.hostname1",
    default_service = "org.freedesktop.hostname1",
    default_path = "/org/freedesktop/hostname1"
)]
trait Hostname {
    fn set_static_hostname(&self, hostname: &str, interactive: bool) -> zbus::Result<()>;
}

/// DNS server records in resolved's `a(iay)` form
pub fn dns_server_records(servers: &[Ipv4Addr]) -> Vec<(i32, Vec<u8>)> {
    servers.iter().map(|ip| (AF_INET, ip.octets().to_vec())).collect()
}

/// Search domain records in resolved's `a(sb)` form
pub fn domain_records(domains: &[String]) -> Vec<(String, bool)> {
    domains.iter().map(|domain| (domain.clone(), true)).collect()
}

fn call_failed(method: &str) -> impl FnOnce(zbus::Error) -> BusError + '_ {
    move |e| BusError::CallFailed {
        method: method.to_string(),
        reason: e.to_string(),
    }
}

/// Shared system bus connection
#[derive(Clone)]
pub struct SystemBus {
    connection: zbus::Connection,
}

impl SystemBus {
    pub async fn connect() -> Result<Self, BusError> {
        let connection = zbus::Connection::system()
            .await
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &zbus::Connection {
        &self.connection
    }

    /// Hand the lease's DNS servers to resolved for one link
    pub async fn set_link_dns(&self, index: u32, servers: &[Ipv4Addr]) -> Result<(), BusError> {
        debug!("Setting DNS servers ifindex='{}' servers={:?}", index, servers);

        let proxy = ResolveProxy::new(&self.connection)
            .await
            .map_err(call_failed("SetLinkDNS"))?;
        proxy
            .set_link_dns(ifindex(index)?, &dns_server_records(servers))
            .await
            .map_err(call_failed("SetLinkDNS"))?;

        debug!("Successfully set DNS servers ifindex='{}'", index);
        Ok(())
    }

    pub async fn set_link_domains(&self, index: u32, domains: &[String]) -> Result<(), BusError> {
        debug!("Setting DNS domains ifindex='{}' domains={:?}", index, domains);

        let proxy = ResolveProxy::new(&self.connection)
            .await
            .map_err(call_failed("SetLinkDomains"))?;
        proxy
            .set_link_domains(ifindex(index)?, &domain_records(domains))
            .await
            .map_err(call_failed("SetLinkDomains"))?;

        debug!("Successfully set DNS domains ifindex='{}'", index);
        Ok(())
    }

    pub async fn set_hostname(&self, hostname: &str) -> Result<(), BusError> {
        let (hostname, interactive) = hostname_request(hostname)?;

        debug!("Setting hostname='{}'", hostname);

        let proxy = HostnameProxy::new(&self.connection)
            .await
            .map_err(call_failed("SetStaticHostname"))?;
        proxy
            .set_static_hostname(hostname, interactive)
            .await
            .map_err(call_failed("SetStaticHostname"))?;

        Ok(())
    }
}

/// `SetStaticHostname` arguments. Interactive so hostnamed may ask polkit.
fn hostname_request(hostname: &str) -> Result<(&str, bool), BusError> {
    if hostname.is_empty() {
        return Err(BusError::InvalidPayload("empty hostname".to_string()));
    }
    Ok((hostname, true))
}

fn ifindex(index: u32) -> Result<i32, BusError> {
    i32::try_from(index).map_err(|_| BusError::InvalidPayload(format!("ifindex {} out of range", index)))
}
