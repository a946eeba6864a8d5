//! Kernel routing table management module
//!
//! Handles link, address, route and policy rule operations against the
//! kernel routing netlink interface.

use crate::error::RouteError;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

#[cfg(test)]
pub mod fake;
pub mod manager;

pub use manager::{subscribe, RtNetlinkRouteManager, Subscription};

/// Main routing table id
pub const RT_TABLE_MAIN: u32 = 254;

/// Kernel interface as reported by a link dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub index: u32,
    pub name: String,
}

/// IPv4 route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Network,
    pub gateway: Option<Ipv4Addr>,
    pub oif: Option<u32>,
    pub table: u32,
}

impl RouteEntry {
    /// Default route through `gateway` on link `oif` in `table`
    pub fn default_via(gateway: Ipv4Addr, oif: u32, table: u32) -> Self {
        Self {
            destination: default_destination(),
            gateway: Some(gateway),
            oif: Some(oif),
            table,
        }
    }

    pub fn is_default(&self) -> bool {
        self.destination.prefix() == 0
    }
}

/// IPv4 routing policy rule.
///
/// Two rules are the same kernel rule when table, source, destination and
/// both interface names match, which is exactly the derived equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub table: u32,
    pub source: Option<Ipv4Network>,
    pub destination: Option<Ipv4Network>,
    pub iif_name: Option<String>,
    pub oif_name: Option<String>,
}

impl RuleEntry {
    pub fn new(table: u32) -> Self {
        Self {
            table,
            source: None,
            destination: None,
            iif_name: None,
            oif_name: None,
        }
    }
}

fn default_destination() -> Ipv4Network {
    // prefix 0 never fails validation
    Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap_or_else(|_| Ipv4Network::from(Ipv4Addr::UNSPECIFIED))
}

/// Route manager trait
pub trait RouteManager: Send + Sync + 'static {
    fn list_links(&self) -> impl std::future::Future<Output = Result<Vec<LinkEntry>, RouteError>> + Send;
    fn list_ipv4_addresses(
        &self,
        index: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Ipv4Network>, RouteError>> + Send;
    /// Routes of the main table
    fn list_ipv4_routes(&self) -> impl std::future::Future<Output = Result<Vec<RouteEntry>, RouteError>> + Send;
    fn add_route(&self, route: &RouteEntry) -> impl std::future::Future<Output = Result<(), RouteError>> + Send;
    fn remove_route(&self, route: &RouteEntry) -> impl std::future::Future<Output = Result<(), RouteError>> + Send;
    fn list_ipv4_rules(&self) -> impl std::future::Future<Output = Result<Vec<RuleEntry>, RouteError>> + Send;
    fn add_rule(&self, rule: &RuleEntry) -> impl std::future::Future<Output = Result<(), RouteError>> + Send;
    fn remove_rule(&self, rule: &RuleEntry) -> impl std::future::Future<Output = Result<(), RouteError>> + Send;
}
