//! Source and destination policy rules

use crate::error::RouteError;
use crate::routing::{RouteManager, RuleEntry};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use tracing::debug;

/// Policy rule steering one address into a link table.
/// Exactly one of `from` / `to` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub from: Option<Ipv4Addr>,
    pub to: Option<Ipv4Addr>,
    pub table: u32,
}

impl RoutingRule {
    pub fn from(address: Ipv4Addr, table: u32) -> Self {
        Self {
            from: Some(address),
            to: None,
            table,
        }
    }

    pub fn to(address: Ipv4Addr, table: u32) -> Self {
        Self {
            from: None,
            to: Some(address),
            table,
        }
    }

    pub fn entry(&self) -> RuleEntry {
        let mut entry = RuleEntry::new(self.table);
        entry.source = self.from.map(Ipv4Network::from);
        entry.destination = self.to.map(Ipv4Network::from);
        entry
    }

    /// Install unless an equal rule is already present
    pub async fn add<M: RouteManager>(&self, manager: &M) -> Result<(), RouteError> {
        let entry = self.entry();

        if manager.list_ipv4_rules().await?.contains(&entry) {
            debug!("Routing policy rule {:?} already present", entry);
            return Ok(());
        }

        match manager.add_rule(&entry).await {
            Ok(()) | Err(RouteError::RouteExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn remove<M: RouteManager>(&self, manager: &M) -> Result<(), RouteError> {
        match manager.remove_rule(&self.entry()).await {
            Ok(()) | Err(RouteError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
