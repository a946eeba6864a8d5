//! Per-link default routes

use crate::error::RouteError;
use crate::network::table_for_link;
use crate::routing::{RouteEntry, RouteManager};
use std::net::Ipv4Addr;

/// Default route programmed into a link's dedicated table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub table: u32,
    pub if_index: u32,
    pub gateway: Ipv4Addr,
}

impl Route {
    pub fn new(if_index: u32, gateway: Ipv4Addr) -> Self {
        Self {
            table: table_for_link(if_index),
            if_index,
            gateway,
        }
    }

    pub fn entry(&self) -> RouteEntry {
        RouteEntry::default_via(self.gateway, self.if_index, self.table)
    }

    /// Install into the kernel; an existing identical route counts as success
    pub async fn add<M: RouteManager>(&self, manager: &M) -> Result<(), RouteError> {
        match manager.add_route(&self.entry()).await {
            Ok(()) | Err(RouteError::RouteExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove from the kernel; an already missing route counts as success
    pub async fn remove<M: RouteManager>(&self, manager: &M) -> Result<(), RouteError> {
        match manager.remove_route(&self.entry()).await {
            Ok(()) | Err(RouteError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
