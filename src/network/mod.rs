//! Network state tracking module
//!
//! Mirrors the kernel's links together with the per-link routes and policy
//! rules this daemon programmed. All of it lives in one [`NetworkState`]
//! behind a single lock: a link removal and an address event for the same
//! index must never interleave.

use crate::routing::RouteManager;
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

pub mod gateway;
pub mod link;
pub mod reconciler;
pub mod route;
pub mod rule;
pub mod watcher;

pub use link::LinkUpdate;
pub use route::Route;
pub use rule::RoutingRule;
pub use watcher::{AddressUpdate, KernelWatcher};

/// First routing table id handed out; link `i` owns table `ROUTE_TABLE_BASE + i`
pub const ROUTE_TABLE_BASE: u32 = 9999;

/// Routing table dedicated to the link with the given index
pub fn table_for_link(index: u32) -> u32 {
    ROUTE_TABLE_BASE + index
}

/// Links, routes and policy rules known to the daemon
#[derive(Debug, Default)]
pub struct NetworkState {
    pub(crate) links_by_name: HashMap<String, u32>,
    pub(crate) links_by_index: HashMap<u32, String>,
    pub(crate) routes_by_index: HashMap<u32, Route>,
    pub(crate) rules_by_address_from: HashMap<String, RoutingRule>,
    pub(crate) rules_by_address_to: HashMap<String, RoutingRule>,
}

impl NetworkState {
    /// True when no recorded rule points at `table`
    pub(crate) fn is_rules_by_table_empty(&self, table: u32) -> bool {
        !self
            .rules_by_address_from
            .values()
            .chain(self.rules_by_address_to.values())
            .any(|rule| rule.table == table)
    }
}

/// Shared network tracker
pub struct Network<M: RouteManager> {
    manager: M,
    state: Mutex<NetworkState>,
}

impl<M: RouteManager> Network<M> {
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            state: Mutex::new(NetworkState::default()),
        }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().await
    }

    /// Name of the link with the given index
    pub async fn link_name(&self, index: u32) -> Option<String> {
        self.lock().await.links_by_index.get(&index).cloned()
    }

    /// Index of the link with the given name
    pub async fn link_index(&self, name: &str) -> Option<u32> {
        self.lock().await.links_by_name.get(name).copied()
    }

    /// Known links ordered by index
    pub async fn links(&self) -> Vec<(u32, String)> {
        let state = self.lock().await;
        let mut links: Vec<_> = state
            .links_by_index
            .iter()
            .map(|(index, name)| (*index, name.clone()))
            .collect();
        links.sort();
        links
    }

    pub async fn route(&self, index: u32) -> Option<Route> {
        self.lock().await.routes_by_index.get(&index).cloned()
    }

    pub async fn rule_from(&self, address: &str) -> Option<RoutingRule> {
        self.lock().await.rules_by_address_from.get(address).cloned()
    }

    pub async fn rule_to(&self, address: &str) -> Option<RoutingRule> {
        self.lock().await.rules_by_address_to.get(address).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_table_for_link() {
        assert_eq!(table_for_link(5), 10004);
        assert_eq!(table_for_link(1), 10000);
    }

    #[test]
    fn test_rules_by_table_empty() {
        let mut state = NetworkState::default();
        assert!(state.is_rules_by_table_empty(10004));

        state
            .rules_by_address_to
            .insert("10.0.0.2/24".to_string(), RoutingRule::to(Ipv4Addr::new(10, 0, 0, 2), 10004));
        assert!(!state.is_rules_by_table_empty(10004));
        assert!(state.is_rules_by_table_empty(10005));
    }
}
