//! Route and policy rule reconciliation for a link
//!
//! Installing is not transactional: a failed step is logged and abandoned
//! while earlier steps of the same pass stay in place. The next triggering
//! event converges the rest.

use crate::error::NetworkError;
use crate::network::gateway::resolve_gateway;
use crate::network::{table_for_link, Network, NetworkState, Route, RoutingRule};
use crate::routing::RouteManager;
use ipnetwork::Ipv4Network;
use std::collections::HashMap;
use tracing::{debug, info, warn};

impl<M: RouteManager> Network<M> {
    /// Install the link's default route and the policy rules for every
    /// IPv4 address it currently has.
    pub async fn configure_network(&self, link: &str) -> Result<(), NetworkError> {
        let mut state = self.lock().await;

        let index = *state
            .links_by_name
            .get(link)
            .ok_or_else(|| NetworkError::LinkNotFound { link: link.to_string() })?;

        let route = self.install_route(&mut state, index).await?;

        let addresses = self.manager.list_ipv4_addresses(index).await.map_err(|e| {
            warn!("Failed to fetch IP addresses of link='{}' ifindex='{}': {}", link, index, e);
            NetworkError::from(e)
        })?;

        let multi_homed = self.is_multi_homed().await;
        for address in &addresses {
            self.install_address_rules(&mut state, &route, address, multi_homed).await;
        }

        info!(
            "Configured link='{}' ifindex='{}' table='{}' with {} address(es)",
            link,
            index,
            route.table,
            addresses.len()
        );
        Ok(())
    }

    /// Reconcile a single newly added address on a link
    pub async fn configure_address(&self, index: u32, address: &Ipv4Network) -> Result<(), NetworkError> {
        let mut state = self.lock().await;

        if !state.links_by_index.contains_key(&index) {
            return Err(NetworkError::LinkNotFound {
                link: index.to_string(),
            });
        }

        let route = self.install_route(&mut state, index).await?;
        let multi_homed = self.is_multi_homed().await;
        self.install_address_rules(&mut state, &route, address, multi_homed).await;

        Ok(())
    }

    /// Tear down the rules derived from `address` and, once nothing else
    /// references its table, the link's default route.
    pub async fn drop_configuration(&self, index: u32, address: &str) {
        let mut state = self.lock().await;
        let table = table_for_link(index);

        debug!(
            "Dropping routing rules link='{}' ifindex='{}' address='{}'",
            state.links_by_index.get(&index).map(String::as_str).unwrap_or_default(),
            index,
            address
        );

        // The address may have moved to another link since
        if let Some(rule) = take_rule(&mut state.rules_by_address_from, address, table) {
            if let Err(e) = rule.remove(&self.manager).await {
                warn!("Failed to remove routing policy rule 'from' address='{}': {}", address, e);
            }
        }

        if let Some(rule) = take_rule(&mut state.rules_by_address_to, address, table) {
            if let Err(e) = rule.remove(&self.manager).await {
                warn!("Failed to remove routing policy rule 'to' address='{}': {}", address, e);
            }
        }

        self.release_route(&mut state, index).await;
    }

    /// Remove the link's route once no recorded rule points at its table
    async fn release_route(&self, state: &mut NetworkState, index: u32) {
        let Some(table) = state.routes_by_index.get(&index).map(|route| route.table) else {
            return;
        };
        if !state.is_rules_by_table_empty(table) {
            return;
        }

        if let Some(route) = state.routes_by_index.remove(&index) {
            debug!(
                "Dropping gateway='{}' ifindex='{}' table='{}'",
                route.gateway, index, route.table
            );
            if let Err(e) = route.remove(&self.manager).await {
                warn!("Failed to remove route table='{}' ifindex='{}': {}", route.table, index, e);
            }
        }
    }

    /// A rule displaced from the maps by another link's rule for the same
    /// address is deleted from the kernel, together with its route when
    /// that was the last rule of the table.
    async fn release_displaced_rule(&self, state: &mut NetworkState, displaced: RoutingRule, table: u32) {
        if displaced.table == table {
            return;
        }

        debug!("Address moved from table='{}' to table='{}'", displaced.table, table);
        if let Err(e) = displaced.remove(&self.manager).await {
            warn!("Failed to remove displaced routing policy rule {:?}: {}", displaced, e);
        }

        let owner = state
            .routes_by_index
            .values()
            .find(|route| route.table == displaced.table)
            .map(|route| route.if_index);
        if let Some(owner) = owner {
            self.release_route(state, owner).await;
        }
    }

    async fn install_route(&self, state: &mut NetworkState, index: u32) -> Result<Route, NetworkError> {
        let gateway = resolve_gateway(&self.manager, index).await?;
        let route = Route::new(index, gateway);

        if let Some(stale) = state.routes_by_index.get(&index).filter(|r| **r != route) {
            debug!("Gateway of ifindex='{}' moved from '{}' to '{}'", index, stale.gateway, gateway);
            if let Err(e) = stale.remove(&self.manager).await {
                warn!("Failed to remove stale route table='{}': {}", stale.table, e);
            }
        }

        route.add(&self.manager).await.map_err(|e| {
            warn!(
                "Failed to add default gateway='{}' ifindex='{}' table='{}': {}",
                gateway, index, route.table, e
            );
            NetworkError::from(e)
        })?;

        debug!("Added default gateway='{}' ifindex='{}' table='{}'", gateway, index, route.table);
        state.routes_by_index.insert(index, route.clone());

        Ok(route)
    }

    /// Policy rules only matter once the host has more than two links
    /// (loopback included); a single-homed host keeps its main table.
    async fn is_multi_homed(&self) -> bool {
        match self.manager.list_links().await {
            Ok(links) => links.len() > 2,
            Err(e) => {
                warn!("Failed to list links: {}", e);
                false
            }
        }
    }

    async fn install_address_rules(
        &self,
        state: &mut NetworkState,
        route: &Route,
        address: &Ipv4Network,
        multi_homed: bool,
    ) {
        if !multi_homed {
            debug!("Skipping routing policy rules for address='{}': single-homed host", address);
            return;
        }

        let key = address.to_string();

        let from = RoutingRule::from(address.ip(), route.table);
        match from.add(&self.manager).await {
            Ok(()) => {
                debug!("Added routing policy rule 'from' address='{}' table='{}'", key, route.table);
                if let Some(displaced) = state.rules_by_address_from.insert(key.clone(), from) {
                    self.release_displaced_rule(state, displaced, route.table).await;
                }
            }
            Err(e) => warn!("Failed to add routing policy rule 'from' address='{}': {}", key, e),
        }

        let to = RoutingRule::to(address.ip(), route.table);
        match to.add(&self.manager).await {
            Ok(()) => {
                debug!("Added routing policy rule 'to' address='{}' table='{}'", key, route.table);
                if let Some(displaced) = state.rules_by_address_to.insert(key, to) {
                    self.release_displaced_rule(state, displaced, route.table).await;
                }
            }
            Err(e) => warn!("Failed to add routing policy rule 'to' address='{}': {}", key, e),
        }
    }
}

fn take_rule(rules: &mut HashMap<String, RoutingRule>, address: &str, table: u32) -> Option<RoutingRule> {
    if rules.get(address)?.table != table {
        return None;
    }
    rules.remove(address)
}
