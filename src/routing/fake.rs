//! In-memory kernel used by unit tests

use crate::error::RouteError;
use crate::routing::{LinkEntry, RouteEntry, RouteManager, RuleEntry};
use ipnetwork::Ipv4Network;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct KernelState {
    links: Vec<LinkEntry>,
    addresses: HashMap<u32, Vec<Ipv4Network>>,
    main_routes: Vec<RouteEntry>,
    installed_routes: Vec<RouteEntry>,
    rules: Vec<RuleEntry>,
    fail_rule_adds: bool,
    fail_route_adds: bool,
}

/// Fake kernel with the add/delete semantics of the real one:
/// duplicates are rejected with `RouteExists`, missing objects with `NotFound`.
#[derive(Debug, Default)]
pub struct FakeRouteManager {
    state: Mutex<KernelState>,
}

impl FakeRouteManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_links(links: &[(u32, &str)]) -> Self {
        let fake = Self::new();
        for (index, name) in links {
            fake.add_link(*index, name);
        }
        fake
    }

    pub fn add_link(&self, index: u32, name: &str) {
        self.state.lock().unwrap().links.push(LinkEntry {
            index,
            name: name.to_string(),
        });
    }

    pub fn add_address(&self, index: u32, cidr: &str) {
        self.state
            .lock()
            .unwrap()
            .addresses
            .entry(index)
            .or_default()
            .push(cidr.parse().unwrap());
    }

    pub fn add_main_route(&self, destination: &str, gateway: Option<&str>, oif: u32) {
        self.state.lock().unwrap().main_routes.push(RouteEntry {
            destination: destination.parse().unwrap(),
            gateway: gateway.map(|gw| gw.parse().unwrap()),
            oif: Some(oif),
            table: crate::routing::RT_TABLE_MAIN,
        });
    }

    pub fn clear_main_routes(&self) {
        self.state.lock().unwrap().main_routes.clear();
    }

    pub fn fail_rule_adds(&self, fail: bool) {
        self.state.lock().unwrap().fail_rule_adds = fail;
    }

    pub fn fail_route_adds(&self, fail: bool) {
        self.state.lock().unwrap().fail_route_adds = fail;
    }

    pub fn installed_routes(&self) -> Vec<RouteEntry> {
        self.state.lock().unwrap().installed_routes.clone()
    }

    pub fn rules(&self) -> Vec<RuleEntry> {
        self.state.lock().unwrap().rules.clone()
    }
}

impl RouteManager for FakeRouteManager {
    async fn list_links(&self) -> Result<Vec<LinkEntry>, RouteError> {
        Ok(self.state.lock().unwrap().links.clone())
    }

    async fn list_ipv4_addresses(&self, index: u32) -> Result<Vec<Ipv4Network>, RouteError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .addresses
            .get(&index)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_ipv4_routes(&self) -> Result<Vec<RouteEntry>, RouteError> {
        Ok(self.state.lock().unwrap().main_routes.clone())
    }

    async fn add_route(&self, route: &RouteEntry) -> Result<(), RouteError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_route_adds {
            return Err(RouteError::AddRoute("Network is unreachable".to_string()));
        }
        if state.installed_routes.contains(route) {
            return Err(RouteError::RouteExists(format!("{:?}", route)));
        }
        state.installed_routes.push(route.clone());
        Ok(())
    }

    async fn remove_route(&self, route: &RouteEntry) -> Result<(), RouteError> {
        let mut state = self.state.lock().unwrap();
        let before = state.installed_routes.len();
        state.installed_routes.retain(|r| r != route);
        if state.installed_routes.len() == before {
            return Err(RouteError::NotFound(format!("{:?}", route)));
        }
        Ok(())
    }

    async fn list_ipv4_rules(&self) -> Result<Vec<RuleEntry>, RouteError> {
        Ok(self.rules())
    }

    async fn add_rule(&self, rule: &RuleEntry) -> Result<(), RouteError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_rule_adds {
            return Err(RouteError::AddRule("Operation not permitted".to_string()));
        }
        if state.rules.contains(rule) {
            return Err(RouteError::RouteExists(format!("{:?}", rule)));
        }
        state.rules.push(rule.clone());
        Ok(())
    }

    async fn remove_rule(&self, rule: &RuleEntry) -> Result<(), RouteError> {
        let mut state = self.state.lock().unwrap();
        let before = state.rules.len();
        state.rules.retain(|r| r != rule);
        if state.rules.len() == before {
            return Err(RouteError::NotFound(format!("{:?}", rule)));
        }
        Ok(())
    }
}
