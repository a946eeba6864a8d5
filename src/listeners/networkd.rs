//! systemd-networkd `PropertiesChanged` listener
//!
//! Signals are decoded into [`NetworkdSignal`] as soon as they arrive and
//! each one is handled in its own task. Two signals for the same link may
//! therefore be handled concurrently and in either order.

use crate::bus::SystemBus;
use crate::config::AppConfig;
use crate::error::BusError;
use crate::listeners::describe::describe_link;
use crate::listeners::link_env;
use crate::listeners::state_file::NetworkdPaths;
use crate::network::watcher::{Backoff, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY};
use crate::network::Network;
use crate::routing::RouteManager;
use crate::scripts::{state_dir, ScriptRunner, MANAGER_STATE_DIR, ROUTES_MODIFIED_DIR};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use zbus::zvariant::{OwnedValue, Value};

const NETWORKD_SERVICE: &str = "org.freedesktop.network1";
const NETWORKD_LINK_INTERFACE: &str = "org.freedesktop.network1.Link";
const NETWORKD_MANAGER_INTERFACE: &str = "org.freedesktop.network1.Manager";
const LINK_PATH_PREFIX: &str = "/org/freedesktop/network1/link/_3";
const DBUS_PROPERTIES: &str = "org.freedesktop.DBus.Properties";

/// Signals queued by the bus connection before it stops reading
const SIGNAL_QUEUE_CAPACITY: usize = 512;

const ROUTABLE: &str = "routable";

/// One changed networkd property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    OperationalState(String),
    CarrierState(String),
    AddressState(String),
    OnlineState(String),
    AdministrativeState(String),
    Other { property: String, value: String },
}

impl StateChange {
    pub fn from_property(property: &str, value: String) -> Self {
        match property {
            "OperationalState" => Self::OperationalState(value),
            "CarrierState" => Self::CarrierState(value),
            "AddressState" => Self::AddressState(value),
            "OnlineState" => Self::OnlineState(value),
            "AdministrativeState" => Self::AdministrativeState(value),
            _ => Self::Other {
                property: property.to_string(),
                value,
            },
        }
    }

    pub fn property(&self) -> &str {
        match self {
            Self::OperationalState(_) => "OperationalState",
            Self::CarrierState(_) => "CarrierState",
            Self::AddressState(_) => "AddressState",
            Self::OnlineState(_) => "OnlineState",
            Self::AdministrativeState(_) => "AdministrativeState",
            Self::Other { property, .. } => property,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::OperationalState(v)
            | Self::CarrierState(v)
            | Self::AddressState(v)
            | Self::OnlineState(v)
            | Self::AdministrativeState(v) => v,
            Self::Other { value, .. } => value,
        }
    }
}

/// Decoded networkd signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkdSignal {
    Link { index: u32, changes: Vec<StateChange> },
    Manager { changes: Vec<StateChange> },
}

/// Ifindex encoded in a networkd link object path
pub fn link_index_from_path(path: &str) -> Option<u32> {
    path.strip_prefix(LINK_PATH_PREFIX)?.parse().ok()
}

/// Classify a `PropertiesChanged` signal by object path and interface
pub fn decode_signal(path: &str, interface: &str, mut changes: Vec<(String, String)>) -> Option<NetworkdSignal> {
    changes.sort();
    let changes = changes
        .into_iter()
        .map(|(property, value)| StateChange::from_property(&property, value))
        .collect();

    if interface.starts_with(NETWORKD_LINK_INTERFACE) {
        let index = link_index_from_path(path)?;
        Some(NetworkdSignal::Link { index, changes })
    } else if interface.starts_with(NETWORKD_MANAGER_INTERFACE) {
        Some(NetworkdSignal::Manager { changes })
    } else {
        None
    }
}

fn string_value(value: &OwnedValue) -> Option<String> {
    match &**value {
        Value::Str(s) => Some(s.to_string()),
        _ => None,
    }
}

fn decode_message(message: &zbus::Message) -> Option<NetworkdSignal> {
    let header = message.header();
    let path = header.path()?.as_str().to_string();

    let (interface, changed, _invalidated): (String, HashMap<String, OwnedValue>, Vec<String>) =
        match message.body().deserialize() {
            Ok(body) => body,
            Err(e) => {
                debug!("Ignoring malformed PropertiesChanged signal on '{}': {}", path, e);
                return None;
            }
        };

    let changes = changed
        .iter()
        .filter_map(|(property, value)| string_value(value).map(|v| (property.clone(), v)))
        .collect();

    decode_signal(&path, &interface, changes)
}

/// Runs scripts and reconciliation on networkd state changes
pub struct NetworkdListener<M: RouteManager> {
    network: Arc<Network<M>>,
    config: Arc<AppConfig>,
    scripts: ScriptRunner,
    paths: NetworkdPaths,
    bus: Option<SystemBus>,
    initial_delay: Duration,
    max_delay: Duration,
}

impl<M: RouteManager> Clone for NetworkdListener<M> {
    fn clone(&self) -> Self {
        Self {
            network: Arc::clone(&self.network),
            config: Arc::clone(&self.config),
            scripts: self.scripts.clone(),
            paths: self.paths.clone(),
            bus: self.bus.clone(),
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
        }
    }
}

impl<M: RouteManager> NetworkdListener<M> {
    pub fn new(network: Arc<Network<M>>, config: Arc<AppConfig>, scripts: ScriptRunner, bus: Option<SystemBus>) -> Self {
        Self {
            network,
            config,
            scripts,
            paths: NetworkdPaths::default(),
            bus,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn with_paths(mut self, paths: NetworkdPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Set reconnect backoff bounds
    pub fn with_backoff(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay.max(initial_delay);
        self
    }

    /// Listen forever, reconnecting to the bus with backoff
    pub async fn run(self) {
        let mut backoff = Backoff::new(self.initial_delay, self.max_delay);

        loop {
            match self.listen(&mut backoff).await {
                Ok(()) => warn!("systemd-networkd signal stream ended"),
                Err(e) => error!("systemd-networkd listener failed: {}", e),
            }

            let delay = backoff.next_delay();
            info!("Reconnecting to systemd-networkd signals in {:?}", delay);
            sleep(delay).await;
        }
    }

    async fn listen(&self, backoff: &mut Backoff) -> Result<(), BusError> {
        let connection = zbus::Connection::system()
            .await
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;

        let rule = zbus::MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .sender(NETWORKD_SERVICE)
            .and_then(|b| b.interface(DBUS_PROPERTIES))
            .and_then(|b| b.member("PropertiesChanged"))
            .map_err(|e| BusError::InvalidPayload(e.to_string()))?
            .build();

        let mut stream = zbus::MessageStream::for_match_rule(rule, &connection, Some(SIGNAL_QUEUE_CAPACITY))
            .await
            .map_err(|e| BusError::CallFailed {
                method: "AddMatch".to_string(),
                reason: e.to_string(),
            })?;

        info!("Listening to systemd-networkd DBus events");

        while let Some(message) = stream.next().await {
            let message = message.map_err(|e| BusError::ConnectionFailed(e.to_string()))?;
            backoff.reset();

            if let Some(signal) = decode_message(&message) {
                let listener = self.clone();
                tokio::spawn(async move { listener.handle_signal(signal).await });
            }
        }

        Ok(())
    }

    pub async fn handle_signal(&self, signal: NetworkdSignal) {
        match signal {
            NetworkdSignal::Link { index, changes } => self.handle_link(index, changes).await,
            NetworkdSignal::Manager { changes } => self.handle_manager(changes).await,
        }
    }

    async fn handle_link(&self, index: u32, changes: Vec<StateChange>) {
        let Some(link) = self.network.link_name(index).await else {
            debug!("Received systemd-networkd signal for unknown ifindex='{}'", index);
            return;
        };

        for change in &changes {
            let StateChange::OperationalState(state) = change else {
                debug!(
                    "Link='{}' ifindex='{}' changed '{}'='{}'",
                    link,
                    index,
                    change.property(),
                    change.value()
                );
                continue;
            };

            info!("Link='{}' ifindex='{}' changed OperationalState='{}'", link, index, state);

            if self.config.link_allowed(&link) {
                self.run_link_state_scripts(&link, index, change).await;
            }

            if state == ROUTABLE && self.config.routing_policy_allowed(&link) {
                match self.network.configure_network(&link).await {
                    Ok(()) => {
                        self.scripts.run_scripts(ROUTES_MODIFIED_DIR, &link_env(&link, index)).await;
                    }
                    Err(e) => warn!("Failed to configure link='{}': {}", link, e),
                }
            }
        }
    }

    async fn run_link_state_scripts(&self, link: &str, index: u32, change: &StateChange) {
        let dir = state_dir(change.value());
        if !self.scripts.has_scripts(&dir).await {
            return;
        }

        let mut env = link_env(link, index);
        env.push((change.property().to_string(), change.value().to_string()));

        if let Some(lease) = self.paths.read_lease(index).await {
            env.push(("DHCP_LEASE".to_string(), lease));
        }

        if self.config.emit_json {
            let connection = self.bus.as_ref().map(SystemBus::connection);
            let describe = describe_link(connection, &self.paths, index, link).await;
            match serde_json::to_string(&describe) {
                Ok(json) => env.push(("JSON".to_string(), json)),
                Err(e) => warn!("Failed to encode link='{}' as JSON: {}", link, e),
            }
        }

        self.scripts.run_scripts(&dir, &env).await;
    }

    async fn handle_manager(&self, changes: Vec<StateChange>) {
        for change in &changes {
            debug!("Manager changed state '{}'='{}'", change.property(), change.value());

            let env = vec![(change.property().to_string(), change.value().to_string())];
            self.scripts.run_scripts(MANAGER_STATE_DIR, &env).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::fake::FakeRouteManager;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    const ETH1: u32 = 5;

    fn changes(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn write_script(dir: &Path, name: &str, body: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    async fn listener(root: &Path, config: AppConfig) -> NetworkdListener<FakeRouteManager> {
        let manager = FakeRouteManager::with_links(&[(1, "lo"), (2, "eth0"), (ETH1, "eth1")]);
        manager.add_main_route("0.0.0.0/0", Some("10.0.0.1"), ETH1);
        manager.add_address(ETH1, "10.0.0.2/24");

        let network = Network::new(manager);
        network.acquire_links().await.unwrap();

        NetworkdListener::new(
            Arc::new(network),
            Arc::new(config),
            ScriptRunner::new(root.join("scripts")),
            None,
        )
        .with_paths(NetworkdPaths {
            link_state_dir: root.join("links"),
            lease_dir: root.join("leases"),
        })
    }

    #[test]
    fn test_link_index_from_path() {
        assert_eq!(link_index_from_path("/org/freedesktop/network1/link/_35"), Some(5));
        assert_eq!(link_index_from_path("/org/freedesktop/network1/link/_312"), Some(12));
        assert_eq!(link_index_from_path("/org/freedesktop/network1"), None);
        assert_eq!(link_index_from_path("/org/freedesktop/network1/link/_3x"), None);
    }

    #[test]
    fn test_decode_link_signal() {
        let signal = decode_signal(
            "/org/freedesktop/network1/link/_35",
            "org.freedesktop.network1.Link",
            changes(&[("OperationalState", "routable"), ("CarrierState", "carrier"), ("IPv4AddressState", "routable")]),
        );

        assert_eq!(
            signal,
            Some(NetworkdSignal::Link {
                index: 5,
                changes: vec![
                    StateChange::CarrierState("carrier".to_string()),
                    StateChange::Other {
                        property: "IPv4AddressState".to_string(),
                        value: "routable".to_string()
                    },
                    StateChange::OperationalState("routable".to_string()),
                ]
            })
        );
    }

    #[test]
    fn test_decode_manager_and_unrelated_signals() {
        let signal = decode_signal(
            "/org/freedesktop/network1",
            "org.freedesktop.network1.Manager",
            changes(&[("OnlineState", "online")]),
        );
        assert_eq!(
            signal,
            Some(NetworkdSignal::Manager {
                changes: vec![StateChange::OnlineState("online".to_string())]
            })
        );

        assert_eq!(decode_signal("/org/freedesktop/network1", "org.example.Other", vec![]), None);
        // Link interface on a path without an index
        assert_eq!(decode_signal("/org/freedesktop/network1", "org.freedesktop.network1.Link", vec![]), None);
    }

    #[test]
    fn test_state_change_accessors() {
        let change = StateChange::from_property("AdministrativeState", "configured".to_string());
        assert_eq!(change, StateChange::AdministrativeState("configured".to_string()));
        assert_eq!(change.property(), "AdministrativeState");
        assert_eq!(change.value(), "configured");

        let other = StateChange::from_property("SetupState", "pending".to_string());
        assert_eq!(other.property(), "SetupState");
        assert_eq!(other.value(), "pending");
    }

    #[tokio::test]
    async fn test_routable_link_is_configured() {
        let root = TempDir::new().unwrap();
        let out = root.path().join("routes-modified");
        write_script(
            &root.path().join("scripts").join(ROUTES_MODIFIED_DIR),
            "10-record",
            &format!("echo \"$LINK $LINKINDEX\" > {}", out.display()),
        );

        let config = AppConfig {
            routing_policy_rules: "eth1".to_string(),
            ..AppConfig::default()
        };
        let listener = listener(root.path(), config).await;

        listener
            .handle_signal(NetworkdSignal::Link {
                index: ETH1,
                changes: vec![StateChange::OperationalState("routable".to_string())],
            })
            .await;

        assert_eq!(listener.network.route(ETH1).await.unwrap().table, 10004);
        assert!(listener.network.rule_from("10.0.0.2/24").await.is_some());
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "eth1 5");
    }

    #[tokio::test]
    async fn test_link_outside_policy_list_only_runs_scripts() {
        let root = TempDir::new().unwrap();
        let out = root.path().join("state");
        write_script(
            &root.path().join("scripts").join("routable.d"),
            "10-record",
            &format!("echo \"$LINK $OperationalState $DHCP_LEASE\" > {}", out.display()),
        );
        std::fs::create_dir_all(root.path().join("leases")).unwrap();
        std::fs::write(root.path().join("leases").join("5"), "# lease\nADDRESS=10.0.0.2\n").unwrap();

        let config = AppConfig {
            emit_json: false,
            ..AppConfig::default()
        };
        let listener = listener(root.path(), config).await;

        listener
            .handle_signal(NetworkdSignal::Link {
                index: ETH1,
                changes: vec![StateChange::OperationalState("routable".to_string())],
            })
            .await;

        assert!(listener.network.route(ETH1).await.is_none());
        assert_eq!(
            std::fs::read_to_string(&out).unwrap().trim(),
            "eth1 routable ADDRESS=10.0.0.2"
        );
    }

    #[tokio::test]
    async fn test_link_filter_skips_scripts() {
        let root = TempDir::new().unwrap();
        let out = root.path().join("state");
        write_script(
            &root.path().join("scripts").join("degraded.d"),
            "10-record",
            &format!("touch {}", out.display()),
        );

        let config = AppConfig {
            links: "eth0".to_string(),
            ..AppConfig::default()
        };
        let listener = listener(root.path(), config).await;

        listener
            .handle_signal(NetworkdSignal::Link {
                index: ETH1,
                changes: vec![StateChange::OperationalState("degraded".to_string())],
            })
            .await;

        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_manager_scripts_receive_property() {
        let root = TempDir::new().unwrap();
        let out = root.path().join("manager");
        write_script(
            &root.path().join("scripts").join(MANAGER_STATE_DIR),
            "10-record",
            &format!("echo \"$OnlineState\" > {}", out.display()),
        );

        let listener = listener(root.path(), AppConfig::default()).await;
        listener
            .handle_signal(NetworkdSignal::Manager {
                changes: vec![StateChange::OnlineState("partial".to_string())],
            })
            .await;

        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "partial");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_signals_for_one_link_race_but_converge() {
        let root = TempDir::new().unwrap();
        let config = AppConfig {
            routing_policy_rules: "eth1".to_string(),
            ..AppConfig::default()
        };
        let listener = listener(root.path(), config).await;

        // Same dispatch as the bus loop: one task per signal, no ordering
        let signals = [
            StateChange::OperationalState("routable".to_string()),
            StateChange::OperationalState("routable".to_string()),
            StateChange::CarrierState("carrier".to_string()),
        ];
        let tasks: Vec<_> = signals
            .into_iter()
            .map(|change| {
                let listener = listener.clone();
                tokio::spawn(async move {
                    listener
                        .handle_signal(NetworkdSignal::Link {
                            index: ETH1,
                            changes: vec![change],
                        })
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let network = &listener.network;
        assert_eq!(network.route(ETH1).await.unwrap().table, 10004);
        assert_eq!(network.manager().installed_routes().len(), 1);
        assert_eq!(
            network.manager().rules(),
            vec![
                network.rule_from("10.0.0.2/24").await.unwrap().entry(),
                network.rule_to("10.0.0.2/24").await.unwrap().entry(),
            ]
        );
    }
}
