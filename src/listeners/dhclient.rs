//! dhclient lease database watcher

use crate::bus::SystemBus;
use crate::config::AppConfig;
use crate::error::EventError;
use crate::listeners::lease::{parse_leases, Lease, DHCLIENT_LEASE_FILE};
use crate::listeners::link_env;
use crate::network::watcher::{Backoff, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY};
use crate::network::Network;
use crate::routing::RouteManager;
use crate::scripts::ScriptRunner;
use notify::{RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const ROUTABLE_DIR: &str = "routable.d";

/// Runs `routable.d` scripts and pushes DNS/hostname settings for every
/// interface with a dhclient lease
pub struct DhclientListener<M: RouteManager> {
    network: Arc<Network<M>>,
    config: Arc<AppConfig>,
    scripts: ScriptRunner,
    bus: Option<SystemBus>,
    lease_file: PathBuf,
    initial_delay: Duration,
    max_delay: Duration,
}

impl<M: RouteManager> DhclientListener<M> {
    pub fn new(network: Arc<Network<M>>, config: Arc<AppConfig>, scripts: ScriptRunner, bus: Option<SystemBus>) -> Self {
        Self {
            network,
            config,
            scripts,
            bus,
            lease_file: PathBuf::from(DHCLIENT_LEASE_FILE),
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn with_lease_file(mut self, lease_file: impl Into<PathBuf>) -> Self {
        self.lease_file = lease_file.into();
        self
    }

    /// Set rewatch backoff bounds
    pub fn with_backoff(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay.max(initial_delay);
        self
    }

    /// Watch forever, setting the watch up again with backoff when it fails
    pub async fn run(self) {
        let mut backoff = Backoff::new(self.initial_delay, self.max_delay);

        loop {
            if let Err(e) = self.watch(&mut backoff).await {
                error!("dhclient listener failed: {}", e);
            }

            let delay = backoff.next_delay();
            info!("Watching dhclient leases again in {:?}", delay);
            sleep(delay).await;
        }
    }

    /// Handle the current leases, then again on every change of the file
    async fn watch(&self, backoff: &mut Backoff) -> Result<(), EventError> {
        let watch_dir = self
            .lease_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (tx, mut rx) = mpsc::channel(16);
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            // The receiver only goes away at shutdown
            let _ = tx.blocking_send(event);
        })
        .map_err(|e| EventError::SubscribeFailed(e.to_string()))?;

        // Watch the directory: dhclient replaces the file on renewal
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| EventError::SubscribeFailed(format!("{}: {}", watch_dir.display(), e)))?;

        info!("Listening to dhclient events on '{}'", self.lease_file.display());

        // dhclient may already hold leases
        self.process_leases().await;

        while let Some(event) = rx.recv().await {
            match event {
                Ok(event) if event.paths.iter().any(|path| path == &self.lease_file) => {
                    backoff.reset();
                    debug!("dhclient lease file event: {:?}", event.kind);
                    self.process_leases().await;
                }
                Ok(_) => {}
                Err(e) => error!("dhclient lease watch error: {}", e),
            }
        }

        Err(EventError::StreamError("lease file watcher stopped".to_string()))
    }

    /// Apply every lease on a known link. Returns how many were applied.
    pub async fn process_leases(&self) -> usize {
        let content = match tokio::fs::read_to_string(&self.lease_file).await {
            Ok(content) => content,
            Err(e) => {
                debug!("Failed to read dhclient lease file '{}': {}", self.lease_file.display(), e);
                return 0;
            }
        };

        let mut leases: Vec<_> = parse_leases(&content).into_iter().collect();
        leases.sort_by(|a, b| a.0.cmp(&b.0));

        let mut applied = 0;
        for (link, lease) in &leases {
            let Some(index) = self.network.link_index(link).await else {
                debug!("Ignoring lease for unknown link='{}'", link);
                continue;
            };

            if !self.config.link_allowed(link) {
                continue;
            }

            self.apply_lease(link, index, lease).await;
            applied += 1;
        }

        applied
    }

    async fn apply_lease(&self, link: &str, index: u32, lease: &Lease) {
        let mut env = link_env(link, index);
        env.push(("DHCP_LEASE".to_string(), lease.to_env_value()));
        self.scripts.run_scripts(ROUTABLE_DIR, &env).await;

        let Some(bus) = &self.bus else {
            return;
        };

        if self.config.use_hostname && !lease.hostname.is_empty() {
            if let Err(e) = bus.set_hostname(&lease.hostname).await {
                warn!("Failed to set hostname='{}': {}", lease.hostname, e);
            }
        }

        let servers = lease.dns_servers();
        if self.config.use_dns && !servers.is_empty() {
            if let Err(e) = bus.set_link_dns(index, &servers).await {
                warn!("Failed to set DNS servers of link='{}': {}", link, e);
            }
        }

        if self.config.use_domain && !lease.domain.is_empty() {
            if let Err(e) = bus.set_link_domains(index, &lease.domain).await {
                warn!("Failed to set DNS domains of link='{}': {}", link, e);
            }
        }
    }
}
