//! Kernel link and address event watcher
//!
//! Two independent loops, one per netlink multicast subscription. Each loop
//! handles one message completely before reading the next. When a
//! subscription closes or cannot be opened the loop sleeps with exponential
//! backoff and subscribes again.

use crate::config::AppConfig;
use crate::network::{LinkUpdate, Network};
use crate::routing::{subscribe, RouteManager};
use ipnetwork::Ipv4Network;
use rtnetlink::packet_core::{NetlinkMessage, NetlinkPayload};
use rtnetlink::packet_route::address::{AddressAttribute, AddressMessage};
use rtnetlink::packet_route::link::{LinkAttribute, LinkMessage};
use rtnetlink::packet_route::RouteNetlinkMessage;
use rtnetlink::constants::{RTMGRP_IPV4_IFADDR, RTMGRP_IPV6_IFADDR, RTMGRP_LINK};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// First resubscribe delay
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Resubscribe delay ceiling
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Address change reported by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressUpdate {
    Added { index: u32, ip: IpAddr, prefix: u8 },
    Removed { index: u32, ip: IpAddr, prefix: u8 },
}

impl AddressUpdate {
    pub fn index(&self) -> u32 {
        match self {
            Self::Added { index, .. } | Self::Removed { index, .. } => *index,
        }
    }

    /// Address in `ip/prefix` form, the key of the rule maps
    pub fn cidr(&self) -> String {
        match self {
            Self::Added { ip, prefix, .. } | Self::Removed { ip, prefix, .. } => format!("{}/{}", ip, prefix),
        }
    }

    /// IPv6 link-local (fe80::/10)
    pub fn is_link_local(&self) -> bool {
        match self {
            Self::Added { ip, .. } | Self::Removed { ip, .. } => match ip {
                IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
                IpAddr::V4(_) => false,
            },
        }
    }
}

/// Exponential delay between resubscribe attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the ceiling
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    Links,
    Addresses,
}

impl WatchKind {
    fn groups(self) -> u32 {
        match self {
            Self::Links => RTMGRP_LINK,
            Self::Addresses => RTMGRP_IPV4_IFADDR | RTMGRP_IPV6_IFADDR,
        }
    }
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Links => write!(f, "link"),
            Self::Addresses => write!(f, "address"),
        }
    }
}

/// Decode a link notification
pub fn decode_link_update(message: &NetlinkMessage<RouteNetlinkMessage>) -> Option<LinkUpdate> {
    match &message.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link))
        | NetlinkPayload::InnerMessage(RouteNetlinkMessage::SetLink(link)) => {
            let name = link_name(link)?;
            Some(LinkUpdate::New {
                index: link.header.index,
                name,
            })
        }
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelLink(link)) => Some(LinkUpdate::Deleted {
            index: link.header.index,
        }),
        _ => None,
    }
}

fn link_name(link: &LinkMessage) -> Option<String> {
    link.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    })
}

/// Decode an address notification
pub fn decode_address_update(message: &NetlinkMessage<RouteNetlinkMessage>) -> Option<AddressUpdate> {
    match &message.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewAddress(msg)) => {
            let ip = address_ip(msg)?;
            Some(AddressUpdate::Added {
                index: msg.header.index,
                ip,
                prefix: msg.header.prefix_len,
            })
        }
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelAddress(msg)) => {
            let ip = address_ip(msg)?;
            Some(AddressUpdate::Removed {
                index: msg.header.index,
                ip,
                prefix: msg.header.prefix_len,
            })
        }
        _ => None,
    }
}

// IFA_LOCAL is the interface's own address on point-to-point links
fn address_ip(msg: &AddressMessage) -> Option<IpAddr> {
    let local = msg.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Local(ip) => Some(*ip),
        _ => None,
    });

    local.or_else(|| {
        msg.attributes.iter().find_map(|attr| match attr {
            AddressAttribute::Address(ip) => Some(*ip),
            _ => None,
        })
    })
}

/// Keeps the link table current and drives per-address reconciliation
pub struct KernelWatcher<M: RouteManager> {
    network: Arc<Network<M>>,
    config: Arc<AppConfig>,
    initial_delay: Duration,
    max_delay: Duration,
}

impl<M: RouteManager> Clone for KernelWatcher<M> {
    fn clone(&self) -> Self {
        Self {
            network: Arc::clone(&self.network),
            config: Arc::clone(&self.config),
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
        }
    }
}

impl<M: RouteManager> KernelWatcher<M> {
    pub fn new(network: Arc<Network<M>>, config: Arc<AppConfig>) -> Self {
        Self {
            network,
            config,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Set resubscribe backoff bounds
    pub fn with_backoff(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay.max(initial_delay);
        self
    }

    /// Start both subscription loops
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let links = self.clone();
        vec![
            tokio::spawn(async move { links.watch(WatchKind::Links).await }),
            tokio::spawn(async move { self.watch(WatchKind::Addresses).await }),
        ]
    }

    pub async fn watch_links(&self) {
        self.watch(WatchKind::Links).await
    }

    pub async fn watch_addresses(&self) {
        self.watch(WatchKind::Addresses).await
    }

    async fn watch(&self, kind: WatchKind) {
        let mut backoff = Backoff::new(self.initial_delay, self.max_delay);

        loop {
            match subscribe(kind.groups()) {
                Ok(mut subscription) => {
                    info!("Subscribed to kernel {} updates", kind);
                    while let Some(message) = subscription.next().await {
                        backoff.reset();
                        self.process_message(&message).await;
                    }
                    warn!("Kernel {} subscription closed", kind);
                }
                Err(e) => error!("Failed to subscribe to kernel {} updates: {}", kind, e),
            }

            let delay = backoff.next_delay();
            info!("Resubscribing to kernel {} updates in {:?}", kind, delay);
            sleep(delay).await;
        }
    }

    /// Handle one kernel notification
    pub async fn process_message(&self, message: &NetlinkMessage<RouteNetlinkMessage>) {
        if let NetlinkPayload::Error(e) = &message.payload {
            warn!("Kernel reported error on subscription: {:?}", e);
            return;
        }

        if let Some(update) = decode_link_update(message) {
            self.network.update_link(update).await;
        } else if let Some(update) = decode_address_update(message) {
            self.process_address_update(update).await;
        }
    }

    pub async fn process_address_update(&self, update: AddressUpdate) {
        if update.is_link_local() {
            debug!("Ignoring link-local address='{}'", update.cidr());
            return;
        }

        let cidr = update.cidr();
        match update {
            AddressUpdate::Added { index, ip, prefix } => {
                let Some(link) = self.network.resolve_link(index).await else {
                    debug!("Address='{}' added on unknown ifindex='{}'", cidr, index);
                    return;
                };

                if !self.config.routing_policy_allowed(&link) {
                    debug!("Link='{}' not configured for routing policy rules, ignoring address='{}'", link, cidr);
                    return;
                }

                let IpAddr::V4(ip) = ip else {
                    debug!("No IPv6 policy routing, ignoring address='{}' on link='{}'", cidr, link);
                    return;
                };

                let address = match Ipv4Network::new(ip, prefix) {
                    Ok(address) => address,
                    Err(e) => {
                        warn!("Invalid address='{}' on link='{}': {}", cidr, link, e);
                        return;
                    }
                };

                info!("Address='{}' added on link='{}' ifindex='{}'", cidr, link, index);
                if let Err(e) = self.network.configure_address(index, &address).await {
                    warn!("Failed to configure address='{}' on link='{}': {}", cidr, link, e);
                }
            }
            AddressUpdate::Removed { index, .. } => {
                info!("Address='{}' removed on ifindex='{}'", cidr, index);
                self.network.drop_configuration(index, &cidr).await;
            }
        }
    }
}
