//! Route management using rtnetlink

use crate::error::{EventError, RouteError};
use crate::routing::{LinkEntry, RouteEntry, RouteManager, RuleEntry, RT_TABLE_MAIN};
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use ipnetwork::Ipv4Network;
use rtnetlink::packet_core::NetlinkMessage;
use rtnetlink::packet_route::address::AddressAttribute;
use rtnetlink::packet_route::link::LinkAttribute;
use rtnetlink::packet_route::route::{RouteAddress, RouteAttribute, RouteMessage};
use rtnetlink::packet_route::rule::{RuleAction, RuleAttribute, RuleMessage};
use rtnetlink::packet_route::{AddressFamily, RouteNetlinkMessage};
use rtnetlink::sys::{AsyncSocket, SocketAddr};
use rtnetlink::{new_connection, Handle, IpVersion, RouteMessageBuilder};
use std::net::{IpAddr, Ipv4Addr};
use tokio::task::JoinHandle;
use tracing::debug;

const ENOENT: i32 = 2;
const ESRCH: i32 = 3;
const EEXIST: i32 = 17;

/// Route manager implementation using rtnetlink
#[derive(Clone)]
pub struct RtNetlinkRouteManager {
    handle: Handle,
}

impl RtNetlinkRouteManager {
    /// Create a new route manager
    pub fn new() -> Result<Self, RouteError> {
        let (connection, handle, _) = new_connection().map_err(|e| RouteError::Query(e.to_string()))?;

        // Spawn the connection handler
        tokio::spawn(connection);

        Ok(Self { handle })
    }

    fn route_message(route: &RouteEntry) -> RouteMessage {
        let mut builder = RouteMessageBuilder::<Ipv4Addr>::new()
            .destination_prefix(route.destination.network(), route.destination.prefix())
            .table_id(route.table);
        if let Some(oif) = route.oif {
            builder = builder.output_interface(oif);
        }
        if let Some(gateway) = route.gateway {
            builder = builder.gateway(gateway);
        }
        builder.build()
    }
}

impl RouteManager for RtNetlinkRouteManager {
    async fn list_links(&self) -> Result<Vec<LinkEntry>, RouteError> {
        let links: Vec<_> = self
            .handle
            .link()
            .get()
            .execute()
            .try_collect()
            .await
            .map_err(|e| RouteError::Query(format!("link dump: {}", e)))?;

        Ok(links
            .iter()
            .filter_map(|link| {
                let name = link.attributes.iter().find_map(|a| match a {
                    LinkAttribute::IfName(name) => Some(name.clone()),
                    _ => None,
                })?;
                Some(LinkEntry {
                    index: link.header.index,
                    name,
                })
            })
            .collect())
    }

    async fn list_ipv4_addresses(&self, index: u32) -> Result<Vec<Ipv4Network>, RouteError> {
        let addresses: Vec<_> = self
            .handle
            .address()
            .get()
            .set_link_index_filter(index)
            .execute()
            .try_collect()
            .await
            .map_err(|e| RouteError::Query(format!("address dump ifindex={}: {}", index, e)))?;

        Ok(addresses
            .iter()
            .filter(|msg| msg.header.family == AddressFamily::Inet && msg.header.index == index)
            .filter_map(|msg| {
                let ip = msg.attributes.iter().find_map(|a| match a {
                    AddressAttribute::Address(IpAddr::V4(ip)) => Some(*ip),
                    _ => None,
                })?;
                Ipv4Network::new(ip, msg.header.prefix_len).ok()
            })
            .collect())
    }

    async fn list_ipv4_routes(&self) -> Result<Vec<RouteEntry>, RouteError> {
        let request = RouteMessageBuilder::<Ipv4Addr>::new().build();
        let routes: Vec<_> = self
            .handle
            .route()
            .get(request)
            .execute()
            .try_collect()
            .await
            .map_err(|e| RouteError::Query(format!("route dump: {}", e)))?;

        Ok(routes
            .iter()
            .filter_map(route_message_to_entry)
            .filter(|route| route.table == RT_TABLE_MAIN)
            .collect())
    }

    async fn add_route(&self, route: &RouteEntry) -> Result<(), RouteError> {
        debug!("Adding route {:?}", route);
        self.handle
            .route()
            .add(Self::route_message(route))
            .execute()
            .await
            .map_err(|e| match errno(&e) {
                Some(EEXIST) => RouteError::RouteExists(format!("{:?}", route)),
                _ => RouteError::AddRoute(e.to_string()),
            })
    }

    async fn remove_route(&self, route: &RouteEntry) -> Result<(), RouteError> {
        debug!("Removing route {:?}", route);
        self.handle
            .route()
            .del(Self::route_message(route))
            .execute()
            .await
            .map_err(|e| match errno(&e) {
                Some(ESRCH) | Some(ENOENT) => RouteError::NotFound(format!("{:?}", route)),
                _ => RouteError::RemoveRoute(e.to_string()),
            })
    }

    async fn list_ipv4_rules(&self) -> Result<Vec<RuleEntry>, RouteError> {
        Ok(self.rule_messages().await?.iter().map(rule_message_to_entry).collect())
    }

    async fn add_rule(&self, rule: &RuleEntry) -> Result<(), RouteError> {
        debug!("Adding routing policy rule {:?}", rule);
        let mut request = self
            .handle
            .rule()
            .add()
            .v4()
            .table_id(rule.table)
            .action(RuleAction::ToTable);
        if let Some(source) = rule.source {
            request = request.source_prefix(source.ip(), source.prefix());
        }
        if let Some(destination) = rule.destination {
            request = request.destination_prefix(destination.ip(), destination.prefix());
        }
        if let Some(ref iif) = rule.iif_name {
            request = request.input_interface(iif.clone());
        }
        if let Some(ref oif) = rule.oif_name {
            request = request.output_interface(oif.clone());
        }

        request.execute().await.map_err(|e| match errno(&e) {
            Some(EEXIST) => RouteError::RouteExists(format!("{:?}", rule)),
            _ => RouteError::AddRule(e.to_string()),
        })
    }

    async fn remove_rule(&self, rule: &RuleEntry) -> Result<(), RouteError> {
        debug!("Removing routing policy rule {:?}", rule);
        // The kernel deletes by full match, so hand back the message it reported
        let message = self
            .rule_messages()
            .await?
            .into_iter()
            .find(|msg| rule_message_to_entry(msg) == *rule)
            .ok_or_else(|| RouteError::NotFound(format!("{:?}", rule)))?;

        self.handle
            .rule()
            .del(message)
            .execute()
            .await
            .map_err(|e| RouteError::RemoveRule(e.to_string()))
    }
}

impl RtNetlinkRouteManager {
    async fn rule_messages(&self) -> Result<Vec<RuleMessage>, RouteError> {
        self.handle
            .rule()
            .get(IpVersion::V4)
            .execute()
            .try_collect()
            .await
            .map_err(|e| RouteError::Query(format!("rule dump: {}", e)))
    }
}

fn errno(error: &rtnetlink::Error) -> Option<i32> {
    match error {
        rtnetlink::Error::NetlinkError(msg) => msg.code.map(|code| -code.get()),
        _ => None,
    }
}

fn route_message_to_entry(msg: &RouteMessage) -> Option<RouteEntry> {
    if msg.header.address_family != AddressFamily::Inet {
        return None;
    }

    let destination = msg
        .attributes
        .iter()
        .find_map(|a| match a {
            RouteAttribute::Destination(RouteAddress::Inet(ip)) => Some(*ip),
            _ => None,
        })
        .unwrap_or(Ipv4Addr::UNSPECIFIED);
    let destination = Ipv4Network::new(destination, msg.header.destination_prefix_length).ok()?;

    let gateway = msg.attributes.iter().find_map(|a| match a {
        RouteAttribute::Gateway(RouteAddress::Inet(ip)) => Some(*ip),
        _ => None,
    });

    let oif = msg.attributes.iter().find_map(|a| match a {
        RouteAttribute::Oif(index) => Some(*index),
        _ => None,
    });

    let table = msg
        .attributes
        .iter()
        .find_map(|a| match a {
            RouteAttribute::Table(table) => Some(*table),
            _ => None,
        })
        .unwrap_or(u32::from(msg.header.table));

    Some(RouteEntry {
        destination,
        gateway,
        oif,
        table,
    })
}

fn rule_message_to_entry(msg: &RuleMessage) -> RuleEntry {
    let mut rule = RuleEntry::new(u32::from(msg.header.table));

    for attribute in &msg.attributes {
        match attribute {
            RuleAttribute::Table(table) => rule.table = *table,
            RuleAttribute::Source(IpAddr::V4(ip)) => {
                rule.source = Ipv4Network::new(*ip, msg.header.src_len).ok();
            }
            RuleAttribute::Destination(IpAddr::V4(ip)) => {
                rule.destination = Ipv4Network::new(*ip, msg.header.dst_len).ok();
            }
            RuleAttribute::Iifname(name) => rule.iif_name = Some(name.clone()),
            RuleAttribute::Oifname(name) => rule.oif_name = Some(name.clone()),
            _ => {}
        }
    }

    rule
}

/// Live kernel multicast subscription
pub struct Subscription {
    messages: BoxStream<'static, NetlinkMessage<RouteNetlinkMessage>>,
    connection: JoinHandle<()>,
}

impl Subscription {
    /// Next kernel notification, `None` once the socket is gone
    pub async fn next(&mut self) -> Option<NetlinkMessage<RouteNetlinkMessage>> {
        self.messages.next().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

/// Open a netlink socket bound to the given `RTMGRP_*` multicast groups
pub fn subscribe(groups: u32) -> Result<Subscription, EventError> {
    let (mut connection, _handle, messages) =
        new_connection().map_err(|e| EventError::SubscribeFailed(e.to_string()))?;

    connection
        .socket_mut()
        .socket_mut()
        .bind(&SocketAddr::new(0, groups))
        .map_err(|e| EventError::SubscribeFailed(format!("bind groups={:#x}: {}", groups, e)))?;

    let connection = tokio::spawn(connection);

    Ok(Subscription {
        messages: messages.map(|(message, _)| message).boxed(),
        connection,
    })
}
