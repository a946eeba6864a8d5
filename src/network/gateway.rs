//! IPv4 gateway resolution from the main routing table

use crate::error::NetworkError;
use crate::routing::{RouteEntry, RouteManager};
use std::net::Ipv4Addr;
use tracing::debug;

/// Find the gateway to use for a link's dedicated table.
///
/// Tries, in order: the link's own default route, any route on the link
/// that carries a gateway, then the system-wide default route.
pub async fn resolve_gateway<M: RouteManager>(manager: &M, index: u32) -> Result<Ipv4Addr, NetworkError> {
    let routes = manager.list_ipv4_routes().await?;

    let gateway = select_gateway(&routes, index).ok_or(NetworkError::GatewayNotFound { index })?;
    debug!("Resolved gateway='{}' for ifindex='{}'", gateway, index);

    Ok(gateway)
}

fn usable(gateway: Option<Ipv4Addr>) -> Option<Ipv4Addr> {
    gateway.filter(|gw| !gw.is_unspecified())
}

pub(crate) fn select_gateway(routes: &[RouteEntry], index: u32) -> Option<Ipv4Addr> {
    let on_link = |route: &&RouteEntry| route.oif == Some(index);

    routes
        .iter()
        .filter(on_link)
        .filter(|route| route.is_default())
        .find_map(|route| usable(route.gateway))
        .or_else(|| routes.iter().filter(on_link).find_map(|route| usable(route.gateway)))
        .or_else(|| {
            routes
                .iter()
                .filter(|route| route.is_default())
                .find_map(|route| usable(route.gateway))
        })
}
