//! Link table maintenance

use crate::error::NetworkError;
use crate::network::{Network, NetworkState};
use crate::routing::RouteManager;
use tracing::{debug, info, warn};

const LOOPBACK: &str = "lo";

/// Link change reported by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkUpdate {
    /// RTM_NEWLINK / RTM_SETLINK
    New { index: u32, name: String },
    /// RTM_DELLINK
    Deleted { index: u32 },
}

impl NetworkState {
    /// Upsert a link in both directions. Returns false when nothing changed.
    pub(crate) fn insert_link(&mut self, index: u32, name: &str) -> bool {
        if name == LOOPBACK {
            return false;
        }
        if self.links_by_index.get(&index).map(String::as_str) == Some(name) {
            return false;
        }

        // Renamed link: forget the old name
        if let Some(old_name) = self.links_by_index.insert(index, name.to_string()) {
            self.links_by_name.remove(&old_name);
        }
        // Name reused by a new index: forget the old index
        if let Some(old_index) = self.links_by_name.insert(name.to_string(), index) {
            if old_index != index {
                self.links_by_index.remove(&old_index);
            }
        }

        true
    }

    /// Remove a link by index, returning the name it had
    pub(crate) fn remove_link(&mut self, index: u32) -> Option<String> {
        let name = self.links_by_index.remove(&index)?;
        self.links_by_name.remove(&name);
        Some(name)
    }
}

impl<M: RouteManager> Network<M> {
    /// Enumerate kernel links once at startup
    pub async fn acquire_links(&self) -> Result<(), NetworkError> {
        let links = self
            .manager
            .list_links()
            .await
            .map_err(|e| NetworkError::AcquireLinks(e.to_string()))?;

        debug!("Acquiring link information ...");

        let mut state = self.lock().await;
        for link in links {
            if state.insert_link(link.index, &link.name) {
                debug!("Acquired link='{}' ifindex='{}' from netlink message", link.name, link.index);
            }
        }

        info!("Acquired {} links", state.links_by_index.len());
        Ok(())
    }

    /// Apply a single kernel link event
    pub async fn update_link(&self, update: LinkUpdate) {
        let mut state = self.lock().await;

        match update {
            LinkUpdate::New { index, name } => {
                if state.insert_link(index, &name) {
                    info!("Link='{}' ifindex='{}' added", name, index);
                }
            }
            LinkUpdate::Deleted { index } => {
                if let Some(name) = state.remove_link(index) {
                    info!("Link='{}' ifindex='{}' removed", name, index);
                }
            }
        }
    }

    /// Name of the link with `index`, asking the kernel when the table has
    /// not heard of it yet. Address and link notifications arrive on
    /// separate sockets, so an address may beat its link.
    pub async fn resolve_link(&self, index: u32) -> Option<String> {
        if let Some(name) = self.link_name(index).await {
            return Some(name);
        }

        let links = match self.manager.list_links().await {
            Ok(links) => links,
            Err(e) => {
                warn!("Failed to look up ifindex='{}': {}", index, e);
                return None;
            }
        };
        let link = links.into_iter().find(|link| link.index == index)?;

        let mut state = self.lock().await;
        if state.insert_link(link.index, &link.name) {
            info!("Link='{}' ifindex='{}' added", link.name, link.index);
        }
        state.links_by_index.get(&index).cloned()
    }

    /// Number of links tracked (loopback excluded)
    pub async fn link_count(&self) -> usize {
        self.lock().await.links_by_index.len()
    }
}
