//! Event sources outside the kernel: systemd-networkd over DBus or
//! dhclient's lease database.

pub mod describe;
pub mod dhclient;
pub mod lease;
pub mod networkd;
pub mod state_file;

pub use dhclient::DhclientListener;
pub use networkd::{NetworkdListener, NetworkdSignal, StateChange};

/// `LINK` and `LINKINDEX` script variables
pub(crate) fn link_env(link: &str, index: u32) -> Vec<(String, String)> {
    vec![
        ("LINK".to_string(), link.to_string()),
        ("LINKINDEX".to_string(), index.to_string()),
    ]
}
