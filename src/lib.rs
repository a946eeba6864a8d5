//! Network Broker - policy routing and hook scripts for multi-homed hosts
//!
//! This library tracks the kernel's links, gives every configured secondary
//! link its own routing table with source/destination policy rules, and runs
//! user scripts when systemd-networkd or dhclient report state changes.

pub mod bus;
pub mod config;
pub mod error;
pub mod listeners;
pub mod network;
pub mod routing;
pub mod scripts;

pub use error::AppError;
