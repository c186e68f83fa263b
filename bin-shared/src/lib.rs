//! Platform-specific host network adapter control (§4.3 "Adapter controller").
//!
//! Each OS module exposes the same four primitives: enumerate the host's
//! adapters, capture a [`model::AdapterBackup`] for one, apply loopback DNS
//! to it, and restore it from a previously captured backup. Orchestration
//! (which adapters to target, persisting backups via the settings store,
//! continuing past a single adapter's failure) lives above this crate,
//! which stays a thin layer over each OS's native mechanism.

use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::Result;
use model::AdapterBackup;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use linux as platform;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
use windows as platform;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
use macos as platform;

pub const LOOPBACK_IPV4: Ipv4Addr = Ipv4Addr::LOCALHOST;
pub const LOOPBACK_IPV6: Ipv6Addr = Ipv6Addr::LOCALHOST;

/// A host network adapter as seen by the OS, independent of whether it has
/// ever been targeted by loopback takeover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAdapter {
    pub id: model::AdapterId,
    pub interface_index: u32,
    pub name: String,
    pub is_loopback: bool,
    pub is_tunnel: bool,
    pub is_connected: bool,
}

impl HostAdapter {
    /// The default filter from §4.3: "filtering out loopback and tunnel
    /// types and, by default, disconnected adapters".
    pub fn is_eligible_by_default(&self) -> bool {
        !self.is_loopback && !self.is_tunnel && self.is_connected
    }

    /// `netsh`'s `name=` selector value for this adapter, quoted so spaces
    /// in the friendly name don't split into extra arguments.
    #[cfg(target_os = "windows")]
    pub(crate) fn netsh_name(&self) -> String {
        format!("name=\"{}\"", self.name)
    }
}

pub async fn enumerate_adapters() -> Result<Vec<HostAdapter>> {
    platform::enumerate_adapters().await
}

pub async fn capture_backup(adapter: &HostAdapter) -> Result<AdapterBackup> {
    platform::capture_backup(adapter).await
}

pub async fn apply_loopback(adapter: &HostAdapter) -> Result<()> {
    platform::apply_loopback(adapter).await
}

pub async fn restore(adapter: &HostAdapter, backup: &AdapterBackup) -> Result<()> {
    platform::restore(adapter, backup).await
}

pub async fn flush_dns_cache() -> Result<()> {
    platform::flush_dns_cache().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(is_loopback: bool, is_tunnel: bool, is_connected: bool) -> HostAdapter {
        HostAdapter {
            id: model::AdapterId::new("eth0"),
            interface_index: 3,
            name: "eth0".into(),
            is_loopback,
            is_tunnel,
            is_connected,
        }
    }

    #[test]
    fn only_connected_non_loopback_non_tunnel_adapters_are_eligible() {
        assert!(adapter(false, false, true).is_eligible_by_default());
        assert!(!adapter(true, false, true).is_eligible_by_default());
        assert!(!adapter(false, true, true).is_eligible_by_default());
        assert!(!adapter(false, false, false).is_eligible_by_default());
    }
}
