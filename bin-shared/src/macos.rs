use std::net::IpAddr;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use model::{AdapterBackup, AdapterId};

use crate::{HostAdapter, LOOPBACK_IPV4, LOOPBACK_IPV6};

pub(crate) async fn enumerate_adapters() -> Result<Vec<HostAdapter>> {
    let output = tokio::process::Command::new("networksetup")
        .arg("-listallhardwareports")
        .output()
        .await
        .context("`networksetup -listallhardwareports` didn't run")?;
    if !output.status.success() {
        bail!("`networksetup -listallhardwareports` returned non-zero");
    }

    let text = String::from_utf8(output.stdout)
        .context("`networksetup -listallhardwareports` output was not UTF-8")?;

    Ok(parse_hardware_ports(&text))
}

/// Parses blocks like:
/// ```text
/// Hardware Port: Wi-Fi
/// Device: en0
/// Ethernet Address: aa:bb:cc:dd:ee:ff
/// ```
fn parse_hardware_ports(text: &str) -> Vec<HostAdapter> {
    let mut adapters = Vec::new();
    let mut current_port: Option<String> = None;

    for line in text.lines() {
        if let Some(port) = line.strip_prefix("Hardware Port: ") {
            current_port = Some(port.trim().to_owned());
        } else if let Some(device) = line.strip_prefix("Device: ") {
            let device = device.trim().to_owned();
            let port = current_port.clone().unwrap_or_default();

            adapters.push(HostAdapter {
                id: AdapterId::new(device.clone()),
                interface_index: 0,
                is_loopback: device == "lo0",
                is_tunnel: device.starts_with("utun") || port.to_lowercase().contains("tunnel"),
                is_connected: true,
                name: port,
            });
        }
    }

    adapters
}

pub(crate) async fn capture_backup(adapter: &HostAdapter) -> Result<AdapterBackup> {
    let output = tokio::process::Command::new("networksetup")
        .arg("-getdnsservers")
        .arg(&adapter.name)
        .output()
        .await
        .context("`networksetup -getdnsservers` didn't run")?;

    let text = String::from_utf8_lossy(&output.stdout).into_owned();
    let dhcp = text.trim().starts_with("There aren't any DNS Servers");

    let addrs: Vec<IpAddr> = text
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();

    Ok(AdapterBackup {
        adapter_id: adapter.id.clone(),
        interface_index: adapter.interface_index,
        name: adapter.name.clone(),
        ipv4_dns: addrs
            .iter()
            .filter_map(|a| match a {
                IpAddr::V4(v4) => Some(*v4),
                IpAddr::V6(_) => None,
            })
            .collect(),
        ipv6_dns: addrs
            .iter()
            .filter_map(|a| match a {
                IpAddr::V6(v6) => Some(*v6),
                IpAddr::V4(_) => None,
            })
            .collect(),
        dhcp,
        captured_at: Utc::now(),
    })
}

pub(crate) async fn apply_loopback(adapter: &HostAdapter) -> Result<()> {
    let status = tokio::process::Command::new("networksetup")
        .arg("-setdnsservers")
        .arg(&adapter.name)
        .arg(LOOPBACK_IPV4.to_string())
        .arg(LOOPBACK_IPV6.to_string())
        .status()
        .await
        .context("`networksetup -setdnsservers` didn't run")?;
    if !status.success() {
        bail!("`networksetup -setdnsservers` returned non-zero for {}", adapter.name);
    }

    tracing::info!(adapter = %adapter.name, "Applied loopback DNS");

    Ok(())
}

pub(crate) async fn restore(adapter: &HostAdapter, backup: &AdapterBackup) -> Result<()> {
    let mut cmd = tokio::process::Command::new("networksetup");
    cmd.arg("-setdnsservers").arg(&adapter.name);

    if backup.dhcp {
        cmd.arg("Empty");
    } else {
        cmd.args(backup.ipv4_dns.iter().map(ToString::to_string));
        cmd.args(backup.ipv6_dns.iter().map(ToString::to_string));
    }

    let status = cmd
        .status()
        .await
        .context("`networksetup -setdnsservers` didn't run")?;
    if !status.success() {
        bail!("`networksetup -setdnsservers` returned non-zero for {}", adapter.name);
    }

    tracing::info!(adapter = %adapter.name, "Restored original DNS");

    Ok(())
}

pub(crate) async fn flush_dns_cache() -> Result<()> {
    let status = tokio::process::Command::new("dscacheutil")
        .arg("-flushcache")
        .status()
        .await
        .context("`dscacheutil -flushcache` didn't run")?;
    if !status.success() {
        bail!("`dscacheutil -flushcache` returned non-zero");
    }

    tokio::process::Command::new("killall")
        .args(["-HUP", "mDNSResponder"])
        .status()
        .await
        .context("`killall -HUP mDNSResponder` didn't run")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hardware_port_blocks() {
        let text = "Hardware Port: Wi-Fi\nDevice: en0\nEthernet Address: aa:bb:cc:dd:ee:ff\n\nHardware Port: Thunderbolt Bridge\nDevice: bridge0\nEthernet Address: N/A\n";
        let adapters = parse_hardware_ports(text);

        assert_eq!(adapters.len(), 2);
        assert_eq!(adapters[0].name, "Wi-Fi");
        assert_eq!(adapters[0].id.as_str(), "en0");
        assert!(!adapters[0].is_loopback);
    }
}
