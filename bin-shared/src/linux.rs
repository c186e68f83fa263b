use std::{fs, net::IpAddr, str::FromStr};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use model::{AdapterBackup, AdapterId};

use crate::{HostAdapter, LOOPBACK_IPV4, LOOPBACK_IPV6};

const SYS_CLASS_NET: &str = "/sys/class/net";

pub(crate) async fn enumerate_adapters() -> Result<Vec<HostAdapter>> {
    let entries = fs::read_dir(SYS_CLASS_NET)
        .with_context(|| format!("Failed to read {SYS_CLASS_NET}"))?;

    let mut adapters = Vec::new();

    for entry in entries {
        let entry = entry.context("Failed to read a directory entry under /sys/class/net")?;
        let name = entry.file_name().to_string_lossy().into_owned();

        let interface_index: u32 = fs::read_to_string(entry.path().join("ifindex"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);

        let operstate = fs::read_to_string(entry.path().join("operstate"))
            .unwrap_or_default()
            .trim()
            .to_owned();

        adapters.push(HostAdapter {
            id: AdapterId::new(name.clone()),
            interface_index,
            is_loopback: name == "lo",
            is_tunnel: is_tunnel_name(&name),
            is_connected: operstate == "up",
            name,
        });
    }

    Ok(adapters)
}

fn is_tunnel_name(name: &str) -> bool {
    ["tun", "tap", "wg", "ppp", "utun", "tailscale"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

pub(crate) async fn capture_backup(adapter: &HostAdapter) -> Result<AdapterBackup> {
    let output = tokio::process::Command::new("resolvectl")
        .arg("dns")
        .arg(&adapter.name)
        .output()
        .await
        .context("`resolvectl dns` didn't run")?;
    if !output.status.success() {
        bail!("`resolvectl dns {}` returned non-zero", adapter.name);
    }
    let dns_output =
        String::from_utf8(output.stdout).context("`resolvectl dns` output was not UTF-8")?;
    let addrs = parse_link_dns(&dns_output);

    let status_output = tokio::process::Command::new("resolvectl")
        .arg("status")
        .arg(&adapter.name)
        .output()
        .await
        .context("`resolvectl status` didn't run")?;
    let status = String::from_utf8_lossy(&status_output.stdout).into_owned();
    // A link with no explicit per-link DNS configured is inheriting from DHCP.
    let dhcp = !status.contains("DNS Servers:") || addrs.is_empty();

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

/// Parses the single-link form of `resolvectl dns <iface>`, e.g.
/// `Link 3 (eth0): 1.1.1.1 2606:4700:4700::1111`.
fn parse_link_dns(s: &str) -> Vec<IpAddr> {
    s.lines()
        .flat_map(|line| line.split(' '))
        .filter_map(|word| IpAddr::from_str(word.trim()).ok())
        .collect()
}

pub(crate) async fn apply_loopback(adapter: &HostAdapter) -> Result<()> {
    run_resolvectl(
        &["dns", &adapter.name, &LOOPBACK_IPV4.to_string(), &LOOPBACK_IPV6.to_string()],
    )
    .await?;
    run_resolvectl(&["domain", &adapter.name, "~."]).await?;

    tracing::info!(adapter = %adapter.name, "Applied loopback DNS");

    Ok(())
}

pub(crate) async fn restore(adapter: &HostAdapter, backup: &AdapterBackup) -> Result<()> {
    if backup.dhcp {
        run_resolvectl(&["revert", &adapter.name]).await?;
    } else {
        let mut args = vec!["dns".to_owned(), adapter.name.clone()];
        args.extend(backup.ipv4_dns.iter().map(ToString::to_string));
        args.extend(backup.ipv6_dns.iter().map(ToString::to_string));
        run_resolvectl(&args.iter().map(String::as_str).collect::<Vec<_>>()).await?;
        run_resolvectl(&["domain", &adapter.name, ""]).await?;
    }

    tracing::info!(adapter = %adapter.name, "Restored original DNS");

    Ok(())
}

pub(crate) async fn flush_dns_cache() -> Result<()> {
    run_resolvectl(&["flush-caches"]).await
}

async fn run_resolvectl(args: &[&str]) -> Result<()> {
    let status = tokio::process::Command::new("resolvectl")
        .args(args)
        .status()
        .await
        .with_context(|| format!("`resolvectl {}` didn't run", args.join(" ")))?;
    if !status.success() {
        bail!("`resolvectl {}` returned non-zero", args.join(" "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_link_dns_output() {
        let output = "Link 3 (eth0): 1.1.1.1 1.0.0.1\n";
        assert_eq!(
            parse_link_dns(output),
            vec![
                IpAddr::from([1, 1, 1, 1]),
                IpAddr::from([1, 0, 0, 1]),
            ]
        );
    }

    #[test]
    fn tunnel_names_are_recognized() {
        assert!(is_tunnel_name("wg0"));
        assert!(is_tunnel_name("tun0"));
        assert!(!is_tunnel_name("eth0"));
    }
}
