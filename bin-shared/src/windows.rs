use std::{net::IpAddr, ptr::null};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use model::{AdapterBackup, AdapterId};
use windows::Win32::{
    Foundation::ERROR_BUFFER_OVERFLOW,
    NetworkManagement::{
        IpHelper::{GetAdaptersAddresses, GET_ADAPTERS_ADDRESSES_FLAGS, IP_ADAPTER_ADDRESSES_LH},
        Ndis::{IfOperStatusUp, IF_TYPE_SOFTWARE_LOOPBACK, IF_TYPE_TUNNEL},
    },
    Networking::WinSock::AF_UNSPEC,
};

use crate::{HostAdapter, LOOPBACK_IPV4, LOOPBACK_IPV6};

pub(crate) async fn enumerate_adapters() -> Result<Vec<HostAdapter>> {
    tokio::task::spawn_blocking(list_adapters)
        .await
        .context("Adapter enumeration task panicked")?
}

fn list_adapters() -> Result<Vec<HostAdapter>> {
    // 15 kB is large enough to almost never need a second call.
    let mut buffer = vec![0u8; 15_000];
    let mut buffer_len = buffer.len() as u32;

    // SAFETY: `buffer` is valid for `buffer_len` bytes and outlives the call.
    let mut result = unsafe {
        GetAdaptersAddresses(
            AF_UNSPEC.0 as u32,
            GET_ADAPTERS_ADDRESSES_FLAGS(0),
            Some(null()),
            Some(buffer.as_mut_ptr().cast()),
            &mut buffer_len,
        )
    };

    if result == ERROR_BUFFER_OVERFLOW.0 {
        buffer = vec![0u8; buffer_len as usize];
        // SAFETY: same as above, with the grown buffer.
        result = unsafe {
            GetAdaptersAddresses(
                AF_UNSPEC.0 as u32,
                GET_ADAPTERS_ADDRESSES_FLAGS(0),
                Some(null()),
                Some(buffer.as_mut_ptr().cast()),
                &mut buffer_len,
            )
        };
    }

    if result != 0 {
        bail!("GetAdaptersAddresses failed with code {result}");
    }

    let mut adapters = Vec::new();
    let mut next = buffer.as_ptr().cast::<IP_ADAPTER_ADDRESSES_LH>();

    while let Some(adapter) = unsafe { next.as_ref() } {
        // SAFETY: `FriendlyName` is a null-terminated wide string owned by `buffer`.
        let name = unsafe { adapter.FriendlyName.to_string() }.unwrap_or_default();

        adapters.push(HostAdapter {
            id: AdapterId::new(name.clone()),
            // `netsh` below addresses interfaces by friendly name, so the
            // numeric index is informational only; avoid reaching into the
            // union field of `IP_ADAPTER_ADDRESSES_LH` that holds it.
            interface_index: 0,
            is_loopback: adapter.IfType == IF_TYPE_SOFTWARE_LOOPBACK,
            is_tunnel: adapter.IfType == IF_TYPE_TUNNEL,
            is_connected: adapter.OperStatus == IfOperStatusUp,
            name,
        });

        next = adapter.Next;
    }

    Ok(adapters)
}

pub(crate) async fn capture_backup(adapter: &HostAdapter) -> Result<AdapterBackup> {
    let name = adapter.netsh_name();
    let output = tokio::process::Command::new("netsh")
        .args(["interface", "ip", "show", "dns", name.as_str()])
        .output()
        .await
        .context("`netsh interface ip show dns` didn't run")?;
    if !output.status.success() {
        bail!("`netsh interface ip show dns` returned non-zero for {}", adapter.name);
    }

    let text = String::from_utf8_lossy(&output.stdout).into_owned();
    let dhcp = text.contains("DHCP");
    let addrs: Vec<IpAddr> = text
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .filter_map(|word| word.parse().ok())
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
    let name = adapter.netsh_name();
    run_netsh(&[
        "interface",
        "ip",
        "set",
        "dns",
        &name,
        "source=static",
        &format!("addr={LOOPBACK_IPV4}"),
        "register=none",
    ])
    .await?;
    run_netsh(&[
        "interface",
        "ipv6",
        "set",
        "dns",
        &name,
        "source=static",
        &format!("addr={LOOPBACK_IPV6}"),
        "register=none",
    ])
    .await?;

    tracing::info!(adapter = %adapter.name, "Applied loopback DNS");

    Ok(())
}

pub(crate) async fn restore(adapter: &HostAdapter, backup: &AdapterBackup) -> Result<()> {
    let name = adapter.netsh_name();

    if backup.dhcp {
        run_netsh(&["interface", "ip", "set", "dns", &name, "source=dhcp"]).await?;
        run_netsh(&["interface", "ipv6", "set", "dns", &name, "source=dhcp"]).await?;
    } else {
        for (i, addr) in backup.ipv4_dns.iter().enumerate() {
            let verb = if i == 0 { "set" } else { "add" };
            run_netsh(&["interface", "ip", verb, "dns", &name, &format!("addr={addr}")]).await?;
        }
        for (i, addr) in backup.ipv6_dns.iter().enumerate() {
            let verb = if i == 0 { "set" } else { "add" };
            run_netsh(&["interface", "ipv6", verb, "dns", &name, &format!("addr={addr}")]).await?;
        }
    }

    tracing::info!(adapter = %adapter.name, "Restored original DNS");

    Ok(())
}

pub(crate) async fn flush_dns_cache() -> Result<()> {
    run_netsh(&["interface", "ip", "delete", "dnscache"]).await
}

async fn run_netsh(args: &[&str]) -> Result<()> {
    let status = tokio::process::Command::new("netsh")
        .args(args)
        .status()
        .await
        .with_context(|| format!("`netsh {}` didn't run", args.join(" ")))?;
    if !status.success() {
        bail!("`netsh {}` returned non-zero", args.join(" "));
    }
    Ok(())
}
