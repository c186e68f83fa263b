//! Upstream transport (§4.4): a single `query` operation over either a
//! classical Standard provider (UDP, one attempt per configured address) or
//! a DoH provider (HTTP/2 POST via [`http_client::DohClient`]), including
//! the DoH bootstrap-resolution ladder.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use http_client::DohClient;
use model::{Provider, ProviderKind};
use tokio::{net::UdpSocket, sync::Mutex, time::timeout};

/// Per-attempt timeout for a Standard UDP upstream (§5).
const STANDARD_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
/// Overall timeout for a DoH request (§4.4, §5).
const DOH_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for a single bootstrap UDP resolution attempt (§5).
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Classical resolvers used to bootstrap a DoH hostname when the provider
/// supplies no bootstrap IPs of its own (§4.4 step 3; see DESIGN.md's Open
/// Question decision for why these two).
const WELL_KNOWN_BOOTSTRAP_RESOLVERS: &[IpAddr] = &[
    IpAddr::V4(std::net::Ipv4Addr::new(1, 1, 1, 1)),
    IpAddr::V4(std::net::Ipv4Addr::new(8, 8, 8, 8)),
];

pub struct UpstreamTransport {
    doh: DohClient,
    bootstrap_cache: Mutex<HashMap<String, Vec<IpAddr>>>,
}

impl Default for UpstreamTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamTransport {
    pub fn new() -> Self {
        Self {
            doh: DohClient::new(),
            bootstrap_cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn query(&self, provider: &Provider, query_bytes: &[u8]) -> Result<Vec<u8>> {
        match &provider.kind {
            ProviderKind::Standard { .. } => self.query_standard(provider, query_bytes).await,
            ProviderKind::Doh { url, bootstrap_ips } => {
                self.query_doh(url, bootstrap_ips, query_bytes).await
            }
        }
    }

    async fn query_standard(&self, provider: &Provider, query_bytes: &[u8]) -> Result<Vec<u8>> {
        let addresses = provider.standard_addresses_in_order();
        if addresses.is_empty() {
            bail!("Provider '{}' has no Standard addresses configured", provider.name);
        }

        for addr in addresses {
            match self.try_standard_once(addr, query_bytes).await {
                Ok(response) => return Ok(response),
                Err(e) => tracing::debug!(%addr, "Standard upstream attempt failed: {e:#}"),
            }
        }

        bail!("All Standard upstream addresses for '{}' failed", provider.name)
    }

    async fn try_standard_once(&self, addr: IpAddr, query_bytes: &[u8]) -> Result<Vec<u8>> {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("Failed to bind UDP socket")?;
        socket
            .connect(SocketAddr::new(addr, 53))
            .await
            .context("Failed to connect UDP socket")?;
        socket
            .send(query_bytes)
            .await
            .context("Failed to send UDP query")?;

        let mut buf = vec![0u8; 65535];
        let len = timeout(STANDARD_ATTEMPT_TIMEOUT, socket.recv(&mut buf))
            .await
            .context("Upstream UDP query timed out")?
            .context("Failed to receive UDP response")?;
        buf.truncate(len);

        Ok(buf)
    }

    async fn query_doh(
        &self,
        url: &url::Url,
        provider_bootstrap_ips: &[IpAddr],
        query_bytes: &[u8],
    ) -> Result<Vec<u8>> {
        let ips = self.resolve_bootstrap(url, provider_bootstrap_ips).await?;

        timeout(DOH_REQUEST_TIMEOUT, self.doh.query(url, &ips, query_bytes.to_vec()))
            .await
            .context("DoH request timed out")?
    }

    /// Implements the ladder from §4.4: IP literal, provider bootstrap IPs,
    /// well-known resolvers (cached for the process lifetime), host OS
    /// resolver as a last resort.
    async fn resolve_bootstrap(&self, url: &url::Url, provider_bootstrap_ips: &[IpAddr]) -> Result<Vec<IpAddr>> {
        let host = url.host_str().context("DoH URL has no host")?;

        if let Ok(literal) = IpAddr::from_str(host) {
            return Ok(vec![literal]);
        }

        if !provider_bootstrap_ips.is_empty() {
            return Ok(provider_bootstrap_ips.to_vec());
        }

        {
            let cache = self.bootstrap_cache.lock().await;
            if let Some(ips) = cache.get(host) {
                return Ok(ips.clone());
            }
        }

        if let Some(ips) = self.resolve_via_well_known_resolvers(host).await {
            self.bootstrap_cache
                .lock()
                .await
                .insert(host.to_owned(), ips.clone());
            return Ok(ips);
        }

        tracing::warn!(%host, "Bootstrap resolution exhausted, falling back to host OS resolver");
        let ips: Vec<IpAddr> = tokio::net::lookup_host((host, 443))
            .await
            .with_context(|| format!("Host OS resolver failed for '{host}'"))?
            .map(|addr| addr.ip())
            .collect();

        if ips.is_empty() {
            bail!("Bootstrap resolution failed for '{host}': no avenues succeeded");
        }

        Ok(ips)
    }

    async fn resolve_via_well_known_resolvers(&self, host: &str) -> Option<Vec<IpAddr>> {
        let query = dns_types::Query::new(host, dns_types::rtype::A).ok()?;

        for &resolver in WELL_KNOWN_BOOTSTRAP_RESOLVERS {
            let attempt = async {
                let socket = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
                socket.connect(SocketAddr::new(resolver, 53)).await.ok()?;
                socket.send(query.as_bytes()).await.ok()?;

                let mut buf = vec![0u8; 512];
                let len = socket.recv(&mut buf).await.ok()?;
                buf.truncate(len);

                dns_types::parse_response(&buf).ok()
            };

            if let Ok(Some(summary)) = timeout(BOOTSTRAP_TIMEOUT, attempt).await {
                if summary.is_success() && !summary.a_records.is_empty() {
                    return Some(summary.a_records.into_iter().map(IpAddr::V4).collect());
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn standard_query_fails_fast_with_no_addresses() {
        let transport = UpstreamTransport::new();
        let provider = Provider {
            id: model::ProviderId::random(),
            name: "Empty".into(),
            description: None,
            is_built_in: false,
            kind: ProviderKind::Standard {
                primary_ipv4: None,
                secondary_ipv4: None,
                primary_ipv6: None,
                secondary_ipv6: None,
            },
        };

        let err = transport.query(&provider, &[0u8; 12]).await.unwrap_err();
        assert!(err.to_string().contains("no Standard addresses"));
    }

    #[tokio::test]
    async fn ip_literal_doh_host_skips_bootstrap_resolution() {
        let transport = UpstreamTransport::new();
        let url = url::Url::parse("https://1.1.1.1/dns-query").unwrap();

        let ips = transport.resolve_bootstrap(&url, &[]).await.unwrap();
        assert_eq!(ips, vec![IpAddr::V4(std::net::Ipv4Addr::new(1, 1, 1, 1))]);
    }
}
