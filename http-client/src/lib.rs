//! Long-lived HTTP/2 client for DNS-over-HTTPS upstreams (§4.4 "DoH transport").
//!
//! Connections are cached per-host and reused across queries; an idle
//! connection is torn down and re-established after [`IDLE_TIMEOUT`] rather
//! than kept open forever, since a DoH upstream may rotate the endpoint
//! behind its load balancer.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use rustls::ClientConfig;
use tokio::{net::TcpStream, sync::Mutex, task::JoinSet};
use tokio_rustls::TlsConnector;

type SendRequest = hyper::client::conn::http2::SendRequest<Full<Bytes>>;

const IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DNS_MESSAGE_MIME: &str = "application/dns-message";

struct CachedConn {
    send_request: SendRequest,
    last_used: Instant,
}

/// An HTTP/2 client dedicated to posting DNS wire-format messages to DoH
/// endpoints. One instance is shared by all configured DoH providers; the
/// caller supplies the bootstrap IPs to connect to for a given host, since
/// this client never resolves names itself (§4.4, step 1-4).
///
/// `clients` guards only the connection cache, never the request/response
/// round-trip: an h2 `SendRequest` handle is `Clone` and safe to use
/// concurrently (the connection multiplexes streams), so a query clones its
/// handle out of the lock and the network I/O runs unlocked. Holding the
/// lock across a whole query would serialize every concurrent DoH lookup in
/// the process, which defeats the per-query scheduling the forwarder relies
/// on.
pub struct DohClient {
    tls_config: Arc<ClientConfig>,
    clients: Mutex<HashMap<String, CachedConn>>,
    connections: Mutex<JoinSet<()>>,
}

impl Default for DohClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DohClient {
    pub fn new() -> Self {
        let mut root_cert_store = rustls::RootCertStore::empty();
        root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"h2".to_vec()];

        Self {
            tls_config: Arc::new(config),
            clients: Mutex::new(HashMap::default()),
            connections: Mutex::new(JoinSet::new()),
        }
    }

    /// Sends `message` (a raw DNS wire-format query) as the body of an HTTPS
    /// POST to `url`, connecting to one of `bootstrap_ips` rather than
    /// resolving the host through the system resolver. Returns the response
    /// body, which callers parse as a DNS wire-format message.
    ///
    /// Takes `&self`: the connection cache is locked only to look up or
    /// insert a `SendRequest` handle, never for the request/response
    /// round-trip itself, so concurrent queries (even to different hosts)
    /// never block on each other here.
    pub async fn query(&self, url: &url::Url, bootstrap_ips: &[IpAddr], message: Vec<u8>) -> Result<Vec<u8>> {
        if url.scheme() != "https" {
            bail!("DoH URL '{url}' must use https");
        }

        let host = url.host_str().context("DoH URL has no host")?.to_owned();
        let port = url.port_or_known_default().unwrap_or(443);

        let mut send_request = self.get_or_connect(&host, port, bootstrap_ips).await?;

        send_request
            .ready()
            .await
            .context("Failed to await readiness of HTTP/2 client")?;

        let request = http::Request::builder()
            .method(http::Method::POST)
            .uri(url.as_str())
            .header(http::header::HOST, &host)
            .header(http::header::CONTENT_TYPE, DNS_MESSAGE_MIME)
            .header(http::header::ACCEPT, DNS_MESSAGE_MIME)
            .body(Full::new(Bytes::from(message)))
            .context("Failed to build DoH request")?;

        let response = send_request
            .send_request(request)
            .await
            .context("Failed to send DoH request")?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .context("Failed to receive DoH response body")?
            .to_bytes();

        if !status.is_success() {
            bail!("DoH upstream '{host}' returned HTTP {status}");
        }

        Ok(body.to_vec())
    }

    /// Clones a cached, still-open `SendRequest` out of the lock, or
    /// connects a fresh one and caches it for the next query to reuse.
    async fn get_or_connect(&self, host: &str, port: u16, bootstrap_ips: &[IpAddr]) -> Result<SendRequest> {
        {
            let mut clients = self.clients.lock().await;
            match clients.get(host) {
                Some(cached) if !cached.send_request.is_closed() && cached.last_used.elapsed() < IDLE_TIMEOUT => {
                    let send_request = cached.send_request.clone();
                    clients.get_mut(host).expect("just matched").last_used = Instant::now();
                    return Ok(send_request);
                }
                Some(_) => {
                    clients.remove(host);
                }
                None => {}
            }
        }

        self.connect(host, port, bootstrap_ips).await
    }

    async fn connect(&self, host: &str, port: u16, bootstrap_ips: &[IpAddr]) -> Result<SendRequest> {
        if bootstrap_ips.is_empty() {
            bail!("No bootstrap IPs available for '{host}'");
        }

        tracing::debug!(?bootstrap_ips, %host, "Creating new DoH connection");

        for &ip in bootstrap_ips {
            let addr = SocketAddr::new(ip, port);

            match connect_one(addr, host, self.tls_config.clone()).await {
                Ok((send_request, conn)) => {
                    tracing::debug!(%addr, %host, "Established new DoH connection");

                    self.connections.lock().await.spawn({
                        let host = host.to_owned();

                        async move {
                            match conn.await.context("HTTP/2 connection failed") {
                                Ok(()) => tracing::debug!(%host, "DoH connection finished"),
                                Err(e) => tracing::debug!(%host, "{e:#}"),
                            }
                        }
                    });

                    self.clients.lock().await.insert(
                        host.to_owned(),
                        CachedConn {
                            send_request: send_request.clone(),
                            last_used: Instant::now(),
                        },
                    );

                    return Ok(send_request);
                }
                Err(e) => {
                    tracing::debug!(%addr, %host, "Failed to connect: {e:#}");
                    continue;
                }
            }
        }

        bail!("Failed to connect to any bootstrap IP for '{host}'");
    }
}

async fn connect_one(
    addr: SocketAddr,
    domain: &str,
    tls_config: Arc<ClientConfig>,
) -> Result<(
    hyper::client::conn::http2::SendRequest<Full<Bytes>>,
    hyper::client::conn::http2::Connection<
        hyper_util::rt::TokioIo<tokio_rustls::client::TlsStream<TcpStream>>,
        Full<Bytes>,
        hyper_util::rt::TokioExecutor,
    >,
)> {
    let stream = TcpStream::connect(addr)
        .await
        .context("Failed to connect TCP stream")?;
    stream.set_nodelay(true).ok();

    let connector = TlsConnector::from(tls_config);
    let server_name = rustls_pki_types::ServerName::try_from(domain.to_owned())
        .context("Invalid DNS name for TLS SNI")?;

    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .context("TLS handshake failed")?;

    let (send_request, conn) = hyper::client::conn::http2::handshake(
        hyper_util::rt::TokioExecutor::new(),
        hyper_util::rt::TokioIo::new(tls_stream),
    )
    .await
    .context("HTTP/2 handshake failed")?;

    Ok((send_request, conn))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_rejects_non_https_scheme() {
        let client = DohClient::new();
        let url = url::Url::parse("http://example.com/dns-query").unwrap();

        let err = client.query(&url, &[], vec![0u8; 12]).await.unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[tokio::test]
    async fn query_fails_fast_with_no_bootstrap_ips() {
        let client = DohClient::new();
        let url = url::Url::parse("https://example.com/dns-query").unwrap();

        let err = client.query(&url, &[], vec![0u8; 12]).await.unwrap_err();
        assert!(err.to_string().contains("bootstrap"));
    }
}
