//! The loopback DNS forwarder (§4.5): four concurrent listeners (UDPv4,
//! UDPv6, TCPv4, TCPv6) bound to `127.0.0.1:53` / `[::1]:53`, each query
//! relayed to the currently active provider via [`UpstreamTransport`].

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use model::Provider;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    sync::watch,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::upstream::UpstreamTransport;

const DNS_PORT: u16 = 53;
/// §4.5: oversized TCP framing is dropped without a response.
const MAX_TCP_MESSAGE_LEN: usize = 65535;
/// §4.5: "wait up to 5 seconds for in-flight query tasks to drain".
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// A running instance of the four listeners. Dropping or cancelling the
/// token tears everything down.
pub struct Forwarder {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    queries_handled: Arc<AtomicU64>,
}

impl Forwarder {
    /// Binds all four sockets and starts their listener tasks against
    /// `active_provider`. `active_provider` is a watch channel so a
    /// mid-stream `Switch` affects only new queries; in-flight queries
    /// complete against the provider snapshot they began with (§4.5, §5).
    pub async fn start(
        transport: Arc<UpstreamTransport>,
        active_provider: watch::Receiver<Arc<Provider>>,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let queries_handled = Arc::new(AtomicU64::new(0));
        let mut tasks = JoinSet::new();

        let udp_v4 = UdpSocket::bind((Ipv4Addr::LOCALHOST, DNS_PORT))
            .await
            .context("Failed to bind UDP 127.0.0.1:53")?;
        let udp_v6 = UdpSocket::bind((Ipv6Addr::LOCALHOST, DNS_PORT))
            .await
            .context("Failed to bind UDP [::1]:53")?;
        let tcp_v4 = TcpListener::bind((Ipv4Addr::LOCALHOST, DNS_PORT))
            .await
            .context("Failed to bind TCP 127.0.0.1:53")?;
        let tcp_v6 = TcpListener::bind((Ipv6Addr::LOCALHOST, DNS_PORT))
            .await
            .context("Failed to bind TCP [::1]:53")?;

        tasks.spawn(udp_listener(
            udp_v4,
            transport.clone(),
            active_provider.clone(),
            cancel.clone(),
            queries_handled.clone(),
        ));
        tasks.spawn(udp_listener(
            udp_v6,
            transport.clone(),
            active_provider.clone(),
            cancel.clone(),
            queries_handled.clone(),
        ));
        tasks.spawn(tcp_listener(
            tcp_v4,
            transport.clone(),
            active_provider.clone(),
            cancel.clone(),
            queries_handled.clone(),
        ));
        tasks.spawn(tcp_listener(
            tcp_v6,
            transport,
            active_provider,
            cancel.clone(),
            queries_handled.clone(),
        ));

        Ok(Self {
            cancel,
            tasks,
            queries_handled,
        })
    }

    pub fn queries_handled(&self) -> u64 {
        self.queries_handled.load(Ordering::Relaxed)
    }

    /// Cancels the listeners and waits up to [`SHUTDOWN_DRAIN`] for
    /// in-flight query tasks before force-releasing resources (§4.5 Stop).
    pub async fn stop(mut self) {
        self.cancel.cancel();

        let drain = async {
            while self.tasks.join_next().await.is_some() {}
        };

        if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
            tracing::warn!("Forwarder shutdown drain timed out, abandoning in-flight queries");
            self.tasks.abort_all();
        }
    }
}

async fn udp_listener(
    socket: UdpSocket,
    transport: Arc<UpstreamTransport>,
    active_provider: watch::Receiver<Arc<Provider>>,
    cancel: CancellationToken,
    queries_handled: Arc<AtomicU64>,
) {
    let socket = Arc::new(socket);
    let mut buf = vec![0u8; MAX_TCP_MESSAGE_LEN];

    loop {
        let (len, peer) = tokio::select! {
            _ = cancel.cancelled() => return,
            result = socket.recv_from(&mut buf) => match result {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("UDP recv failed: {e:#}");
                    continue;
                }
            },
        };

        let query = buf[..len].to_vec();
        let provider = active_provider.borrow().clone();
        let transport = transport.clone();
        let socket = socket.clone();
        let queries_handled = queries_handled.clone();

        tokio::spawn(async move {
            match transport.query(&provider, &query).await {
                Ok(response) => {
                    socket.send_to(&response, peer).await.ok();
                    queries_handled.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => tracing::debug!(%peer, "Upstream query failed: {e:#}"),
            }
        });
    }
}

async fn tcp_listener(
    listener: TcpListener,
    transport: Arc<UpstreamTransport>,
    active_provider: watch::Receiver<Arc<Provider>>,
    cancel: CancellationToken,
    queries_handled: Arc<AtomicU64>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => return,
            result = listener.accept() => match result {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("TCP accept failed: {e:#}");
                    continue;
                }
            },
        };

        let transport = transport.clone();
        let provider = active_provider.borrow().clone();
        let queries_handled = queries_handled.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(stream, &transport, provider, &queries_handled, cancel).await {
                tracing::debug!(%peer, "TCP connection ended: {e:#}");
            }
        });
    }
}

async fn handle_tcp_connection(
    mut stream: TcpStream,
    transport: &UpstreamTransport,
    provider: Arc<Provider>,
    queries_handled: &AtomicU64,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = stream.read_exact(&mut len_buf) => result.context("Failed to read TCP length prefix")?,
        };

        let len = u16::from_be_bytes(len_buf) as usize;
        if len == 0 || len > MAX_TCP_MESSAGE_LEN {
            return Ok(());
        }

        let mut query = vec![0u8; len];
        stream
            .read_exact(&mut query)
            .await
            .context("Failed to read TCP query body")?;

        let response = transport.query(&provider, &query).await?;
        let response_len = u16::try_from(response.len())
            .context("Upstream response too large to frame over TCP")?
            .to_be_bytes();

        stream.write_all(&response_len).await?;
        stream.write_all(&response).await?;
        queries_handled.fetch_add(1, Ordering::Relaxed);
    }
}
