//! Exercises the real loopback listeners end-to-end: a UDP client talks to
//! the forwarder on `127.0.0.1:53`, which relays to a fake upstream bound on
//! `127.0.0.2:53`. Needs permission to bind a privileged port, so it's
//! `#[ignore]`d by default.

#![allow(clippy::unwrap_used)]

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use model::{Provider, ProviderId, ProviderKind};
use service::{forwarder::Forwarder, upstream::UpstreamTransport};
use tokio::net::UdpSocket;

const FAKE_UPSTREAM: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

#[tokio::test]
#[ignore = "needs root/administrator to bind port 53"]
async fn a_query_sent_to_the_loopback_listener_comes_back_via_the_fake_upstream() {
    let _guard = logging::test("debug");

    let canned_response = b"fake dns response payload".to_vec();
    let fake_upstream = UdpSocket::bind((FAKE_UPSTREAM, 53)).await.unwrap();
    let response_for_task = canned_response.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        let (len, peer) = fake_upstream.recv_from(&mut buf).await.unwrap();
        assert!(len > 0);
        fake_upstream.send_to(&response_for_task, peer).await.unwrap();
    });

    let provider = Arc::new(Provider {
        id: ProviderId::random(),
        name: "Fake".into(),
        description: None,
        is_built_in: false,
        kind: ProviderKind::Standard {
            primary_ipv4: Some(FAKE_UPSTREAM),
            secondary_ipv4: None,
            primary_ipv6: None,
            secondary_ipv6: None,
        },
    });

    let transport = Arc::new(UpstreamTransport::new());
    let (_tx, rx) = tokio::sync::watch::channel(provider);
    let forwarder = Forwarder::start(transport, rx).await.unwrap();

    let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    client.connect((Ipv4Addr::LOCALHOST, 53)).await.unwrap();
    client.send(&[0u8; 12]).await.unwrap();

    let mut buf = [0u8; 512];
    let len = tokio::time::timeout(Duration::from_secs(2), client.recv(&mut buf))
        .await
        .expect("forwarder should have replied")
        .unwrap();

    assert_eq!(&buf[..len], canned_response.as_slice());
    assert_eq!(forwarder.queries_handled(), 1);

    forwarder.stop().await;
}
