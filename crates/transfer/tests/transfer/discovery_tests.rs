use super::*;
use std::sync::{Arc, Mutex};

async fn loopback_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.expect("bind udp")
}

#[test]
fn reply_codec_should_round_trip_names() {
    assert_eq!(encode_reply("Desk PC"), b"RECEIVER:Desk PC".to_vec());
    assert_eq!(parse_reply(b"RECEIVER:Desk PC").as_deref(), Some("Desk PC"));
    assert_eq!(parse_reply(b"RECEIVER:"), None);
    assert_eq!(parse_reply(b"HELLO"), None);
    assert_eq!(parse_reply(&[0xff, 0xfe]), None);
    assert!(is_discover_request(b"DISCOVER"));
    assert!(!is_discover_request(b"DISCOVERY"));
}

#[tokio::test]
async fn round_without_responder_should_end_empty_after_window() {
    let socket = loopback_socket().await;
    let silent = loopback_socket().await;
    let target = silent.local_addr().expect("silent addr");

    let started = Instant::now();
    let peers = run_discovery_round(&socket, target, Duration::from_millis(300), |_| {})
        .await
        .expect("round");

    assert!(peers.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn responder_should_answer_each_request_once_and_ignore_noise() {
    let responder_socket = loopback_socket().await;
    let responder_addr = responder_socket.local_addr().expect("responder addr");
    let client = loopback_socket().await;
    let reply_port = client.local_addr().expect("client addr").port();

    let shutdown = ShutdownSignal::new();
    let responder = tokio::spawn(run_responder(
        responder_socket,
        reply_port,
        || "laptop".to_string(),
        shutdown.clone(),
    ));

    client
        .send_to(b"not a request", responder_addr)
        .await
        .expect("send noise");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_callback = seen.clone();
    let peers = run_discovery_round(&client, responder_addr, Duration::from_millis(400), |peer| {
        seen_in_callback.lock().expect("seen lock").push(peer.clone());
    })
    .await
    .expect("round");

    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].display_name, "laptop");
    assert!(peers[0].address.is_loopback());
    assert_eq!(seen.lock().expect("seen lock").len(), 1);

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), responder)
        .await
        .expect("responder stops")
        .expect("responder task");
}

#[tokio::test]
async fn round_should_discard_foreign_datagrams() {
    let client = loopback_socket().await;
    let client_addr = client.local_addr().expect("client addr");
    let fake_peer = loopback_socket().await;
    let fake_addr = fake_peer.local_addr().expect("fake addr");

    let replier = tokio::spawn(async move {
        let mut buffer = [0u8; 64];
        let (size, from) = fake_peer.recv_from(&mut buffer).await.expect("request");
        assert_eq!(&buffer[..size], DISCOVER_REQUEST);
        fake_peer.send_to(b"garbage", from).await.expect("garbage");
        fake_peer.send_to(b"RECEIVER:phone", client_addr).await.expect("reply");
        fake_peer.send_to(b"RECEIVER:phone", client_addr).await.expect("dup reply");
    });

    let peers = run_discovery_round(&client, fake_addr, Duration::from_millis(300), |_| {})
        .await
        .expect("round");
    replier.await.expect("replier");

    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].display_name, "phone");
}
