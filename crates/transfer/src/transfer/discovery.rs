use std::collections::HashSet;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::time::{Duration, Instant, timeout_at};

use crate::models::DiscoveredPeer;
use crate::{AppError, AppResult};
use kernel::shutdown::ShutdownSignal;

pub const DISCOVER_REQUEST: &[u8] = b"DISCOVER";
pub const RECEIVER_PREFIX: &str = "RECEIVER:";
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(1);
const DATAGRAM_BUFFER_LEN: usize = 1024;

pub fn is_discover_request(payload: &[u8]) -> bool {
    payload.trim_ascii() == DISCOVER_REQUEST
}

pub fn encode_reply(device_name: &str) -> Vec<u8> {
    format!("{RECEIVER_PREFIX}{device_name}").into_bytes()
}

/// Display name carried by a reply datagram, if it is one.
pub fn parse_reply(payload: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?;
    let name = text.strip_prefix(RECEIVER_PREFIX)?.trim();
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

/// One bounded discovery round.
///
/// Sends the request from `socket` to `target`, then collects replies arriving
/// on the same socket until `window` elapses. Each distinct (name, address)
/// pair is reported once through `on_peer` and in the returned list.
pub async fn run_discovery_round<F>(
    socket: &UdpSocket,
    target: SocketAddr,
    window: Duration,
    mut on_peer: F,
) -> AppResult<Vec<DiscoveredPeer>>
where
    F: FnMut(&DiscoveredPeer),
{
    socket.send_to(DISCOVER_REQUEST, target).await.map_err(|error| {
        AppError::new("connection_discovery_send_failed", "failed to send discovery request")
            .with_source(error)
            .with_context("target", target.to_string())
    })?;

    let deadline = Instant::now() + window;
    let mut seen = HashSet::new();
    let mut peers = Vec::new();
    let mut buffer = vec![0u8; DATAGRAM_BUFFER_LEN];
    loop {
        let received = match timeout_at(deadline, socket.recv_from(&mut buffer)).await {
            Ok(received) => received,
            Err(_) => break,
        };
        let (size, address) = match received {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(event = "discovery_recv_failed", error = error.to_string());
                continue;
            }
        };
        let Some(display_name) = parse_reply(&buffer[..size]) else {
            tracing::debug!(
                event = "discovery_datagram_discarded",
                address = %address,
                size
            );
            continue;
        };

        let peer = DiscoveredPeer {
            display_name,
            address: address.ip(),
        };
        if seen.insert(peer.clone()) {
            on_peer(&peer);
            peers.push(peer);
        }
    }
    Ok(peers)
}

/// Answers discovery requests on `socket` until `shutdown` fires.
///
/// Replies go to the requester's address on `reply_port`. The device name is
/// read per request so renames apply without a restart.
pub async fn run_responder<F>(
    socket: UdpSocket,
    reply_port: u16,
    device_name: F,
    shutdown: ShutdownSignal,
) where
    F: Fn() -> String,
{
    let mut buffer = vec![0u8; DATAGRAM_BUFFER_LEN];
    while !shutdown.is_triggered() {
        let received = tokio::select! {
            received = socket.recv_from(&mut buffer) => received,
            _ = shutdown.triggered() => break,
        };
        let (size, address) = match received {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(event = "discovery_responder_recv_failed", error = error.to_string());
                continue;
            }
        };
        if !is_discover_request(&buffer[..size]) {
            tracing::debug!(
                event = "discovery_datagram_discarded",
                address = %address,
                size
            );
            continue;
        }

        let target = SocketAddr::new(address.ip(), reply_port);
        if let Err(error) = socket.send_to(&encode_reply(&device_name()), target).await {
            tracing::warn!(
                event = "discovery_reply_failed",
                target = %target,
                error = error.to_string()
            );
        }
    }
    tracing::debug!(event = "discovery_responder_stopped");
}

#[cfg(test)]
#[path = "../../tests/transfer/discovery_tests.rs"]
mod tests;
