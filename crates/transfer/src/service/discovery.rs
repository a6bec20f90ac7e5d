use super::*;
use crate::transfer::discovery::{run_discovery_round, run_responder};

struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TransferService {
    /// Broadcasts one discovery request and collects replies for the
    /// configured window. Rounds never overlap.
    pub async fn discover(&self) -> AppResult<Vec<DiscoveredPeer>> {
        if self.discovery_in_flight.swap(true, Ordering::AcqRel) {
            return Err(AppError::new(
                "discovery_busy",
                "a discovery round is already running",
            ));
        }
        let _guard = InFlightGuard(self.discovery_in_flight.clone());

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.ports.discovery_reply))
            .await
            .map_err(|error| bind_failed(error, self.ports.discovery_reply))?;
        socket.set_broadcast(true).map_err(|error| {
            AppError::new("discovery_broadcast_unavailable", "failed to enable broadcast")
                .with_source(error)
        })?;

        let target = SocketAddr::new(self.ports.broadcast_address, self.ports.discovery);
        let sink = self.event_sink.clone();
        let peers = run_discovery_round(&socket, target, self.discovery_window, |peer| {
            emit_event(
                sink.as_ref(),
                TransferEvent::PeerDiscovered { peer: peer.clone() },
            );
        })
        .await?;
        tracing::info!(event = "discovery_round_finished", peers = peers.len());
        Ok(peers)
    }

    pub(super) async fn spawn_responder(
        &self,
        shutdown: ShutdownSignal,
    ) -> AppResult<JoinHandle<()>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.ports.discovery))
            .await
            .map_err(|error| bind_failed(error, self.ports.discovery))?;
        let settings = self.settings.clone();
        let reply_port = self.ports.discovery_reply;
        self.spawn_task("transfer_discovery_responder", async move {
            run_responder(socket, reply_port, move || settings.get().device_name, shutdown).await;
        })
    }
}
