use super::*;

/// Receiver side of the control exchange: identify first, then learn who is
/// sending.
pub async fn negotiate_as_receiver<S>(
    stream: &mut S,
    local: &DeviceIdentity,
) -> AppResult<DeviceIdentity>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_identity(stream, local).await?;
    read_identity(stream).await
}

impl TransferService {
    pub(super) async fn run_control_loop(&self, listener: TcpListener, shutdown: ShutdownSignal) {
        while !shutdown.is_triggered() {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.triggered() => break,
            };
            match accepted {
                Ok((stream, address)) => {
                    let service = self.clone();
                    let task_shutdown = shutdown.clone();
                    if let Err(error) = self.spawn_task("transfer_control_session", async move {
                        tokio::select! {
                            _ = service.handle_control_connection(stream, address) => {}
                            _ = task_shutdown.triggered() => {}
                        }
                    }) {
                        tracing::error!(
                            event = "transfer_control_task_spawn_failed",
                            address = %address,
                            error_code = %error.code
                        );
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        event = "transfer_control_accept_failed",
                        error = error.to_string()
                    );
                    sleep(Duration::from_millis(250)).await;
                }
            }
        }
        tracing::debug!(event = "transfer_control_listener_stopped");
    }

    /// Identifies one sender and makes sure its data listener is up before the
    /// control connection closes.
    async fn handle_control_connection(&self, mut stream: TcpStream, address: SocketAddr) {
        let peer = match negotiate_as_receiver(&mut stream, &self.identity).await {
            Ok(peer) => peer,
            Err(error) => {
                tracing::warn!(
                    event = "transfer_handshake_failed",
                    address = %address,
                    error_code = %error.code,
                    error_detail = error.causes.first().map(String::as_str).unwrap_or_default()
                );
                emit_event(
                    self.event_sink.as_ref(),
                    TransferEvent::Failed {
                        direction: TransferDirection::Receive,
                        code: error.code.clone(),
                        message: error.message.clone(),
                    },
                );
                return;
            }
        };
        tracing::info!(
            event = "transfer_peer_identified",
            address = %address,
            variant = %peer.variant,
            os = %peer.os_name
        );
        emit_event(
            self.event_sink.as_ref(),
            TransferEvent::PeerIdentified {
                address: address.ip(),
                identity: peer.clone(),
            },
        );

        if let Err(error) = self.ensure_data_listener(peer.variant).await {
            tracing::error!(
                event = "transfer_data_listener_failed",
                variant = %peer.variant,
                error_code = %error.code,
                error_detail = error.causes.first().map(String::as_str).unwrap_or_default()
            );
            emit_event(
                self.event_sink.as_ref(),
                TransferEvent::Failed {
                    direction: TransferDirection::Receive,
                    code: error.code.clone(),
                    message: error.message.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
#[path = "../../tests/transfer/handshake_tests.rs"]
mod tests;
