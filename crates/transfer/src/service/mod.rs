//! Long-running transfer service: discovery, receiving and sending.
//!
//! A [`TransferService`] is cheap to clone; every clone drives the same
//! receiver runtime and the same send slot.

use std::collections::HashSet;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use kernel::runtime::{lock_mutex, run_blocking};
use kernel::settings::SettingsStore;
use kernel::shutdown::ShutdownSignal;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};

use crate::models::{
    DeviceIdentity, DeviceVariant, DiscoveredPeer, TransferDirection, TransferEvent,
};
use crate::transfer::crypto::{DismissPasswordPrompt, PasswordPrompt};
use crate::transfer::discovery::DISCOVERY_WINDOW;
use crate::transfer::selection::plan_selection;
use crate::transfer::wire::{read_identity, write_identity};
use crate::transfer::{PeerProfile, TransferPorts};
use crate::{AppError, AppResult};

mod discovery;
mod event_sink;
mod events;
mod handshake;
mod incoming;
mod outgoing;
mod task_spawner;

use events::{ProgressReporter, emit_event};

pub use event_sink::{
    ChannelTransferEventSink, EVENT_CHANNEL_CAPACITY, NoopTransferEventSink, TransferEventSink,
};
pub use handshake::negotiate_as_receiver;
pub use incoming::{IncomingTransfer, ReceiveOutcome};
pub use outgoing::{OutgoingTransfer, TransferSummary, negotiate_as_sender};
pub use task_spawner::{
    NoopTransferTaskSpawner, TokioTransferTaskSpawner, TransferTask, TransferTaskSpawner,
};

/// Sockets and tasks owned by one `start_receiving` call.
struct ReceiverRuntime {
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
    data_variants: HashSet<DeviceVariant>,
}

#[derive(Clone)]
pub struct TransferService {
    event_sink: Arc<dyn TransferEventSink>,
    task_spawner: Arc<dyn TransferTaskSpawner>,
    password_prompt: Arc<dyn PasswordPrompt>,
    settings: Arc<SettingsStore>,
    identity: DeviceIdentity,
    ports: TransferPorts,
    discovery_window: Duration,
    discovery_in_flight: Arc<AtomicBool>,
    receiver: Arc<Mutex<Option<ReceiverRuntime>>>,
    receive_slot: Arc<tokio::sync::Mutex<()>>,
    send_slot: Arc<tokio::sync::Mutex<()>>,
    send_shutdown: Arc<Mutex<Option<ShutdownSignal>>>,
}

impl TransferService {
    pub fn new(settings: Arc<SettingsStore>, event_sink: Arc<dyn TransferEventSink>) -> Self {
        Self {
            event_sink,
            task_spawner: Arc::new(TokioTransferTaskSpawner),
            password_prompt: Arc::new(DismissPasswordPrompt),
            settings,
            identity: DeviceIdentity::local(),
            ports: TransferPorts::default(),
            discovery_window: DISCOVERY_WINDOW,
            discovery_in_flight: Arc::new(AtomicBool::new(false)),
            receiver: Arc::new(Mutex::new(None)),
            receive_slot: Arc::new(tokio::sync::Mutex::new(())),
            send_slot: Arc::new(tokio::sync::Mutex::new(())),
            send_shutdown: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_ports(mut self, ports: TransferPorts) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_password_prompt(mut self, prompt: Arc<dyn PasswordPrompt>) -> Self {
        self.password_prompt = prompt;
        self
    }

    pub fn with_task_spawner(mut self, task_spawner: Arc<dyn TransferTaskSpawner>) -> Self {
        self.task_spawner = task_spawner;
        self
    }

    pub fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }

    pub fn settings(&self) -> &SettingsStore {
        self.settings.as_ref()
    }

    pub fn ports(&self) -> &TransferPorts {
        &self.ports
    }

    pub fn is_receiving(&self) -> bool {
        lock_mutex(self.receiver.as_ref(), "receiver").is_some()
    }

    /// Starts the discovery responder and the control listener.
    ///
    /// Data listeners are bound lazily, one per sender variant, when a sender
    /// identifies itself. Calling this while already receiving is a no-op.
    pub async fn start_receiving(&self) -> AppResult<()> {
        if self.is_receiving() {
            return Ok(());
        }
        let save_directory = self.settings.get().save_directory;
        if !save_directory.is_dir() {
            return Err(incoming::save_dir_missing(&save_directory));
        }

        let control = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.ports.control))
            .await
            .map_err(|error| bind_failed(error, self.ports.control))?;
        let shutdown = ShutdownSignal::new();
        let responder = self.spawn_responder(shutdown.clone()).await?;

        let service = self.clone();
        let control_shutdown = shutdown.clone();
        let control_task = match self.spawn_task("transfer_control_accept_loop", async move {
            service.run_control_loop(control, control_shutdown).await;
        }) {
            Ok(task) => task,
            Err(error) => {
                shutdown.trigger();
                return Err(error);
            }
        };

        *lock_mutex(self.receiver.as_ref(), "receiver") = Some(ReceiverRuntime {
            shutdown,
            tasks: vec![responder, control_task],
            data_variants: HashSet::new(),
        });
        tracing::info!(
            event = "transfer_receiver_started",
            discovery_port = self.ports.discovery,
            control_port = self.ports.control
        );
        Ok(())
    }

    /// Stops every receiver task and waits for their sockets to close. A
    /// receive in progress is abandoned and its partial file kept.
    pub async fn stop_receiving(&self) {
        let runtime = lock_mutex(self.receiver.as_ref(), "receiver").take();
        let Some(runtime) = runtime else {
            return;
        };
        runtime.shutdown.trigger();
        for task in runtime.tasks {
            if let Err(error) = task.await {
                tracing::warn!(
                    event = "transfer_receiver_task_join_failed",
                    error = error.to_string()
                );
            }
        }
        tracing::info!(event = "transfer_receiver_stopped");
    }

    /// Cancels the running send and stops receiving.
    pub async fn stop(&self) {
        self.cancel_send();
        self.stop_receiving().await;
    }

    fn spawn_task<F>(&self, task_name: &'static str, fut: F) -> AppResult<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task: TransferTask = Box::pin(fut);
        self.task_spawner.spawn(task_name, task)
    }
}

fn bind_failed(error: std::io::Error, port: u16) -> AppError {
    AppError::new("connection_bind_failed", "failed to bind local port")
        .with_source(error)
        .with_context("port", port.to_string())
}

#[cfg(test)]
#[path = "../../tests/transfer/service_tests.rs"]
mod tests;
