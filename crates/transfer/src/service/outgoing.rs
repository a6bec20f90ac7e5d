use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::*;
use crate::transfer::crypto::{CRYPT_EXTENSION, encrypt_file};
use crate::transfer::selection::{PlannedFile, TransferPlan};
use crate::transfer::wire::{
    METADATA_FILE_NAME, RecordHeader, encode_metadata, write_halt, write_record_header,
};

const CONTROL_CLOSE_WAIT: Duration = Duration::from_secs(3);

/// Totals reported by a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub bytes: u64,
    pub files: u64,
}

/// Temporary `.crypt` copy removed once its record has been sent.
struct CryptCopy(PathBuf);

impl Drop for CryptCopy {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.0) {
            tracing::warn!(
                event = "transfer_crypt_copy_remove_failed",
                path = %self.0.display(),
                error = error.to_string()
            );
        }
    }
}

/// Streams one planned selection over an established data connection.
pub struct OutgoingTransfer {
    plan: TransferPlan,
    profile: PeerProfile,
    password: Option<String>,
}

impl OutgoingTransfer {
    pub fn new(plan: TransferPlan, profile: PeerProfile, password: Option<String>) -> Self {
        let password = password.filter(|value| !value.is_empty());
        let password = match password {
            Some(_) if !profile.supports_encryption => {
                tracing::warn!(
                    event = "transfer_encryption_unsupported",
                    variant = %profile.variant
                );
                None
            }
            other => other,
        };
        Self {
            plan,
            profile,
            password,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.password.is_some()
    }

    pub async fn run<W>(
        self,
        writer: &mut W,
        sink: Arc<dyn TransferEventSink>,
    ) -> AppResult<TransferSummary>
    where
        W: AsyncWrite + Unpin,
    {
        let mut reporter = ProgressReporter::new(
            sink,
            TransferDirection::Send,
            self.plan.total_bytes,
            self.plan.files_total(),
        );
        reporter.emit_file_count();

        let metadata = encode_metadata(&self.plan.metadata)?;
        write_record_header(
            writer,
            &RecordHeader {
                encrypted: false,
                name: METADATA_FILE_NAME.to_string(),
                size: metadata.len() as u64,
            },
        )
        .await?;
        writer
            .write_all(&metadata)
            .await
            .map_err(|error| stream_write_error(error, METADATA_FILE_NAME))?;

        for file in &self.plan.files {
            self.send_file(writer, file, &mut reporter).await?;
        }

        write_halt(writer).await?;
        writer
            .shutdown()
            .await
            .map_err(|error| stream_write_error(error, "shutdown"))?;

        reporter.complete();
        Ok(TransferSummary {
            bytes: reporter.bytes(),
            files: reporter.files_done(),
        })
    }

    async fn send_file<W>(
        &self,
        writer: &mut W,
        file: &PlannedFile,
        reporter: &mut ProgressReporter,
    ) -> AppResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let (source, name, _crypt_copy) = match self.password.as_ref() {
            Some(password) => {
                let plain = file.source.clone();
                let password = password.clone();
                let encrypted =
                    run_blocking("transfer_encrypt_file", move || encrypt_file(&plain, &password))
                        .await?;
                let name = format!("{}.{CRYPT_EXTENSION}", file.wire_path);
                (encrypted.clone(), name, Some(CryptCopy(encrypted)))
            }
            None => (file.source.clone(), file.wire_path.clone(), None),
        };

        let mut input = open_source(&source).await?;
        let size = input
            .metadata()
            .await
            .map(|metadata| metadata.len())
            .map_err(|error| source_read_error(error, &source))?;

        write_record_header(
            writer,
            &RecordHeader {
                encrypted: self.password.is_some(),
                name: name.clone(),
                size,
            },
        )
        .await?;

        reporter.start_file(Some(file.size));
        let mut buffer = vec![0u8; self.profile.chunk_size.max(1)];
        let mut sent = 0u64;
        while sent < size {
            let want = (size - sent).min(buffer.len() as u64) as usize;
            let read = input
                .read(&mut buffer[..want])
                .await
                .map_err(|error| source_read_error(error, &source))?;
            if read == 0 {
                return Err(AppError::new(
                    "filesystem_source_changed",
                    "file shrank while it was being sent",
                )
                .with_context("path", source.display().to_string())
                .with_context("expected", size.to_string())
                .with_context("sent", sent.to_string()));
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|error| stream_write_error(error, "content"))?;
            sent += read as u64;
            reporter.advance(&file.wire_path, sent, size, read as u64);
        }
        reporter.finish_file(&file.wire_path);
        tracing::debug!(event = "transfer_file_sent", path = %name, size);
        Ok(())
    }
}

async fn open_source(path: &Path) -> AppResult<File> {
    File::open(path)
        .await
        .map_err(|error| source_read_error(error, path))
}

fn source_read_error(error: std::io::Error, path: &Path) -> AppError {
    AppError::new("filesystem_read_failed", "failed to read file being sent")
        .with_source(error)
        .with_context("path", path.display().to_string())
}

fn stream_write_error(error: std::io::Error, field: &'static str) -> AppError {
    AppError::new("connection_write_failed", "failed to write to data connection")
        .with_source(error)
        .with_context("field", field)
}

pub(super) async fn connect(address: SocketAddr, stage: &'static str) -> AppResult<TcpStream> {
    TcpStream::connect(address).await.map_err(|error| {
        AppError::new("connection_connect_failed", "failed to connect to peer")
            .with_source(error)
            .with_context("address", address.to_string())
            .with_context("stage", stage)
    })
}

/// Sender side of the control exchange: the receiver speaks first.
pub async fn negotiate_as_sender<S>(
    stream: &mut S,
    local: &DeviceIdentity,
) -> AppResult<DeviceIdentity>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = read_identity(stream).await?;
    write_identity(stream, local).await?;
    Ok(peer)
}

/// Waits for the receiver to close the control connection, which it does
/// once its data listener is bound.
async fn wait_for_control_close(stream: &mut TcpStream) {
    let mut scratch = [0u8; 64];
    let wait = async {
        loop {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    };
    if timeout(CONTROL_CLOSE_WAIT, wait).await.is_err() {
        tracing::warn!(event = "transfer_control_close_timeout");
    }
}

impl TransferService {
    /// Sends `paths` to the receiver at `peer`.
    ///
    /// A non-empty `password` encrypts every file when the receiver supports
    /// it. Only one send runs at a time; a second call fails with
    /// `transfer_send_busy`.
    pub async fn send(
        &self,
        peer: IpAddr,
        paths: Vec<PathBuf>,
        password: Option<String>,
    ) -> AppResult<TransferSummary> {
        let Ok(_slot) = self.send_slot.try_lock() else {
            return Err(AppError::new(
                "transfer_send_busy",
                "another send is already running",
            ));
        };

        let shutdown = ShutdownSignal::new();
        *lock_mutex(self.send_shutdown.as_ref(), "send_shutdown") = Some(shutdown.clone());

        let result = tokio::select! {
            result = self.run_send(peer, paths, password) => result,
            _ = shutdown.triggered() => Err(AppError::canceled()),
        };
        lock_mutex(self.send_shutdown.as_ref(), "send_shutdown").take();

        match &result {
            Ok(summary) => tracing::info!(
                event = "transfer_send_completed",
                peer = %peer,
                bytes = summary.bytes,
                files = summary.files
            ),
            Err(error) if error.is_canceled() => {
                tracing::info!(event = "transfer_send_canceled", peer = %peer);
            }
            Err(error) => {
                tracing::warn!(
                    event = "transfer_send_failed",
                    peer = %peer,
                    error_code = %error.code,
                    error_detail = error.causes.first().map(String::as_str).unwrap_or_default()
                );
                emit_event(
                    self.event_sink.as_ref(),
                    TransferEvent::Failed {
                        direction: TransferDirection::Send,
                        code: error.code.clone(),
                        message: error.message.clone(),
                    },
                );
            }
        }
        result
    }

    /// Stops the running send, if any. The data connection is dropped
    /// without a halt record.
    pub fn cancel_send(&self) {
        if let Some(shutdown) = lock_mutex(self.send_shutdown.as_ref(), "send_shutdown").as_ref() {
            shutdown.trigger();
        }
    }

    async fn run_send(
        &self,
        peer: IpAddr,
        paths: Vec<PathBuf>,
        password: Option<String>,
    ) -> AppResult<TransferSummary> {
        let plan = run_blocking("transfer_plan_selection", move || plan_selection(&paths)).await?;
        let identity = self.identify_receiver(peer).await?;
        let profile = self.ports.profile(identity.variant);
        tracing::info!(
            event = "transfer_send_started",
            peer = %peer,
            variant = %identity.variant,
            data_port = profile.data_port,
            files = plan.files_total(),
            bytes = plan.total_bytes
        );

        let mut stream = connect(SocketAddr::new(peer, profile.data_port), "data").await?;
        OutgoingTransfer::new(plan, profile, password)
            .run(&mut stream, self.event_sink.clone())
            .await
    }

    /// Control-port exchange with a receiver.
    pub async fn identify_receiver(&self, peer: IpAddr) -> AppResult<DeviceIdentity> {
        let mut control = connect(SocketAddr::new(peer, self.ports.control), "control").await?;
        let identity = negotiate_as_sender(&mut control, &self.identity).await?;
        emit_event(
            self.event_sink.as_ref(),
            TransferEvent::PeerIdentified {
                address: peer,
                identity: identity.clone(),
            },
        );
        wait_for_control_close(&mut control).await;
        Ok(identity)
    }
}

#[cfg(test)]
#[path = "../../tests/transfer/outgoing_tests.rs"]
mod tests;
