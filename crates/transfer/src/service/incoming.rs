use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;
use crate::transfer::crypto::{CRYPT_EXTENSION, PasswordPrompt, decrypt_batch};
use crate::transfer::paths::{
    join_wire_path, resolve_conflict_dir, resolve_conflict_path, wire_components,
};
use crate::transfer::wire::{
    MAX_METADATA_LEN, MetadataDocument, Record, RecordHeader, decode_metadata, read_exact_vec,
    read_record,
};

/// What a finished receive left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Recreated folder for a folder transfer, otherwise the save directory.
    pub destination_root: PathBuf,
    pub bytes: u64,
    pub files: u64,
    /// Encrypted files written as-is, waiting for a password.
    pub encrypted_pending: Vec<PathBuf>,
    /// `false` when the sender closed the stream without a halt record.
    pub halted: bool,
}

/// Per-connection state built from the metadata record.
#[derive(Debug)]
struct ReceiveSession {
    save_directory: PathBuf,
    destination_root: PathBuf,
    folder_root: Option<String>,
    strip_folder_prefix: bool,
    planned_sizes: HashMap<String, u64>,
    encrypted_pending: Vec<PathBuf>,
}

impl ReceiveSession {
    fn new(save_directory: PathBuf) -> Self {
        Self {
            destination_root: save_directory.clone(),
            save_directory,
            folder_root: None,
            strip_folder_prefix: false,
            planned_sizes: HashMap::new(),
            encrypted_pending: Vec::new(),
        }
    }

    fn apply_metadata(&mut self, document: &MetadataDocument) -> AppResult<()> {
        self.planned_sizes = document
            .files()
            .map(|entry| (entry.path.clone(), entry.size))
            .collect();
        if !document.is_folder_transfer() {
            self.folder_root = None;
            self.strip_folder_prefix = false;
            self.destination_root = self.save_directory.clone();
            return Ok(());
        }

        let root = document.folder_root().ok_or_else(|| {
            AppError::new(
                "protocol_metadata_invalid",
                "folder transfer carries no folder name",
            )
        })?;
        let root = wire_components(&root)?.join("_");
        let destination = resolve_conflict_dir(&self.save_directory.join(&root));
        std::fs::create_dir_all(&destination)
            .map_err(|error| write_failed(error, &destination))?;

        // Some senders prefix every path with the folder name, others don't.
        let prefix = format!("{root}/");
        self.strip_folder_prefix = !document.entries.is_empty()
            && document
                .entries
                .iter()
                .all(|entry| entry.path.starts_with(&prefix));
        self.folder_root = Some(root);
        self.destination_root = destination;

        for entry in document.directories() {
            let relative = self.relative_name(&entry.path);
            if relative.trim_matches('/').is_empty() {
                continue;
            }
            let path = join_wire_path(&self.destination_root, relative)?;
            std::fs::create_dir_all(&path).map_err(|error| write_failed(error, &path))?;
        }
        tracing::debug!(
            event = "transfer_receive_folder_prepared",
            destination = %self.destination_root.display(),
            strip_prefix = self.strip_folder_prefix
        );
        Ok(())
    }

    fn relative_name<'a>(&self, name: &'a str) -> &'a str {
        match self.folder_root.as_deref() {
            Some(root) if self.strip_folder_prefix => name
                .strip_prefix(root)
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(name),
            _ => name,
        }
    }

    /// Size the metadata announced for a record, looked up under its
    /// plaintext name.
    fn planned_size(&self, header: &RecordHeader) -> Option<u64> {
        let name = header.name.replace('\\', "/");
        let name = if header.encrypted {
            name.strip_suffix(&format!(".{CRYPT_EXTENSION}"))
                .map(str::to_string)
                .unwrap_or(name)
        } else {
            name
        };
        self.planned_sizes.get(&name).copied()
    }

    /// Collision-free target for a file record.
    fn target_for(&self, header: &RecordHeader) -> AppResult<PathBuf> {
        let target = if self.folder_root.is_some() {
            join_wire_path(&self.destination_root, self.relative_name(&header.name))?
        } else {
            let components = wire_components(&header.name)?;
            let file_name = components.last().ok_or_else(|| {
                AppError::new("protocol_path_invalid", "record has an empty name")
            })?;
            self.destination_root.join(file_name)
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|error| write_failed(error, parent))?;
        }
        Ok(resolve_conflict_path(&target))
    }
}

/// Writes one incoming record stream under the save directory.
pub struct IncomingTransfer {
    save_directory: PathBuf,
    chunk_size: usize,
}

impl IncomingTransfer {
    pub fn new(save_directory: impl Into<PathBuf>, profile: PeerProfile) -> Self {
        Self {
            save_directory: save_directory.into(),
            chunk_size: profile.chunk_size.max(1),
        }
    }

    pub async fn run<R>(
        self,
        reader: &mut R,
        sink: Arc<dyn TransferEventSink>,
    ) -> AppResult<ReceiveOutcome>
    where
        R: AsyncRead + Unpin,
    {
        if !self.save_directory.is_dir() {
            return Err(save_dir_missing(&self.save_directory));
        }

        let mut session = ReceiveSession::new(self.save_directory.clone());
        let mut reporter = ProgressReporter::new(sink, TransferDirection::Receive, 0, 0);
        let mut buffer = vec![0u8; self.chunk_size];
        let mut halted = false;

        loop {
            let header = match read_record(reader).await? {
                Some(Record::File(header)) => header,
                Some(Record::Halt) => {
                    halted = true;
                    break;
                }
                None => {
                    tracing::warn!(event = "transfer_receive_closed_without_halt");
                    break;
                }
            };

            if header.is_metadata() {
                let body =
                    read_exact_vec(reader, header.size, MAX_METADATA_LEN, "metadata").await?;
                let document = decode_metadata(&body)?;
                session.apply_metadata(&document)?;
                reporter.set_totals(document.total_bytes(), document.file_count());
                reporter.emit_file_count();
                continue;
            }

            let target = session.target_for(&header)?;
            let display_name = session.relative_name(&header.name).to_string();
            reporter.start_file(session.planned_size(&header));
            let received = receive_content(
                reader,
                &target,
                &header,
                &mut buffer,
                &display_name,
                &mut reporter,
            )
            .await;
            if let Err(error) = received {
                remove_partial(&target).await;
                return Err(error);
            }
            reporter.finish_file(&display_name);
            if header.encrypted {
                session.encrypted_pending.push(target);
            }
        }

        reporter.complete();
        Ok(ReceiveOutcome {
            destination_root: session.destination_root,
            bytes: reporter.bytes(),
            files: reporter.files_done(),
            encrypted_pending: session.encrypted_pending,
            halted,
        })
    }
}

async fn receive_content<R>(
    reader: &mut R,
    target: &Path,
    header: &RecordHeader,
    buffer: &mut [u8],
    display_name: &str,
    reporter: &mut ProgressReporter,
) -> AppResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut output = File::create(target)
        .await
        .map_err(|error| write_failed(error, target))?;

    let mut received = 0u64;
    while received < header.size {
        let want = (header.size - received).min(buffer.len() as u64) as usize;
        let read = reader.read(&mut buffer[..want]).await.map_err(|error| {
            AppError::new("connection_read_failed", "failed to read file content")
                .with_source(error)
                .with_context("name", header.name.clone())
        })?;
        if read == 0 {
            return Err(AppError::new(
                "connection_lost",
                "sender closed the connection mid-file",
            )
            .with_context("name", header.name.clone())
            .with_context("expected", header.size.to_string())
            .with_context("received", received.to_string()));
        }
        output
            .write_all(&buffer[..read])
            .await
            .map_err(|error| write_failed(error, target))?;
        received += read as u64;
        reporter.advance(display_name, received, header.size, read as u64);
    }
    output
        .flush()
        .await
        .map_err(|error| write_failed(error, target))
}

async fn remove_partial(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        tracing::warn!(
            event = "transfer_partial_remove_failed",
            path = %path.display(),
            error = error.to_string()
        );
    }
}

fn write_failed(error: std::io::Error, path: &Path) -> AppError {
    AppError::new("filesystem_write_failed", "failed to write received data")
        .with_source(error)
        .with_context("path", path.display().to_string())
}

pub(super) fn save_dir_missing(path: &Path) -> AppError {
    AppError::new(
        "filesystem_save_dir_missing",
        "save directory does not exist",
    )
    .with_context("path", path.display().to_string())
}

impl TransferService {
    /// Binds the data listener for senders of `variant` once per receiver run.
    pub(super) async fn ensure_data_listener(&self, variant: DeviceVariant) -> AppResult<()> {
        let shutdown = {
            let mut receiver = lock_mutex(self.receiver.as_ref(), "receiver");
            let Some(runtime) = receiver.as_mut() else {
                return Err(AppError::new(
                    "transfer_receiver_stopped",
                    "receiver is not running",
                ));
            };
            if !runtime.data_variants.insert(variant) {
                return Ok(());
            }
            runtime.shutdown.clone()
        };

        let profile = self.ports.profile(variant);
        let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, profile.data_port)).await {
            Ok(listener) => listener,
            Err(error) => {
                if let Some(runtime) = lock_mutex(self.receiver.as_ref(), "receiver").as_mut() {
                    runtime.data_variants.remove(&variant);
                }
                return Err(bind_failed(error, profile.data_port));
            }
        };
        tracing::info!(
            event = "transfer_data_listener_started",
            variant = %variant,
            port = profile.data_port
        );

        let service = self.clone();
        let task = self.spawn_task("transfer_data_accept_loop", async move {
            service.run_data_loop(listener, profile, shutdown).await;
        })?;
        if let Some(runtime) = lock_mutex(self.receiver.as_ref(), "receiver").as_mut() {
            runtime.tasks.push(task);
        }
        Ok(())
    }

    async fn run_data_loop(
        &self,
        listener: TcpListener,
        profile: PeerProfile,
        shutdown: ShutdownSignal,
    ) {
        while !shutdown.is_triggered() {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.triggered() => break,
            };
            match accepted {
                Ok((stream, address)) => {
                    self.handle_data_connection(stream, address, profile, &shutdown)
                        .await;
                }
                Err(error) => {
                    tracing::warn!(
                        event = "transfer_data_accept_failed",
                        error = error.to_string()
                    );
                    sleep(Duration::from_millis(250)).await;
                }
            }
        }
        tracing::debug!(event = "transfer_data_listener_stopped", port = profile.data_port);
    }

    async fn handle_data_connection(
        &self,
        mut stream: TcpStream,
        address: SocketAddr,
        profile: PeerProfile,
        shutdown: &ShutdownSignal,
    ) {
        let _slot = self.receive_slot.lock().await;
        let save_directory = self.settings.get().save_directory;
        tracing::info!(
            event = "transfer_receive_started",
            address = %address,
            variant = %profile.variant
        );

        let engine = IncomingTransfer::new(save_directory, profile);
        let result = tokio::select! {
            result = engine.run(&mut stream, self.event_sink.clone()) => result,
            _ = shutdown.triggered() => Err(AppError::canceled()),
        };
        drop(stream);

        match result {
            Ok(outcome) => {
                tracing::info!(
                    event = "transfer_receive_completed",
                    address = %address,
                    bytes = outcome.bytes,
                    files = outcome.files,
                    halted = outcome.halted,
                    destination = %outcome.destination_root.display()
                );
                if !outcome.encrypted_pending.is_empty() {
                    // Stopping never waits on a pending password prompt.
                    tokio::select! {
                        _ = self.decrypt_received(outcome.encrypted_pending) => {}
                        _ = shutdown.triggered() => {
                            tracing::info!(
                                event = "transfer_decrypt_abandoned",
                                address = %address
                            );
                        }
                    }
                }
            }
            Err(error) if error.is_canceled() => {
                tracing::info!(event = "transfer_receive_canceled", address = %address);
            }
            Err(error) => {
                tracing::warn!(
                    event = "transfer_receive_failed",
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
            }
        }
    }

    async fn decrypt_received(&self, paths: Vec<PathBuf>) {
        emit_event(
            self.event_sink.as_ref(),
            TransferEvent::DecryptNeeded {
                paths: paths.clone(),
            },
        );
        let prompt: Arc<dyn PasswordPrompt> = self.password_prompt.clone();
        let result = run_blocking("transfer_decrypt_batch", move || {
            Ok(decrypt_batch(paths, prompt.as_ref()))
        })
        .await;
        match result {
            Ok(report) => {
                tracing::info!(
                    event = "transfer_decrypt_finished",
                    decrypted = report.decrypted.len(),
                    deleted = report.deleted.len(),
                    skipped = report.skipped.len()
                );
                emit_event(
                    self.event_sink.as_ref(),
                    TransferEvent::DecryptFinished { report },
                );
            }
            Err(error) => {
                tracing::error!(
                    event = "transfer_decrypt_batch_failed",
                    error_code = %error.code
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/transfer/incoming_tests.rs"]
mod tests;
