mod cli;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use datadash_kernel::settings::{SettingsStore, TransferSettingsPatch};
use datadash_logging::{init_logging, shutdown_logging};
use datadash_transfer::models::TransferEvent;
use datadash_transfer::service::{
    ChannelTransferEventSink, EVENT_CHANNEL_CAPACITY, TransferService,
};
use datadash_transfer::transfer::crypto::{PasswordPrompt, PasswordRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cli::{Cli, Command, ConfigAction};

const SETTINGS_FILE_NAME: &str = "settings.json";
const PROMPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Reads the batch password from the terminal. An empty line dismisses.
///
/// The line is read on a detached thread so that `cancel` can end a pending
/// prompt.
#[derive(Default)]
struct StdinPasswordPrompt {
    canceled: AtomicBool,
}

impl StdinPasswordPrompt {
    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

impl PasswordPrompt for StdinPasswordPrompt {
    fn prompt(&self, request: &PasswordRequest) -> Option<String> {
        if self.canceled.load(Ordering::SeqCst) {
            return None;
        }
        eprint!(
            "password for {} encrypted file(s), {} attempt(s) left (empty to skip): ",
            request.files.len(),
            request.remaining_attempts
        );
        let (sender, receiver) = std_mpsc::channel();
        std::thread::spawn(move || {
            let _ = sender.send(read_password_line());
        });
        loop {
            match receiver.recv_timeout(PROMPT_POLL_INTERVAL) {
                Ok(line) => return line,
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    if self.canceled.load(Ordering::SeqCst) {
                        return None;
                    }
                }
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

fn read_password_line() -> Option<String> {
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            let password = line.trim_end_matches(['\r', '\n']).to_string();
            (!password.is_empty()).then_some(password)
        }
    }
}

fn resolve_data_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(dir) = cli.data_dir.as_ref() {
        return Ok(dir.clone());
    }
    let settings_path = SettingsStore::default_path()?;
    settings_path
        .parent()
        .map(Path::to_path_buf)
        .context("settings path has no parent directory")
}

fn spawn_event_printer(mut events: mpsc::Receiver<TransferEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(error) => tracing::warn!(
                    event = "cli_event_encode_failed",
                    error = error.to_string()
                ),
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = resolve_data_dir(&cli)?;
    let logging = init_logging(&data_dir)?;
    tracing::debug!(
        event = "cli_started",
        level = logging.level(),
        log_dir = %logging.log_dir().display()
    );

    let result = run(cli, &data_dir).await;
    if let Err(error) = result.as_ref() {
        tracing::error!(event = "cli_failed", error = %error);
    }
    shutdown_logging();
    result
}

async fn run(cli: Cli, data_dir: &Path) -> Result<()> {
    let settings = Arc::new(SettingsStore::load(data_dir.join(SETTINGS_FILE_NAME))?);
    let (sink, events) = ChannelTransferEventSink::new(EVENT_CHANNEL_CAPACITY);
    let prompt = Arc::new(StdinPasswordPrompt::default());
    let service = TransferService::new(settings.clone(), Arc::new(sink))
        .with_password_prompt(prompt.clone());
    let printer = spawn_event_printer(events);

    match cli.command {
        Command::Discover => {
            let peers = service.discover().await?;
            if peers.is_empty() {
                eprintln!("no receivers answered");
            }
        }
        Command::Receive => {
            service.start_receiving().await?;
            let current = settings.get();
            eprintln!(
                "receiving as \"{}\" into {} (Ctrl+C to stop)",
                current.device_name,
                current.save_directory.display()
            );
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl+C")?;
            prompt.cancel();
            service.stop().await;
        }
        Command::Send {
            to,
            password,
            plain,
            paths,
        } => {
            let password = match password {
                Some(password) => Some(password),
                None if !plain && settings.get().encryption_enabled => {
                    eprint!("encryption password: ");
                    read_password_line()
                }
                None => None,
            };
            tokio::select! {
                result = service.send(to, paths, password) => {
                    let summary = result?;
                    eprintln!("sent {} file(s), {} bytes", summary.files, summary.bytes);
                }
                _ = tokio::signal::ctrl_c() => {
                    service.cancel_send();
                    eprintln!("send canceled");
                }
            }
        }
        Command::Config { action } => {
            let current = match action {
                ConfigAction::Show => settings.get(),
                ConfigAction::Set {
                    device_name,
                    save_dir,
                    encryption,
                } => settings.update(TransferSettingsPatch {
                    device_name,
                    save_directory: save_dir,
                    encryption_enabled: encryption,
                })?,
            };
            println!("{}", serde_json::to_string_pretty(&current)?);
        }
    }

    // The printer ends once every sink clone is gone.
    drop(service);
    if printer.await.is_err() {
        tracing::warn!(event = "cli_event_printer_failed");
    }
    Ok(())
}
