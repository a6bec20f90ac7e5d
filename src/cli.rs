use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "datadash")]
#[command(about = "Send files and folders to devices on the local network", long_about = None)]
pub struct Cli {
    /// Directory holding settings and logs. Defaults to ~/.datadash.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Broadcast one discovery round and list the receivers that answered.
    Discover,
    /// Answer discovery and accept transfers until interrupted.
    Receive,
    /// Send one folder or any number of files to a receiver.
    Send {
        /// Receiver address, as printed by `discover`.
        #[arg(long)]
        to: IpAddr,
        /// Encrypt with this password instead of prompting for one.
        #[arg(long, conflicts_with = "plain")]
        password: Option<String>,
        /// Send without encryption even when it is enabled in settings.
        #[arg(long)]
        plain: bool,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show or change settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    Show,
    Set {
        #[arg(long)]
        device_name: Option<String>,
        #[arg(long)]
        save_dir: Option<PathBuf>,
        #[arg(long)]
        encryption: Option<bool>,
    },
}
