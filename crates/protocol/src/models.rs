use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::path::PathBuf;

/// One of the interoperating peer implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceVariant {
    Python,
    Java,
    Swift,
}

impl DeviceVariant {
    pub const ALL: [Self; 3] = [Self::Python, Self::Java, Self::Swift];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Java => "java",
            Self::Swift => "swift",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "python" => Some(Self::Python),
            "java" => Some(Self::Java),
            "swift" => Some(Self::Swift),
            _ => None,
        }
    }
}

impl Display for DeviceVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub variant: DeviceVariant,
    pub os_name: String,
}

impl DeviceIdentity {
    pub fn local() -> Self {
        Self {
            variant: DeviceVariant::Python,
            os_name: std::env::consts::OS.to_string(),
        }
    }
}

/// Element of the metadata document sent ahead of the file records.
///
/// `base_folder_name` is only present on the `.delete` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_folder_name: Option<String>,
    pub path: String,
    pub size: u64,
}

impl TransferEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            base_folder_name: None,
            path: path.into(),
            size,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.ends_with('/') {
            path.push('/');
        }
        Self {
            base_folder_name: None,
            path,
            size: 0,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredPeer {
    pub display_name: String,
    pub address: IpAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Send,
    Receive,
}

/// Outcome of one decrypt batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptReport {
    pub decrypted: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum TransferEvent {
    PeerDiscovered {
        peer: DiscoveredPeer,
    },
    PeerIdentified {
        address: IpAddr,
        identity: DeviceIdentity,
    },
    FileProgress {
        direction: TransferDirection,
        path: String,
        percent: u8,
    },
    OverallProgress {
        direction: TransferDirection,
        percent: u8,
    },
    FileCount {
        direction: TransferDirection,
        total: u64,
        done: u64,
        pending: u64,
    },
    TransferStats {
        direction: TransferDirection,
        speed_mbps: f64,
        eta_seconds: Option<f64>,
        elapsed_seconds: f64,
    },
    DecryptNeeded {
        paths: Vec<PathBuf>,
    },
    DecryptFinished {
        report: DecryptReport,
    },
    Completed {
        direction: TransferDirection,
        bytes: u64,
        files: u64,
    },
    Failed {
        direction: TransferDirection,
        code: String,
        message: String,
    },
}

impl TransferEvent {
    /// Events that must reach the subscriber even under back-pressure.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DecryptNeeded { .. }
                | Self::DecryptFinished { .. }
                | Self::Completed { .. }
                | Self::Failed { .. }
        )
    }
}
