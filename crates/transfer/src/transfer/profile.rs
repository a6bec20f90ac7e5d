use std::net::{IpAddr, Ipv4Addr};

use crate::models::DeviceVariant;

pub const DISCOVERY_PORT: u16 = 49185;
pub const DISCOVERY_REPLY_PORT: u16 = 49186;
pub const CONTROL_PORT: u16 = 54314;
pub const DESKTOP_DATA_PORT: u16 = 57341;
pub const ANDROID_DATA_PORT: u16 = 63152;
pub const SWIFT_DATA_PORT: u16 = 58100;

pub const DESKTOP_CHUNK_SIZE: usize = 1024 * 1024;
pub const ANDROID_CHUNK_SIZE: usize = 4096;
pub const SWIFT_CHUNK_SIZE: usize = 4096;

/// Fixed ports of the LAN protocol. Only tests move them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPorts {
    pub discovery: u16,
    pub discovery_reply: u16,
    pub control: u16,
    pub desktop_data: u16,
    pub android_data: u16,
    pub swift_data: u16,
    pub broadcast_address: IpAddr,
}

impl Default for TransferPorts {
    fn default() -> Self {
        Self {
            discovery: DISCOVERY_PORT,
            discovery_reply: DISCOVERY_REPLY_PORT,
            control: CONTROL_PORT,
            desktop_data: DESKTOP_DATA_PORT,
            android_data: ANDROID_DATA_PORT,
            swift_data: SWIFT_DATA_PORT,
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
        }
    }
}

impl TransferPorts {
    pub fn data_port(&self, variant: DeviceVariant) -> u16 {
        match variant {
            DeviceVariant::Python => self.desktop_data,
            DeviceVariant::Java => self.android_data,
            DeviceVariant::Swift => self.swift_data,
        }
    }

    /// Streaming parameters used when talking to a peer of `variant`.
    pub fn profile(&self, variant: DeviceVariant) -> PeerProfile {
        let (chunk_size, supports_encryption) = match variant {
            DeviceVariant::Python => (DESKTOP_CHUNK_SIZE, true),
            DeviceVariant::Java => (ANDROID_CHUNK_SIZE, true),
            DeviceVariant::Swift => (SWIFT_CHUNK_SIZE, false),
        };
        PeerProfile {
            variant,
            data_port: self.data_port(variant),
            chunk_size,
            supports_encryption,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerProfile {
    pub variant: DeviceVariant,
    pub data_port: u16,
    pub chunk_size: usize,
    pub supports_encryption: bool,
}
