//! Byte-level framing of the control and data streams.
//!
//! Every integer on the wire is an unsigned 64-bit little-endian value. A data
//! record is `tag[8] nameLen[8] name sizeLen[8] content`; the halt tag stands
//! alone.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::models::{DeviceIdentity, DeviceVariant, TransferEntry};
use crate::{AppError, AppResult};

pub const TAG_LEN: usize = 8;
pub const ENCRYPTED_TAG: [u8; TAG_LEN] = *b"encyp: t";
pub const PLAIN_TAG: [u8; TAG_LEN] = *b"encyp: f";
pub const HALT_TAG: [u8; TAG_LEN] = *b"encyp: h";

pub const METADATA_FILE_NAME: &str = "metadata.json";
pub const SENTINEL_PATH: &str = ".delete";

const MAX_NAME_LEN: u64 = 64 * 1024;
const MAX_IDENTITY_LEN: u64 = 64 * 1024;
pub const MAX_METADATA_LEN: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTag {
    Encrypted,
    Plain,
    Halt,
}

impl RecordTag {
    pub fn as_bytes(self) -> &'static [u8; TAG_LEN] {
        match self {
            Self::Encrypted => &ENCRYPTED_TAG,
            Self::Plain => &PLAIN_TAG,
            Self::Halt => &HALT_TAG,
        }
    }

    pub fn parse(bytes: &[u8; TAG_LEN]) -> AppResult<Self> {
        match *bytes {
            ENCRYPTED_TAG => Ok(Self::Encrypted),
            PLAIN_TAG => Ok(Self::Plain),
            HALT_TAG => Ok(Self::Halt),
            _ => Err(AppError::new("protocol_tag_unknown", "unexpected record tag")
                .with_context("tag", String::from_utf8_lossy(bytes).to_string())),
        }
    }
}

/// Header of one file record; `size` content bytes follow on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub encrypted: bool,
    pub name: String,
    pub size: u64,
}

impl RecordHeader {
    pub fn is_metadata(&self) -> bool {
        self.name == METADATA_FILE_NAME
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    File(RecordHeader),
    Halt,
}

pub async fn write_u64<W>(writer: &mut W, value: u64) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&value.to_le_bytes())
        .await
        .map_err(|error| write_error(error, "u64"))
}

pub async fn read_u64<R>(reader: &mut R) -> AppResult<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 8];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|error| read_error(error, "u64"))?;
    Ok(u64::from_le_bytes(buffer))
}

pub async fn write_string<W>(writer: &mut W, value: &str) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    write_u64(writer, value.len() as u64).await?;
    writer
        .write_all(value.as_bytes())
        .await
        .map_err(|error| write_error(error, "string"))
}

pub async fn read_string<R>(reader: &mut R, max_len: u64) -> AppResult<String>
where
    R: AsyncRead + Unpin,
{
    let len = read_u64(reader).await?;
    let bytes = read_exact_vec(reader, len, max_len, "string").await?;
    String::from_utf8(bytes).map_err(|error| {
        AppError::new("protocol_string_invalid", "length-prefixed string is not UTF-8")
            .with_source(error)
    })
}

pub async fn write_record_header<W>(writer: &mut W, header: &RecordHeader) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let tag = if header.encrypted {
        RecordTag::Encrypted
    } else {
        RecordTag::Plain
    };
    writer
        .write_all(tag.as_bytes())
        .await
        .map_err(|error| write_error(error, "tag"))?;
    write_string(writer, &header.name).await?;
    write_u64(writer, header.size).await
}

pub async fn write_halt<W>(writer: &mut W) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(RecordTag::Halt.as_bytes())
        .await
        .map_err(|error| write_error(error, "halt"))?;
    writer
        .flush()
        .await
        .map_err(|error| write_error(error, "flush"))
}

/// Reads the next record header.
///
/// Returns `Ok(None)` when the peer closed the stream exactly at a record
/// boundary; a close anywhere inside a header is `protocol_truncated`.
pub async fn read_record<R>(reader: &mut R) -> AppResult<Option<Record>>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; TAG_LEN];
    let mut filled = 0usize;
    while filled < TAG_LEN {
        let read = reader
            .read(&mut tag[filled..])
            .await
            .map_err(|error| read_error(error, "tag"))?;
        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(truncated("tag"));
        }
        filled += read;
    }

    let encrypted = match RecordTag::parse(&tag)? {
        RecordTag::Halt => return Ok(Some(Record::Halt)),
        RecordTag::Encrypted => true,
        RecordTag::Plain => false,
    };
    let name = read_string(reader, MAX_NAME_LEN).await?;
    let size = read_u64(reader).await?;
    Ok(Some(Record::File(RecordHeader {
        encrypted,
        name,
        size,
    })))
}

pub async fn read_exact_vec<R>(
    reader: &mut R,
    len: u64,
    max_len: u64,
    field: &'static str,
) -> AppResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    if len > max_len {
        return Err(
            AppError::new("protocol_length_exceeded", "length prefix exceeds limit")
                .with_context("field", field)
                .with_context("length", len.to_string())
                .with_context("limit", max_len.to_string()),
        );
    }
    let mut buffer = vec![0u8; len as usize];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|error| read_error(error, field))?;
    Ok(buffer)
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFrame {
    device_type: String,
    os: String,
}

pub async fn write_identity<W>(writer: &mut W, identity: &DeviceIdentity) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = IdentityFrame {
        device_type: identity.variant.as_str().to_string(),
        os: identity.os_name.clone(),
    };
    let body = serde_json::to_vec(&frame).map_err(|error| {
        AppError::new("protocol_identity_encode_failed", "failed to encode identity")
            .with_source(error)
    })?;
    write_u64(writer, body.len() as u64).await?;
    writer
        .write_all(&body)
        .await
        .map_err(|error| write_error(error, "identity"))?;
    writer
        .flush()
        .await
        .map_err(|error| write_error(error, "flush"))
}

pub async fn read_identity<R>(reader: &mut R) -> AppResult<DeviceIdentity>
where
    R: AsyncRead + Unpin,
{
    let len = read_u64(reader).await?;
    let body = read_exact_vec(reader, len, MAX_IDENTITY_LEN, "identity").await?;
    parse_identity(&body)
}

pub fn parse_identity(body: &[u8]) -> AppResult<DeviceIdentity> {
    let frame: IdentityFrame = serde_json::from_slice(body).map_err(|error| {
        AppError::new("protocol_identity_invalid", "malformed identity document")
            .with_source(error)
    })?;
    let variant = DeviceVariant::parse(&frame.device_type).ok_or_else(|| {
        AppError::new("protocol_variant_unknown", "unrecognized device variant")
            .with_context("deviceType", frame.device_type.clone())
    })?;
    Ok(DeviceIdentity {
        variant,
        os_name: frame.os,
    })
}

/// Decoded `metadata.json` body.
///
/// `entries` never contains the `.delete` sentinel; its folder name lives in
/// `base_folder_name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataDocument {
    pub entries: Vec<TransferEntry>,
    pub base_folder_name: Option<String>,
}

impl MetadataDocument {
    pub fn files(&self) -> impl Iterator<Item = &TransferEntry> {
        self.entries.iter().filter(|entry| !entry.is_directory())
    }

    pub fn directories(&self) -> impl Iterator<Item = &TransferEntry> {
        self.entries.iter().filter(|entry| entry.is_directory())
    }

    pub fn file_count(&self) -> u64 {
        self.files().count() as u64
    }

    pub fn total_bytes(&self) -> u64 {
        self.files().map(|entry| entry.size).sum()
    }

    /// A trailing-slash entry or the sentinel marks a folder transfer; an
    /// empty folder only carries the sentinel.
    pub fn is_folder_transfer(&self) -> bool {
        self.entries.iter().any(TransferEntry::is_directory) || self.base_folder_name.is_some()
    }

    /// Name of the folder the receiver recreates.
    ///
    /// A carried base folder name wins; otherwise the leading component of the
    /// first directory entry, for senders that prefix every path with it.
    pub fn folder_root(&self) -> Option<String> {
        if let Some(name) = self
            .base_folder_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            return Some(name.to_string());
        }
        self.directories()
            .filter_map(|entry| entry.path.trim_end_matches('/').split('/').next())
            .find(|component| !component.is_empty())
            .map(ToString::to_string)
    }
}

pub fn encode_metadata(document: &MetadataDocument) -> AppResult<Vec<u8>> {
    let mut entries = document.entries.clone();
    if let Some(base_folder_name) = document.base_folder_name.as_ref() {
        entries.push(TransferEntry {
            base_folder_name: Some(base_folder_name.clone()),
            path: SENTINEL_PATH.to_string(),
            size: 0,
        });
    }
    serde_json::to_vec(&entries).map_err(|error| {
        AppError::new("protocol_metadata_encode_failed", "failed to encode metadata")
            .with_source(error)
    })
}

/// Loosely typed metadata element.
///
/// Android senders lead with a base-info object that may carry neither a path
/// nor a size, so every field is optional here.
#[derive(Debug, Deserialize)]
struct RawMetadataEntry {
    #[serde(default)]
    base_folder_name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

pub fn decode_metadata(body: &[u8]) -> AppResult<MetadataDocument> {
    let raw: Vec<RawMetadataEntry> = serde_json::from_slice(body).map_err(|error| {
        AppError::new("protocol_metadata_invalid", "malformed metadata document")
            .with_source(error)
    })?;

    let mut document = MetadataDocument::default();
    for entry in raw {
        let folder_name = entry
            .base_folder_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        if let Some(name) = folder_name
            && document.base_folder_name.is_none()
        {
            document.base_folder_name = Some(name);
        }

        let path = entry.path.unwrap_or_default();
        if path.is_empty() || path == SENTINEL_PATH {
            continue;
        }
        document.entries.push(TransferEntry {
            base_folder_name: None,
            path: path.replace('\\', "/"),
            size: entry.size.unwrap_or(0),
        });
    }
    Ok(document)
}

fn read_error(error: std::io::Error, field: &'static str) -> AppError {
    if error.kind() == std::io::ErrorKind::UnexpectedEof {
        return truncated(field);
    }
    AppError::new("connection_read_failed", "failed to read from peer")
        .with_source(error)
        .with_context("field", field)
}

fn write_error(error: std::io::Error, field: &'static str) -> AppError {
    AppError::new("connection_write_failed", "failed to write to peer")
        .with_source(error)
        .with_context("field", field)
}

fn truncated(field: &'static str) -> AppError {
    AppError::new("protocol_truncated", "stream ended inside a record")
        .with_context("field", field)
}

#[cfg(test)]
#[path = "../../tests/transfer/wire_tests.rs"]
mod tests;
