//! Volume descriptor parsing
//!
//! ISO9660 volume descriptors start at sector 16. Only the primary descriptor
//! matters here: it carries the root directory record.

use alloc::string::String;

use super::record::DirectoryRecord;
use crate::error::{GfsError, Result};
use cdblock::{Fad, SECTOR_SIZE};

/// First volume descriptor sector
pub const VOLUME_DESCRIPTOR_START: u32 = 16;

/// Descriptors scanned before giving up on finding a terminator
pub const MAX_DESCRIPTORS: u32 = 32;

/// CD001 magic bytes
pub const MAGIC: &[u8; 5] = b"CD001";

const ROOT_RECORD_OFFSET: usize = 156;

/// Information from the primary volume descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Volume identifier
    pub volume_id: String,
    /// Root directory extent
    pub root_lba: u32,
    /// Root directory length in bytes
    pub root_len: u32,
    /// Volume size in sectors
    pub volume_space_size: u32,
}

/// One parsed volume descriptor sector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// Primary volume descriptor (type 1)
    Primary(VolumeInfo),
    /// Set terminator (type 255)
    Terminator,
    /// Boot record, supplementary or unknown descriptor
    Other(u8),
}

/// Parse one 2048-byte descriptor sector
pub fn parse_descriptor(sector: &[u8]) -> Result<Descriptor> {
    if sector.len() < SECTOR_SIZE || &sector[1..6] != MAGIC || sector[6] != 1 {
        return Err(GfsError::MalformedDirectory);
    }
    match sector[0] {
        1 => parse_primary(sector).map(Descriptor::Primary),
        255 => Ok(Descriptor::Terminator),
        other => Ok(Descriptor::Other(other)),
    }
}

fn parse_primary(sector: &[u8]) -> Result<VolumeInfo> {
    let block_size = u16::from_le_bytes([sector[128], sector[129]]);
    if block_size as usize != SECTOR_SIZE {
        log::warn!("unsupported logical block size {}", block_size);
        return Err(GfsError::MalformedDirectory);
    }
    let root = DirectoryRecord::parse(&sector[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + 34])?;
    let root_sectors = root.data_length().div_ceil(SECTOR_SIZE as u32);
    let addressable = Fad::checked_from_lba(root.extent_lba()).and_then(|fad| fad.checked_offset(root_sectors));
    if !root.is_directory() || addressable.is_none() {
        return Err(GfsError::MalformedDirectory);
    }
    let volume_id = core::str::from_utf8(&sector[40..72])
        .map(|s| String::from(s.trim_end()))
        .unwrap_or_default();
    Ok(VolumeInfo {
        volume_id,
        root_lba: root.extent_lba(),
        root_len: root.data_length(),
        volume_space_size: u32::from_le_bytes([sector[80], sector[81], sector[82], sector[83]]),
    })
}
