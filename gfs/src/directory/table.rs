//! In-memory directory table

use alloc::vec::Vec;
use bitflags::bitflags;

use super::record::{self, xa, DirectoryRecord};
use crate::error::{GfsError, Result};
use cdblock::{Fad, SECTOR_SIZE};

/// Longest file name a table entry retains
pub const FNAME_LEN: usize = 12;

/// Identifier of the "." entry
pub const SELF_ID: u32 = 0;

/// Identifier of the ".." entry
pub const PARENT_ID: u32 = 1;

bitflags! {
    /// Directory entry attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Attributes: u8 {
        /// Entry is a directory
        const DIRECTORY = 0x80;
        /// CD-DA track
        const CDDA = 0x40;
        /// Interleaved sectors
        const INTERLEAVE = 0x20;
        /// Mode 2 Form 2 sectors
        const FORM2 = 0x10;
        /// Mode 2 Form 1 sectors
        const FORM1 = 0x08;
        /// Last entry of the table
        const END_OF_TABLE = 0x01;
    }
}

/// Whether a table keeps file names (GFS_DIR_ID / GFS_DIR_NAME)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirTableKind {
    /// Identifiers only; name lookups fail
    ById,
    /// Identifiers and names
    #[default]
    ByName,
}

/// One file or subdirectory, resolved to absolute sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Index in the table it was loaded from
    pub identifier: u32,
    name: [u8; FNAME_LEN],
    name_len: u8,
    /// First frame of the extent
    pub start_sector: Fad,
    /// Size in bytes
    pub size: u32,
    /// Sectors spanned by the extent
    pub sector_count: u32,
    /// Interleave file unit
    pub file_unit: u8,
    /// Interleave gap
    pub gap: u8,
    /// Attribute bits
    pub attributes: Attributes,
}

impl DirectoryEntry {
    /// Entry for a raw extent
    pub fn new(identifier: u32, name: &str, start_sector: Fad, size: u32, attributes: Attributes) -> Self {
        let mut buf = [0u8; FNAME_LEN];
        let len = name.len().min(FNAME_LEN);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            identifier,
            name: buf,
            name_len: len as u8,
            start_sector,
            size,
            sector_count: size.div_ceil(SECTOR_SIZE as u32),
            file_unit: 0,
            gap: 0,
            attributes,
        }
    }

    /// File name, empty for identifier-only tables
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }

    /// Is this a directory?
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    /// Valid bytes in the final sector (a full sector when the size is an exact multiple)
    pub fn last_sector_bytes(&self) -> u32 {
        match self.sector_count {
            0 => 0,
            n => self.size - (n - 1) * SECTOR_SIZE as u32,
        }
    }

    /// Frame of the sector `offset` sectors into the file
    pub fn fad_at(&self, offset: u32) -> Option<Fad> {
        (offset < self.sector_count).then(|| self.start_sector.offset(offset))
    }

    fn from_record(identifier: u32, rec: &DirectoryRecord<'_>, keep_name: bool) -> Result<Self> {
        let name = if rec.is_self() {
            "."
        } else if rec.is_parent() {
            ".."
        } else if keep_name {
            core::str::from_utf8(rec.file_identifier())
                .map(record::strip_version)
                .unwrap_or("")
        } else {
            ""
        };
        if keep_name && name.len() > FNAME_LEN {
            log::warn!("file name {} truncated to {} bytes", name, FNAME_LEN);
        }

        let mut attributes = Attributes::empty();
        if rec.is_directory() {
            attributes |= Attributes::DIRECTORY;
        }
        if rec.file_unit_size() != 0 {
            attributes |= Attributes::INTERLEAVE;
        }
        if let Some(bits) = rec.xa_attributes() {
            for (xa_bit, attr) in [
                (xa::DIRECTORY, Attributes::DIRECTORY),
                (xa::CDDA, Attributes::CDDA),
                (xa::INTERLEAVED, Attributes::INTERLEAVE),
                (xa::FORM2, Attributes::FORM2),
                (xa::FORM1, Attributes::FORM1),
            ] {
                if bits & xa_bit != 0 {
                    attributes |= attr;
                }
            }
        }

        let start = Fad::checked_from_lba(rec.extent_lba()).ok_or(GfsError::MalformedDirectory)?;
        let mut entry = Self::new(identifier, name, start, rec.data_length(), attributes);
        // every sector of the extent must have a frame address
        if start.checked_offset(entry.sector_count).is_none() {
            log::warn!("extent of '{}' at LBA {} runs off the disc", name, rec.extent_lba());
            return Err(GfsError::MalformedDirectory);
        }
        entry.file_unit = rec.file_unit_size();
        entry.gap = rec.interleave_gap();
        Ok(entry)
    }
}

/// Entries of one directory, indexed by identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTable {
    kind: DirTableKind,
    location: Fad,
    entries: Vec<DirectoryEntry>,
    truncated: bool,
}

impl DirectoryTable {
    /// Build a table from the raw bytes of a directory extent at `location`.
    ///
    /// Records never straddle a sector; a zero length byte skips to the next
    /// sector. The first two records must be "." and "..". Entries beyond
    /// `max_entries` are dropped with a warning.
    pub fn parse(kind: DirTableKind, location: Fad, data: &[u8], max_entries: usize) -> Result<Self> {
        let mut entries: Vec<DirectoryEntry> = Vec::new();
        let mut truncated = false;
        let mut offset = 0usize;

        while offset < data.len() {
            let in_sector = offset % SECTOR_SIZE;
            let sector_end = (offset - in_sector + SECTOR_SIZE).min(data.len());
            if data[offset] == 0 {
                offset = sector_end;
                continue;
            }
            let rec = DirectoryRecord::parse(&data[offset..sector_end])?;
            offset += rec.length();

            let id = entries.len() as u32;
            let structural_ok = match id {
                SELF_ID => rec.is_self(),
                PARENT_ID => rec.is_parent(),
                _ => !rec.is_self() && !rec.is_parent(),
            };
            if !structural_ok {
                return Err(GfsError::MalformedDirectory);
            }
            if entries.len() >= max_entries {
                truncated = true;
                continue;
            }
            entries.push(DirectoryEntry::from_record(id, &rec, kind == DirTableKind::ByName)?);
        }

        if entries.len() < 2 {
            return Err(GfsError::MalformedDirectory);
        }
        if truncated {
            log::warn!("directory at {} truncated to {} entries", location, max_entries);
        }
        if let Some(last) = entries.last_mut() {
            last.attributes |= Attributes::END_OF_TABLE;
        }
        log::debug!("directory at {} loaded: {} entries", location, entries.len());

        Ok(Self {
            kind,
            location,
            entries,
            truncated,
        })
    }

    /// Find an entry by name (case-insensitive, version suffix ignored).
    ///
    /// The scan stops at the entry flagged as the end of the table.
    pub fn resolve(&self, name: &str) -> Result<&DirectoryEntry> {
        if self.kind == DirTableKind::ById && name != "." && name != ".." {
            return Err(GfsError::NotFound);
        }
        let wanted = match name {
            "." | ".." => name,
            _ => record::strip_version(name),
        };
        for entry in &self.entries {
            if entry.name().eq_ignore_ascii_case(wanted) {
                return Ok(entry);
            }
            if entry.attributes.contains(Attributes::END_OF_TABLE) {
                break;
            }
        }
        Err(GfsError::NotFound)
    }

    /// Identifier of the entry called `name`
    pub fn id_of(&self, name: &str) -> Result<u32> {
        self.resolve(name).map(|e| e.identifier)
    }

    /// Name of entry `id`
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.get(id).map(DirectoryEntry::name)
    }

    /// Entry by identifier
    pub fn get(&self, id: u32) -> Option<&DirectoryEntry> {
        self.entries.get(id as usize)
    }

    /// Entry by identifier, or `InvalidFileId`
    pub fn entry(&self, id: u32) -> Result<&DirectoryEntry> {
        self.get(id).ok_or(GfsError::InvalidFileId)
    }

    /// The directory itself
    pub fn this(&self) -> &DirectoryEntry {
        &self.entries[SELF_ID as usize]
    }

    /// The parent directory
    pub fn parent(&self) -> &DirectoryEntry {
        &self.entries[PARENT_ID as usize]
    }

    /// Frame of the directory extent
    pub fn location(&self) -> Fad {
        self.location
    }

    /// Table kind
    pub fn kind(&self) -> DirTableKind {
        self.kind
    }

    /// Whether entries were dropped for lack of room
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Number of entries, including "." and ".."
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A parsed table always holds "." and ".."
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter()
    }
}
