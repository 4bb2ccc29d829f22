//! Directory Record structure
//!
//! Directory records describe files and subdirectories. Multi-byte fields are
//! stored both-endian; the little-endian half is used.

use crate::error::{GfsError, Result};

/// ISO9660 file flag: entry is a directory
pub const FLAG_DIRECTORY: u8 = 0x02;

/// XA attribute bits (big-endian word in the system use area)
pub mod xa {
    /// Directory
    pub const DIRECTORY: u16 = 0x8000;
    /// CD-DA track
    pub const CDDA: u16 = 0x4000;
    /// Interleaved sectors
    pub const INTERLEAVED: u16 = 0x2000;
    /// Mode 2 Form 2 sectors
    pub const FORM2: u16 = 0x1000;
    /// Mode 2 Form 1 sectors
    pub const FORM1: u16 = 0x0800;
}

/// Borrowed view of one directory record.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryRecord<'a> {
    bytes: &'a [u8],
}

impl<'a> DirectoryRecord<'a> {
    /// Length of the fixed part, before the file identifier
    pub const HEADER_LENGTH: usize = 33;

    /// Parse a record at the start of `data`
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < Self::HEADER_LENGTH + 1 {
            return Err(GfsError::MalformedDirectory);
        }
        let length = data[0] as usize;
        if length < Self::HEADER_LENGTH + 1 || length > data.len() {
            return Err(GfsError::MalformedDirectory);
        }
        let id_len = data[32] as usize;
        if id_len == 0 || Self::HEADER_LENGTH + id_len > length {
            return Err(GfsError::MalformedDirectory);
        }
        Ok(Self {
            bytes: &data[..length],
        })
    }

    /// Total record length in bytes
    pub fn length(&self) -> usize {
        self.bytes.len()
    }

    /// Extent location (little-endian part)
    pub fn extent_lba(&self) -> u32 {
        u32::from_le_bytes([self.bytes[2], self.bytes[3], self.bytes[4], self.bytes[5]])
    }

    /// Data length in bytes (little-endian part)
    pub fn data_length(&self) -> u32 {
        u32::from_le_bytes([self.bytes[10], self.bytes[11], self.bytes[12], self.bytes[13]])
    }

    /// Raw ISO9660 file flags
    pub fn file_flags(&self) -> u8 {
        self.bytes[25]
    }

    /// File unit size (interleaved files)
    pub fn file_unit_size(&self) -> u8 {
        self.bytes[26]
    }

    /// Interleave gap size
    pub fn interleave_gap(&self) -> u8 {
        self.bytes[27]
    }

    /// Is this a directory?
    pub fn is_directory(&self) -> bool {
        self.file_flags() & FLAG_DIRECTORY != 0
    }

    /// File identifier bytes
    pub fn file_identifier(&self) -> &'a [u8] {
        let len = self.bytes[32] as usize;
        &self.bytes[Self::HEADER_LENGTH..Self::HEADER_LENGTH + len]
    }

    /// System use area following the identifier and its padding byte
    pub fn system_use(&self) -> &'a [u8] {
        let id_len = self.bytes[32] as usize;
        let mut start = Self::HEADER_LENGTH + id_len;
        if id_len % 2 == 0 {
            start += 1;
        }
        self.bytes.get(start..).unwrap_or(&[])
    }

    /// CD-ROM XA attribute word, if the record carries an XA extension
    pub fn xa_attributes(&self) -> Option<u16> {
        let su = self.system_use();
        if su.len() >= 14 && &su[6..8] == b"XA" {
            Some(u16::from_be_bytes([su[4], su[5]]))
        } else {
            None
        }
    }

    /// "." (the directory itself)
    pub fn is_self(&self) -> bool {
        self.file_identifier() == [0x00]
    }

    /// ".." (the parent directory)
    pub fn is_parent(&self) -> bool {
        self.file_identifier() == [0x01]
    }
}

/// Strip version suffix from filename (e.g., "FILE.TXT;1" -> "FILE.TXT")
/// Also removes trailing dot if present (e.g., "FILE.;1" -> "FILE")
pub fn strip_version(name: &str) -> &str {
    let base = name.split(';').next().unwrap_or(name);
    base.strip_suffix('.').unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn record(name: &[u8], flags: u8, system_use: &[u8]) -> Vec<u8> {
        let mut len = 33 + name.len();
        if name.len() % 2 == 0 {
            len += 1;
        }
        len += system_use.len();
        let mut data = vec![0u8; len];
        data[0] = len as u8;
        data[2..6].copy_from_slice(&20u32.to_le_bytes());
        data[6..10].copy_from_slice(&20u32.to_be_bytes());
        data[10..14].copy_from_slice(&5000u32.to_le_bytes());
        data[14..18].copy_from_slice(&5000u32.to_be_bytes());
        data[25] = flags;
        data[32] = name.len() as u8;
        data[33..33 + name.len()].copy_from_slice(name);
        let su = len - system_use.len();
        data[su..].copy_from_slice(system_use);
        data
    }

    #[test]
    fn test_parse_fields() {
        let data = record(b"DATA.BIN;1", 0, &[]);
        let rec = DirectoryRecord::parse(&data).unwrap();
        assert_eq!(rec.extent_lba(), 20);
        assert_eq!(rec.data_length(), 5000);
        assert_eq!(rec.file_identifier(), b"DATA.BIN;1");
        assert!(!rec.is_directory());
        assert!(rec.xa_attributes().is_none());
    }

    #[test]
    fn test_xa_attributes() {
        let mut su = [0u8; 14];
        su[4..6].copy_from_slice(&(xa::FORM2 | xa::INTERLEAVED).to_be_bytes());
        su[6..8].copy_from_slice(b"XA");
        let data = record(b"MOVIE.CPK;1", 0, &su);
        let rec = DirectoryRecord::parse(&data).unwrap();
        assert_eq!(rec.xa_attributes(), Some(xa::FORM2 | xa::INTERLEAVED));
    }

    #[test]
    fn test_rejects_truncated() {
        let data = record(b"A", 0, &[]);
        assert_eq!(
            DirectoryRecord::parse(&data[..20]).unwrap_err(),
            GfsError::MalformedDirectory
        );
        let mut bad = data.clone();
        bad[32] = 40;
        assert!(DirectoryRecord::parse(&bad).is_err());
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("FILE.TXT;1"), "FILE.TXT");
        assert_eq!(strip_version("FILE.;1"), "FILE");
        assert_eq!(strip_version("NOVER"), "NOVER");
    }
}
