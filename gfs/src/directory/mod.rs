//! Directory resolution
//!
//! Maps names and numeric identifiers to absolute sector ranges. A directory
//! table is loaded once from disc and then searched in memory; loading a new
//! one does not disturb handles opened against the old one, since every open
//! handle keeps its own copy of the resolved entry.

pub mod record;
pub mod table;
pub mod volume;

pub use table::{
    Attributes, DirTableKind, DirectoryEntry, DirectoryTable, FNAME_LEN, PARENT_ID, SELF_ID,
};
pub use volume::{Descriptor, VolumeInfo};

/// Which directory to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirSelector<'a> {
    /// Root of the mounted volume
    Root,
    /// Subdirectory by identifier in the current table ("." and ".." included)
    Id(u32),
    /// `/`-separated path; absolute from the root, otherwise relative to the current table
    Path(&'a str),
}
