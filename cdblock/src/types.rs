//! Common types and constants for the CD block

use core::fmt;

/// Mode 1 / Form 1 user data per sector
pub const SECTOR_SIZE: usize = 2048;

/// Mode 2 / Form 2 user data per sector
pub const FORM2_SECTOR_SIZE: usize = 2324;

/// Number of buffer partitions in the CD block (GFS_CDBBUF_NR)
pub const MAX_PARTITIONS: usize = 24;

/// Maximum length of the filter command queue (GFS_SELQ_MAX)
pub const FILTER_QUEUE_MAX: usize = 24;

/// Frames between the start of the lead-in and LBA 0
pub const FAD_LBA_OFFSET: u32 = 150;

/// Frame address: absolute sector address on the disc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fad(pub u32);

impl Fad {
    /// Convert a logical block address to a frame address (saturates at the top of the range)
    pub const fn from_lba(lba: u32) -> Self {
        Self(lba.saturating_add(FAD_LBA_OFFSET))
    }

    /// Convert a logical block address read from disc, `None` if it has no frame address
    pub const fn checked_from_lba(lba: u32) -> Option<Self> {
        match lba.checked_add(FAD_LBA_OFFSET) {
            Some(fad) => Some(Self(fad)),
            None => None,
        }
    }

    /// Logical block address of this frame (saturates inside the lead-in)
    pub const fn to_lba(self) -> u32 {
        self.0.saturating_sub(FAD_LBA_OFFSET)
    }

    /// Frame `count` sectors further on (saturates at the top of the range)
    pub const fn offset(self, count: u32) -> Self {
        Self(self.0.saturating_add(count))
    }

    /// Frame `count` sectors further on, `None` past the last addressable frame
    pub const fn checked_offset(self, count: u32) -> Option<Self> {
        match self.0.checked_add(count) {
            Some(fad) => Some(Self(fad)),
            None => None,
        }
    }

    /// Whether this frame lies in `[start, start + count)`
    pub fn within(self, start: Fad, count: u32) -> bool {
        self.0 >= start.0 && (self.0 - start.0) < count
    }
}

impl fmt::Display for Fad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FAD {}", self.0)
    }
}

/// Buffer partition index (0..N-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u8);

impl PartitionId {
    /// Slot index into the partition pool
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Filter wired to this partition.
    ///
    /// Filters and partitions are paired one to one.
    pub const fn filter(self) -> FilterId {
        FilterId(self.0)
    }
}

/// Filter (selector) index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterId(pub u8);

impl FilterId {
    /// Partition this filter routes into
    pub const fn partition(self) -> PartitionId {
        PartitionId(self.0)
    }
}

/// Identity of a resource user (pickup or partition owner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub u32);

/// Identifier returned by the drive for a started read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(pub u32);
