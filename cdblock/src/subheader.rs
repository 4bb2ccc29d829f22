//! Mode 2 sector subheaders and the patterns filters match them against

use bitflags::bitflags;

bitflags! {
    /// Submode byte of a CD-ROM XA subheader
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Submode: u8 {
        /// End of record
        const END_OF_RECORD = 0x01;
        /// Video sector
        const VIDEO = 0x02;
        /// ADPCM audio sector
        const AUDIO = 0x04;
        /// Data sector
        const DATA = 0x08;
        /// Trigger on
        const TRIGGER = 0x10;
        /// Form 2 sector
        const FORM2 = 0x20;
        /// Real-time sector
        const REAL_TIME = 0x40;
        /// End of file
        const END_OF_FILE = 0x80;
    }
}

/// Subheader attached to each sector the drive delivers.
///
/// Mode 1 sectors have no subheader and are reported as all zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Subheader {
    /// File number (interleave stream)
    pub file_no: u8,
    /// Channel number
    pub channel: u8,
    /// Submode flags
    pub submode: Submode,
    /// Coding information
    pub coding_info: u8,
}

impl Subheader {
    /// Parse the 4-byte subheader as stored on disc
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            file_no: bytes[0],
            channel: bytes[1],
            submode: Submode::from_bits_retain(bytes[2]),
            coding_info: bytes[3],
        }
    }

    /// Encode back to on-disc layout
    pub fn to_bytes(&self) -> [u8; 4] {
        [self.file_no, self.channel, self.submode.bits(), self.coding_info]
    }

    /// Whether this is a Form 2 sector
    pub fn is_form2(&self) -> bool {
        self.submode.contains(Submode::FORM2)
    }
}

/// Masked subheader comparison used for sector routing.
///
/// A sector matches when `sector & mask == value & mask` for every byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubheaderPattern {
    /// Bits that take part in the comparison
    pub mask: [u8; 4],
    /// Expected values of the masked bits
    pub value: [u8; 4],
}

impl SubheaderPattern {
    /// Pattern that accepts every sector
    pub const ANY: Self = Self {
        mask: [0; 4],
        value: [0; 4],
    };

    /// Accept only sectors of one interleave stream
    pub fn file_channel(file_no: u8, channel: u8) -> Self {
        Self {
            mask: [0xFF, 0xFF, 0, 0],
            value: [file_no, channel, 0, 0],
        }
    }

    /// Accept sectors with all of `flags` set
    pub fn submode(flags: Submode) -> Self {
        Self {
            mask: [0, 0, flags.bits(), 0],
            value: [0, 0, flags.bits(), 0],
        }
    }

    /// Test a sector subheader against this pattern
    pub fn matches(&self, subheader: &Subheader) -> bool {
        let bytes = subheader.to_bytes();
        (0..4).all(|i| bytes[i] & self.mask[i] == self.value[i] & self.mask[i])
    }

    /// Whether some subheader could satisfy both patterns
    pub fn overlaps(&self, other: &SubheaderPattern) -> bool {
        (0..4).all(|i| {
            let common = self.mask[i] & other.mask[i];
            self.value[i] & common == other.value[i] & common
        })
    }
}
