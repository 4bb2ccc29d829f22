//! Common test utilities: a read-only disc image

use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};
use std::io;

pub const SECTOR: usize = 2048;

/// Pressed disc held in memory. Sector `n` of the image is LBA `n`.
#[derive(Debug, Clone)]
pub struct DiscImage {
    pub bytes: Vec<u8>,
}

impl DiscImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        assert_eq!(bytes.len() % SECTOR, 0, "image must be whole sectors");
        Self { bytes }
    }

    /// `sectors` sectors, every byte of sector `n` set to `n as u8`
    pub fn numbered(sectors: usize) -> Self {
        Self::new((0..sectors).flat_map(|n| [n as u8; SECTOR]).collect())
    }

    fn sector_range(&self, lba: Lba, len: usize) -> io::Result<std::ops::Range<usize>> {
        let start = lba.0 as usize * SECTOR;
        if start + len > self.bytes.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "lead-out reached"));
        }
        Ok(start..start + len)
    }
}

impl BlockIo for DiscImage {
    type Error = io::Error;

    fn block_size(&self) -> BlockSize {
        BlockSize::new(SECTOR as u32).unwrap()
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        Ok((self.bytes.len() / SECTOR) as u64)
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.sector_range(start_lba, dst.len())?;
        dst.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write_blocks(&mut self, _start_lba: Lba, _src: &[u8]) -> Result<(), Self::Error> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "disc is read-only"))
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Route log output through the test harness
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
