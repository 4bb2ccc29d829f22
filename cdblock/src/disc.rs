//! Drive interface.
//!
//! The CD block itself (spindle, pickup servo, sector decoder, buffer RAM) is an
//! external collaborator. This trait is the surface the file layer needs from it.
//! Operations never block: a read is started with
//! [`begin_sector_read`](DiscController::begin_sector_read) and its sectors show up
//! in buffer partitions over later [`poll`](DiscController::poll) calls.

use alloc::boxed::Box;

use crate::error::DiscError;
use crate::filter::FilterCommand;
use crate::subheader::Subheader;
use crate::types::{Fad, FilterId, PartitionId, TransferId};

/// Hook invoked each time a sector lands in a partition.
pub type SectorCallback = Box<dyn FnMut(PartitionId, Fad)>;

/// One buffered sector as seen through the drive.
#[derive(Debug, Clone, Copy)]
pub struct RawSector<'a> {
    /// Frame the sector was read from
    pub fad: Fad,
    /// Mode 2 subheader (zero for Mode 1)
    pub subheader: Subheader,
    /// User data
    pub data: &'a [u8],
}

/// Drive state summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveStatus {
    /// Current pickup position
    pub head: Fad,
    /// Head is moving toward a read target
    pub seeking: bool,
    /// A read is streaming sectors
    pub transferring: bool,
    /// Buffer RAM has no free sector
    pub buffer_full: bool,
}

/// Non-blocking CD block interface.
pub trait DiscController {
    /// Service the drive once.
    ///
    /// Any error belongs to the read in progress, which is aborted.
    fn poll(&mut self) -> Result<(), DiscError>;

    /// Drive state summary
    fn status(&self) -> DriveStatus;

    /// Program a filter. Must not be called while a read is streaming.
    fn install_filter(&mut self, command: &FilterCommand) -> Result<(), DiscError>;

    /// Disconnect a filter so it no longer routes sectors
    fn clear_filter(&mut self, filter: FilterId);

    /// Start reading `count` sectors from `fad` through `filter`.
    ///
    /// Any read in progress is replaced.
    fn begin_sector_read(
        &mut self,
        fad: Fad,
        count: u32,
        filter: FilterId,
    ) -> Result<TransferId, DiscError>;

    /// Move the pickup to `fad` without reading
    fn seek(&mut self, fad: Fad) -> Result<(), DiscError>;

    /// Abort the read in progress (buffered sectors stay)
    fn stop(&mut self);

    /// Whether at least one sector waits in `partition`
    fn poll_sector_ready(&self, partition: PartitionId) -> bool {
        self.sectors_in_partition(partition) > 0
    }

    /// Number of sectors buffered in `partition`
    fn sectors_in_partition(&self, partition: PartitionId) -> u32;

    /// Sectors of buffer RAM still free
    fn free_sectors(&self) -> u32;

    /// Borrow the sector at `position` in `partition`
    fn read_raw_sector(&self, partition: PartitionId, position: u32) -> Option<RawSector<'_>>;

    /// Delete `count` sectors starting at `position`
    fn erase_sectors(
        &mut self,
        partition: PartitionId,
        position: u32,
        count: u32,
    ) -> Result<(), DiscError>;

    /// Move `count` sectors from `src` (starting at `position`) to the end of `dst`
    fn move_sectors(
        &mut self,
        src: PartitionId,
        position: u32,
        count: u32,
        dst: PartitionId,
    ) -> Result<(), DiscError>;

    /// Drop every sector in `partition`
    fn clear_partition(&mut self, partition: PartitionId);

    /// Install (or remove) the sector arrival hook
    fn on_sector_arrived(&mut self, callback: Option<SectorCallback>);
}
