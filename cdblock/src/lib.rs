//! CD block resource model
//!
//! A `no_std` model of the optical drive's staging hardware: the fixed pool of
//! buffer partitions, the filters that route incoming sectors into them, and the
//! single read head everyone has to share.
//!
//! # Overview
//!
//! - **Partitions** - fixed pool of staging buffers with explicit state transitions
//! - **Filters** - subheader/window routing rules and their bounded command queue
//! - **Pickup** - non-blocking ownership token for the read head
//! - **Collaborators** - the `DiscController` and `DmaEngine` traits the file
//!   layer drives, with software implementations for hosts without the hardware
//!
//! Nothing in this crate blocks. Exhaustion and contention are reported as errors
//! and callers retry on a later tick.
//!
//! # Usage
//!
//! ```ignore
//! use cdblock::{BlockIoDisc, PartitionPool, SectorWindow, SubheaderPattern, UserId, Fad};
//!
//! let mut disc = BlockIoDisc::new(block_io);
//! let mut pool = PartitionPool::new(24, 24);
//! let window = SectorWindow::new(Fad::from_lba(20), 8);
//! let id = pool.acquire_partition(&mut disc, UserId(1), SubheaderPattern::ANY, window)?;
//! ```

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

pub mod disc;
pub mod dma;
pub mod drive;
pub mod error;
pub mod filter;
pub mod partition;
pub mod pickup;
pub mod subheader;
pub mod types;

pub use disc::{DiscController, DriveStatus, RawSector, SectorCallback};
pub use dma::{ChannelHandle, DmaEngine, DmaError, DmaMode, SoftDma};
pub use drive::{BlockIoDisc, DriveConfig, MediaState};
pub use error::{CdBlockError, DiscError, Result};
pub use filter::{FilterCommand, FilterQueue, SectorWindow};
pub use partition::{BufferPartition, PartitionPool, PartitionState};
pub use pickup::{PickupArbiter, SeekGrant};
pub use subheader::{Subheader, SubheaderPattern, Submode};
pub use types::{
    Fad, FilterId, PartitionId, TransferId, UserId, FAD_LBA_OFFSET, FILTER_QUEUE_MAX,
    FORM2_SECTOR_SIZE, MAX_PARTITIONS, SECTOR_SIZE,
};
