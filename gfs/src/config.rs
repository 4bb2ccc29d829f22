//! Subsystem configuration
//!
//! All sizing and timing is fixed at [`Gfs::new`](crate::Gfs::new); nothing is
//! read from the environment.

use cdblock::{FILTER_QUEUE_MAX, MAX_PARTITIONS};

use crate::error::{GfsError, Result};
use crate::transfer::TransferMode;

/// Default handle table capacity (GFS_OPEN_MAX)
pub const DEFAULT_OPEN_MAX: usize = 24;

/// Default directory table capacity
pub const DEFAULT_MAX_DIR_ENTRIES: usize = 128;

/// Pool sizes, budgets and defaults applied to new handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfsConfig {
    /// Handle table capacity (default: 24)
    pub open_max: usize,
    /// Buffer partitions (default: 24, max 24)
    pub partition_count: usize,
    /// Filter command queue bound (default: 24, max 24)
    pub filter_queue_depth: usize,
    /// Directory table capacity (default: 128)
    pub max_dir_entries: usize,
    /// Ring buffer capacity per handle, in sectors (default: 8)
    pub ring_sectors: usize,
    /// Sectors per drive read (default: 16)
    pub read_window: u32,
    /// Pickup timeout in ticks without a sector arriving (default: 600)
    pub seek_timeout_ticks: u32,
    /// Ticks a blocking call may go without progress (default: 1200)
    pub stall_ticks: u32,
    /// Transfer mode for new handles (default: CPU)
    pub transfer_mode: TransferMode,
}

impl Default for GfsConfig {
    fn default() -> Self {
        Self {
            open_max: DEFAULT_OPEN_MAX,
            partition_count: MAX_PARTITIONS,
            filter_queue_depth: FILTER_QUEUE_MAX,
            max_dir_entries: DEFAULT_MAX_DIR_ENTRIES,
            ring_sectors: 8,
            read_window: 16,
            seek_timeout_ticks: 600,
            stall_ticks: 1200,
            transfer_mode: TransferMode::Cpu,
        }
    }
}

impl GfsConfig {
    /// Set handle table capacity
    pub fn with_open_max(mut self, open_max: usize) -> Self {
        self.open_max = open_max;
        self
    }

    /// Set partition pool size
    pub fn with_partitions(mut self, count: usize) -> Self {
        self.partition_count = count;
        self
    }

    /// Set filter queue bound
    pub fn with_filter_queue_depth(mut self, depth: usize) -> Self {
        self.filter_queue_depth = depth;
        self
    }

    /// Set directory table capacity
    pub fn with_max_dir_entries(mut self, entries: usize) -> Self {
        self.max_dir_entries = entries;
        self
    }

    /// Set per-handle ring capacity in sectors
    pub fn with_ring_sectors(mut self, sectors: usize) -> Self {
        self.ring_sectors = sectors;
        self
    }

    /// Set default read window
    pub fn with_read_window(mut self, sectors: u32) -> Self {
        self.read_window = sectors;
        self
    }

    /// Set pickup timeout budget
    pub fn with_seek_timeout(mut self, ticks: u32) -> Self {
        self.seek_timeout_ticks = ticks;
        self
    }

    /// Set blocking-call stall budget
    pub fn with_stall_ticks(mut self, ticks: u32) -> Self {
        self.stall_ticks = ticks;
        self
    }

    /// Set default transfer mode
    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }

    /// Reject zero sizes and pools larger than the hardware has
    pub fn validate(&self) -> Result<()> {
        let ok = self.open_max > 0
            && self.open_max < u16::MAX as usize
            && (1..=MAX_PARTITIONS).contains(&self.partition_count)
            && (1..=FILTER_QUEUE_MAX).contains(&self.filter_queue_depth)
            // "." and ".." always occupy the first two slots
            && self.max_dir_entries >= 3
            && self.ring_sectors > 0
            && self.read_window > 0
            && self.seek_timeout_ticks > 0
            && self.stall_ticks > 0;
        if ok {
            Ok(())
        } else {
            Err(GfsError::InvalidParameter)
        }
    }
}
