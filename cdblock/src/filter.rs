//! Filter commands and the bounded queue that feeds them to the drive.
//!
//! The drive only accepts filter changes while no read is streaming. Changes
//! requested mid-transfer wait here and are applied in FIFO order once the
//! drive goes idle, so a later change for a partition can never overtake an
//! earlier one.

use alloc::collections::VecDeque;

use crate::disc::DiscController;
use crate::error::{CdBlockError, Result};
use crate::subheader::{Subheader, SubheaderPattern};
use crate::types::{Fad, FilterId, PartitionId, FILTER_QUEUE_MAX};

/// Contiguous run of frames a filter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectorWindow {
    /// First frame
    pub start: Fad,
    /// Number of frames
    pub count: u32,
}

impl SectorWindow {
    /// Create a window
    pub const fn new(start: Fad, count: u32) -> Self {
        Self { start, count }
    }

    /// Whether `fad` falls inside the window
    pub fn contains(&self, fad: Fad) -> bool {
        fad.within(self.start, self.count)
    }

    /// Whether two windows share at least one frame
    pub fn overlaps(&self, other: &SectorWindow) -> bool {
        if self.count == 0 || other.count == 0 {
            return false;
        }
        let a_end = self.start.0 as u64 + self.count as u64;
        let b_end = other.start.0 as u64 + other.count as u64;
        (self.start.0 as u64) < b_end && (other.start.0 as u64) < a_end
    }
}

/// Routing rule: sectors inside `window` whose subheader matches `pattern`
/// land in `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterCommand {
    /// Filter being programmed
    pub filter: FilterId,
    /// Subheader match
    pub pattern: SubheaderPattern,
    /// Accepted frames
    pub window: SectorWindow,
    /// Destination partition
    pub target: PartitionId,
}

impl FilterCommand {
    /// Build the command for a partition's paired filter
    pub fn for_partition(partition: PartitionId, pattern: SubheaderPattern, window: SectorWindow) -> Self {
        Self {
            filter: partition.filter(),
            pattern,
            window,
            target: partition,
        }
    }

    /// Whether a sector read from `fad` with `subheader` is routed by this filter
    pub fn accepts(&self, fad: Fad, subheader: &Subheader) -> bool {
        self.window.contains(fad) && self.pattern.matches(subheader)
    }
}

/// Bounded FIFO of filter changes waiting for the drive.
#[derive(Debug)]
pub struct FilterQueue {
    pending: VecDeque<FilterCommand>,
    depth: usize,
}

impl FilterQueue {
    /// Create a queue holding at most `depth` commands
    pub fn new(depth: usize) -> Self {
        let depth = depth.clamp(1, FILTER_QUEUE_MAX);
        Self {
            pending: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Append a command
    pub fn push(&mut self, command: FilterCommand) -> Result<()> {
        if self.pending.len() >= self.depth {
            return Err(CdBlockError::FilterQueueFull);
        }
        self.pending.push_back(command);
        Ok(())
    }

    /// Whether a change for `partition` still waits
    pub fn has_pending(&self, partition: PartitionId) -> bool {
        self.pending.iter().any(|c| c.target == partition)
    }

    /// Drop every queued change for `partition`
    pub fn cancel(&mut self, partition: PartitionId) {
        self.pending.retain(|c| c.target != partition);
    }

    /// Apply queued commands while the drive is idle.
    ///
    /// Returns how many were installed. Stops at the first rejected command,
    /// which stays at the head of the queue.
    pub fn flush<D: DiscController>(&mut self, disc: &mut D) -> Result<usize> {
        let mut applied = 0;
        while let Some(command) = self.pending.front() {
            if disc.status().transferring {
                break;
            }
            disc.install_filter(command)?;
            log::trace!("filter {:?} installed from queue", command.filter);
            self.pending.pop_front();
            applied += 1;
        }
        Ok(applied)
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Maximum queue length
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
