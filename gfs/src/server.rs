//! Access server: round-robin progress for every handle with a read in flight.
//!
//! # Quantum
//! ```text
//!   ┌────────────────────────────────────────────────────────────┐
//!   │ 1. drive read for this handle finished?  -> release pickup │
//!   │    else nothing issued yet?              -> request pickup │
//!   │ 2. sector waiting in partition and room in ring?           │
//!   │                                          -> stage ONE sector│
//!   │ 3. pull consumer registered?             -> feed it        │
//!   │ 4. every requested sector staged?        -> finished       │
//!   └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each registered handle gets at most one quantum per tick, so no handle can
//! move more than one sector ahead of another within a tick.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use cdblock::{CdBlockError, DiscController, PartitionPool, PickupArbiter, SeekGrant};

use crate::error::{GfsError, Result};
use crate::flow::GetMode;
use crate::handle::{FileHandle, HandleId};

/// Outcome of a tick (GFS_SVR_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerStatus {
    /// Nothing registered
    #[default]
    Idle,
    /// Work in progress
    Busy,
    /// Nothing could move: rings or the CD buffer are full
    Paused,
    /// A handle's read was aborted this tick
    Error,
}

/// Rotation of handles with reads in flight.
#[derive(Debug, Default)]
pub struct AccessServer {
    rotation: VecDeque<HandleId>,
    status: ServerStatus,
    ticks: u64,
}

impl AccessServer {
    /// Empty server
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle to the rotation (no-op if already present)
    pub fn register(&mut self, id: HandleId) {
        if !self.rotation.contains(&id) {
            self.rotation.push_back(id);
        }
    }

    /// Remove a handle from the rotation (no-op if absent)
    pub fn deregister(&mut self, id: HandleId) {
        self.rotation.retain(|&h| h != id);
    }

    /// Whether `id` is in the rotation
    pub fn is_registered(&self, id: HandleId) -> bool {
        self.rotation.contains(&id)
    }

    /// Registered handle count
    pub fn len(&self) -> usize {
        self.rotation.len()
    }

    /// Nothing registered
    pub fn is_empty(&self) -> bool {
        self.rotation.is_empty()
    }

    /// Order for this tick. The rotation then advances by one so a different
    /// handle goes first next time.
    pub fn schedule(&mut self) -> Vec<HandleId> {
        let order = self.rotation.iter().copied().collect();
        self.rotation.rotate_left(usize::from(!self.rotation.is_empty()));
        self.ticks += 1;
        order
    }

    /// Status of the last tick
    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub(crate) fn set_status(&mut self, status: ServerStatus) {
        self.status = status;
    }

    /// Drop every handle
    pub fn clear(&mut self) {
        self.rotation.clear();
        self.status = ServerStatus::Idle;
    }
}

/// What one quantum achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quantum {
    /// A read was issued, a sector was staged or bytes went to a consumer
    pub progressed: bool,
    /// A sector could not be staged because the ring is full, or the CD buffer is full
    pub back_pressure: bool,
    /// Every requested sector is staged
    pub finished: bool,
}

/// Shared resources a quantum may touch.
pub(crate) struct Resources<'a, D: DiscController> {
    pub disc: &'a mut D,
    pub pool: &'a mut PartitionPool,
    pub pickup: &'a mut PickupArbiter,
}

/// Run one quantum for `handle`.
///
/// A handle without a partition only feeds its pull consumer. Contention
/// (pickup busy, filter not yet installed, overlapping fill) is a wait, not an
/// error. Errors returned here abort the handle's read; a sector arriving out
/// of frame order is one of them.
pub(crate) fn service<D: DiscController>(res: &mut Resources<'_, D>, handle: &mut FileHandle) -> Result<Quantum> {
    let mut quantum = Quantum::default();
    let user = handle.id().user_id();

    if let Some(partition) = handle.partition.filter(|_| handle.flow.is_pending()) {
        drive_read(res, handle, partition, &mut quantum)?;
        stage_sector(res, handle, partition, &mut quantum)?;
    }

    if handle.transfer.has_consumer() {
        let taken = handle.transfer.pump(&mut handle.ring);
        if taken > 0 {
            handle.flow.consume(taken);
            quantum.progressed = true;
        }
    }

    if res.disc.status().buffer_full {
        quantum.back_pressure = true;
    }

    let Some(partition) = handle.partition else {
        return Ok(quantum);
    };
    if handle.flow.is_pending() || handle.flow.sectors_requested() == 0 {
        return Ok(quantum);
    }
    if handle.play_active {
        res.pickup.release(user);
        handle.play_active = false;
    }
    res.pool.mark_full(partition);
    quantum.finished = true;
    Ok(quantum)
}

fn drive_read<D: DiscController>(
    res: &mut Resources<'_, D>,
    handle: &mut FileHandle,
    partition: cdblock::PartitionId,
    quantum: &mut Quantum,
) -> Result<()> {
    let user = handle.id().user_id();

    if handle.play_active {
        if res.pickup.owner() != Some(user) {
            // pickup was taken away (timeout or reset)
            handle.play_active = false;
        } else if !res.disc.status().transferring {
            res.pickup.release(user);
            handle.play_active = false;
            if handle.flow.all_issued() {
                res.pool.mark_full(partition);
            }
            log::trace!("{:?} drive read finished, pickup released", handle.id());
        }
        return Ok(());
    }

    let Some((fad, count)) = handle.flow.next_issue(handle.read_window) else {
        return Ok(());
    };
    if res.pool.filter_pending(partition) {
        return Ok(());
    }

    match res.pickup.request_seek(fad, count, user) {
        Ok(SeekGrant::Granted) => {}
        Ok(SeekGrant::AlreadyCovered) | Err(CdBlockError::Busy) => return Ok(()),
        Err(err) => return Err(err.into()),
    }

    match res.pool.begin_fill(partition) {
        Ok(()) => {}
        Err(CdBlockError::FilterConflict) => {
            res.pickup.release(user);
            return Ok(());
        }
        Err(err) => {
            res.pickup.release(user);
            return Err(err.into());
        }
    }

    if let Err(err) = res.disc.begin_sector_read(fad, count, partition.filter()) {
        res.pickup.release(user);
        return Err(err.into());
    }
    handle.flow.mark_issued(count);
    handle.play_active = true;
    quantum.progressed = true;
    log::trace!("{:?} reading {} sectors from {}", handle.id(), count, fad);
    Ok(())
}

fn stage_sector<D: DiscController>(
    res: &mut Resources<'_, D>,
    handle: &mut FileHandle,
    partition: cdblock::PartitionId,
    quantum: &mut Quantum,
) -> Result<()> {
    let position = match handle.get_mode {
        GetMode::Erase => 0,
        GetMode::Resident => handle.flow.cursor(),
    };
    if res.disc.sectors_in_partition(partition) <= position {
        return Ok(());
    }
    let sector = res
        .disc
        .read_raw_sector(partition, position)
        .ok_or(GfsError::InvalidRange)?;
    // sectors reach the ring in ascending frame order or not at all
    if sector.fad != handle.flow.expected_fad() {
        log::warn!(
            "{:?} got {} while expecting {}",
            handle.id(),
            sector.fad,
            handle.flow.expected_fad()
        );
        return Err(GfsError::InvalidRange);
    }
    let Some(bytes) = handle.flow.deliver_sector(sector.data, &mut handle.ring) else {
        quantum.back_pressure = true;
        return Ok(());
    };
    log::trace!("{:?} staged {} bytes", handle.id(), bytes);

    match handle.get_mode {
        GetMode::Erase => res.pool.erase_sector_range(res.disc, partition, 0, 1)?,
        GetMode::Resident => handle.flow.advance_cursor(),
    }
    quantum.progressed = true;
    Ok(())
}
