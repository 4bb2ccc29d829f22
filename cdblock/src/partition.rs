//! Buffer partition pool.
//!
//! # State Machine
//! ```text
//!     FREE ──acquire()──> RESERVED ──begin_fill()──> FILLING ──mark_full()──> FULL
//!       ▲                    │                          │                      │
//!       └──────────────release()─────────────────────────┴──────────────────────┘
//! ```
//!
//! The pool is fixed at construction and never grows. Acquisition on a
//! saturated pool fails immediately; callers retry on a later tick.

use alloc::vec::Vec;

use crate::disc::DiscController;
use crate::error::{CdBlockError, Result};
use crate::filter::{FilterCommand, FilterQueue, SectorWindow};
use crate::subheader::SubheaderPattern;
use crate::types::{FilterId, PartitionId, UserId, MAX_PARTITIONS};

/// Lifecycle state of a buffer partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Available for acquisition
    Free,
    /// Owned, filter programmed, no sectors requested yet
    Reserved,
    /// Drive is streaming matching sectors in
    Filling,
    /// Window fully arrived or read stopped; data may still be buffered
    Full,
}

/// One slot of the staging pool.
#[derive(Debug, Clone)]
pub struct BufferPartition {
    id: PartitionId,
    state: PartitionState,
    filter: Option<FilterId>,
    pattern: SubheaderPattern,
    window: SectorWindow,
    owner: Option<UserId>,
}

impl BufferPartition {
    fn new(id: PartitionId) -> Self {
        Self {
            id,
            state: PartitionState::Free,
            filter: None,
            pattern: SubheaderPattern::ANY,
            window: SectorWindow::default(),
            owner: None,
        }
    }

    /// Partition index
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Current state
    pub fn state(&self) -> PartitionState {
        self.state
    }

    /// Installed filter, if any
    pub fn filter(&self) -> Option<FilterId> {
        self.filter
    }

    /// Subheader pattern routed here
    pub fn pattern(&self) -> &SubheaderPattern {
        &self.pattern
    }

    /// Frames routed here
    pub fn window(&self) -> SectorWindow {
        self.window
    }

    /// Current owner
    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    /// Whether the partition is held by someone
    pub fn is_in_use(&self) -> bool {
        self.state != PartitionState::Free
    }

    fn reset(&mut self) {
        self.state = PartitionState::Free;
        self.filter = None;
        self.pattern = SubheaderPattern::ANY;
        self.window = SectorWindow::default();
        self.owner = None;
    }
}

/// Fixed pool of buffer partitions plus the filter command queue feeding them.
#[derive(Debug)]
pub struct PartitionPool {
    partitions: Vec<BufferPartition>,
    filters: FilterQueue,
}

impl PartitionPool {
    /// Create a pool of `count` partitions (max 24) and a filter queue of `queue_depth`
    pub fn new(count: usize, queue_depth: usize) -> Self {
        let count = count.clamp(1, MAX_PARTITIONS);
        let partitions = (0..count)
            .map(|i| BufferPartition::new(PartitionId(i as u8)))
            .collect();
        Self {
            partitions,
            filters: FilterQueue::new(queue_depth),
        }
    }

    /// Reserve a free partition for `owner` and program its filter.
    ///
    /// The filter goes straight to the drive when it is idle; otherwise it is
    /// queued and applied by [`flush_filters`](Self::flush_filters).
    pub fn acquire_partition<D: DiscController>(
        &mut self,
        disc: &mut D,
        owner: UserId,
        pattern: SubheaderPattern,
        window: SectorWindow,
    ) -> Result<PartitionId> {
        let slot = self
            .partitions
            .iter()
            .position(|p| p.state == PartitionState::Free)
            .ok_or(CdBlockError::OutOfPartitions)?;
        let id = self.partitions[slot].id;

        self.program(disc, id, pattern, window)?;

        let partition = &mut self.partitions[slot];
        partition.state = PartitionState::Reserved;
        partition.filter = Some(id.filter());
        partition.pattern = pattern;
        partition.window = window;
        partition.owner = Some(owner);
        log::debug!("partition {} acquired by {:?}", id.0, owner);
        Ok(id)
    }

    /// Point an owned partition at a new window.
    ///
    /// Buffered sectors are kept; the partition goes back to `Reserved`.
    pub fn retarget<D: DiscController>(
        &mut self,
        disc: &mut D,
        id: PartitionId,
        owner: UserId,
        window: SectorWindow,
    ) -> Result<()> {
        let partition = self.owned(id, owner)?;
        let pattern = partition.pattern;
        self.program(disc, id, pattern, window)?;

        let partition = &mut self.partitions[id.index()];
        partition.window = window;
        partition.state = PartitionState::Reserved;
        Ok(())
    }

    fn program<D: DiscController>(
        &mut self,
        disc: &mut D,
        id: PartitionId,
        pattern: SubheaderPattern,
        window: SectorWindow,
    ) -> Result<()> {
        let command = FilterCommand::for_partition(id, pattern, window);
        if disc.status().transferring || !self.filters.is_empty() {
            self.filters.push(command)?;
            log::trace!("filter {:?} queued behind {} commands", command.filter, self.filters.len() - 1);
        } else {
            disc.install_filter(&command)?;
        }
        Ok(())
    }

    /// Mark a reserved partition as receiving data.
    ///
    /// Fails with `FilterConflict` if another filling partition would accept
    /// the same sectors.
    pub fn begin_fill(&mut self, id: PartitionId) -> Result<()> {
        let target = self.get(id).ok_or(CdBlockError::InvalidPartition)?;
        if !target.is_in_use() {
            return Err(CdBlockError::InvalidPartition);
        }
        let conflict = self.partitions.iter().any(|p| {
            p.id != id
                && p.state == PartitionState::Filling
                && p.pattern.overlaps(&target.pattern)
                && p.window.overlaps(&target.window)
        });
        if conflict {
            return Err(CdBlockError::FilterConflict);
        }
        self.partitions[id.index()].state = PartitionState::Filling;
        Ok(())
    }

    /// Mark a filling partition as complete
    pub fn mark_full(&mut self, id: PartitionId) {
        if let Some(p) = self.partitions.get_mut(id.index()) {
            if p.state == PartitionState::Filling {
                p.state = PartitionState::Full;
            }
        }
    }

    /// Return a partition to the pool.
    ///
    /// Clears its filter, drops queued filter changes and buffered sectors.
    /// Releasing a free partition does nothing.
    pub fn release_partition<D: DiscController>(&mut self, disc: &mut D, id: PartitionId) {
        let Some(partition) = self.partitions.get_mut(id.index()) else {
            return;
        };
        if partition.state == PartitionState::Free {
            return;
        }
        self.filters.cancel(id);
        disc.clear_filter(id.filter());
        disc.clear_partition(id);
        log::debug!("partition {} released by {:?}", id.0, partition.owner);
        partition.reset();
    }

    /// Move `count` buffered sectors starting at `first` from `src` to the end of `dst`
    pub fn move_sector_range<D: DiscController>(
        &mut self,
        disc: &mut D,
        src: PartitionId,
        first: u32,
        count: u32,
        dst: PartitionId,
    ) -> Result<()> {
        if src == dst {
            return Err(CdBlockError::InvalidRange);
        }
        self.check_range(disc, src, first, count)?;
        if !self.get(dst).is_some_and(BufferPartition::is_in_use) {
            return Err(CdBlockError::InvalidPartition);
        }
        disc.move_sectors(src, first, count, dst)?;
        Ok(())
    }

    /// Discard `count` buffered sectors starting at `first`
    pub fn erase_sector_range<D: DiscController>(
        &mut self,
        disc: &mut D,
        id: PartitionId,
        first: u32,
        count: u32,
    ) -> Result<()> {
        self.check_range(disc, id, first, count)?;
        disc.erase_sectors(id, first, count)?;
        Ok(())
    }

    fn check_range<D: DiscController>(
        &self,
        disc: &D,
        id: PartitionId,
        first: u32,
        count: u32,
    ) -> Result<()> {
        let partition = self.get(id).ok_or(CdBlockError::InvalidPartition)?;
        if !partition.is_in_use() {
            return Err(CdBlockError::InvalidPartition);
        }
        let buffered = disc.sectors_in_partition(id);
        match first.checked_add(count) {
            Some(end) if count > 0 && end <= buffered => Ok(()),
            _ => Err(CdBlockError::InvalidRange),
        }
    }

    fn owned(&self, id: PartitionId, owner: UserId) -> Result<&BufferPartition> {
        match self.get(id) {
            Some(p) if p.owner == Some(owner) => Ok(p),
            _ => Err(CdBlockError::InvalidPartition),
        }
    }

    /// Apply queued filter changes the drive can now accept
    pub fn flush_filters<D: DiscController>(&mut self, disc: &mut D) -> Result<usize> {
        self.filters.flush(disc)
    }

    /// Whether a filter change for `id` has not reached the drive yet
    pub fn filter_pending(&self, id: PartitionId) -> bool {
        self.filters.has_pending(id)
    }

    /// Queued filter changes
    pub fn queued_filters(&self) -> usize {
        self.filters.len()
    }

    /// Release every partition and drop queued filter changes
    pub fn reset<D: DiscController>(&mut self, disc: &mut D) {
        self.filters.clear();
        for i in 0..self.partitions.len() {
            let id = self.partitions[i].id;
            self.release_partition(disc, id);
        }
    }

    /// Get a partition by index
    pub fn get(&self, id: PartitionId) -> Option<&BufferPartition> {
        self.partitions.get(id.index())
    }

    /// Number of free partitions
    pub fn available(&self) -> usize {
        self.partitions.iter().filter(|p| !p.is_in_use()).count()
    }

    /// Pool size
    pub fn total(&self) -> usize {
        self.partitions.len()
    }

    /// Number of partitions currently held
    pub fn in_use(&self) -> usize {
        self.total() - self.available()
    }

    /// Iterate over all partitions
    pub fn iter(&self) -> impl Iterator<Item = &BufferPartition> {
        self.partitions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disc::{DriveStatus, RawSector, SectorCallback};
    use crate::error::DiscError;
    use crate::types::{Fad, TransferId};
    use alloc::vec;

    /// Drive double that only tracks filters and per-partition sector counts
    struct StubDisc {
        transferring: bool,
        installed: Vec<FilterCommand>,
        buffered: Vec<u32>,
    }

    impl StubDisc {
        fn new() -> Self {
            Self {
                transferring: false,
                installed: Vec::new(),
                buffered: vec![0; MAX_PARTITIONS],
            }
        }
    }

    impl DiscController for StubDisc {
        fn poll(&mut self) -> core::result::Result<(), DiscError> {
            Ok(())
        }

        fn status(&self) -> DriveStatus {
            DriveStatus {
                head: Fad(0),
                seeking: false,
                transferring: self.transferring,
                buffer_full: false,
            }
        }

        fn install_filter(&mut self, command: &FilterCommand) -> core::result::Result<(), DiscError> {
            self.installed.push(*command);
            Ok(())
        }

        fn clear_filter(&mut self, filter: FilterId) {
            self.installed.retain(|c| c.filter != filter);
        }

        fn begin_sector_read(
            &mut self,
            _fad: Fad,
            _count: u32,
            _filter: FilterId,
        ) -> core::result::Result<TransferId, DiscError> {
            Ok(TransferId(1))
        }

        fn seek(&mut self, _fad: Fad) -> core::result::Result<(), DiscError> {
            Ok(())
        }

        fn stop(&mut self) {}

        fn sectors_in_partition(&self, partition: PartitionId) -> u32 {
            self.buffered[partition.index()]
        }

        fn free_sectors(&self) -> u32 {
            200
        }

        fn read_raw_sector(&self, _partition: PartitionId, _position: u32) -> Option<RawSector<'_>> {
            None
        }

        fn erase_sectors(
            &mut self,
            partition: PartitionId,
            _position: u32,
            count: u32,
        ) -> core::result::Result<(), DiscError> {
            self.buffered[partition.index()] -= count;
            Ok(())
        }

        fn move_sectors(
            &mut self,
            src: PartitionId,
            _position: u32,
            count: u32,
            dst: PartitionId,
        ) -> core::result::Result<(), DiscError> {
            self.buffered[src.index()] -= count;
            self.buffered[dst.index()] += count;
            Ok(())
        }

        fn clear_partition(&mut self, partition: PartitionId) {
            self.buffered[partition.index()] = 0;
        }

        fn on_sector_arrived(&mut self, _callback: Option<SectorCallback>) {}
    }

    fn window(start: u32) -> SectorWindow {
        SectorWindow::new(Fad(start), 8)
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let mut disc = StubDisc::new();
        let mut pool = PartitionPool::new(2, 4);
        let a = pool.acquire_partition(&mut disc, UserId(1), SubheaderPattern::ANY, window(100)).unwrap();
        let b = pool.acquire_partition(&mut disc, UserId(2), SubheaderPattern::ANY, window(200)).unwrap();
        assert_ne!(a, b);
        assert_eq!(
            pool.acquire_partition(&mut disc, UserId(3), SubheaderPattern::ANY, window(300)),
            Err(CdBlockError::OutOfPartitions)
        );
        assert_eq!(pool.in_use(), 2);
        assert_eq!(pool.get(a).unwrap().state(), PartitionState::Reserved);
        assert_eq!(pool.get(a).unwrap().owner(), Some(UserId(1)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut disc = StubDisc::new();
        let mut pool = PartitionPool::new(2, 4);
        let a = pool.acquire_partition(&mut disc, UserId(1), SubheaderPattern::ANY, window(100)).unwrap();
        pool.release_partition(&mut disc, a);
        assert_eq!(pool.available(), 2);
        assert!(disc.installed.is_empty());
        pool.release_partition(&mut disc, a);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_filter_queued_while_transferring() {
        let mut disc = StubDisc::new();
        let mut pool = PartitionPool::new(4, 4);
        disc.transferring = true;
        let a = pool.acquire_partition(&mut disc, UserId(1), SubheaderPattern::ANY, window(100)).unwrap();
        assert!(pool.filter_pending(a));
        assert!(disc.installed.is_empty());

        assert_eq!(pool.flush_filters(&mut disc), Ok(0));
        disc.transferring = false;
        assert_eq!(pool.flush_filters(&mut disc), Ok(1));
        assert!(!pool.filter_pending(a));
        assert_eq!(disc.installed.len(), 1);
    }

    #[test]
    fn test_release_cancels_queued_filter() {
        let mut disc = StubDisc::new();
        let mut pool = PartitionPool::new(4, 4);
        disc.transferring = true;
        let a = pool.acquire_partition(&mut disc, UserId(1), SubheaderPattern::ANY, window(100)).unwrap();
        pool.release_partition(&mut disc, a);
        assert_eq!(pool.queued_filters(), 0);
    }

    #[test]
    fn test_filter_queue_full() {
        let mut disc = StubDisc::new();
        let mut pool = PartitionPool::new(4, 1);
        disc.transferring = true;
        pool.acquire_partition(&mut disc, UserId(1), SubheaderPattern::ANY, window(100)).unwrap();
        assert_eq!(
            pool.acquire_partition(&mut disc, UserId(2), SubheaderPattern::ANY, window(200)),
            Err(CdBlockError::FilterQueueFull)
        );
        // the failed acquisition must not leak a partition
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_fill_conflict() {
        let mut disc = StubDisc::new();
        let mut pool = PartitionPool::new(4, 4);
        let a = pool.acquire_partition(&mut disc, UserId(1), SubheaderPattern::ANY, window(100)).unwrap();
        let b = pool.acquire_partition(&mut disc, UserId(2), SubheaderPattern::ANY, window(104)).unwrap();
        let c = pool.acquire_partition(&mut disc, UserId(3), SubheaderPattern::ANY, window(300)).unwrap();
        pool.begin_fill(a).unwrap();
        assert_eq!(pool.begin_fill(b), Err(CdBlockError::FilterConflict));
        assert!(pool.begin_fill(c).is_ok());
        pool.mark_full(a);
        assert_eq!(pool.get(a).unwrap().state(), PartitionState::Full);
        assert!(pool.begin_fill(b).is_ok());
    }

    #[test]
    fn test_sector_range_validation() {
        let mut disc = StubDisc::new();
        let mut pool = PartitionPool::new(4, 4);
        let a = pool.acquire_partition(&mut disc, UserId(1), SubheaderPattern::ANY, window(100)).unwrap();
        let b = pool.acquire_partition(&mut disc, UserId(1), SubheaderPattern::ANY, window(200)).unwrap();
        disc.buffered[a.index()] = 4;

        assert_eq!(pool.erase_sector_range(&mut disc, a, 3, 2), Err(CdBlockError::InvalidRange));
        assert_eq!(pool.erase_sector_range(&mut disc, a, 0, 0), Err(CdBlockError::InvalidRange));
        assert_eq!(
            pool.erase_sector_range(&mut disc, PartitionId(3), 0, 1),
            Err(CdBlockError::InvalidPartition)
        );
        pool.move_sector_range(&mut disc, a, 1, 2, b).unwrap();
        assert_eq!(disc.buffered[a.index()], 2);
        assert_eq!(disc.buffered[b.index()], 2);
        pool.erase_sector_range(&mut disc, a, 0, 2).unwrap();
        assert_eq!(disc.buffered[a.index()], 0);
    }

    #[test]
    fn test_retarget_requires_owner() {
        let mut disc = StubDisc::new();
        let mut pool = PartitionPool::new(2, 4);
        let a = pool.acquire_partition(&mut disc, UserId(1), SubheaderPattern::ANY, window(100)).unwrap();
        assert_eq!(
            pool.retarget(&mut disc, a, UserId(2), window(300)),
            Err(CdBlockError::InvalidPartition)
        );
        pool.retarget(&mut disc, a, UserId(1), window(300)).unwrap();
        assert_eq!(pool.get(a).unwrap().window(), window(300));
    }
}
