//! File handle table.
//!
//! Handles live in a fixed arena. A [`HandleId`] carries the slot index and a
//! generation counter, so an id kept after `close` can never reach the file
//! that later reuses the slot.

use alloc::vec::Vec;

use cdblock::{PartitionId, UserId, SECTOR_SIZE};

use crate::directory::DirectoryEntry;
use crate::error::{GfsError, Result};
use crate::flow::{Flow, GetMode};
use crate::ring::RingBuffer;
use crate::transfer::{Transfer, TransferMode};

/// Owner identity reserved for the subsystem's own reads (directories, volume descriptors)
pub const SYSTEM_USER: UserId = UserId(u32::MAX);

/// Stable reference to an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u16,
    generation: u16,
}

impl HandleId {
    /// Slot index
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Resource-owner identity of this handle
    pub fn user_id(&self) -> UserId {
        UserId(((self.generation as u32) << 16) | self.index as u32)
    }
}

/// What the handle is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Open, no read in flight (GFS_NWSTAT_NOACT)
    #[default]
    Idle,
    /// Reading a requested number of sectors (GFS_NWSTAT_FREAD)
    Reading,
    /// Streaming the file window by window until EOF (GFS_NWSTAT_CDREAD)
    CdStreaming,
}

/// Per-handle read settings applied at open.
#[derive(Debug, Clone, Copy)]
pub struct HandleSettings {
    /// Transfer mode
    pub transfer_mode: TransferMode,
    /// Ring capacity in sectors
    pub ring_sectors: usize,
    /// Sectors per drive read
    pub read_window: u32,
}

/// One open file.
#[derive(Debug)]
pub struct FileHandle {
    id: HandleId,
    entry: DirectoryEntry,
    pub(crate) access: AccessMode,
    pub(crate) flow: Flow,
    pub(crate) transfer: Transfer,
    pub(crate) ring: RingBuffer,
    pub(crate) partition: Option<PartitionId>,
    pub(crate) get_mode: GetMode,
    pub(crate) read_window: u32,
    pub(crate) play_active: bool,
}

impl FileHandle {
    fn new(id: HandleId, entry: DirectoryEntry, settings: HandleSettings) -> Self {
        Self {
            id,
            flow: Flow::new(&entry),
            entry,
            access: AccessMode::Idle,
            transfer: Transfer::new(settings.transfer_mode, settings.ring_sectors as u32),
            ring: RingBuffer::new(settings.ring_sectors * SECTOR_SIZE),
            partition: None,
            get_mode: GetMode::Erase,
            read_window: settings.read_window.max(1),
            play_active: false,
        }
    }

    /// Handle id
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Directory entry the handle was opened on
    pub fn entry(&self) -> &DirectoryEntry {
        &self.entry
    }

    /// Current access mode
    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Sector accounting
    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Transfer settings
    pub fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    /// Bytes staged and not yet drained
    pub fn buffered_bytes(&self) -> usize {
        self.ring.len()
    }

    /// Buffer partition currently owned
    pub fn partition(&self) -> Option<PartitionId> {
        self.partition
    }

    /// Get mode
    pub fn get_mode(&self) -> GetMode {
        self.get_mode
    }

    /// Sectors per drive read
    pub fn read_window(&self) -> u32 {
        self.read_window
    }
}

#[derive(Debug)]
struct Slot {
    generation: u16,
    handle: Option<FileHandle>,
}

/// Fixed-capacity arena of open files.
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<Slot>,
}

impl HandleTable {
    /// Table with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                handle: None,
            })
            .collect();
        Self { slots }
    }

    /// Allocate a slot for `entry` with a zeroed flow. Does not touch the disc.
    pub fn open(&mut self, entry: DirectoryEntry, settings: HandleSettings) -> Result<HandleId> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.handle.is_none())
            .ok_or(GfsError::NoFreeHandle)?;
        let id = HandleId {
            index: index as u16,
            generation: slot.generation,
        };
        slot.handle = Some(FileHandle::new(id, entry, settings));
        Ok(id)
    }

    /// Free the slot. Returns the handle, or `None` if `id` is already closed.
    pub fn close(&mut self, id: HandleId) -> Option<FileHandle> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let handle = slot.handle.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(handle)
    }

    /// Look up an open handle
    pub fn get(&self, id: HandleId) -> Result<&FileHandle> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.handle.as_ref())
            .ok_or(GfsError::InvalidHandle)
    }

    /// Look up an open handle mutably
    pub fn get_mut(&mut self, id: HandleId) -> Result<&mut FileHandle> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.handle.as_mut())
            .ok_or(GfsError::InvalidHandle)
    }

    /// Handle whose resource identity is `user`
    pub fn find_by_user(&self, user: UserId) -> Option<HandleId> {
        self.iter().map(FileHandle::id).find(|id| id.user_id() == user)
    }

    /// Ids of every open handle
    pub fn ids(&self) -> Vec<HandleId> {
        self.iter().map(FileHandle::id).collect()
    }

    /// Iterate over open handles
    pub fn iter(&self) -> impl Iterator<Item = &FileHandle> {
        self.slots.iter().filter_map(|s| s.handle.as_ref())
    }

    /// Number of open handles
    pub fn open_count(&self) -> usize {
        self.iter().count()
    }

    /// Table capacity
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
