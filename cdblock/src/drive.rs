//! Drive emulator over a block device.
//!
//! `BlockIoDisc` plays the CD block for hosts without the real hardware: it reads
//! 2048-byte sectors from any [`BlockIo`] (an ISO image, a ramdisk), routes them
//! through the installed filters into buffer partitions, and models the things
//! that make a CD drive awkward: seek latency, a fixed sector rate per tick and a
//! small buffer RAM that stalls the read when full.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec;
use alloc::vec::Vec;

use gpt_disk_io::BlockIo;
use gpt_disk_types::Lba;

use crate::disc::{DiscController, DriveStatus, RawSector, SectorCallback};
use crate::error::DiscError;
use crate::filter::FilterCommand;
use crate::subheader::Subheader;
use crate::types::{Fad, FilterId, PartitionId, TransferId, MAX_PARTITIONS, SECTOR_SIZE};

/// Emulated drive timing and capacity.
#[derive(Debug, Clone, Copy)]
pub struct DriveConfig {
    /// Buffer RAM in sectors (default: 200)
    pub buffer_sectors: u32,
    /// Sectors decoded per poll (default: 2)
    pub sectors_per_tick: u32,
    /// Fixed seek cost in polls (default: 2)
    pub seek_base_ticks: u32,
    /// Additional seek cost per 1000 frames of travel (default: 1)
    pub seek_ticks_per_1000: u32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            buffer_sectors: 200,
            sectors_per_tick: 2,
            seek_base_ticks: 2,
            seek_ticks_per_1000: 1,
        }
    }
}

impl DriveConfig {
    /// Config with no seek latency, useful for deterministic tests
    pub fn instant() -> Self {
        Self {
            seek_base_ticks: 0,
            seek_ticks_per_1000: 0,
            ..Default::default()
        }
    }

    /// Set the buffer RAM size
    pub fn with_buffer_sectors(mut self, sectors: u32) -> Self {
        self.buffer_sectors = sectors.max(1);
        self
    }

    /// Set the decode rate
    pub fn with_sectors_per_tick(mut self, sectors: u32) -> Self {
        self.sectors_per_tick = sectors.max(1);
        self
    }

    fn seek_cost(&self, from: Fad, to: Fad) -> u32 {
        let distance = from.0.abs_diff(to.0);
        self.seek_base_ticks + distance / 1000 * self.seek_ticks_per_1000
    }
}

/// Tray / media state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    /// Disc present and readable
    Ready,
    /// Tray closed, no disc
    NoDisc,
    /// Tray open
    TrayOpen,
}

#[derive(Debug)]
struct BufferedSector {
    fad: Fad,
    subheader: Subheader,
    data: Box<[u8]>,
}

#[derive(Debug, Clone, Copy)]
struct Play {
    next: Fad,
    remaining: u32,
    filter: FilterId,
    seek_left: u32,
}

/// CD block emulator reading from a [`BlockIo`] device.
pub struct BlockIoDisc<B: BlockIo> {
    device: B,
    config: DriveConfig,
    media: MediaState,
    partitions: Vec<VecDeque<BufferedSector>>,
    filters: Vec<Option<FilterCommand>>,
    play: Option<Play>,
    head: Fad,
    next_transfer: u32,
    sectors_read: u64,
    subheaders: BTreeMap<u32, Subheader>,
    faults: Vec<Fad>,
    callback: Option<SectorCallback>,
    scratch: Vec<u8>,
}

impl<B: BlockIo> BlockIoDisc<B> {
    /// Wrap `device` with the default drive timing
    pub fn new(device: B) -> Self {
        Self::with_config(device, DriveConfig::default())
    }

    /// Wrap `device` with explicit timing
    pub fn with_config(device: B, config: DriveConfig) -> Self {
        Self {
            device,
            config,
            media: MediaState::Ready,
            partitions: (0..MAX_PARTITIONS).map(|_| VecDeque::new()).collect(),
            filters: vec![None; MAX_PARTITIONS],
            play: None,
            head: Fad::from_lba(0),
            next_transfer: 0,
            sectors_read: 0,
            subheaders: BTreeMap::new(),
            faults: Vec::new(),
            callback: None,
            scratch: vec![0u8; SECTOR_SIZE],
        }
    }

    /// Underlying device
    pub fn device(&self) -> &B {
        &self.device
    }

    /// Underlying device, mutably
    pub fn device_mut(&mut self) -> &mut B {
        &mut self.device
    }

    /// Emulation parameters
    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Change tray/media state; anything but `Ready` aborts the current read
    pub fn set_media(&mut self, media: MediaState) {
        self.media = media;
    }

    /// Make the sector at `fad` unreadable
    pub fn inject_read_error(&mut self, fad: Fad) {
        self.faults.push(fad);
    }

    /// Remove all injected faults
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Attach a Mode 2 subheader to the sector at `fad`
    pub fn set_subheader(&mut self, fad: Fad, subheader: Subheader) {
        self.subheaders.insert(fad.0, subheader);
    }

    /// Total sectors decoded since creation
    pub fn sectors_read(&self) -> u64 {
        self.sectors_read
    }

    /// Filter currently installed for `filter`
    pub fn installed_filter(&self, filter: FilterId) -> Option<&FilterCommand> {
        self.filters.get(filter.0 as usize)?.as_ref()
    }

    fn buffered(&self) -> u32 {
        self.partitions.iter().map(|p| p.len() as u32).sum()
    }

    fn media_error(&self) -> Option<DiscError> {
        match self.media {
            MediaState::Ready => None,
            MediaState::NoDisc => Some(DiscError::NoDisc),
            MediaState::TrayOpen => Some(DiscError::TrayOpen),
        }
    }

    fn decode(&mut self, fad: Fad, filter: FilterId) -> Result<(), DiscError> {
        if self.faults.contains(&fad) {
            return Err(DiscError::ReadFailure { fad });
        }
        self.device
            .read_blocks(Lba(fad.to_lba() as u64), &mut self.scratch)
            .map_err(|_| DiscError::ReadFailure { fad })?;
        self.sectors_read += 1;
        self.head = fad;

        let subheader = self.subheaders.get(&fad.0).copied().unwrap_or_default();
        let route = self
            .filters
            .get(filter.0 as usize)
            .and_then(|f| f.as_ref())
            .filter(|cmd| cmd.accepts(fad, &subheader))
            .map(|cmd| cmd.target);

        match route {
            Some(target) => {
                self.partitions[target.index()].push_back(BufferedSector {
                    fad,
                    subheader,
                    data: self.scratch.clone().into_boxed_slice(),
                });
                if let Some(callback) = self.callback.as_mut() {
                    callback(target, fad);
                }
            }
            None => log::trace!("{} dropped by filter {:?}", fad, filter),
        }
        Ok(())
    }
}

impl<B: BlockIo> DiscController for BlockIoDisc<B> {
    fn poll(&mut self) -> Result<(), DiscError> {
        let Some(mut play) = self.play else {
            return Ok(());
        };
        if let Some(err) = self.media_error() {
            self.play = None;
            return Err(err);
        }
        if play.seek_left > 0 {
            play.seek_left -= 1;
            self.play = Some(play);
            return Ok(());
        }

        for _ in 0..self.config.sectors_per_tick {
            if play.remaining == 0 || self.buffered() >= self.config.buffer_sectors {
                break;
            }
            if let Err(err) = self.decode(play.next, play.filter) {
                self.play = None;
                return Err(err);
            }
            play.next = play.next.offset(1);
            play.remaining -= 1;
        }

        self.play = (play.remaining > 0).then_some(play);
        Ok(())
    }

    fn status(&self) -> DriveStatus {
        DriveStatus {
            head: self.head,
            seeking: self.play.is_some_and(|p| p.seek_left > 0),
            transferring: self.play.is_some(),
            buffer_full: self.buffered() >= self.config.buffer_sectors,
        }
    }

    fn install_filter(&mut self, command: &FilterCommand) -> Result<(), DiscError> {
        let slot = self
            .filters
            .get_mut(command.filter.0 as usize)
            .ok_or(DiscError::InvalidFilter)?;
        *slot = Some(*command);
        Ok(())
    }

    fn clear_filter(&mut self, filter: FilterId) {
        if let Some(slot) = self.filters.get_mut(filter.0 as usize) {
            *slot = None;
        }
    }

    fn begin_sector_read(
        &mut self,
        fad: Fad,
        count: u32,
        filter: FilterId,
    ) -> Result<TransferId, DiscError> {
        if let Some(err) = self.media_error() {
            return Err(err);
        }
        if self.installed_filter(filter).is_none() {
            return Err(DiscError::InvalidFilter);
        }
        self.play = Some(Play {
            next: fad,
            remaining: count,
            filter,
            seek_left: self.config.seek_cost(self.head, fad),
        });
        self.next_transfer = self.next_transfer.wrapping_add(1);
        Ok(TransferId(self.next_transfer))
    }

    fn seek(&mut self, fad: Fad) -> Result<(), DiscError> {
        if let Some(err) = self.media_error() {
            return Err(err);
        }
        self.play = None;
        self.head = fad;
        Ok(())
    }

    fn stop(&mut self) {
        self.play = None;
    }

    fn sectors_in_partition(&self, partition: PartitionId) -> u32 {
        self.partitions
            .get(partition.index())
            .map_or(0, |p| p.len() as u32)
    }

    fn free_sectors(&self) -> u32 {
        self.config.buffer_sectors.saturating_sub(self.buffered())
    }

    fn read_raw_sector(&self, partition: PartitionId, position: u32) -> Option<RawSector<'_>> {
        let sector = self.partitions.get(partition.index())?.get(position as usize)?;
        Some(RawSector {
            fad: sector.fad,
            subheader: sector.subheader,
            data: &sector.data,
        })
    }

    fn erase_sectors(
        &mut self,
        partition: PartitionId,
        position: u32,
        count: u32,
    ) -> Result<(), DiscError> {
        let sectors = self
            .partitions
            .get_mut(partition.index())
            .ok_or(DiscError::InvalidFilter)?;
        let start = (position as usize).min(sectors.len());
        let end = (position as usize).saturating_add(count as usize).min(sectors.len());
        sectors.drain(start..end);
        Ok(())
    }

    fn move_sectors(
        &mut self,
        src: PartitionId,
        position: u32,
        count: u32,
        dst: PartitionId,
    ) -> Result<(), DiscError> {
        if dst.index() >= self.partitions.len() {
            return Err(DiscError::InvalidFilter);
        }
        let moved: Vec<BufferedSector> = {
            let sectors = self
                .partitions
                .get_mut(src.index())
                .ok_or(DiscError::InvalidFilter)?;
            let start = (position as usize).min(sectors.len());
            let end = (position as usize).saturating_add(count as usize).min(sectors.len());
            sectors.drain(start..end).collect()
        };
        self.partitions[dst.index()].extend(moved);
        Ok(())
    }

    fn clear_partition(&mut self, partition: PartitionId) {
        if let Some(sectors) = self.partitions.get_mut(partition.index()) {
            sectors.clear();
        }
    }

    fn on_sector_arrived(&mut self, callback: Option<SectorCallback>) {
        self.callback = callback;
    }
}
