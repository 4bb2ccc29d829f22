//! The file system facade.
//!
//! [`Gfs`] owns the drive, the partition pool, the pickup, the handle table
//! and the access server, and exposes the client-facing operations. Nothing
//! here blocks on hardware except the explicitly blocking calls
//! ([`Gfs::read_blocking`], [`Gfs::load`], directory loading), which drive
//! [`Gfs::tick`] themselves until they are done.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::Cell;

use cdblock::{
    CdBlockError, DiscController, DmaEngine, Fad, PartitionId, PartitionPool, PickupArbiter,
    SectorWindow, SeekGrant, SoftDma, SubheaderPattern, SECTOR_SIZE,
};

use crate::config::GfsConfig;
use crate::directory::volume::{self, MAX_DESCRIPTORS, VOLUME_DESCRIPTOR_START};
use crate::directory::{
    Descriptor, DirSelector, DirTableKind, DirectoryEntry, DirectoryTable, VolumeInfo,
};
use crate::error::{ErrorSink, ErrorStatus, GfsError, Result};
use crate::flow::{GetMode, ReadStatus};
use crate::handle::{AccessMode, HandleId, HandleSettings, HandleTable, SYSTEM_USER};
use crate::server::{self, AccessServer, Quantum, Resources, ServerStatus};
use crate::transfer::{PullConsumer, TransferMode};

/// Reference point for [`Gfs::seek`] (GFS_SEEK_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// From the start of the file
    Start,
    /// From the current access pointer
    Current,
    /// From the end of the file
    End,
}

/// Size information for an open file (GFS_GetFileSize).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSizeInfo {
    /// Size in bytes
    pub size: u32,
    /// Payload bytes per sector
    pub sector_size: u32,
    /// Sectors occupied
    pub sector_count: u32,
    /// Valid bytes in the last sector
    pub last_sector_bytes: u32,
}

/// Asynchronous CD file system.
pub struct Gfs<D: DiscController, M: DmaEngine = SoftDma> {
    config: GfsConfig,
    disc: D,
    dma: M,
    pool: PartitionPool,
    pickup: PickupArbiter,
    handles: HandleTable,
    server: AccessServer,
    volume: Option<VolumeInfo>,
    current: Option<DirectoryTable>,
    dir_kind: DirTableKind,
    arrivals: Rc<Cell<u64>>,
    errors: ErrorStatus,
    error_sink: Option<Box<dyn ErrorSink>>,
    yield_hook: Option<Box<dyn FnMut()>>,
}

impl<D: DiscController, M: DmaEngine> Gfs<D, M> {
    /// Bring up the file system over `disc` and `dma`.
    ///
    /// No disc access happens here; call [`mount`](Self::mount) to read the
    /// volume descriptors and the root directory.
    pub fn new(mut disc: D, dma: M, config: GfsConfig) -> Result<Self> {
        config.validate()?;

        let arrivals = Rc::new(Cell::new(0u64));
        let counter = Rc::clone(&arrivals);
        disc.on_sector_arrived(Some(Box::new(move |_: PartitionId, _: Fad| {
            counter.set(counter.get().wrapping_add(1));
        })));

        log::debug!(
            "gfs: {} handles, {} partitions, {} sector rings",
            config.open_max,
            config.partition_count,
            config.ring_sectors
        );

        Ok(Self {
            pool: PartitionPool::new(config.partition_count, config.filter_queue_depth),
            pickup: PickupArbiter::new(config.seek_timeout_ticks),
            handles: HandleTable::new(config.open_max),
            server: AccessServer::new(),
            volume: None,
            current: None,
            dir_kind: DirTableKind::default(),
            arrivals,
            errors: ErrorStatus::default(),
            error_sink: None,
            yield_hook: None,
            config,
            disc,
            dma,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &GfsConfig {
        &self.config
    }

    /// The drive
    pub fn disc(&self) -> &D {
        &self.disc
    }

    /// The drive, mutably (media changes, fault injection)
    pub fn disc_mut(&mut self) -> &mut D {
        &mut self.disc
    }

    /// The DMA engine
    pub fn dma(&self) -> &M {
        &self.dma
    }

    /// Buffer partition pool
    pub fn pool(&self) -> &PartitionPool {
        &self.pool
    }

    /// Pickup arbiter
    pub fn pickup(&self) -> &PickupArbiter {
        &self.pickup
    }

    /// Open handles
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Access server
    pub fn server(&self) -> &AccessServer {
        &self.server
    }

    // ---------------------------------------------------------------------
    // Directory
    // ---------------------------------------------------------------------

    /// Read the volume descriptors and load the root directory.
    pub fn mount(&mut self) -> Result<&VolumeInfo> {
        let mut primary = None;
        for i in 0..MAX_DESCRIPTORS {
            let sector = self.fetch_sectors(Fad::from_lba(VOLUME_DESCRIPTOR_START + i), 1)?;
            match volume::parse_descriptor(&sector).inspect_err(|e| log::warn!("descriptor {}: {}", i, e))? {
                Descriptor::Primary(info) => primary = Some(info),
                Descriptor::Terminator => break,
                Descriptor::Other(kind) => log::trace!("skipping volume descriptor type {}", kind),
            }
        }
        let info = primary.ok_or(GfsError::MalformedDirectory)?;
        let root = self.read_table(Fad::from_lba(info.root_lba), info.root_len)?;

        log::info!(
            "mounted '{}': {} sectors, root has {} entries",
            info.volume_id,
            info.volume_space_size,
            root.len()
        );
        self.current = Some(root);
        Ok(self.volume.insert(info))
    }

    /// Mounted volume, if any
    pub fn volume(&self) -> Option<&VolumeInfo> {
        self.volume.as_ref()
    }

    /// Table layout used for directories loaded from now on (GFS_DIR_ID / GFS_DIR_NAME)
    pub fn set_dir_table_kind(&mut self, kind: DirTableKind) {
        self.dir_kind = kind;
    }

    /// Load a directory table without making it current (GFS_LoadDir)
    pub fn load_directory(&mut self, selector: DirSelector<'_>) -> Result<DirectoryTable> {
        let entry = match selector {
            DirSelector::Root => {
                let (lba, len) = self
                    .volume
                    .as_ref()
                    .map(|v| (v.root_lba, v.root_len))
                    .ok_or(GfsError::NotFound)?;
                return self.read_table(Fad::from_lba(lba), len);
            }
            DirSelector::Id(id) => *self.current_directory()?.entry(id)?,
            DirSelector::Path(path) => return self.load_path(path),
        };
        self.load_entry(&entry)
    }

    fn load_path(&mut self, path: &str) -> Result<DirectoryTable> {
        let mut table = if path.starts_with('/') {
            self.load_directory(DirSelector::Root)?
        } else {
            self.current_directory()?.clone()
        };
        for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            let entry = *table.resolve(component)?;
            table = self.load_entry(&entry)?;
        }
        Ok(table)
    }

    fn load_entry(&mut self, entry: &DirectoryEntry) -> Result<DirectoryTable> {
        if !entry.is_directory() {
            return Err(GfsError::NotADirectory);
        }
        self.read_table(entry.start_sector, entry.size)
    }

    fn read_table(&mut self, location: Fad, size: u32) -> Result<DirectoryTable> {
        let sectors = (size as usize).div_ceil(SECTOR_SIZE).max(1) as u32;
        let mut data = self.fetch_sectors(location, sectors)?;
        data.truncate(size as usize);
        DirectoryTable::parse(self.dir_kind, location, &data, self.config.max_dir_entries)
    }

    /// Make `table` the current directory (GFS_SetDir).
    ///
    /// Open handles keep the entries they were opened with.
    pub fn set_directory(&mut self, table: DirectoryTable) {
        self.current = Some(table);
    }

    /// Change the current directory; `None` returns to the root (GFS_CdDir)
    pub fn change_dir(&mut self, path: Option<&str>) -> Result<()> {
        let selector = path.map_or(DirSelector::Root, DirSelector::Path);
        let table = self.load_directory(selector)?;
        self.current = Some(table);
        Ok(())
    }

    /// Current directory table
    pub fn current_directory(&self) -> Result<&DirectoryTable> {
        self.current.as_ref().ok_or(GfsError::NotFound)
    }

    /// Identifier of `name` in the current directory (GFS_NameToId)
    pub fn name_to_id(&self, name: &str) -> Result<u32> {
        self.current_directory()?.id_of(name)
    }

    /// Name of `id` in the current directory (GFS_IdToName)
    pub fn id_to_name(&self, id: u32) -> Result<&str> {
        self.current_directory()?
            .name_of(id)
            .ok_or(GfsError::InvalidFileId)
    }

    /// Entry `id` of the current directory (GFS_GetDirInfo)
    pub fn dir_entry(&self, id: u32) -> Result<&DirectoryEntry> {
        self.current_directory()?.entry(id)
    }

    /// Frame address of sector `offset` of file `id` (GFS_GetFad)
    pub fn get_fad(&self, id: u32, offset: u32) -> Result<Fad> {
        self.dir_entry(id)?
            .fad_at(offset)
            .ok_or(GfsError::InvalidParameter)
    }

    // ---------------------------------------------------------------------
    // Handles
    // ---------------------------------------------------------------------

    fn settings(&self) -> HandleSettings {
        HandleSettings {
            transfer_mode: self.config.transfer_mode,
            ring_sectors: self.config.ring_sectors,
            read_window: self.config.read_window,
        }
    }

    /// Open file `id` of the current directory (GFS_Open)
    pub fn open(&mut self, id: u32) -> Result<HandleId> {
        let entry = *self.dir_entry(id)?;
        self.open_entry(entry)
    }

    /// Open a file by name in the current directory
    pub fn open_name(&mut self, name: &str) -> Result<HandleId> {
        let id = self.name_to_id(name)?;
        self.open(id)
    }

    /// Open an already resolved entry
    pub fn open_entry(&mut self, entry: DirectoryEntry) -> Result<HandleId> {
        let settings = self.settings();
        let handle = self.handles.open(entry, settings)?;
        log::debug!("opened {:?} '{}' at {}", handle, entry.name(), entry.start_sector);
        Ok(handle)
    }

    /// Close a handle, cancelling its read (GFS_Close).
    ///
    /// Closing an already closed handle does nothing.
    pub fn close(&mut self, id: HandleId) {
        if self.handles.get(id).is_err() {
            return;
        }
        self.release_resources(id);
        self.handles.close(id);
        log::debug!("closed {:?}", id);
    }

    /// Stop the handle's read and discard staged data (GFS_NwStop)
    pub fn cancel(&mut self, id: HandleId) -> Result<()> {
        self.handles.get(id)?;
        self.release_resources(id);
        let handle = self.handles.get_mut(id)?;
        if handle.flow.is_pending() {
            handle.flow.abort(GfsError::Cancelled);
        } else {
            handle.flow.seek(handle.flow.seek_position_bytes());
        }
        handle.ring.clear();
        Ok(())
    }

    fn release_resources(&mut self, id: HandleId) {
        let user = id.user_id();
        if self.pickup.owner() == Some(user) {
            self.disc.stop();
            self.pickup.release(user);
        }
        if let Ok(handle) = self.handles.get_mut(id) {
            if let Some(partition) = handle.partition.take() {
                self.pool.release_partition(&mut self.disc, partition);
            }
            handle.play_active = false;
            handle.access = AccessMode::Idle;
        }
        self.server.deregister(id);
    }

    /// Move the access pointer (GFS_Seek). Returns the new position.
    ///
    /// Targets outside `[0, size]` fail with `InvalidSeek` and leave the
    /// pointer where it was.
    pub fn seek(&mut self, id: HandleId, offset: i64, origin: SeekOrigin) -> Result<u32> {
        let handle = self.handles.get_mut(id)?;
        if handle.flow.is_pending() {
            return Err(GfsError::FileBusy);
        }
        let size = handle.flow.file_size();
        let base = match origin {
            SeekOrigin::Start => 0,
            SeekOrigin::Current => i64::from(handle.flow.seek_position_bytes()),
            SeekOrigin::End => i64::from(size),
        };
        let target = base
            .checked_add(offset)
            .filter(|t| (0..=i64::from(size)).contains(t))
            .ok_or(GfsError::InvalidSeek)?;

        let position = target as u32;
        handle.flow.seek(position);
        handle.ring.clear();
        Ok(position)
    }

    /// Access pointer in bytes (GFS_Tell)
    pub fn tell(&self, id: HandleId) -> Result<u32> {
        Ok(self.handles.get(id)?.flow.seek_position_bytes())
    }

    /// Whether the client has consumed the whole file (GFS_IsEof)
    pub fn is_eof(&self, id: HandleId) -> Result<bool> {
        Ok(self.handles.get(id)?.flow.is_eof())
    }

    /// Sectors needed to hold `bytes` of this file (GFS_ByteToSct)
    pub fn byte_to_sectors(&self, id: HandleId, bytes: u32) -> Result<u32> {
        let sector_size = self.handles.get(id)?.flow.sector_size();
        Ok(bytes.div_ceil(sector_size))
    }

    /// Size of the open file (GFS_GetFileSize)
    pub fn file_size_info(&self, id: HandleId) -> Result<FileSizeInfo> {
        let handle = self.handles.get(id)?;
        let entry = handle.entry();
        Ok(FileSizeInfo {
            size: entry.size,
            sector_size: handle.flow.sector_size(),
            sector_count: entry.sector_count,
            last_sector_bytes: entry.last_sector_bytes(),
        })
    }

    /// Directory entry the handle was opened with (GFS_GetFileInfo)
    pub fn file_info(&self, id: HandleId) -> Result<DirectoryEntry> {
        Ok(*self.handles.get(id)?.entry())
    }

    /// What the handle is doing and how many bytes wait in its ring (GFS_NwGetStat)
    pub fn access_status(&self, id: HandleId) -> Result<(AccessMode, usize)> {
        let handle = self.handles.get(id)?;
        Ok((handle.access(), handle.buffered_bytes()))
    }

    /// Sectors held in the CD block for this handle (GFS_GetNumCdbuf).
    ///
    /// Zero when the handle holds no partition. In `Erase` mode these are the
    /// sectors not yet staged into the ring.
    pub fn buffered_sectors(&self, id: HandleId) -> Result<u32> {
        let handle = self.handles.get(id)?;
        Ok(handle
            .partition
            .map_or(0, |partition| self.disc.sectors_in_partition(partition)))
    }

    /// Choose how ring data reaches the client (GFS_SetTmode)
    pub fn configure(&mut self, id: HandleId, mode: TransferMode) -> Result<()> {
        self.handles.get_mut(id)?.transfer.configure(mode);
        Ok(())
    }

    /// Sectors handed over per transfer (GFS_SetTrnsLen)
    pub fn set_transfer_unit(&mut self, id: HandleId, sectors: u32) -> Result<()> {
        if sectors == 0 {
            return Err(GfsError::InvalidParameter);
        }
        self.handles.get_mut(id)?.transfer.set_unit(sectors);
        Ok(())
    }

    /// Hand ring data to `consumer` as it arrives (GFS_SetTransPara / TRN_SCU pull)
    pub fn register_pull_callback(&mut self, id: HandleId, consumer: Box<dyn PullConsumer>) -> Result<()> {
        self.handles.get_mut(id)?.transfer.register_pull_callback(consumer);
        Ok(())
    }

    /// Remove the pull consumer, returning it
    pub fn clear_pull_callback(&mut self, id: HandleId) -> Result<Option<Box<dyn PullConsumer>>> {
        Ok(self.handles.get_mut(id)?.transfer.clear_pull_callback())
    }

    /// Keep or erase sectors after they are copied (GFS_SetGmode)
    pub fn set_get_mode(&mut self, id: HandleId, mode: GetMode) -> Result<()> {
        let handle = self.handles.get_mut(id)?;
        if handle.flow.is_pending() {
            return Err(GfsError::FileBusy);
        }
        handle.get_mode = mode;
        Ok(())
    }

    /// Maximum sectors per drive read (GFS_SetReadPara)
    pub fn set_read_window(&mut self, id: HandleId, sectors: u32) -> Result<()> {
        if sectors == 0 {
            return Err(GfsError::InvalidParameter);
        }
        self.handles.get_mut(id)?.read_window = sectors;
        Ok(())
    }

    /// Park the pickup at the handle's access pointer (GFS_NwCdSeek)
    pub fn move_pickup(&mut self, id: HandleId) -> Result<()> {
        let handle = self.handles.get(id)?;
        if handle.flow.is_pending() {
            return Err(GfsError::FileBusy);
        }
        if self.pickup.owner().is_some() {
            return Err(GfsError::Busy);
        }
        let entry = handle.entry();
        let sector = (handle.flow.fetch_position() / handle.flow.sector_size())
            .min(entry.sector_count.saturating_sub(1));
        self.disc.seek(entry.start_sector.offset(sector))?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Start a non-blocking read of up to `sectors` sectors (GFS_NwFread).
    ///
    /// Resource shortage is reported immediately (`OutOfPartitions`,
    /// `FilterQueueFull`) and leaves the handle as it was.
    pub fn read_nonblocking_start(&mut self, id: HandleId, sectors: u32) -> Result<()> {
        if sectors == 0 {
            return Err(GfsError::InvalidParameter);
        }
        self.start_read(id, sectors, AccessMode::Reading)
    }

    /// Stream the file through the CD buffer `window` sectors at a time (GFS_NwCdRead)
    pub fn cd_stream_start(&mut self, id: HandleId, window: u32) -> Result<()> {
        if window == 0 {
            return Err(GfsError::InvalidParameter);
        }
        self.start_read(id, window, AccessMode::CdStreaming)?;
        self.handles.get_mut(id)?.read_window = window;
        Ok(())
    }

    fn start_read(&mut self, id: HandleId, sectors: u32, access: AccessMode) -> Result<()> {
        let handle = self.handles.get_mut(id)?;
        if handle.flow.is_pending() {
            return Err(GfsError::FileBusy);
        }
        if handle.flow.plan(sectors) == 0 {
            return Ok(());
        }

        let window = handle.flow.window();
        let user = id.user_id();
        let acquired = match handle.partition {
            Some(partition) => self
                .pool
                .retarget(&mut self.disc, partition, user, window)
                .map(|()| partition),
            None => self
                .pool
                .acquire_partition(&mut self.disc, user, SubheaderPattern::ANY, window),
        };
        match acquired {
            Ok(partition) => {
                handle.partition = Some(partition);
                handle.access = access;
                self.server.register(id);
                log::trace!("{:?} requested {} sectors from {}", id, window.count, window.start);
                Ok(())
            }
            Err(err) => {
                handle.flow.withdraw();
                Err(err.into())
            }
        }
    }

    /// Status of the handle's request (GFS_NwIsComplete)
    pub fn poll_complete(&self, id: HandleId) -> Result<ReadStatus> {
        Ok(self.handles.get(id)?.flow.status())
    }

    /// Advance only this handle by one quantum (GFS_NwExecOne)
    pub fn exec_one(&mut self, id: HandleId) -> Result<ReadStatus> {
        self.handles.get(id)?;
        self.poll_drive();
        if self.server.is_registered(id) {
            self.run_and_settle(id);
        }
        self.poll_complete(id)
    }

    /// Copy up to `max_bytes` of staged data into `dest` (GFS_NwGetData side).
    ///
    /// Returns the bytes copied. With a DMA transfer mode this may be zero
    /// when no channel is free; try again after a tick.
    pub fn drain(&mut self, id: HandleId, dest: &mut [u8], max_bytes: usize) -> Result<usize> {
        let handle = self.handles.get_mut(id)?;
        let n = handle
            .transfer
            .drain(&mut handle.ring, &mut self.dma, dest, max_bytes)?;
        handle.flow.consume(n);
        Ok(n)
    }

    /// Read into `buf` until it is full or the file ends (GFS_Fread).
    ///
    /// Drives the server itself, calling the yield hook between ticks. Gives
    /// up with `Timeout` after `stall_ticks` ticks without progress.
    pub fn read_blocking(&mut self, id: HandleId, buf: &mut [u8]) -> Result<usize> {
        if self.handles.get(id)?.flow.is_pending() {
            return Err(GfsError::FileBusy);
        }

        let mut total = 0;
        let mut stalled = 0u32;
        let mut started = false;
        loop {
            let handle = self.handles.get_mut(id)?;
            let n = handle
                .transfer
                .drain(&mut handle.ring, &mut self.dma, &mut buf[total..], usize::MAX)?;
            handle.flow.consume(n);
            total += n;
            if total == buf.len() {
                break;
            }
            if n > 0 {
                stalled = 0;
            }

            let status = handle.flow.status();
            let staged = handle.ring.len();
            let fetched_all = handle.flow.fetched_all();
            let wanted = handle.flow.sectors_for((buf.len() - total).saturating_sub(staged));

            match status {
                ReadStatus::Error(err) if started => return Err(err),
                ReadStatus::Pending => {}
                _ if staged > 0 => {}
                _ if fetched_all => break,
                _ => match self.start_read(id, wanted, AccessMode::Reading) {
                    Ok(()) => started = true,
                    Err(err) if err.is_retryable() => {}
                    Err(err) => return Err(err),
                },
            }

            self.tick();
            if let Some(hook) = self.yield_hook.as_mut() {
                hook();
            }
            stalled += 1;
            if stalled > self.config.stall_ticks {
                log::warn!("{:?} blocking read stalled after {} bytes", id, total);
                self.cancel(id)?;
                self.record_error(GfsError::Timeout);
                return Err(GfsError::Timeout);
            }
        }
        Ok(total)
    }

    /// Open file `file_id`, read from `offset` into `buf`, close (GFS_Load)
    pub fn load(&mut self, file_id: u32, offset: u32, buf: &mut [u8]) -> Result<usize> {
        let id = self.open(file_id)?;
        let result = self
            .seek(id, i64::from(offset), SeekOrigin::Start)
            .and_then(|_| self.read_blocking(id, buf));
        self.close(id);
        result
    }

    // ---------------------------------------------------------------------
    // Server
    // ---------------------------------------------------------------------

    /// Run one server tick (GFS_NwExecServer).
    ///
    /// Polls the drive, applies queued filter changes, checks the pickup
    /// timeout and gives every registered handle one quantum.
    pub fn tick(&mut self) -> ServerStatus {
        let mut errored = self.poll_drive();
        let mut progressed = false;
        let mut paused = false;

        for id in self.server.schedule() {
            match self.run_quantum(id) {
                Ok(quantum) => {
                    progressed |= quantum.progressed;
                    paused |= quantum.back_pressure;
                    if quantum.finished {
                        self.finish(id);
                    }
                    self.settle(id);
                }
                Err(GfsError::InvalidHandle) => self.server.deregister(id),
                Err(err) => {
                    errored = true;
                    self.abort(id, err);
                }
            }
        }

        let status = if errored {
            ServerStatus::Error
        } else if self.server.is_empty() {
            ServerStatus::Idle
        } else if !progressed && paused {
            ServerStatus::Paused
        } else {
            ServerStatus::Busy
        };
        self.server.set_status(status);
        status
    }

    /// Status of the last tick
    pub fn server_status(&self) -> ServerStatus {
        self.server.status()
    }

    /// Poll the drive and settle the pickup; returns true if a read was aborted
    fn poll_drive(&mut self) -> bool {
        let mut errored = false;
        let arrived = self.arrivals.get();

        if let Err(err) = self.disc.poll() {
            errored = true;
            self.abort_pickup_owner(err.into());
        }
        if let Err(err) = self.pool.flush_filters(&mut self.disc) {
            errored = true;
            self.record_error(err.into());
        }

        if self.arrivals.get() != arrived || self.disc.status().buffer_full {
            self.pickup.note_progress();
        } else if let Err(err) = self.pickup.check_timeout(1) {
            errored = true;
            log::warn!("pickup timed out after {} ticks", self.pickup.waited());
            self.disc.stop();
            self.abort_pickup_owner(err.into());
        }
        errored
    }

    fn run_quantum(&mut self, id: HandleId) -> Result<Quantum> {
        let handle = self.handles.get_mut(id)?;
        let mut res = Resources {
            disc: &mut self.disc,
            pool: &mut self.pool,
            pickup: &mut self.pickup,
        };
        server::service(&mut res, handle)
    }

    fn run_and_settle(&mut self, id: HandleId) {
        match self.run_quantum(id) {
            Ok(quantum) => {
                if quantum.finished {
                    self.finish(id);
                }
                self.settle(id);
            }
            Err(GfsError::InvalidHandle) => self.server.deregister(id),
            Err(err) => self.abort(id, err),
        }
    }

    /// Drop a handle from the rotation once it has nothing left to do.
    ///
    /// A handle with a pull consumer stays until its ring is empty.
    fn settle(&mut self, id: HandleId) {
        let idle = self.handles.get(id).map_or(true, |h| {
            h.partition.is_none()
                && !h.flow.is_pending()
                && (h.ring.is_empty() || !h.transfer.has_consumer())
        });
        if idle {
            self.server.deregister(id);
        }
    }

    /// Every requested sector is staged: stream on or hand the partition back
    fn finish(&mut self, id: HandleId) {
        let Ok(handle) = self.handles.get_mut(id) else {
            self.server.deregister(id);
            return;
        };
        let Some(partition) = handle.partition else {
            handle.access = AccessMode::Idle;
            return;
        };

        if handle.access == AccessMode::CdStreaming && !handle.flow.fetched_all() {
            let resident = handle.flow.cursor();
            let mut next = Ok(());
            if handle.get_mode == GetMode::Resident && resident > 0 {
                next = self.pool.erase_sector_range(&mut self.disc, partition, 0, resident);
            }
            if next.is_ok() {
                handle.flow.next_window(handle.read_window);
                next = self
                    .pool
                    .retarget(&mut self.disc, partition, id.user_id(), handle.flow.window());
            }
            if let Err(err) = next {
                self.abort(id, err.into());
            }
            return;
        }

        self.pool.release_partition(&mut self.disc, partition);
        handle.partition = None;
        handle.access = AccessMode::Idle;
        log::trace!("{:?} read complete", id);
    }

    /// Abort `id`'s read after a failure; other handles are untouched
    fn abort(&mut self, id: HandleId, err: GfsError) {
        self.release_resources(id);
        if let Ok(handle) = self.handles.get_mut(id) {
            handle.ring.clear();
            handle.flow.abort(err);
        }
        log::warn!("{:?} read aborted: {}", id, err);
        self.record_error(err);
    }

    fn abort_pickup_owner(&mut self, err: GfsError) {
        let Some(owner) = self.pickup.owner() else {
            self.record_error(err);
            return;
        };
        match self.handles.find_by_user(owner) {
            Some(id) => self.abort(id, err),
            None => {
                self.pickup.release(owner);
                self.record_error(err);
            }
        }
    }

    /// Close every handle and return the CD block to its initial state (GFS_Reset).
    ///
    /// The mounted volume and current directory are kept.
    pub fn reset(&mut self) {
        for id in self.handles.ids() {
            self.close(id);
        }
        self.disc.stop();
        self.pickup.reset();
        self.pool.reset(&mut self.disc);
        self.server.clear();
        self.errors = ErrorStatus::default();
        log::debug!("gfs reset");
    }

    // ---------------------------------------------------------------------
    // Errors and hooks
    // ---------------------------------------------------------------------

    fn record_error(&mut self, err: GfsError) {
        self.errors.last = Some(err);
        self.errors.count = self.errors.count.saturating_add(1);
        if let Some(sink) = self.error_sink.as_mut() {
            sink.report(&err);
        }
    }

    /// Last recorded error and the running count (GFS_GetErrStat)
    pub fn error_status(&self) -> ErrorStatus {
        self.errors
    }

    /// Install or remove the global error callback (GFS_SetErrFunc)
    pub fn set_error_sink(&mut self, sink: Option<Box<dyn ErrorSink>>) {
        self.error_sink = sink;
    }

    /// Called between ticks of blocking operations
    pub fn set_yield_hook(&mut self, hook: Option<Box<dyn FnMut()>>) {
        self.yield_hook = hook;
    }

    // ---------------------------------------------------------------------
    // System reads
    // ---------------------------------------------------------------------

    /// Blocking read of whole sectors on behalf of the file system itself
    fn fetch_sectors(&mut self, start: Fad, count: u32) -> Result<Vec<u8>> {
        let window = SectorWindow::new(start, count);
        let result = self.acquire_system_partition(window).and_then(|partition| {
            let data = self.fetch_into(partition, window);
            self.pickup.release(SYSTEM_USER);
            self.pool.release_partition(&mut self.disc, partition);
            data
        });
        if let Err(err) = result {
            self.record_error(err);
        }
        result
    }

    fn acquire_system_partition(&mut self, window: SectorWindow) -> Result<PartitionId> {
        let mut stalled = 0;
        loop {
            match self
                .pool
                .acquire_partition(&mut self.disc, SYSTEM_USER, SubheaderPattern::ANY, window)
            {
                Ok(partition) => return Ok(partition),
                Err(err @ (CdBlockError::OutOfPartitions | CdBlockError::FilterQueueFull)) => {
                    self.wait(&mut stalled, err.into())?
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn fetch_into(&mut self, partition: PartitionId, window: SectorWindow) -> Result<Vec<u8>> {
        let mut stalled = 0;
        loop {
            if !self.pool.filter_pending(partition) {
                match self.pickup.request_seek(window.start, window.count, SYSTEM_USER) {
                    Ok(SeekGrant::Granted) => break,
                    Ok(SeekGrant::AlreadyCovered) | Err(CdBlockError::Busy) => {}
                    Err(err) => return Err(err.into()),
                }
            }
            self.wait(&mut stalled, GfsError::Busy)?;
        }

        self.pool.begin_fill(partition)?;
        self.disc
            .begin_sector_read(window.start, window.count, partition.filter())?;

        let mut data = Vec::with_capacity(window.count as usize * SECTOR_SIZE);
        let mut collected = 0;
        let mut stalled = 0;
        while collected < window.count {
            self.disc.poll()?;
            let mut moved = false;
            while let Some(sector) = self.disc.read_raw_sector(partition, 0) {
                data.extend_from_slice(sector.data);
                self.pool.erase_sector_range(&mut self.disc, partition, 0, 1)?;
                collected += 1;
                moved = true;
            }
            if moved {
                stalled = 0;
                continue;
            }
            stalled += 1;
            if stalled > self.config.stall_ticks {
                self.disc.stop();
                return Err(GfsError::Timeout);
            }
            if let Some(hook) = self.yield_hook.as_mut() {
                hook();
            }
        }
        Ok(data)
    }

    fn wait(&mut self, stalled: &mut u32, err: GfsError) -> Result<()> {
        *stalled += 1;
        if *stalled > self.config.stall_ticks {
            return Err(err);
        }
        self.tick();
        if let Some(hook) = self.yield_hook.as_mut() {
            hook();
        }
        Ok(())
    }
}
