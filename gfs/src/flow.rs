//! Per-handle flow control: sector-granular disc reads in, byte-granular
//! reads out.
//!
//! A read request covers whole sectors. The first sector may start in the
//! middle (the access pointer was not sector aligned) and the last sector of
//! the file carries only `size - (sectors - 1) * sector_size` valid bytes.
//! Only bytes inside the file and at or after the access pointer reach the
//! ring buffer.
//!
//! Two positions are tracked: the consumer position (what the client has
//! taken, reported by `tell`) and the fetch position (the next byte to stage
//! into the ring). They differ by exactly the bytes sitting in the ring.

use cdblock::{Fad, SectorWindow, SECTOR_SIZE};

use crate::directory::DirectoryEntry;
use crate::error::GfsError;
use crate::ring::RingBuffer;

/// What happens to a sector in the partition once it has been copied
/// (GFS_GMODE_ERASE / GFS_GMODE_RESIDENT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GetMode {
    /// Delete it
    #[default]
    Erase,
    /// Leave it until the partition is released
    Resident,
}

/// Progress of the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Sectors still outstanding
    Pending,
    /// Every requested sector is in the ring (or nothing was requested)
    Done,
    /// The request was aborted
    Error(GfsError),
}

/// Sector accounting for one open file.
#[derive(Debug, Clone)]
pub struct Flow {
    start: Fad,
    file_size: u32,
    file_sectors: u32,
    sector_size: u32,
    seek_position_bytes: u32,
    fetch_position: u32,
    first_sector: u32,
    window_requested: u32,
    sectors_issued: u32,
    window_delivered: u32,
    total_requested: u32,
    total_delivered: u32,
    head_skip: u32,
    last_sector_valid_bytes: u32,
    cursor: u32,
    status: ReadStatus,
}

impl Flow {
    /// Zeroed flow positioned at the start of `entry`
    pub fn new(entry: &DirectoryEntry) -> Self {
        Self {
            start: entry.start_sector,
            file_size: entry.size,
            file_sectors: entry.sector_count,
            sector_size: SECTOR_SIZE as u32,
            seek_position_bytes: 0,
            fetch_position: 0,
            first_sector: 0,
            window_requested: 0,
            sectors_issued: 0,
            window_delivered: 0,
            total_requested: 0,
            total_delivered: 0,
            head_skip: 0,
            last_sector_valid_bytes: 0,
            cursor: 0,
            status: ReadStatus::Done,
        }
    }

    /// Plan a new request of up to `sectors` sectors from the fetch position.
    ///
    /// Returns the number of sectors actually requested; zero at end of file,
    /// in which case the flow is immediately `Done`.
    pub fn plan(&mut self, sectors: u32) -> u32 {
        self.total_requested = 0;
        self.total_delivered = 0;
        self.next_window(sectors)
    }

    /// Extend the current request by a further window of up to `sectors`
    /// sectors. Request totals keep counting from where they were.
    pub fn next_window(&mut self, sectors: u32) -> u32 {
        let pos = self.fetch_position;
        let (first, available) = if pos >= self.file_size {
            (self.file_sectors, 0)
        } else {
            let first = pos / self.sector_size;
            (first, self.file_sectors - first)
        };
        let requested = sectors.min(available);

        self.first_sector = first;
        self.window_requested = requested;
        self.total_requested += requested;
        self.sectors_issued = 0;
        self.window_delivered = 0;
        self.cursor = 0;
        self.head_skip = if requested > 0 { pos % self.sector_size } else { 0 };
        self.last_sector_valid_bytes = if requested > 0 && first + requested == self.file_sectors {
            self.file_size - (self.file_sectors - 1) * self.sector_size
        } else {
            self.sector_size
        };
        self.status = if requested > 0 {
            ReadStatus::Pending
        } else {
            ReadStatus::Done
        };
        requested
    }

    /// Frames covered by the current request
    pub fn window(&self) -> SectorWindow {
        SectorWindow::new(self.start.offset(self.first_sector), self.window_requested)
    }

    /// Next drive read to issue, at most `limit` sectors
    pub fn next_issue(&self, limit: u32) -> Option<(Fad, u32)> {
        let left = self.window_requested - self.sectors_issued;
        (left > 0).then(|| {
            let fad = self.start.offset(self.first_sector + self.sectors_issued);
            (fad, left.min(limit.max(1)))
        })
    }

    /// Record that the drive was asked for `count` more sectors
    pub fn mark_issued(&mut self, count: u32) {
        self.sectors_issued = (self.sectors_issued + count).min(self.window_requested);
    }

    /// Whether every requested sector has been asked of the drive
    pub fn all_issued(&self) -> bool {
        self.sectors_issued == self.window_requested
    }

    /// Frame the next delivered sector must come from
    pub fn expected_fad(&self) -> Fad {
        self.start.offset(self.first_sector + self.window_delivered)
    }

    /// Byte range of sector `index` (within the request) that belongs in the ring
    fn valid_range(&self, index: u32) -> (usize, usize) {
        let skip = if index == 0 { self.head_skip } else { 0 };
        let end = if index + 1 == self.window_requested {
            self.last_sector_valid_bytes
        } else {
            self.sector_size
        };
        (skip as usize, end as usize)
    }

    /// Stage the next sector's valid bytes into `ring`.
    ///
    /// Returns the bytes staged, or `None` when the ring cannot take the whole
    /// sector yet (nothing is written in that case).
    pub fn deliver_sector(&mut self, data: &[u8], ring: &mut RingBuffer) -> Option<usize> {
        if self.window_delivered >= self.window_requested {
            return None;
        }
        let (skip, end) = self.valid_range(self.window_delivered);
        let end = end.min(data.len());
        let bytes = &data[skip.min(end)..end];
        if ring.free() < bytes.len() {
            return None;
        }
        ring.write(bytes);

        self.window_delivered += 1;
        self.total_delivered += 1;
        self.fetch_position += bytes.len() as u32;
        debug_assert!(self.total_delivered <= self.total_requested);
        if self.window_delivered == self.window_requested {
            self.status = ReadStatus::Done;
        }
        Some(bytes.len())
    }

    /// Record that the client took `bytes` out of the ring
    pub fn consume(&mut self, bytes: usize) {
        self.seek_position_bytes = (self.seek_position_bytes + bytes as u32).min(self.file_size);
    }

    /// Move the access pointer. Staged bytes are invalidated; the caller clears the ring.
    pub fn seek(&mut self, position: u32) {
        debug_assert!(position <= self.file_size);
        self.seek_position_bytes = position;
        self.fetch_position = position;
        self.drop_request();
        self.status = ReadStatus::Done;
    }

    /// Abort the request, forgetting undelivered sectors and bytes still in the ring
    pub fn abort(&mut self, error: GfsError) {
        self.fetch_position = self.seek_position_bytes;
        self.drop_request();
        self.status = ReadStatus::Error(error);
    }

    /// Forget a request that could not be started; staged bytes are kept
    pub fn withdraw(&mut self) {
        self.drop_request();
        self.status = ReadStatus::Done;
    }

    fn drop_request(&mut self) {
        self.window_requested = 0;
        self.total_requested = 0;
        self.total_delivered = 0;
        self.sectors_issued = 0;
        self.window_delivered = 0;
        self.head_skip = 0;
        self.cursor = 0;
    }

    /// Resident mode: position of the next unread sector in the partition
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Resident mode: step past a copied sector
    pub fn advance_cursor(&mut self) {
        self.cursor += 1;
    }

    /// Current request status
    pub fn status(&self) -> ReadStatus {
        self.status
    }

    /// Whether a request is outstanding
    pub fn is_pending(&self) -> bool {
        self.status == ReadStatus::Pending
    }

    /// Sectors in the current request, across every window a stream has read
    pub fn sectors_requested(&self) -> u32 {
        self.total_requested
    }

    /// Sectors of the current request already staged. Never decreases
    /// until a new request is planned.
    pub fn sectors_delivered(&self) -> u32 {
        self.total_delivered
    }

    /// Sectors in the current window
    pub fn window_requested(&self) -> u32 {
        self.window_requested
    }

    /// Sectors of the current window already staged
    pub fn window_delivered(&self) -> u32 {
        self.window_delivered
    }

    /// Payload bytes per sector
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// Valid bytes in the last sector of the current request
    pub fn last_sector_valid_bytes(&self) -> u32 {
        self.last_sector_valid_bytes
    }

    /// Consumer position (bytes the client has taken)
    pub fn seek_position_bytes(&self) -> u32 {
        self.seek_position_bytes
    }

    /// Producer position (next byte to stage)
    pub fn fetch_position(&self) -> u32 {
        self.fetch_position
    }

    /// File size in bytes
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    /// Whether everything up to the end of the file has been staged
    pub fn fetched_all(&self) -> bool {
        self.fetch_position >= self.file_size
    }

    /// Whether the client has consumed the whole file
    pub fn is_eof(&self) -> bool {
        self.seek_position_bytes >= self.file_size
    }

    /// Sectors needed to stage `bytes` more bytes from the fetch position
    pub fn sectors_for(&self, bytes: usize) -> u32 {
        let from = (self.fetch_position % self.sector_size) as usize;
        (from + bytes).div_ceil(self.sector_size as usize) as u32
    }
}
