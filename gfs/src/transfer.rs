//! Transfer engine: ring buffer to consumer.
//!
//! # Modes
//!
//! | Mode            | Mover                    | Channel held            |
//! |-----------------|--------------------------|-------------------------|
//! | `Cpu`           | `copy_from_slice`        | none                    |
//! | `CycleStealDma` | DMA engine, cycle-steal  | for one drain           |
//! | `ChannelDma`    | DMA engine, bus channel  | for one drain           |
//! | `Stream`        | registered pull consumer | none                    |
//!
//! A drain never blocks on the ring: it copies what is there and reports how
//! much that was. DMA drains wait for the engine to signal completion, bounded
//! by [`DMA_POLL_LIMIT`], and always give the channel back.

use alloc::boxed::Box;
use core::fmt;

use cdblock::{ChannelHandle, DmaEngine, DmaMode, SECTOR_SIZE};

use crate::error::{GfsError, Result};
use crate::ring::RingBuffer;

/// Completion polls before a DMA transfer is abandoned
pub const DMA_POLL_LIMIT: u32 = 100_000;

/// How bytes leave the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// Synchronous CPU copy
    #[default]
    Cpu,
    /// Cycle-steal DMA
    CycleStealDma,
    /// Bus DMA channel
    ChannelDma,
    /// Pushed to a registered [`PullConsumer`] as data arrives
    Stream,
}

impl TransferMode {
    fn dma_mode(self) -> Option<DmaMode> {
        match self {
            Self::CycleStealDma => Some(DmaMode::CycleSteal),
            Self::ChannelDma => Some(DmaMode::Channel),
            Self::Cpu | Self::Stream => None,
        }
    }
}

/// Streaming consumer fed straight from the ring (decoders, audio players).
pub trait PullConsumer {
    /// Offer `data`; return how many leading bytes were taken
    fn on_data(&mut self, data: &[u8]) -> usize;
}

impl<F: FnMut(&[u8]) -> usize> PullConsumer for F {
    fn on_data(&mut self, data: &[u8]) -> usize {
        self(data)
    }
}

/// Per-handle transfer settings.
pub struct Transfer {
    mode: TransferMode,
    unit: u32,
    consumer: Option<Box<dyn PullConsumer>>,
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("mode", &self.mode)
            .field("unit", &self.unit)
            .field("consumer", &self.consumer.is_some())
            .finish()
    }
}

impl Transfer {
    /// Settings with `unit` sectors per transfer
    pub fn new(mode: TransferMode, unit: u32) -> Self {
        Self {
            mode,
            unit: unit.max(1),
            consumer: None,
        }
    }

    /// Current mode
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Select the mode
    pub fn configure(&mut self, mode: TransferMode) {
        self.mode = mode;
    }

    /// Sectors moved per transfer
    pub fn unit(&self) -> u32 {
        self.unit
    }

    /// Set sectors moved per transfer (at least one)
    pub fn set_unit(&mut self, sectors: u32) {
        self.unit = sectors.max(1);
    }

    /// Byte cap of one transfer
    pub fn max_bytes(&self) -> usize {
        self.unit as usize * SECTOR_SIZE
    }

    /// Install a pull consumer and switch to `Stream` mode
    pub fn register_pull_callback(&mut self, consumer: Box<dyn PullConsumer>) {
        self.consumer = Some(consumer);
        self.mode = TransferMode::Stream;
    }

    /// Remove the pull consumer; the mode falls back to `Cpu`
    pub fn clear_pull_callback(&mut self) -> Option<Box<dyn PullConsumer>> {
        if self.mode == TransferMode::Stream {
            self.mode = TransferMode::Cpu;
        }
        self.consumer.take()
    }

    /// Whether a consumer is registered
    pub fn has_consumer(&self) -> bool {
        self.consumer.is_some()
    }

    /// Copy up to `max_bytes` from `ring` into `dest`, honoring wraparound.
    ///
    /// Returns the bytes copied; zero when the ring is empty or no DMA channel
    /// is free this tick. `Stream` handles drain by CPU copy.
    pub fn drain<M: DmaEngine>(
        &mut self,
        ring: &mut RingBuffer,
        dma: &mut M,
        dest: &mut [u8],
        max_bytes: usize,
    ) -> Result<usize> {
        let n = max_bytes.min(dest.len()).min(ring.len());
        if n == 0 {
            return Ok(0);
        }
        let Some(mode) = self.mode.dma_mode() else {
            return Ok(ring.read(&mut dest[..n]));
        };

        let Some(channel) = dma.acquire_channel(mode) else {
            log::trace!("no {:?} channel free, drain deferred", mode);
            return Ok(0);
        };
        let result = dma_copy(dma, channel, ring, &mut dest[..n]);
        dma.release(channel);
        result?;
        Ok(ring.consume(n))
    }

    /// Offer buffered bytes to the pull consumer; returns bytes it took
    pub fn pump(&mut self, ring: &mut RingBuffer) -> usize {
        let Some(consumer) = self.consumer.as_mut() else {
            return 0;
        };
        let limit = self.unit as usize * SECTOR_SIZE;
        let (a, b) = ring.readable();
        let a = &a[..a.len().min(limit)];
        let mut taken = consumer.on_data(a).min(a.len());
        if taken == a.len() && taken < limit && !b.is_empty() {
            let b = &b[..b.len().min(limit - taken)];
            taken += consumer.on_data(b).min(b.len());
        }
        ring.consume(taken)
    }
}

fn dma_copy<M: DmaEngine>(
    dma: &mut M,
    channel: ChannelHandle,
    ring: &RingBuffer,
    dest: &mut [u8],
) -> Result<()> {
    let (a, b) = ring.readable();
    let first = dest.len().min(a.len());
    let (head, tail) = dest.split_at_mut(first);
    for (src, dst) in [(&a[..first], head), (&b[..tail.len()], tail)] {
        if dst.is_empty() {
            continue;
        }
        dma.start_transfer(channel, src, dst)
            .map_err(|_| GfsError::DmaUnavailable)?;
        let mut polls = 0;
        while !dma.is_complete(channel) {
            polls += 1;
            if polls >= DMA_POLL_LIMIT {
                log::warn!("DMA channel {} never completed", channel.index());
                return Err(GfsError::DmaUnavailable);
            }
        }
    }
    Ok(())
}
