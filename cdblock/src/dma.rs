//! DMA channel interface.
//!
//! # Channel State Machine
//! ```text
//!     FREE ──acquire_channel()──> HELD ──start_transfer()──> BUSY
//!       ▲                          │  ▲                         │
//!       └────────release()─────────┘  └──────is_complete()──────┘
//! ```
//!
//! The file layer holds a channel only for the duration of one drain and
//! releases it on completion or cancellation.

use alloc::vec::Vec;
use thiserror::Error;

/// DMA transfer strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaMode {
    /// Cycle-steal transfer on a CPU-side DMA controller
    CycleSteal,
    /// Bus DMA on a dedicated channel
    Channel,
}

/// Channel token returned by [`DmaEngine::acquire_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    index: u8,
    mode: DmaMode,
}

impl ChannelHandle {
    /// Create a handle. Engines use this to mint tokens for their channels.
    pub const fn new(index: u8, mode: DmaMode) -> Self {
        Self { index, mode }
    }

    /// Channel index within its engine
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Mode the channel was acquired for
    pub const fn mode(&self) -> DmaMode {
        self.mode
    }
}

/// DMA failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DmaError {
    /// Channel is not held by the caller
    #[error("DMA channel not held")]
    NotHeld,
    /// Channel already has a transfer in flight
    #[error("DMA channel busy")]
    Busy,
    /// Source and destination lengths differ
    #[error("DMA length mismatch")]
    LengthMismatch,
}

/// DMA controller collaborator.
pub trait DmaEngine {
    /// Reserve a channel for `mode`; `None` when all are taken
    fn acquire_channel(&mut self, mode: DmaMode) -> Option<ChannelHandle>;

    /// Copy `src` into `dst` (equal lengths)
    fn start_transfer(&mut self, channel: ChannelHandle, src: &[u8], dst: &mut [u8]) -> Result<(), DmaError>;

    /// Whether the last transfer on `channel` finished
    fn is_complete(&mut self, channel: ChannelHandle) -> bool;

    /// Give the channel back
    fn release(&mut self, channel: ChannelHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Free,
    Held,
    Busy { remaining: u32 },
}

#[derive(Debug, Clone)]
struct SoftChannel {
    mode: DmaMode,
    state: ChannelState,
    bytes_moved: u64,
}

/// CPU-backed DMA engine.
///
/// Data moves when the transfer starts; completion can be delayed by a fixed
/// number of `is_complete` polls to exercise callers' wait loops.
#[derive(Debug, Clone)]
pub struct SoftDma {
    channels: Vec<SoftChannel>,
    completion_polls: u32,
}

impl SoftDma {
    /// Engine with `cycle_steal` cycle-steal channels and `bus` bus channels
    pub fn new(cycle_steal: usize, bus: usize) -> Self {
        let channels = (0..cycle_steal)
            .map(|_| DmaMode::CycleSteal)
            .chain((0..bus).map(|_| DmaMode::Channel))
            .map(|mode| SoftChannel {
                mode,
                state: ChannelState::Free,
                bytes_moved: 0,
            })
            .collect();
        Self {
            channels,
            completion_polls: 0,
        }
    }

    /// Report completion only after `polls` calls to `is_complete`
    pub fn with_completion_delay(mut self, polls: u32) -> Self {
        self.completion_polls = polls;
        self
    }

    /// Channels currently held or busy
    pub fn channels_in_use(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.state != ChannelState::Free)
            .count()
    }

    /// Total bytes moved by every channel
    pub fn bytes_moved(&self) -> u64 {
        self.channels.iter().map(|c| c.bytes_moved).sum()
    }

    fn channel_mut(&mut self, handle: ChannelHandle) -> Option<&mut SoftChannel> {
        self.channels
            .get_mut(handle.index as usize)
            .filter(|c| c.mode == handle.mode)
    }
}

impl Default for SoftDma {
    fn default() -> Self {
        Self::new(2, 1)
    }
}

impl DmaEngine for SoftDma {
    fn acquire_channel(&mut self, mode: DmaMode) -> Option<ChannelHandle> {
        let (index, channel) = self
            .channels
            .iter_mut()
            .enumerate()
            .find(|(_, c)| c.mode == mode && c.state == ChannelState::Free)?;
        channel.state = ChannelState::Held;
        Some(ChannelHandle::new(index as u8, mode))
    }

    fn start_transfer(&mut self, handle: ChannelHandle, src: &[u8], dst: &mut [u8]) -> Result<(), DmaError> {
        let delay = self.completion_polls;
        let channel = self.channel_mut(handle).ok_or(DmaError::NotHeld)?;
        match channel.state {
            ChannelState::Free => return Err(DmaError::NotHeld),
            ChannelState::Busy { .. } => return Err(DmaError::Busy),
            ChannelState::Held => {}
        }
        if src.len() != dst.len() {
            return Err(DmaError::LengthMismatch);
        }
        dst.copy_from_slice(src);
        channel.bytes_moved += src.len() as u64;
        channel.state = ChannelState::Busy { remaining: delay };
        Ok(())
    }

    fn is_complete(&mut self, handle: ChannelHandle) -> bool {
        let Some(channel) = self.channel_mut(handle) else {
            return true;
        };
        match channel.state {
            ChannelState::Busy { remaining: 0 } => {
                channel.state = ChannelState::Held;
                true
            }
            ChannelState::Busy { remaining } => {
                channel.state = ChannelState::Busy {
                    remaining: remaining - 1,
                };
                false
            }
            _ => true,
        }
    }

    fn release(&mut self, handle: ChannelHandle) {
        if let Some(channel) = self.channel_mut(handle) {
            channel.state = ChannelState::Free;
        }
    }
}
