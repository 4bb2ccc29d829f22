//! Error types for CD block operations

use crate::types::Fad;
use thiserror::Error;

/// Result type for CD block operations
pub type Result<T> = core::result::Result<T, CdBlockError>;

/// Failures reported by the drive itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiscError {
    /// Sector could not be read
    #[error("CD read error at {fad}")]
    ReadFailure {
        /// Frame that failed
        fad: Fad,
    },

    /// No disc in the drive
    #[error("No disc present")]
    NoDisc,

    /// Tray is open
    #[error("Tray is open")]
    TrayOpen,

    /// Drive entered its fatal state
    #[error("Drive is in fatal state")]
    Fatal,

    /// CD buffer has no room for the request
    #[error("CD buffer full")]
    BufferFull,

    /// Filter command rejected by the drive
    #[error("Invalid filter")]
    InvalidFilter,
}

/// Errors raised by partition, filter and pickup management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CdBlockError {
    /// Every buffer partition is in use
    #[error("No free buffer partition")]
    OutOfPartitions,

    /// Filter command queue is at capacity
    #[error("Filter command queue full")]
    FilterQueueFull,

    /// Sector range lies outside the buffered data
    #[error("Sector range out of bounds")]
    InvalidRange,

    /// Another filling partition already routes the same sectors
    #[error("Filter pattern overlaps a filling partition")]
    FilterConflict,

    /// Partition index outside the pool or not owned by the caller
    #[error("Invalid buffer partition")]
    InvalidPartition,

    /// Pickup is held by another user
    #[error("Pickup in use")]
    Busy,

    /// Seek exceeded its tick budget
    #[error("Pickup timed out")]
    Timeout,

    /// Drive failure
    #[error("Disc error: {0}")]
    Disc(#[from] DiscError),
}
