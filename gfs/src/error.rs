//! Error types for file access operations

use cdblock::{CdBlockError, DiscError};
use thiserror::Error;

/// Result type for file access operations
pub type Result<T> = core::result::Result<T, GfsError>;

/// Errors that can occur during file access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GfsError {
    /// Name or identifier not present in the directory table
    #[error("File not found")]
    NotFound,

    /// Identifier outside the current directory table
    #[error("Invalid file identifier")]
    InvalidFileId,

    /// Directory data is structurally invalid
    #[error("Malformed directory table")]
    MalformedDirectory,

    /// Entry is a file where a directory was required
    #[error("Not a directory")]
    NotADirectory,

    /// Every buffer partition is in use
    #[error("No free buffer partition")]
    OutOfPartitions,

    /// Filter command queue is at capacity
    #[error("Filter command queue full")]
    FilterQueueFull,

    /// Another reader already routes the same sectors
    #[error("Sector filter conflict")]
    FilterConflict,

    /// Sector range outside the buffered data
    #[error("Sector range out of bounds")]
    InvalidRange,

    /// Pickup held by another reader
    #[error("Pickup in use")]
    Busy,

    /// Operation made no progress within its tick budget
    #[error("Timed out")]
    Timeout,

    /// Handle table is full
    #[error("No free file handle")]
    NoFreeHandle,

    /// Handle is closed or stale
    #[error("Invalid file handle")]
    InvalidHandle,

    /// Seek target outside the file
    #[error("Invalid seek position")]
    InvalidSeek,

    /// Handle still has a read in progress
    #[error("File busy")]
    FileBusy,

    /// Argument out of range
    #[error("Invalid parameter")]
    InvalidParameter,

    /// No DMA channel could be acquired
    #[error("DMA channel unavailable")]
    DmaUnavailable,

    /// Read stopped by the caller
    #[error("Read cancelled")]
    Cancelled,

    /// Drive failure; aborts only the affected read
    #[error("CD read failure: {0}")]
    DiscReadFailure(DiscError),
}

impl GfsError {
    /// Legacy numeric error code (GFS_ERR_*)
    pub fn code(&self) -> i32 {
        match self {
            Self::NotFound => -9,
            Self::InvalidFileId => -10,
            Self::MalformedDirectory => -4,
            Self::NotADirectory => -6,
            Self::OutOfPartitions | Self::FilterQueueFull | Self::FilterConflict => -7,
            Self::InvalidRange => -15,
            Self::Busy => -20,
            Self::Timeout => -22,
            Self::NoFreeHandle => -19,
            Self::InvalidHandle => -11,
            Self::InvalidSeek => -12,
            Self::FileBusy => -16,
            Self::InvalidParameter => -17,
            Self::DmaUnavailable | Self::Cancelled => -18,
            Self::DiscReadFailure(disc) => match disc {
                DiscError::ReadFailure { .. } => -1,
                DiscError::NoDisc => -2,
                DiscError::TrayOpen => -23,
                DiscError::BufferFull => -24,
                DiscError::Fatal => -25,
                DiscError::InvalidFilter => -7,
            },
        }
    }

    /// Whether retrying on a later tick can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OutOfPartitions | Self::FilterQueueFull | Self::Busy | Self::Timeout
        )
    }
}

impl From<CdBlockError> for GfsError {
    fn from(err: CdBlockError) -> Self {
        match err {
            CdBlockError::OutOfPartitions => Self::OutOfPartitions,
            CdBlockError::FilterQueueFull => Self::FilterQueueFull,
            CdBlockError::InvalidRange => Self::InvalidRange,
            CdBlockError::FilterConflict => Self::FilterConflict,
            CdBlockError::InvalidPartition => Self::InvalidParameter,
            CdBlockError::Busy => Self::Busy,
            CdBlockError::Timeout => Self::Timeout,
            CdBlockError::Disc(disc) => Self::DiscReadFailure(disc),
        }
    }
}

impl From<DiscError> for GfsError {
    fn from(err: DiscError) -> Self {
        Self::DiscReadFailure(err)
    }
}

/// Global error callback.
///
/// Invoked for every error the subsystem records. It observes; it never
/// changes what the failing call returns.
pub trait ErrorSink {
    /// Called once per recorded error
    fn report(&mut self, error: &GfsError);
}

impl<F: FnMut(&GfsError)> ErrorSink for F {
    fn report(&mut self, error: &GfsError) {
        self(error)
    }
}

/// Last recorded error and how many have been recorded (GFS_GetErrStat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorStatus {
    /// Most recent error
    pub last: Option<GfsError>,
    /// Errors recorded since init or the last reset
    pub count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdblock::Fad;

    #[test]
    fn test_legacy_codes() {
        assert_eq!(GfsError::NotFound.code(), -9);
        assert_eq!(GfsError::NoFreeHandle.code(), -19);
        assert_eq!(GfsError::InvalidSeek.code(), -12);
        assert_eq!(GfsError::from(DiscError::TrayOpen).code(), -23);
        assert_eq!(GfsError::from(DiscError::ReadFailure { fad: Fad(200) }).code(), -1);
    }

    #[test]
    fn test_from_cdblock() {
        assert_eq!(GfsError::from(CdBlockError::Busy), GfsError::Busy);
        assert_eq!(
            GfsError::from(CdBlockError::Disc(DiscError::NoDisc)),
            GfsError::DiscReadFailure(DiscError::NoDisc)
        );
        assert!(GfsError::from(CdBlockError::OutOfPartitions).is_retryable());
        assert!(!GfsError::InvalidSeek.is_retryable());
    }
}
