//! Asynchronous CD file access
//!
//! A `no_std` file layer over the CD block: clients open files from ISO9660
//! directory tables and read them through per-handle ring buffers while a
//! round-robin server shares the single read head and the buffer partitions
//! between them.
//!
//! # Overview
//!
//! - **Directory** - volume descriptors, directory records and resolved tables
//! - **Handles** - fixed table of open files with generation-checked ids
//! - **Flow** - sector-granular reads in, byte-granular reads out
//! - **Server** - one quantum per handle per tick, never blocking
//! - **Transfer** - CPU copy, DMA or a pull consumer draining each ring
//!
//! # Usage
//!
//! ```ignore
//! use gfs::{Gfs, GfsConfig};
//! use cdblock::{BlockIoDisc, SoftDma};
//!
//! let mut fs = Gfs::new(BlockIoDisc::new(block_io), SoftDma::default(), GfsConfig::default())?;
//! fs.mount()?;
//! let handle = fs.open_name("DATA.BIN")?;
//! let mut buf = [0u8; 4096];
//! let n = fs.read_blocking(handle, &mut buf)?;
//! ```
//!
//! Non-blocking clients start a read with [`Gfs::read_nonblocking_start`],
//! call [`Gfs::tick`] once per frame and collect data with [`Gfs::drain`].

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod directory;
pub mod error;
pub mod flow;
pub mod handle;
pub mod ring;
pub mod server;
pub mod system;
pub mod transfer;

pub use config::GfsConfig;
pub use directory::{
    Attributes, DirSelector, DirTableKind, DirectoryEntry, DirectoryTable, VolumeInfo,
};
pub use error::{ErrorSink, ErrorStatus, GfsError, Result};
pub use flow::{GetMode, ReadStatus};
pub use handle::{AccessMode, HandleId};
pub use ring::RingBuffer;
pub use server::ServerStatus;
pub use system::{FileSizeInfo, Gfs, SeekOrigin};
pub use transfer::{PullConsumer, TransferMode};
