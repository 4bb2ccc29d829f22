//! Common test utilities: a read-only disc image and an ISO9660 layout builder
#![allow(dead_code)]

use cdblock::{BlockIoDisc, DriveConfig, SoftDma};
use gfs::{Gfs, GfsConfig};
use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};
use std::io;

pub const SECTOR: usize = 2048;

pub type TestFs = Gfs<BlockIoDisc<DiscImage>, SoftDma>;

/// Pressed disc held in memory. Sector `n` of the image is LBA `n`.
#[derive(Debug, Clone)]
pub struct DiscImage {
    pub bytes: Vec<u8>,
}

impl DiscImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        assert_eq!(bytes.len() % SECTOR, 0, "image must be whole sectors");
        Self { bytes }
    }

    fn sector_range(&self, lba: Lba, len: usize) -> io::Result<std::ops::Range<usize>> {
        let start = lba.0 as usize * SECTOR;
        if start + len > self.bytes.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "lead-out reached"));
        }
        Ok(start..start + len)
    }
}

impl BlockIo for DiscImage {
    type Error = io::Error;

    fn block_size(&self) -> BlockSize {
        BlockSize::new(SECTOR as u32).unwrap()
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        Ok((self.bytes.len() / SECTOR) as u64)
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.sector_range(start_lba, dst.len())?;
        dst.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write_blocks(&mut self, _start_lba: Lba, _src: &[u8]) -> Result<(), Self::Error> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "disc is read-only"))
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Deterministic file content that differs between files and between sectors
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i % 251) as u8).wrapping_add(seed).wrapping_add((i / SECTOR) as u8))
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Child {
    Dir(usize),
    File(usize),
}

#[derive(Debug)]
struct DirNode {
    name: String,
    parent: usize,
    children: Vec<Child>,
    lba: u32,
    sectors: u32,
}

#[derive(Debug)]
struct FileNode {
    name: String,
    content: Vec<u8>,
    lba: u32,
}

/// Builds a minimal ISO9660 image: PVD at 16, terminator at 17, root at 18,
/// then subdirectories and file extents.
pub struct IsoBuilder {
    volume_id: String,
    dirs: Vec<DirNode>,
    files: Vec<FileNode>,
}

impl IsoBuilder {
    pub fn new() -> Self {
        Self {
            volume_id: "GFS_TEST".to_string(),
            dirs: vec![DirNode {
                name: String::new(),
                parent: 0,
                children: Vec::new(),
                lba: 18,
                sectors: 1,
            }],
            files: Vec::new(),
        }
    }

    pub fn volume_id(mut self, id: &str) -> Self {
        self.volume_id = id.to_string();
        self
    }

    /// Add a directory; `path` components are created as needed
    pub fn add_dir(&mut self, path: &str) -> &mut Self {
        self.ensure_dir(path);
        self
    }

    /// Add a file; `path` is `/`-separated, parent directories are created
    pub fn add_file(&mut self, path: &str, content: &[u8]) -> &mut Self {
        let (parent, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (self.ensure_dir(dir), name),
            None => (0, path),
        };
        self.files.push(FileNode {
            name: format!("{};1", name),
            content: content.to_vec(),
            lba: 0,
        });
        let index = self.files.len() - 1;
        self.dirs[parent].children.push(Child::File(index));
        self
    }

    fn ensure_dir(&mut self, path: &str) -> usize {
        let mut current = 0;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let existing = self.dirs[current].children.iter().find_map(|c| match c {
                Child::Dir(d) if self.dirs[*d].name == component => Some(*d),
                _ => None,
            });
            current = match existing {
                Some(d) => d,
                None => {
                    self.dirs.push(DirNode {
                        name: component.to_string(),
                        parent: current,
                        children: Vec::new(),
                        lba: 0,
                        sectors: 1,
                    });
                    let d = self.dirs.len() - 1;
                    self.dirs[current].children.push(Child::Dir(d));
                    d
                }
            };
        }
        current
    }

    fn record_len(name_len: usize) -> usize {
        let len = 33 + name_len;
        len + len % 2
    }

    fn child_name(&self, child: Child) -> &str {
        match child {
            Child::Dir(d) => &self.dirs[d].name,
            Child::File(f) => &self.files[f].name,
        }
    }

    /// Sectors needed for a directory; records never straddle a sector
    fn dir_sectors(&self, dir: usize) -> u32 {
        let mut lens = vec![Self::record_len(1), Self::record_len(1)];
        lens.extend(
            self.dirs[dir]
                .children
                .iter()
                .map(|&c| Self::record_len(self.child_name(c).len())),
        );
        let mut sectors = 1;
        let mut offset = 0;
        for len in lens {
            if offset + len > SECTOR {
                sectors += 1;
                offset = 0;
            }
            offset += len;
        }
        sectors
    }

    pub fn build(mut self) -> DiscImage {
        let mut next = 18;
        for d in 0..self.dirs.len() {
            let sectors = self.dir_sectors(d);
            self.dirs[d].lba = next;
            self.dirs[d].sectors = sectors;
            next += sectors;
        }
        for file in &mut self.files {
            file.lba = next;
            next += file.content.len().div_ceil(SECTOR).max(1) as u32;
        }
        let total = next as usize + 1;
        let mut data = vec![0u8; total * SECTOR];

        // PVD
        let pvd = 16 * SECTOR;
        data[pvd] = 1;
        data[pvd + 1..pvd + 6].copy_from_slice(b"CD001");
        data[pvd + 6] = 1;
        let mut id = [b' '; 32];
        let len = self.volume_id.len().min(32);
        id[..len].copy_from_slice(&self.volume_id.as_bytes()[..len]);
        data[pvd + 40..pvd + 72].copy_from_slice(&id);
        Self::write_both_endian_u32(&mut data[pvd + 80..], total as u32);
        Self::write_both_endian_u16(&mut data[pvd + 128..], SECTOR as u16);
        let mut root_record = pvd + 156;
        let root_size = self.dirs[0].sectors * SECTOR as u32;
        Self::write_dir_entry(&mut data, &mut root_record, self.dirs[0].lba, root_size, 0x02, b"\0");

        // Terminator
        let term = 17 * SECTOR;
        data[term] = 255;
        data[term + 1..term + 6].copy_from_slice(b"CD001");
        data[term + 6] = 1;

        for d in 0..self.dirs.len() {
            self.write_directory(&mut data, d);
        }
        for file in &self.files {
            let offset = file.lba as usize * SECTOR;
            data[offset..offset + file.content.len()].copy_from_slice(&file.content);
        }

        DiscImage::new(data)
    }

    fn write_directory(&self, data: &mut [u8], d: usize) {
        let dir = &self.dirs[d];
        let parent = &self.dirs[dir.parent];
        let base = dir.lba as usize * SECTOR;
        let mut offset = base;

        let size = |sectors: u32| sectors * SECTOR as u32;
        Self::write_dir_entry(data, &mut offset, dir.lba, size(dir.sectors), 0x02, b"\0");
        Self::write_dir_entry(data, &mut offset, parent.lba, size(parent.sectors), 0x02, b"\x01");

        for &child in &dir.children {
            let name = self.child_name(child).as_bytes();
            let len = Self::record_len(name.len());
            if (offset - base) % SECTOR + len > SECTOR {
                offset = base + ((offset - base) / SECTOR + 1) * SECTOR;
            }
            match child {
                Child::Dir(c) => {
                    let c = &self.dirs[c];
                    Self::write_dir_entry(data, &mut offset, c.lba, size(c.sectors), 0x02, name)
                }
                Child::File(f) => {
                    let f = &self.files[f];
                    Self::write_dir_entry(data, &mut offset, f.lba, f.content.len() as u32, 0x00, name)
                }
            }
        }
    }

    fn write_both_endian_u32(dst: &mut [u8], value: u32) {
        dst[0..4].copy_from_slice(&value.to_le_bytes());
        dst[4..8].copy_from_slice(&value.to_be_bytes());
    }

    fn write_both_endian_u16(dst: &mut [u8], value: u16) {
        dst[0..2].copy_from_slice(&value.to_le_bytes());
        dst[2..4].copy_from_slice(&value.to_be_bytes());
    }

    fn write_dir_entry(data: &mut [u8], offset: &mut usize, lba: u32, size: u32, flags: u8, name: &[u8]) {
        let entry_len = Self::record_len(name.len());
        let start = *offset;
        data[start] = entry_len as u8;
        Self::write_both_endian_u32(&mut data[start + 2..], lba);
        Self::write_both_endian_u32(&mut data[start + 10..], size);
        data[start + 25] = flags;
        Self::write_both_endian_u16(&mut data[start + 28..], 1);
        data[start + 32] = name.len() as u8;
        data[start + 33..start + 33 + name.len()].copy_from_slice(name);
        *offset += entry_len;
    }
}

/// Route log output through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Drive with no seek latency
pub fn instant_disc(device: DiscImage) -> BlockIoDisc<DiscImage> {
    BlockIoDisc::with_config(device, DriveConfig::instant())
}

/// Mounted file system over `device`
pub fn mount(device: DiscImage, config: GfsConfig) -> TestFs {
    init_logging();
    let mut fs = Gfs::new(instant_disc(device), SoftDma::default(), config).expect("valid config");
    fs.mount().expect("mount");
    fs
}

/// Tick until `done` holds, panicking after `limit` ticks
pub fn tick_until(fs: &mut TestFs, limit: u32, mut done: impl FnMut(&mut TestFs) -> bool) {
    for _ in 0..limit {
        if done(fs) {
            return;
        }
        fs.tick();
    }
    assert!(done(fs), "condition not reached after {} ticks", limit);
}
