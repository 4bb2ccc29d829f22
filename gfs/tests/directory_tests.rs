//! Directory loading and name resolution

mod common;

use cdblock::SoftDma;
use common::{instant_disc, mount, pattern, IsoBuilder, DiscImage};
use gfs::{Attributes, DirSelector, DirTableKind, Gfs, GfsConfig, GfsError};

fn sample_image() -> DiscImage {
    let mut iso = IsoBuilder::new();
    iso.add_file("README.TXT", b"hello")
        .add_file("DATA/LEVEL1.BIN", &pattern(5000, 1))
        .add_file("DATA/MAPS/MAP01.DAT", &pattern(100, 2))
        .add_dir("EMPTY");
    iso.build()
}

#[test]
fn test_mount_reads_root() {
    let fs = mount(sample_image(), GfsConfig::default());

    assert_eq!(fs.volume().unwrap().volume_id, "GFS_TEST");
    let root = fs.current_directory().unwrap();
    assert_eq!(root.len(), 5);
    assert_eq!(root.this().identifier, 0);
    assert_eq!(root.parent().identifier, 1);

    assert_eq!(fs.name_to_id("README.TXT").unwrap(), 2);
    assert_eq!(fs.name_to_id("readme.txt").unwrap(), 2);
    assert_eq!(fs.name_to_id("README.TXT;1").unwrap(), 2);
    assert_eq!(fs.name_to_id("DATA").unwrap(), 3);
    assert_eq!(fs.name_to_id("MISSING.BIN"), Err(GfsError::NotFound));

    assert_eq!(fs.id_to_name(2).unwrap(), "README.TXT");
    assert_eq!(fs.id_to_name(99), Err(GfsError::InvalidFileId));

    let readme = fs.dir_entry(2).unwrap();
    assert_eq!(readme.size, 5);
    assert_eq!(readme.sector_count, 1);
    assert!(!readme.is_directory());
    assert!(fs.dir_entry(3).unwrap().is_directory());
    assert!(fs
        .dir_entry(4)
        .unwrap()
        .attributes
        .contains(Attributes::END_OF_TABLE));
}

#[test]
fn test_unmounted_lookups_fail() {
    let device = sample_image();
    let mut fs = Gfs::new(instant_disc(device), SoftDma::default(), GfsConfig::default()).unwrap();

    assert!(fs.volume().is_none());
    assert_eq!(fs.name_to_id("README.TXT"), Err(GfsError::NotFound));
    assert_eq!(fs.open(2), Err(GfsError::NotFound));
    assert_eq!(
        fs.load_directory(DirSelector::Root).unwrap_err(),
        GfsError::NotFound
    );
}

#[test]
fn test_change_dir_relative_and_back() {
    let mut fs = mount(sample_image(), GfsConfig::default());

    fs.change_dir(Some("DATA")).unwrap();
    assert_eq!(fs.name_to_id("LEVEL1.BIN").unwrap(), 2);
    assert_eq!(fs.name_to_id("MAPS").unwrap(), 3);
    assert_eq!(fs.name_to_id("README.TXT"), Err(GfsError::NotFound));

    fs.change_dir(Some("MAPS")).unwrap();
    assert_eq!(fs.name_to_id("MAP01.DAT").unwrap(), 2);
    assert_eq!(fs.dir_entry(2).unwrap().size, 100);

    fs.change_dir(Some("..")).unwrap();
    assert_eq!(fs.name_to_id("LEVEL1.BIN").unwrap(), 2);

    fs.change_dir(None).unwrap();
    assert_eq!(fs.name_to_id("README.TXT").unwrap(), 2);
}

#[test]
fn test_change_dir_absolute_path() {
    let mut fs = mount(sample_image(), GfsConfig::default());
    fs.change_dir(Some("/DATA/MAPS")).unwrap();
    assert_eq!(fs.name_to_id("MAP01.DAT").unwrap(), 2);

    fs.change_dir(Some("/")).unwrap();
    assert_eq!(fs.name_to_id("EMPTY").unwrap(), 4);

    fs.change_dir(Some("EMPTY")).unwrap();
    assert_eq!(fs.current_directory().unwrap().len(), 2);
}

#[test]
fn test_change_dir_errors_keep_current() {
    let mut fs = mount(sample_image(), GfsConfig::default());

    assert_eq!(fs.change_dir(Some("README.TXT")), Err(GfsError::NotADirectory));
    assert_eq!(fs.change_dir(Some("NOPE")), Err(GfsError::NotFound));
    assert_eq!(fs.change_dir(Some("DATA/NOPE")), Err(GfsError::NotFound));
    assert_eq!(fs.name_to_id("README.TXT").unwrap(), 2);
}

#[test]
fn test_load_directory_does_not_change_current() {
    let mut fs = mount(sample_image(), GfsConfig::default());
    let data = fs.load_directory(DirSelector::Id(3)).unwrap();
    assert_eq!(data.id_of("LEVEL1.BIN").unwrap(), 2);
    assert_eq!(fs.name_to_id("README.TXT").unwrap(), 2);

    fs.set_directory(data);
    assert_eq!(fs.name_to_id("LEVEL1.BIN").unwrap(), 2);
    assert_eq!(
        fs.load_directory(DirSelector::Id(42)).unwrap_err(),
        GfsError::InvalidFileId
    );
}

#[test]
fn test_open_handle_survives_directory_change() {
    let mut fs = mount(sample_image(), GfsConfig::default());
    let readme = fs.open_name("README.TXT").unwrap();

    fs.change_dir(Some("DATA")).unwrap();

    let mut buf = [0u8; 16];
    let n = fs.read_blocking(readme, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
}

#[test]
fn test_id_only_table() {
    let mut fs = mount(sample_image(), GfsConfig::default());
    fs.set_dir_table_kind(DirTableKind::ById);
    fs.change_dir(None).unwrap();

    assert_eq!(fs.current_directory().unwrap().kind(), DirTableKind::ById);
    assert_eq!(fs.name_to_id("README.TXT"), Err(GfsError::NotFound));
    assert_eq!(fs.name_to_id("..").unwrap(), 1);
    assert_eq!(fs.dir_entry(2).unwrap().name(), "");
    assert_eq!(fs.dir_entry(2).unwrap().size, 5);

    let handle = fs.open(2).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(fs.read_blocking(handle, &mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"hello");
}

#[test]
fn test_table_truncated_to_capacity() {
    let mut iso = IsoBuilder::new();
    for i in 0..10 {
        iso.add_file(&format!("FILE{}.BIN", i), &[i as u8; 10]);
    }
    let fs = mount(iso.build(), GfsConfig::default().with_max_dir_entries(5));

    let root = fs.current_directory().unwrap();
    assert_eq!(root.len(), 5);
    assert!(root.is_truncated());
    assert!(root.get(4).unwrap().attributes.contains(Attributes::END_OF_TABLE));
    assert_eq!(fs.name_to_id("FILE2.BIN").unwrap(), 4);
    assert_eq!(fs.name_to_id("FILE3.BIN"), Err(GfsError::NotFound));
}

#[test]
fn test_directory_spanning_sectors() {
    let mut iso = IsoBuilder::new();
    for i in 0..100 {
        iso.add_file(&format!("F{:03}.BIN", i), &pattern(10 + i, i as u8));
    }
    let fs = mount(iso.build(), GfsConfig::default());

    let root = fs.current_directory().unwrap();
    assert_eq!(root.len(), 102);
    assert!(!root.is_truncated());
    assert_eq!(fs.name_to_id("F000.BIN").unwrap(), 2);
    assert_eq!(fs.name_to_id("F099.BIN").unwrap(), 101);
    assert_eq!(fs.dir_entry(101).unwrap().size, 109);
}

#[test]
fn test_get_fad() {
    let mut fs = mount(sample_image(), GfsConfig::default());
    fs.change_dir(Some("DATA")).unwrap();

    let level = *fs.dir_entry(2).unwrap();
    assert_eq!(level.sector_count, 3);
    assert_eq!(level.last_sector_bytes(), 5000 - 2 * 2048);
    assert_eq!(fs.get_fad(2, 0).unwrap(), level.start_sector);
    assert_eq!(fs.get_fad(2, 2).unwrap(), level.start_sector.offset(2));
    assert_eq!(fs.get_fad(2, 3), Err(GfsError::InvalidParameter));
    assert_eq!(fs.get_fad(77, 0), Err(GfsError::InvalidFileId));
}

#[test]
fn test_mount_rejects_blank_disc() {
    let device = DiscImage::new(vec![0u8; 40 * 2048]);
    let mut fs = Gfs::new(instant_disc(device), SoftDma::default(), GfsConfig::default()).unwrap();
    assert_eq!(fs.mount().unwrap_err(), GfsError::MalformedDirectory);
    assert!(fs.volume().is_none());
}
