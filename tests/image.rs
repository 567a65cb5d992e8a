//! Whole-image scenarios over an in-memory disk: build, serialize, reopen,
//! and compare against the exact sector layout the MS-DOS toolchain
//! expects.

use std::sync::Arc;

use fat12::device::MemDisk;
use fat12::entry::Attribute;
use fat12::fs::FatImage;
use fat12::{Error, BYTES_PER_SECTOR, IMAGE_BYTES};

const SECTOR: usize = BYTES_PER_SECTOR;

fn payload(bytes: &[u8]) -> Arc<MemDisk> {
    Arc::new(MemDisk::from_vec(bytes.to_vec()))
}

fn write_out(image: &FatImage) -> Vec<u8> {
    let sink = MemDisk::new();
    image.write(&sink).expect("image serializes");
    sink.to_vec()
}

fn reopen(bytes: Vec<u8>) -> FatImage {
    let mut image = FatImage::new();
    image
        .open(Arc::new(MemDisk::from_vec(bytes)), 1440)
        .expect("written image reopens");
    image
}

// Decode the n-th 12-bit entry of FAT copy #1 straight from image bytes.
fn fat_entry(image: &[u8], cluster: usize) -> u16 {
    let fat = &image[SECTOR..10 * SECTOR];
    let offset = cluster + cluster / 2;
    let pair = u16::from_le_bytes([fat[offset], fat[offset + 1]]);
    if cluster % 2 == 0 {
        pair & 0x0FFF
    } else {
        pair >> 4
    }
}

fn record(image: &[u8], sector: usize, index: usize) -> &[u8] {
    let start = sector * SECTOR + index * 32;
    &image[start..start + 32]
}

#[test]
fn empty_image_round_trip() {
    let mut image = FatImage::new();
    image.create(1440).unwrap();
    let bytes = write_out(&image);

    assert_eq!(bytes.len(), IMAGE_BYTES);
    assert_eq!(&bytes[0..3], &[0xEB, 0x3C, 0x90]);
    assert_eq!(&bytes[510..512], &[0x55, 0xAA]);
    // FAT sentinels, and copy #2 byte-identical to copy #1
    assert_eq!(&bytes[512..515], &[0xF0, 0xFF, 0xFF]);
    assert_eq!(&bytes[SECTOR..10 * SECTOR], &bytes[10 * SECTOR..19 * SECTOR]);
    // untouched root window and data region
    assert!(bytes[19 * SECTOR..33 * SECTOR].iter().all(|&b| b == 0));

    let reopened = reopen(bytes);
    assert_eq!(reopened.list_dir("/").unwrap(), Vec::<String>::new());
    assert_eq!(reopened.free_clusters().unwrap(), 3070);
}

#[test]
fn single_root_file() {
    let mut image = FatImage::new();
    image.create(1440).unwrap();
    image.add_file("/FOO", payload(b"foo\n"), 4).unwrap();

    // extraction straight from the live context reads the external source
    let mut direct = Vec::new();
    image.extract_file("/FOO", &mut direct).unwrap();
    assert_eq!(direct, b"foo\n");

    let bytes = write_out(&image);

    let foo = record(&bytes, 19, 0);
    assert_eq!(&foo[0..8], b"FOO     ");
    assert_eq!(&foo[8..11], b"   ");
    assert_eq!(foo[11], 0x20);
    assert_eq!(u16::from_le_bytes([foo[26], foo[27]]), 2);
    assert_eq!(u32::from_le_bytes([foo[28], foo[29], foo[30], foo[31]]), 4);
    // next root slot is still the end marker
    assert_eq!(record(&bytes, 19, 1)[0], 0x00);

    assert_eq!(fat_entry(&bytes, 2), 0xFFF);
    assert_eq!(fat_entry(&bytes, 3), 0x000);

    // cluster 2 sits at physical sector 33
    assert_eq!(&bytes[33 * SECTOR..33 * SECTOR + 4], b"foo\n");
    assert!(bytes[33 * SECTOR + 4..34 * SECTOR].iter().all(|&b| b == 0));

    let reopened = reopen(bytes);
    let info = reopened.entry_info("/FOO").unwrap();
    assert_eq!(info.name, "FOO");
    assert_eq!(info.attributes, 0x20);
    assert_eq!(info.first_cluster, 2);
    assert_eq!(info.file_size, 4);
    assert!(!info.is_dir);

    let mut extracted = Vec::new();
    reopened.extract_file("/FOO", &mut extracted).unwrap();
    assert_eq!(extracted, b"foo\n");
}

#[test]
fn single_root_directory() {
    let mut image = FatImage::new();
    image.create(1440).unwrap();
    image.add_dir("/DIR1").unwrap();
    let bytes = write_out(&image);

    let dir1 = record(&bytes, 19, 0);
    assert_eq!(&dir1[0..8], b"DIR1    ");
    assert_eq!(dir1[11], 0x10);
    assert_eq!(u16::from_le_bytes([dir1[26], dir1[27]]), 2);
    assert_eq!(u32::from_le_bytes([dir1[28], dir1[29], dir1[30], dir1[31]]), 0);

    // the directory's cluster leads with dot and dotdot
    let dot = record(&bytes, 33, 0);
    assert_eq!(&dot[0..8], b".       ");
    assert_eq!(dot[11], 0x10);
    assert_eq!(u16::from_le_bytes([dot[26], dot[27]]), 2);
    let dotdot = record(&bytes, 33, 1);
    assert_eq!(&dotdot[0..8], b"..      ");
    assert_eq!(dotdot[11], 0x10);
    assert_eq!(u16::from_le_bytes([dotdot[26], dotdot[27]]), 0);
    assert_eq!(record(&bytes, 33, 2)[0], 0x00);

    assert_eq!(fat_entry(&bytes, 2), 0xFFF);

    let reopened = reopen(bytes);
    assert_eq!(reopened.list_dir("/DIR1").unwrap(), vec![".", ".."]);
    let info = reopened.entry_info("/DIR1").unwrap();
    assert!(info.is_dir);
    assert_eq!(info.file_size, 0);
}

#[test]
fn subdirectory_growth_across_clusters() {
    let mut image = FatImage::new();
    image.create(1440).unwrap();
    image.add_dir("/DIR1").unwrap();
    for i in 1..=17 {
        let path = format!("/DIR1/FILE{:02}", i);
        let contents = format!("file{:02}\n", i);
        image.add_file(&path, payload(contents.as_bytes()), 7).unwrap();
    }
    let bytes = write_out(&image);

    // DIR1 grew onto cluster 18 when its 17th child arrived
    assert_eq!(fat_entry(&bytes, 2), 0x012);
    assert_eq!(fat_entry(&bytes, 18), 0xFFF);
    // the files landed on 3..17, then skipped DIR1's extension to 19, 20
    for cluster in 3..=17 {
        assert_eq!(fat_entry(&bytes, cluster), 0xFFF, "cluster {}", cluster);
    }
    assert_eq!(fat_entry(&bytes, 19), 0xFFF);
    assert_eq!(fat_entry(&bytes, 20), 0xFFF);
    assert_eq!(fat_entry(&bytes, 21), 0x000);

    // record #17 of DIR1 (child count 16 in cluster 2) spills into the
    // first slot of cluster 18, physical sector 49
    let spilled = record(&bytes, 33 + 18 - 2, 0);
    assert_eq!(&spilled[0..8], b"FILE15  ");

    let reopened = reopen(bytes);
    let expected_clusters = [3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 19, 20];
    for (i, &cluster) in expected_clusters.iter().enumerate() {
        let path = format!("/DIR1/FILE{:02}", i + 1);
        let info = reopened.entry_info(&path).unwrap();
        assert_eq!(info.first_cluster, cluster, "{}", path);
        assert_eq!(info.file_size, 7);

        let mut extracted = Vec::new();
        reopened.extract_file(&path, &mut extracted).unwrap();
        assert_eq!(extracted, format!("file{:02}\n", i + 1).as_bytes());
    }
    assert_eq!(reopened.list_dir("/DIR1").unwrap().len(), 19);
}

#[test]
fn attribute_set_and_clear_serialize() {
    let mut image = FatImage::new();
    image.create(1440).unwrap();
    image.add_file("/FOO", payload(b"foo\n"), 4).unwrap();

    image.set_attr("/FOO", Attribute::ReadOnly).unwrap();
    image.set_attr("/FOO", Attribute::Hidden).unwrap();
    image.set_attr("/FOO", Attribute::System).unwrap();
    image.set_attr("/FOO", Attribute::Archive).unwrap();
    let bytes = write_out(&image);
    assert_eq!(record(&bytes, 19, 0)[11], 0x27);
    assert_eq!(reopen(bytes).entry_info("/FOO").unwrap().attributes, 0x27);

    image.clear_attr("/FOO", Attribute::ReadOnly).unwrap();
    image.clear_attr("/FOO", Attribute::Hidden).unwrap();
    image.clear_attr("/FOO", Attribute::System).unwrap();
    image.clear_attr("/FOO", Attribute::Archive).unwrap();
    let bytes = write_out(&image);
    assert_eq!(record(&bytes, 19, 0)[11], 0x00);
    assert_eq!(reopen(bytes).entry_info("/FOO").unwrap().attributes, 0x00);
}

#[test]
fn remove_restores_freshness() {
    let mut fresh = FatImage::new();
    fresh.create(1440).unwrap();
    let fresh_bytes = write_out(&fresh);

    let mut churned = FatImage::new();
    churned.create(1440).unwrap();
    churned.add_file("/FOO", payload(b"foo\n"), 4).unwrap();
    churned.rm_file("/FOO").unwrap();
    assert_eq!(write_out(&churned), fresh_bytes);

    let mut churned_dir = FatImage::new();
    churned_dir.create(1440).unwrap();
    churned_dir.add_dir("/DIR1").unwrap();
    churned_dir.rm_dir("/DIR1").unwrap();
    assert_eq!(write_out(&churned_dir), fresh_bytes);
}

#[test]
fn emit_after_parse_is_byte_identical() {
    let mut image = FatImage::new();
    image.create(1440).unwrap();
    image.add_dir("/DIR1").unwrap();
    image.add_file("/DIR1/NOTES.TXT", payload(b"some notes\n"), 11).unwrap();
    image.add_file("/BIG", payload(&[0xA5u8; 1300]), 1300).unwrap();
    image.set_attr("/BIG", Attribute::ReadOnly).unwrap();
    let first = write_out(&image);

    let reopened = reopen(first.clone());
    assert_eq!(write_out(&reopened), first);
}

#[test]
fn mutating_a_reopened_image_reads_original_payloads() {
    let mut image = FatImage::new();
    image.create(1440).unwrap();
    image.add_file("/ONE", payload(b"one\n"), 4).unwrap();
    image.add_file("/TWO", payload(b"two\n"), 4).unwrap();
    let bytes = write_out(&image);

    // drop ONE (freeing cluster 2) and add a replacement, which reuses it;
    // TWO's payload must still come from its original sector
    let mut reopened = reopen(bytes);
    reopened.rm_file("/ONE").unwrap();
    reopened.add_file("/THREE", payload(b"three\n"), 6).unwrap();
    let rewritten = write_out(&reopened);

    let again = reopen(rewritten);
    assert_eq!(again.entry_info("/THREE").unwrap().first_cluster, 2);

    let mut two = Vec::new();
    again.extract_file("/TWO", &mut two).unwrap();
    assert_eq!(two, b"two\n");
    let mut three = Vec::new();
    again.extract_file("/THREE", &mut three).unwrap();
    assert_eq!(three, b"three\n");
}

#[test]
fn multi_cluster_payloads_round_trip() {
    let mut contents = Vec::new();
    for i in 0..1500u32 {
        contents.push((i % 251) as u8);
    }

    let mut image = FatImage::new();
    image.create(1440).unwrap();
    image
        .add_file("/BLOB.BIN", payload(&contents), contents.len() as u32)
        .unwrap();
    let bytes = write_out(&image);

    // 1500 bytes span clusters 2, 3, 4
    assert_eq!(fat_entry(&bytes, 2), 3);
    assert_eq!(fat_entry(&bytes, 3), 4);
    assert_eq!(fat_entry(&bytes, 4), 0xFFF);

    let mut extracted = Vec::new();
    reopen(bytes).extract_file("/BLOB.BIN", &mut extracted).unwrap();
    assert_eq!(extracted, contents);
}

#[test]
fn identical_operation_sequences_are_deterministic() {
    let build = || {
        let mut image = FatImage::new();
        image.create(1440).unwrap();
        image.add_dir("/DIR1").unwrap();
        image.add_file("/DIR1/A", payload(b"aaaa"), 4).unwrap();
        image.add_file("/B.TXT", payload(b"bbbb\n"), 5).unwrap();
        image.rm_file("/DIR1/A").unwrap();
        image.add_file("/DIR1/C", payload(b"cc"), 2).unwrap();
        image.set_attr("/B.TXT", Attribute::Hidden).unwrap();
        write_out(&image)
    };
    assert_eq!(build(), build());
}

#[test]
fn state_machine_guards_every_operation() {
    let mut image = FatImage::new();
    assert!(matches!(image.write(&MemDisk::new()), Err(Error::InvalidState)));
    assert!(matches!(image.add_dir("/DIR1"), Err(Error::InvalidState)));
    assert!(matches!(image.close(), Err(Error::InvalidState)));

    image.create(1440).unwrap();
    assert!(matches!(image.create(1440), Err(Error::InvalidState)));
    assert!(matches!(
        image.open(Arc::new(MemDisk::new()), 1440),
        Err(Error::InvalidState)
    ));

    image.close().unwrap();
    assert!(matches!(image.list_dir("/"), Err(Error::InvalidState)));
    assert!(matches!(image.close(), Err(Error::InvalidState)));

    // and a closed context can be reused
    image.create(1440).unwrap();
    assert!(image.is_open());
}

#[test]
fn only_the_floppy_profile_is_accepted() {
    let mut image = FatImage::new();
    assert!(matches!(
        image.create(720),
        Err(Error::UnsupportedProfile(_))
    ));
    assert!(matches!(
        image.open(Arc::new(MemDisk::new()), 2880),
        Err(Error::UnsupportedProfile(_))
    ));
}

#[test]
fn mismatched_fat_copies_are_rejected() {
    let mut image = FatImage::new();
    image.create(1440).unwrap();
    image.add_file("/FOO", payload(b"foo\n"), 4).unwrap();
    let mut bytes = write_out(&image);

    bytes[10 * SECTOR + 3] ^= 0xFF;
    let mut reopened = FatImage::new();
    assert!(matches!(
        reopened.open(Arc::new(MemDisk::from_vec(bytes)), 1440),
        Err(Error::InvalidFormat(_))
    ));
}

#[test]
fn wrong_entry_kinds_are_refused() {
    let mut image = FatImage::new();
    image.create(1440).unwrap();
    image.add_dir("/DIR1").unwrap();
    image.add_file("/FOO", payload(b"foo\n"), 4).unwrap();

    assert!(matches!(image.rm_file("/DIR1"), Err(Error::NotAFile)));
    assert!(matches!(image.rm_dir("/FOO"), Err(Error::NotADirectory)));
    assert!(matches!(
        image.extract_file("/DIR1", &mut Vec::<u8>::new()),
        Err(Error::NotAFile)
    ));
    assert!(matches!(image.list_dir("/FOO"), Err(Error::NotADirectory)));
    assert!(matches!(image.rm_file("/MISSING"), Err(Error::NotFound)));
    assert!(matches!(
        image.add_file("/DIR2/FOO", payload(b"x"), 1),
        Err(Error::NotFound)
    ));
    assert!(matches!(
        image.add_file("/WAYTOOLONG", payload(b"x"), 1),
        Err(Error::NameTooLong)
    ));
}
