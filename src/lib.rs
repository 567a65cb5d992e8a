//! FAT12 floppy image codec.
//!
//! Reads, builds, and rewrites 1.44 MB FAT12 floppy disk images the way the
//! classic MS-DOS toolchain (`mkfs.msdos` / `mcopy` / `mattrib`) lays them
//! out. An image opened here, left untouched, and written back is
//! byte-identical to its source; an image built from scratch round-trips
//! through the external tools.
//!
//! FAT File System Layout:
//!      Boot Sector - FAT1 - FAT2 - Root Directory Region - Data Region
//! Note:
//!     1. The reserved region is a single sector, the boot sector, which
//!        carries the BIOS Parameter Block and the bootstrap code.
//!     2. The file allocation table area contains two identical file
//!        allocation tables, because the storage space (cluster chain)
//!        occupied by the file and the management of the free space are
//!        implemented by FAT; two are saved so that if the first one is
//!        damaged, the second one is still available.
//!     3. Unlike FAT32, the root directory is NOT addressed through the FAT:
//!        it is a fixed 14-sector window directly after the second FAT.
//!
//! The pieces:
//! - [`bpb`]: the 512-byte boot sector / BIOS Parameter Block codec.
//! - [`fat`]: the packed 12-bit allocation table and its chain operations.
//! - [`entry`]: the 32-byte 8.3 directory record codec.
//! - [`dir`]: the in-memory directory tree over those records.
//! - [`file`]: where a file's payload bytes currently live.
//! - [`device`]: the byte-stream source/sink collaborators.
//! - [`cache`]: a small LRU sector cache over the opened image.
//! - [`fs`]: the open/create/write/close driver tying it all together.

use std::fmt;
use std::io;

pub mod bpb;
pub mod cache;
pub mod device;
pub mod dir;
pub mod entry;
pub mod fat;
pub mod file;
pub mod fs;

/// BPB Bytes Per Sector
pub const BYTES_PER_SECTOR: usize = 512;
/// BPB Sectors Per Cluster; on this medium a cluster is a single sector.
pub const SECTORS_PER_CLUSTER: usize = 1;
/// BPB Reserved Sectors: just the boot sector.
pub const RESERVED_SECTORS: usize = 1;
/// BPB Number of FATs
pub const NUM_FATS: usize = 2;
/// BPB Sectors Per FAT
pub const SECTORS_PER_FAT: usize = 9;
/// BPB Max Root Directory Entries
pub const MAX_ROOT_DIR_ENTRIES: usize = 224;
/// BPB Total Sector Count (2880 * 512 = 1440 KiB)
pub const TOTAL_SECTORS: usize = 2880;
/// BPB Media Descriptor for removable 3.5" media.
pub const MEDIA_DESCRIPTOR: u8 = 0xF0;

/// The only media profile this crate handles.
pub const IMAGE_SIZE_KIB: usize = 1440;
/// Whole-image byte length after write: 1,474,560.
pub const IMAGE_BYTES: usize = TOTAL_SECTORS * BYTES_PER_SECTOR;

/// First sector of FAT copy #1.
pub const FIRST_FAT_SECTOR: usize = RESERVED_SECTORS;
/// First sector of FAT copy #2.
pub const SECOND_FAT_SECTOR: usize = RESERVED_SECTORS + SECTORS_PER_FAT;
/// One FAT copy occupies 9 * 512 = 4608 bytes.
pub const FAT_BYTES: usize = SECTORS_PER_FAT * BYTES_PER_SECTOR;
/// Number of 12-bit entries in one FAT copy: floor(4608 / 1.5) = 3072.
pub const FAT_ENTRY_COUNT: usize = FAT_BYTES * 2 / 3;

/// First sector of the root directory region: 1 + 2 * 9 = 19.
pub const FIRST_ROOT_DIR_SECTOR: usize = RESERVED_SECTORS + NUM_FATS * SECTORS_PER_FAT;
/// Sectors occupied by the root directory: 224 * 32 / 512 = 14.
pub const ROOT_DIR_SECTORS: usize =
    (MAX_ROOT_DIR_ENTRIES * DIRENT_SIZE + BYTES_PER_SECTOR - 1) / BYTES_PER_SECTOR;
/// First sector of the data region; logical cluster 2 lives here.
pub const FIRST_DATA_SECTOR: usize = FIRST_ROOT_DIR_SECTOR + ROOT_DIR_SECTORS;

/// A free FAT slot.
pub const FREE_CLUSTER: u16 = 0x000;
/// End-of-chain mark written by this crate.
///
/// Note that we still USE the cluster holding this value; the mark means no
/// further cluster follows it in the chain.
pub const END_OF_CLUSTER: u16 = 0xFFF;
/// Lowest of the eight end-of-chain values 0xFF8..=0xFFF accepted on read.
pub const END_CLUSTER_MIN: u16 = 0xFF8;
/// The two reserved entries at the start of the FAT: FAT[0] carries the
/// media descriptor in its low 8 bits with all other bits set, FAT[1] is
/// set by FORMAT to an end-of-chain mark and never used afterwards.
pub const MEDIA_FAT_ENTRY: u16 = 0xFF0;

/// FAT type boundary: fewer data clusters than this means FAT12.
pub const MAX_CLUSTER_FAT12: usize = 4085;
pub const MAX_CLUSTER_FAT16: usize = 65525;

/// Indicates that writes to the file should fail.
pub const ATTR_READ_ONLY: u8 = 0x01;
/// Indicates that normal directory listings should not show this file.
pub const ATTR_HIDDEN: u8 = 0x02;
/// Indicates that this is an operating system file.
pub const ATTR_SYSTEM: u8 = 0x04;
/// The volume label pseudo-entry in the root directory.
pub const ATTR_VOLUME_ID: u8 = 0x08;
/// Indicates that this file is actually a container for other files.
pub const ATTR_DIRECTORY: u8 = 0x10;
/// Set when a file is created, renamed, or written to; backup utilities use
/// it to find files modified since the last backup.
pub const ATTR_ARCHIVE: u8 = 0x20;

/// One on-disk directory record.
pub const DIRENT_SIZE: usize = 32;
/// Directory records per cluster: 512 / 32 = 16.
pub const DIR_RECORDS_PER_CLUSTER: usize = BYTES_PER_SECTOR / DIRENT_SIZE;

/// For Directory Entry Name[0]: deleted, skip this slot.
pub const DIR_ENTRY_UNUSED: u8 = 0xE5;
/// For Directory Entry Name[0]: free, and no used entries follow.
pub const DIR_ENTRY_LAST_AND_UNUSED: u8 = 0x00;

/// Padding character for 8.3 names.
pub const SPACE: u8 = 0x20;

/// Everything this crate can fail with. One kind per caller-visible
/// failure; nothing is retried or swallowed on the way up.
#[derive(Debug)]
pub enum Error {
    /// Operation called on a not-open context, or open/create on an
    /// already-open one.
    InvalidState,
    /// Boot sector, FAT, directory record, or path shape violates an
    /// invariant; also a cross-FAT mismatch.
    InvalidFormat(&'static str),
    /// The image is not the 1440 KiB FAT12 floppy profile.
    UnsupportedProfile(&'static str),
    /// Path lookup failed.
    NotFound,
    /// A directory operation was invoked on a non-directory.
    NotADirectory,
    /// A file operation was invoked on a directory.
    NotAFile,
    /// rm_dir on a directory holding entries other than `.` and `..`.
    DirectoryNotEmpty,
    /// Insertion into the root would push it past 224 children.
    RootCapacityExceeded,
    /// The FAT has too few free clusters left.
    NoSpace,
    /// Name longer than 8 characters, or extension longer than 3.
    NameTooLong,
    /// From the byte-stream collaborators.
    Io(io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState => f.write_str("image context is not in the required state"),
            Self::InvalidFormat(what) => write!(f, "invalid FAT12 image: {}", what),
            Self::UnsupportedProfile(what) => write!(f, "unsupported media profile: {}", what),
            Self::NotFound => f.write_str("path not found"),
            Self::NotADirectory => f.write_str("entry is not a directory"),
            Self::NotAFile => f.write_str("entry is not a regular file"),
            Self::DirectoryNotEmpty => f.write_str("directory is not empty"),
            Self::RootCapacityExceeded => {
                f.write_str("root directory is limited to 224 entries")
            }
            Self::NoSpace => f.write_str("no free clusters left in the FAT"),
            Self::NameTooLong => f.write_str("name does not fit the 8.3 format"),
            Self::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

pub(crate) fn read_le_u16(input: &[u8]) -> u16 {
    let (int_bytes, _) = input.split_at(core::mem::size_of::<u16>());
    u16::from_le_bytes(int_bytes.try_into().unwrap())
}

pub(crate) fn read_le_u32(input: &[u8]) -> u32 {
    let (int_bytes, _) = input.split_at(core::mem::size_of::<u32>());
    u32::from_le_bytes(int_bytes.try_into().unwrap())
}
