//! BIOS Parameter Block (BPB) and Boot Sector
//!
//! The first important data structure on a FAT volume is the BPB, located in
//! the first sector of the volume in the reserved region. This sector is
//! sometimes called the "boot sector" or the "0th sector", but the important
//! fact is simply that it is the first sector of the volume.
//!
//! FAT type is determined by exactly one thing, the count of data clusters:
//! there is no such thing as a FAT12 volume with more than 4084 clusters,
//! and no such thing as a FAT16 volume with less than 4085 clusters. The
//! informational `fs_type` string does not decide the type, but external
//! tools write `"FAT12   "` on this medium and the parser requires it.
//!
//! On a 1440 KiB floppy the whole geometry is fixed: 512-byte sectors, one
//! sector per cluster, one reserved sector, two 9-sector FATs, a 14-sector
//! root directory window, 2880 sectors total. The parser rejects anything
//! else rather than guessing at a layout this crate will not serialize.

use lazy_static::lazy_static;
use log::error;

use crate::{
    read_le_u16, read_le_u32, Error, Result, BYTES_PER_SECTOR, DIRENT_SIZE, MAX_CLUSTER_FAT12,
    MAX_CLUSTER_FAT16, MAX_ROOT_DIR_ENTRIES, MEDIA_DESCRIPTOR, NUM_FATS, RESERVED_SECTORS,
    SECTORS_PER_CLUSTER, SECTORS_PER_FAT, TOTAL_SECTORS,
};

/// Bootstrap code region length inside the boot sector.
pub const BOOT_CODE_SIZE: usize = 448;

// The x86 stub that prints the message below and waits for a key.
// This boot code was taken from dosfstools.
const BOOT_STUB: [u8; 29] = [
    0x0E, 0x1F, 0xBE, 0x5B, 0x7C, 0xAC, 0x22, 0xC0, 0x74, 0x0B, 0x56, 0xB4, 0x0E, 0xBB, 0x07,
    0x00, 0xCD, 0x10, 0x5E, 0xEB, 0xF0, 0x32, 0xE4, 0xCD, 0x16, 0xCD, 0x19, 0xEB, 0xFE,
];

const BOOT_MESSAGE: &[u8] = b"This is not a bootable disk.  Please insert a bootable floppy and\r\npress any key to try again ... \r\n";

lazy_static! {
    static ref BOOT_CODE: [u8; BOOT_CODE_SIZE] = {
        let mut code = [0u8; BOOT_CODE_SIZE];
        code[..BOOT_STUB.len()].copy_from_slice(&BOOT_STUB);
        code[BOOT_STUB.len()..BOOT_STUB.len() + BOOT_MESSAGE.len()].copy_from_slice(BOOT_MESSAGE);
        code
    };
}

pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

/// The 512-byte boot sector, field for field.
///
/// All multi-byte fields are little-endian on disk. A parsed instance keeps
/// the source's bootstrap code and volume identity verbatim so that an
/// unmodified image re-emits byte-identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSector {
    /// x86 jump to the bootstrap code.    Size: 3 bytes    Offset: 0x00
    pub(crate) jmp_boot: [u8; 3],
    /// Name of the system that formatted the volume.    Offset: 0x03
    pub(crate) oem_name: [u8; 8],
    /// Bytes per sector; 512 on this medium.    Offset: 0x0B
    pub(crate) bytes_per_sector: u16,
    /// Sectors per allocation unit; 1 on this medium.    Offset: 0x0D
    pub(crate) sectors_per_cluster: u8,
    /// Sectors before FAT #1; just the boot sector.    Offset: 0x0E
    pub(crate) reserved_sectors: u16,
    /// Count of FAT copies.    Offset: 0x10
    pub(crate) num_fats: u8,
    /// Root directory capacity in 32-byte records.    Offset: 0x11
    pub(crate) max_root_dir_entries: u16,
    /// 16-bit total sector count (the 32-bit field stays 0).    Offset: 0x13
    pub(crate) sector_count_16: u16,
    /// Media descriptor; 0xF0 for removable media. Whatever value is put
    /// here must also be put in the low byte of the FAT[0] entry.
    /// Offset: 0x15
    pub(crate) media: u8,
    /// Sectors occupied by one FAT copy.    Offset: 0x16
    pub(crate) sectors_per_fat: u16,
    /// CHS geometry for INT 13h; 18 on a 1.44 MB floppy.    Offset: 0x18
    pub(crate) sectors_per_track: u16,
    /// CHS geometry for INT 13h; 2 for a double sided floppy.  Offset: 0x1A
    pub(crate) num_heads: u16,
    /// Sectors preceding this volume; 0 on unpartitioned media.
    /// Offset: 0x1C
    pub(crate) hidden_sectors: u32,
    /// 32-bit total sector count; 0 because the 16-bit field is used.
    /// Offset: 0x20
    pub(crate) total_sector_count_32: u32,
    /// INT 13h drive number: 0x00 removable, 0x80 fixed.    Offset: 0x24
    pub(crate) drive_num: u8,
    /// Reserved byte (used by Windows NT).    Offset: 0x25
    pub(crate) reserved: u8,
    /// 0x29 marks the three identity fields below as present.  Offset: 0x26
    pub(crate) boot_sig: u8,
    /// Volume serial number.    Offset: 0x27
    pub(crate) volume_id: u32,
    /// Volume label, space padded.    Offset: 0x2B
    pub(crate) volume_label: [u8; 11],
    /// Informational type string; `"FAT12   "` here.    Offset: 0x36
    pub(crate) fs_type: [u8; 8],
    /// Bootstrap code blob.    Offset: 0x3E
    pub(crate) boot_code: [u8; BOOT_CODE_SIZE],
    /// 0xAA55.    Offset: 0x1FE
    pub(crate) signature: u16,
}

impl BootSector {
    /// Boot sector for a freshly built image, matching what this crate's
    /// lineage has always stamped on new floppies.
    pub fn new() -> Self {
        Self {
            jmp_boot: [0xEB, 0x3C, 0x90],
            oem_name: *b"pyfat   ",
            bytes_per_sector: BYTES_PER_SECTOR as u16,
            sectors_per_cluster: SECTORS_PER_CLUSTER as u8,
            reserved_sectors: RESERVED_SECTORS as u16,
            num_fats: NUM_FATS as u8,
            max_root_dir_entries: MAX_ROOT_DIR_ENTRIES as u16,
            sector_count_16: TOTAL_SECTORS as u16,
            media: MEDIA_DESCRIPTOR,
            sectors_per_fat: SECTORS_PER_FAT as u16,
            sectors_per_track: 18,
            num_heads: 2,
            hidden_sectors: 0,
            total_sector_count_32: 0,
            drive_num: 0x00,
            reserved: 0,
            boot_sig: 0x29,
            volume_id: 0xFD4B_5C1D,
            volume_label: *b"NO NAME    ",
            fs_type: *b"FAT12   ",
            boot_code: *BOOT_CODE,
            signature: 0xAA55,
        }
    }

    /// Decode and validate the first sector of an image.
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() != BYTES_PER_SECTOR {
            return Err(Error::InvalidFormat("boot sector must be 512 bytes"));
        }

        let boot = Self {
            jmp_boot: sector[0x00..0x03].try_into().unwrap(),
            oem_name: sector[0x03..0x0B].try_into().unwrap(),
            bytes_per_sector: read_le_u16(&sector[0x0B..]),
            sectors_per_cluster: sector[0x0D],
            reserved_sectors: read_le_u16(&sector[0x0E..]),
            num_fats: sector[0x10],
            max_root_dir_entries: read_le_u16(&sector[0x11..]),
            sector_count_16: read_le_u16(&sector[0x13..]),
            media: sector[0x15],
            sectors_per_fat: read_le_u16(&sector[0x16..]),
            sectors_per_track: read_le_u16(&sector[0x18..]),
            num_heads: read_le_u16(&sector[0x1A..]),
            hidden_sectors: read_le_u32(&sector[0x1C..]),
            total_sector_count_32: read_le_u32(&sector[0x20..]),
            drive_num: sector[0x24],
            reserved: sector[0x25],
            boot_sig: sector[0x26],
            volume_id: read_le_u32(&sector[0x27..]),
            volume_label: sector[0x2B..0x36].try_into().unwrap(),
            fs_type: sector[0x36..0x3E].try_into().unwrap(),
            boot_code: sector[0x3E..0x1FE].try_into().unwrap(),
            signature: read_le_u16(&sector[0x1FE..]),
        };

        boot.validate()?;
        boot.check_profile()?;

        Ok(boot)
    }

    /// Re-pack into the on-disk sector.
    pub fn emit(&self) -> [u8; BYTES_PER_SECTOR] {
        let mut sector = [0u8; BYTES_PER_SECTOR];
        sector[0x00..0x03].copy_from_slice(&self.jmp_boot);
        sector[0x03..0x0B].copy_from_slice(&self.oem_name);
        sector[0x0B..0x0D].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        sector[0x0D] = self.sectors_per_cluster;
        sector[0x0E..0x10].copy_from_slice(&self.reserved_sectors.to_le_bytes());
        sector[0x10] = self.num_fats;
        sector[0x11..0x13].copy_from_slice(&self.max_root_dir_entries.to_le_bytes());
        sector[0x13..0x15].copy_from_slice(&self.sector_count_16.to_le_bytes());
        sector[0x15] = self.media;
        sector[0x16..0x18].copy_from_slice(&self.sectors_per_fat.to_le_bytes());
        sector[0x18..0x1A].copy_from_slice(&self.sectors_per_track.to_le_bytes());
        sector[0x1A..0x1C].copy_from_slice(&self.num_heads.to_le_bytes());
        sector[0x1C..0x20].copy_from_slice(&self.hidden_sectors.to_le_bytes());
        sector[0x20..0x24].copy_from_slice(&self.total_sector_count_32.to_le_bytes());
        sector[0x24] = self.drive_num;
        sector[0x25] = self.reserved;
        sector[0x26] = self.boot_sig;
        sector[0x27..0x2B].copy_from_slice(&self.volume_id.to_le_bytes());
        sector[0x2B..0x36].copy_from_slice(&self.volume_label);
        sector[0x36..0x3E].copy_from_slice(&self.fs_type);
        sector[0x3E..0x1FE].copy_from_slice(&self.boot_code);
        sector[0x1FE..0x200].copy_from_slice(&self.signature.to_le_bytes());
        sector
    }

    // Structural rules any valid FAT12 boot sector obeys.
    fn validate(&self) -> Result<()> {
        if self.media != MEDIA_DESCRIPTOR && !(0xF8..=0xFF).contains(&self.media) {
            error!("media descriptor 0x{:02X} is not a legal value", self.media);
            return Err(Error::InvalidFormat("illegal media descriptor"));
        }
        if self.num_fats != 1 && self.num_fats != 2 {
            error!("number of FATs must be 1 or 2, found {}", self.num_fats);
            return Err(Error::InvalidFormat("number of FATs must be 1 or 2"));
        }
        if self.drive_num != 0x00 && self.drive_num != 0x80 {
            error!("drive number 0x{:02X} is not a legal value", self.drive_num);
            return Err(Error::InvalidFormat("illegal drive number"));
        }
        if self.sectors_per_fat != SECTORS_PER_FAT as u16 {
            error!("expected 9 sectors per FAT, found {}", self.sectors_per_fat);
            return Err(Error::InvalidFormat("expected 9 sectors per FAT"));
        }
        if self.total_sector_count_32 != 0 {
            error!(
                "32-bit total sector count must be 0, found {}",
                self.total_sector_count_32
            );
            return Err(Error::InvalidFormat("32-bit total sector count must be 0"));
        }
        if self.fs_type != *b"FAT12   " {
            error!("filesystem type string is not \"FAT12   \"");
            return Err(Error::InvalidFormat("filesystem type is not FAT12"));
        }
        if self.signature != 0xAA55 {
            error!("boot signature 0x{:04X} != 0xAA55", self.signature);
            return Err(Error::InvalidFormat("missing 0xAA55 boot signature"));
        }
        Ok(())
    }

    // Geometry rules of the one media profile this crate serializes.
    fn check_profile(&self) -> Result<()> {
        if self.bytes_per_sector != BYTES_PER_SECTOR as u16 {
            return Err(Error::UnsupportedProfile("expected 512 bytes per sector"));
        }
        if self.sectors_per_cluster != SECTORS_PER_CLUSTER as u8 {
            return Err(Error::UnsupportedProfile("expected 1 sector per cluster"));
        }
        if self.reserved_sectors != RESERVED_SECTORS as u16 {
            return Err(Error::UnsupportedProfile("expected 1 reserved sector"));
        }
        if self.max_root_dir_entries != MAX_ROOT_DIR_ENTRIES as u16 {
            return Err(Error::UnsupportedProfile(
                "expected 224 root directory entries",
            ));
        }
        if !matches!(self.fat_type(), FatType::Fat12) {
            return Err(Error::UnsupportedProfile(
                "cluster count is out of the FAT12 range",
            ));
        }
        Ok(())
    }

    /// Sectors occupied by the root directory, rounded up.
    pub fn root_dir_sectors(&self) -> usize {
        (self.max_root_dir_entries as usize * DIRENT_SIZE + self.bytes_per_sector as usize - 1)
            / self.bytes_per_sector as usize
    }

    /// The count of data clusters, starting at cluster 2. This rounds down.
    pub fn count_of_clusters(&self) -> usize {
        let total = if self.sector_count_16 != 0 {
            self.sector_count_16 as usize
        } else {
            self.total_sector_count_32 as usize
        };
        let data_sectors = total
            - (self.reserved_sectors as usize
                + self.num_fats as usize * self.sectors_per_fat as usize
                + self.root_dir_sectors());
        data_sectors / self.sectors_per_cluster as usize
    }

    /// The one and only way that FAT type is determined.
    pub fn fat_type(&self) -> FatType {
        let clusters = self.count_of_clusters();
        if clusters < MAX_CLUSTER_FAT12 {
            FatType::Fat12
        } else if clusters < MAX_CLUSTER_FAT16 {
            FatType::Fat16
        } else {
            FatType::Fat32
        }
    }

    pub fn num_fats(&self) -> usize {
        self.num_fats as usize
    }

    pub fn volume_id(&self) -> u32 {
        self.volume_id
    }

    pub fn volume_label(&self) -> &[u8; 11] {
        &self.volume_label
    }

    pub fn oem_name(&self) -> &[u8; 8] {
        &self.oem_name
    }
}

impl Default for BootSector {
    fn default() -> Self {
        Self::new()
    }
}
