//! Where a file's payload bytes currently live.
//!
//! Between open/create and write, this crate never copies payloads into
//! memory. A parsed file keeps the cluster chain it had in the opened
//! image; a file added afterwards keeps a handle to its external source.
//! The two differ on write: original clusters are re-read by physical
//! position from the opened image (the chain captured here, NOT the chain
//! in the live FAT, which later mutations may have reshuffled), while an
//! external source is a plain contiguous stream read at `i * 512`.

use std::sync::Arc;

use crate::cache::SectorCache;
use crate::device::Source;
use crate::{Error, Result, BYTES_PER_SECTOR};

pub enum FileData {
    /// The file's bytes sit in the image this context was opened from, at
    /// the physical sectors its chain occupied at open time.
    Image { sectors: Vec<usize> },
    /// The file's bytes come from a foreign stream handed to `add_file`.
    External { source: Arc<dyn Source>, length: u32 },
}

impl FileData {
    /// Payload length in bytes; the directory record's size field is the
    /// fallback for data still sitting in the opened image.
    pub(crate) fn byte_len(&self, record_size: u32) -> u32 {
        match self {
            Self::Image { .. } => record_size,
            Self::External { length, .. } => *length,
        }
    }

    /// Read the `index`-th cluster-sized piece of the payload into `buf`
    /// (at most one cluster, possibly less for the final piece).
    pub(crate) fn read_cluster(
        &self,
        index: usize,
        original: Option<&SectorCache>,
        buf: &mut [u8],
    ) -> Result<()> {
        match self {
            Self::Image { sectors } => {
                let sector = *sectors
                    .get(index)
                    .ok_or(Error::InvalidFormat("file data shorter than its record size"))?;
                let cache = original.ok_or(Error::InvalidState)?;
                let full = cache.read_sector(sector)?;
                buf.copy_from_slice(&full[..buf.len()]);
            }
            Self::External { source, .. } => {
                source.read_at(buf, (index * BYTES_PER_SECTOR) as u64)?;
            }
        }
        Ok(())
    }
}
