//! Read-through sector cache over the opened source image.
//!
//! Directory scans revisit the same FAT and directory sectors many times
//! while the tree is built, and payload copies re-read original clusters on
//! write; a small LRU keeps those reads off the underlying stream. The
//! cache is read-only: the writer never patches the source image in place,
//! it re-serializes the whole image into the sink.

use core::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use spin::RwLock;

use crate::device::Source;
use crate::{Result, BYTES_PER_SECTOR};

/// Sectors kept hot at a time.
pub const SECTOR_CACHE_LIMIT: usize = 64;

pub struct SectorCache {
    device: Arc<dyn Source>,
    lru: RwLock<LruCache<usize, [u8; BYTES_PER_SECTOR]>>,
}

impl SectorCache {
    pub fn new(device: Arc<dyn Source>) -> Self {
        let capacity = NonZeroUsize::new(SECTOR_CACHE_LIMIT).unwrap();
        Self {
            device,
            lru: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// One 512-byte sector by absolute sector index.
    pub fn read_sector(&self, sector: usize) -> Result<[u8; BYTES_PER_SECTOR]> {
        if let Some(cached) = self.lru.write().get(&sector) {
            return Ok(*cached);
        }

        let mut buf = [0u8; BYTES_PER_SECTOR];
        self.device
            .read_at(&mut buf, (sector * BYTES_PER_SECTOR) as u64)?;
        self.lru.write().put(sector, buf);

        Ok(buf)
    }
}
