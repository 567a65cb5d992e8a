//! The image context: open/create, mutate, serialize, close.
//!
//! A context is a small state machine. It starts uninitialized, becomes
//! open through [`FatImage::open`] (parse an existing image) or
//! [`FatImage::create`] (start a blank one), and returns to uninitialized
//! through [`FatImage::close`]. Every other operation demands the open
//! state and fails with `InvalidState` otherwise, as do open/create on a
//! context that is already open.
//!
//! Serialization is a fixed sector walk: boot sector, FAT copy #1, the
//! byte-identical FAT copy #2, the root directory window, every
//! subdirectory's records laid into its cluster chain, then the file
//! payloads, and finally a truncate to the exact 1,474,560-byte image
//! size. The writer is not incremental; the sink sees either the whole
//! image or an aborted attempt.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use log::{debug, error};

use crate::bpb::BootSector;
use crate::cache::SectorCache;
use crate::device::{Sink, Source};
use crate::dir::{DirTree, NodeId};
use crate::entry::{Attribute, DirEntry};
use crate::fat::Fat12;
use crate::file::FileData;
use crate::{
    Error, Result, BYTES_PER_SECTOR, DIRENT_SIZE, DIR_ENTRY_LAST_AND_UNUSED, DIR_ENTRY_UNUSED,
    DIR_RECORDS_PER_CLUSTER, FIRST_FAT_SECTOR, FIRST_ROOT_DIR_SECTOR, IMAGE_SIZE_KIB,
    ROOT_DIR_SECTORS, SECOND_FAT_SECTOR, SECTORS_PER_FAT,
};

/// What a path resolves to, for callers inspecting a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub attributes: u8,
    pub first_cluster: u16,
    pub file_size: u32,
    pub is_dir: bool,
}

struct ImageState {
    bpb: BootSector,
    fat: Fat12,
    tree: DirTree,
    /// The image this context was opened from; `None` for a created one.
    source: Option<Arc<SectorCache>>,
}

/// A FAT12 floppy image being assembled or edited in memory.
pub struct FatImage {
    state: Option<ImageState>,
}

impl FatImage {
    pub fn new() -> Self {
        Self { state: None }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Parse an existing image from `source`.
    pub fn open(&mut self, source: Arc<dyn Source>, size_kib: usize) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::InvalidState);
        }
        if size_kib != IMAGE_SIZE_KIB {
            return Err(Error::UnsupportedProfile(
                "only 1440 KiB floppy images are supported",
            ));
        }

        let cache = Arc::new(SectorCache::new(source));

        let bpb = BootSector::parse(&cache.read_sector(0)?)?;

        let mut first_fat = Vec::with_capacity(SECTORS_PER_FAT * BYTES_PER_SECTOR);
        for sector in FIRST_FAT_SECTOR..FIRST_FAT_SECTOR + SECTORS_PER_FAT {
            first_fat.extend_from_slice(&cache.read_sector(sector)?);
        }
        let mut second_fat = Vec::with_capacity(SECTORS_PER_FAT * BYTES_PER_SECTOR);
        for sector in SECOND_FAT_SECTOR..SECOND_FAT_SECTOR + SECTORS_PER_FAT {
            second_fat.extend_from_slice(&cache.read_sector(sector)?);
        }
        if first_fat != second_fat {
            error!("FAT copy #1 and #2 disagree; refusing the image");
            return Err(Error::InvalidFormat("the two FAT copies disagree"));
        }

        let fat = Fat12::parse(&first_fat)?;

        // Walk the directory structure breadth-first, starting from the
        // fixed root window. Every file remembers the chain it occupies in
        // THIS image so its bytes can be copied out later no matter how
        // the live FAT is reshuffled in between.
        let mut tree = DirTree::new();
        let mut queue: VecDeque<(NodeId, Vec<usize>)> = VecDeque::new();
        queue.push_back((
            tree.root(),
            (FIRST_ROOT_DIR_SECTOR..FIRST_ROOT_DIR_SECTOR + ROOT_DIR_SECTORS).collect(),
        ));

        while let Some((dir, sectors)) = queue.pop_front() {
            let mut records = Vec::with_capacity(sectors.len() * BYTES_PER_SECTOR);
            for sector in sectors {
                records.extend_from_slice(&cache.read_sector(sector)?);
            }

            for record in records.chunks_exact(DIRENT_SIZE) {
                match record[0] {
                    DIR_ENTRY_LAST_AND_UNUSED => break,
                    DIR_ENTRY_UNUSED => continue,
                    _ => {}
                }

                let entry = DirEntry::decode(record)?;
                let first_cluster = entry.first_cluster();
                if entry.is_dir() {
                    let descend = !entry.is_dot() && !entry.is_dotdot();
                    let id = tree.attach_parsed(dir, entry, None);
                    if descend {
                        queue.push_back((id, fat.chain(first_cluster)?));
                    }
                } else {
                    let sectors = if first_cluster >= 2 {
                        fat.chain(first_cluster)?
                    } else {
                        Vec::new()
                    };
                    tree.attach_parsed(dir, entry, Some(FileData::Image { sectors }));
                }
            }
        }

        debug!("opened image, volume id 0x{:08X}", bpb.volume_id());
        self.state = Some(ImageState {
            bpb,
            fat,
            tree,
            source: Some(cache),
        });
        Ok(())
    }

    /// Start a blank image: default boot sector, fresh FAT, empty root.
    pub fn create(&mut self, size_kib: usize) -> Result<()> {
        if self.state.is_some() {
            return Err(Error::InvalidState);
        }
        if size_kib != IMAGE_SIZE_KIB {
            return Err(Error::UnsupportedProfile(
                "only 1440 KiB floppy images are supported",
            ));
        }

        debug!("created blank 1440 KiB image");
        self.state = Some(ImageState {
            bpb: BootSector::new(),
            fat: Fat12::new(),
            tree: DirTree::new(),
            source: None,
        });
        Ok(())
    }

    /// Serialize the current state into `sink` as a complete image.
    pub fn write(&self, sink: &dyn Sink) -> Result<()> {
        let state = self.state()?;

        sink.write_at(&state.bpb.emit(), 0)?;

        let fat_bytes = state.fat.emit();
        sink.write_at(&fat_bytes, (FIRST_FAT_SECTOR * BYTES_PER_SECTOR) as u64)?;
        if state.bpb.num_fats() == 2 {
            sink.write_at(&fat_bytes, (SECOND_FAT_SECTOR * BYTES_PER_SECTOR) as u64)?;
        }

        // Directory records, breadth-first. Each directory's records are
        // laid into its sector run (the fixed window for the root, the
        // current cluster chain for everyone else), 16 records per sector,
        // with cluster tails zero-filled.
        let tree = &state.tree;
        let mut queue = VecDeque::from([tree.root()]);
        while let Some(dir) = queue.pop_front() {
            let sectors = if dir == tree.root() {
                (FIRST_ROOT_DIR_SECTOR..FIRST_ROOT_DIR_SECTOR + ROOT_DIR_SECTORS).collect()
            } else {
                state.fat.chain(tree.entry(dir).first_cluster())?
            };

            let children = tree.children(dir);
            if children.len() > sectors.len() * DIR_RECORDS_PER_CLUSTER {
                return Err(Error::InvalidFormat(
                    "directory chain shorter than its records",
                ));
            }

            let mut region = vec![0u8; sectors.len() * BYTES_PER_SECTOR];
            for (i, &child) in children.iter().enumerate() {
                let entry = tree.entry(child);
                region[i * DIRENT_SIZE..(i + 1) * DIRENT_SIZE].copy_from_slice(&entry.encode());
                if entry.is_dir() && !entry.is_dot() && !entry.is_dotdot() {
                    queue.push_back(child);
                }
            }
            for (i, &sector) in sectors.iter().enumerate() {
                sink.write_at(
                    &region[i * BYTES_PER_SECTOR..(i + 1) * BYTES_PER_SECTOR],
                    (sector * BYTES_PER_SECTOR) as u64,
                )?;
            }
        }

        // File payloads, cluster by cluster into each file's new chain.
        let mut queue = VecDeque::from([tree.root()]);
        while let Some(dir) = queue.pop_front() {
            for &child in tree.children(dir) {
                let entry = tree.entry(child);
                if entry.is_dir() {
                    if !entry.is_dot() && !entry.is_dotdot() {
                        queue.push_back(child);
                    }
                } else {
                    copy_payload(state, sink, child)?;
                }
            }
        }

        sink.truncate((IMAGE_SIZE_KIB * 1024) as u64)?;
        debug!("wrote {} byte image", IMAGE_SIZE_KIB * 1024);
        Ok(())
    }

    /// Release the original image and any external payload handles.
    pub fn close(&mut self) -> Result<()> {
        if self.state.take().is_none() {
            return Err(Error::InvalidState);
        }
        debug!("closed image context");
        Ok(())
    }

    /// Add a regular file whose `length` bytes are read from `source` at
    /// serialization time.
    pub fn add_file(&mut self, path: &str, source: Arc<dyn Source>, length: u32) -> Result<()> {
        let state = self.state_mut()?;
        state.tree.add_file(&mut state.fat, path, source, length)?;
        Ok(())
    }

    /// Create a subdirectory (with its `.` and `..` entries).
    pub fn add_dir(&mut self, path: &str) -> Result<()> {
        let state = self.state_mut()?;
        state.tree.add_dir(&mut state.fat, path)?;
        Ok(())
    }

    /// Remove a regular file and free its clusters.
    pub fn rm_file(&mut self, path: &str) -> Result<()> {
        let state = self.state_mut()?;
        state.tree.rm_file(&mut state.fat, path)
    }

    /// Remove an empty subdirectory and free its chain.
    pub fn rm_dir(&mut self, path: &str) -> Result<()> {
        let state = self.state_mut()?;
        state.tree.rm_dir(&mut state.fat, path)
    }

    pub fn set_attr(&mut self, path: &str, attr: Attribute) -> Result<()> {
        self.state_mut()?.tree.set_attr(path, attr)
    }

    pub fn clear_attr(&mut self, path: &str, attr: Attribute) -> Result<()> {
        self.state_mut()?.tree.clear_attr(path, attr)
    }

    /// Stream a file's payload to `out`, exactly `file_size` bytes.
    pub fn extract_file(&self, path: &str, out: &mut dyn io::Write) -> Result<()> {
        let state = self.state()?;
        let id = state.tree.lookup(path)?;
        let node = state.tree.node(id);
        if node.entry.is_dir() {
            return Err(Error::NotAFile);
        }
        let data = node
            .data
            .as_ref()
            .ok_or(Error::InvalidFormat("file entry carries no data source"))?;

        let mut remaining = data.byte_len(node.entry.file_size()) as usize;
        let mut index = 0;
        let mut buf = [0u8; BYTES_PER_SECTOR];
        while remaining > 0 {
            let len = remaining.min(BYTES_PER_SECTOR);
            data.read_cluster(index, state.source.as_deref(), &mut buf[..len])?;
            out.write_all(&buf[..len])?;
            remaining -= len;
            index += 1;
        }
        Ok(())
    }

    /// Child names of a directory, in record order.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let state = self.state()?;
        let id = state.tree.lookup(path)?;
        if !state.tree.entry(id).is_dir() {
            return Err(Error::NotADirectory);
        }
        Ok(state
            .tree
            .children(id)
            .iter()
            .map(|&child| state.tree.entry(child).display_name())
            .collect())
    }

    /// Metadata of whatever `path` resolves to.
    pub fn entry_info(&self, path: &str) -> Result<EntryInfo> {
        let state = self.state()?;
        let entry = state.tree.entry(state.tree.lookup(path)?);
        Ok(EntryInfo {
            name: entry.display_name(),
            attributes: entry.attributes(),
            first_cluster: entry.first_cluster(),
            file_size: entry.file_size(),
            is_dir: entry.is_dir(),
        })
    }

    /// Free slots left in the FAT.
    pub fn free_clusters(&self) -> Result<usize> {
        Ok(self.state()?.fat.free_clusters())
    }

    /// The parsed (or default) boot sector.
    pub fn boot_sector(&self) -> Result<&BootSector> {
        Ok(&self.state()?.bpb)
    }

    fn state(&self) -> Result<&ImageState> {
        self.state.as_ref().ok_or(Error::InvalidState)
    }

    fn state_mut(&mut self) -> Result<&mut ImageState> {
        self.state.as_mut().ok_or(Error::InvalidState)
    }
}

impl Default for FatImage {
    fn default() -> Self {
        Self::new()
    }
}

// One file's payload into its current chain, `min(remaining, 512)` bytes
// per cluster. Empty files (and records with no allocated cluster) carry
// no payload at all.
fn copy_payload(state: &ImageState, sink: &dyn Sink, file: NodeId) -> Result<()> {
    let node = state.tree.node(file);
    let first_cluster = node.entry.first_cluster();
    let data = match &node.data {
        Some(data) => data,
        None => return Err(Error::InvalidFormat("file entry carries no data source")),
    };

    let mut remaining = data.byte_len(node.entry.file_size()) as usize;
    if remaining == 0 || first_cluster < 2 {
        return Ok(());
    }

    let destination = state.fat.chain(first_cluster)?;
    let mut buf = [0u8; BYTES_PER_SECTOR];
    for (index, &sector) in destination.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        let len = remaining.min(BYTES_PER_SECTOR);
        data.read_cluster(index, state.source.as_deref(), &mut buf[..len])?;
        sink.write_at(&buf[..len], (sector * BYTES_PER_SECTOR) as u64)?;
        remaining -= len;
    }
    Ok(())
}
