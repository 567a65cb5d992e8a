//! The in-memory directory tree.
//!
//! Nodes live in an arena and refer to each other by stable index: children
//! as an ordered list, the parent as a back-edge that never owns anything,
//! so the tree cannot form reference cycles. Detached nodes simply become
//! unreachable; slots are not reused within a context's lifetime.
//!
//! Paths are forward-slash separated and anchored at `/`. Components are
//! compared case-sensitively against the canonical uppercase `NAME[.EXT]`
//! form reconstructed from each record, so `/DIR1/FILE01` is the spelling
//! the external tools list.
//!
//! Directory capacity: the root holds at most 224 records and never grows.
//! A subdirectory's records live in its cluster chain, 16 per cluster; the
//! chain gains a cluster when an insertion makes the child count 16k + 1
//! for k >= 1 (the 17th, 33rd, ... child), which is exactly the first
//! record that would spill past the current chain on write.

use std::sync::Arc;

use crate::device::Source;
use crate::entry::{short_name_format, Attribute, DirEntry};
use crate::fat::Fat12;
use crate::file::FileData;
use crate::{
    Error, Result, BYTES_PER_SECTOR, DIR_RECORDS_PER_CLUSTER, MAX_ROOT_DIR_ENTRIES,
};

/// Stable handle to a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub(crate) usize);

pub(crate) struct DirNode {
    pub(crate) entry: DirEntry,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) data: Option<FileData>,
}

pub struct DirTree {
    nodes: Vec<DirNode>,
}

impl DirTree {
    /// A tree holding only the root.
    pub fn new() -> Self {
        Self {
            nodes: vec![DirNode {
                entry: DirEntry::new_root(),
                parent: None,
                children: Vec::new(),
                data: None,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub(crate) fn node(&self, id: NodeId) -> &DirNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut DirNode {
        &mut self.nodes[id.0]
    }

    pub fn entry(&self, id: NodeId) -> &DirEntry {
        &self.node(id).entry
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Attach a record read from an existing image. Parse-time attachment
    /// allocates nothing and never grows the parent's chain; the records
    /// come from the image exactly as stored.
    pub(crate) fn attach_parsed(
        &mut self,
        parent: NodeId,
        entry: DirEntry,
        data: Option<FileData>,
    ) -> NodeId {
        self.attach(parent, entry, data)
    }

    /// Resolve a path to its node. `/` names the root.
    pub fn lookup(&self, path: &str) -> Result<NodeId> {
        if !path.starts_with('/') {
            return Err(Error::InvalidFormat("path must be anchored at /"));
        }

        let mut current = self.root();
        for component in path[1..].split('/') {
            if component.is_empty() {
                continue;
            }
            current = self
                .child_by_name(current, component)
                .ok_or(Error::NotFound)?;
        }
        Ok(current)
    }

    /// Create a regular file backed by an external source. Returns the new
    /// node; on any failure the FAT is left as it was.
    pub fn add_file(
        &mut self,
        fat: &mut Fat12,
        path: &str,
        source: Arc<dyn Source>,
        length: u32,
    ) -> Result<NodeId> {
        let (parent, filename, extension) = self.prepare_insert(path)?;

        let first_cluster = fat.allocate(length)?;
        let entry = DirEntry::new_file(filename, extension, first_cluster, length);
        let child = self.attach(parent, entry, Some(FileData::External { source, length }));

        if let Err(err) = self.grow_parent(fat, parent) {
            self.roll_back(fat, parent, child, first_cluster);
            return Err(err);
        }
        Ok(child)
    }

    /// Create a subdirectory with its `.` and `..` children.
    pub fn add_dir(&mut self, fat: &mut Fat12, path: &str) -> Result<NodeId> {
        let (parent, filename, extension) = self.prepare_insert(path)?;

        let first_cluster = fat.allocate(BYTES_PER_SECTOR as u32)?;
        let parent_cluster = if self.node(parent).parent.is_none() {
            0
        } else {
            self.node(parent).entry.first_cluster()
        };

        let dir = self.attach(parent, DirEntry::new_dir(filename, extension, first_cluster), None);
        self.attach(dir, DirEntry::new_dot(first_cluster), None);
        self.attach(dir, DirEntry::new_dotdot(parent_cluster), None);

        if let Err(err) = self.grow_parent(fat, parent) {
            self.roll_back(fat, parent, dir, first_cluster);
            return Err(err);
        }
        Ok(dir)
    }

    /// Remove a regular file and free its clusters.
    pub fn rm_file(&mut self, fat: &mut Fat12, path: &str) -> Result<()> {
        let child = self.lookup(path)?;
        let node = self.node(child);
        if node.entry.is_dir() {
            return Err(Error::NotAFile);
        }
        let parent = match node.parent {
            Some(parent) => parent,
            None => return Err(Error::NotAFile),
        };

        let first_cluster = node.entry.first_cluster();
        if first_cluster >= 2 {
            fat.free(first_cluster)?;
        }
        self.detach(parent, child);
        Ok(())
    }

    /// Remove a subdirectory holding nothing but `.` and `..`.
    pub fn rm_dir(&mut self, fat: &mut Fat12, path: &str) -> Result<()> {
        let dir = self.lookup(path)?;
        let node = self.node(dir);
        if !node.entry.is_dir() {
            return Err(Error::NotADirectory);
        }
        let parent = match node.parent {
            Some(parent) => parent,
            None => return Err(Error::InvalidFormat("the root directory cannot be removed")),
        };
        let occupied = node.children.iter().any(|&child| {
            let entry = &self.node(child).entry;
            !entry.is_dot() && !entry.is_dotdot()
        });
        if occupied {
            return Err(Error::DirectoryNotEmpty);
        }

        let first_cluster = self.node(dir).entry.first_cluster();
        if first_cluster >= 2 {
            fat.free(first_cluster)?;
        }
        self.detach(parent, dir);
        Ok(())
    }

    pub fn set_attr(&mut self, path: &str, attr: Attribute) -> Result<()> {
        let id = self.lookup(path)?;
        self.node_mut(id).entry.set_attr(attr);
        Ok(())
    }

    pub fn clear_attr(&mut self, path: &str, attr: Attribute) -> Result<()> {
        let id = self.lookup(path)?;
        self.node_mut(id).entry.clear_attr(attr);
        Ok(())
    }

    // Shared preamble of add_file/add_dir: resolve the parent, validate the
    // leaf name, and rule out a root overflow before any cluster is
    // claimed.
    fn prepare_insert(&self, path: &str) -> Result<(NodeId, [u8; 8], [u8; 3])> {
        let (parent_path, leaf) = split_path(path)?;
        let parent = self.lookup(parent_path)?;
        if !self.node(parent).entry.is_dir() {
            return Err(Error::NotADirectory);
        }

        let (name, ext) = split_leaf(leaf);
        let (filename, extension) = short_name_format(name, ext)?;

        if self.node(parent).parent.is_none()
            && self.node(parent).children.len() >= MAX_ROOT_DIR_ENTRIES
        {
            return Err(Error::RootCapacityExceeded);
        }

        Ok((parent, filename, extension))
    }

    fn attach(&mut self, parent: NodeId, entry: DirEntry, data: Option<FileData>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DirNode {
            entry,
            parent: Some(parent),
            children: Vec::new(),
            data,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    // Give a non-root parent one more cluster when the insertion just made
    // its child count 16k + 1 (k >= 1). A first child never grows the
    // chain: the directory's own cluster still has room.
    fn grow_parent(&mut self, fat: &mut Fat12, parent: NodeId) -> Result<()> {
        let node = self.node(parent);
        if node.parent.is_none() {
            return Ok(());
        }
        let count = node.children.len();
        if count % DIR_RECORDS_PER_CLUSTER == 1 && count > 1 {
            fat.extend(node.entry.first_cluster())?;
        }
        Ok(())
    }

    // Undo a just-attached child after a failed growth so the FAT returns
    // to its pre-call state.
    fn roll_back(&mut self, fat: &mut Fat12, parent: NodeId, child: NodeId, first_cluster: u16) {
        if first_cluster >= 2 {
            let _ = fat.free(first_cluster);
        }
        self.detach(parent, child);
    }

    fn detach(&mut self, parent: NodeId, child: NodeId) {
        let children = &mut self.node_mut(parent).children;
        if let Some(position) = children.iter().position(|&c| c == child) {
            children.remove(position);
        }
    }

    fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&child| self.node(child).entry.display_name() == name)
    }
}

impl Default for DirTree {
    fn default() -> Self {
        Self::new()
    }
}

// Parent path and leaf name. The leaf must be non-empty: the root itself is
// never a creation or removal target.
fn split_path(path: &str) -> Result<(&str, &str)> {
    if !path.starts_with('/') {
        return Err(Error::InvalidFormat("path must be anchored at /"));
    }
    let cut = path.rfind('/').unwrap_or(0);
    let (parent, leaf) = (&path[..cut.max(1)], &path[cut + 1..]);
    if leaf.is_empty() {
        return Err(Error::InvalidFormat("path names no entry"));
    }
    Ok((parent, leaf))
}

// 8.3 split at the last dot; a leading dot belongs to the name.
fn split_leaf(leaf: &str) -> (&str, &str) {
    match leaf.rfind('.') {
        Some(i) if i > 0 => (&leaf[..i], &leaf[i + 1..]),
        _ => (leaf, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;

    fn payload(bytes: &[u8]) -> Arc<MemDisk> {
        Arc::new(MemDisk::from_vec(bytes.to_vec()))
    }

    #[test]
    fn split_path_peels_the_leaf() {
        assert_eq!(split_path("/FOO").unwrap(), ("/", "FOO"));
        assert_eq!(split_path("/DIR1/FILE01").unwrap(), ("/DIR1", "FILE01"));
        assert!(split_path("/").is_err());
        assert!(split_path("FOO").is_err());
    }

    #[test]
    fn split_leaf_honors_the_last_dot() {
        assert_eq!(split_leaf("FOO.TXT"), ("FOO", "TXT"));
        assert_eq!(split_leaf("FOO"), ("FOO", ""));
        assert_eq!(split_leaf("A.B.C"), ("A.B", "C"));
        assert_eq!(split_leaf(".PROFILE"), (".PROFILE", ""));
    }

    #[test]
    fn lookup_walks_nested_directories() {
        let mut fat = Fat12::new();
        let mut tree = DirTree::new();
        tree.add_dir(&mut fat, "/DIR1").unwrap();
        tree.add_dir(&mut fat, "/DIR1/SUB").unwrap();
        tree.add_file(&mut fat, "/DIR1/SUB/FOO.TXT", payload(b"x"), 1)
            .unwrap();

        assert_eq!(tree.lookup("/").unwrap(), tree.root());
        let file = tree.lookup("/DIR1/SUB/FOO.TXT").unwrap();
        assert_eq!(tree.entry(file).display_name(), "FOO.TXT");
        assert!(matches!(tree.lookup("/DIR1/NOPE"), Err(Error::NotFound)));
    }

    #[test]
    fn new_directories_lead_with_dot_and_dotdot() {
        let mut fat = Fat12::new();
        let mut tree = DirTree::new();
        let dir = tree.add_dir(&mut fat, "/DIR1").unwrap();

        let children = tree.children(dir);
        assert_eq!(children.len(), 2);
        let dot = tree.entry(children[0]);
        let dotdot = tree.entry(children[1]);
        assert!(dot.is_dot());
        assert_eq!(dot.first_cluster(), tree.entry(dir).first_cluster());
        assert!(dotdot.is_dotdot());
        assert_eq!(dotdot.first_cluster(), 0);

        // one level down, dotdot points at DIR1's cluster
        let sub = tree.add_dir(&mut fat, "/DIR1/SUB").unwrap();
        let sub_dotdot = tree.entry(tree.children(sub)[1]);
        assert_eq!(
            sub_dotdot.first_cluster(),
            tree.entry(dir).first_cluster()
        );
    }

    #[test]
    fn subdir_grows_on_the_seventeenth_child() {
        let mut fat = Fat12::new();
        let mut tree = DirTree::new();
        let dir = tree.add_dir(&mut fat, "/DIR1").unwrap();
        let dir_cluster = tree.entry(dir).first_cluster();

        // dot + dotdot + 14 files = 16 children, still one cluster
        for i in 1..=14 {
            let path = format!("/DIR1/FILE{:02}", i);
            tree.add_file(&mut fat, &path, payload(b"1234567"), 7).unwrap();
        }
        assert_eq!(fat.chain(dir_cluster).unwrap().len(), 1);

        tree.add_file(&mut fat, "/DIR1/FILE15", payload(b"1234567"), 7)
            .unwrap();
        assert_eq!(fat.chain(dir_cluster).unwrap().len(), 2);
    }

    #[test]
    fn root_never_grows_a_chain() {
        let mut fat = Fat12::new();
        let mut tree = DirTree::new();
        for i in 0..17 {
            let path = format!("/FILE{:02}", i);
            tree.add_file(&mut fat, &path, payload(b"1234567"), 7).unwrap();
        }
        // 17 one-cluster files and nothing else
        assert_eq!(fat.free_clusters(), crate::FAT_ENTRY_COUNT - 2 - 17);
    }

    #[test]
    fn root_capacity_is_enforced_before_allocation() {
        let mut fat = Fat12::new();
        let mut tree = DirTree::new();
        for i in 0..MAX_ROOT_DIR_ENTRIES {
            let path = format!("/F{}", i);
            tree.add_file(&mut fat, &path, payload(b"x"), 1).unwrap();
        }
        let free_before = fat.free_clusters();
        assert!(matches!(
            tree.add_file(&mut fat, "/OVERFLOW", payload(b"x"), 1),
            Err(Error::RootCapacityExceeded)
        ));
        assert_eq!(fat.free_clusters(), free_before);
    }

    #[test]
    fn removal_frees_the_chain() {
        let mut fat = Fat12::new();
        let mut tree = DirTree::new();
        tree.add_file(&mut fat, "/FOO", payload(b"foo\n"), 4).unwrap();
        tree.rm_file(&mut fat, "/FOO").unwrap();

        assert_eq!(fat.free_clusters(), crate::FAT_ENTRY_COUNT - 2);
        assert!(matches!(tree.lookup("/FOO"), Err(Error::NotFound)));
    }

    #[test]
    fn rm_guards_entry_kinds() {
        let mut fat = Fat12::new();
        let mut tree = DirTree::new();
        tree.add_dir(&mut fat, "/DIR1").unwrap();
        tree.add_file(&mut fat, "/FOO", payload(b"x"), 1).unwrap();

        assert!(matches!(
            tree.rm_file(&mut fat, "/DIR1"),
            Err(Error::NotAFile)
        ));
        assert!(matches!(
            tree.rm_dir(&mut fat, "/FOO"),
            Err(Error::NotADirectory)
        ));
        assert!(matches!(tree.rm_dir(&mut fat, "/"), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn rm_dir_requires_an_empty_directory() {
        let mut fat = Fat12::new();
        let mut tree = DirTree::new();
        tree.add_dir(&mut fat, "/DIR1").unwrap();
        tree.add_file(&mut fat, "/DIR1/FOO", payload(b"x"), 1).unwrap();

        assert!(matches!(
            tree.rm_dir(&mut fat, "/DIR1"),
            Err(Error::DirectoryNotEmpty)
        ));

        tree.rm_file(&mut fat, "/DIR1/FOO").unwrap();
        tree.rm_dir(&mut fat, "/DIR1").unwrap();
        assert_eq!(fat.free_clusters(), crate::FAT_ENTRY_COUNT - 2);
    }
}
