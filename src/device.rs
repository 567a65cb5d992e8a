//! Byte-stream collaborators.
//!
//! The codec talks to the outside world through two narrow traits: a
//! [`Source`] it can read an image or a file payload from, and a [`Sink`] it
//! serializes a finished image into. Offsets are absolute byte positions;
//! callers that hand a `Source` to the image context must keep it valid for
//! the context's lifetime.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use spin::RwLock;

use crate::Result;

/// Something image bytes can be read from.
pub trait Source: Send + Sync {
    /// Fill `buf` from the absolute byte position `offset`.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;
}

/// Something a finished image can be serialized into.
pub trait Sink: Send + Sync {
    /// Write all of `buf` at the absolute byte position `offset`.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()>;

    /// Force the sink to exactly `len` bytes, zero-padding if it cannot
    /// shrink-and-grow natively.
    fn truncate(&self, len: u64) -> Result<()>;
}

/// A disk image (or payload file) backed by a host file.
pub struct FileDisk(pub RwLock<File>);

impl FileDisk {
    pub fn new(file: File) -> Self {
        Self(RwLock::new(file))
    }
}

impl Source for FileDisk {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut file = self.0.write();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}

impl Sink for FileDisk {
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        let mut file = self.0.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.0.write().set_len(len)?;
        Ok(())
    }
}

/// An in-memory disk image. Doubles as the external-payload source and the
/// write destination in tests.
pub struct MemDisk(pub RwLock<Cursor<Vec<u8>>>);

impl MemDisk {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(RwLock::new(Cursor::new(bytes)))
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.read().get_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for MemDisk {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut cursor = self.0.write();
        cursor.seek(SeekFrom::Start(offset))?;
        cursor.read_exact(buf)?;
        Ok(())
    }
}

impl Sink for MemDisk {
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        let mut cursor = self.0.write();
        cursor.seek(SeekFrom::Start(offset))?;
        cursor.write_all(buf)?;
        Ok(())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.0.write().get_mut().resize(len as usize, 0);
        Ok(())
    }
}
