use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Result, SpawnfsError};
use crate::fs::dir::Dir;

/// Read-only metadata snapshot for an entry. Never aliases live state:
/// `stat` builds a fresh value under the entry's lock.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub is_dir: bool,
    pub modified: SystemTime,
}

impl Metadata {
    pub fn file(name: &str, size: u64, mode: u32, modified: SystemTime) -> Self {
        Metadata {
            name: name.to_string(),
            size,
            mode,
            is_dir: false,
            modified,
        }
    }

    pub fn dir(name: &str, mode: u32, modified: SystemTime) -> Self {
        Metadata {
            name: name.to_string(),
            size: 0,
            mode,
            is_dir: true,
            modified,
        }
    }
}

/// An open read/write handle on an entry.
///
/// Handles are stream-oriented: `read` returns Ok(0) at end of stream and a
/// handle keeps its own cursor. Operations the entry does not support fail
/// with `NotSupported`.
pub trait Handle: Send {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(SpawnfsError::NotSupported)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(SpawnfsError::NotSupported)
    }

    /// Bounded-count directory pagination. The cursor persists across calls;
    /// the child snapshot is taken fresh per call. An empty result means the
    /// listing is exhausted.
    fn readdir(&mut self, _count: usize) -> Result<Vec<Metadata>> {
        Err(SpawnfsError::NotSupported)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A node in the synthetic filesystem: a leaf control file or a directory.
///
/// Directory capability is an explicit probe rather than a downcast chain:
/// `as_dir` returns the entry's `Dir` when it can list, append, remove and
/// find children, and `None` for leaves.
pub trait Entry: Send + Sync {
    fn stat(&self) -> Result<Metadata>;

    fn open(self: Arc<Self>) -> Result<Box<dyn Handle>>;

    fn as_dir(self: Arc<Self>) -> Option<Arc<Dir>> {
        None
    }
}
