use parking_lot::Mutex;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Result, SpawnfsError};
use crate::fs::entry::{Entry, Handle, Metadata};

const DIR_PERM: u32 = 0o755;

/// A mutable, lock-protected directory.
///
/// The listing is an explicit ordered container: an optional disk-backed base
/// (enumerated fresh on every `list` call) followed by in-memory children in
/// append order. `remove` compares `Arc` identity, not content. `close`
/// permanently empties the directory; later mutations through stale
/// references are dropped.
pub struct Dir {
    name: String,
    perm: u32,
    inner: Mutex<DirInner>,
}

struct DirInner {
    disk: Option<PathBuf>,
    children: Vec<Arc<dyn Entry>>,
    closed: bool,
    modified: SystemTime,
}

impl Dir {
    pub fn new(name: &str, children: Vec<Arc<dyn Entry>>) -> Arc<Dir> {
        Arc::new(Dir {
            name: name.to_string(),
            perm: DIR_PERM,
            inner: Mutex::new(DirInner {
                disk: None,
                children,
                closed: false,
                modified: SystemTime::now(),
            }),
        })
    }

    /// A directory whose base listing reflects `path` on disk at read time.
    /// Works like ls: the enumeration is rebuilt on every `list` call, so the
    /// contents track whatever is currently mounted or written there.
    pub fn from_disk(name: &str, path: &Path) -> Arc<Dir> {
        Arc::new(Dir {
            name: name.to_string(),
            perm: DIR_PERM,
            inner: Mutex::new(DirInner {
                disk: Some(path.to_path_buf()),
                children: Vec::new(),
                closed: false,
                modified: SystemTime::now(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current children, disk base first, then in-memory
    /// children in append order. The lock covers only the in-memory state;
    /// disk enumeration runs outside it.
    pub fn list(&self) -> Vec<Arc<dyn Entry>> {
        let (disk, children) = {
            let inner = self.inner.lock();
            if inner.closed {
                return Vec::new();
            }
            (inner.disk.clone(), inner.children.clone())
        };

        let mut entries = match disk {
            Some(path) => read_disk(&path),
            None => Vec::new(),
        };
        entries.extend(children);
        entries
    }

    pub fn append(&self, entry: Arc<dyn Entry>) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.modified = SystemTime::now();
        inner.children.push(entry);
    }

    /// Remove a child by identity. Disk-derived entries are rebuilt fresh on
    /// every listing, so only in-memory children can match.
    pub fn remove(&self, entry: &Arc<dyn Entry>) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.modified = SystemTime::now();
        inner.children.retain(|c| !Arc::ptr_eq(c, entry));
    }

    /// Permanently empty the directory. Not an OS file close: the listing is
    /// replaced, and later `append`/`remove` calls are dropped.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.disk = None;
        inner.children.clear();
        inner.modified = SystemTime::now();
    }

    /// Resolve `name` among the current children. The directory's own name is
    /// the path-terminus case and resolves to the directory itself; otherwise
    /// the directory-name prefix is stripped and the snapshot is scanned by
    /// basename.
    pub fn find(self: Arc<Self>, name: &str) -> Result<Arc<dyn Entry>> {
        if name == self.name {
            return Ok(self);
        }
        let want = name
            .strip_prefix(&self.name)
            .unwrap_or(name)
            .trim_start_matches('/');

        for entry in self.list() {
            let Ok(info) = entry.stat() else {
                continue;
            };
            if info.name == want {
                return Ok(entry);
            }
        }
        Err(SpawnfsError::NotExist(name.to_string()))
    }
}

impl Entry for Dir {
    fn stat(&self) -> Result<Metadata> {
        let inner = self.inner.lock();
        Ok(Metadata::dir(&self.name, self.perm, inner.modified))
    }

    fn open(self: Arc<Self>) -> Result<Box<dyn Handle>> {
        Ok(Box::new(DirHandle {
            dir: self,
            offset: 0,
        }))
    }

    fn as_dir(self: Arc<Self>) -> Option<Arc<Dir>> {
        Some(self)
    }
}

/// Read handle on a directory: listing-style reads only. Plain byte
/// read/write fail with `NotSupported` through the trait defaults.
struct DirHandle {
    dir: Arc<Dir>,
    offset: usize,
}

impl Handle for DirHandle {
    fn readdir(&mut self, count: usize) -> Result<Vec<Metadata>> {
        let all = self.dir.list();
        if self.offset >= all.len() {
            return Ok(Vec::new());
        }

        let remaining = &all[self.offset..];
        let take = if count == 0 || count > remaining.len() {
            remaining.len()
        } else {
            count
        };

        let mut infos = Vec::with_capacity(take);
        for entry in &remaining[..take] {
            infos.push(entry.stat()?);
        }
        self.offset += take;
        Ok(infos)
    }
}

/// Enumerate `path`, wrapping subdirectories as nested disk-backed dirs and
/// files as read-only entries. Partial enumeration errors yield whatever was
/// read so far.
fn read_disk(path: &Path) -> Vec<Arc<dyn Entry>> {
    let Ok(iter) = fs::read_dir(path) else {
        return Vec::new();
    };

    let mut entries: Vec<Arc<dyn Entry>> = Vec::new();
    for dent in iter.flatten() {
        let name = dent.file_name().to_string_lossy().to_string();
        let child = path.join(dent.file_name());
        let Ok(meta) = dent.metadata() else {
            continue;
        };
        if meta.is_dir() {
            entries.push(Dir::from_disk(&name, &child));
        } else {
            entries.push(Arc::new(DiskFile {
                name,
                path: child,
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            }));
        }
    }
    entries
}

/// A read-only leaf backed by a file on disk, as found under a mounted
/// remote. Metadata is captured at enumeration time; content is read from
/// disk when opened.
pub struct DiskFile {
    name: String,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl Entry for DiskFile {
    fn stat(&self) -> Result<Metadata> {
        Ok(Metadata::file(&self.name, self.size, 0o444, self.modified))
    }

    fn open(self: Arc<Self>) -> Result<Box<dyn Handle>> {
        let file = fs::File::open(&self.path)?;
        Ok(Box::new(DiskFileHandle { file }))
    }
}

struct DiskFileHandle {
    file: fs::File,
}

impl Handle for DiskFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }
}
