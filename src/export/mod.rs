mod convert;
mod inode;

use convert::{error_to_libc, metadata_to_fileattr};
use inode::{InodeTable, Node};

use dashmap::DashMap;
use fuser::{
    FileAttr, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow, FUSE_ROOT_ID,
};
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::fs::{Entry, Handle};

const TTL: Duration = Duration::from_secs(1);

/// Serve the root tree at `mountpoint` through FUSE. Blocks until the
/// filesystem is unmounted or the session fails.
pub fn serve(root: Arc<dyn Entry>, mountpoint: &Path) -> Result<()> {
    fs::create_dir_all(mountpoint)?;
    let options = vec![
        MountOption::FSName("spawnfs".to_string()),
        MountOption::AutoUnmount,
    ];
    tracing::info!("exporting tree at {}", mountpoint.display());
    fuser::mount2(ExportFs::new(root), mountpoint, &options)?;
    tracing::info!("export at {} ended", mountpoint.display());
    Ok(())
}

/// The produced-to surface: translates kernel filesystem operations into
/// `Entry`/`Handle` calls one-for-one. Holds no spawnfs semantics.
pub struct ExportFs {
    inodes: Mutex<InodeTable>,
    next_ino: Mutex<u64>,
    next_fh: Mutex<u64>,
    // Open handles are shared with reply worker threads: reads on control
    // streams block until data arrives, and a deferred reply keeps the FUSE
    // session loop free to serve other operations meanwhile.
    handles: Arc<DashMap<u64, Arc<Mutex<Box<dyn Handle>>>>>,
    uid: u32,
    gid: u32,
}

impl ExportFs {
    pub fn new(root: Arc<dyn Entry>) -> ExportFs {
        let mut inodes = InodeTable::new();
        inodes.insert(Node {
            ino: FUSE_ROOT_ID,
            parent: 0,
            name: String::new(),
            entry: root,
        });

        ExportFs {
            inodes: Mutex::new(inodes),
            // Inode 1 is FUSE_ROOT_ID.
            next_ino: Mutex::new(2),
            next_fh: Mutex::new(1),
            handles: Arc::new(DashMap::new()),
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    fn alloc_ino(&self) -> u64 {
        let mut next = self.next_ino.lock();
        let ino = *next;
        *next = next.wrapping_add(1);
        ino
    }

    fn alloc_fh(&self) -> u64 {
        let mut next = self.next_fh.lock();
        let fh = *next;
        *next = next.wrapping_add(1);
        fh
    }

    fn entry_of(&self, ino: u64) -> Option<Arc<dyn Entry>> {
        self.inodes.lock().peek(ino).map(|n| n.entry.clone())
    }

    fn attrs_of(&self, ino: u64) -> std::result::Result<FileAttr, i32> {
        let entry = self.entry_of(ino).ok_or(libc::ENOENT)?;
        let meta = entry.stat().map_err(|e| error_to_libc(&e))?;
        Ok(metadata_to_fileattr(&meta, ino, self.uid, self.gid))
    }

    /// Bind `entry` under (parent, name), reusing the cached inode when the
    /// binding still points at the same entry. Remotes are recycled by id,
    /// so a name can come back bound to a different entry after close.
    fn bind_child(&self, parent: u64, name: &str, entry: Arc<dyn Entry>) -> u64 {
        let mut inodes = self.inodes.lock();
        if let Some(ino) = inodes.lookup_child(parent, name) {
            if let Some(node) = inodes.peek(ino) {
                if Arc::ptr_eq(&node.entry, &entry) {
                    return ino;
                }
            }
            inodes.remove_child(parent, name);
        }
        drop(inodes);

        let ino = self.alloc_ino();
        self.inodes.lock().insert(Node {
            ino,
            parent,
            name: name.to_string(),
            entry,
        });
        ino
    }

    fn find_child(&self, parent: u64, name: &str) -> Option<Arc<dyn Entry>> {
        let dir = self.entry_of(parent)?.as_dir()?;
        dir.list().into_iter().find(|child| {
            child
                .stat()
                .map(|info| info.name == name)
                .unwrap_or(false)
        })
    }
}

impl Filesystem for ExportFs {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        tracing::info!("spawnfs export initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("spawnfs export destroyed");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_string_lossy();
        tracing::debug!("lookup(parent={}, name={})", parent, name);

        let Some(child) = self.find_child(parent, &name) else {
            reply.error(libc::ENOENT);
            return;
        };

        let ino = self.bind_child(parent, &name, child);
        match self.attrs_of(ino) {
            Ok(attrs) => reply.entry(&TTL, &attrs, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        tracing::debug!("getattr(ino={})", ino);
        match self.attrs_of(ino) {
            Ok(attrs) => reply.attr(&TTL, &attrs),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        // Control files are streams: truncate and chmod have nothing to act
        // on, so the current attributes are echoed back.
        match self.attrs_of(ino) {
            Ok(attrs) => reply.attr(&TTL, &attrs),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        tracing::debug!("open(ino={})", ino);
        let Some(entry) = self.entry_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        match entry.open() {
            Ok(handle) => {
                let fh = self.alloc_fh();
                self.handles.insert(fh, Arc::new(Mutex::new(handle)));
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(error_to_libc(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        tracing::debug!("read(ino={}, fh={}, size={})", ino, fh, size);
        let Some(handle) = self.handles.get(&fh).map(|h| h.value().clone()) else {
            reply.error(libc::EBADF);
            return;
        };

        // Entries are streams with handle-owned cursors, so the kernel
        // offset is not used for positioning. Reads on broadcast files block
        // until data arrives; replying from a worker thread keeps the
        // session loop responsive.
        std::thread::spawn(move || {
            let mut buf = vec![0u8; size as usize];
            let mut handle = handle.lock();
            match handle.read(&mut buf) {
                Ok(n) => reply.data(&buf[..n]),
                Err(e) => reply.error(error_to_libc(&e)),
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        tracing::debug!("write(ino={}, fh={}, len={})", ino, fh, data.len());
        let Some(handle) = self.handles.get(&fh).map(|h| h.value().clone()) else {
            reply.error(libc::EBADF);
            return;
        };

        let mut handle = handle.lock();
        match handle.write(data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(error_to_libc(&e)),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Plumbing fires on release, not flush: a dup'd descriptor flushes
        // once per copy but the file closes once.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        tracing::debug!("release(ino={}, fh={})", ino, fh);
        let Some((_, handle)) = self.handles.remove(&fh) else {
            reply.ok();
            return;
        };

        let result = handle.lock().close();
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(error_to_libc(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        tracing::debug!("readdir(ino={}, offset={})", ino, offset);
        let Some(entry) = self.entry_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(dir) = entry.as_dir() else {
            reply.error(libc::ENOTDIR);
            return;
        };

        for (idx, child) in dir.list().into_iter().enumerate().skip(offset as usize) {
            let Ok(info) = child.stat() else {
                continue;
            };
            let kind = if info.is_dir {
                fuser::FileType::Directory
            } else {
                fuser::FileType::RegularFile
            };
            let name = info.name.clone();
            let child_ino = self.bind_child(ino, &name, child);
            if reply.add(child_ino, (idx + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }
}
