use fs2::FileExt;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::{Result, SpawnfsError};
use crate::fs::{Dir, Entry, ReadFn, Tree};
use crate::mount::Mounter;
use crate::remote::Remote;
use crate::spawner::{SpawnedProcess, Spawner};

const LOCK_FILE: &str = ".spawnfs.lock";

/// Recycling allocator for remote ids: `get` prefers previously returned
/// ids over fresh ones, `reserve` pins ids claimed by restored remotes.
pub struct IdPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    next: u64,
    free: Vec<u64>,
}

impl IdPool {
    pub fn new() -> IdPool {
        IdPool {
            inner: Mutex::new(PoolInner {
                next: 0,
                free: Vec::new(),
            }),
        }
    }

    pub fn get(&self) -> u64 {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.free.pop() {
            return id;
        }
        let id = inner.next;
        inner.next += 1;
        id
    }

    pub fn put(&self, id: u64) {
        self.inner.lock().free.push(id);
    }

    /// Mark `id` as in use so `get` never hands it out. Counter values
    /// skipped over land in the free list, so restoring remote 3 does not
    /// burn ids 0 through 2.
    pub fn reserve(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.free.retain(|&f| f != id);
        if id >= inner.next {
            for skipped in inner.next..id {
                inner.free.push(skipped);
            }
            inner.next = id + 1;
        }
    }
}

impl Default for IdPool {
    fn default() -> Self {
        Self::new()
    }
}

/// The top-level server: owns the root directory (the `clone` file plus one
/// subtree per live remote), the id pool, and the mount root. Serving blocks
/// on the export surface until it ends.
pub struct Srv {
    mount_root: PathBuf,
    root: Arc<Dir>,
    pool: Arc<IdPool>,
    remotes: Arc<Mutex<Vec<Arc<Remote>>>>,
    // Exclusive flock held for the server's lifetime; a second server on the
    // same mount root would race restores and id allocation.
    _lock: fs::File,
}

impl Srv {
    pub fn new(
        mount_root: &Path,
        spawner: Arc<dyn Spawner>,
        mounter: Arc<dyn Mounter>,
        handle: tokio::runtime::Handle,
        spawn_timeout: Duration,
    ) -> Result<Srv> {
        fs::create_dir_all(mount_root)?;

        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(mount_root.join(LOCK_FILE))?;
        lock.try_lock_exclusive().map_err(|e| {
            SpawnfsError::Config(format!(
                "another spawnfs instance holds {}: {}",
                mount_root.display(),
                e
            ))
        })?;

        let pool = Arc::new(IdPool::new());
        let remotes = Arc::new(Mutex::new(Vec::new()));
        let root = Dir::new("", vec![]);

        let clone = clone_file(
            mount_root,
            spawner,
            mounter,
            pool.clone(),
            remotes.clone(),
            Arc::downgrade(&root),
            handle,
            spawn_timeout,
        );
        root.append(clone);

        Ok(Srv {
            mount_root: mount_root.to_path_buf(),
            root,
            pool,
            remotes,
            _lock: lock,
        })
    }

    pub fn root(&self) -> Arc<Dir> {
        self.root.clone()
    }

    pub fn tree(&self) -> Tree {
        Tree::new(self.root.clone())
    }

    /// Enumerate the mount root and reconstruct each leftover remote from
    /// its persisted descriptor. A failed restore is logged and skipped,
    /// never fatal to startup. Returns how many remotes came back.
    pub fn restore_leftovers(
        &self,
        spawner: Arc<dyn Spawner>,
        mounter: Arc<dyn Mounter>,
    ) -> usize {
        let Ok(iter) = fs::read_dir(&self.mount_root) else {
            return 0;
        };

        let mut restored = 0;
        for dent in iter.flatten() {
            if !dent.path().is_dir() {
                continue;
            }
            let name = dent.file_name().to_string_lossy().to_string();
            match self.restore_one(&name, spawner.clone(), mounter.clone()) {
                Ok(remote) => {
                    if let Ok(id) = name.parse::<u64>() {
                        self.pool.reserve(id);
                    }
                    self.remotes.lock().push(remote.clone());
                    self.root.append(remote);
                    restored += 1;
                }
                Err(e) => {
                    tracing::warn!("restore failed for {}: {}", name, e);
                }
            }
        }
        tracing::info!(
            "{} remote(s) restored from {}",
            restored,
            self.mount_root.display()
        );
        restored
    }

    fn restore_one(
        &self,
        name: &str,
        spawner: Arc<dyn Spawner>,
        mounter: Arc<dyn Mounter>,
    ) -> Result<Arc<Remote>> {
        let descriptor = fs::read(self.mount_root.join(name).join("spawned"))?;
        let proc = SpawnedProcess::from_descriptor(&descriptor)?;
        Remote::restore(&self.mount_root, name, spawner, mounter, proc)
    }

    /// Serve the root tree through the export surface at `export_at`.
    /// Blocks until the export ends.
    pub fn serve(&self, export_at: &Path) -> Result<()> {
        tracing::info!(
            "serving {} remote(s) at {}",
            self.remotes.lock().len(),
            export_at.display()
        );
        crate::export::serve(self.root.clone(), export_at)
    }

    /// Close one live remote by name: unmount, kill, refund the id, and
    /// remove the subtree from the root. The hook the protocol layer calls
    /// when a client discards a remote.
    pub fn close_remote(&self, name: &str) -> Result<()> {
        let remote = {
            let remotes = self.remotes.lock();
            remotes.iter().find(|r| r.name() == name).cloned()
        };
        match remote {
            Some(remote) => remote.close(),
            None => Err(SpawnfsError::NotExist(name.to_string())),
        }
    }

    /// Close every live remote. Used at shutdown; per-remote failures are
    /// logged so one stuck unmount cannot wedge the rest.
    pub fn close_all(&self) {
        let remotes: Vec<Arc<Remote>> = self.remotes.lock().drain(..).collect();
        for remote in remotes {
            if let Err(e) = remote.close() {
                tracing::warn!("close remote {}: {}", remote.name(), e);
            }
        }
    }
}

/// The read-to-allocate control file. Each read allocates an id, builds the
/// remote, inserts its subtree into the root, and returns the decimal id as
/// the whole payload. A buffer too small for the id refunds it and fails
/// with `ShortBuffer`; closing the remote refunds the id and removes its
/// subtree from the root.
#[allow(clippy::too_many_arguments)]
fn clone_file(
    mount_root: &Path,
    spawner: Arc<dyn Spawner>,
    mounter: Arc<dyn Mounter>,
    pool: Arc<IdPool>,
    remotes: Arc<Mutex<Vec<Arc<Remote>>>>,
    root: Weak<Dir>,
    handle: tokio::runtime::Handle,
    spawn_timeout: Duration,
) -> Arc<ReadFn> {
    let mount_root = mount_root.to_path_buf();
    ReadFn::new(
        "clone",
        Box::new(move |buf| {
            let id = pool.get();
            let name = id.to_string();
            if name.len() > buf.len() {
                pool.put(id);
                return Err(SpawnfsError::ShortBuffer(format!("id {}", name)));
            }

            let remote = match Remote::new(
                &mount_root,
                &name,
                spawner.clone(),
                mounter.clone(),
                id,
                handle.clone(),
                spawn_timeout,
            ) {
                Ok(remote) => remote,
                Err(e) => {
                    pool.put(id);
                    return Err(e);
                }
            };

            {
                let pool = pool.clone();
                let remotes = remotes.clone();
                let root = root.clone();
                let weak = Arc::downgrade(&remote);
                remote.set_done(Box::new(move || {
                    pool.put(id);
                    if let Some(remote) = weak.upgrade() {
                        remotes.lock().retain(|r| !Arc::ptr_eq(r, &remote));
                        if let Some(root) = root.upgrade() {
                            let entry: Arc<dyn Entry> = remote;
                            root.remove(&entry);
                        }
                    }
                }));
            }

            remotes.lock().push(remote.clone());
            if let Some(root) = root.upgrade() {
                root.append(remote);
            }

            buf[..name.len()].copy_from_slice(name.as_bytes());
            Ok(name.len())
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sequential_gets_are_distinct() {
        let pool = IdPool::new();
        let ids: Vec<u64> = (0..5).map(|_| pool.get()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pool_prefers_recycled_ids() {
        let pool = IdPool::new();
        let a = pool.get();
        let _b = pool.get();
        pool.put(a);
        assert_eq!(pool.get(), a);
        assert_eq!(pool.get(), 2);
    }

    #[test]
    fn test_pool_reserve_skips_id() {
        let pool = IdPool::new();
        pool.reserve(0);
        pool.reserve(7);
        let ids: Vec<u64> = (0..3).map(|_| pool.get()).collect();
        assert!(!ids.contains(&0));
        assert!(!ids.contains(&7));
    }

    #[test]
    fn test_pool_reserve_drops_freed_id() {
        let pool = IdPool::new();
        let a = pool.get();
        pool.put(a);
        pool.reserve(a);
        assert_ne!(pool.get(), a);
    }
}
