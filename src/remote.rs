use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SpawnfsError};
use crate::fs::{Broadcast, Dir, Entry, Handle, Metadata, Plumber};
use crate::mount::Mounter;
use crate::spawner::{SpawnedProcess, Spawner};

const STAGE_TOTAL: u32 = 5;

type DoneCallback = Box<dyn FnOnce() + Send>;

/// Shared between the lifecycle task and `close`. Acquisitions are recorded
/// here before each stage returns, so teardown is reachable on every exit
/// path: `close` or the deadline flips `aborted` and releases what was
/// recorded, and a stage completing after abort releases its own acquisition
/// immediately.
struct ProcState {
    aborted: bool,
    pending_proc: Option<SpawnedProcess>,
    pending_mounted: bool,
    proc: Option<SpawnedProcess>,
}

/// One spawned or restored remote process, represented as a directory
/// subtree: the `spawn`/`err`/`state` control files plus a disk-backed
/// `mirror` of the mounted content.
pub struct Remote {
    name: String,
    dir: Arc<Dir>,
    mount_root: PathBuf,
    spawner: Arc<dyn Spawner>,
    mounter: Arc<dyn Mounter>,
    state: Arc<Mutex<ProcState>>,
    done: Mutex<Option<DoneCallback>>,
}

impl Remote {
    /// Build a fresh remote named `name` under `mount_root`. Fails with
    /// `AlreadyExists` when the local mount path already has disk content —
    /// that remote should have been restored instead. Residual empty paths
    /// are cleared.
    ///
    /// Writing to the `spawn` file and closing it launches the remote: the
    /// trigger hands the payload to a detached lifecycle task on `handle`
    /// and reports plumbed immediately; the task's own outcome reaches
    /// clients through `err` and `state`, which close when it finishes.
    pub fn new(
        mount_root: &Path,
        name: &str,
        spawner: Arc<dyn Spawner>,
        mounter: Arc<dyn Mounter>,
        id: u64,
        handle: tokio::runtime::Handle,
        timeout: Duration,
    ) -> Result<Arc<Remote>> {
        let path = mount_root.join(name);
        if path.is_file() || (path.is_dir() && fs::read_dir(&path)?.next().is_some()) {
            return Err(SpawnfsError::AlreadyExists(path));
        }
        fs::remove_dir_all(&path).ok();

        let errfile = Broadcast::new("err");
        let statefile = Broadcast::new("state");
        let state = Arc::new(Mutex::new(ProcState {
            aborted: false,
            pending_proc: None,
            pending_mounted: false,
            proc: None,
        }));

        let spawn = {
            let spawner = spawner.clone();
            let mounter = mounter.clone();
            let errfile = errfile.clone();
            let statefile = statefile.clone();
            let state = state.clone();
            let path = path.clone();
            Plumber::new(
                "spawn",
                Box::new(move |p| {
                    let input = p.contents();
                    let spawner = spawner.clone();
                    let mounter = mounter.clone();
                    let errfile = errfile.clone();
                    let statefile = statefile.clone();
                    let state = state.clone();
                    let path = path.clone();
                    handle.spawn(async move {
                        run_spawn_sequence(
                            input, id, spawner, mounter, path, &errfile, &statefile, state,
                            timeout,
                        )
                        .await;
                        errfile.close();
                        statefile.close();
                    });
                    true
                }),
            )
        };

        let mirror = Dir::from_disk("mirror", &path);
        let dir = Dir::new(
            name,
            vec![spawn as Arc<dyn Entry>, errfile, statefile, mirror],
        );

        Ok(Arc::new(Remote {
            name: name.to_string(),
            dir,
            mount_root: mount_root.to_path_buf(),
            spawner,
            mounter,
            state,
            done: Mutex::new(None),
        }))
    }

    /// Reconstruct a remote already believed to be mounted and running, used
    /// at startup recovery. Mounts the descriptor's address and builds only
    /// the mirror — the control files belong to the past. Discarding a
    /// restored remote without closing it kills nothing.
    pub fn restore(
        mount_root: &Path,
        name: &str,
        spawner: Arc<dyn Spawner>,
        mounter: Arc<dyn Mounter>,
        proc: SpawnedProcess,
    ) -> Result<Arc<Remote>> {
        let path = mount_root.join(name);
        mounter.mount(&proc.addr, &path)?;

        let mirror = Dir::from_disk("mirror", &path);
        let dir = Dir::new(name, vec![mirror as Arc<dyn Entry>]);

        Ok(Arc::new(Remote {
            name: name.to_string(),
            dir,
            mount_root: mount_root.to_path_buf(),
            spawner,
            mounter,
            state: Arc::new(Mutex::new(ProcState {
                aborted: false,
                pending_proc: None,
                pending_mounted: true,
                proc: Some(proc),
            })),
            done: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> Arc<Dir> {
        self.dir.clone()
    }

    pub fn running(&self) -> bool {
        self.state.lock().proc.is_some()
    }

    /// Invoked after teardown when the remote is closed.
    pub fn set_done(&self, done: DoneCallback) {
        *self.done.lock() = Some(done);
    }

    fn mount_path(&self) -> PathBuf {
        self.mount_root.join(&self.name)
    }

    /// Tear the remote down: unmount (hard error, propagated) and kill the
    /// process if one was recorded, then unconditionally empty the subtree
    /// and fire the completion callback. A close racing an in-flight spawn
    /// marks the attempt aborted, so the lifecycle task releases whatever it
    /// acquires afterwards.
    pub fn close(&self) -> Result<()> {
        {
            let mut st = self.state.lock();
            st.aborted = true;
            if let Some(proc) = st.proc.take() {
                let path = self.mount_path();
                if let Err(e) = self.mounter.unmount(&path) {
                    st.proc = Some(proc);
                    return Err(e);
                }
                fs::remove_dir_all(&path).ok();
                st.pending_mounted = false;
                if let Err(e) = self.spawner.kill(&proc) {
                    st.proc = Some(proc);
                    return Err(e);
                }
            }
        }

        self.dir.close();
        if let Some(done) = self.done.lock().take() {
            done();
        }
        Ok(())
    }
}

impl Entry for Remote {
    fn stat(&self) -> Result<Metadata> {
        self.dir.stat()
    }

    fn open(self: Arc<Self>) -> Result<Box<dyn Handle>> {
        self.dir.clone().open()
    }

    fn as_dir(self: Arc<Self>) -> Option<Arc<Dir>> {
        Some(self.dir.clone())
    }
}

fn report_progress(statefile: &Broadcast, stage: u32, msg: &str) {
    let _ = statefile.append_line(&format!("{}/{} {}", stage, STAGE_TOTAL, msg));
}

/// Release resources acquired by an attempt that failed, timed out, or was
/// aborted. Only what was actually recorded is unwound; unmount and kill
/// failures here are logged, not propagated, since the attempt is already
/// being reported as failed.
fn release_acquired(
    spawner: &Arc<dyn Spawner>,
    mounter: &Arc<dyn Mounter>,
    path: &Path,
    state: &Arc<Mutex<ProcState>>,
) {
    let (proc, mounted) = {
        let mut st = state.lock();
        st.aborted = true;
        let mounted = st.pending_mounted;
        st.pending_mounted = false;
        (st.pending_proc.take(), mounted)
    };

    if mounted {
        if let Err(e) = mounter.unmount(path) {
            tracing::warn!("cleanup unmount {}: {}", path.display(), e);
        }
        fs::remove_dir_all(path).ok();
    }
    if let Some(proc) = proc {
        if let Err(e) = spawner.kill(&proc) {
            tracing::warn!("cleanup kill pid {:?}: {}", proc.pid, e);
        }
    }
}

/// The spawn-and-mount sequence: spawn the remote process, mount its
/// filesystem at the local path, persist the spawn descriptor under the
/// mount, then record the running process. Each stage reports progress to
/// `state`; a failure reports to `err` and unwinds only the resources
/// acquired so far. The whole sequence is bounded by `timeout`.
#[allow(clippy::too_many_arguments)]
async fn run_spawn_sequence(
    input: Vec<u8>,
    id: u64,
    spawner: Arc<dyn Spawner>,
    mounter: Arc<dyn Mounter>,
    path: PathBuf,
    errfile: &Broadcast,
    statefile: &Broadcast,
    state: Arc<Mutex<ProcState>>,
    timeout: Duration,
) {
    let secs = timeout.as_secs();

    let outcome = tokio::time::timeout(timeout, async {
        report_progress(statefile, 1, "spawning remote process");
        let spawned = {
            let spawner = spawner.clone();
            let state = state.clone();
            tokio::task::spawn_blocking(move || -> Result<SpawnedProcess> {
                let proc = spawner.spawn(&input, id)?;
                let mut st = state.lock();
                if st.aborted {
                    drop(st);
                    let _ = spawner.kill(&proc);
                    return Err(SpawnfsError::Timeout(secs));
                }
                st.pending_proc = Some(proc.clone());
                Ok(proc)
            })
            .await
            .map_err(|e| SpawnfsError::Spawn(format!("task join: {}", e)))??
        };
        report_progress(
            statefile,
            2,
            &format!("remote process spawned @ {}", spawned.addr),
        );

        {
            let mounter = mounter.clone();
            let state = state.clone();
            let addr = spawned.addr.clone();
            let path = path.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                mounter.mount(&addr, &path)?;
                let mut st = state.lock();
                if st.aborted {
                    drop(st);
                    if let Err(e) = mounter.unmount(&path) {
                        tracing::warn!("cleanup unmount {}: {}", path.display(), e);
                    }
                    fs::remove_dir_all(&path).ok();
                    return Err(SpawnfsError::Timeout(secs));
                }
                st.pending_mounted = true;
                Ok(())
            })
            .await
            .map_err(|e| SpawnfsError::Mount(format!("task join: {}", e)))??
        }
        report_progress(
            statefile,
            3,
            &format!("remote process mounted @ {}", path.display()),
        );

        report_progress(
            statefile,
            4,
            &format!("storing spawn information at {}", path.display()),
        );
        {
            let descriptor = spawned.descriptor()?;
            let path = path.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                fs::write(path.join("spawned"), descriptor)
                    .map_err(|e| SpawnfsError::Persist(e.to_string()))
            })
            .await
            .map_err(|e| SpawnfsError::Persist(format!("task join: {}", e)))??
        }

        {
            let mut st = state.lock();
            if st.aborted {
                return Err(SpawnfsError::Timeout(secs));
            }
            st.pending_proc = None;
            st.pending_mounted = false;
            st.proc = Some(spawned);
        }
        report_progress(statefile, 5, "remote process info encoded & saved");
        Ok(())
    })
    .await;

    match outcome {
        Ok(Ok(())) => {
            tracing::info!("remote {} running, mirror at {}", id, path.display());
        }
        Ok(Err(e)) => {
            tracing::warn!("remote {} spawn sequence failed: {}", id, e);
            let _ = errfile.append_line(&e.to_string());
            release_acquired(&spawner, &mounter, &path, &state);
        }
        Err(_elapsed) => {
            let e = SpawnfsError::Timeout(secs);
            tracing::warn!("remote {} spawn sequence: {}", id, e);
            let _ = errfile.append_line(&e.to_string());
            release_acquired(&spawner, &mounter, &path, &state);
        }
    }
}
