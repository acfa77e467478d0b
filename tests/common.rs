#![allow(dead_code)]

use chrono::Utc;
use parking_lot::Mutex;
use spawnfs::{Entry, Handle, Mounter, Result, SpawnedProcess, Spawner, SpawnfsError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Launcher double: records inputs and kills, optionally failing or
/// sleeping to widen race windows.
pub struct FakeSpawner {
    pub fail: bool,
    pub delay: Option<Duration>,
    pub inputs: Mutex<Vec<Vec<u8>>>,
    pub killed: Mutex<Vec<u64>>,
}

impl FakeSpawner {
    pub fn new() -> Arc<FakeSpawner> {
        Arc::new(FakeSpawner {
            fail: false,
            delay: None,
            inputs: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<FakeSpawner> {
        Arc::new(FakeSpawner {
            fail: true,
            delay: None,
            inputs: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(delay: Duration) -> Arc<FakeSpawner> {
        Arc::new(FakeSpawner {
            fail: false,
            delay: Some(delay),
            inputs: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
        })
    }

    pub fn killed_ids(&self) -> Vec<u64> {
        self.killed.lock().clone()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, input: &[u8], id: u64) -> Result<SpawnedProcess> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            return Err(SpawnfsError::Spawn("launcher rejected task".to_string()));
        }
        self.inputs.lock().push(input.to_vec());
        Ok(SpawnedProcess {
            addr: format!("10.0.0.{}:564", id + 1),
            id,
            backend: "fake".to_string(),
            pid: None,
            started: Utc::now(),
        })
    }

    fn kill(&self, proc: &SpawnedProcess) -> Result<()> {
        self.killed.lock().push(proc.id);
        Ok(())
    }
}

/// Mounter double: "mounting" materializes a file in the target directory,
/// standing in for the remote's filesystem appearing there.
pub struct FakeMounter {
    pub fail_mount: bool,
    pub mounts: Mutex<Vec<(String, PathBuf)>>,
    pub unmounts: Mutex<Vec<PathBuf>>,
}

impl FakeMounter {
    pub fn new() -> Arc<FakeMounter> {
        Arc::new(FakeMounter {
            fail_mount: false,
            mounts: Mutex::new(Vec::new()),
            unmounts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<FakeMounter> {
        Arc::new(FakeMounter {
            fail_mount: true,
            mounts: Mutex::new(Vec::new()),
            unmounts: Mutex::new(Vec::new()),
        })
    }

    pub fn unmounted_paths(&self) -> Vec<PathBuf> {
        self.unmounts.lock().clone()
    }
}

impl Mounter for FakeMounter {
    fn mount(&self, addr: &str, path: &Path) -> Result<()> {
        if self.fail_mount {
            return Err(SpawnfsError::Mount("no route to remote".to_string()));
        }
        fs::create_dir_all(path)?;
        fs::write(path.join("motd"), format!("served by {}\n", addr))?;
        self.mounts
            .lock()
            .push((addr.to_string(), path.to_path_buf()));
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        self.unmounts.lock().push(path.to_path_buf());
        Ok(())
    }
}

/// Drain a handle to end-of-stream. Blocks, so call it from a blocking
/// context when readers may wait on a broadcast tail.
pub fn read_all(handle: &mut Box<dyn Handle>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = handle.read(&mut buf).expect("read");
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

/// Drain an entry's full content from a worker thread.
pub async fn read_entry(entry: Arc<dyn Entry>) -> Vec<u8> {
    tokio::task::spawn_blocking(move || {
        let mut handle = entry.open().expect("open");
        read_all(&mut handle)
    })
    .await
    .expect("join")
}

/// Write `data` to an entry and close the handle, firing any plumbing.
pub fn write_and_close(entry: Arc<dyn Entry>, data: &[u8]) {
    let mut handle = entry.open().expect("open");
    handle.write(data).expect("write");
    handle.close().expect("close");
}

/// Poll until `pred` holds, up to five seconds.
pub async fn wait_until(pred: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pred()
}

pub fn names_of(dir: &spawnfs::Dir) -> Vec<String> {
    dir.list()
        .iter()
        .filter_map(|e| e.stat().ok().map(|m| m.name))
        .collect()
}
