use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{Result, SpawnfsError};

/// Descriptor of a launched remote process. Persisted as JSON to the
/// `spawned` file under the mount and read back during restore; the core
/// treats `addr` as opaque beyond handing it to the mounter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnedProcess {
    pub addr: String,
    pub id: u64,
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    pub started: DateTime<Utc>,
}

impl SpawnedProcess {
    pub fn descriptor(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_descriptor(bytes: &[u8]) -> Result<SpawnedProcess> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The capability that starts and kills remote compute processes. Calls
/// block; the lifecycle task wraps them in `spawn_blocking`.
pub trait Spawner: Send + Sync {
    /// Launch a remote process for `id`, feeding it the plumbed input.
    /// Reports the network address the process serves on.
    fn spawn(&self, input: &[u8], id: u64) -> Result<SpawnedProcess>;

    fn kill(&self, proc: &SpawnedProcess) -> Result<()>;
}

const KILL_GRACE: Duration = Duration::from_secs(2);

/// Reference backend: launches a configured local command per remote. The
/// command receives the plumbed input on stdin and the remote id in
/// SPAWNFS_REMOTE_ID, and must print the address it serves on as its first
/// stdout line, then keep running.
pub struct CommandSpawner {
    program: String,
    args: Vec<String>,
}

impl CommandSpawner {
    pub fn new(program: &str, args: &[String]) -> CommandSpawner {
        CommandSpawner {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }
}

impl Spawner for CommandSpawner {
    fn spawn(&self, input: &[u8], id: u64) -> Result<SpawnedProcess> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("SPAWNFS_REMOTE_ID", id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SpawnfsError::Spawn(format!("launch {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(input) {
                let _ = child.kill();
                return Err(SpawnfsError::Spawn(format!("write input: {}", e)));
            }
            // Dropping stdin closes the pipe so the child sees end of input.
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        let mut addr = String::new();
        if let Err(e) = BufReader::new(stdout).read_line(&mut addr) {
            let _ = child.kill();
            return Err(SpawnfsError::Spawn(format!("read address: {}", e)));
        }
        let addr = addr.trim().to_string();
        if addr.is_empty() {
            let _ = child.kill();
            return Err(SpawnfsError::Spawn(
                "process exited without reporting an address".to_string(),
            ));
        }

        tracing::info!("spawned {} (pid {}) @ {}", self.program, child.id(), addr);
        Ok(SpawnedProcess {
            addr,
            id,
            backend: "command".to_string(),
            pid: Some(child.id() as i32),
            started: Utc::now(),
        })
    }

    fn kill(&self, proc: &SpawnedProcess) -> Result<()> {
        let Some(raw) = proc.pid else {
            return Err(SpawnfsError::Spawn(
                "descriptor carries no pid to kill".to_string(),
            ));
        };
        let pid = Pid::from_raw(raw);

        if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
            // ESRCH means the process is already gone, which is fine.
            if e != nix::errno::Errno::ESRCH {
                return Err(SpawnfsError::Spawn(format!("kill pid {}: {}", raw, e)));
            }
            return Ok(());
        }

        // Reap the child so it does not linger as a zombie. Bounded wait; a
        // process ignoring SIGTERM is left to the OS.
        let deadline = Instant::now() + KILL_GRACE;
        loop {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {
                    if Instant::now() >= deadline {
                        tracing::warn!("pid {} did not exit within grace period", raw);
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Ok(_) => return Ok(()),
                Err(_) => return Ok(()),
            }
        }
    }
}
