use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, SpawnfsError};

/// The capability that attaches and detaches a remote filesystem at a local
/// path. The core removes the path tree after a successful unmount.
pub trait Mounter: Send + Sync {
    fn mount(&self, addr: &str, path: &Path) -> Result<()>;
    fn unmount(&self, path: &Path) -> Result<()>;
}

/// Mounter shelling out to the platform mount binaries: `mount -t 9p` on
/// Linux, `9pfuse` on macOS. Every operation validates that the target stays
/// within the configured mount root, so a manipulated config cannot unmount
/// arbitrary filesystem locations.
pub struct ShellMounter {
    mount_root: PathBuf,
}

impl ShellMounter {
    pub fn new(mount_root: &Path) -> ShellMounter {
        ShellMounter {
            mount_root: mount_root.to_path_buf(),
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let canonical_root = self.mount_root.canonicalize().map_err(|e| {
            SpawnfsError::Mount(format!(
                "resolve mount root {}: {}",
                self.mount_root.display(),
                e
            ))
        })?;
        let canonical_path = path.canonicalize().map_err(|e| {
            SpawnfsError::Mount(format!("resolve mount path {}: {}", path.display(), e))
        })?;

        if !canonical_path.starts_with(&canonical_root) {
            return Err(SpawnfsError::Mount(format!(
                "{} is not within mount root {}",
                canonical_path.display(),
                canonical_root.display()
            )));
        }
        Ok(())
    }
}

impl Mounter for ShellMounter {
    fn mount(&self, addr: &str, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .map_err(|e| SpawnfsError::Mount(format!("create {}: {}", path.display(), e)))?;
        self.validate(path)?;

        let status = if cfg!(target_os = "macos") {
            Command::new("9pfuse").arg(addr).arg(path).status()
        } else {
            let (host, port) = addr.split_once(':').unwrap_or((addr, "564"));
            Command::new("mount")
                .args(["-t", "9p", "-o"])
                .arg(format!("trans=tcp,port={}", port))
                .arg(host)
                .arg(path)
                .status()
        };

        match status {
            Ok(s) if s.success() => {
                tracing::info!("mounted {} at {}", addr, path.display());
                Ok(())
            }
            Ok(s) => Err(SpawnfsError::Mount(format!(
                "mount {} at {}: exit {}",
                addr,
                path.display(),
                s
            ))),
            Err(e) => Err(SpawnfsError::Mount(format!("run mount command: {}", e))),
        }
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        self.validate(path)
            .map_err(|e| SpawnfsError::Unmount(e.to_string()))?;

        let status = if cfg!(target_os = "macos") {
            Command::new("diskutil")
                .args(["unmount", "force"])
                .arg(path)
                .status()
        } else {
            Command::new("umount").arg(path).status()
        };

        match status {
            Ok(s) if s.success() => {
                tracing::info!("unmounted {}", path.display());
                Ok(())
            }
            Ok(s) => Err(SpawnfsError::Unmount(format!(
                "unmount {}: exit {}",
                path.display(),
                s
            ))),
            Err(e) => Err(SpawnfsError::Unmount(format!(
                "run unmount command: {}",
                e
            ))),
        }
    }
}

/// Best-effort sweep of mounts left behind by a crashed server. Scans the
/// mount table for paths under `mount_root` and tries to unmount each.
pub fn sweep_stale_mounts(mounter: &dyn Mounter, mount_root: &Path) {
    let output = match Command::new("mount").output() {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!("failed to run mount command: {}", e);
            return;
        }
    };

    let table = String::from_utf8_lossy(&output.stdout);
    let mount_re = regex::Regex::new(r" on (\S+) ").unwrap();
    let root = mount_root.to_string_lossy();

    let stale: Vec<PathBuf> = table
        .lines()
        .filter_map(|line| mount_re.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| PathBuf::from(m.as_str()))
        .filter(|p| p.starts_with(root.as_ref()))
        .collect();

    if stale.is_empty() {
        tracing::debug!("no stale mounts under {}", mount_root.display());
        return;
    }

    tracing::info!("found {} stale mount(s)", stale.len());
    for path in &stale {
        match mounter.unmount(path) {
            Ok(()) => {
                fs::remove_dir_all(path).ok();
                tracing::info!("unmounted stale mount {}", path.display());
            }
            Err(e) => tracing::warn!("failed to unmount {}: {}", path.display(), e),
        }
    }
}
