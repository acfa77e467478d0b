use crate::error::{Result, SpawnfsError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<String>,
}

/// The reference spawner command. It receives the plumbed payload on stdin
/// and must print the address it serves on as its first stdout line.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpawnerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

impl SpawnerConfig {
    pub fn get_program(&self) -> String {
        self.program
            .clone()
            .unwrap_or_else(|| "spawnfs-remote".to_string())
    }

    pub fn get_args(&self) -> Vec<String> {
        self.args.clone().unwrap_or_default()
    }
}

const DEFAULT_SPAWN_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_timeout_secs: Option<u64>,
}

impl TimingConfig {
    pub fn get_spawn_timeout_secs(&self) -> u64 {
        self.spawn_timeout_secs
            .unwrap_or(DEFAULT_SPAWN_TIMEOUT_SECS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub spawner: SpawnerConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

pub fn expand_tilde(path: &str) -> PathBuf {
    let path = path.trim();
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

pub fn get_config_dir() -> Result<PathBuf> {
    if let Ok(config_dir) = std::env::var("SPAWNFS_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    let project_dirs = ProjectDirs::from("com", "spawnfs", "spawnfs")
        .ok_or_else(|| SpawnfsError::Config("Could not determine config directory".to_string()))?;

    Ok(project_dirs.config_dir().to_path_buf())
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

fn get_data_dir() -> Result<PathBuf> {
    if let Ok(data_dir) = std::env::var("SPAWNFS_DATA_DIR") {
        return Ok(PathBuf::from(data_dir));
    }

    let project_dirs = ProjectDirs::from("com", "spawnfs", "spawnfs")
        .ok_or_else(|| SpawnfsError::Config("Could not determine data directory".to_string()))?;

    Ok(project_dirs.data_dir().to_path_buf())
}

/// Where remote filesystems get mounted, one subdirectory per remote id.
pub fn get_mount_dir(config: &Config) -> Result<PathBuf> {
    match &config.paths.mount_dir {
        Some(dir) => Ok(expand_tilde(dir)),
        None => Ok(get_data_dir()?.join("mounts")),
    }
}

/// Where the synthetic tree is exported for clients.
pub fn get_export_dir(config: &Config) -> Result<PathBuf> {
    match &config.paths.export_dir {
        Some(dir) => Ok(expand_tilde(dir)),
        None => Ok(get_data_dir()?.join("export")),
    }
}

pub fn load_config() -> Result<Config> {
    let config_path = get_config_path()?;
    if !config_path.exists() {
        return Ok(Config::default());
    }

    let toml_content = std::fs::read_to_string(&config_path)
        .map_err(|e| SpawnfsError::Config(format!("Failed to read config file: {}", e)))?;

    toml::from_str(&toml_content)
        .map_err(|e| SpawnfsError::Config(format!("Failed to parse config: {}", e)))
}

pub fn save_config(config: &Config) -> Result<()> {
    let config_path = get_config_path()?;
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SpawnfsError::Config(format!("Failed to create config dir: {}", e)))?;
    }
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| SpawnfsError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(&config_path, toml_str)
        .map_err(|e| SpawnfsError::Config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.spawner.get_program(), "spawnfs-remote");
        assert!(config.spawner.get_args().is_empty());
        assert_eq!(config.timing.get_spawn_timeout_secs(), 120);
    }

    #[test]
    fn test_parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
[spawner]
program = "launch-worker"
args = ["--cluster", "default"]

[timing]
spawn_timeout_secs = 30
"#,
        )
        .unwrap();
        assert_eq!(config.spawner.get_program(), "launch-worker");
        assert_eq!(config.spawner.get_args(), vec!["--cluster", "default"]);
        assert_eq!(config.timing.get_spawn_timeout_secs(), 30);
        assert!(config.paths.mount_dir.is_none());
    }

    #[test]
    fn test_expand_tilde() {
        let home = std::env::var("HOME").unwrap();
        assert_eq!(expand_tilde("~/mounts"), PathBuf::from(home).join("mounts"));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }
}
