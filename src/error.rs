use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpawnfsError>;

#[derive(Error, Debug)]
pub enum SpawnfsError {
    #[error("No such file: {0}")]
    NotExist(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Remote exists already at {0}")]
    AlreadyExists(PathBuf),

    #[error("Plumbed already")]
    Sealed,

    #[error("Buffer too small for {0}")]
    ShortBuffer(String),

    #[error("Write exceeds buffer limit of {0} bytes")]
    BufferFull(usize),

    #[error("Not supported")]
    NotSupported,

    #[error("Spawn failed: {0}")]
    Spawn(String),

    #[error("Mount failed: {0}")]
    Mount(String),

    #[error("Unmount failed: {0}")]
    Unmount(String),

    #[error("Persist failed: {0}")]
    Persist(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for SpawnfsError {
    fn from(err: serde_json::Error) -> Self {
        SpawnfsError::Json(err.to_string())
    }
}
