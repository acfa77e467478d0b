pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod export;
pub mod fs;
pub mod mount;
pub mod remote;
pub mod server;
pub mod spawner;

pub use config::expand_tilde;
pub use config::get_config_path;
pub use config::get_export_dir;
pub use config::get_mount_dir;
pub use config::load_config;
pub use config::save_config;
pub use config::Config;

pub use error::{Result, SpawnfsError};

pub use fs::{Broadcast, Dir, Entry, Handle, Metadata, Plumber, ReadFn, Tree};

pub use mount::{Mounter, ShellMounter};
pub use remote::Remote;
pub use server::{IdPool, Srv};
pub use spawner::{CommandSpawner, SpawnedProcess, Spawner};
