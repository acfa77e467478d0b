use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "spawnfs")]
#[command(about = "Expose remote compute processes as a synthetic filesystem")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Restore leftover remotes and serve the control tree")]
    Serve {
        #[arg(long, help = "Directory where remote filesystems are mounted")]
        mount_dir: Option<PathBuf>,

        #[arg(long, help = "Directory where the control tree is exported")]
        export_dir: Option<PathBuf>,

        #[arg(long, help = "Spawner command launched per remote")]
        spawner: Option<String>,

        #[arg(long, help = "Spawn sequence timeout in seconds")]
        timeout: Option<u64>,
    },
    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    #[command(about = "Diagnose common issues and system state")]
    Doctor,
    #[command(about = "Clean up mounts left behind by crashed servers")]
    Cleanup {
        #[arg(long, help = "Unmount stale mounts under the mount directory")]
        stale: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    #[command(about = "Show current configuration values")]
    Show,
    #[command(about = "Show config file path")]
    Path,
}
