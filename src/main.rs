use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;
mod commands;
mod config;
mod error;
mod export;
mod fs;
mod mount;
mod remote;
mod server;
mod spawner;

use cli::{Args, Commands};
use error::SpawnfsError;
use mount::{Mounter, ShellMounter};
use server::Srv;
use spawner::{CommandSpawner, Spawner};

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => {
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> error::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("SPAWNFS_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve {
            mount_dir,
            export_dir,
            spawner,
            timeout,
        } => serve(mount_dir, export_dir, spawner, timeout).await,
        Commands::Config { action } => {
            commands::handle_config_command(action)?;
            Ok(0)
        }
        Commands::Doctor => {
            commands::run_doctor()?;
            Ok(0)
        }
        Commands::Cleanup { stale } => {
            commands::cleanup(stale)?;
            Ok(0)
        }
    }
}

async fn serve(
    mount_dir: Option<PathBuf>,
    export_dir: Option<PathBuf>,
    spawner_program: Option<String>,
    timeout_secs: Option<u64>,
) -> error::Result<i32> {
    let cfg = config::load_config()?;
    let mount_dir = match mount_dir {
        Some(dir) => dir,
        None => config::get_mount_dir(&cfg)?,
    };
    let export_dir = match export_dir {
        Some(dir) => dir,
        None => config::get_export_dir(&cfg)?,
    };
    let program = spawner_program.unwrap_or_else(|| cfg.spawner.get_program());
    let timeout = Duration::from_secs(
        timeout_secs.unwrap_or_else(|| cfg.timing.get_spawn_timeout_secs()),
    );

    let spawner: Arc<dyn Spawner> =
        Arc::new(CommandSpawner::new(&program, &cfg.spawner.get_args()));
    let mounter: Arc<dyn Mounter> = Arc::new(ShellMounter::new(&mount_dir));

    let srv = Arc::new(Srv::new(
        &mount_dir,
        spawner.clone(),
        mounter.clone(),
        tokio::runtime::Handle::current(),
        timeout,
    )?);
    srv.restore_leftovers(spawner, mounter);

    println!("Mounting remotes under {}", mount_dir.display());
    println!("Read `clone` under {} to allocate a remote", export_dir.display());

    let serve_task = {
        let srv = srv.clone();
        let export_dir = export_dir.clone();
        tokio::task::spawn_blocking(move || srv.serve(&export_dir))
    };

    tokio::select! {
        result = serve_task => {
            match result {
                Ok(Ok(())) => Ok(0),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(SpawnfsError::Config(format!("serve task: {}", e))),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down, closing live remotes");
            srv.close_all();
            Ok(0)
        }
    }
}
