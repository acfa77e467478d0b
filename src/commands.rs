use crate::cli::ConfigAction;
use crate::config;
use crate::error::Result;
use crate::mount::{sweep_stale_mounts, ShellMounter};

pub fn handle_config_command(action: Option<ConfigAction>) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let cfg = config::load_config()?;
            println!("config file:  {}", config::get_config_path()?.display());
            println!("mount dir:    {}", config::get_mount_dir(&cfg)?.display());
            println!("export dir:   {}", config::get_export_dir(&cfg)?.display());
            println!("spawner:      {}", cfg.spawner.get_program());
            if !cfg.spawner.get_args().is_empty() {
                println!("spawner args: {}", cfg.spawner.get_args().join(" "));
            }
            println!("timeout:      {}s", cfg.timing.get_spawn_timeout_secs());
        }
        ConfigAction::Path => {
            println!("{}", config::get_config_path()?.display());
        }
    }
    Ok(())
}

fn binary_on_path(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|p| p.join(name).is_file()))
        .unwrap_or(false)
}

fn check(ok: bool, label: &str, hint: &str) -> bool {
    if ok {
        println!("  ok: {}", label);
    } else {
        println!("  FAIL: {} ({})", label, hint);
    }
    ok
}

pub fn run_doctor() -> Result<()> {
    println!("spawnfs doctor");

    let mut healthy = true;

    let cfg = match config::load_config() {
        Ok(cfg) => {
            check(true, "config parses", "");
            cfg
        }
        Err(e) => {
            healthy = check(false, "config parses", &e.to_string()) && healthy;
            config::Config::default()
        }
    };

    let mount_dir = config::get_mount_dir(&cfg)?;
    let mount_dir_ok = std::fs::create_dir_all(&mount_dir).is_ok();
    healthy = check(
        mount_dir_ok,
        &format!("mount dir {} writable", mount_dir.display()),
        "check permissions",
    ) && healthy;

    healthy = check(
        binary_on_path("mount") || binary_on_path("9pfuse"),
        "mount binary on PATH",
        "install 9p mount tooling",
    ) && healthy;
    healthy = check(
        binary_on_path("umount") || binary_on_path("diskutil"),
        "unmount binary on PATH",
        "install umount",
    ) && healthy;
    healthy = check(
        binary_on_path("fusermount") || binary_on_path("fusermount3") || cfg!(target_os = "macos"),
        "FUSE tooling present",
        "install fuse3 (or macFUSE on macOS)",
    ) && healthy;

    let program = cfg.spawner.get_program();
    healthy = check(
        binary_on_path(&program) || std::path::Path::new(&program).is_file(),
        &format!("spawner command '{}' found", program),
        "set [spawner] program in config",
    ) && healthy;

    if healthy {
        println!("all checks passed");
    } else {
        println!("some checks failed");
    }
    Ok(())
}

pub fn cleanup(stale: bool) -> Result<()> {
    if !stale {
        println!("nothing to do (pass --stale to unmount leftover mounts)");
        return Ok(());
    }
    let cfg = config::load_config()?;
    let mount_dir = config::get_mount_dir(&cfg)?;
    let mounter = ShellMounter::new(&mount_dir);
    sweep_stale_mounts(&mounter, &mount_dir);
    Ok(())
}
