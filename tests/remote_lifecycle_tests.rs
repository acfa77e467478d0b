mod common;

use common::{names_of, read_entry, wait_until, write_and_close, FakeMounter, FakeSpawner};
use spawnfs::{Remote, SpawnedProcess, SpawnfsError};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

const TIMEOUT: Duration = Duration::from_secs(10);

fn new_remote(
    mount_root: &std::path::Path,
    name: &str,
    spawner: Arc<FakeSpawner>,
    mounter: Arc<FakeMounter>,
) -> Arc<Remote> {
    Remote::new(
        mount_root,
        name,
        spawner,
        mounter,
        name.parse().unwrap(),
        tokio::runtime::Handle::current(),
        TIMEOUT,
    )
    .expect("new remote")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawn_sequence_success() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = FakeSpawner::new();
    let mounter = FakeMounter::new();
    let remote = new_remote(tmp.path(), "0", spawner.clone(), mounter.clone());

    let spawn = remote.dir().find("spawn").unwrap();
    write_and_close(spawn, b"payload");

    assert!(wait_until(|| remote.running()).await);
    assert_eq!(spawner.inputs.lock().as_slice(), &[b"payload".to_vec()]);

    // The state stream reports every stage and ends in success.
    let state = String::from_utf8(read_entry(remote.dir().find("state").unwrap()).await).unwrap();
    assert!(state.starts_with("1/5 spawning remote process"));
    assert!(state.contains("2/5 remote process spawned @ 10.0.0.1:564"));
    assert!(state.contains("5/5 remote process info encoded & saved"));

    // Nothing went to the error stream.
    assert!(read_entry(remote.dir().find("err").unwrap()).await.is_empty());

    // The mirror reflects the mounted content plus the persisted descriptor.
    let mirror = remote.dir().find("mirror").unwrap().as_dir().unwrap();
    let mut listed = names_of(&mirror);
    listed.sort();
    assert_eq!(listed, vec!["motd", "spawned"]);

    let descriptor = fs::read(tmp.path().join("0").join("spawned")).unwrap();
    let proc = SpawnedProcess::from_descriptor(&descriptor).unwrap();
    assert_eq!(proc.addr, "10.0.0.1:564");
    assert_eq!(proc.id, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawn_failure_reports_err_and_leaves_mirror_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = FakeSpawner::failing();
    let mounter = FakeMounter::new();
    let remote = new_remote(tmp.path(), "0", spawner, mounter.clone());

    write_and_close(remote.dir().find("spawn").unwrap(), b"payload");

    let err = String::from_utf8(read_entry(remote.dir().find("err").unwrap()).await).unwrap();
    assert!(err.contains("Spawn failed"));
    assert!(!remote.running());

    // Spawn failed before mounting, so no mount was attempted.
    assert!(mounter.mounts.lock().is_empty());
    let mirror = remote.dir().find("mirror").unwrap().as_dir().unwrap();
    assert!(mirror.list().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mount_failure_kills_spawned_process() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = FakeSpawner::new();
    let mounter = FakeMounter::failing();
    let remote = new_remote(tmp.path(), "0", spawner.clone(), mounter);

    write_and_close(remote.dir().find("spawn").unwrap(), b"payload");

    let err = String::from_utf8(read_entry(remote.dir().find("err").unwrap()).await).unwrap();
    assert!(err.contains("Mount failed"));
    assert!(!remote.running());
    assert_eq!(spawner.killed_ids(), vec![0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_unmounts_kills_and_clears_subtree() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = FakeSpawner::new();
    let mounter = FakeMounter::new();
    let remote = new_remote(tmp.path(), "0", spawner.clone(), mounter.clone());

    let done = Arc::new(AtomicBool::new(false));
    {
        let done = done.clone();
        remote.set_done(Box::new(move || {
            done.store(true, Ordering::SeqCst);
        }));
    }

    write_and_close(remote.dir().find("spawn").unwrap(), b"payload");
    assert!(wait_until(|| remote.running()).await);

    remote.close().unwrap();

    let path = tmp.path().join("0");
    assert_eq!(mounter.unmounted_paths(), vec![path.clone()]);
    assert_eq!(spawner.killed_ids(), vec![0]);
    assert!(!path.exists());
    assert!(remote.dir().list().is_empty());
    assert!(done.load(Ordering::SeqCst));
    assert!(!remote.running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_rejects_leftover_disk_content() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("5");
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("leftover"), b"x").unwrap();

    let result = Remote::new(
        tmp.path(),
        "5",
        FakeSpawner::new(),
        FakeMounter::new(),
        5,
        tokio::runtime::Handle::current(),
        TIMEOUT,
    );
    assert!(matches!(result, Err(SpawnfsError::AlreadyExists(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_racing_spawn_releases_late_process() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = FakeSpawner::slow(Duration::from_millis(200));
    let mounter = FakeMounter::new();
    let remote = new_remote(tmp.path(), "0", spawner.clone(), mounter);

    write_and_close(remote.dir().find("spawn").unwrap(), b"payload");

    // Close while the launcher call is still in flight: there is no process
    // to tear down yet, but the attempt is marked aborted.
    remote.close().unwrap();
    assert!(remote.dir().list().is_empty());

    // The lifecycle task kills the process it spawned after the abort.
    assert!(wait_until(|| spawner.killed_ids() == vec![0]).await);
    assert!(!remote.running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restore_mounts_and_records_process() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = FakeSpawner::new();
    let mounter = FakeMounter::new();
    let proc = SpawnedProcess {
        addr: "10.0.0.9:564".to_string(),
        id: 4,
        backend: "fake".to_string(),
        pid: None,
        started: Utc::now(),
    };

    let remote = Remote::restore(tmp.path(), "4", spawner.clone(), mounter.clone(), proc).unwrap();
    assert!(remote.running());

    // Only the mirror comes back; the control files belong to the past.
    assert_eq!(names_of(&remote.dir()), vec!["mirror"]);
    let mirror = remote.dir().find("mirror").unwrap().as_dir().unwrap();
    assert_eq!(names_of(&mirror), vec!["motd"]);

    remote.close().unwrap();
    assert_eq!(spawner.killed_ids(), vec![4]);
    assert_eq!(mounter.unmounted_paths(), vec![tmp.path().join("4")]);
}
