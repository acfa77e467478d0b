mod common;

use common::{read_entry, wait_until, write_and_close, FakeMounter, FakeSpawner};
use spawnfs::{SpawnedProcess, Srv, SpawnfsError};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

const TIMEOUT: Duration = Duration::from_secs(10);

fn new_srv(mount_root: &Path, spawner: Arc<FakeSpawner>, mounter: Arc<FakeMounter>) -> Srv {
    Srv::new(
        mount_root,
        spawner,
        mounter,
        tokio::runtime::Handle::current(),
        TIMEOUT,
    )
    .expect("new srv")
}

fn read_clone(srv: &Srv) -> String {
    let clone = srv.tree().open("/clone").expect("clone present");
    let mut handle = clone.open().expect("open clone");
    let mut buf = [0u8; 32];
    let n = handle.read(&mut buf).expect("read clone");
    String::from_utf8(buf[..n].to_vec()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clone_allocates_sequential_ids() {
    let tmp = tempfile::tempdir().unwrap();
    let srv = new_srv(tmp.path(), FakeSpawner::new(), FakeMounter::new());

    assert_eq!(read_clone(&srv), "0");
    assert_eq!(read_clone(&srv), "1");

    // Each allocated remote is a subtree under the root.
    let tree = srv.tree();
    assert!(tree.open("/0/spawn").is_ok());
    assert!(tree.open("/1/err").is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clone_read_is_single_shot() {
    let tmp = tempfile::tempdir().unwrap();
    let srv = new_srv(tmp.path(), FakeSpawner::new(), FakeMounter::new());

    let clone = srv.tree().open("/clone").unwrap();
    let mut handle = clone.open().unwrap();
    let mut buf = [0u8; 32];
    assert_eq!(handle.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'0');
    // Exactly one read yields exactly one id, then end-of-stream.
    assert_eq!(handle.read(&mut buf).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clone_short_buffer_refunds_id() {
    let tmp = tempfile::tempdir().unwrap();
    let srv = new_srv(tmp.path(), FakeSpawner::new(), FakeMounter::new());

    let clone = srv.tree().open("/clone").unwrap();
    let mut handle = clone.open().unwrap();
    let mut empty = [0u8; 0];
    assert!(matches!(
        handle.read(&mut empty),
        Err(SpawnfsError::ShortBuffer(_))
    ));

    // The id went back to the pool; a retry with a larger buffer gets it.
    let mut buf = [0u8; 32];
    let n = handle.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_spawn_close_and_id_reuse() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = FakeSpawner::new();
    let mounter = FakeMounter::new();
    let srv = new_srv(tmp.path(), spawner.clone(), mounter.clone());
    let tree = srv.tree();

    assert_eq!(read_clone(&srv), "0");
    write_and_close(tree.open("/0/spawn").unwrap(), b"payload");

    // Eventually the mirror turns non-empty and the descriptor is persisted.
    assert!(wait_until(|| tree.open("/0/mirror/spawned").is_ok()).await);
    let descriptor = read_entry(tree.open("/0/mirror/spawned").unwrap()).await;
    let proc = SpawnedProcess::from_descriptor(&descriptor).unwrap();
    assert_eq!(proc.id, 0);

    let state = String::from_utf8(read_entry(tree.open("/0/state").unwrap()).await).unwrap();
    assert!(state.contains("5/5 remote process info encoded & saved"));

    // Closing removes the subtree and recycles the id.
    srv.close_remote("0").unwrap();
    assert!(matches!(tree.open("/0"), Err(SpawnfsError::NotExist(_))));
    assert_eq!(spawner.killed_ids(), vec![0]);
    assert_eq!(read_clone(&srv), "0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_spawn_keeps_subtree_until_closed() {
    let tmp = tempfile::tempdir().unwrap();
    let srv = new_srv(tmp.path(), FakeSpawner::failing(), FakeMounter::new());
    let tree = srv.tree();

    assert_eq!(read_clone(&srv), "0");
    write_and_close(tree.open("/0/spawn").unwrap(), b"payload");

    let err = String::from_utf8(read_entry(tree.open("/0/err").unwrap()).await).unwrap();
    assert!(err.contains("Spawn failed"));

    // The remote stays listed so clients can read err; the mirror is empty.
    let mirror = tree.open("/0/mirror").unwrap().as_dir().unwrap();
    assert!(mirror.list().is_empty());
    assert!(tree.open("/0").is_ok());

    srv.close_remote("0").unwrap();
    assert!(tree.open("/0").is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restore_leftovers_rebuilds_remotes() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = FakeSpawner::new();
    let mounter = FakeMounter::new();

    // A leftover mount from a previous server run: a directory named by id
    // with a persisted descriptor inside.
    let leftover = tmp.path().join("3");
    fs::create_dir_all(&leftover).unwrap();
    let proc = SpawnedProcess {
        addr: "10.0.0.9:564".to_string(),
        id: 3,
        backend: "fake".to_string(),
        pid: None,
        started: Utc::now(),
    };
    fs::write(leftover.join("spawned"), proc.descriptor().unwrap()).unwrap();

    let srv = new_srv(tmp.path(), spawner.clone(), mounter.clone());
    assert_eq!(srv.restore_leftovers(spawner, mounter), 1);

    let tree = srv.tree();
    assert!(tree.open("/3/mirror").is_ok());

    // The restored id is reserved: fresh allocations skip 3.
    let mut issued = Vec::new();
    for _ in 0..4 {
        issued.push(read_clone(&srv));
    }
    assert!(!issued.contains(&"3".to_string()));
    issued.sort();
    issued.dedup();
    assert_eq!(issued.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restore_failure_is_skipped_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let spawner = FakeSpawner::new();
    let mounter = FakeMounter::new();

    let broken = tmp.path().join("9");
    fs::create_dir_all(&broken).unwrap();
    fs::write(broken.join("spawned"), b"not json").unwrap();

    let srv = new_srv(tmp.path(), spawner.clone(), mounter.clone());
    assert_eq!(srv.restore_leftovers(spawner, mounter), 0);

    // Startup survives; allocation still works.
    assert_eq!(read_clone(&srv), "0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_server_on_same_root_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let _srv = new_srv(tmp.path(), FakeSpawner::new(), FakeMounter::new());

    let second = Srv::new(
        tmp.path(),
        FakeSpawner::new(),
        FakeMounter::new(),
        tokio::runtime::Handle::current(),
        TIMEOUT,
    );
    assert!(matches!(second, Err(SpawnfsError::Config(_))));
}
