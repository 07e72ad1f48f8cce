use autofix_workspace::{BackupStore, WorkspaceLock, LOCK_FILE};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

#[test]
fn full_rollback_replaces_workspace_contents() {
    let store_dir = tempfile::tempdir().unwrap();
    let ws = tempfile::tempdir().unwrap();
    write(ws.path(), "src/app.py", "import os\npassword = 'x'\n");
    write(ws.path(), "src/util.py", "def f(): pass\n");

    let store = BackupStore::open(store_dir.path(), 5).unwrap();
    let backup = store.create_backup(ws.path()).unwrap().info;

    write(ws.path(), "src/app.py", "import os\npassword = os.environ['P']\n");
    fs::remove_file(ws.path().join("src/util.py")).unwrap();
    write(ws.path(), "src/generated.py", "x = 1\n");

    let _lock = WorkspaceLock::acquire(ws.path()).unwrap();
    let report = store.rollback(&backup.name, ws.path(), None).unwrap();

    assert_eq!(report.restored, 2);
    assert_eq!(report.removed, 1);
    assert_eq!(read(ws.path(), "src/app.py"), "import os\npassword = 'x'\n");
    assert_eq!(read(ws.path(), "src/util.py"), "def f(): pass\n");
    assert!(!ws.path().join("src/generated.py").exists());
    assert!(ws.path().join(LOCK_FILE).exists(), "rollback must not remove the lock");
}

#[test]
fn retention_prunes_oldest_and_collects_orphans() {
    let store_dir = tempfile::tempdir().unwrap();
    let ws = tempfile::tempdir().unwrap();
    let store = BackupStore::open(store_dir.path(), 2).unwrap();

    let mut names = Vec::new();
    for version in 0..4 {
        write(ws.path(), "main.rs", &format!("fn main() {{ println!(\"{version}\"); }}"));
        let report = store.create_backup(ws.path()).unwrap();
        names.push(report.info.name);
        std::thread::sleep(std::time::Duration::from_millis(15));
    }

    let listed: Vec<_> = store
        .list_backups()
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(listed, vec![names[3].clone(), names[2].clone()]);

    let blobs = fs::read_dir(store_dir.path().join("objects")).unwrap().count();
    assert_eq!(blobs, 2, "blobs of pruned backups must be collected");

    assert_eq!(store.latest().unwrap().unwrap().name, names[3]);
}

#[test]
fn retention_follows_modification_time_not_creation_order() {
    let store_dir = tempfile::tempdir().unwrap();
    let ws = tempfile::tempdir().unwrap();
    let store = BackupStore::open(store_dir.path(), 2).unwrap();

    write(ws.path(), "lib.rs", "v1");
    let first = store.create_backup(ws.path()).unwrap().info.name;
    std::thread::sleep(std::time::Duration::from_millis(20));
    write(ws.path(), "lib.rs", "v2");
    let second = store.create_backup(ws.path()).unwrap().info.name;
    std::thread::sleep(std::time::Duration::from_millis(20));

    // rewriting the first manifest makes it the most recently modified
    let manifest = store_dir.path().join(format!("{first}.json"));
    let bytes = fs::read(&manifest).unwrap();
    fs::write(&manifest, bytes).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));

    write(ws.path(), "lib.rs", "v3");
    let third = store.create_backup(ws.path()).unwrap();

    assert_eq!(third.pruned, vec![second.clone()]);
    let mut kept: Vec<_> = store
        .list_backups()
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    kept.sort();
    let mut expected = vec![first.clone(), third.info.name.clone()];
    expected.sort();
    assert_eq!(kept, expected);

    let restore = tempfile::tempdir().unwrap();
    store.rollback(&first, restore.path(), None).unwrap();
    assert_eq!(read(restore.path(), "lib.rs"), "v1");
}

#[test]
fn concurrent_backups_on_one_store_never_lose_blobs() {
    let store_dir = tempfile::tempdir().unwrap();
    let workspaces: Vec<_> = (0..2)
        .map(|w| {
            let ws = tempfile::tempdir().unwrap();
            write(ws.path(), "shared.py", "common = 1\n");
            write(ws.path(), "own.py", &format!("worker = {w}\n"));
            ws
        })
        .collect();

    std::thread::scope(|scope| {
        for (w, ws) in workspaces.iter().enumerate() {
            let root = store_dir.path();
            scope.spawn(move || {
                let store = BackupStore::open(root, 1).unwrap();
                for round in 0..30 {
                    write(ws.path(), "own.py", &format!("worker = {w}\nround = {round}\n"));
                    let report = store
                        .create_backup(ws.path())
                        .unwrap_or_else(|e| panic!("worker {w} round {round}: {e}"));
                    assert_eq!(report.info.file_count, 2);
                }
            });
        }
    });

    let store = BackupStore::open(store_dir.path(), 1).unwrap();
    let backups = store.list_backups().unwrap();
    assert_eq!(backups.len(), 1);

    let restore = tempfile::tempdir().unwrap();
    store.rollback(&backups[0].name, restore.path(), None).unwrap();
    assert_eq!(read(restore.path(), "shared.py"), "common = 1\n");
    assert!(read(restore.path(), "own.py").contains("round = 29"));
}

#[test]
fn removing_a_backup_keeps_shared_blobs() {
    let store_dir = tempfile::tempdir().unwrap();
    let ws = tempfile::tempdir().unwrap();
    let store = BackupStore::open(store_dir.path(), 0).unwrap();

    write(ws.path(), "shared.py", "shared");
    write(ws.path(), "only_first.py", "first");
    let first = store.create_backup(ws.path()).unwrap().info.name;
    fs::remove_file(ws.path().join("only_first.py")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = store.create_backup(ws.path()).unwrap().info.name;

    let gc = store.remove_backup(&first).unwrap();
    assert_eq!(gc.blobs_removed, 1);

    let restore = tempfile::tempdir().unwrap();
    store.rollback(&second, restore.path(), None).unwrap();
    assert_eq!(read(restore.path(), "shared.py"), "shared");
}
