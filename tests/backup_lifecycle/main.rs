//! Black-box lifecycle harness: drives the engine through the public
//! facade the way an operator would, against temporary repositories.

use pgvault::{
    Art, BackupKind, BlockRefTable, Configuration, ForkKey, MasterKey, Orchestrator, Streamer,
    StreamerMode, WorkerPool,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

struct Harness {
    _tmp: tempfile::TempDir,
    config: Arc<Configuration>,
    data_dir: PathBuf,
    out_dir: PathBuf,
}

impl Harness {
    fn new(extra_main: &str, extra_server: &str) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().join("pgdata");
        let out_dir = tmp.path().join("out");
        fs::create_dir_all(&data_dir).unwrap();
        fs::create_dir_all(&out_dir).unwrap();

        let text = format!(
            "[pgvault]\nbase_dir = {}\n{extra_main}\n[primary]\nuser = repl\ndata_dir = {}\n{extra_server}",
            tmp.path().join("repo").display(),
            data_dir.display(),
        );
        let config = Arc::new(Configuration::parse(&text).unwrap());
        Harness {
            _tmp: tmp,
            config,
            data_dir,
            out_dir,
        }
    }

    fn seed(&self) {
        fs::create_dir_all(self.data_dir.join("base/16384")).unwrap();
        fs::write(self.data_dir.join("PG_VERSION"), "17\n").unwrap();
        let relation: Vec<u8> = (0..1024 * 1024).map(|i| (i % 239) as u8).collect();
        fs::write(self.data_dir.join("base/16384/1234"), relation).unwrap();
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.config.clone())
    }
}

fn label_of(outcome: &pgvault::Bag) -> String {
    outcome.get_str("label").unwrap().to_string()
}

#[test]
fn test_full_lifecycle_plain() {
    let harness = Harness::new("", "");
    harness.seed();
    let orchestrator = harness.orchestrator();

    // 1: first backup is full and carries the catalogue trio
    let first = orchestrator.backup("primary", None);
    assert!(first.is_ok(), "{:?}", first.result.err());
    let first_label = label_of(&first.bag);
    let first_dir = harness
        .config
        .base_dir
        .join("primary/backup")
        .join(&first_label);
    for artifact in ["backup_manifest", "backup.sha256", "backup.info"] {
        assert!(first_dir.join(artifact).is_file(), "missing {artifact}");
    }
    let info = pgvault::BackupInfo::load(&first_dir).unwrap();
    assert_eq!(info.kind, BackupKind::Full);

    // 2: mutate one block, take an incremental
    let relation = harness.data_dir.join("base/16384/1234");
    let mut bytes = fs::read(&relation).unwrap();
    bytes[0] ^= 0xFF;
    fs::write(&relation, &bytes).unwrap();

    let second = orchestrator.backup("primary", None);
    assert!(second.is_ok());
    let second_label = label_of(&second.bag);
    let second_dir = harness
        .config
        .base_dir
        .join("primary/backup")
        .join(&second_label);
    let info = pgvault::BackupInfo::load(&second_dir).unwrap();
    assert_eq!(info.kind, BackupKind::Incremental);
    assert_eq!(info.parent.as_deref(), Some(first_label.as_str()));

    // 3: restore newest reproduces the data directory
    let restore = orchestrator.restore("primary", "newest", &harness.out_dir);
    assert!(restore.is_ok(), "{:?}", restore.result.err());
    let restored = harness
        .out_dir
        .join(format!("primary-{second_label}"))
        .join("base/16384/1234");
    assert_eq!(fs::read(&restored).unwrap(), bytes);

    // 4: verify is clean, then catches a flipped byte with the exact path
    assert!(orchestrator.verify("primary", &second_label).is_ok());
    let victim = second_dir.join("data/PG_VERSION");
    fs::write(&victim, "corrupted\n").unwrap();
    let failed = orchestrator.verify("primary", &second_label);
    assert!(!failed.is_ok());
    match failed.bag.get("failures") {
        Some(pgvault::BagValue::StrList(failures)) => {
            assert!(failures.iter().any(|f| f.contains("PG_VERSION")));
        }
        other => panic!("no failures recorded: {other:?}"),
    }

    // 5: deleting the full under a live incremental is refused
    assert!(!orchestrator.delete("primary", &first_label).is_ok());
    assert!(orchestrator.delete("primary", &second_label).is_ok());
    assert!(orchestrator.delete("primary", &first_label).is_ok());
}

#[test]
fn test_retention_expires_old_backups() {
    let harness = Harness::new("", "retention = 1\n");
    harness.seed();
    let orchestrator = harness.orchestrator();

    assert!(orchestrator.backup("primary", None).is_ok());
    // distinct label: labels have second resolution
    std::thread::sleep(std::time::Duration::from_millis(1100));
    fs::write(harness.data_dir.join("PG_VERSION"), "17b\n").unwrap();
    assert!(orchestrator.backup("primary", None).is_ok());

    let backups = orchestrator.list_backups("primary").unwrap();
    assert_eq!(backups.len(), 2);

    // second backup is incremental on the first, so both survive: the
    // parent of a kept incremental is never expired
    let outcome = orchestrator.retention("primary").expect("lock free");
    assert!(outcome.is_ok());
    assert_eq!(orchestrator.list_backups("primary").unwrap().len(), 2);

    // once the chain is flattened to one full, retention trims
    let labels: Vec<String> = orchestrator
        .list_backups("primary")
        .unwrap()
        .into_iter()
        .map(|b| b.label)
        .collect();
    assert!(orchestrator.delete("primary", &labels[1]).is_ok());
    assert!(orchestrator.delete("primary", &labels[0]).is_ok());
    assert!(orchestrator.backup("primary", None).is_ok());
    let outcome = orchestrator.retention("primary").expect("lock free");
    assert!(outcome.is_ok());
    assert_eq!(orchestrator.list_backups("primary").unwrap().len(), 1);
}

#[test]
fn test_archive_artifact_unpacks() {
    let harness = Harness::new("", "");
    harness.seed();
    let orchestrator = harness.orchestrator();

    let backup = orchestrator.backup("primary", None);
    let label = label_of(&backup.bag);
    let archive = orchestrator.archive("primary", &label, &harness.out_dir, None);
    assert!(archive.is_ok());

    let tarfile = harness.out_dir.join(format!("primary-{label}.tar"));
    assert!(tarfile.is_file());
}

#[test]
fn test_streamer_gzip_aes_law() {
    // backup-mode gzip+aes output, decrypted then decompressed, equals
    // the input
    let key = MasterKey::derive(b"lifecycle");
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 7) as u8).collect();

    let dir = tempfile::tempdir().unwrap();
    let encoded_path = dir.path().join("encoded");
    let mut streamer = Streamer::new(
        StreamerMode::Backup,
        pgvault::CompressionKind::Gzip,
        pgvault::EncryptionKind::Aes256Ctr,
        -1,
        Some(&key),
    )
    .unwrap();
    streamer.add_destination(Box::new(pgvault::LocalFile::create(&encoded_path).unwrap()));
    streamer.write(&payload, true).unwrap();
    streamer.finish().unwrap();

    let mut restore = Streamer::new(
        StreamerMode::Restore,
        pgvault::CompressionKind::Gzip,
        pgvault::EncryptionKind::Aes256Ctr,
        -1,
        Some(&key),
    )
    .unwrap();
    let decoded_path = dir.path().join("decoded");
    restore.add_destination(Box::new(pgvault::LocalFile::create(&decoded_path).unwrap()));
    let encoded = fs::read(&encoded_path).unwrap();
    restore.write(&encoded, true).unwrap();
    restore.finish().unwrap();

    assert_eq!(fs::read(&decoded_path).unwrap(), payload);
}

#[test]
fn test_worker_pool_thousand_tasks() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    let pool = WorkerPool::new(4);
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..1000 {
        let counter = counter.clone();
        pool.submit(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }
    assert!(pool.wait_for_idle());
    assert_eq!(counter.load(Ordering::Relaxed), 1000);
}

#[test]
fn test_brt_round_trip_through_facade() {
    let mut table = BlockRefTable::new();
    let key = ForkKey::main(1663, 16384, 1234);
    table.mark_block_modified(key, 0);
    table.mark_block_modified(key, 0);
    let entry = table.get_entry(&key).unwrap();
    assert_eq!(entry.all_blocks(), vec![0]);

    let mut bytes = Vec::new();
    table.serialize(&mut bytes).unwrap();
    let restored = BlockRefTable::deserialize(&mut bytes.as_slice()).unwrap();
    assert_eq!(restored.get_entry(&key).unwrap().all_blocks(), vec![0]);
}

#[test]
fn test_manifest_diff_sets_partition_paths() {
    let dir = tempfile::tempdir().unwrap();
    let old_dir = dir.path().join("old");
    let new_dir = dir.path().join("new");
    for (root, version) in [(&old_dir, "one"), (&new_dir, "two")] {
        fs::create_dir_all(root.join("base")).unwrap();
        fs::write(root.join("shared"), "same").unwrap();
        fs::write(root.join("changed"), version).unwrap();
    }
    fs::write(old_dir.join("only_old"), "x").unwrap();
    fs::write(new_dir.join("only_new"), "y").unwrap();

    let old = pgvault::Manifest::generate(&old_dir, 1).unwrap();
    let new = pgvault::Manifest::generate(&new_dir, 1).unwrap();
    let diff = vault_catalogue::manifest::diff(&old, &new);

    let keys = |art: &Art<_>| -> Vec<String> {
        art.keys()
            .into_iter()
            .map(|k| String::from_utf8(k).unwrap())
            .collect()
    };
    assert_eq!(keys(&diff.deleted), ["only_old"]);
    assert_eq!(keys(&diff.added), ["only_new"]);
    assert_eq!(keys(&diff.changed), ["changed"]);
}
