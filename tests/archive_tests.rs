//! End-to-end runs over scratch trees: create, update, extract, check and remote transfers.

use hoard::engine::aggregate::set_readonly;
use hoard::{
    ArchiveMode, ArchiveOpts, ConfigError, ContainerId, DirStore, ExtractMode, ExtractOpts,
    FailureKind, RemoteRef, RemoteStore, TransferError, archive_with_remote, check_archive,
    create_archive, extract_archive, extract_with_remote, list_archive, list_containers,
    update_archive,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const MIB: usize = 1024 * 1024;

fn write_file(root: &Path, rel: &str, data: &[u8]) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, data).unwrap();
    path
}

fn set_mtime(path: &Path, t: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(t)
        .unwrap();
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Scratch layout: `src/` is the source tree, `archive/` the archive, `out/` the destination.
struct Scratch {
    _dir: TempDir,
    src: PathBuf,
    archive: PathBuf,
    out: PathBuf,
}

impl Scratch {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        Self {
            src,
            archive: dir.path().join("archive"),
            out: dir.path().join("out"),
            _dir: dir,
        }
    }

    fn archive_opts(&self, max_size: u64) -> ArchiveOpts {
        ArchiveOpts {
            archive_dir: Some(self.archive.clone()),
            max_size: Some(max_size),
            workers: Some(2),
            ..Default::default()
        }
    }

    fn extract_opts(&self) -> ExtractOpts {
        ExtractOpts {
            archive_dir: self.archive.clone(),
            dest: self.out.clone(),
            workers: Some(2),
            ..Default::default()
        }
    }

    /// Current index as path -> container.
    fn placement(&self) -> BTreeMap<String, ContainerId> {
        list_archive(&self.archive, &[], None)
            .unwrap()
            .into_iter()
            .map(|r| (r.path, r.container))
            .collect()
    }
}

fn sample_tree(root: &Path) -> BTreeMap<&'static str, Vec<u8>> {
    let files: BTreeMap<&'static str, Vec<u8>> = [
        ("a.txt", b"alpha".to_vec()),
        ("docs/readme.md", pattern(700, 1)),
        ("docs/deep/notes.txt", pattern(1500, 2)),
        ("empty.dat", Vec::new()),
        ("src/main.rs", pattern(300, 3)),
        ("src/lib.rs", pattern(2500, 4)),
    ]
    .into_iter()
    .collect();
    for (rel, data) in &files {
        write_file(root, rel, data);
    }
    files
}

#[test]
fn create_then_extract_round_trips() {
    let s = Scratch::new();
    let files = sample_tree(&s.src);

    let summary = create_archive(&s.src, &s.archive_opts(2048)).unwrap();
    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!(summary.succeeded, files.len());
    assert!(!summary.containers_written.is_empty());

    let summary = extract_archive(&s.extract_opts()).unwrap();
    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!(summary.succeeded, files.len());
    for (rel, data) in &files {
        assert_eq!(&std::fs::read(s.out.join(rel)).unwrap(), data, "{rel}");
    }

    let check = check_archive(&s.extract_opts()).unwrap();
    assert!(check.is_success());
    assert_eq!(check.succeeded, files.len());
}

#[test]
fn default_archive_dir_lives_under_root_and_is_not_archived() {
    let s = Scratch::new();
    sample_tree(&s.src);
    let opts = ArchiveOpts {
        max_size: Some(4096),
        ..Default::default()
    };
    create_archive(&s.src, &opts).unwrap();
    let archive = s.src.join("hoard");
    assert!(archive.join("index.db").is_file());

    // A second pass must not pick up the archive's own files.
    let again = update_archive(&s.src, &opts).unwrap();
    assert!(again.is_success());
    assert_eq!(again.succeeded, 0);
    let paths: Vec<String> = list_archive(&archive, &[], None)
        .unwrap()
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert!(paths.iter().all(|p| !p.starts_with("hoard/")), "{paths:?}");
}

#[test]
fn update_without_changes_is_a_no_op() {
    let s = Scratch::new();
    let files = sample_tree(&s.src);
    create_archive(&s.src, &s.archive_opts(2048)).unwrap();
    let before = list_containers(&s.archive, None).unwrap();
    let placement = s.placement();

    let summary = update_archive(&s.src, &s.archive_opts(2048)).unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.skipped, files.len());
    assert!(summary.containers_written.is_empty());
    assert_eq!(list_containers(&s.archive, None).unwrap(), before);
    assert_eq!(s.placement(), placement);
}

#[test]
fn containers_respect_max_size_and_never_split_files() {
    let s = Scratch::new();
    let max = 1000u64;
    let mut sizes = BTreeMap::new();
    for i in 0..40u32 {
        let size = (i as usize * 97) % 900 + 1;
        let rel = format!("f{i:02}.bin");
        write_file(&s.src, &rel, &pattern(size, i as u8));
        sizes.insert(rel, size as u64);
    }
    write_file(&s.src, "huge.bin", &pattern(3000, 9));
    sizes.insert("huge.bin".to_string(), 3000);

    let summary = create_archive(&s.src, &s.archive_opts(max)).unwrap();
    assert!(summary.is_success(), "{:?}", summary.failures);

    let containers = list_containers(&s.archive, None).unwrap();
    let records = list_archive(&s.archive, &[], None).unwrap();
    assert_eq!(records.len(), sizes.len());
    for c in &containers {
        let on_disk = std::fs::metadata(s.archive.join(c.id.file_name())).unwrap().len();
        assert_eq!(on_disk, c.size, "{}", c.id);
        let members: Vec<_> = records.iter().filter(|r| r.container == c.id).collect();
        assert_eq!(members.len(), c.file_count);
        assert_eq!(members.iter().map(|r| r.size).sum::<u64>(), c.size);
        if c.id.is_oversized() {
            assert_eq!(members.len(), 1);
            assert!(c.size > max);
        } else {
            assert!(c.size <= max, "{} holds {} bytes", c.id, c.size);
        }
        for r in members {
            assert!(r.end() <= c.size, "{} overruns {}", r.path, c.id);
        }
    }
    let huge = records.iter().find(|r| r.path == "huge.bin").unwrap();
    assert!(huge.container.is_oversized());
    assert_eq!(huge.offset, 0);
}

#[test]
fn corruption_stays_inside_one_container() {
    let s = Scratch::new();
    let files = sample_tree(&s.src);
    create_archive(&s.src, &s.archive_opts(1024)).unwrap();
    let placement = s.placement();

    // Corrupt the container holding src/lib.rs.
    let victim = placement["src/lib.rs"];
    let path = s.archive.join(victim.file_name());
    set_readonly(&path, false);
    let mut f = File::options().read(true).write(true).open(&path).unwrap();
    f.seek(SeekFrom::Start(10)).unwrap();
    f.write_all(b"XXXX").unwrap();
    drop(f);

    let summary = check_archive(&s.extract_opts()).unwrap();
    assert!(!summary.is_success());
    let in_victim: Vec<&str> = placement
        .iter()
        .filter(|(_, c)| **c == victim)
        .map(|(p, _)| p.as_str())
        .collect();
    assert!(!summary.failures.is_empty());
    for f in &summary.failures {
        assert_eq!(f.kind, FailureKind::ChecksumMismatch);
        assert_eq!(f.container, Some(victim));
        assert!(in_victim.contains(&f.path.as_deref().unwrap()));
    }
    assert_eq!(summary.succeeded + summary.failed(), files.len());
    assert_eq!(summary.failed_containers().len(), 1);

    // Extract writes the healthy files and leaves no damaged output behind.
    let summary = extract_archive(&s.extract_opts()).unwrap();
    assert!(summary.failed_paths().contains(&"src/lib.rs"));
    assert!(!s.out.join("src/lib.rs").exists());
    assert_eq!(std::fs::read(s.out.join("a.txt")).unwrap(), b"alpha");
}

#[test]
fn truncated_container_does_not_stop_the_rest_of_a_check() {
    let s = Scratch::new();
    for i in 0..4u8 {
        write_file(&s.src, &format!("f{i}.bin"), &pattern(100, i));
    }
    create_archive(&s.src, &s.archive_opts(100)).unwrap();
    let placement = s.placement();
    let ids: BTreeSet<ContainerId> = placement.values().copied().collect();
    assert_eq!(ids.len(), 4);

    let victim = placement["f0.bin"];
    let path = s.archive.join(victim.file_name());
    set_readonly(&path, false);
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(50)
        .unwrap();

    // Default options: keep_going is off.
    let summary = check_archive(&ExtractOpts {
        workers: Some(1),
        ..s.extract_opts()
    })
    .unwrap();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.failures[0].kind, FailureKind::ReadError);
    assert_eq!(summary.failures[0].container, Some(victim));
    assert_eq!(summary.failures[0].path.as_deref(), Some("f0.bin"));
}

#[test]
fn unreachable_remote_stops_the_run_unless_keep_going() {
    let s = Scratch::new();
    for i in 0..4u8 {
        write_file(&s.src, &format!("f{i}.bin"), &pattern(100, i));
    }
    create_archive(&s.src, &s.archive_opts(100)).unwrap();
    for c in list_containers(&s.archive, None).unwrap() {
        let path = s.archive.join(c.id.file_name());
        set_readonly(&path, false);
        std::fs::remove_file(&path).unwrap();
    }
    let opts = ExtractOpts {
        mode: ExtractMode::Check,
        workers: Some(1),
        retries: 0,
        ..s.extract_opts()
    };

    let stopped = extract_with_remote(&opts, Some(&FailingStore)).unwrap();
    assert!(stopped.failed() >= 1);
    assert!(stopped.skipped >= 1);
    assert_eq!(stopped.failed() + stopped.skipped, 4);
    assert!(stopped.failures.iter().all(|f| f.kind == FailureKind::Transfer));

    let all = extract_with_remote(
        &ExtractOpts {
            keep_going: true,
            ..opts
        },
        Some(&FailingStore),
    )
    .unwrap();
    assert_eq!(all.failed(), 4);
    assert_eq!(all.skipped, 0);
}

#[test]
fn resume_skips_containers_already_checked() {
    let s = Scratch::new();
    sample_tree(&s.src);
    create_archive(&s.src, &s.archive_opts(1024)).unwrap();
    let placement = s.placement();
    let victim = placement["docs/deep/notes.txt"];
    let path = s.archive.join(victim.file_name());
    set_readonly(&path, false);
    let mut f = File::options().write(true).open(&path).unwrap();
    f.write_all(b"!").unwrap();
    drop(f);

    let first = check_archive(&s.extract_opts()).unwrap();
    assert!(!first.is_success());

    let resumed = check_archive(&ExtractOpts {
        resume: true,
        ..s.extract_opts()
    })
    .unwrap();
    let healthy = placement.values().filter(|c| **c != victim).count();
    assert_eq!(resumed.skipped, healthy);
    assert_eq!(resumed.succeeded, 0);
    assert_eq!(resumed.failed(), first.failed());
}

#[test]
fn three_five_mib_files_fill_two_ten_mib_containers() {
    let s = Scratch::new();
    for (i, name) in ["file1", "file2", "file3"].iter().enumerate() {
        write_file(&s.src, name, &pattern(5 * MIB, i as u8));
    }
    let opts = ArchiveOpts {
        workers: Some(1),
        ..s.archive_opts(10 * MIB as u64)
    };
    let summary = create_archive(&s.src, &opts).unwrap();
    assert!(summary.is_success());

    let placement = s.placement();
    let first = ContainerId::regular(0).unwrap();
    let second = ContainerId::regular(1).unwrap();
    assert_eq!(placement["file1"], first);
    assert_eq!(placement["file2"], first);
    assert_eq!(placement["file3"], second);

    let records = list_archive(&s.archive, &["file2".to_string()], None).unwrap();
    assert_eq!(records[0].offset, 5 * MIB as u64);

    // Changing file2 archives only file2, into a new container.
    write_file(&s.src, "file2", &pattern(5 * MIB - 1, 7));
    let summary = update_archive(&s.src, &opts).unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(
        summary.containers_written,
        vec![ContainerId::regular(2).unwrap()]
    );
    let placement = s.placement();
    assert_eq!(placement["file1"], first);
    assert_eq!(placement["file2"], ContainerId::regular(2).unwrap());

    extract_archive(&ExtractOpts {
        patterns: vec!["file2".to_string()],
        ..s.extract_opts()
    })
    .unwrap();
    assert_eq!(
        std::fs::read(s.out.join("file2")).unwrap(),
        pattern(5 * MIB - 1, 7)
    );
}

#[test]
fn file_larger_than_max_gets_an_oversized_container() {
    let s = Scratch::new();
    write_file(&s.src, "big.bin", &pattern(20 * MIB, 5));
    let summary = create_archive(&s.src, &s.archive_opts(10 * MIB as u64)).unwrap();
    assert!(summary.is_success());
    let oversized: ContainerId = "00000z".parse().unwrap();
    assert_eq!(summary.containers_written, vec![oversized]);
    let container = s.archive.join("00000z.pack");
    assert_eq!(std::fs::metadata(&container).unwrap().len(), 20 * MIB as u64);

    let summary = check_archive(&s.extract_opts()).unwrap();
    assert!(summary.is_success());
}

#[test]
fn file_exactly_max_size_fits_a_regular_container() {
    let s = Scratch::new();
    write_file(&s.src, "a.bin", &pattern(100, 1));
    write_file(&s.src, "b.bin", &pattern(1, 2));
    let opts = ArchiveOpts {
        workers: Some(1),
        ..s.archive_opts(100)
    };
    create_archive(&s.src, &opts).unwrap();
    let placement = s.placement();
    assert_eq!(placement["a.bin"], ContainerId::regular(0).unwrap());
    assert_eq!(placement["b.bin"], ContainerId::regular(1).unwrap());
    let containers = list_containers(&s.archive, None).unwrap();
    assert_eq!(containers[0].size, 100);
    assert!(!containers[0].id.is_oversized());
}

#[test]
fn same_content_with_new_mtime_only_refreshes_the_record() {
    let s = Scratch::new();
    let path = write_file(&s.src, "stable.txt", b"same bytes");
    set_mtime(&path, SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));
    create_archive(&s.src, &s.archive_opts(1024)).unwrap();

    let later = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000);
    set_mtime(&path, later);
    let summary = update_archive(&s.src, &s.archive_opts(1024)).unwrap();
    assert!(summary.containers_written.is_empty());
    assert_eq!(summary.skipped, 1);
    let record = &list_archive(&s.archive, &[], None).unwrap()[0];
    assert_eq!(record.mtime_ns, 2_000_000 * 1_000_000_000);
    assert_eq!(record.container, ContainerId::regular(0).unwrap());
}

#[test]
fn extract_restores_mtime_and_skips_identical_files() {
    let s = Scratch::new();
    let files = sample_tree(&s.src);
    let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
    set_mtime(&s.src.join("a.txt"), t);
    create_archive(&s.src, &s.archive_opts(4096)).unwrap();

    extract_archive(&s.extract_opts()).unwrap();
    let restored = std::fs::metadata(s.out.join("a.txt")).unwrap().modified().unwrap();
    assert_eq!(restored, t);

    let again = extract_archive(&s.extract_opts()).unwrap();
    assert!(again.is_success());
    assert_eq!(again.succeeded, 0);
    assert_eq!(again.skipped, files.len());
}

#[test]
fn extract_selection_by_pattern_exclude_and_container() {
    let s = Scratch::new();
    sample_tree(&s.src);
    create_archive(&s.src, &s.archive_opts(1024)).unwrap();

    let summary = extract_archive(&ExtractOpts {
        patterns: vec!["docs/".to_string()],
        exclude: vec!["*.md".to_string()],
        ..s.extract_opts()
    })
    .unwrap();
    assert_eq!(summary.succeeded, 1);
    assert!(s.out.join("docs/deep/notes.txt").is_file());
    assert!(!s.out.join("docs/readme.md").exists());

    let placement = s.placement();
    let target = placement["src/lib.rs"];
    let summary = check_archive(&ExtractOpts {
        containers: Some(target.to_string()),
        ..s.extract_opts()
    })
    .unwrap();
    let expected = placement.values().filter(|c| **c == target).count();
    assert_eq!(summary.succeeded, expected);
}

#[test]
fn zero_matches_is_success() {
    let s = Scratch::new();
    sample_tree(&s.src);
    create_archive(&s.src, &s.archive_opts(4096)).unwrap();
    let summary = extract_archive(&ExtractOpts {
        patterns: vec!["nothing/*".to_string()],
        ..s.extract_opts()
    })
    .unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.succeeded, 0);
    assert!(!s.out.exists());
}

#[test]
fn missing_container_without_remote_is_a_read_error() {
    let s = Scratch::new();
    sample_tree(&s.src);
    create_archive(&s.src, &s.archive_opts(1024)).unwrap();
    let placement = s.placement();
    let gone = placement["a.txt"];
    let path = s.archive.join(gone.file_name());
    set_readonly(&path, false);
    std::fs::remove_file(&path).unwrap();

    let summary = check_archive(&ExtractOpts {
        keep_going: true,
        ..s.extract_opts()
    })
    .unwrap();
    assert!(summary.failed() > 0);
    assert!(
        summary
            .failures
            .iter()
            .all(|f| f.kind == FailureKind::ReadError && f.container == Some(gone))
    );
    assert_eq!(summary.succeeded + summary.failed(), placement.len());
}

#[test]
fn dry_run_writes_nothing() {
    let s = Scratch::new();
    let files = sample_tree(&s.src);
    let summary = create_archive(
        &s.src,
        &ArchiveOpts {
            dry_run: true,
            ..s.archive_opts(1024)
        },
    )
    .unwrap();
    assert!(summary.dry_run);
    assert_eq!(summary.succeeded, files.len());
    assert!(!s.archive.exists());
}

#[test]
fn create_on_populated_archive_is_a_config_error() {
    let s = Scratch::new();
    sample_tree(&s.src);
    create_archive(&s.src, &s.archive_opts(1024)).unwrap();
    let err = create_archive(&s.src, &s.archive_opts(1024)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::AlreadyPopulated(_))
    ));
}

#[test]
fn update_needs_an_index_and_a_matching_max_size() {
    let s = Scratch::new();
    sample_tree(&s.src);
    let err = update_archive(&s.src, &s.archive_opts(1024)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::MissingIndex(_))
    ));

    create_archive(&s.src, &s.archive_opts(1024)).unwrap();
    let err = update_archive(&s.src, &s.archive_opts(2048)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::Conflict { .. })
    ));

    let reconfigured = update_archive(
        &s.src,
        &ArchiveOpts {
            reconfigure: true,
            ..s.archive_opts(2048)
        },
    )
    .unwrap();
    assert!(reconfigured.is_success());
}

#[cfg(unix)]
#[test]
fn symlinks_are_skipped_unless_followed() {
    let s = Scratch::new();
    write_file(&s.src, "real.txt", b"target");
    std::os::unix::fs::symlink(s.src.join("real.txt"), s.src.join("link.txt")).unwrap();

    let summary = create_archive(&s.src, &s.archive_opts(1024)).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 1);
    assert!(!s.placement().contains_key("link.txt"));

    let s2 = Scratch::new();
    write_file(&s2.src, "real.txt", b"target");
    std::os::unix::fs::symlink(s2.src.join("real.txt"), s2.src.join("link.txt")).unwrap();
    let summary = create_archive(
        &s2.src,
        &ArchiveOpts {
            follow_links: true,
            ..s2.archive_opts(1024)
        },
    )
    .unwrap();
    assert_eq!(summary.succeeded, 2);
    assert!(s2.placement().contains_key("link.txt"));
}

/// Remote store that is never reachable.
struct FailingStore;

impl RemoteStore for FailingStore {
    fn put(&self, _local: &Path) -> Result<RemoteRef, TransferError> {
        Err(TransferError::Unavailable("tape library offline".to_string()))
    }

    fn get(&self, name: &str, _local: &Path) -> Result<(), TransferError> {
        Err(TransferError::NotFound(name.to_string()))
    }

    fn describe(&self) -> String {
        "offline store".to_string()
    }
}

#[test]
fn transfer_failure_keeps_local_data_and_reports() {
    let s = Scratch::new();
    let files = sample_tree(&s.src);
    let opts = ArchiveOpts {
        retries: 0,
        ..s.archive_opts(1024)
    };
    let summary = archive_with_remote(&s.src, ArchiveMode::Create, &opts, Some(&FailingStore))
        .unwrap();
    assert!(!summary.is_success());
    assert!(
        summary
            .failures
            .iter()
            .all(|f| f.kind == FailureKind::Transfer)
    );
    assert_eq!(
        summary.failed_containers().len(),
        summary.containers_written.len()
    );
    for id in &summary.containers_written {
        assert!(s.archive.join(id.file_name()).is_file());
    }
    // Local index and containers are intact.
    assert_eq!(s.placement().len(), files.len());
    assert!(check_archive(&s.extract_opts()).unwrap().is_success());
}

#[test]
fn remote_round_trip_through_a_directory_store() {
    let s = Scratch::new();
    let files = sample_tree(&s.src);
    let remote_dir = s.out.with_file_name("remote");
    let store = DirStore::new(&remote_dir);

    let summary = archive_with_remote(
        &s.src,
        ArchiveMode::Create,
        &s.archive_opts(1024),
        Some(&store),
    )
    .unwrap();
    assert!(summary.is_success(), "{:?}", summary.failures);
    assert!(remote_dir.join("index.db").is_file());
    for id in &summary.containers_written {
        assert!(remote_dir.join(id.file_name()).is_file());
        assert!(!s.archive.join(id.file_name()).exists(), "{id} kept locally");
    }
    let containers = list_containers(&s.archive, None).unwrap();
    assert!(containers.iter().all(|c| c.remote_ref.is_some()));

    // Start from nothing: index and containers both come from the remote.
    std::fs::remove_dir_all(&s.archive).unwrap();
    let summary = extract_with_remote(&s.extract_opts(), Some(&store)).unwrap();
    assert!(summary.is_success(), "{:?}", summary.failures);
    for (rel, data) in &files {
        assert_eq!(&std::fs::read(s.out.join(rel)).unwrap(), data);
    }
    let leftovers = std::fs::read_dir(&s.archive)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".pack"))
        .count();
    assert_eq!(leftovers, 0);

    let check = extract_with_remote(
        &ExtractOpts {
            mode: ExtractMode::Check,
            keep: true,
            ..s.extract_opts()
        },
        Some(&store),
    )
    .unwrap();
    assert!(check.is_success());
    for c in list_containers(&s.archive, None).unwrap() {
        assert!(s.archive.join(c.id.file_name()).is_file(), "{} not kept", c.id);
    }
}

#[test]
fn os_metadata_and_nested_settings_files_are_archived() {
    let s = Scratch::new();
    let names = [
        "keep.txt",
        "Thumbs.db",
        "._notes",
        "docs/.DS_Store",
        "Desktop.ini",
        ".directory",
        "sub/.hoard.toml",
        "sub/hoard.results",
    ];
    for (i, rel) in names.iter().enumerate() {
        write_file(&s.src, rel, &pattern(40, i as u8));
    }
    // Only the root-level settings file belongs to the tool.
    write_file(&s.src, ".hoard.toml", b"verbose = true\n");

    let summary = create_archive(&s.src, &s.archive_opts(1024)).unwrap();
    assert!(summary.is_success(), "{:?}", summary.failures);
    assert_eq!(summary.succeeded, names.len());
    assert_eq!(summary.skipped, 1);
    let archived: BTreeSet<String> = s.placement().into_keys().collect();
    let expected: BTreeSet<String> = names.iter().map(|n| n.to_string()).collect();
    assert_eq!(archived, expected);

    let summary = extract_archive(&s.extract_opts()).unwrap();
    assert!(summary.is_success());
    for (i, rel) in names.iter().enumerate() {
        assert_eq!(std::fs::read(s.out.join(rel)).unwrap(), pattern(40, i as u8));
    }
}

/// Accepts every container without storing it; the first upload raises the cancel flag and
/// lingers so the committer has to notice it.
struct CancellingStore {
    cancel: Arc<AtomicBool>,
}

impl RemoteStore for CancellingStore {
    fn put(&self, local: &Path) -> Result<RemoteRef, TransferError> {
        if !self.cancel.swap(true, Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(300));
        }
        Ok(RemoteRef(local.display().to_string()))
    }

    fn get(&self, name: &str, _local: &Path) -> Result<(), TransferError> {
        Err(TransferError::NotFound(name.to_string()))
    }

    fn describe(&self) -> String {
        "cancelling store".to_string()
    }
}

#[test]
fn cancelled_create_indexes_only_sealed_containers() {
    let s = Scratch::new();
    let total = 300;
    for i in 0..total {
        write_file(&s.src, &format!("f{i:03}.bin"), &pattern(100, i as u8));
    }
    let cancel = Arc::new(AtomicBool::new(false));
    let store = CancellingStore {
        cancel: Arc::clone(&cancel),
    };
    let opts = ArchiveOpts {
        workers: Some(1),
        keep: true,
        cancel: Some(Arc::clone(&cancel)),
        ..s.archive_opts(100)
    };
    let summary = archive_with_remote(&s.src, ArchiveMode::Create, &opts, Some(&store)).unwrap();
    assert!(summary.cancelled);

    let records = list_archive(&s.archive, &[], None).unwrap();
    assert!(!records.is_empty());
    assert!(records.len() < total, "cancel was never observed");
    let containers: BTreeSet<ContainerId> = list_containers(&s.archive, None)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    for r in &records {
        assert!(containers.contains(&r.container), "{} points at {}", r.path, r.container);
    }
    for id in &containers {
        assert!(s.archive.join(id.file_name()).is_file(), "{id} not sealed");
    }
    let partials = std::fs::read_dir(&s.archive)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .count();
    assert_eq!(partials, 0);

    let check = check_archive(&s.extract_opts()).unwrap();
    assert!(check.is_success(), "{:?}", check.failures);
    assert_eq!(check.succeeded, records.len());
}

#[cfg(unix)]
#[test]
fn unreadable_source_file_is_reported_and_skipped() {
    use std::os::unix::fs::PermissionsExt;

    let s = Scratch::new();
    write_file(&s.src, "a.txt", b"alpha");
    write_file(&s.src, "docs/b.txt", b"beta");
    // Followed links must resolve; this one points nowhere.
    std::os::unix::fs::symlink(s.src.join("missing"), s.src.join("broken.txt")).unwrap();
    let locked = write_file(&s.src, "locked.txt", b"secret");
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
    // Permission bits do not stop a privileged user.
    let locked_fails = File::open(&locked).is_err();

    let summary = create_archive(
        &s.src,
        &ArchiveOpts {
            follow_links: true,
            ..s.archive_opts(1024)
        },
    )
    .unwrap();

    let failed: BTreeSet<&str> = summary.failed_paths().into_iter().collect();
    assert!(failed.contains("broken.txt"));
    assert_eq!(failed.contains("locked.txt"), locked_fails);
    assert!(
        summary
            .failures
            .iter()
            .all(|f| f.kind == FailureKind::SourceRead)
    );
    let placement = s.placement();
    assert!(placement.contains_key("a.txt"));
    assert!(placement.contains_key("docs/b.txt"));
    assert!(!placement.contains_key("broken.txt"));
    assert_eq!(placement.contains_key("locked.txt"), !locked_fails);

    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
}
