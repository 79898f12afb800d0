//! End-to-end scenarios exercising the orchestrator against a scratch
//! root directory: init, a first local-walker backup, an incremental
//! follow-up, and garbage collection across several backups.

use std::path::{Path, PathBuf};

use fbk_api_types::{FsyncLevel, HostName};
use fbk_config::{Config, ExpiryPolicy, HostConfig, PoolConfig, ShareConfig};
use fbk_datastore::{DentryKind, ShareReader};
use fruitbak::{run_gc, run_host_backup, BackupOptions, Root};

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fbk-scenario-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn test_config() -> Config {
    Config {
        pool: PoolConfig {
            fsync: FsyncLevel::None,
            ..Default::default()
        },
        host: Vec::new(),
    }
}

fn one_share_host(name: &str, src: &Path) -> HostConfig {
    HostConfig {
        name: HostName::new(name).unwrap(),
        shares: vec![ShareConfig {
            name: "root".to_string(),
            mountpoint: "/".to_string(),
            excludes: Vec::new(),
            host: None,
            port: None,
            user: None,
            path: Some(src.to_string_lossy().into_owned()),
        }],
        excludes: Vec::new(),
        expiry: None,
        pre_command: None,
        post_command: None,
    }
}

fn read_back(root: &Root, reader: &ShareReader, path: &str) -> Vec<u8> {
    let dentry = reader.get_entry(path).unwrap().expect("entry must exist");
    let digests = match dentry.kind().unwrap() {
        DentryKind::File { digests } => digests,
        other => panic!("expected a regular file, got {other:?}"),
    };
    let mut out = Vec::new();
    for digest in digests {
        out.extend(root.pool.retrieve(&digest).unwrap().expect("chunk must be present"));
    }
    out
}

/// S1: an empty root, once opened, has an empty host list and no
/// backups anywhere.
#[test]
fn init_creates_an_empty_layout() {
    let dir = scratch_dir("s1");
    let root = Root::init(&dir, test_config()).unwrap();

    assert!(dir.join("host").is_dir());
    assert!(root.host_dirs().unwrap().is_empty());

    std::fs::remove_dir_all(&dir).ok();
}

/// S2: a first backup of a plain local tree is readable back
/// byte-for-byte through the pool.
#[test]
fn first_local_backup_round_trips_file_contents() {
    let dir = scratch_dir("s2");
    let src = dir.join("src");
    std::fs::create_dir_all(src.join("incl1")).unwrap();
    std::fs::write(src.join("incl1/file.txt"), b"hello world\n").unwrap();

    let root = Root::init(dir.join("fbk"), test_config()).unwrap();
    let host = one_share_host("h1", &src);

    let info = run_host_backup(&root, &host, &BackupOptions::default()).unwrap();
    assert_eq!(info.level, 0); // first backup is always a full one
    assert!(info.failed.is_none());

    let share_dir = root.host_dir(&host.name).join("0").join("share").join(fbk_tools::mangle::mangle("root"));
    let reader = ShareReader::open(share_dir);
    assert_eq!(read_back(&root, &reader, "incl1/file.txt"), b"hello world\n");

    std::fs::remove_dir_all(&dir).ok();
}

/// S3: a second, incremental backup leaves the first backup's content
/// untouched and captures the new content under its own number.
#[test]
fn incremental_backup_preserves_prior_generation() {
    let dir = scratch_dir("s3");
    let src = dir.join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("file.txt"), b"version one\n").unwrap();

    let root = Root::init(dir.join("fbk"), test_config()).unwrap();
    let host = one_share_host("h1", &src);

    run_host_backup(&root, &host, &BackupOptions::default()).unwrap();

    std::fs::write(src.join("file.txt"), b"version two\n").unwrap();
    let info = run_host_backup(&root, &host, &BackupOptions::default()).unwrap();
    assert_eq!(info.level, 1);
    assert_eq!(info.reference, Some(0));

    let mangled = fbk_tools::mangle::mangle("root");
    let reader0 = ShareReader::open(root.host_dir(&host.name).join("0").join("share").join(&mangled));
    let reader1 = ShareReader::open(root.host_dir(&host.name).join("1").join("share").join(&mangled));
    assert_eq!(read_back(&root, &reader0, "file.txt"), b"version one\n");
    assert_eq!(read_back(&root, &reader1, "file.txt"), b"version two\n");

    std::fs::remove_dir_all(&dir).ok();
}

/// S4: after an incremental backup, forcing `full: true` produces a new
/// level-0 backup (no reference) whose digest list for an unchanged file
/// equals the prior version's — full forces a fresh read of the source
/// tree rather than a delta against the reference, but unchanged content
/// still chunks down to the same digests.
#[test]
fn full_after_incremental_rereads_but_matches_prior_digests() {
    let dir = scratch_dir("s4");
    let src = dir.join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("file.txt"), b"unchanging content\n").unwrap();

    let root = Root::init(dir.join("fbk"), test_config()).unwrap();
    let host = one_share_host("h1", &src);

    let info0 = run_host_backup(&root, &host, &BackupOptions::default()).unwrap();
    assert_eq!(info0.level, 0);

    let info1 = run_host_backup(&root, &host, &BackupOptions::default()).unwrap();
    assert_eq!(info1.level, 1);
    assert_eq!(info1.reference, Some(0));

    let full_opts = BackupOptions {
        full: true,
        full_after: None,
        refbackup: None,
    };
    let info2 = run_host_backup(&root, &host, &full_opts).unwrap();
    assert_eq!(info2.level, 0);
    assert_eq!(info2.reference, None);

    let mangled = fbk_tools::mangle::mangle("root");
    let digests_of = |backup_num: u32| -> fbk_datastore::DigestList {
        let reader = ShareReader::open(root.host_dir(&host.name).join(backup_num.to_string()).join("share").join(&mangled));
        let dentry = reader.get_entry("file.txt").unwrap().expect("entry must exist");
        match dentry.kind().unwrap() {
            DentryKind::File { digests } => digests,
            other => panic!("expected a regular file, got {other:?}"),
        }
    };
    assert_eq!(digests_of(1), digests_of(2));

    std::fs::remove_dir_all(&dir).ok();
}

/// S5: `tar` emits both a plain symlink and a hardlink correctly —
/// the symlink carries its target as a tar symlink entry, and the
/// second name for the same inode comes back as a tar hardlink entry
/// pointing at the first-seen name, not a second copy of the content.
/// The walker visits directory children in sorted order, so of
/// `linked.txt`/`original.txt` (same inode) the alphabetically first,
/// `linked.txt`, is recorded as the real file and `original.txt` comes
/// back as the hardlink pointing at it.
#[test]
fn tar_round_trips_symlinks_and_hardlinks() {
    let dir = scratch_dir("s5");
    let src = dir.join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("original.txt"), b"shared content\n").unwrap();
    std::fs::hard_link(src.join("original.txt"), src.join("linked.txt")).unwrap();
    std::os::unix::fs::symlink("original.txt", src.join("alias.txt")).unwrap();

    let root = Root::init(dir.join("fbk"), test_config()).unwrap();
    let host = one_share_host("h1", &src);
    run_host_backup(&root, &host, &BackupOptions::default()).unwrap();

    let mangled = fbk_tools::mangle::mangle("root");
    let share_dir = root.host_dir(&host.name).join("0").join("share").join(&mangled);
    let reader = ShareReader::open(share_dir.clone());

    let mut archive = Vec::new();
    {
        let mut builder = ::tar::Builder::new(&mut archive);
        for dentry in reader.find("").unwrap() {
            let kind = dentry.kind().unwrap();
            let mut header = ::tar::Header::new_gnu();
            header.set_mode(dentry.mode & 0o7777);
            header.set_mtime(dentry.mtime_ns / 1_000_000_000);
            let name = if dentry.name.is_empty() { "." } else { dentry.name.as_str() };
            match kind {
                DentryKind::Dir => {
                    header.set_entry_type(::tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append_data(&mut header, name, std::io::empty()).unwrap();
                }
                DentryKind::File { digests } => {
                    header.set_entry_type(::tar::EntryType::Regular);
                    header.set_size(dentry.size);
                    header.set_cksum();
                    let data = read_back_digests(&root, &digests, dentry.size);
                    builder.append_data(&mut header, name, data.as_slice()).unwrap();
                }
                DentryKind::Symlink { target } => {
                    header.set_entry_type(::tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_link_name(String::from_utf8_lossy(&target).as_ref()).unwrap();
                    header.set_cksum();
                    builder.append_data(&mut header, name, std::io::empty()).unwrap();
                }
                DentryKind::Hardlink { target_name } => {
                    header.set_entry_type(::tar::EntryType::Link);
                    header.set_link_name(&target_name).unwrap();
                    header.set_size(0);
                    header.set_cksum();
                    builder.append_data(&mut header, name, std::io::empty()).unwrap();
                }
                other => panic!("unexpected dentry kind in tar test: {other:?}"),
            }
        }
        builder.finish().unwrap();
    }

    let mut tar_archive = ::tar::Archive::new(archive.as_slice());
    let mut saw_symlink = false;
    let mut saw_hardlink = false;
    for entry in tar_archive.entries().unwrap() {
        let entry = entry.unwrap();
        let path = entry.path().unwrap().into_owned();
        match entry.header().entry_type() {
            ::tar::EntryType::Symlink => {
                assert_eq!(path.to_str().unwrap(), "alias.txt");
                assert_eq!(entry.link_name().unwrap().unwrap().to_str().unwrap(), "original.txt");
                saw_symlink = true;
            }
            ::tar::EntryType::Link => {
                assert_eq!(path.to_str().unwrap(), "original.txt");
                assert_eq!(entry.link_name().unwrap().unwrap().to_str().unwrap(), "linked.txt");
                saw_hardlink = true;
            }
            _ => {}
        }
    }
    assert!(saw_symlink, "expected a symlink entry in the tar stream");
    assert!(saw_hardlink, "expected a hardlink entry in the tar stream");

    std::fs::remove_dir_all(&dir).ok();
}

fn read_back_digests(root: &Root, digests: &fbk_datastore::DigestList, size: u64) -> Vec<u8> {
    let reader = root.pool.reader(digests.clone(), size);
    reader.pread(0, size).unwrap()
}

/// Three backups under a `keep: 1` logarithmic policy: the oldest
/// generation is collected, the pool stays internally consistent
/// (every surviving digest remains retrievable, nothing goes missing).
#[test]
fn gc_reclaims_expired_generations_and_keeps_survivors_intact() {
    let dir = scratch_dir("s6");
    let src = dir.join("src");
    std::fs::create_dir_all(&src).unwrap();

    let root = Root::init(dir.join("fbk"), test_config()).unwrap();
    let mut host = one_share_host("h1", &src);
    host.expiry = Some(ExpiryPolicy::Logarithmic { keep: 1, of: None });

    for content in ["gen0\n", "gen1\n", "gen2\n"] {
        std::fs::write(src.join("file.txt"), content).unwrap();
        run_host_backup(&root, &host, &BackupOptions::default()).unwrap();
    }
    let surviving_before = fruitbak::backup::list_backups(&root.host_dir(&host.name)).unwrap();
    assert_eq!(surviving_before, vec![0, 1, 2]);

    let status = run_gc(&root).unwrap();
    assert_eq!(status.missing_chunks, 0);

    let surviving_after = fruitbak::backup::list_backups(&root.host_dir(&host.name)).unwrap();
    // backups 0 and 2 share generation 0 (lowest set bit of their 1-based
    // sequence position); keep=1 expires the older of the two.
    assert_eq!(surviving_after, vec![1, 2]);

    let mangled = fbk_tools::mangle::mangle("root");
    let reader2 = ShareReader::open(root.host_dir(&host.name).join("2").join("share").join(&mangled));
    assert_eq!(read_back(&root, &reader2, "file.txt"), b"gen2\n");

    std::fs::remove_dir_all(&dir).ok();
}
