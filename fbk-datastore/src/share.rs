//! Per-share staging and finalization, plus lazy read access (C7): a
//! share is one `hardhat` index of dentries, a JSON info sidecar, and a
//! derived digest hashset materialized on first request.

use std::path::PathBuf;

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use fbk_api_types::FsyncLevel;
use fbk_tools::fs::{read_json_sidecar, write_json_sidecar};
use fbk_tools::mangle::mangle;
use proxmox_sys::fs::CreateOptions;

use crate::dentry::{Dentry, DentryKind};
use crate::hardhat::{Entry, HardhatMaker, HardhatReader};
use crate::hashset::Hashset;

const INDEX_FILE: &str = "metadata.hh";
const INFO_FILE: &str = "info.json";
const HASHES_FILE: &str = "hashes";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareInfo {
    pub name: String,
    pub path: String,
    pub mountpoint: String,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    #[serde(rename = "endTime")]
    pub end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Owns a share's staging directory until `finish` reclassifies it as
/// read-only.
pub struct ShareWriter {
    dir: PathBuf,
    maker: HardhatMaker,
    fsync: FsyncLevel,
}

impl ShareWriter {
    /// `staging_root` is the backup's `<backupstaging>/share/` directory;
    /// the share's own folder name is `name`, mangled.
    pub fn create(staging_root: &std::path::Path, name: &str, fsync: FsyncLevel) -> Result<Self, Error> {
        let dir = staging_root.join(mangle(name));
        proxmox_sys::fs::create_path(&dir, Some(CreateOptions::new()), Some(CreateOptions::new()))
            .map_err(|err| format_err!("unable to create share staging dir {dir:?} - {err}"))?;
        Ok(Self {
            dir,
            maker: HardhatMaker::new(),
            fsync,
        })
    }

    pub fn add_entry(&mut self, dentry: &Dentry) {
        self.maker.add(dentry.name.clone(), dentry.serialize());
    }

    /// Materializes the index (synthesizing missing parent directories
    /// with a default root-like dentry) and writes the info sidecar
    /// with fsync + rename.
    pub fn finish(self, info: ShareInfo) -> Result<(), Error> {
        let index_path = self.dir.join(INDEX_FILE);
        self.maker
            .finish(&index_path, self.fsync, |key| Dentry::synthetic_dir(key).serialize())?;
        write_json_sidecar(&self.dir.join(INFO_FILE), &info, self.fsync)
    }
}

/// Lazily opens the index and sidecar of a finalized share.
pub struct ShareReader {
    dir: PathBuf,
}

impl ShareReader {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn info(&self) -> Result<ShareInfo, Error> {
        read_json_sidecar(&self.dir.join(INFO_FILE))
    }

    fn index(&self) -> Result<HardhatReader, Error> {
        HardhatReader::open(&self.dir.join(INDEX_FILE))
    }

    fn dentry_from(entry: &Entry) -> Result<Dentry, Error> {
        Dentry::deserialize(entry.name.clone(), &entry.value)
    }

    /// Resolves `path` to a single dentry. A stored hardlink is
    /// followed and replaced by a view carrying the target's
    /// attributes and digests under the original name.
    pub fn get_entry(&self, path: &str) -> Result<Option<Dentry>, Error> {
        let index = self.index()?;
        let entry = match index.get(path) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let dentry = Self::dentry_from(&entry)?;
        if !dentry.is_hardlink() {
            return Ok(Some(dentry));
        }

        let target_name = match dentry.kind()? {
            DentryKind::Hardlink { target_name } => target_name,
            _ => unreachable!("is_hardlink() implies kind() decodes as Hardlink"),
        };
        let target_entry = index
            .get(&target_name)
            .ok_or_else(|| format_err!("hardlink {path:?} points at missing entry {target_name:?}"))?;
        let target = Self::dentry_from(&target_entry)?;
        if target.is_hardlink() {
            bail!("hardlink {path:?} points at another hardlink {target_name:?}");
        }
        if target.file_type() != dentry.file_type() {
            bail!("hardlink {path:?} type does not match target {target_name:?}; share index is corrupt");
        }

        Ok(Some(Dentry {
            name: dentry.name,
            mode: target.mode,
            size: target.size,
            mtime_ns: target.mtime_ns,
            uid: target.uid,
            gid: target.gid,
            extra: target.extra,
        }))
    }

    /// Direct children of `path`, non-recursive, in sorted order.
    pub fn ls(&self, path: &str) -> Result<Vec<Dentry>, Error> {
        self.index()?.ls(path)?.iter().map(Self::dentry_from).collect()
    }

    /// `path` and its entire subtree, in sorted order.
    pub fn find(&self, path: &str) -> Result<Vec<Dentry>, Error> {
        self.index()?.find(path)?.iter().map(Self::dentry_from).collect()
    }

    /// Digest hashset over every regular, non-hardlink file in the
    /// share. Built once on first call and cached on disk as `hashes`.
    pub fn hashes(&self) -> Result<Hashset, Error> {
        let path = self.dir.join(HASHES_FILE);
        if !path.exists() {
            let index = self.index()?;
            let mut digests = Vec::new();
            for entry in index.find("")? {
                let dentry = Self::dentry_from(&entry)?;
                if dentry.is_hardlink() {
                    continue;
                }
                if let DentryKind::File { digests: file_digests } = dentry.kind()? {
                    digests.extend(file_digests);
                }
            }
            Hashset::sort_and_write(&path, digests, FsyncLevel::File)?;
        }
        Hashset::load(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbk_tools::digest::digest_of;

    fn staging_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fbk-share-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn round_trips_entries_and_hardlinks() {
        let root = staging_root();
        let mut writer = ShareWriter::create(&root, "my share", FsyncLevel::None).unwrap();

        let digest = digest_of(b"file contents");
        writer.add_entry(&Dentry::new(
            "foo.txt",
            libc::S_IFREG | 0o644,
            13,
            0,
            0,
            0,
            DentryKind::File { digests: vec![digest] },
        ));
        writer.add_entry(&Dentry::new(
            "bar.txt",
            libc::S_IFREG | 0o644,
            0,
            0,
            0,
            0,
            DentryKind::Hardlink {
                target_name: "foo.txt".to_string(),
            },
        ));

        writer
            .finish(ShareInfo {
                name: "my share".to_string(),
                path: "/".to_string(),
                mountpoint: "/mnt".to_string(),
                start_time: 1,
                end_time: 2,
                error: None,
            })
            .unwrap();

        let reader = ShareReader::open(root.join(mangle("my share")));
        let info = reader.info().unwrap();
        assert_eq!(info.name, "my share");

        let foo = reader.get_entry("foo.txt").unwrap().unwrap();
        assert_eq!(foo.size, 13);

        let bar = reader.get_entry("bar.txt").unwrap().unwrap();
        assert_eq!(bar.size, 13); // inherited from target
        assert!(!bar.is_hardlink()); // view exposes the target's mode

        let hashes = reader.hashes().unwrap();
        assert!(hashes.contains(&digest));

        std::fs::remove_dir_all(&root).ok();
    }
}
