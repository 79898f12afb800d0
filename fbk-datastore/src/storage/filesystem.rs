//! The filesystem leaf of the storage tree (§4.3): digest → two-level
//! path via unpadded base64url, atomic write-then-rename, silent no-op
//! when a chunk already exists.
//!
//! Grounded in the teacher's `ChunkStore`, stripped of its chunk-count
//! pre-creation and GC-atime bookkeeping (this pool's garbage collector
//! works from a live-digest union instead, see the root crate's `gc`
//! module) and adapted from a two-hex-char/sha256 layout to the
//! base64url/sha256 layout the data model calls for.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{format_err, Error};

use fbk_api_types::FsyncLevel;
use fbk_tools::digest::Digest;
use proxmox_sys::fs::{create_dir, create_path, CreateOptions};

use super::{DigestBatch, StorageNode};

fn digest_to_path(digest: &Digest) -> (String, String) {
    let encoded = base64::encode_config(digest, base64::URL_SAFE_NO_PAD);
    let (prefix, rest) = encoded.split_at(2);
    (prefix.to_string(), rest.to_string())
}

fn path_to_digest(prefix: &str, rest: &str) -> Option<Digest> {
    let encoded = format!("{prefix}{rest}");
    let bytes = base64::decode_config(encoded, base64::URL_SAFE_NO_PAD).ok()?;
    bytes.try_into().ok()
}

pub struct FilesystemStore {
    base: PathBuf,
    fsync: FsyncLevel,
    // Serializes the create-dir-then-retry dance so two threads in this
    // process don't race on mkdir; across processes the rename is
    // atomic and the destination-exists check makes concurrent stores
    // of the same digest safe regardless.
    mkdir_lock: Mutex<()>,
}

impl FilesystemStore {
    pub fn open(base: impl Into<PathBuf>, fsync: FsyncLevel) -> Result<Self, Error> {
        let base = base.into();
        if !base.is_absolute() {
            anyhow::bail!("pool storage path must be absolute, got {base:?}");
        }
        create_path(&base, Some(CreateOptions::new()), Some(CreateOptions::new()))
            .map_err(|err| format_err!("unable to create pool directory {base:?} - {err}"))?;
        Ok(Self {
            base,
            fsync,
            mkdir_lock: Mutex::new(()),
        })
    }

    fn object_path(&self, digest: &Digest) -> PathBuf {
        let (prefix, rest) = digest_to_path(digest);
        self.base.join(prefix).join(rest)
    }
}

impl StorageNode for FilesystemStore {
    fn store(&self, digest: &Digest, data: &[u8]) -> Result<(), Error> {
        let path = self.object_path(digest);
        if path.exists() {
            return Ok(());
        }

        let staging = self.base.join(format!("new-{}", std::process::id()));

        let write_once = || -> Result<(), Error> {
            proxmox_sys::fs::replace_file(
                &staging,
                data,
                CreateOptions::new(),
                self.fsync != FsyncLevel::None,
            )?;
            match std::fs::rename(&staging, &path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    let dir = path.parent().unwrap();
                    let _guard = self.mkdir_lock.lock().unwrap();
                    create_dir(dir, CreateOptions::new())
                        .map_err(|err| format_err!("unable to create {dir:?} - {err}"))?;
                    std::fs::rename(&staging, &path).map_err(Error::from)
                }
                Err(err) => Err(err.into()),
            }
        };
        write_once()?;

        if self.fsync == FsyncLevel::File {
            fbk_tools::fs::sync_parent_dir(&path)?;
        }
        Ok(())
    }

    fn retrieve(&self, digest: &Digest) -> Result<Option<Vec<u8>>, Error> {
        match std::fs::read(self.object_path(digest)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn has(&self, digest: &Digest) -> Result<bool, Error> {
        Ok(self.object_path(digest).exists())
    }

    fn remove(&self, digest: &Digest) -> Result<(), Error> {
        match std::fs::remove_file(self.object_path(digest)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn iterate(&self) -> Result<Box<dyn Iterator<Item = Result<DigestBatch, Error>> + '_>, Error> {
        let mut subdirs: Vec<String> = std::fs::read_dir(&self.base)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.len() == 2)
            .collect();
        subdirs.sort();

        let base = self.base.clone();
        Ok(Box::new(subdirs.into_iter().map(move |prefix| {
            let dir = base.join(&prefix);
            let mut batch = Vec::new();
            for entry in std::fs::read_dir(&dir)
                .map_err(|err| format_err!("unable to read pool subdir {dir:?} - {err}"))?
            {
                let entry = entry?;
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(digest) = path_to_digest(&prefix, name) {
                        batch.push(digest);
                    }
                }
            }
            Ok(batch)
        })))
    }
}
