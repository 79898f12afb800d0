//! Sorted, deduplicated digest set (C1): `<rootdir>/hashes`,
//! `<host>/hashes`, `<host>/<backupnum>/hashes`, and per-share hashes
//! sidecars all use this format.
//!
//! The reader mmaps the digest array and binary-searches it, the same
//! technique the fixed-size chunk index in the teacher codebase uses for
//! its own flat digest array; here the array is additionally kept sorted
//! so lookup is a binary search rather than a positional index.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use anyhow::{bail, format_err, Error};
use proxmox_io::ReadExt;
use proxmox_sys::fs::{replace_file, CreateOptions};

use fbk_api_types::FsyncLevel;
use fbk_tools::digest::{Digest, DIGEST_BYTES};

use crate::file_formats::HASHSET_MAGIC_1_0;

#[repr(C)]
struct Header {
    magic: [u8; 8],
    count: u64,
    reserved: [u8; 4080],
}

const HEADER_SIZE: usize = std::mem::size_of::<Header>();

/// A loaded, immutable sorted digest set, mmapped read-only.
pub struct Hashset {
    _file: Option<File>,
    data: *mut u8,
    count: usize,
}

unsafe impl Send for Hashset {}
unsafe impl Sync for Hashset {}

impl Drop for Hashset {
    fn drop(&mut self) {
        if self.data.is_null() {
            return;
        }
        let len = self.count * DIGEST_BYTES;
        if len > 0 {
            let _ = unsafe { nix::sys::mman::munmap(self.data as *mut std::ffi::c_void, len) };
        }
    }
}

impl Hashset {
    /// Merge already-sorted digest streams, de-duplicate, and write the
    /// result atomically to `path`.
    pub fn build(path: &Path, sources: Vec<Vec<Digest>>, fsync: FsyncLevel) -> Result<(), Error> {
        let mut merged = Vec::new();
        for source in &sources {
            merged.extend_from_slice(source);
        }
        merged.sort_unstable();
        merged.dedup();
        Self::write_sorted(path, &merged, fsync)
    }

    /// Sort and dedup an unsorted digest list, writing it in the same
    /// format `build` would.
    pub fn sort_and_write(path: &Path, mut digests: Vec<Digest>, fsync: FsyncLevel) -> Result<(), Error> {
        digests.sort_unstable();
        digests.dedup();
        Self::write_sorted(path, &digests, fsync)
    }

    fn write_sorted(path: &Path, sorted: &[Digest], fsync: FsyncLevel) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + sorted.len() * DIGEST_BYTES);
        buf.extend_from_slice(&HASHSET_MAGIC_1_0);
        buf.extend_from_slice(&(sorted.len() as u64).to_le_bytes());
        buf.extend_from_slice(&[0u8; 4080]);
        for d in sorted {
            buf.extend_from_slice(d);
        }

        replace_file(path, &buf, CreateOptions::new(), fsync != FsyncLevel::None)
            .map_err(|err| format_err!("failed to write hashset {path:?} - {err}"))?;

        if fsync == FsyncLevel::Filesystem {
            fbk_tools::fs::sync_parent_dir(path)?;
        }
        Ok(())
    }

    /// Re-sort an existing file in place, e.g. after appending digests
    /// out of order during garbage collection's `available` accounting.
    pub fn sort_file(path: &Path) -> Result<(), Error> {
        let data = std::fs::read(path)?;
        if data.len() < HEADER_SIZE {
            bail!("hashset file {path:?} too small");
        }
        let mut digests = Vec::with_capacity((data.len() - HEADER_SIZE) / DIGEST_BYTES);
        for chunk in data[HEADER_SIZE..].chunks_exact(DIGEST_BYTES) {
            digests.push(<Digest>::try_from(chunk).unwrap());
        }
        Self::write_sorted(path, &{
            digests.sort_unstable();
            digests.dedup();
            digests
        }, FsyncLevel::File)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut file = File::open(path)
            .map_err(|err| format_err!("failed to open hashset {path:?} - {err}"))?;
        file.seek(SeekFrom::Start(0))?;

        let header: Box<Header> = unsafe { file.read_host_value_boxed()? };
        if header.magic != HASHSET_MAGIC_1_0 {
            bail!("hashset {path:?} has unknown magic number");
        }
        let count = u64::from_le(header.count) as usize;

        let stat = nix::sys::stat::fstat(file.as_raw_fd())?;
        let expected = HEADER_SIZE + count * DIGEST_BYTES;
        if stat.st_size as usize != expected {
            bail!(
                "hashset {path:?} has unexpected size ({} != {expected})",
                stat.st_size
            );
        }

        let data = if count == 0 {
            std::ptr::null_mut()
        } else {
            unsafe {
                nix::sys::mman::mmap(
                    None,
                    std::num::NonZeroUsize::new(count * DIGEST_BYTES).unwrap(),
                    nix::sys::mman::ProtFlags::PROT_READ,
                    nix::sys::mman::MapFlags::MAP_PRIVATE,
                    file.as_raw_fd(),
                    HEADER_SIZE as i64,
                )
            }? as *mut u8
        };

        Ok(Self {
            _file: Some(file),
            data,
            count,
        })
    }

    pub fn empty() -> Self {
        Self {
            _file: None,
            data: std::ptr::null_mut(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn digest_at(&self, pos: usize) -> &Digest {
        unsafe { &*(self.data.add(pos * DIGEST_BYTES) as *const Digest) }
    }

    fn as_slice(&self) -> &[Digest] {
        if self.count == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.data as *const Digest, self.count) }
        }
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.as_slice().binary_search(digest).is_ok()
    }

    /// Forward cursor starting at `first` (inclusive), or at the start
    /// when `first` is `None`.
    pub fn iterate(&self, first: Option<&Digest>) -> impl Iterator<Item = &Digest> {
        let start = match first {
            Some(d) => self.as_slice().partition_point(|x| x < d),
            None => 0,
        };
        self.as_slice()[start..].iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(b: u8) -> Digest {
        let mut digest = [0u8; DIGEST_BYTES];
        digest[0] = b;
        digest
    }

    #[test]
    fn build_sorts_and_dedups() {
        let dir = std::env::temp_dir().join(format!("fbk-hashset-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("hashes");

        Hashset::build(
            &path,
            vec![vec![d(5), d(1), d(3)], vec![d(3), d(7)]],
            FsyncLevel::None,
        )
        .unwrap();

        let set = Hashset::load(&path).unwrap();
        assert_eq!(set.len(), 4);
        assert!(set.contains(&d(1)));
        assert!(set.contains(&d(7)));
        assert!(!set.contains(&d(2)));

        let from_cursor: Vec<Digest> = set.iterate(Some(&d(3))).copied().collect();
        assert_eq!(from_cursor, vec![d(3), d(5), d(7)]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
