//! Write-once, read-many share index ("hardhat", C2): a key-value store
//! keyed by slash-separated share paths. The maker links every entry
//! into a first-child/next-sibling tree so `ls` and `find` step in O(1)
//! per entry instead of scanning; the reader mmaps the file and
//! binary-searches it, the same technique the digest `Hashset` (C1)
//! uses for its own flat array.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fs::File;
use std::num::NonZeroUsize;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use anyhow::{bail, format_err, Error};
use proxmox_sys::fs::{replace_file, CreateOptions};

use fbk_api_types::FsyncLevel;

use crate::file_formats::HARDHAT_MAGIC_1_0;

const HEADER_SIZE: usize = 4096;
const RECORD_SIZE: usize = 32;

/// An in-memory decode of one 32-byte index record.
struct Record {
    key_offset: u64,
    key_length: u32,
    value_offset: u64,
    value_length: u32,
    first_child: u32,
    next_sibling: u32,
}

impl Record {
    fn from_bytes(b: &[u8]) -> Self {
        Self {
            key_offset: u64::from_le_bytes(b[0..8].try_into().unwrap()),
            key_length: u32::from_le_bytes(b[8..12].try_into().unwrap()),
            value_offset: u64::from_le_bytes(b[12..20].try_into().unwrap()),
            value_length: u32::from_le_bytes(b[20..24].try_into().unwrap()),
            first_child: u32::from_le_bytes(b[24..28].try_into().unwrap()),
            next_sibling: u32::from_le_bytes(b[28..32].try_into().unwrap()),
        }
    }
}

fn parent_of(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    match key.rfind('/') {
        Some(idx) => Some(&key[..idx]),
        None => Some(""),
    }
}

/// An entry handed back by `get`/`ls`/`find`: the key, its raw
/// (still-serialized) value, and its stable 1-based inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub value: Vec<u8>,
    pub inode: u32,
}

/// Accepts `(key, value)` pairs in arbitrary order and builds the index
/// file on `finish`.
pub struct HardhatMaker {
    entries: HashMap<String, Vec<u8>>,
}

impl Default for HardhatMaker {
    fn default() -> Self {
        Self::new()
    }
}

impl HardhatMaker {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn add(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.entries.insert(key.into(), value);
    }

    /// Sort, synthesize missing parents (and the root, if absent) via
    /// `default_value`, link the tree, and write the file atomically.
    pub fn finish(
        mut self,
        path: &Path,
        fsync: FsyncLevel,
        mut default_value: impl FnMut(&str) -> Vec<u8>,
    ) -> Result<(), Error> {
        let mut pending: Vec<String> = self.entries.keys().cloned().collect();
        while let Some(key) = pending.pop() {
            if let Some(parent) = parent_of(&key) {
                if !self.entries.contains_key(parent) {
                    self.entries.insert(parent.to_string(), default_value(parent));
                    pending.push(parent.to_string());
                }
            }
        }
        if !self.entries.contains_key("") {
            self.entries.insert(String::new(), default_value(""));
        }

        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();

        let index_of: HashMap<&str, u32> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i as u32))
            .collect();

        let mut first_child = vec![0u32; keys.len()];
        let mut next_sibling = vec![0u32; keys.len()];
        let mut last_child_of: HashMap<u32, u32> = HashMap::new();

        for (i, key) in keys.iter().enumerate() {
            let i = i as u32;
            if let Some(parent_idx) = parent_of(key).and_then(|p| index_of.get(p)) {
                match last_child_of.get(parent_idx) {
                    Some(&last) => next_sibling[last as usize] = i + 1,
                    None => first_child[*parent_idx as usize] = i + 1,
                }
                last_child_of.insert(*parent_idx, i);
            }
        }

        let mut key_blob = Vec::new();
        let mut value_blob = Vec::new();
        let mut records = Vec::with_capacity(keys.len() * RECORD_SIZE);
        for (i, key) in keys.iter().enumerate() {
            let key_offset = key_blob.len() as u64;
            key_blob.extend_from_slice(key.as_bytes());

            let value = &self.entries[key];
            let value_offset = value_blob.len() as u64;
            value_blob.extend_from_slice(value);

            records.extend_from_slice(&key_offset.to_le_bytes());
            records.extend_from_slice(&(key.len() as u32).to_le_bytes());
            records.extend_from_slice(&value_offset.to_le_bytes());
            records.extend_from_slice(&(value.len() as u32).to_le_bytes());
            records.extend_from_slice(&first_child[i].to_le_bytes());
            records.extend_from_slice(&next_sibling[i].to_le_bytes());
        }

        let key_blob_offset = (HEADER_SIZE + records.len()) as u64;
        let value_blob_offset = key_blob_offset + key_blob.len() as u64;

        let mut buf = Vec::with_capacity(
            HEADER_SIZE + records.len() + key_blob.len() + value_blob.len(),
        );
        buf.extend_from_slice(&HARDHAT_MAGIC_1_0);
        buf.extend_from_slice(&(keys.len() as u64).to_le_bytes());
        buf.extend_from_slice(&key_blob_offset.to_le_bytes());
        buf.extend_from_slice(&(key_blob.len() as u64).to_le_bytes());
        buf.extend_from_slice(&value_blob_offset.to_le_bytes());
        buf.extend_from_slice(&(value_blob.len() as u64).to_le_bytes());
        buf.extend(std::iter::repeat(0u8).take(HEADER_SIZE - 48));
        buf.extend_from_slice(&records);
        buf.extend_from_slice(&key_blob);
        buf.extend_from_slice(&value_blob);

        replace_file(path, &buf, CreateOptions::new(), fsync != FsyncLevel::None)
            .map_err(|err| format_err!("failed to write share index {path:?} - {err}"))?;
        if fsync == FsyncLevel::Filesystem {
            fbk_tools::fs::sync_parent_dir(path)?;
        }
        Ok(())
    }
}

/// A finalized, read-only, mmapped share index.
pub struct HardhatReader {
    _file: File,
    data: *mut u8,
    len: usize,
    count: usize,
    key_blob_offset: usize,
    value_blob_offset: usize,
}

unsafe impl Send for HardhatReader {}
unsafe impl Sync for HardhatReader {}

impl Drop for HardhatReader {
    fn drop(&mut self) {
        if !self.data.is_null() {
            let _ = unsafe { nix::sys::mman::munmap(self.data as *mut c_void, self.len) };
        }
    }
}

impl HardhatReader {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)
            .map_err(|err| format_err!("failed to open share index {path:?} - {err}"))?;
        let stat = nix::sys::stat::fstat(file.as_raw_fd())?;
        let len = stat.st_size as usize;
        if len < HEADER_SIZE {
            bail!("share index {path:?} is truncated");
        }
        let data = unsafe {
            nix::sys::mman::mmap(
                None,
                NonZeroUsize::new(len).unwrap(),
                nix::sys::mman::ProtFlags::PROT_READ,
                nix::sys::mman::MapFlags::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        }? as *mut u8;

        let header = unsafe { std::slice::from_raw_parts(data, HEADER_SIZE) };
        if header[0..8] != HARDHAT_MAGIC_1_0 {
            unsafe { nix::sys::mman::munmap(data as *mut c_void, len) }.ok();
            bail!("share index {path:?} has unknown magic number");
        }
        let count = u64::from_le_bytes(header[8..16].try_into().unwrap()) as usize;
        let key_blob_offset = u64::from_le_bytes(header[16..24].try_into().unwrap()) as usize;
        let value_blob_offset = u64::from_le_bytes(header[32..40].try_into().unwrap()) as usize;

        Ok(Self {
            _file: file,
            data,
            len,
            count,
            key_blob_offset,
            value_blob_offset,
        })
    }

    fn record(&self, index: usize) -> Record {
        let offset = HEADER_SIZE + index * RECORD_SIZE;
        let bytes = unsafe { std::slice::from_raw_parts(self.data.add(offset), RECORD_SIZE) };
        Record::from_bytes(bytes)
    }

    fn key_at(&self, index: usize) -> &str {
        let r = self.record(index);
        let offset = self.key_blob_offset + r.key_offset as usize;
        let bytes =
            unsafe { std::slice::from_raw_parts(self.data.add(offset), r.key_length as usize) };
        std::str::from_utf8(bytes).expect("share index keys are always UTF-8")
    }

    fn value_at(&self, index: usize) -> Vec<u8> {
        let r = self.record(index);
        let offset = self.value_blob_offset + r.value_offset as usize;
        unsafe {
            std::slice::from_raw_parts(self.data.add(offset), r.value_length as usize).to_vec()
        }
    }

    fn entry_at(&self, index: usize) -> Entry {
        Entry {
            name: self.key_at(index).to_string(),
            value: self.value_at(index),
            inode: index as u32 + 1,
        }
    }

    fn index_of(&self, path: &str) -> Option<usize> {
        let mut lo = 0usize;
        let mut hi = self.count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid).cmp(path) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, path: &str) -> Option<Entry> {
        self.index_of(path).map(|i| self.entry_at(i))
    }

    /// Direct children of `path`, in sorted order.
    pub fn ls(&self, path: &str) -> Result<Vec<Entry>, Error> {
        let idx = self
            .index_of(path)
            .ok_or_else(|| format_err!("no such entry: {path:?}"))?;
        let mut out = Vec::new();
        let mut child = self.record(idx).first_child;
        while child != 0 {
            let child_idx = (child - 1) as usize;
            out.push(self.entry_at(child_idx));
            child = self.record(child_idx).next_sibling;
        }
        Ok(out)
    }

    /// `path` and its entire subtree, in sorted order.
    pub fn find(&self, path: &str) -> Result<Vec<Entry>, Error> {
        let idx = self
            .index_of(path)
            .ok_or_else(|| format_err!("no such entry: {path:?}"))?;
        let mut out = Vec::new();
        self.visit(idx, &mut out);
        Ok(out)
    }

    fn visit(&self, idx: usize, out: &mut Vec<Entry>) {
        out.push(self.entry_at(idx));
        let mut child = self.record(idx).first_child;
        while child != 0 {
            let child_idx = (child - 1) as usize;
            self.visit(child_idx, out);
            child = self.record(child_idx).next_sibling;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("fbk-hardhat-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn builds_tree_and_lists_children() {
        let path = tmp_path("index.hh");
        let mut maker = HardhatMaker::new();
        maker.add("a", b"dir-a".to_vec());
        maker.add("a/b", b"file-b".to_vec());
        maker.add("a/c", b"file-c".to_vec());
        maker.add("d", b"file-d".to_vec());
        maker
            .finish(&path, FsyncLevel::None, |_| b"synthetic".to_vec())
            .unwrap();

        let reader = HardhatReader::open(&path).unwrap();
        assert_eq!(reader.len(), 5); // a, a/b, a/c, d, and synthesized ""

        let root = reader.get("").unwrap();
        assert_eq!(root.value, b"synthetic");

        let top: Vec<String> = reader.ls("").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(top, vec!["a".to_string(), "d".to_string()]);

        let under_a: Vec<String> = reader.ls("a").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(under_a, vec!["a/b".to_string(), "a/c".to_string()]);

        let subtree: Vec<String> = reader.find("a").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(subtree, vec!["a".to_string(), "a/b".to_string(), "a/c".to_string()]);

        assert!(reader.get("missing").is_none());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn inode_is_stable_one_based_rank() {
        let path = tmp_path("index2.hh");
        let mut maker = HardhatMaker::new();
        maker.add("", b"root".to_vec());
        maker.add("z", b"last".to_vec());
        maker
            .finish(&path, FsyncLevel::None, |_| b"synthetic".to_vec())
            .unwrap();

        let reader = HardhatReader::open(&path).unwrap();
        let root = reader.get("").unwrap();
        let z = reader.get("z").unwrap();
        assert_eq!(root.inode, 1);
        assert_eq!(z.inode, 2);

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
