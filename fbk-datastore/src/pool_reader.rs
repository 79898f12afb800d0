//! Random-access view over a digest list (C6): translates byte offsets
//! to chunk indices, caching the single most recently fetched chunk.

use std::cell::RefCell;

use anyhow::{format_err, Error};

use crate::pool::Pool;
use crate::DigestList;

pub struct PoolReader<'a> {
    pool: &'a Pool,
    digests: DigestList,
    total_size: u64,
    cursor: u64,
    cache: RefCell<Option<(usize, Vec<u8>)>>,
}

impl<'a> PoolReader<'a> {
    pub(crate) fn new(pool: &'a Pool, digests: DigestList, total_size: u64) -> Self {
        Self {
            pool,
            digests,
            total_size,
            cursor: 0,
            cache: RefCell::new(None),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    fn chunk(&self, index: usize) -> Result<Vec<u8>, Error> {
        if let Some((cached_index, data)) = self.cache.borrow().as_ref() {
            if *cached_index == index {
                return Ok(data.clone());
            }
        }
        let digest = self
            .digests
            .get(index)
            .ok_or_else(|| format_err!("chunk index {index} out of range for this file"))?;
        let data = self.pool.retrieve(digest)?.ok_or_else(|| {
            format_err!(
                "chunk {} referenced by this file is missing from the pool",
                hex::encode(digest)
            )
        })?;
        *self.cache.borrow_mut() = Some((index, data.clone()));
        Ok(data)
    }

    /// Reads up to `length` bytes starting at `offset`, clamped to the
    /// file's logical size. Never re-fetches a chunk it already has
    /// cached from the previous call.
    pub fn pread(&self, offset: u64, length: u64) -> Result<Vec<u8>, Error> {
        if offset >= self.total_size || length == 0 {
            return Ok(Vec::new());
        }
        let chunksize = self.pool.chunksize();
        let end = offset.saturating_add(length).min(self.total_size);
        let mut out = Vec::with_capacity((end - offset) as usize);
        let mut pos = offset;
        while pos < end {
            let index = (pos / chunksize) as usize;
            let inner_offset = (pos % chunksize) as usize;
            let chunk = self.chunk(index)?;
            let available = chunk.len() - inner_offset;
            let take = available.min((end - pos) as usize);
            out.extend_from_slice(&chunk[inner_offset..inner_offset + take]);
            pos += take as u64;
        }
        Ok(out)
    }

    /// Sequential read starting from the internal cursor, which
    /// advances by the number of bytes actually returned.
    pub fn read(&mut self, length: u64) -> Result<Vec<u8>, Error> {
        let data = self.pread(self.cursor, length)?;
        self.cursor += data.len() as u64;
        Ok(data)
    }

    pub fn seek(&mut self, offset: u64) {
        self.cursor = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbk_api_types::FsyncLevel;
    use fbk_config::PoolConfig;

    fn pool(dir: &std::path::Path) -> Pool {
        let config = PoolConfig {
            chunksize: 4,
            ..Default::default()
        };
        Pool::open(dir, &config).unwrap()
    }

    #[test]
    fn reads_across_chunk_boundaries() {
        let dir = std::env::temp_dir().join(format!("fbk-poolreader-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pool = pool(&dir);

        let mut writer = pool.writer();
        writer.write(b"0123456789").unwrap(); // chunks: "0123","4567","89"
        let (digests, total) = writer.close().unwrap();

        let reader = pool.reader(digests, total);
        assert_eq!(reader.pread(0, 10).unwrap(), b"0123456789");
        assert_eq!(reader.pread(2, 4).unwrap(), b"2345");
        assert_eq!(reader.pread(8, 10).unwrap(), b"89"); // clamped to logical end
        assert_eq!(reader.pread(100, 5).unwrap(), b"");

        let mut reader = pool.reader(reader.digests.clone(), total);
        assert_eq!(reader.read(3).unwrap(), b"012");
        assert_eq!(reader.read(3).unwrap(), b"345");

        std::fs::remove_dir_all(&dir).ok();
    }
}
