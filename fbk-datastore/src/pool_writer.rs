//! Streams bytes into fixed-size chunks and stores the new ones (C5).

use anyhow::Error;

use crate::hashset::Hashset;
use crate::pool::Pool;
use crate::DigestList;
use fbk_tools::digest::Digest;

/// Something a pool writer can consult to skip re-storing a chunk it
/// already knows is elsewhere: a reference file's own digest list, or
/// a whole backup's hashset. Owns its digest-list data so a writer can
/// be built from values with no lifetime tied to the `Pool` itself.
pub enum PriorSource<'a> {
    Hashset(&'a Hashset),
    Digests(Vec<Digest>),
}

impl PriorSource<'_> {
    fn contains(&self, digest: &Digest) -> bool {
        match self {
            PriorSource::Hashset(h) => h.contains(digest),
            PriorSource::Digests(v) => v.contains(digest),
        }
    }
}

pub struct PoolWriter<'a> {
    pool: &'a Pool,
    buffer: Vec<u8>,
    digests: DigestList,
    total_bytes: u64,
    prior: Vec<PriorSource<'a>>,
}

impl<'a> PoolWriter<'a> {
    pub(crate) fn new(pool: &'a Pool) -> Self {
        Self {
            pool,
            buffer: Vec::new(),
            digests: Vec::new(),
            total_bytes: 0,
            prior: Vec::new(),
        }
    }

    /// Registers digest sources consulted before storing a new chunk:
    /// a matching digest here means the chunk is already known to exist
    /// somewhere in the pool, so storage is skipped.
    pub fn with_prior_hashsets(mut self, sources: Vec<PriorSource<'a>>) -> Self {
        self.prior = sources;
        self
    }

    pub fn write(&mut self, mut buf: &[u8]) -> Result<(), Error> {
        let chunksize = self.pool.chunksize() as usize;
        while !buf.is_empty() {
            let space = chunksize - self.buffer.len();
            let take = space.min(buf.len());
            self.buffer.extend_from_slice(&buf[..take]);
            buf = &buf[take..];
            if self.buffer.len() == chunksize {
                self.flush_chunk()?;
            }
        }
        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<(), Error> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.buffer);
        let digest = Pool::digest_of(&chunk);
        self.total_bytes += chunk.len() as u64;

        let already_known = self.prior.iter().any(|source| source.contains(&digest));
        if !already_known {
            self.pool.store(&digest, &chunk)?;
        }
        self.digests.push(digest);
        Ok(())
    }

    /// Flushes any residual buffered bytes as a short final chunk and
    /// returns the complete digest list plus total byte count.
    pub fn close(mut self) -> Result<(DigestList, u64), Error> {
        self.flush_chunk()?;
        Ok((self.digests, self.total_bytes))
    }

    /// Discards buffered-but-unflushed bytes. Chunks already stored
    /// stay put; they're content-addressed, so there's nothing to
    /// unwind.
    pub fn abort(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbk_api_types::FsyncLevel;
    use fbk_config::PoolConfig;

    fn pool(dir: &std::path::Path) -> Pool {
        let config = PoolConfig {
            chunksize: 8,
            ..Default::default()
        };
        Pool::open(dir, &config).unwrap()
    }

    #[test]
    fn splits_into_fixed_size_chunks() {
        let dir = std::env::temp_dir().join(format!("fbk-poolwriter-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pool = pool(&dir);

        let mut writer = pool.writer();
        writer.write(b"0123456789ABCDEF!!!").unwrap(); // 19 bytes, chunksize 8
        let (digests, total) = writer.close().unwrap();

        assert_eq!(total, 19);
        assert_eq!(digests.len(), 3); // 8 + 8 + 3
        for d in &digests {
            assert!(pool.has(d).unwrap());
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn skips_storage_for_digests_in_prior_hashset() {
        let dir = std::env::temp_dir().join(format!("fbk-poolwriter-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pool = pool(&dir);

        let chunk = b"AAAAAAAA".to_vec();
        let digest = Pool::digest_of(&chunk);
        let hashset_path = dir.join("prior-hashes");
        Hashset::build(&hashset_path, vec![vec![digest]], FsyncLevel::None).unwrap();
        let prior = Hashset::load(&hashset_path).unwrap();

        let mut writer = pool.writer().with_prior_hashsets(vec![PriorSource::Hashset(&prior)]);
        writer.write(&chunk).unwrap();
        writer.close().unwrap();

        assert!(!pool.has(&digest).unwrap());

        std::fs::remove_dir_all(&dir).ok();
    }
}
