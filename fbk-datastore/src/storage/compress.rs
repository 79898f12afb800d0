//! Gzip storage filter. Identity with respect to digests: compression
//! never changes what a digest identifies, only how many bytes its
//! plaintext takes on disk.

use std::io::{Read, Write};

use anyhow::{Context, Error};
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;

use fbk_tools::digest::Digest;

use super::StorageFilter;

pub struct Compress {
    level: Compression,
}

impl Compress {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for Compress {
    fn default() -> Self {
        Self::new(Compression::default().level())
    }
}

impl StorageFilter for Compress {
    fn apply(&self, _digest: &Digest, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(data).context("gzip compression failed")?;
        encoder.finish().context("gzip compression failed")
    }

    fn unapply(&self, _digest: &Digest, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        let mut decoder = GzDecoder::new(Vec::new());
        decoder.write_all(&data).context("gzip decompression failed")?;
        decoder.finish().context("gzip decompression failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let filter = Compress::default();
        let digest = [0u8; 32];
        let data = b"hello world hello world hello world".to_vec();
        let compressed = filter.apply(&digest, &data).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = filter.unapply(&digest, compressed).unwrap();
        assert_eq!(decompressed, data);
    }
}
