//! SHA-256 digest helper shared by the pool, hashset and hardhat modules.
//!
//! A digest is always the raw 32-byte SHA-256 output; hex formatting is
//! only used at the edges (directory names, log messages, the CLI).

use openssl::sha::Sha256;

pub const DIGEST_BYTES: usize = 32;

pub type Digest = [u8; DIGEST_BYTES];

pub fn digest_of(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finish()
}

/// Incremental digest computation for streamed data (pool writer chunks
/// larger than one `update` call, or whole-file digests).
#[derive(Default)]
pub struct DigestHasher(Sha256);

impl DigestHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finish(self) -> Digest {
        self.0.finish()
    }
}

pub fn to_hex(digest: &Digest) -> String {
    hex::encode(digest)
}

pub fn from_hex(s: &str) -> Result<Digest, anyhow::Error> {
    let bytes = hex::decode(s)?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| anyhow::anyhow!("expected {} byte digest, got {}", DIGEST_BYTES, v.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let d = digest_of(b"hello world");
        assert_eq!(from_hex(&to_hex(&d)).unwrap(), d);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut h = DigestHasher::new();
        h.update(b"hello ");
        h.update(b"world");
        assert_eq!(h.finish(), digest_of(b"hello world"));
    }
}
