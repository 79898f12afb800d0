//! The innermost filter in the default chain: checks plaintext against
//! its digest on the way back out of the pool. Nothing on the write
//! side can forge a digest (the caller always computes it from the
//! plaintext first), so `apply` has nothing to do.

use anyhow::{bail, Error};

use fbk_tools::digest::{digest_of, Digest};

use super::StorageFilter;

#[derive(Default)]
pub struct Verify;

impl StorageFilter for Verify {
    fn apply(&self, _digest: &Digest, data: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(data.to_vec())
    }

    fn unapply(&self, digest: &Digest, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        let actual = digest_of(&data);
        if &actual != digest {
            bail!(
                "chunk corruption detected: expected digest {}, got {}",
                hex::encode(digest),
                hex::encode(actual)
            );
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_matching_digest() {
        let verify = Verify;
        let data = b"some chunk content".to_vec();
        let digest = digest_of(&data);
        let stored = verify.apply(&digest, &data).unwrap();
        let restored = verify.unapply(&digest, stored).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn rejects_corrupt_data() {
        let verify = Verify;
        let digest = digest_of(b"original");
        assert!(verify.unapply(&digest, b"tampered".to_vec()).is_err());
    }
}
