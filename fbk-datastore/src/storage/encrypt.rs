//! The at-rest encryption filter: AES-256-CBC with a detached
//! HMAC-SHA256 over the padded plaintext, plus a deterministic
//! AES-256-ECB transform of the digest itself so object names on disk
//! don't leak which chunks are identical.
//!
//! Grounded in the teacher's `pbs-tools::crypt_config::CryptConfig`
//! (subkeys derived from one master key via PBKDF2, `openssl::symm` for
//! the cipher primitives) but CBC+HMAC instead of GCM, since the data
//! model calls out a detached MAC rather than an AEAD tag.

use std::path::Path;

use anyhow::{bail, Context, Error};
use openssl::hash::MessageDigest;
use openssl::memcmp;
use openssl::pkey::PKey;
use openssl::rand::rand_bytes;
use openssl::sign::Signer;
use openssl::symm::{Cipher, Crypter, Mode};

use fbk_tools::digest::Digest;

use super::StorageFilter;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const HMAC_LEN: usize = 32;
const PBKDF2_ITERATIONS: usize = 10;

fn derive_subkey(master: &[u8], label: &[u8]) -> Result<[u8; KEY_LEN], Error> {
    let mut out = [0u8; KEY_LEN];
    openssl::pkcs5::pbkdf2_hmac(
        master,
        label,
        PBKDF2_ITERATIONS,
        MessageDigest::sha256(),
        &mut out,
    )
    .context("key derivation failed")?;
    Ok(out)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; HMAC_LEN], Error> {
    let pkey = PKey::hmac(key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
    signer.update(data)?;
    let mac = signer.sign_to_vec()?;
    mac.try_into()
        .map_err(|_| anyhow::anyhow!("unexpected HMAC length"))
}

fn crypt(cipher: Cipher, mode: Mode, key: &[u8], iv: Option<&[u8]>, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut crypter = Crypter::new(cipher, mode, key, iv)?;
    crypter.pad(false);
    let mut out = vec![0u8; data.len() + cipher.block_size()];
    let mut written = crypter.update(data, &mut out)?;
    written += crypter.finalize(&mut out[written..])?;
    out.truncate(written);
    Ok(out)
}

pub struct EncryptConfig {
    enc_key: [u8; KEY_LEN],
    hmac_key: [u8; KEY_LEN],
    name_key: [u8; KEY_LEN],
}

impl EncryptConfig {
    pub fn load(keyfile: &Path) -> Result<Self, Error> {
        let master = std::fs::read(keyfile)
            .with_context(|| format!("unable to read encryption keyfile {keyfile:?}"))?;
        if master.len() < KEY_LEN {
            bail!("encryption keyfile {keyfile:?} is too short");
        }
        Self::from_master(&master)
    }

    pub fn from_master(master: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            enc_key: derive_subkey(master, b"fruitbak chunk encryption key")?,
            hmac_key: derive_subkey(master, b"fruitbak chunk hmac key")?,
            name_key: derive_subkey(master, b"fruitbak chunk name key")?,
        })
    }
}

pub struct Encrypt {
    config: EncryptConfig,
}

impl Encrypt {
    pub fn new(config: EncryptConfig) -> Self {
        Self { config }
    }
}

impl StorageFilter for Encrypt {
    fn apply(&self, _digest: &Digest, data: &[u8]) -> Result<Vec<u8>, Error> {
        let pad_len = (16 - ((data.len() + 1) % 16)) % 16;
        let mut padded = Vec::with_capacity(1 + data.len() + pad_len);
        padded.push(pad_len as u8);
        padded.extend_from_slice(data);
        padded.extend(std::iter::repeat(0u8).take(pad_len));

        let hmac = hmac_sha256(&self.config.hmac_key, &padded)?;
        let mut combined = Vec::with_capacity(HMAC_LEN + padded.len());
        combined.extend_from_slice(&hmac);
        combined.extend_from_slice(&padded);

        let mut iv = [0u8; IV_LEN];
        rand_bytes(&mut iv)?;
        let ciphertext = crypt(
            Cipher::aes_256_cbc(),
            Mode::Encrypt,
            &self.config.enc_key,
            Some(&iv),
            &combined,
        )?;

        let mut on_disk = Vec::with_capacity(IV_LEN + ciphertext.len());
        on_disk.extend_from_slice(&iv);
        on_disk.extend_from_slice(&ciphertext);
        Ok(on_disk)
    }

    fn unapply(&self, _digest: &Digest, data: Vec<u8>) -> Result<Vec<u8>, Error> {
        if data.len() < IV_LEN + HMAC_LEN + 16 {
            bail!("encrypted chunk is too short");
        }
        let (iv, ciphertext) = data.split_at(IV_LEN);
        let combined = crypt(
            Cipher::aes_256_cbc(),
            Mode::Decrypt,
            &self.config.enc_key,
            Some(iv),
            ciphertext,
        )?;
        if combined.len() < HMAC_LEN + 16 {
            bail!("decrypted chunk is too short");
        }
        let (stored_hmac, padded) = combined.split_at(HMAC_LEN);
        let expected_hmac = hmac_sha256(&self.config.hmac_key, padded)?;
        if !memcmp::eq(stored_hmac, &expected_hmac) {
            bail!("chunk authentication failed");
        }

        let pad_len = padded[0] as usize;
        if padded.len() < 1 + pad_len {
            bail!("corrupt padding in decrypted chunk");
        }
        let plaintext_len = padded.len() - 1 - pad_len;
        Ok(padded[1..1 + plaintext_len].to_vec())
    }

    fn storage_digest(&self, digest: &Digest) -> Digest {
        crypt(
            Cipher::aes_256_ecb(),
            Mode::Encrypt,
            &self.config.name_key,
            None,
            digest,
        )
        .expect("ecb encryption of a fixed-size digest cannot fail")
        .try_into()
        .expect("ecb output is digest-sized")
    }

    fn unstorage_digest(&self, digest: &Digest) -> Digest {
        crypt(
            Cipher::aes_256_ecb(),
            Mode::Decrypt,
            &self.config.name_key,
            None,
            digest,
        )
        .expect("ecb decryption of a fixed-size digest cannot fail")
        .try_into()
        .expect("ecb output is digest-sized")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EncryptConfig {
        EncryptConfig::from_master(&[0x42u8; 32]).unwrap()
    }

    #[test]
    fn roundtrips_payload() {
        let encrypt = Encrypt::new(config());
        let digest = [1u8; 32];
        for len in [0, 1, 15, 16, 17, 1000] {
            let data = vec![0xABu8; len];
            let stored = encrypt.apply(&digest, &data).unwrap();
            let restored = encrypt.unapply(&digest, stored).unwrap();
            assert_eq!(restored, data, "length {len}");
        }
    }

    #[test]
    fn roundtrips_digest_name() {
        let encrypt = Encrypt::new(config());
        let digest = [7u8; 32];
        let name = encrypt.storage_digest(&digest);
        assert_ne!(name, digest);
        assert_eq!(encrypt.unstorage_digest(&name), digest);
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let encrypt = Encrypt::new(config());
        let digest = [1u8; 32];
        let mut stored = encrypt.apply(&digest, b"hello world").unwrap();
        let last = stored.len() - 1;
        stored[last] ^= 0xFF;
        assert!(encrypt.unapply(&digest, stored).is_err());
    }
}
