//! Magic numbers for this crate's two on-disk binary formats, following
//! the `sha256(label)[0..8]` convention so a corrupt or foreign file is
//! rejected immediately instead of being misparsed.

// WARNING: PLEASE DO NOT MODIFY THESE MAGIC VALUES

// openssl::sha::sha256(b"Fruitbak hashset file v1.0")[0..8]
pub const HASHSET_MAGIC_1_0: [u8; 8] = [134, 109, 216, 19, 21, 20, 95, 26];

// openssl::sha::sha256(b"Fruitbak share index file v1.0")[0..8]
pub const HARDHAT_MAGIC_1_0: [u8; 8] = [35, 113, 44, 52, 198, 255, 194, 237];
