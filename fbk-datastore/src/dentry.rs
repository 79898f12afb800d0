//! Directory entries (§3, §6): the value half of a share index
//! key-value pair. The wire format is a flat, versioned record; on top
//! of it we expose a tagged-sum view (`DentryKind`) so callers never
//! have to hand-decode `extra` against `mode & S_IFMT` themselves.

use anyhow::{bail, Error};

use fbk_tools::digest::{Digest, DIGEST_BYTES};

/// Reserved high bit of `mode`: this entry is a hardlink reference and
/// `extra` holds the target path instead of type-specific payload.
pub const R_HARDLINK: u32 = 0x4000_0000;

const VERSION: u32 = 0;

/// The record written into the share index, exactly as it appears on
/// disk (modulo endianness). `name` is carried alongside for
/// convenience but is not part of the serialized value — it's the
/// index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dentry {
    pub name: String,
    pub mode: u32,
    pub size: u64,
    pub mtime_ns: u64,
    pub uid: u32,
    pub gid: u32,
    pub extra: Vec<u8>,
}

/// A type-safe view of what `extra` holds, derived from `mode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DentryKind {
    File { digests: Vec<Digest> },
    Dir,
    Symlink { target: Vec<u8> },
    Device { major: u32, minor: u32 },
    Hardlink { target_name: String },
    Fifo,
    Socket,
}

impl Dentry {
    pub fn new(name: impl Into<String>, mode: u32, size: u64, mtime_ns: u64, uid: u32, gid: u32, kind: DentryKind) -> Self {
        let (mode, extra) = match kind {
            DentryKind::File { digests } => {
                let mut buf = Vec::with_capacity(digests.len() * DIGEST_BYTES);
                for d in &digests {
                    buf.extend_from_slice(d);
                }
                (mode, buf)
            }
            DentryKind::Dir | DentryKind::Fifo | DentryKind::Socket => (mode, Vec::new()),
            DentryKind::Symlink { target } => (mode, target),
            DentryKind::Device { major, minor } => {
                let mut buf = Vec::with_capacity(8);
                buf.extend_from_slice(&major.to_le_bytes());
                buf.extend_from_slice(&minor.to_le_bytes());
                (mode, buf)
            }
            DentryKind::Hardlink { target_name } => (mode | R_HARDLINK, target_name.into_bytes()),
        };
        Self {
            name: name.into(),
            mode,
            size,
            mtime_ns,
            uid,
            gid,
            extra,
        }
    }

    pub fn is_hardlink(&self) -> bool {
        self.mode & R_HARDLINK != 0
    }

    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR
    }

    /// Decode `extra` against `mode`. Callers handling hardlinks
    /// generally want the raw record (to fetch `target_name`) before
    /// resolving to the target's own `kind()`.
    pub fn kind(&self) -> Result<DentryKind, Error> {
        if self.is_hardlink() {
            let target_name = String::from_utf8(self.extra.clone())
                .map_err(|_| anyhow::anyhow!("hardlink target name for {:?} is not valid UTF-8", self.name))?;
            return Ok(DentryKind::Hardlink { target_name });
        }
        match self.file_type() {
            libc::S_IFREG => {
                if self.extra.len() % DIGEST_BYTES != 0 {
                    bail!("dentry {:?} has a digest list of invalid length", self.name);
                }
                let digests = self
                    .extra
                    .chunks_exact(DIGEST_BYTES)
                    .map(|c| <Digest>::try_from(c).unwrap())
                    .collect();
                Ok(DentryKind::File { digests })
            }
            libc::S_IFDIR => Ok(DentryKind::Dir),
            libc::S_IFLNK => Ok(DentryKind::Symlink {
                target: self.extra.clone(),
            }),
            libc::S_IFBLK | libc::S_IFCHR => {
                if self.extra.len() != 8 {
                    bail!("dentry {:?} has a malformed device payload", self.name);
                }
                let major = u32::from_le_bytes(self.extra[0..4].try_into().unwrap());
                let minor = u32::from_le_bytes(self.extra[4..8].try_into().unwrap());
                Ok(DentryKind::Device { major, minor })
            }
            libc::S_IFIFO => Ok(DentryKind::Fifo),
            libc::S_IFSOCK => Ok(DentryKind::Socket),
            other => bail!("dentry {:?} has unrecognized file type {other:#o}", self.name),
        }
    }

    /// Synthetic entry for a directory prefix the maker had to invent
    /// because no explicit entry covered it.
    pub fn synthetic_dir(name: impl Into<String>) -> Self {
        Self::new(name, libc::S_IFDIR | 0o755, 0, 0, 0, 0, DentryKind::Dir)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24 + self.extra.len());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&self.mode.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.mtime_ns.to_le_bytes());
        buf.extend_from_slice(&self.uid.to_le_bytes());
        buf.extend_from_slice(&self.gid.to_le_bytes());
        buf.extend_from_slice(&self.extra);
        buf
    }

    pub fn deserialize(name: impl Into<String>, data: &[u8]) -> Result<Self, Error> {
        if data.len() < 24 {
            bail!("dentry record too short ({} bytes)", data.len());
        }
        let version = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if version != VERSION {
            bail!("dentry record has unsupported version {version}");
        }
        let mode = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let size = u64::from_le_bytes(data[8..16].try_into().unwrap());
        let mtime_ns = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let uid = u32::from_le_bytes(data[24..28].try_into().unwrap());
        let gid = u32::from_le_bytes(data[28..32].try_into().unwrap());
        let extra = data[32..].to_vec();
        Ok(Self {
            name: name.into(),
            mode,
            size,
            mtime_ns,
            uid,
            gid,
            extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_regular_file() {
        let digests = vec![[1u8; DIGEST_BYTES], [2u8; DIGEST_BYTES]];
        let dentry = Dentry::new(
            "some/file.txt",
            libc::S_IFREG | 0o644,
            4_000_000,
            1_700_000_000_000_000_000,
            1000,
            1000,
            DentryKind::File { digests: digests.clone() },
        );
        let raw = dentry.serialize();
        let restored = Dentry::deserialize(dentry.name.clone(), &raw).unwrap();
        assert_eq!(restored, dentry);
        assert_eq!(restored.kind().unwrap(), DentryKind::File { digests });
    }

    #[test]
    fn hardlink_sets_reserved_bit() {
        let dentry = Dentry::new(
            "bar",
            libc::S_IFREG | 0o644,
            0,
            0,
            0,
            0,
            DentryKind::Hardlink {
                target_name: "foo".to_string(),
            },
        );
        assert!(dentry.is_hardlink());
        assert_eq!(
            dentry.kind().unwrap(),
            DentryKind::Hardlink {
                target_name: "foo".to_string()
            }
        );
    }

    #[test]
    fn rejects_future_version() {
        let mut raw = Dentry::synthetic_dir("").serialize();
        raw[0] = 1;
        assert!(Dentry::deserialize("".to_string(), &raw).is_err());
    }
}
