//! Parent-side state machine for the rsync-delta RPC protocol (§4.9).
//!
//! [`Session`] only knows about framed messages arriving on a [`Read`]
//! and replies going out on a [`Write`]; it has no idea whether those
//! come from a real child process's pipe or, in tests, an in-memory
//! buffer. Spawning the actual child lives in `rsync.rs`.

use std::io::{Read, Write};

use anyhow::{bail, format_err, Error};
use openssl::hash::{Hasher, MessageDigest};

use fbk_datastore::{Dentry, DentryKind, DigestList, Hashset, Pool, PoolReader, PoolWriter, PriorSource, ShareReader, ShareWriter};

use crate::attrib::Attribs;
use crate::rpc::{read_message, write_message, Opcode};

struct FileDelta<'a> {
    attrs: Attribs,
    blocksize: u32,
    reference_reader: PoolReader<'a>,
    writer: PoolWriter<'a>,
}

struct CsumSession<'a> {
    reader: PoolReader<'a>,
    md4: Option<Hasher>,
}

/// Drives one share transfer's worth of RPC traffic against a
/// reference share (if this is an incremental backup).
pub struct Session<'a> {
    pool: &'a Pool,
    writer: &'a mut ShareWriter,
    reference: Option<&'a ShareReader>,
    reference_hashset: Option<&'a Hashset>,
    whole_file: bool,
    checksum_seed: u32,
    file_delta: Option<FileDelta<'a>>,
    csum: Option<CsumSession<'a>>,
}

impl<'a> Session<'a> {
    pub fn new(
        pool: &'a Pool,
        writer: &'a mut ShareWriter,
        reference: Option<&'a ShareReader>,
        reference_hashset: Option<&'a Hashset>,
        whole_file: bool,
    ) -> Self {
        Self {
            pool,
            writer,
            reference,
            reference_hashset,
            whole_file,
            checksum_seed: 0,
            file_delta: None,
            csum: None,
        }
    }

    /// Processes framed messages from `from_child` until `finish` or a
    /// clean EOF, writing reply messages to `to_child` as needed.
    pub fn run(&mut self, mut from_child: impl Read, mut to_child: impl Write) -> Result<(), Error> {
        while let Some(message) = read_message(&mut from_child)? {
            match message.opcode {
                Opcode::Finish => break,
                Opcode::AttribGet => {
                    let attrs = Attribs::deserialize(&message.payload)?;
                    let reply = self.attrib_get(&attrs)?;
                    write_message(&mut to_child, Opcode::AttribGet, &reply.map(|a| a.serialize()).unwrap_or_default())?;
                }
                Opcode::FileDeltaRxStart => self.file_delta_rx_start(&message.payload)?,
                Opcode::FileDeltaRxNextBlocknum => self.file_delta_rx_next_blocknum(&message.payload)?,
                Opcode::FileDeltaRxNextData => self.file_delta_rx_next_data(&message.payload)?,
                Opcode::FileDeltaRxDone => self.file_delta_rx_done()?,
                Opcode::CsumStart => self.csum_start(&message.payload)?,
                Opcode::CsumGet => {
                    let reply = self.csum_get(&message.payload)?;
                    write_message(&mut to_child, Opcode::CsumGet, &reply)?;
                }
                Opcode::CsumEndDigest => {
                    let digest = self.csum_end(true)?;
                    write_message(&mut to_child, Opcode::CsumEndDigest, &digest.unwrap_or_default())?;
                }
                Opcode::CsumEnd => {
                    self.csum_end(false)?;
                }
                Opcode::AttribSet => self.attrib_set(&message.payload)?,
                Opcode::ProtocolVersion => {}
                Opcode::ChecksumSeed => {
                    if message.payload.len() < 4 {
                        bail!("checksumSeed payload too short");
                    }
                    self.checksum_seed = u32::from_le_bytes(message.payload[0..4].try_into().unwrap());
                }
            }
        }
        Ok(())
    }

    fn attrib_get(&self, attrs: &Attribs) -> Result<Option<Attribs>, Error> {
        let reference = match self.reference {
            Some(r) => r,
            None => return Ok(None),
        };
        let name = match &attrs.name {
            Some(n) => n,
            None => return Ok(None),
        };
        let entry = match reference.get_entry(name)? {
            Some(e) => e,
            None => return Ok(None),
        };
        if entry.file_type() != libc::S_IFREG || entry.is_hardlink() {
            return Ok(None);
        }
        if self.whole_file {
            let matches = attrs.mtime == Some(entry.mtime_ns)
                && attrs.size == Some(entry.size)
                && attrs.uid == Some(entry.uid)
                && attrs.gid == Some(entry.gid)
                && attrs.mode == Some(entry.mode);
            if !matches {
                return Ok(None);
            }
        }
        Ok(Some(Attribs {
            name: Some(name.clone()),
            mode: Some(entry.mode),
            size: Some(entry.size),
            mtime: Some(entry.mtime_ns),
            uid: Some(entry.uid),
            gid: Some(entry.gid),
            hlink_self: attrs.hlink_self.clone(),
            ..Attribs::default()
        }))
    }

    fn reference_file_digests(&self, name: &str) -> Result<(DigestList, u64), Error> {
        let entry = match self.reference {
            Some(reference) => reference.get_entry(name)?,
            None => None,
        };
        match entry {
            Some(entry) if entry.file_type() == libc::S_IFREG && !entry.is_hardlink() => match entry.kind()? {
                DentryKind::File { digests } => Ok((digests, entry.size)),
                _ => unreachable!("S_IFREG entries always decode as DentryKind::File"),
            },
            _ => Ok((Vec::new(), 0)),
        }
    }

    fn file_delta_rx_start(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() < 16 {
            bail!("fileDeltaRxStart payload too short");
        }
        let blocksize = u32::from_le_bytes(payload[8..12].try_into().unwrap());
        let attrs = Attribs::deserialize(&payload[16..])?;
        let name = attrs
            .name
            .clone()
            .ok_or_else(|| format_err!("fileDeltaRxStart attrs missing name"))?;

        let (reference_digests, reference_size) = self.reference_file_digests(&name)?;
        let reference_reader = self.pool.reader(reference_digests.clone(), reference_size);

        let mut prior = Vec::new();
        if let Some(hashset) = self.reference_hashset {
            prior.push(PriorSource::Hashset(hashset));
        }
        if !reference_digests.is_empty() {
            prior.push(PriorSource::Digests(reference_digests));
        }
        let writer = self.pool.writer().with_prior_hashsets(prior);

        self.file_delta = Some(FileDelta {
            attrs,
            blocksize,
            reference_reader,
            writer,
        });
        Ok(())
    }

    fn file_delta_rx_next_blocknum(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() < 8 {
            bail!("fileDeltaRxNext_blocknum payload too short");
        }
        let blocknum = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        let fd = self
            .file_delta
            .as_mut()
            .ok_or_else(|| format_err!("fileDeltaRxNext_blocknum with no open transfer"))?;
        let offset = blocknum * fd.blocksize as u64;
        let data = fd.reference_reader.pread(offset, fd.blocksize as u64)?;
        fd.writer.write(&data)
    }

    fn file_delta_rx_next_data(&mut self, payload: &[u8]) -> Result<(), Error> {
        let fd = self
            .file_delta
            .as_mut()
            .ok_or_else(|| format_err!("fileDeltaRxNext_data with no open transfer"))?;
        fd.writer.write(payload)
    }

    fn file_delta_rx_done(&mut self) -> Result<(), Error> {
        let fd = self
            .file_delta
            .take()
            .ok_or_else(|| format_err!("fileDeltaRxDone with no open transfer"))?;
        let (digests, total_bytes) = fd.writer.close()?;
        let name = fd
            .attrs
            .name
            .clone()
            .ok_or_else(|| format_err!("fileDeltaRxDone: attrs missing name"))?;
        let mode = fd.attrs.mode.unwrap_or(libc::S_IFREG as u32 | 0o644);
        let mtime = fd.attrs.mtime.unwrap_or(0);
        let uid = fd.attrs.uid.unwrap_or(0);
        let gid = fd.attrs.gid.unwrap_or(0);
        let dentry = Dentry::new(name, mode, total_bytes, mtime, uid, gid, DentryKind::File { digests });
        self.writer.add_entry(&dentry);
        Ok(())
    }

    fn csum_start(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() < 6 {
            bail!("csumStart payload too short");
        }
        let need_md4 = payload[4] != 0;
        let attrs = Attribs::deserialize(&payload[6..])?;
        let name = attrs.name.ok_or_else(|| format_err!("csumStart attrs missing name"))?;

        let reference = self
            .reference
            .ok_or_else(|| format_err!("csumStart with no reference backup"))?;
        let entry = reference
            .get_entry(&name)?
            .ok_or_else(|| format_err!("csumStart: {name:?} not found in reference share"))?;
        if entry.file_type() != libc::S_IFREG || entry.is_hardlink() {
            bail!("csumStart: reference entry {name:?} is not a regular file");
        }
        let digests = match entry.kind()? {
            DentryKind::File { digests } => digests,
            _ => unreachable!(),
        };
        let reader = self.pool.reader(digests, entry.size);

        let md4 = if need_md4 {
            let mut hasher = Hasher::new(MessageDigest::md4())?;
            hasher.update(&self.checksum_seed.to_le_bytes())?;
            Some(hasher)
        } else {
            None
        };

        self.csum = Some(CsumSession { reader, md4 });
        Ok(())
    }

    fn csum_get(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if payload.len() < 13 {
            bail!("csumGet payload too short");
        }
        let num = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        let blocksize = u32::from_le_bytes(payload[8..12].try_into().unwrap());
        let csumlen = (payload[12] as usize).min(16);

        let session = self
            .csum
            .as_mut()
            .ok_or_else(|| format_err!("csumGet with no open csum session"))?;

        let mut out = Vec::new();
        for _ in 0..num {
            let block = session.reader.read(blocksize as u64)?;
            if block.is_empty() {
                break;
            }
            if let Some(hasher) = session.md4.as_mut() {
                hasher.update(&block)?;
            }
            out.extend_from_slice(&weak_checksum(&block).to_le_bytes());
            out.extend_from_slice(&strong_checksum(&block, self.checksum_seed)?[..csumlen]);
        }
        Ok(out)
    }

    fn csum_end(&mut self, want_digest: bool) -> Result<Option<Vec<u8>>, Error> {
        let mut session = self
            .csum
            .take()
            .ok_or_else(|| format_err!("csumEnd with no open csum session"))?;
        loop {
            let chunk = session.reader.read(64 * 1024)?;
            if chunk.is_empty() {
                break;
            }
            if let Some(hasher) = session.md4.as_mut() {
                hasher.update(&chunk)?;
            }
        }
        if !want_digest {
            return Ok(None);
        }
        match session.md4.take() {
            Some(mut hasher) => Ok(Some(hasher.finish()?.to_vec())),
            None => Ok(Some(Vec::new())),
        }
    }

    fn attrib_set(&mut self, payload: &[u8]) -> Result<(), Error> {
        let attrs = Attribs::deserialize(payload)?;
        let name = attrs.name.clone().ok_or_else(|| format_err!("attribSet attrs missing name"))?;
        let mode = attrs.mode.unwrap_or(libc::S_IFREG as u32 | 0o644);
        let mtime = attrs.mtime.unwrap_or(0);
        let uid = attrs.uid.unwrap_or(0);
        let gid = attrs.gid.unwrap_or(0);

        if let Some(target) = &attrs.hlink {
            let dentry = Dentry::new(
                name,
                mode,
                0,
                mtime,
                uid,
                gid,
                DentryKind::Hardlink {
                    target_name: target.clone(),
                },
            );
            self.writer.add_entry(&dentry);
            return Ok(());
        }

        let file_type = mode & libc::S_IFMT;
        if file_type == libc::S_IFREG {
            let reference_entry = match self.reference {
                Some(reference) => reference.get_entry(&name)?,
                None => None,
            };
            match reference_entry {
                Some(entry) if entry.file_type() == libc::S_IFREG && !entry.is_hardlink() => {
                    if let DentryKind::File { digests } = entry.kind()? {
                        let dentry = Dentry::new(name, mode, entry.size, mtime, uid, gid, DentryKind::File { digests });
                        self.writer.add_entry(&dentry);
                    }
                    return Ok(());
                }
                Some(_) => return Ok(()), // reference exists but is a different type: drop.
                None => {
                    let size = attrs.size.unwrap_or(0);
                    let dentry = Dentry::new(name, mode, size, mtime, uid, gid, DentryKind::File { digests: Vec::new() });
                    self.writer.add_entry(&dentry);
                    return Ok(());
                }
            }
        }

        let kind = match file_type {
            libc::S_IFDIR => DentryKind::Dir,
            libc::S_IFLNK => DentryKind::Symlink {
                target: attrs.link.clone().unwrap_or_default().into_bytes(),
            },
            libc::S_IFBLK | libc::S_IFCHR => DentryKind::Device {
                major: attrs.rdev_major.unwrap_or(0),
                minor: attrs.rdev_minor.unwrap_or(0),
            },
            libc::S_IFIFO => DentryKind::Fifo,
            libc::S_IFSOCK => DentryKind::Socket,
            other => bail!("attribSet: unsupported file type {other:#o}"),
        };
        let size = attrs.size.unwrap_or(0);
        let dentry = Dentry::new(name, mode, size, mtime, uid, gid, kind);
        self.writer.add_entry(&dentry);
        Ok(())
    }
}

/// rsync's classic weak rolling checksum: two 16-bit accumulators packed
/// as `(s2 << 16) | s1`.
fn weak_checksum(data: &[u8]) -> u32 {
    let mut s1: u32 = 0;
    let mut s2: u32 = 0;
    for (i, &b) in data.iter().enumerate() {
        s1 = s1.wrapping_add(b as u32);
        s2 = s2.wrapping_add((data.len() - i) as u32 * b as u32);
    }
    ((s2 & 0xffff) << 16) | (s1 & 0xffff)
}

/// Per-block strong checksum: MD4 of the seed followed by the block.
fn strong_checksum(data: &[u8], seed: u32) -> Result<[u8; 16], Error> {
    let mut hasher = Hasher::new(MessageDigest::md4())?;
    hasher.update(&seed.to_le_bytes())?;
    hasher.update(data)?;
    let digest = hasher.finish()?;
    Ok(digest.as_ref().try_into().expect("MD4 is always 16 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use fbk_api_types::FsyncLevel;
    use fbk_config::PoolConfig;
    use fbk_tools::digest::digest_of;

    use crate::rpc::write_message;

    fn pool(dir: &std::path::Path) -> Pool {
        Pool::open(dir, &PoolConfig::default()).unwrap()
    }

    fn dir(label: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("fbk-session-test-{label}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn full_backup_attrib_get_always_empty() {
        let pool_dir = dir("full-pool");
        let pool = pool(&pool_dir);
        let staging = dir("full-staging");
        let mut writer = ShareWriter::create(&staging, "s", FsyncLevel::None).unwrap();

        let mut session = Session::new(&pool, &mut writer, None, None, false);
        let mut to_child = Vec::new();
        let mut request = Vec::new();
        write_message(
            &mut request,
            Opcode::AttribGet,
            &Attribs {
                name: Some("foo".to_string()),
                ..Default::default()
            }
            .serialize(),
        )
        .unwrap();
        write_message(&mut request, Opcode::Finish, b"").unwrap();
        session.run(Cursor::new(request), &mut to_child).unwrap();

        let reply = read_message(&mut Cursor::new(to_child)).unwrap().unwrap();
        assert!(reply.payload.is_empty());

        std::fs::remove_dir_all(&pool_dir).ok();
        std::fs::remove_dir_all(&staging).ok();
    }

    #[test]
    fn file_delta_roundtrip_produces_matching_dentry() {
        let pool_dir = dir("delta-pool");
        let pool = pool(&pool_dir);
        let staging = dir("delta-staging");
        let mut writer = ShareWriter::create(&staging, "s", FsyncLevel::None).unwrap();

        let mut session = Session::new(&pool, &mut writer, None, None, false);
        let mut request = Vec::new();
        let mut start_payload = Vec::new();
        start_payload.extend_from_slice(&1u64.to_le_bytes());
        start_payload.extend_from_slice(&700u32.to_le_bytes());
        start_payload.extend_from_slice(&700u32.to_le_bytes());
        start_payload.extend_from_slice(
            &Attribs {
                name: Some("foo.txt".to_string()),
                mode: Some(libc::S_IFREG as u32 | 0o644),
                mtime: Some(123),
                uid: Some(0),
                gid: Some(0),
                ..Default::default()
            }
            .serialize(),
        );
        write_message(&mut request, Opcode::FileDeltaRxStart, &start_payload).unwrap();
        write_message(&mut request, Opcode::FileDeltaRxNextData, b"hello world").unwrap();
        write_message(&mut request, Opcode::FileDeltaRxDone, b"").unwrap();
        write_message(&mut request, Opcode::Finish, b"").unwrap();

        let mut to_child = Vec::new();
        session.run(Cursor::new(request), &mut to_child).unwrap();

        writer
            .finish(fbk_datastore::ShareInfo {
                name: "s".to_string(),
                path: "/".to_string(),
                mountpoint: "/".to_string(),
                start_time: 0,
                end_time: 1,
                error: None,
            })
            .unwrap();
        let reader = ShareReader::open(staging.join(fbk_tools::mangle::mangle("s")));
        let entry = reader.get_entry("foo.txt").unwrap().unwrap();
        assert_eq!(entry.size, 11);
        if let DentryKind::File { digests } = entry.kind().unwrap() {
            assert_eq!(digests, vec![digest_of(b"hello world")]);
        } else {
            panic!("expected a regular file entry");
        }

        std::fs::remove_dir_all(&pool_dir).ok();
        std::fs::remove_dir_all(&staging).ok();
    }

    #[test]
    fn weak_checksum_is_order_sensitive() {
        assert_ne!(weak_checksum(b"ab"), weak_checksum(b"ba"));
    }
}
