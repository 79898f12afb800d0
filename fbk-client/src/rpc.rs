//! Binary RPC framing for the rsync-delta child protocol (§4.9): every
//! message is `(u32 length, u8 opcode, payload)`, length counting only
//! the payload bytes.

use std::io::{Read, Write};

use anyhow::{bail, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Finish,
    AttribGet,
    FileDeltaRxStart,
    FileDeltaRxNextBlocknum,
    FileDeltaRxNextData,
    FileDeltaRxDone,
    CsumStart,
    CsumGet,
    CsumEndDigest,
    CsumEnd,
    AttribSet,
    ProtocolVersion,
    ChecksumSeed,
}

impl Opcode {
    fn from_u8(code: u8) -> Result<Self, Error> {
        Ok(match code {
            0 => Opcode::Finish,
            1 => Opcode::AttribGet,
            2 => Opcode::FileDeltaRxStart,
            3 => Opcode::FileDeltaRxNextBlocknum,
            4 => Opcode::FileDeltaRxNextData,
            5 => Opcode::FileDeltaRxDone,
            6 => Opcode::CsumStart,
            7 => Opcode::CsumGet,
            8 => Opcode::CsumEndDigest,
            9 => Opcode::CsumEnd,
            10 => Opcode::AttribSet,
            11 => Opcode::ProtocolVersion,
            12 => Opcode::ChecksumSeed,
            other => bail!("unknown rsync-delta RPC opcode {other}"),
        })
    }

    fn to_u8(self) -> u8 {
        match self {
            Opcode::Finish => 0,
            Opcode::AttribGet => 1,
            Opcode::FileDeltaRxStart => 2,
            Opcode::FileDeltaRxNextBlocknum => 3,
            Opcode::FileDeltaRxNextData => 4,
            Opcode::FileDeltaRxDone => 5,
            Opcode::CsumStart => 6,
            Opcode::CsumGet => 7,
            Opcode::CsumEndDigest => 8,
            Opcode::CsumEnd => 9,
            Opcode::AttribSet => 10,
            Opcode::ProtocolVersion => 11,
            Opcode::ChecksumSeed => 12,
        }
    }
}

pub struct Message {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Longest payload accepted off the wire: guards against a misbehaving
/// child turning a garbled length prefix into an unbounded allocation.
const MAX_PAYLOAD: u32 = 256 * 1024 * 1024;

pub fn write_message(out: &mut impl Write, opcode: Opcode, payload: &[u8]) -> Result<(), Error> {
    if payload.len() as u64 > MAX_PAYLOAD as u64 {
        bail!("rsync-delta RPC payload too large ({} bytes)", payload.len());
    }
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&[opcode.to_u8()])?;
    out.write_all(payload)?;
    Ok(())
}

/// Reads one framed message, or `None` on a clean EOF before any bytes
/// of the next header arrive.
pub fn read_message(input: &mut impl Read) -> Result<Option<Message>, Error> {
    let mut header = [0u8; 5];
    let mut read = 0;
    while read < header.len() {
        let n = input.read(&mut header[read..])?;
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            bail!("rsync-delta RPC stream truncated mid-header");
        }
        read += n;
    }
    let length = u32::from_le_bytes(header[0..4].try_into().unwrap());
    if length > MAX_PAYLOAD {
        bail!("rsync-delta RPC payload too large ({length} bytes)");
    }
    let opcode = Opcode::from_u8(header[4])?;
    let mut payload = vec![0u8; length as usize];
    input.read_exact(&mut payload)?;
    Ok(Some(Message { opcode, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrips_a_message() {
        let mut buf = Vec::new();
        write_message(&mut buf, Opcode::AttribSet, b"name,a").unwrap();
        let mut cursor = Cursor::new(buf);
        let message = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(message.opcode, Opcode::AttribSet);
        assert_eq!(message.payload, b"name,a");
        assert!(read_message(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn roundtrips_empty_payload() {
        let mut buf = Vec::new();
        write_message(&mut buf, Opcode::Finish, b"").unwrap();
        let mut cursor = Cursor::new(buf);
        let message = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(message.opcode, Opcode::Finish);
        assert!(message.payload.is_empty());
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(99);
        let mut cursor = Cursor::new(buf);
        assert!(read_message(&mut cursor).is_err());
    }
}
