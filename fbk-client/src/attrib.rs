//! Attribute wire format (§4.9): a sequence of NUL-terminated `key,value`
//! pairs. Only the keys the protocol defines are recognized; unknown keys
//! are preserved verbatim so a round-trip never silently drops data.

use anyhow::{format_err, Error};

const KEYS: &[&str] = &[
    "name",
    "mode",
    "size",
    "mtime",
    "uid",
    "gid",
    "link",
    "rdev_major",
    "rdev_minor",
    "hlink",
    "hlink_self",
];

/// One `attribGet`/`fileDeltaRxStart`/`attribSet` attribute set. Numeric
/// fields come off the wire as their decimal text representation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribs {
    pub name: Option<String>,
    pub mode: Option<u32>,
    pub size: Option<u64>,
    pub mtime: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub link: Option<String>,
    pub rdev_major: Option<u32>,
    pub rdev_minor: Option<u32>,
    pub hlink: Option<String>,
    pub hlink_self: Option<String>,
    /// Pairs whose key isn't one of `KEYS`, kept in wire order so a
    /// round-trip through `deserialize`/`serialize` never silently drops
    /// data the protocol doesn't yet have a field for.
    pub extra: Vec<(String, String)>,
}

impl Attribs {
    fn push_pair(buf: &mut Vec<u8>, key: &str, value: &str) {
        buf.extend_from_slice(key.as_bytes());
        buf.push(b',');
        buf.extend_from_slice(value.as_bytes());
        buf.push(0);
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(v) = &self.name {
            Self::push_pair(&mut buf, "name", v);
        }
        if let Some(v) = self.mode {
            Self::push_pair(&mut buf, "mode", &v.to_string());
        }
        if let Some(v) = self.size {
            Self::push_pair(&mut buf, "size", &v.to_string());
        }
        if let Some(v) = self.mtime {
            Self::push_pair(&mut buf, "mtime", &v.to_string());
        }
        if let Some(v) = self.uid {
            Self::push_pair(&mut buf, "uid", &v.to_string());
        }
        if let Some(v) = self.gid {
            Self::push_pair(&mut buf, "gid", &v.to_string());
        }
        if let Some(v) = &self.link {
            Self::push_pair(&mut buf, "link", v);
        }
        if let Some(v) = self.rdev_major {
            Self::push_pair(&mut buf, "rdev_major", &v.to_string());
        }
        if let Some(v) = self.rdev_minor {
            Self::push_pair(&mut buf, "rdev_minor", &v.to_string());
        }
        if let Some(v) = &self.hlink {
            Self::push_pair(&mut buf, "hlink", v);
        }
        if let Some(v) = &self.hlink_self {
            Self::push_pair(&mut buf, "hlink_self", v);
        }
        for (key, value) in &self.extra {
            Self::push_pair(&mut buf, key, value);
        }
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut attrs = Self::default();
        for pair in data.split(|&b| b == 0) {
            if pair.is_empty() {
                continue;
            }
            let comma = pair
                .iter()
                .position(|&b| b == b',')
                .ok_or_else(|| format_err!("malformed attribute pair, no comma separator"))?;
            let key = std::str::from_utf8(&pair[..comma])?;
            let value = std::str::from_utf8(&pair[comma + 1..])?;
            if !KEYS.contains(&key) {
                attrs.extra.push((key.to_string(), value.to_string()));
                continue;
            }
            match key {
                "name" => attrs.name = Some(value.to_string()),
                "mode" => attrs.mode = Some(value.parse()?),
                "size" => attrs.size = Some(value.parse()?),
                "mtime" => attrs.mtime = Some(value.parse()?),
                "uid" => attrs.uid = Some(value.parse()?),
                "gid" => attrs.gid = Some(value.parse()?),
                "link" => attrs.link = Some(value.to_string()),
                "rdev_major" => attrs.rdev_major = Some(value.parse()?),
                "rdev_minor" => attrs.rdev_minor = Some(value.parse()?),
                "hlink" => attrs.hlink = Some(value.to_string()),
                "hlink_self" => attrs.hlink_self = Some(value.to_string()),
                _ => unreachable!(),
            }
        }
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_mixed_fields() {
        let attrs = Attribs {
            name: Some("some/file.txt".to_string()),
            mode: Some(0o100644),
            size: Some(4096),
            mtime: Some(1_700_000_000),
            uid: Some(1000),
            gid: Some(1000),
            ..Default::default()
        };
        let raw = attrs.serialize();
        assert_eq!(Attribs::deserialize(&raw).unwrap(), attrs);
    }

    #[test]
    fn empty_payload_is_empty_attribs() {
        assert_eq!(Attribs::deserialize(&[]).unwrap(), Attribs::default());
    }

    #[test]
    fn preserves_unrecognized_keys_in_extra() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"bogus,1");
        raw.push(0);
        raw.extend_from_slice(b"name,a");
        raw.push(0);
        let attrs = Attribs::deserialize(&raw).unwrap();
        assert_eq!(attrs.name.as_deref(), Some("a"));
        assert_eq!(attrs.extra, vec![("bogus".to_string(), "1".to_string())]);
    }

    #[test]
    fn roundtrips_unrecognized_keys_through_serialize() {
        let mut attrs = Attribs {
            name: Some("x".to_string()),
            ..Default::default()
        };
        attrs.extra.push(("future_field".to_string(), "42".to_string()));
        let raw = attrs.serialize();
        assert_eq!(Attribs::deserialize(&raw).unwrap(), attrs);
    }
}
