//! On-disk share-directory name mangling (§6).
//!
//! A share name can contain characters that are awkward or unsafe as a
//! path component (`/`, a leading `.`, whitespace...). Mangling replaces
//! each byte in `% : \ / <whitespace> .` with `%HH` (uppercase hex); every
//! other byte, including the rest of UTF-8 multi-byte sequences, passes
//! through unchanged.

fn needs_escape(b: u8) -> bool {
    matches!(b, b'%' | b':' | b'\\' | b'/' | b'.') || b.is_ascii_whitespace()
}

pub fn mangle(name: &str) -> String {
    let mut out = Vec::with_capacity(name.len());
    for &b in name.as_bytes() {
        if needs_escape(b) {
            out.extend_from_slice(format!("%{:02X}", b).as_bytes());
        } else {
            out.push(b);
        }
    }
    // Safety: every byte is either passed through unchanged or is a `%HH`
    // escape of ASCII hex digits, so `out` is still valid UTF-8 wherever
    // `name` was.
    unsafe { String::from_utf8_unchecked(out) }
}

pub fn unmangle(mangled: &str) -> String {
    let bytes = mangled.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangles_reserved_bytes() {
        assert_eq!(mangle("share"), "share");
        assert_eq!(mangle("a/b"), "a%2Fb");
        assert_eq!(mangle("100%"), "100%25");
        assert_eq!(mangle("a b"), "a%20b");
        assert_eq!(mangle("a.b"), "a%2Eb");
        assert_eq!(mangle("a:b\\c"), "a%3Ab%5Cc");
    }

    #[test]
    fn roundtrips() {
        for name in ["share", "a/b", "100%", "weird name.txt", "a:b\\c"] {
            assert_eq!(unmangle(&mangle(name)), name);
        }
    }

    #[test]
    fn passes_through_multibyte_utf8_unchanged() {
        for name in ["héllo", "日本語/共有", "caf\u{e9}.txt", "emoji🎉share"] {
            let mangled = mangle(name);
            assert_eq!(unmangle(&mangled), name);
        }
    }
}
