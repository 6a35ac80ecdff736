//! Object identity: `(name, category)` (spec.md §3).
//!
//! `name` must be non-empty for a valid identity; `category` may be empty
//! (the empty category is the global fallback used by default servants and
//! servant locators, spec.md §3 ServantManager). Stringification follows
//! the original source's escaping rules so that
//! `stringToIdentity(identityToString(i)) == i` for arbitrary bytes
//! (spec.md §8).

use std::fmt;

use crate::encoding::{InputStream, OutputStream};
use crate::error::LocalError;

/// `(name, category)` identity pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub name: String,
    pub category: String,
}

impl Identity {
    /// Construct an identity, rejecting an empty `name`.
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Result<Self, LocalError> {
        let name = name.into();
        if name.is_empty() {
            return Err(LocalError::Other(
                "identity name must not be empty".into(),
            ));
        }
        Ok(Self {
            name,
            category: category.into(),
        })
    }

    /// Identity with an empty category, the common case.
    pub fn unqualified(name: impl Into<String>) -> Result<Self, LocalError> {
        Self::new(name, String::new())
    }

    /// `category/name`, with `\xHH` escapes for non-printable bytes and for
    /// the `/` and `\` separators, matching the original source's
    /// `identityToString`.
    pub fn to_string_form(&self) -> String {
        let mut out = String::new();
        if !self.category.is_empty() {
            out.push_str(&escape(&self.category));
            out.push('/');
        }
        out.push_str(&escape(&self.name));
        out
    }

    /// Parse the `[category/]name` grammar, undoing [`Identity::to_string_form`].
    pub fn parse(text: &str) -> Result<Self, LocalError> {
        let (bytes, split_at) = unescape_with_split(text)?;
        match split_at {
            Some(idx) => {
                let category = String::from_utf8(bytes[..idx].to_vec()).map_err(|_| invalid_escape())?;
                let name = String::from_utf8(bytes[idx..].to_vec()).map_err(|_| invalid_escape())?;
                Identity::new(name, category)
            }
            None => {
                let name = String::from_utf8(bytes).map_err(|_| invalid_escape())?;
                Identity::unqualified(name)
            }
        }
    }

    /// Wire encoding (spec.md §3 "Request envelope"): `name` then
    /// `category`, each a plain size-prefixed string — unrelated to the
    /// escaped [`Identity::to_string_form`] used in stringified proxies.
    pub fn encode(&self, os: &mut OutputStream) {
        os.write_string(&self.name);
        os.write_string(&self.category);
    }

    pub fn decode(input: &mut InputStream) -> Result<Self, LocalError> {
        let name = input.read_string()?;
        let category = input.read_string()?;
        Identity::new(name, category)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_form())
    }
}

/// Bytes that must be escaped in the stringified form: anything outside
/// printable ASCII, the `/` and `\` grammar separators, and space (spec.md
/// §6 "stringified proxy grammar" tokenizes on whitespace, so an
/// unescaped space in an identity would be indistinguishable from the
/// token boundary between it and the next proxy option).
fn needs_escape(byte: u8) -> bool {
    !(0x21..0x7f).contains(&byte) || byte == b'/' || byte == b'\\'
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &byte in input.as_bytes() {
        if needs_escape(byte) {
            out.push('\\');
            if byte == b'/' || byte == b'\\' {
                out.push(byte as char);
            } else {
                out.push_str(&format!("x{byte:02x}"));
            }
        } else {
            out.push(byte as char);
        }
    }
    out
}

/// Undo [`escape`] while tracking the split point for the
/// `category '/' name` separator in the same pass: an escaped `\/` decodes
/// to a literal `/` byte that must NOT be mistaken for the separator, so
/// the separator can only be recognized correctly while still walking the
/// escape sequences, not after they have already been resolved away
/// (spec.md §8: `stringToIdentity(identityToString(i)) == i` must hold
/// even when `name`/`category` themselves contain `/`).
fn unescape_with_split(input: &str) -> Result<(Vec<u8>, Option<usize>), LocalError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut split_at = None;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'/' => {
                    out.push(b'/');
                    i += 2;
                }
                b'\\' => {
                    out.push(b'\\');
                    i += 2;
                }
                b'x' if i + 3 < bytes.len() => {
                    let hex = std::str::from_utf8(&bytes[i + 2..i + 4])
                        .map_err(|_| invalid_escape())?;
                    let value = u8::from_str_radix(hex, 16).map_err(|_| invalid_escape())?;
                    out.push(value);
                    i += 4;
                }
                _ => return Err(invalid_escape()),
            }
        } else if bytes[i] == b'/' {
            if split_at.is_none() {
                split_at = Some(out.len());
            }
            i += 1;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok((out, split_at))
}

fn invalid_escape() -> LocalError {
    LocalError::Other("invalid identity escape sequence".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_simple_identity() {
        let id = Identity::new("alice", "accounts").unwrap();
        assert_eq!(Identity::parse(&id.to_string_form()).unwrap(), id);
    }

    #[test]
    fn round_trips_empty_category() {
        let id = Identity::unqualified("widget").unwrap();
        assert_eq!(id.to_string_form(), "widget");
        assert_eq!(Identity::parse("widget").unwrap(), id);
    }

    #[test]
    fn escapes_separator_and_control_bytes() {
        let id = Identity::new("a/b\\c", "x\u{0}y").unwrap();
        let text = id.to_string_form();
        assert!(!text.is_empty());
        assert_eq!(Identity::parse(&text).unwrap(), id);
    }

    #[test]
    fn rejects_empty_name() {
        assert!(Identity::new("", "cat").is_err());
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_printable(name in "[ -~]{1,32}", category in "[ -~]{0,32}") {
            let id = Identity::new(name, category).unwrap();
            prop_assert_eq!(Identity::parse(&id.to_string_form()).unwrap(), id);
        }
    }
}
