//! Per-request context: an ordered string/string map carried alongside
//! every invocation, independent of the operation's declared parameters
//! (spec.md §3 Request).

use std::collections::BTreeMap;

use crate::encoding::{InputStream, OutputStream};
use crate::error::LocalError;

/// Request context. Kept as a `BTreeMap` rather than a `HashMap` so the
/// wire encoding is deterministic, which matters for anything that hashes
/// or diffs a marshaled request (e.g. batched-request dedup).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Context(BTreeMap<String, String>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn encode(&self, os: &mut OutputStream) {
        let entries: Vec<(String, String)> = self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        os.write_dictionary(
            &entries,
            |os, k| os.write_string(k),
            |os, v| os.write_string(v),
        );
    }

    pub fn decode(input: &mut InputStream) -> Result<Self, LocalError> {
        let count = input.begin_dictionary(2)?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = input.read_string()?;
            let value = input.read_string()?;
            map.insert(key, value);
        }
        Ok(Self(map))
    }
}

impl FromIterator<(String, String)> for Context {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_wire() {
        let mut ctx = Context::new();
        ctx.insert("trace-id", "abc123");
        ctx.insert("tenant", "acme");

        let mut os = OutputStream::with_default_encoding();
        ctx.encode(&mut os);
        let bytes = os.into_bytes();

        let factories = std::sync::Arc::new(crate::encoding::ClassFactoryRegistry::new());
        let mut input = InputStream::new(bytes, crate::encoding::ENCODING_VERSION, 1024, factories);
        let decoded = Context::decode(&mut input).unwrap();
        assert_eq!(decoded, ctx);
    }
}
