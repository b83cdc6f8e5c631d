//! Structural checksums used for change detection
//!
//! Unordered collections are sorted before they are fed to the hasher, so two
//! graphs with the same content hash equal no matter how they were built.

use sha2::{Digest, Sha256};

const FIELD_SEP: u8 = 0x1f;
const ITEM_SEP: u8 = 0x1e;

pub struct ChecksumBuilder {
    hasher: Sha256,
}

impl ChecksumBuilder {
    pub fn new(kind: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update([FIELD_SEP]);
        Self { hasher }
    }

    fn label(&mut self, name: &str) {
        self.hasher.update(name.as_bytes());
        self.hasher.update([FIELD_SEP]);
    }

    pub fn str(mut self, name: &str, value: &str) -> Self {
        self.label(name);
        self.hasher.update(value.as_bytes());
        self.hasher.update([FIELD_SEP]);
        self
    }

    pub fn opt(mut self, name: &str, value: Option<&str>) -> Self {
        self.label(name);
        match value {
            Some(v) => {
                self.hasher.update([1]);
                self.hasher.update(v.as_bytes());
            }
            None => self.hasher.update([0]),
        }
        self.hasher.update([FIELD_SEP]);
        self
    }

    pub fn num(mut self, name: &str, value: u64) -> Self {
        self.label(name);
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn flag(mut self, name: &str, value: Option<bool>) -> Self {
        self.label(name);
        self.hasher.update([match value {
            None => 0,
            Some(false) => 1,
            Some(true) => 2,
        }]);
        self
    }

    /// Order-insensitive string collection
    pub fn set<I, S>(self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sorted: Vec<String> = values.into_iter().map(|v| v.as_ref().to_string()).collect();
        sorted.sort_unstable();
        sorted.dedup();
        self.list(name, sorted)
    }

    /// Order-sensitive string collection
    pub fn list<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.label(name);
        for v in values {
            self.hasher.update(v.as_ref().as_bytes());
            self.hasher.update([ITEM_SEP]);
        }
        self.hasher.update([FIELD_SEP]);
        self
    }

    /// Child checksums, sorted so construction order never matters
    pub fn children<I>(mut self, name: &str, checksums: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let mut sorted: Vec<u64> = checksums.into_iter().collect();
        sorted.sort_unstable();
        self.label(name);
        for c in sorted {
            self.hasher.update(c.to_be_bytes());
        }
        self.hasher.update([FIELD_SEP]);
        self
    }

    pub fn finish(self) -> u64 {
        let hash = self.hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash[..8]);
        u64::from_be_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sets_are_order_insensitive() {
        let a = ChecksumBuilder::new("vsvip").set("fqdns", ["a.com", "b.com"]).finish();
        let b = ChecksumBuilder::new("vsvip").set("fqdns", ["b.com", "a.com", "a.com"]).finish();
        assert_eq!(a, b);
    }

    #[test]
    fn test_lists_are_order_sensitive() {
        let a = ChecksumBuilder::new("pg").list("members", ["p1", "p2"]).finish();
        let b = ChecksumBuilder::new("pg").list("members", ["p2", "p1"]).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_field_boundaries() {
        let a = ChecksumBuilder::new("x").str("a", "bc").str("d", "").finish();
        let b = ChecksumBuilder::new("x").str("a", "b").str("d", "c").finish();
        assert_ne!(a, b);

        let unset = ChecksumBuilder::new("x").opt("p", None).finish();
        let empty = ChecksumBuilder::new("x").opt("p", Some("")).finish();
        assert_ne!(unset, empty);
    }
}
