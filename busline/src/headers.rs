//! Ordered, case-insensitive message headers.
//!
//! Keys are compared ASCII case-insensitively, but the casing used on insert
//! is preserved and entries enumerate in insertion order. A key may appear
//! more than once; `add` appends, `set` replaces.

use serde::{Deserialize, Serialize};

/// Ordered multimap of string headers with case-insensitive keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header entry, keeping any existing entries for the same key.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Replace all entries for `key` with a single entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        self.remove(&key);
        self.entries.push((key, value.into()));
        self
    }

    /// First value recorded for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// All values recorded for `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Whether at least one entry exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Remove every entry for `key`. Returns true if anything was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        self.entries.len() != before
    }

    /// Enumerate `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the container holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(headers.get("content-length"), None);
    }

    #[test]
    fn test_iteration_preserves_insertion_order_and_casing() {
        let mut headers = Headers::new();
        headers.add("b", "2").add("A", "1").add("c", "3");
        let entries: Vec<_> = headers.iter().collect();
        assert_eq!(entries, vec![("b", "2"), ("A", "1"), ("c", "3")]);
    }

    #[test]
    fn test_add_keeps_multiple_values_per_key() {
        let mut headers = Headers::new();
        headers.add("accept", "text/plain").add("Accept", "text/html");
        let values: Vec<_> = headers.get_all("ACCEPT").collect();
        assert_eq!(values, vec!["text/plain", "text/html"]);
        assert_eq!(headers.get("accept"), Some("text/plain"));
    }

    #[test]
    fn test_set_replaces_all_values() {
        let mut headers = Headers::new();
        headers.add("x-trace", "a").add("X-Trace", "b");
        headers.set("x-TRACE", "c");
        let values: Vec<_> = headers.get_all("x-trace").collect();
        assert_eq!(values, vec!["c"]);
    }

    #[test]
    fn test_remove_drops_every_casing_variant() {
        let mut headers = Headers::new();
        headers.add("Token", "1").add("token", "2").add("other", "3");
        assert!(headers.remove("TOKEN"));
        assert!(!headers.contains_key("token"));
        assert_eq!(headers.len(), 1);
        assert!(!headers.remove("token"));
    }

    #[test]
    fn test_clone_yields_independent_container() {
        let mut original = Headers::new();
        original.add("k", "v");
        let mut copy = original.clone();
        copy.add("k2", "v2");
        assert_eq!(original.len(), 1);
        assert_eq!(copy.len(), 2);
    }
}
