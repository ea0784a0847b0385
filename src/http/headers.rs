//! Order-preserving header list with case-insensitive lookup.

use std::fmt;

/// HTTP header fields in arrival (or insertion) order.
///
/// Names compare case-insensitively; duplicate names are kept.
///
/// # Examples
///
/// ```
/// use rtsf::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/html");
/// headers.set("content-type", "text/plain");
///
/// assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty header map with room for `capacity` fields.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a field; an existing field with the same name is kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every field named `name` with a single `name: value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.inner.push((name, value.into()));
    }

    /// Returns the first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if a field named `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Number of fields, counting duplicates.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut h = Headers::new();
        h.insert("Content-Length", "12");
        assert_eq!(h.get("content-length"), Some("12"));
        assert_eq!(h.get("CONTENT-LENGTH"), Some("12"));
        assert!(h.contains("Content-length"));
        assert!(!h.contains("host"));
    }

    #[test]
    fn insert_keeps_duplicates_in_order() {
        let mut h = Headers::new();
        h.insert("Via", "a");
        h.insert("via", "b");
        assert_eq!(h.len(), 2);
        assert_eq!(h.get("via"), Some("a"));
        assert_eq!(h.to_string(), "Via: a\r\nvia: b\r\n");
    }

    #[test]
    fn set_replaces_all_values() {
        let mut h = Headers::new();
        h.insert("Connection", "keep-alive");
        h.insert("connection", "upgrade");
        h.set("Connection", "close");
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("connection"), Some("close"));
    }

    #[test]
    fn iter_yields_fields_in_order() {
        let mut h = Headers::new();
        h.insert("Host", "example.com");
        h.insert("Accept", "*/*");
        let fields: Vec<_> = h.iter().collect();
        assert_eq!(fields, [("Host", "example.com"), ("Accept", "*/*")]);
    }
}
