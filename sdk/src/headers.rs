use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Request headers, backed by [`http::HeaderMap`]. Names are
/// case-insensitive; `insert` replaces every earlier value of a name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    map: HeaderMap,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`. Fails when either is not a valid header.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<(), http::Error> {
        let name = HeaderName::from_bytes(name.as_ref().as_bytes())?;
        let value = HeaderValue::from_str(value.as_ref())?;
        self.map.insert(name, value);
        Ok(())
    }

    /// The value of `name`, if present and visible ASCII.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        self.map.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Name/value pairs with lowercase names. Values that are not visible
    /// ASCII are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.map
    }

    pub fn into_map(self) -> HeaderMap {
        self.map
    }
}

impl From<HeaderMap> for Headers {
    fn from(map: HeaderMap) -> Self {
        Headers { map }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("X-Request-Id", "a").unwrap();
        assert_eq!(headers.get("x-request-id"), Some("a"));
        headers.insert("x-REQUEST-id", "b").unwrap();
        assert_eq!(headers.get("X-Request-ID"), Some("b"));
        assert_eq!(headers.len(), 1);
        assert!(headers.contains("X-Request-ID"));
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec![("x-request-id", "b")]);
    }

    #[test]
    fn test_invalid_headers_are_rejected() {
        let mut headers = Headers::new();
        assert!(headers.insert("bad name", "v").is_err());
        assert!(headers.insert("X-Ok", "line\nbreak").is_err());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_from_header_map() {
        let mut map = HeaderMap::new();
        map.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        let mut headers = Headers::from(map);
        assert_eq!(headers.get("authorization"), Some("Bearer t"));
        assert!(headers.remove("Authorization").is_some());
        assert!(headers.into_map().is_empty());
    }
}
