//! Broker message and header types.

/// A single header entry. Keys may repeat on the wire; [`Headers`] keeps order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Vec<u8>,
}

/// Ordered header list attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the first value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_slice())
    }

    /// Get the first value under `key` as UTF-8, if it is valid UTF-8.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Set `key` to `value`.
    ///
    /// The first existing entry is overwritten in place and any later
    /// duplicates are removed, so the position of the key is stable.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter().position(|h| h.key == key) {
            Some(idx) => {
                self.entries[idx].value = value;
                let mut seen = 0usize;
                self.entries.retain(|h| {
                    if h.key != key {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.entries.push(Header { key, value }),
        }
    }

    /// Append an entry without touching existing entries under the same key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.push(Header {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Remove every entry stored under `key`. Returns true if any were removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|h| h.key != key);
        before != self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<Vec<u8>>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

/// Unit of data exchanged with the broker.
///
/// `partition` and `offset` are assigned by the broker; on produced messages
/// they are only set once delivery has been acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: Headers,
}

impl Message {
    /// Create an outbound message for `topic`.
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            offset: None,
            key: Vec::new(),
            value: value.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Message size as accounted on the wire: key, value and every header
    /// key/value pair.
    pub fn body_size(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|h| h.key.len() + h.value.len())
            .sum();
        headers + self.key.len() + self.value.len()
    }

    /// Key rendered lossily as UTF-8 (for span attributes and logs).
    pub fn key_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_overwrites_and_dedups() {
        let mut headers: Headers = [("a", "1"), ("b", "2"), ("a", "3")].into_iter().collect();
        headers.insert("a", "x");

        let keys: Vec<_> = headers.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(headers.get("a"), Some(&b"x"[..]));
    }

    #[test]
    fn test_insert_appends_new_key() {
        let mut headers = Headers::new();
        headers.insert("k", "v");
        headers.insert("z", "w");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get_str("z"), Some("w"));
    }

    #[test]
    fn test_remove() {
        let mut headers: Headers = [("a", "1"), ("a", "2")].into_iter().collect();
        assert!(headers.remove("a"));
        assert!(headers.is_empty());
        assert!(!headers.remove("a"));
    }

    #[test]
    fn test_body_size_counts_key_value_and_headers() {
        let msg = Message::new("t", "hello")
            .with_key("k1")
            .with_header("h", "vv");
        assert_eq!(msg.body_size(), 5 + 2 + 1 + 2);
    }
}
