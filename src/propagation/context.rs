//! Trace context carried across the broker boundary.

use std::collections::BTreeMap;

pub use opentelemetry::trace::{SpanId, TraceId};

/// Separators that may not appear in a baggage key.
const INVALID_KEY_CHARS: &[u8] = b"(),/:;<=>?@[\\]{}\"";

/// Key/value pairs propagated alongside a trace.
///
/// Keys are unique and iterate in sorted order. Values are stored trimmed,
/// as they appear after a trip through the `baggage` header.
/// Baggage never influences sampling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baggage {
    entries: BTreeMap<String, String>,
}

impl Baggage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is a W3C baggage token: non-empty, printable ASCII and
    /// free of separators.
    pub fn is_valid_key(key: &str) -> bool {
        !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_graphic() && !INVALID_KEY_CHARS.contains(&b))
    }

    /// Set `key` to `value`, replacing any previous value. Returns false and
    /// leaves the baggage unchanged when `key` is not a valid token.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if !Self::is_valid_key(&key) {
            return false;
        }
        let value = value.into();
        self.entries.insert(key, value.trim().to_string());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Baggage {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut baggage = Baggage::new();
        for (k, v) in iter {
            baggage.insert(k, v);
        }
        baggage
    }
}

/// Identifies a position in a causal chain: trace, parent span, sampling
/// decision, and baggage.
///
/// The default value is the empty (root) context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
    pub baggage: Baggage,
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new(TraceId::INVALID, SpanId::INVALID, false)
    }
}

impl TraceContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
            baggage: Baggage::new(),
        }
    }

    /// Empty context: no trace, no baggage.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_baggage(mut self, baggage: Baggage) -> Self {
        self.baggage = baggage;
        self
    }

    /// True when both identifiers are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity() {
        assert!(!TraceContext::empty().is_valid());
        let cx = TraceContext::new(TraceId::from(1u128), SpanId::INVALID, true);
        assert!(!cx.is_valid());
        let cx = TraceContext::new(TraceId::from(1u128), SpanId::from(2u64), false);
        assert!(cx.is_valid());
    }

    #[test]
    fn test_baggage_insert_replaces_and_sorts() {
        let mut baggage: Baggage = [("b", "2"), ("a", "1")].into_iter().collect();
        baggage.insert("a", " 3 ");
        let pairs: Vec<_> = baggage.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_baggage_rejects_invalid_keys() {
        let mut baggage = Baggage::new();
        assert!(!baggage.insert("", "x"));
        assert!(!baggage.insert("has space", "x"));
        assert!(!baggage.insert("a=b", "x"));
        assert!(baggage.insert("user.id", "42"));
        assert_eq!(baggage.len(), 1);
    }
}
