//! A semi-structured [`Record`] for flows that reshape associative-array-like
//! data. Flows are not required to use this type — `Flow<R>` is generic over
//! any `R: Clone + Send + Sync + 'static` — but it is the natural default for
//! CSV/line/JSON-shaped pipelines.

use std::collections::BTreeMap;

/// A JSON-like value. Field access helpers are provided for the common case
/// of reading/writing a `Map` by key, which is how joins and transforms
/// typically address fields.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Record {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Record>),
    Map(BTreeMap<String, Record>),
}

impl Record {
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// Read a field of a `Map` record by key. Returns `None` for any other
    /// variant, or if the key is absent.
    pub fn get(&self, key: &str) -> Option<&Record> {
        match self {
            Self::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Set a field on a `Map` record, returning `self` for chaining.
    /// No-op (other than being a no-op) on non-`Map` records.
    pub fn with(mut self, key: impl Into<String>, value: Record) -> Self {
        if let Self::Map(m) = &mut self {
            m.insert(key.into(), value);
        }
        self
    }

    /// Shallow-union two `Map` records: `overlay`'s keys win on conflict.
    /// This is the typical merge strategy for a join hit.
    pub fn shallow_merge(base: &Record, overlay: &Record) -> Record {
        match (base, overlay) {
            (Self::Map(b), Self::Map(o)) => {
                let mut merged = b.clone();
                for (k, v) in o {
                    merged.insert(k.clone(), v.clone());
                }
                Self::Map(merged)
            }
            (_, Self::Null) => base.clone(),
            _ => overlay.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            _ => None,
        }
    }
}

impl From<i64> for Record {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Record {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Record {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for Record {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Build a `Record::Map` from `(key, value)` pairs.
///
/// ```
/// use flowline::record::{record_map, Record};
/// let r = record_map([("id", Record::from(1)), ("a", Record::from(10))]);
/// assert_eq!(r.get("id"), Some(&Record::Int(1)));
/// ```
pub fn record_map<const N: usize>(pairs: [(&str, Record); N]) -> Record {
    let mut m = BTreeMap::new();
    for (k, v) in pairs {
        m.insert(k.to_string(), v);
    }
    Record::Map(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shallow_merge_overlay_wins() {
        let base = record_map([("id", 1.into()), ("a", 10.into())]);
        let overlay = record_map([("b", 100.into())]);
        let merged = Record::shallow_merge(&base, &overlay);
        assert_eq!(merged.get("id"), Some(&Record::Int(1)));
        assert_eq!(merged.get("a"), Some(&Record::Int(10)));
        assert_eq!(merged.get("b"), Some(&Record::Int(100)));
    }

    #[test]
    fn get_on_non_map_is_none() {
        let r = Record::from(5);
        assert_eq!(r.get("x"), None);
    }
}
