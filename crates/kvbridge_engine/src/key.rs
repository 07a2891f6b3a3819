//! Keys and key paths.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// A primary or index key.
///
/// Keys are ordered the way IndexedDB orders them: every number sorts before
/// every string, every string before every array. Arrays compare element by
/// element, and a shorter array sorts before a longer one it prefixes.
///
/// `NaN` is never a valid key and `-0.0` is the same key as `0.0`.
#[derive(Debug, Clone)]
pub enum Key {
    /// A finite or infinite number.
    Number(f64),
    /// A string.
    String(String),
    /// An array of keys.
    Array(Vec<Key>),
}

impl Key {
    /// Creates a number key, rejecting `NaN`.
    #[must_use]
    pub fn number(value: f64) -> Option<Self> {
        if value.is_nan() {
            None
        } else if value == 0.0 {
            Some(Self::Number(0.0))
        } else {
            Some(Self::Number(value))
        }
    }

    /// Converts a JSON value into a key.
    ///
    /// Returns `None` for values that cannot be keys: `null`, booleans,
    /// objects, and arrays containing any of those.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().and_then(Self::number),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Self::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Self::Array),
            Value::Null | Value::Bool(_) | Value::Object(_) => None,
        }
    }

    /// Converts the key into a JSON value.
    ///
    /// Integral numbers that fit an `i64` become JSON integers.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_value).collect()),
        }
    }

    /// Returns the number if this is a number key.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::String(_) => 1,
            Self::Array(_) => 2,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // NaN is rejected at construction, so partial_cmp always succeeds.
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Key>> for Key {
    fn from(value: Vec<Key>) -> Self {
        Self::Array(value)
    }
}

/// A dotted property path locating a key inside a record.
///
/// `"id"` reads the top-level `id` property; `"meta.created"` reads
/// `created` inside the `meta` object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPath(String);

impl KeyPath {
    /// Creates a key path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the path as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|s| !s.is_empty())
    }

    /// Reads the key at this path.
    ///
    /// Returns `None` when a property along the path is missing or when the
    /// value found is not a valid key.
    #[must_use]
    pub fn extract(&self, record: &Value) -> Option<Key> {
        let mut current = record;
        for segment in self.segments() {
            current = current.as_object()?.get(segment)?;
        }
        Key::from_value(current)
    }

    /// Writes `key` at this path, creating intermediate objects.
    ///
    /// Returns false if a non-object value sits on the path.
    pub fn inject(&self, record: &mut Value, key: &Key) -> bool {
        let segments: Vec<&str> = self.segments().collect();
        let Some((last, parents)) = segments.split_last() else {
            return false;
        };

        let mut current = record;
        for segment in parents {
            let Some(object) = current.as_object_mut() else {
                return false;
            };
            current = object
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        match current.as_object_mut() {
            Some(object) => {
                object.insert(last.to_string(), key.to_value());
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for KeyPath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn type_ordering() {
        let number = Key::from(10);
        let string = Key::from("a");
        let array = Key::from(vec![Key::from(1)]);

        assert!(number < string);
        assert!(string < array);
        assert!(Key::from(-5) < Key::from(3));
        assert!(Key::from("abc") < Key::from("abd"));
    }

    #[test]
    fn array_prefix_sorts_first() {
        let short = Key::from(vec![Key::from(1)]);
        let long = Key::from(vec![Key::from(1), Key::from(0)]);
        assert!(short < long);
    }

    #[test]
    fn nan_is_not_a_key() {
        assert!(Key::number(f64::NAN).is_none());
        assert_eq!(Key::number(-0.0), Some(Key::from(0)));
    }

    #[test]
    fn from_value_rejects_non_keys() {
        assert!(Key::from_value(&json!(null)).is_none());
        assert!(Key::from_value(&json!(true)).is_none());
        assert!(Key::from_value(&json!({"a": 1})).is_none());
        assert!(Key::from_value(&json!([1, null])).is_none());
        assert_eq!(
            Key::from_value(&json!([1, "x"])),
            Some(Key::from(vec![Key::from(1), Key::from("x")]))
        );
    }

    #[test]
    fn integral_numbers_render_as_integers() {
        assert_eq!(Key::from(7).to_value(), json!(7));
        assert_eq!(Key::from(7).to_string(), "7");
        assert_eq!(Key::number(1.5).unwrap().to_value(), json!(1.5));
    }

    #[test]
    fn extract_nested_path() {
        let path = KeyPath::new("meta.created");
        let record = json!({"meta": {"created": 42}});
        assert_eq!(path.extract(&record), Some(Key::from(42)));
        assert_eq!(path.extract(&json!({"meta": 1})), None);
    }

    #[test]
    fn inject_creates_parents() {
        let path = KeyPath::new("meta.id");
        let mut record = json!({"text": "a"});
        assert!(path.inject(&mut record, &Key::from(3)));
        assert_eq!(record, json!({"text": "a", "meta": {"id": 3}}));

        let mut scalar = json!(5);
        assert!(!KeyPath::new("id").inject(&mut scalar, &Key::from(1)));
    }

    fn key_strategy() -> impl Strategy<Value = Key> {
        let leaf = prop_oneof![
            (-1.0e9f64..1.0e9).prop_map(|n| Key::number(n).unwrap()),
            "[a-z]{0,8}".prop_map(Key::from),
        ];
        leaf.prop_recursive(2, 8, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Key::Array)
        })
    }

    proptest! {
        #[test]
        fn ordering_is_total_and_antisymmetric(a in key_strategy(), b in key_strategy()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        #[test]
        fn value_roundtrip_preserves_key(key in key_strategy()) {
            prop_assert_eq!(Key::from_value(&key.to_value()), Some(key));
        }
    }
}
