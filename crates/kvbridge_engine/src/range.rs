//! Key ranges and cursor directions.

use crate::error::{NativeError, NativeResult};
use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A continuous interval of keys.
///
/// Either bound may be absent (unbounded) and each present bound is either
/// closed (inclusive) or open (exclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// A range containing exactly `key`.
    #[must_use]
    pub fn only(key: Key) -> Self {
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// All keys above `key` (or equal to it, unless `open`).
    #[must_use]
    pub fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: Some(key),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    /// All keys below `key` (or equal to it, unless `open`).
    #[must_use]
    pub fn upper_bound(key: Key, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(key),
            lower_open: false,
            upper_open: open,
        }
    }

    /// All keys between `lower` and `upper`.
    ///
    /// # Errors
    ///
    /// Returns a `DataError` if `lower` is greater than `upper`, or if they
    /// are equal and either end is open (the range would be empty).
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> NativeResult<Self> {
        match lower.cmp(&upper) {
            Ordering::Greater => Err(NativeError::data(format!(
                "lower bound {lower} is greater than upper bound {upper}"
            ))),
            Ordering::Equal if lower_open || upper_open => Err(NativeError::data(format!(
                "bounds are both {lower} and one of them is open"
            ))),
            _ => Ok(Self {
                lower: Some(lower),
                upper: Some(upper),
                lower_open,
                upper_open,
            }),
        }
    }

    /// Returns the lower bound.
    #[must_use]
    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    /// Returns the upper bound.
    #[must_use]
    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    /// Returns true if the lower bound is exclusive.
    #[must_use]
    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    /// Returns true if the upper bound is exclusive.
    #[must_use]
    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    /// Returns true if `key` lies inside the range.
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            None => true,
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
        };
        let below_upper = match &self.upper {
            None => true,
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
        };
        above_lower && below_upper
    }
}

/// Direction in which a cursor walks its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorDirection {
    /// Ascending, every record.
    #[default]
    Next,
    /// Ascending, first record of each distinct key.
    NextUnique,
    /// Descending, every record.
    Prev,
    /// Descending, first record of each distinct key.
    PrevUnique,
}

impl CursorDirection {
    /// Returns true for descending directions.
    #[must_use]
    pub fn is_reverse(self) -> bool {
        matches!(self, Self::Prev | Self::PrevUnique)
    }

    /// Returns true for directions that skip duplicate keys.
    #[must_use]
    pub fn is_unique(self) -> bool {
        matches!(self, Self::NextUnique | Self::PrevUnique)
    }

    /// Returns the engine's string name for the direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::NextUnique => "nextunique",
            Self::Prev => "prev",
            Self::PrevUnique => "prevunique",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn only_contains_single_key() {
        let range = KeyRange::only(Key::from(5));
        assert!(range.contains(&Key::from(5)));
        assert!(!range.contains(&Key::from(4)));
        assert!(!range.contains(&Key::from(6)));
    }

    #[test]
    fn open_and_closed_bounds() {
        let range = KeyRange::bound(Key::from(5), Key::from(10), true, false).unwrap();
        assert!(!range.contains(&Key::from(5)));
        assert!(range.contains(&Key::from(6)));
        assert!(range.contains(&Key::from(10)));
        assert!(!range.contains(&Key::from(11)));
    }

    #[test]
    fn half_open_ranges() {
        let lower = KeyRange::lower_bound(Key::from(3), true);
        assert!(!lower.contains(&Key::from(3)));
        assert!(lower.contains(&Key::from("z")));

        let upper = KeyRange::upper_bound(Key::from(3), false);
        assert!(upper.contains(&Key::from(3)));
        assert!(!upper.contains(&Key::from("a")));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = KeyRange::bound(Key::from(10), Key::from(5), false, false).unwrap_err();
        assert_eq!(err.name, "DataError");
        assert!(KeyRange::bound(Key::from(5), Key::from(5), true, false).is_err());
        assert!(KeyRange::bound(Key::from(5), Key::from(5), false, false).is_ok());
    }

    #[test]
    fn direction_names() {
        assert_eq!(CursorDirection::default(), CursorDirection::Next);
        assert_eq!(CursorDirection::PrevUnique.as_str(), "prevunique");
        assert!(CursorDirection::Prev.is_reverse());
        assert!(!CursorDirection::NextUnique.is_reverse());
        assert!(CursorDirection::NextUnique.is_unique());
    }

    proptest! {
        #[test]
        fn bound_contains_matches_comparison(
            low in -100i32..100,
            span in 0i32..100,
            probe in -200i32..200,
            lower_open in any::<bool>(),
            upper_open in any::<bool>()
        ) {
            let high = low + span;
            prop_assume!(span > 0 || (!lower_open && !upper_open));
            let range = KeyRange::bound(Key::from(low), Key::from(high), lower_open, upper_open).unwrap();
            let expected = (if lower_open { probe > low } else { probe >= low })
                && (if upper_open { probe < high } else { probe <= high });
            prop_assert_eq!(range.contains(&Key::from(probe)), expected);
        }
    }
}
