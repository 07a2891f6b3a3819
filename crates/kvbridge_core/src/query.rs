//! Query descriptors.
//!
//! A [`Query`] names an optional index, an optional key range and a
//! direction. It is a plain value: building one copies the builder's state,
//! so reusing a builder never changes a query that is already in use.

use crate::error::{CoreError, CoreResult};
use kvbridge_engine::{CursorDirection, Key, KeyRange};
use serde::{Deserialize, Serialize};

/// Iteration order of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Ascending key order.
    #[default]
    Ascending,
    /// Ascending, first record of each distinct key.
    AscendingUnique,
    /// Descending key order.
    Descending,
    /// Descending, first record of each distinct key.
    DescendingUnique,
}

impl Direction {
    /// Returns the engine cursor direction.
    #[must_use]
    pub fn cursor_direction(self) -> CursorDirection {
        match self {
            Self::Ascending => CursorDirection::Next,
            Self::AscendingUnique => CursorDirection::NextUnique,
            Self::Descending => CursorDirection::Prev,
            Self::DescendingUnique => CursorDirection::PrevUnique,
        }
    }

    fn pick(descending: bool, unique: bool) -> Self {
        match (descending, unique) {
            (false, false) => Self::Ascending,
            (false, true) => Self::AscendingUnique,
            (true, false) => Self::Descending,
            (true, true) => Self::DescendingUnique,
        }
    }
}

impl From<Direction> for CursorDirection {
    fn from(direction: Direction) -> Self {
        direction.cursor_direction()
    }
}

/// What to iterate over, and in which order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Index to read through; `None` reads the primary key.
    pub index: Option<String>,
    /// Key range; `None` is unbounded.
    pub range: Option<KeyRange>,
    /// Iteration order.
    pub direction: Direction,
}

impl Query {
    /// An unbounded ascending scan over the primary key.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Keys from `begin` to `end`, both inclusive.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if `begin` sorts after `end`.
    pub fn between_keys(begin: impl Into<Key>, end: impl Into<Key>) -> CoreResult<Self> {
        let range = KeyRange::bound(begin.into(), end.into(), false, false)
            .map_err(|e| CoreError::invalid_query(e.to_string()))?;
        Ok(Self {
            range: Some(range),
            ..Self::default()
        })
    }

    /// Returns the same query read through `index`.
    #[must_use]
    pub fn on_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }
}

/// Incremental builder for [`Query`].
///
/// Each range predicate replaces the previous one; ranges are never
/// intersected.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
    error: Option<CoreError>,
}

impl QueryBuilder {
    /// Creates a builder for an unbounded ascending scan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set_range(&mut self, range: KeyRange) -> &mut Self {
        self.query.range = Some(range);
        self.error = None;
        self
    }

    /// Keys equal to `key`.
    pub fn eq(&mut self, key: impl Into<Key>) -> &mut Self {
        self.set_range(KeyRange::only(key.into()))
    }

    /// Keys below `key`.
    pub fn lt(&mut self, key: impl Into<Key>) -> &mut Self {
        self.set_range(KeyRange::upper_bound(key.into(), true))
    }

    /// Keys at or below `key`.
    pub fn lte(&mut self, key: impl Into<Key>) -> &mut Self {
        self.set_range(KeyRange::upper_bound(key.into(), false))
    }

    /// Keys above `key`.
    pub fn gt(&mut self, key: impl Into<Key>) -> &mut Self {
        self.set_range(KeyRange::lower_bound(key.into(), true))
    }

    /// Keys at or above `key`.
    pub fn gte(&mut self, key: impl Into<Key>) -> &mut Self {
        self.set_range(KeyRange::lower_bound(key.into(), false))
    }

    /// Keys between `low` and `high`, each end excluded when its flag is set.
    ///
    /// A malformed range (for example `low > high`) is reported by
    /// [`build`](Self::build).
    pub fn between(
        &mut self,
        low: impl Into<Key>,
        high: impl Into<Key>,
        exclude_low: bool,
        exclude_high: bool,
    ) -> &mut Self {
        match KeyRange::bound(low.into(), high.into(), exclude_low, exclude_high) {
            Ok(range) => self.set_range(range),
            Err(e) => {
                self.query.range = None;
                self.error = Some(CoreError::invalid_query(e.to_string()));
                self
            }
        }
    }

    /// Iterates in ascending order.
    pub fn ascending(&mut self, unique: bool) -> &mut Self {
        self.query.direction = Direction::pick(false, unique);
        self
    }

    /// Iterates in descending order.
    pub fn descending(&mut self, unique: bool) -> &mut Self {
        self.query.direction = Direction::pick(true, unique);
        self
    }

    /// Reads through the named index.
    pub fn use_index(&mut self, index: impl Into<String>) -> &mut Self {
        self.query.index = Some(index.into());
        self
    }

    /// Produces an independent query.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the last range predicate was malformed.
    pub fn build(&self) -> CoreResult<Query> {
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.query.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_is_unbounded_ascending() {
        let query = QueryBuilder::new().build().unwrap();
        assert_eq!(query, Query::all());
        assert_eq!(query.direction.cursor_direction(), CursorDirection::Next);
    }

    #[test]
    fn last_predicate_wins() {
        let query = QueryBuilder::new().gt(3).lt(8).build().unwrap();
        let range = query.range.unwrap();
        assert!(range.contains(&Key::from(1)));
        assert!(!range.contains(&Key::from(8)));
    }

    #[test]
    fn between_with_exclusions() {
        let query = QueryBuilder::new().between(5, 10, true, false).build().unwrap();
        let range = query.range.unwrap();
        assert!(!range.contains(&Key::from(5)));
        assert!(range.contains(&Key::from(10)));
    }

    #[test]
    fn malformed_range_fails_build_until_replaced() {
        let mut builder = QueryBuilder::new();
        builder.between(10, 5, false, false);
        assert!(matches!(builder.build(), Err(CoreError::InvalidQuery { .. })));

        builder.eq(7);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn directions_map_to_cursor_directions() {
        let mut builder = QueryBuilder::new();
        assert_eq!(
            builder.descending(true).build().unwrap().direction,
            Direction::DescendingUnique
        );
        assert_eq!(
            builder.ascending(true).build().unwrap().direction.cursor_direction(),
            CursorDirection::NextUnique
        );
        assert_eq!(
            CursorDirection::from(Direction::Descending),
            CursorDirection::Prev
        );
    }

    #[test]
    fn built_query_is_independent_of_builder() {
        let mut builder = QueryBuilder::new();
        builder.use_index("tag").eq("a");
        let first = builder.build().unwrap();
        builder.use_index("other").descending(false).eq("b");

        assert_eq!(first.index.as_deref(), Some("tag"));
        assert_eq!(first.direction, Direction::Ascending);
        assert_eq!(first.range, Some(KeyRange::only(Key::from("a"))));
    }

    #[test]
    fn between_keys_is_inclusive() {
        let query = Query::between_keys(2, 4).unwrap().on_index("n");
        let range = query.range.unwrap();
        assert!(range.contains(&Key::from(2)));
        assert!(range.contains(&Key::from(4)));
        assert_eq!(query.index.as_deref(), Some("n"));
        assert!(Query::between_keys(4, 2).is_err());
    }

    proptest! {
        #[test]
        fn eq_matches_only_its_key(key in -1000i32..1000, probe in -1000i32..1000) {
            let query = QueryBuilder::new().eq(key).build().unwrap();
            let range = query.range.unwrap();
            prop_assert_eq!(range.contains(&Key::from(probe)), key == probe);
        }
    }
}
