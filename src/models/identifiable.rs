//! Entity identifiers.

use super::SqlValue;
use std::fmt::Debug;
use uuid::Uuid;

/// An entity with a unique identifier of type `K`.
pub trait Identifiable<K> {
    /// Returns the identifier, if one has been assigned.
    fn id(&self) -> Option<&K>;

    /// Assigns the identifier.
    fn set_id(&mut self, id: K);
}

/// A value usable as an entity identifier.
pub trait IdValue: Clone + Debug + Send + Sync + 'static {
    /// Generates a fresh, collision-resistant identifier.
    fn generate() -> Self;

    /// Converts the identifier into a statement parameter.
    fn to_sql_value(&self) -> SqlValue;
}

impl IdValue for String {
    fn generate() -> Self {
        IdGenerator::next_string()
    }

    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }
}

impl IdValue for i64 {
    fn generate() -> Self {
        IdGenerator::next_long()
    }

    fn to_sql_value(&self) -> SqlValue {
        SqlValue::Integer(*self)
    }
}

/// Identifier generator.
pub struct IdGenerator;

impl IdGenerator {
    /// Generates a random string id: 32 lowercase hex digits, no dashes.
    #[must_use]
    pub fn next_string() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Generates a positive random long id.
    ///
    /// Folds the two halves of a `UUIDv4` together and clears the sign bit.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn next_long() -> i64 {
        let (high, low) = Uuid::new_v4().as_u64_pair();
        (((high ^ low) >> 1) as i64).max(1)
    }
}
