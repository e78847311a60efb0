//! # Core

use serde::{Deserialize, Serialize};

/// `OneMany` allows serde to serialize/deserialize a single object or a set of
/// objects.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneMany<T> {
    /// Single object
    One(T),

    /// Set of objects
    Many(Vec<T>),
}

impl<T: Clone> OneMany<T> {
    /// Convert the value to a vector.
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            Self::One(value) => vec![value.clone()],
            Self::Many(values) => values.clone(),
        }
    }
}

impl<T> OneMany<T> {
    /// Build from a vector: a single element serializes as `One`.
    pub fn from_vec(mut values: Vec<T>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::One),
            _ => Some(Self::Many(values)),
        }
    }
}

impl<T> OneMany<T> {
    /// Consume the value into a vector.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

/// Serialize a `Vec<T>` as a single object when it holds exactly one element,
/// otherwise as an array. Deserializes either form.
pub mod flexvec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::OneMany;

    /// Serialize a one-or-many vector.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error.
    #[allow(clippy::ptr_arg)]
    pub fn serialize<T, S>(values: &Vec<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match values.as_slice() {
            [one] => one.serialize(serializer),
            many => many.serialize(serializer),
        }
    }

    /// Deserialize a one-or-many vector.
    ///
    /// # Errors
    ///
    /// Returns the deserializer's error.
    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Ok(OneMany::<T>::deserialize(deserializer)?.into_vec())
    }
}
