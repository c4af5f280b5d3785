//! Wire and view data for the matching workflow.
//!
//! Every field the backend may omit or send as `null` has an explicit default,
//! so rendering never has to guess.

pub mod patient;
pub mod results;
pub mod trial;

pub use patient::*;
pub use results::*;
pub use trial::*;

use serde::{Deserialize, Deserializer};

/// Treat a JSON `null` the same as a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
