//! Shared components between the unit tests of the engine modules.

mod memory_datastore;

pub use memory_datastore::*;

use std::str::FromStr;

use crate::key::Key;

/// Parses a list of key literals, panicking on invalid input.
pub fn keys(literals: &[&str]) -> Vec<Key> {
    literals
        .iter()
        .map(|literal| Key::from_str(literal).expect("invalid key literal in test"))
        .collect()
}
