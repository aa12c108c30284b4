use serde::Deserialize;
use serde::Serialize;

use crate::errors::Result;

/// Tuning for the key-graph resolver.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ResolverConfig {
    /// Upper bound on expansion rounds per resolution. Request trees are
    /// finite, but the data they point at is not under our control; a
    /// resolution that has not settled within this many rounds is
    /// aborted. `0` disables the bound.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        Ok(())
    }
}

fn default_max_rounds() -> usize {
    100
}
