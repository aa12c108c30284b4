//! Configuration for the autoupdate engine.
//!
//! Hierarchical loading and validation:
//! - Default values as code base
//! - Configuration file from `CONFIG_PATH` (optional)
//! - Environment variable overrides (highest priority)

mod resolver;
mod topic;

pub use resolver::*;
pub use topic::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Main configuration container.
///
/// Sources are merged in order, later overriding earlier:
/// 1. Type defaults
/// 2. Configuration file named by the `CONFIG_PATH` environment variable
/// 3. Environment variables with the `AUTOUPDATE__` prefix
///
/// ```ignore
/// std::env::set_var("AUTOUPDATE__TOPIC__RETENTION", "4096");
/// let config = AutoupdateConfig::new()?.validate()?;
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AutoupdateConfig {
    /// Change-notification topic parameters.
    #[serde(default)]
    pub topic: TopicConfig,
    /// Key-graph resolver parameters.
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl AutoupdateConfig {
    /// Loads the merged configuration without validating it. Callers
    /// must run [`validate`](AutoupdateConfig::validate) before use.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("AUTOUPDATE")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validates all subsystems and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.topic.validate()?;
        self.resolver.validate()?;
        Ok(self)
    }
}
