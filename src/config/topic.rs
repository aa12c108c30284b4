use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::{Error, Result};

/// Tuning for the change-notification topic.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TopicConfig {
    /// Number of published batches kept for late subscribers. A
    /// subscriber whose cursor falls behind this window gets a full
    /// resend instead of the missed batches.
    #[serde(default = "default_retention")]
    pub retention: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
        }
    }
}

impl TopicConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retention == 0 {
            return Err(Error::Config(ConfigError::Message(
                "topic.retention must be at least 1".to_string(),
            )));
        }
        Ok(())
    }
}

fn default_retention() -> usize {
    1024
}
