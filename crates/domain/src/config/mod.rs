mod model;
mod runtime;
mod storage;

pub use model::*;
pub use runtime::*;
pub use storage::*;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Server configuration, read once at startup. Reconfiguration requires a
/// quiesce and restart.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

impl Config {
    /// Sanity-check values that would wedge the runtime.
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_parallel_missions == 0 {
            return Err(Error::Config("runtime.max_parallel_missions must be >= 1".into()));
        }
        if self.runtime.max_iterations == 0 {
            return Err(Error::Config("runtime.max_iterations must be >= 1".into()));
        }
        if self.runtime.subscription_buffer == 0 {
            return Err(Error::Config("runtime.subscription_buffer must be >= 1".into()));
        }
        if self.runtime.stall_severe_seconds <= self.runtime.stall_warn_seconds {
            return Err(Error::Config(
                "runtime.stall_severe_seconds must exceed stall_warn_seconds".into(),
            ));
        }
        if self.storage.state_path.as_os_str().is_empty() {
            return Err(Error::Config("storage.state_path must be set".into()));
        }
        Ok(())
    }
}
