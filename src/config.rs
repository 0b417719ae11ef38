//! Engine configuration.
//!
//! A small set of scalars handed to [`SuperstepEngine::init`](crate::SuperstepEngine::init).

use serde::{Deserialize, Serialize};

use crate::error::{PieError, Result};

/// Default number of indices claimed per executor batch.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Default iteration budget.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Per-partition engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of pool threads.
    pub parallelism: usize,

    /// Round counter value at which `parallel_inc_eval` stops doing work.
    pub max_iterations: u32,

    /// Number of indices a pool thread claims at a time.
    pub batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: num_cpus::get(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl EngineConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pool size.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the executor batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Checks the scalars for values the engine cannot run with.
    ///
    /// # Errors
    /// Returns [`PieError::Config`] if `parallelism` or `batch_size` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(PieError::Config("parallelism must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(PieError::Config("batch_size must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.parallelism >= 1);
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_scalars_are_rejected() {
        let err = EngineConfig::new().with_parallelism(0).validate().unwrap_err();
        assert!(matches!(err, PieError::Config(_)));
        let err = EngineConfig::new().with_batch_size(0).validate().unwrap_err();
        assert!(matches!(err, PieError::Config(_)));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{ "max_iterations": 3 }"#).unwrap();
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        assert!(cfg.parallelism >= 1);
    }
}
