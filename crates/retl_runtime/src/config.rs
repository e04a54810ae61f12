//! Engine configuration.

use retl_core::{RetlError, RetlResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a stream worker does when an operator fails on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report the record and continue with the next one
    #[default]
    SkipRecord,
    /// Stop the failing stream and every stream downstream of it
    CancelStream,
    /// Stop the whole run
    AbortPipeline,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SkipRecord => "skip_record",
            Self::CancelStream => "cancel_stream",
            Self::AbortPipeline => "abort_pipeline",
        })
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "skip" | "skip_record" => Ok(Self::SkipRecord),
            "cancel" | "cancel_stream" => Ok(Self::CancelStream),
            "abort" | "abort_pipeline" => Ok(Self::AbortPipeline),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}

/// Execution engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of each bounded stream queue
    pub queue_capacity: usize,
    /// Maximum number of branch hops a record may take
    pub max_routing_depth: u32,
    /// Per-record failure handling
    pub failure_policy: FailurePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_routing_depth: 64,
            failure_policy: FailurePolicy::SkipRecord,
        }
    }
}

impl EngineConfig {
    /// Create a default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` for malformed JSON or an invalid value
    pub fn from_json(text: &str) -> RetlResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| RetlError::definition("engine config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can run
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` if `queue_capacity` is zero
    pub fn validate(&self) -> RetlResult<()> {
        if self.queue_capacity == 0 {
            return Err(RetlError::definition(
                "engine config",
                "`queue_capacity` must be at least 1",
            ));
        }
        Ok(())
    }

    /// Set queue capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set maximum routing depth
    #[must_use]
    pub fn with_max_routing_depth(mut self, depth: u32) -> Self {
        self.max_routing_depth = depth;
        self
    }

    /// Set failure policy
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}
