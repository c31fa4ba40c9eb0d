//! Optimizer settings.

use serde::{Deserialize, Serialize};

use crate::error::{AllocationError, Result};

/// How the total-spend constraint is enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendPolicy {
    /// Total spend may be anything up to the budget.
    #[default]
    UpTo,
    /// Total spend must equal the budget.
    Exhaust,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    /// Convergence threshold on the largest per-channel move, relative to
    /// `max(1, budget)`.
    pub tolerance: f64,
    pub spend_policy: SpendPolicy,
    /// Minimum spend, as a share of the budget, for channels without an
    /// explicit minimum.
    pub default_min_share: f64,
    /// Maximum spend, as a share of the budget, for channels without an
    /// explicit maximum.
    pub default_max_share: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-8,
            spend_policy: SpendPolicy::UpTo,
            default_min_share: 0.0,
            default_max_share: 1.0,
        }
    }
}

impl OptimizerConfig {
    /// Parses a JSON payload; absent keys keep their defaults.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|err| AllocationError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AllocationError::InvalidConfig(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(AllocationError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        let shares_valid = self.default_min_share.is_finite()
            && self.default_max_share.is_finite()
            && 0.0 <= self.default_min_share
            && self.default_min_share <= self.default_max_share;
        if !shares_valid {
            return Err(AllocationError::InvalidConfig(format!(
                "default shares must satisfy 0 <= min <= max, got [{}, {}]",
                self.default_min_share, self.default_max_share
            )));
        }
        Ok(())
    }
}
