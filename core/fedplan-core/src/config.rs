//! 옵티마이저 설정
//!
//! Tuning constants of the planner. None of these values carry semantic
//! weight: they only steer heuristics and the rule engine safety valve.

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};

/// Optimizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of rule applications that change the tree in one run.
    pub max_rule_applications: usize,
    /// Largest independent-side estimate that may drive a dependent join.
    pub dependent_join_threshold: u64,
    /// Dependent side must be at least this many times larger than the
    /// independent side when its estimate is known.
    pub dependent_cost_ratio: f64,
    /// IN-list cap for models that support IN criteria without declaring one.
    pub default_max_in_list: usize,
    /// Inputs at or below this estimate are cheap to sort locally.
    pub small_input_rows: u64,
    /// Larger/smaller cardinality ratio that favours a partitioned sort join.
    pub partitioned_sort_ratio: f64,
    /// The partitioned side of a partitioned sort join must fit this estimate.
    pub partitioned_sort_max_rows: u64,
    /// Treat models sharing a connector id as a single pushdown domain.
    pub same_connector_pushdown: bool,
    /// Re-parse every rendered atomic command.
    pub validate_atomic_commands: bool,
    /// Record before/after explain text for every rule firing.
    pub trace_plans: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_rule_applications: 10_000,
            dependent_join_threshold: 10_000,
            dependent_cost_ratio: 4.0,
            default_max_in_list: 1_000,
            small_input_rows: 1_000,
            partitioned_sort_ratio: 8.0,
            partitioned_sort_max_rows: 100_000,
            same_connector_pushdown: true,
            validate_atomic_commands: false,
            trace_plans: false,
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> PlanResult<Self> {
        let config: OptimizerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PlanResult<()> {
        if self.max_rule_applications == 0 {
            return Err(PlanError::Config(
                "max_rule_applications must be positive".to_string(),
            ));
        }
        if self.default_max_in_list == 0 {
            return Err(PlanError::Config(
                "default_max_in_list must be positive".to_string(),
            ));
        }
        if !(self.dependent_cost_ratio >= 1.0) || !(self.partitioned_sort_ratio >= 1.0) {
            return Err(PlanError::Config(
                "cost ratios must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_rule_applications(mut self, max: usize) -> Self {
        self.max_rule_applications = max;
        self
    }

    pub fn with_dependent_join_threshold(mut self, rows: u64) -> Self {
        self.dependent_join_threshold = rows;
        self
    }

    pub fn with_default_max_in_list(mut self, size: usize) -> Self {
        self.default_max_in_list = size;
        self
    }

    pub fn with_small_input_rows(mut self, rows: u64) -> Self {
        self.small_input_rows = rows;
        self
    }

    pub fn with_same_connector_pushdown(mut self, enabled: bool) -> Self {
        self.same_connector_pushdown = enabled;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_atomic_commands = enabled;
        self
    }

    pub fn with_trace_plans(mut self, enabled: bool) -> Self {
        self.trace_plans = enabled;
        self
    }
}
