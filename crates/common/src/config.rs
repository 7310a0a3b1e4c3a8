use serde::{Deserialize, Serialize};

/// Global engine/session configuration shared across planner and execution
/// layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hash partition count used by exchange operators.
    pub shuffle_partitions: usize,
    /// Row-count threshold below which a join side is considered small enough
    /// to broadcast.
    pub broadcast_threshold_rows: usize,
    /// Iteration budget for fixpoint rule batches.
    #[serde(default = "default_max_rule_iterations")]
    pub max_rule_iterations: usize,
}

fn default_max_rule_iterations() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shuffle_partitions: 8,
            broadcast_threshold_rows: 100_000,
            max_rule_iterations: default_max_rule_iterations(),
        }
    }
}
