use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use planweave_core::types::Namespace;

/// Cost and token usage attributed to one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepCost {
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Aggregate view of a run, computed from the context on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub session_id: String,
    pub original_query: String,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub total_steps: usize,
    pub total_cost: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    /// Keyed `"<id> (<agent>)"`; only steps that reported a positive cost.
    pub cost_breakdown: IndexMap<String, StepCost>,
    /// Values of keys that some step writes and no step reads.
    pub final_outputs: Namespace,
    pub globals_schema: Namespace,
}

impl ExecutionSummary {
    /// Steps neither completed nor failed.
    pub fn pending_steps(&self) -> usize {
        self.total_steps
            .saturating_sub(self.completed_steps + self.failed_steps)
    }

    pub fn succeeded(&self) -> bool {
        self.failed_steps == 0 && self.completed_steps == self.total_steps
    }
}
