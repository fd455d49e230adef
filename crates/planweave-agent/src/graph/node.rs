use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use planweave_core::types::{CapabilityOutput, Namespace, StepStatus};

/// One recorded turn of a multi-turn step.
///
/// A failed second turn keeps `output` empty and carries the error instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub iteration: u32,
    #[serde(default)]
    pub output: Option<CapabilityOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Iteration {
    pub fn succeeded(iteration: u32, output: CapabilityOutput) -> Self {
        Self {
            iteration,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(iteration: u32, error: impl Into<String>) -> Self {
        Self {
            iteration,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// A step in the plan graph.
///
/// The planner supplies identity, agent, description and the reads/writes
/// declarations; everything below `status` is runtime bookkeeping owned by
/// the execution context. Unknown planner fields are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNode {
    /// Unique identifier (e.g. "T012").
    pub id: String,
    /// Capability that executes this step.
    pub agent: String,
    #[serde(default)]
    pub description: String,
    /// Instruction override; falls back to `description`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_prompt: Option<String>,
    /// Namespace keys consumed.
    #[serde(default)]
    pub reads: Vec<String>,
    /// Namespace keys produced.
    #[serde(default)]
    pub writes: Vec<String>,

    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub output: Option<CapabilityOutput>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub iterations: Vec<Iteration>,
    #[serde(default)]
    pub call_self_used: bool,
    #[serde(default)]
    pub final_iteration_output: Option<CapabilityOutput>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between `start_time` and `end_time`.
    #[serde(default)]
    pub execution_time: f64,
    /// Declared writes the completed output did not provide.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_writes: Vec<String>,

    #[serde(flatten)]
    pub extra: Namespace,
}

impl StepNode {
    /// Create a pending step with minimal configuration.
    pub fn new(id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            description: String::new(),
            agent_prompt: None,
            reads: vec![],
            writes: vec![],
            status: StepStatus::Pending,
            output: None,
            error: None,
            iterations: vec![],
            call_self_used: false,
            final_iteration_output: None,
            cost: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            start_time: None,
            end_time: None,
            execution_time: 0.0,
            missing_writes: vec![],
            extra: Namespace::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the instruction override.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.agent_prompt = Some(prompt.into());
        self
    }

    /// Set the read keys.
    pub fn with_reads<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.reads = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the write keys.
    pub fn with_writes<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.writes = keys.into_iter().map(Into::into).collect();
        self
    }

    /// The instruction sent on the first turn.
    pub fn effective_prompt(&self) -> &str {
        self.agent_prompt.as_deref().unwrap_or(&self.description)
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Drop all runtime state and return to pending.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.output = None;
        self.error = None;
        self.iterations.clear();
        self.call_self_used = false;
        self.final_iteration_output = None;
        self.cost = 0.0;
        self.input_tokens = 0;
        self.output_tokens = 0;
        self.start_time = None;
        self.end_time = None;
        self.execution_time = 0.0;
        self.missing_writes.clear();
    }

    /// Stamp `end_time` and derive `execution_time`.
    pub(crate) fn finish_clock(&mut self) {
        let end = Utc::now();
        self.end_time = Some(end);
        if let Some(start) = self.start_time {
            self.execution_time = (end - start).num_milliseconds().max(0) as f64 / 1000.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_builder() {
        let node = StepNode::new("T001", "RetrieverAgent")
            .with_description("Find sources")
            .with_reads(["topic"])
            .with_writes(["sources_T001"]);

        assert_eq!(node.id, "T001");
        assert_eq!(node.agent, "RetrieverAgent");
        assert_eq!(node.reads, vec!["topic"]);
        assert_eq!(node.writes, vec!["sources_T001"]);
        assert_eq!(node.status, StepStatus::Pending);
        assert_eq!(node.effective_prompt(), "Find sources");
    }

    #[test]
    fn test_prompt_override_wins() {
        let node = StepNode::new("T002", "ThinkerAgent")
            .with_description("Compare")
            .with_prompt("Compare the two options in a table");
        assert_eq!(node.effective_prompt(), "Compare the two options in a table");
    }

    #[test]
    fn test_planner_node_defaults_and_extra() {
        let node: StepNode = serde_json::from_value(json!({
            "id": "T003",
            "agent": "CoderAgent",
            "description": "Plot it",
            "reads": ["data"],
            "writes": ["chart"],
            "priority": "high"
        }))
        .unwrap();

        assert_eq!(node.status, StepStatus::Pending);
        assert!(node.output.is_none());
        assert!(node.iterations.is_empty());
        assert_eq!(node.extra.get("priority"), Some(&json!("high")));
    }

    #[test]
    fn test_reset_clears_runtime_state() {
        let mut node = StepNode::new("T004", "ThinkerAgent");
        node.status = StepStatus::Failed;
        node.error = Some("boom".into());
        node.iterations.push(Iteration::failed(2, "boom"));
        node.call_self_used = true;
        node.cost = 1.5;
        node.missing_writes.push("x".into());

        node.reset();

        assert_eq!(node.status, StepStatus::Pending);
        assert!(node.error.is_none());
        assert!(node.iterations.is_empty());
        assert!(!node.call_self_used);
        assert_eq!(node.cost, 0.0);
        assert!(node.missing_writes.is_empty());
    }
}
