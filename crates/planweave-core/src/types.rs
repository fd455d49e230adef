use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Shared key-value namespace ("globals_schema") and input maps.
pub type Namespace = serde_json::Map<String, Value>;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a short random id (8 hex chars).
    pub fn new() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution status of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    /// Completed or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A user-supplied file attached to the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    pub size: u64,
}

impl FileEntry {
    /// Describe a file on disk. Fails if the file cannot be stat'ed.
    pub fn from_path(path: &std::path::Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            path: path.display().to_string(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            size: meta.len(),
        })
    }
}

/// Session metadata handed to the formatter capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub file_manifest: Vec<FileEntry>,
}

// ── Capability payloads ─────────────────────────────────────────

/// Payload sent to a capability. Serialized untagged: the wire form is the
/// bare object of the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityInput {
    Step(StepInput),
    Plan(PlanInput),
    Profile(ProfileInput),
}

/// Input for executing one plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    pub step_id: String,
    pub agent_prompt: String,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
    pub inputs: Namespace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_output: Option<CapabilityOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_context: Option<Value>,
    /// The whole namespace; only sent to the formatter capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_globals_schema: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_context: Option<SessionContext>,
}

/// Input for the planner capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanInput {
    pub original_query: String,
    pub planning_strategy: String,
    pub globals_schema: Namespace,
    pub file_manifest: Vec<FileEntry>,
    pub file_profiles: Value,
}

/// Input for the file-profiling capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInput {
    pub task: String,
    pub files: Vec<String>,
    pub instruction: String,
    pub writes: Vec<String>,
}

impl ProfileInput {
    pub fn for_files(files: Vec<String>) -> Self {
        Self {
            task: "profile_files".to_string(),
            files,
            instruction: "Profile and summarize each file's structure, columns, content type"
                .to_string(),
            writes: vec!["file_profiles".to_string()],
        }
    }
}

/// Structured output returned by a capability.
///
/// Known fields are typed; everything else lands in `fields` and is carried
/// through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    /// Request a second turn for the same step.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub call_self: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_context: Option<Value>,
    /// Named code snippets; tried in order until one succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_variants: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_variant: Option<String>,
    #[serde(flatten)]
    pub fields: Namespace,
}

impl CapabilityOutput {
    /// Build an output from arbitrary JSON fields.
    pub fn from_fields(fields: Namespace) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    /// Parse a JSON object into an output. Known fields are lifted out.
    pub fn from_value(value: Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Look up an untyped output field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set an untyped output field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn cost(&self) -> f64 {
        self.cost.unwrap_or(0.0)
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens.unwrap_or(0)
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens.unwrap_or(0)
    }

    /// Non-empty code snippets carried by this output, in declaration order.
    pub fn executable_code(&self) -> Vec<(String, String)> {
        self.code_variants
            .iter()
            .flat_map(|variants| variants.iter())
            .map(|(k, code)| (k.clone(), code.trim().to_string()))
            .filter(|(_, code)| !code.is_empty())
            .collect()
    }

    pub fn has_executable_code(&self) -> bool {
        !self.executable_code().is_empty()
    }

    /// Whether embedded code was already run and merged into this output.
    pub fn was_executed(&self) -> bool {
        self.execution_status.is_some()
    }

    /// Fold a code execution into this output. On success, result keys the
    /// output does not already carry are copied in as plain fields.
    pub fn merge_execution(&mut self, exec: &CodeExecution) {
        self.execution_result = Some(Value::Object(exec.result.clone()));
        self.execution_status = Some(exec.status.to_string());
        self.execution_error = exec.error.clone();
        self.execution_time = exec.execution_time;
        self.executed_variant = exec.executed_variant.clone();

        if exec.is_success() {
            for (key, value) in &exec.result {
                if !self.fields.contains_key(key) {
                    self.fields.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Keys of the untyped fields, for display.
    pub fn field_keys(&self) -> Vec<&str> {
        self.fields.keys().map(|k| k.as_str()).collect()
    }
}

/// Outcome of a capability invocation that did not raise.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityResult {
    Success(CapabilityOutput),
    Failure(String),
}

impl CapabilityResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CapabilityResult::Success(_))
    }

    pub fn output(&self) -> Option<&CapabilityOutput> {
        match self {
            CapabilityResult::Success(out) => Some(out),
            CapabilityResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CapabilityResult::Success(_) => None,
            CapabilityResult::Failure(e) => Some(e),
        }
    }
}

// ── Code execution ──────────────────────────────────────────────

/// A code snippet to run, with the namespace injected as variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRequest {
    pub code: String,
    pub variant: String,
    pub globals: Namespace,
    pub reads_data: Namespace,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => f.write_str("success"),
            ExecutionStatus::Error => f.write_str("error"),
        }
    }
}

/// Result of running embedded code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExecution {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub result: Namespace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_variant: Option<String>,
}

impl CodeExecution {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            result: Namespace::new(),
            error: Some(error.into()),
            execution_time: None,
            executed_variant: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

// ── Events ──────────────────────────────────────────────────────

/// Progress events emitted while a plan graph executes.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        session_id: String,
        total_steps: usize,
    },
    BatchStarted {
        iteration: usize,
        steps: Vec<String>,
    },
    StepStarted {
        step_id: String,
        agent: String,
    },
    StepCompleted {
        step_id: String,
        call_self_used: bool,
    },
    StepFailed {
        step_id: String,
        error: String,
    },
    Idle {
        iteration: usize,
    },
    RunFinished {
        outcome: String,
        iterations: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_known_and_extra_fields() {
        let out = CapabilityOutput::from_value(json!({
            "call_self": true,
            "next_instruction": "Summarize",
            "cost": 0.25,
            "input_tokens": 120,
            "findings": ["a", "b"],
        }))
        .unwrap();

        assert!(out.call_self);
        assert_eq!(out.next_instruction.as_deref(), Some("Summarize"));
        assert_eq!(out.cost(), 0.25);
        assert_eq!(out.input_tokens(), 120);
        assert_eq!(out.output_tokens(), 0);
        assert_eq!(out.field("findings"), Some(&json!(["a", "b"])));
        assert!(out.field("call_self").is_none());
    }

    #[test]
    fn test_output_serializes_flat() {
        let out = CapabilityOutput::default().with_field("x", json!(5));
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value, json!({"x": 5}));
    }

    #[test]
    fn test_integer_cost_accepted() {
        let out = CapabilityOutput::from_value(json!({"cost": 0})).unwrap();
        assert_eq!(out.cost(), 0.0);
    }

    #[test]
    fn test_executable_code_skips_blank_variants() {
        let out = CapabilityOutput::from_value(json!({
            "code_variants": {"CODE_1A": "  ", "CODE_1B": " x = 1 "}
        }))
        .unwrap();
        assert_eq!(
            out.executable_code(),
            vec![("CODE_1B".to_string(), "x = 1".to_string())]
        );
        assert!(out.has_executable_code());
        assert!(!CapabilityOutput::default().has_executable_code());
    }

    #[test]
    fn test_merge_execution_keeps_existing_fields() {
        let mut out = CapabilityOutput::default().with_field("total", json!("agent"));
        let mut result = Namespace::new();
        result.insert("total".into(), json!(10));
        result.insert("rows".into(), json!(3));
        out.merge_execution(&CodeExecution {
            status: ExecutionStatus::Success,
            result,
            error: None,
            execution_time: Some(0.2),
            executed_variant: Some("CODE_1A".into()),
        });

        assert!(out.was_executed());
        assert_eq!(out.execution_status.as_deref(), Some("success"));
        assert_eq!(out.field("total"), Some(&json!("agent")));
        assert_eq!(out.field("rows"), Some(&json!(3)));
        assert_eq!(out.execution_result, Some(json!({"total": 10, "rows": 3})));
        assert_eq!(out.executed_variant.as_deref(), Some("CODE_1A"));
    }

    #[test]
    fn test_merge_failed_execution_adds_no_fields() {
        let mut out = CapabilityOutput::default();
        out.merge_execution(&CodeExecution::failed("All code variants failed"));
        assert_eq!(out.execution_status.as_deref(), Some("error"));
        assert_eq!(out.execution_error.as_deref(), Some("All code variants failed"));
        assert!(out.fields.is_empty());
    }

    #[test]
    fn test_step_input_omits_absent_optionals() {
        let input = CapabilityInput::Step(StepInput {
            step_id: "T001".into(),
            agent_prompt: "Do it".into(),
            reads: vec![],
            writes: vec!["x".into()],
            inputs: Namespace::new(),
            previous_output: None,
            iteration_context: None,
            all_globals_schema: None,
            original_query: None,
            session_context: None,
        });
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(
            value,
            json!({
                "step_id": "T001",
                "agent_prompt": "Do it",
                "reads": [],
                "writes": ["x"],
                "inputs": {}
            })
        );
    }

    #[test]
    fn test_status_terminal() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert_eq!(StepStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_session_id_short() {
        let id = SessionId::new();
        assert_eq!(id.0.len(), 8);
        assert_ne!(id, SessionId::new());
    }
}
