//! Offline inspection and single-step replay of saved sessions.
//!
//! A loaded session is always put in debug mode and renamed, so nothing the
//! debugger does can overwrite the run it was loaded from.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{Local, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use planweave_core::error::{PlanweaveError, Result};
use planweave_core::types::{CapabilityOutput, CapabilityResult, Namespace, StepStatus};

use crate::context::ExecutionContext;
use crate::graph::{Iteration, StepNode};
use crate::runner::{panic_message, StepRunner, StepTask};
use crate::session::{write_document, SessionStore};

/// Everything worth knowing about one step before replaying it.
#[derive(Debug, Clone, Serialize)]
pub struct NodeDetails {
    pub id: String,
    pub agent: String,
    pub description: String,
    pub status: StepStatus,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
    pub available_inputs: Vec<String>,
    pub missing_inputs: Vec<String>,
    pub output: Option<CapabilityOutput>,
    pub error: Option<String>,
    pub globals_keys: Vec<String>,
}

/// Top-level keys that differ between two outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl OutputDiff {
    pub fn between(old: Option<&CapabilityOutput>, new: Option<&CapabilityOutput>) -> Self {
        let old = flatten(old);
        let new = flatten(new);
        let mut diff = OutputDiff::default();
        for (key, value) in &new {
            match old.get(key) {
                None => diff.added.push(key.clone()),
                Some(prev) if prev != value => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        for key in old.keys() {
            if !new.contains_key(key) {
                diff.removed.push(key.clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

fn flatten(output: Option<&CapabilityOutput>) -> Namespace {
    output
        .and_then(|o| serde_json::to_value(o).ok())
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

/// Result of replaying one step.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub step_id: String,
    pub old_output: Option<CapabilityOutput>,
    pub new_output: Option<CapabilityOutput>,
    pub error: Option<String>,
    pub inputs_used: Namespace,
    pub iterations: Vec<Iteration>,
    pub elapsed_secs: f64,
    pub diff: OutputDiff,
}

impl ReplayReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Turn history as written to the trace file.
    fn trace(&self) -> Value {
        let iterations = if self.iterations.is_empty() {
            let output = match (&self.new_output, &self.error) {
                (Some(out), _) => json!(out),
                (None, Some(err)) => json!({"success": false, "error": err}),
                (None, None) => Value::Null,
            };
            json!([{"iteration": 1, "output": output}])
        } else {
            json!(self.iterations)
        };
        json!({
            "timestamp": Utc::now(),
            "node_id": self.step_id,
            "inputs": self.inputs_used,
            "iterations": iterations,
            "final_output": self.new_output,
        })
    }
}

/// Loads a saved session and lets a developer inspect and replay steps.
///
/// Without a step runner the debugger is read-only.
pub struct GraphDebugger {
    ctx: Option<ExecutionContext>,
    source: Option<PathBuf>,
    original_id: Option<String>,
    runner: Option<StepRunner>,
    formatter_agent: String,
    output_dir: PathBuf,
    last_replay: Option<ReplayReport>,
}

impl GraphDebugger {
    /// Debug sessions are saved under `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            ctx: None,
            source: None,
            original_id: None,
            runner: None,
            formatter_agent: "FormatterAgent".to_string(),
            output_dir: output_dir.into(),
            last_replay: None,
        }
    }

    /// Enable replay.
    pub fn with_runner(mut self, runner: StepRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_formatter_agent(mut self, name: impl Into<String>) -> Self {
        self.formatter_agent = name.into();
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.runner.is_none()
    }

    /// Load a session file and rename it to `<orig>_debug_<HHMMSS>`.
    pub async fn load(&mut self, path: &Path) -> Result<&ExecutionContext> {
        let mut ctx = SessionStore::load(path, true).await?;
        let original = ctx.session_id().to_string();
        let debug_id = format!("{}_debug_{}", original, Local::now().format("%H%M%S"));
        ctx.rename_session(debug_id.clone());

        info!(
            original = %original,
            session_id = %debug_id,
            read_only = self.is_read_only(),
            "Debug session loaded"
        );

        self.original_id = Some(original_id_from(path, &original));
        self.source = Some(path.to_path_buf());
        self.last_replay = None;
        Ok(self.ctx.insert(ctx))
    }

    pub fn context(&self) -> Result<&ExecutionContext> {
        self.ctx.as_ref().ok_or(PlanweaveError::NoSession)
    }

    /// All steps in plan order.
    pub fn steps(&self) -> Result<Vec<&StepNode>> {
        Ok(self.context()?.steps().collect())
    }

    pub fn node_details(&self, id: &str) -> Result<NodeDetails> {
        let ctx = self.context()?;
        let node = ctx.step(id)?;
        let available = ctx.get_inputs(&node.reads);
        let missing = node
            .reads
            .iter()
            .filter(|r| !available.contains_key(*r))
            .cloned()
            .collect();

        Ok(NodeDetails {
            id: node.id.clone(),
            agent: node.agent.clone(),
            description: node.description.clone(),
            status: node.status,
            reads: node.reads.clone(),
            writes: node.writes.clone(),
            available_inputs: available.keys().cloned().collect(),
            missing_inputs: missing,
            output: node.output.clone(),
            error: node.error.clone(),
            globals_keys: self.globals_keys()?,
        })
    }

    pub fn globals_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .context()?
            .globals()
            .keys()
            .into_iter()
            .map(String::from)
            .collect())
    }

    /// The namespace, or just `key` when given. An unknown key yields an
    /// empty map.
    pub fn globals(&self, key: Option<&str>) -> Result<Namespace> {
        let globals = self.context()?.globals();
        match key {
            None => Ok(globals.data().clone()),
            Some(key) => Ok(globals.select(&[key.to_string()]).0),
        }
    }

    /// Re-run one step against the current namespace.
    ///
    /// The step is reset first, then goes through the full runner protocol
    /// and its result is applied to the loaded context.
    pub async fn replay(&mut self, id: &str) -> Result<ReplayReport> {
        let runner = self.runner.as_ref().ok_or(PlanweaveError::ReadOnly)?;
        let ctx = self.ctx.as_mut().ok_or(PlanweaveError::NoSession)?;
        let old_output = ctx.step(id)?.output.clone();

        ctx.reset_step(id)?;
        ctx.mark_running(id)?;
        let task = StepTask::prepare(ctx, id, &self.formatter_agent)?;
        let inputs_used = task.input.inputs.clone();
        info!(
            step_id = %id,
            agent = %task.agent,
            inputs = ?inputs_used.keys().collect::<Vec<_>>(),
            "Replaying step"
        );

        let start = Instant::now();
        let result = AssertUnwindSafe(runner.run(task)).catch_unwind().await;
        let elapsed_secs = start.elapsed().as_secs_f64();

        let mut iterations = Vec::new();
        let (new_output, error) = match result {
            Ok(Ok(outcome)) => {
                if let Some(record) = outcome.iterations {
                    iterations = record.iterations.clone();
                    ctx.record_iterations(id, record)?;
                }
                match outcome.result {
                    CapabilityResult::Success(output) => {
                        ctx.mark_done(id, output.clone())?;
                        (Some(output), None)
                    }
                    CapabilityResult::Failure(error) => {
                        ctx.mark_failed(id, error.clone())?;
                        (None, Some(error))
                    }
                }
            }
            Ok(Err(e)) => {
                let error = e.to_string();
                ctx.mark_failed(id, error.clone())?;
                (None, Some(error))
            }
            Err(payload) => {
                let error = format!("step panicked: {}", panic_message(payload.as_ref()));
                ctx.mark_failed(id, error.clone())?;
                (None, Some(error))
            }
        };

        if let Some(error) = &error {
            warn!(step_id = %id, error = %error, "Replay failed");
        }

        let report = ReplayReport {
            step_id: id.to_string(),
            diff: OutputDiff::between(old_output.as_ref(), new_output.as_ref()),
            old_output,
            new_output,
            error,
            inputs_used,
            iterations,
            elapsed_secs,
        };
        self.last_replay = Some(report.clone());
        Ok(report)
    }

    /// Save the debug session. Defaults to
    /// `<output_dir>/debug_session_<orig>_<YYYYmmdd_HHMMSS>.json`.
    pub async fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let ctx = self.context()?;
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self.output_dir.join(format!(
                "debug_session_{}_{}.json",
                self.original_id.as_deref().unwrap_or("unknown"),
                Local::now().format("%Y%m%d_%H%M%S")
            )),
        };
        if self.source.as_deref() == Some(path.as_path()) {
            return Err(PlanweaveError::Session(
                "refusing to overwrite the loaded session file".to_string(),
            ));
        }

        write_document(&path, &ctx.to_document()).await?;
        info!(path = %path.display(), "Debug session saved");
        Ok(path)
    }

    /// Dump the last replay's turns and final output as JSON.
    pub async fn write_trace(&self, path: &Path) -> Result<()> {
        let report = self
            .last_replay
            .as_ref()
            .ok_or_else(|| PlanweaveError::Session("no replay has been run".to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(&report.trace())?).await?;
        Ok(())
    }

    pub fn last_replay(&self) -> Option<&ReplayReport> {
        self.last_replay.as_ref()
    }
}

/// `session_<id>.json` names the original id; otherwise use the stored one.
fn original_id_from(path: &Path, stored: &str) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("session_"))
        .map(String::from)
        .unwrap_or_else(|| stored.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::graph::{GraphAttributes, PlanSpec};
    use planweave_test_utils::{chain_plan, ScriptedBackend};

    async fn saved_session(dir: &Path) -> PathBuf {
        let mut ctx = ExecutionContext::from_plan(
            GraphAttributes::new(Some("orig0001".into()), "q"),
            PlanSpec::from_value(chain_plan()).unwrap(),
        )
        .unwrap();
        ctx.mark_running("T1").unwrap();
        ctx.mark_done(
            "T1",
            CapabilityOutput::from_value(json!({"x": 5, "note": "first"})).unwrap(),
        )
        .unwrap();
        SessionStore::new(dir).save(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_load_renames_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_session(dir.path()).await;

        let mut dbg = GraphDebugger::new(dir.path());
        let ctx = dbg.load(&path).await.unwrap();
        assert!(ctx.is_debug());
        assert!(ctx.session_id().starts_with("orig0001_debug_"));
        assert_eq!(dbg.steps().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_session() {
        let dbg = GraphDebugger::new("memory");
        assert!(matches!(dbg.steps().unwrap_err(), PlanweaveError::NoSession));
        assert!(matches!(dbg.globals(None).unwrap_err(), PlanweaveError::NoSession));
    }

    #[tokio::test]
    async fn test_node_details_and_globals() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_session(dir.path()).await;
        let mut dbg = GraphDebugger::new(dir.path());
        dbg.load(&path).await.unwrap();

        let details = dbg.node_details("T2").unwrap();
        assert_eq!(details.available_inputs, vec!["x"]);
        assert!(details.missing_inputs.is_empty());
        assert_eq!(details.status, StepStatus::Pending);
        assert_eq!(details.globals_keys, vec!["x"]);

        assert_eq!(dbg.globals(Some("x")).unwrap().get("x"), Some(&json!(5)));
        assert!(dbg.globals(Some("nope")).unwrap().is_empty());
        assert!(matches!(
            dbg.node_details("T9").unwrap_err(),
            PlanweaveError::StepNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_replay_is_read_only_without_runner() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_session(dir.path()).await;
        let mut dbg = GraphDebugger::new(dir.path());
        dbg.load(&path).await.unwrap();

        assert!(dbg.is_read_only());
        assert!(matches!(
            dbg.replay("T1").await.unwrap_err(),
            PlanweaveError::ReadOnly
        ));
        assert_eq!(
            dbg.context().unwrap().step("T1").unwrap().status,
            StepStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_replay_updates_node_and_reports_diff() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_session(dir.path()).await;
        let backend =
            Arc::new(
                ScriptedBackend::new().succeed("ProducerAgent", json!({"x": 7, "extra": true})),
            );
        let mut dbg = GraphDebugger::new(dir.path()).with_runner(StepRunner::new(backend));
        dbg.load(&path).await.unwrap();

        let report = dbg.replay("T1").await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.diff.added, vec!["extra"]);
        assert_eq!(report.diff.removed, vec!["note"]);
        assert_eq!(report.diff.changed, vec!["x"]);

        let ctx = dbg.context().unwrap();
        assert_eq!(ctx.step("T1").unwrap().status, StepStatus::Completed);
        assert_eq!(ctx.globals().get("x"), Some(&json!(7)));

        let trace = dir.path().join("temp.json");
        dbg.write_trace(&trace).await.unwrap();
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&trace).unwrap()).unwrap();
        assert_eq!(raw["node_id"], json!("T1"));
        assert_eq!(raw["final_output"]["x"], json!(7));
        assert_eq!(raw["iterations"][0]["iteration"], json!(1));
    }

    #[tokio::test]
    async fn test_replay_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_session(dir.path()).await;
        let backend = Arc::new(ScriptedBackend::new().fail("ProducerAgent", "still broken"));
        let mut dbg = GraphDebugger::new(dir.path()).with_runner(StepRunner::new(backend));
        dbg.load(&path).await.unwrap();

        let report = dbg.replay("T1").await.unwrap();
        assert_eq!(report.error.as_deref(), Some("still broken"));
        assert_eq!(
            dbg.context().unwrap().step("T1").unwrap().status,
            StepStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_replay_panic_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_session(dir.path()).await;
        let backend =
            Arc::new(ScriptedBackend::new().panic("ProducerAgent", "index out of bounds"));
        let mut dbg = GraphDebugger::new(dir.path()).with_runner(StepRunner::new(backend));
        dbg.load(&path).await.unwrap();

        let report = dbg.replay("T1").await.unwrap();
        assert!(!report.succeeded());
        assert!(report.error.as_deref().unwrap().contains("index out of bounds"));
        assert_eq!(
            dbg.context().unwrap().step("T1").unwrap().status,
            StepStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_save_never_touches_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_session(dir.path()).await;
        let before = std::fs::read_to_string(&path).unwrap();

        let out_dir = dir.path().join("debug");
        let mut dbg = GraphDebugger::new(&out_dir);
        dbg.load(&path).await.unwrap();

        let saved = dbg.save(None).await.unwrap();
        let name = saved.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("debug_session_orig0001_"));
        assert!(saved.starts_with(&out_dir));
        assert!(matches!(
            dbg.save(Some(&path)).await.unwrap_err(),
            PlanweaveError::Session(_)
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_diff_from_nothing() {
        let new = CapabilityOutput::default().with_field("a", json!(1));
        let diff = OutputDiff::between(None, Some(&new));
        assert_eq!(diff.added, vec!["a"]);
        assert!(OutputDiff::between(Some(&new), Some(&new)).is_empty());
    }
}
