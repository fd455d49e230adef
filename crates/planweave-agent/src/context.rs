use std::collections::HashSet;

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use planweave_core::error::{PlanweaveError, Result};
use planweave_core::types::{
    CapabilityOutput, Namespace, SessionContext, StepInput, StepStatus,
};

use crate::graph::{GraphAttributes, Globals, PlanGraph, PlanSpec, StepNode, ROOT_ID};
use crate::runner::IterationRecord;
use crate::session::SessionDocument;
use crate::summary::{ExecutionSummary, StepCost};

/// Owns the plan graph for one session and exposes readiness, input
/// resolution and status transitions.
///
/// All mutation goes through `&mut self`, so state only changes between
/// scheduler batches.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    graph: PlanGraph,
    debug_mode: bool,
}

impl ExecutionContext {
    pub fn new(graph: PlanGraph) -> Self {
        Self {
            graph,
            debug_mode: false,
        }
    }

    /// Build a context straight from the planner's graph description.
    pub fn from_plan(attrs: GraphAttributes, spec: PlanSpec) -> Result<Self> {
        Ok(Self::new(PlanGraph::build(attrs, spec)?))
    }

    /// Debug contexts are never auto-saved.
    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn is_debug(&self) -> bool {
        self.debug_mode
    }

    pub fn graph(&self) -> &PlanGraph {
        &self.graph
    }

    pub fn attrs(&self) -> &GraphAttributes {
        self.graph.attrs()
    }

    pub fn session_id(&self) -> &str {
        &self.graph.attrs().session_id
    }

    /// Give the session a new id. Only the debugger does this, so a replayed
    /// session never overwrites the original.
    pub fn rename_session(&mut self, session_id: impl Into<String>) {
        self.graph.attrs_mut().session_id = session_id.into();
    }

    pub fn globals(&self) -> &Globals {
        self.graph.globals()
    }

    /// Seed the namespace with caller-supplied values.
    pub fn merge_globals(&mut self, values: &Namespace) {
        self.graph.globals_mut().merge(values);
    }

    pub fn set_file_profiles(&mut self, profiles: Value) {
        self.graph.attrs_mut().file_profiles = profiles;
    }

    pub fn step(&self, id: &str) -> Result<&StepNode> {
        self.graph
            .step(id)
            .ok_or_else(|| PlanweaveError::StepNotFound(id.to_string()))
    }

    fn step_mut(&mut self, id: &str) -> Result<&mut StepNode> {
        self.graph
            .step_mut(id)
            .ok_or_else(|| PlanweaveError::StepNotFound(id.to_string()))
    }

    /// Steps in plan order.
    pub fn steps(&self) -> impl Iterator<Item = &StepNode> {
        self.graph.steps()
    }

    /// Pending steps whose upstream steps have all completed, in plan order.
    pub fn get_ready_steps(&self) -> Vec<String> {
        self.graph
            .steps()
            .filter(|node| node.status == StepStatus::Pending)
            .filter(|node| {
                self.graph.predecessors(&node.id).iter().all(|p| {
                    self.graph
                        .step(p)
                        .is_some_and(|up| up.status == StepStatus::Completed)
                })
            })
            .map(|node| node.id.clone())
            .collect()
    }

    pub fn mark_running(&mut self, id: &str) -> Result<()> {
        let node = self.step_mut(id)?;
        check_transition(node, StepStatus::Running)?;
        node.status = StepStatus::Running;
        node.start_time = Some(Utc::now());
        debug!(step_id = %id, agent = %node.agent, "Step running");
        Ok(())
    }

    /// Record a successful output and propagate declared writes into the
    /// namespace.
    pub fn mark_done(&mut self, id: &str, output: CapabilityOutput) -> Result<()> {
        let writes = {
            let node = self.step(id)?;
            check_transition(node, StepStatus::Completed)?;
            node.writes.clone()
        };

        let missing = self.graph.globals_mut().ingest_writes(&writes, &output);
        for key in &missing {
            warn!(
                step_id = %id,
                key = %key,
                available = ?output.field_keys(),
                "Declared write missing from step output"
            );
        }

        let node = self.step_mut(id)?;
        node.status = StepStatus::Completed;
        node.cost = output.cost();
        node.input_tokens = output.input_tokens();
        node.output_tokens = output.output_tokens();
        node.output = Some(output);
        node.error = None;
        node.missing_writes = missing;
        node.finish_clock();

        info!(
            step_id = %id,
            agent = %node.agent,
            elapsed_secs = node.execution_time,
            cost = node.cost,
            "Step completed"
        );
        Ok(())
    }

    /// Record a failure. Other steps are left untouched.
    pub fn mark_failed(&mut self, id: &str, error: impl Into<String>) -> Result<()> {
        let node = self.step_mut(id)?;
        check_transition(node, StepStatus::Failed)?;
        let error = error.into();
        node.status = StepStatus::Failed;
        node.finish_clock();
        warn!(step_id = %id, agent = %node.agent, error = %error, "Step failed");
        node.error = Some(error);
        Ok(())
    }

    /// Resolve `reads` from the namespace. Missing keys are omitted.
    pub fn get_inputs(&self, reads: &[String]) -> Namespace {
        let (found, missing) = self.globals().select(reads);
        if !missing.is_empty() {
            debug!(
                missing = ?missing,
                available = ?self.globals().keys(),
                "Inputs missing from namespace"
            );
        }
        found
    }

    /// Every step is completed or failed.
    pub fn all_done(&self) -> bool {
        self.graph.steps().all(|node| node.status.is_terminal())
    }

    pub fn has_failures(&self) -> bool {
        self.graph
            .steps()
            .any(|node| node.status == StepStatus::Failed)
    }

    /// Pending steps that can never become ready because some ancestor failed.
    pub fn blocked_steps(&self) -> Vec<String> {
        let mut blocked: HashSet<&str> = HashSet::new();
        let mut frontier: Vec<&str> = self
            .graph
            .steps()
            .filter(|node| node.status == StepStatus::Failed)
            .map(|node| node.id.as_str())
            .collect();

        while let Some(id) = frontier.pop() {
            for next in self.graph.successors(id) {
                if blocked.insert(next.as_str()) {
                    frontier.push(next.as_str());
                }
            }
        }

        self.graph
            .steps()
            .filter(|node| {
                node.status == StepStatus::Pending && blocked.contains(node.id.as_str())
            })
            .map(|node| node.id.clone())
            .collect()
    }

    pub fn get_execution_summary(&self) -> ExecutionSummary {
        let mut completed = 0;
        let mut failed = 0;
        let mut total_cost = 0.0;
        let mut total_input_tokens = 0;
        let mut total_output_tokens = 0;
        let mut cost_breakdown = IndexMap::new();
        let mut reads: HashSet<&str> = HashSet::new();

        for node in self.graph.steps() {
            match node.status {
                StepStatus::Completed => completed += 1,
                StepStatus::Failed => failed += 1,
                _ => {}
            }
            if node.cost > 0.0 {
                cost_breakdown.insert(
                    format!("{} ({})", node.id, node.agent),
                    StepCost {
                        cost: node.cost,
                        input_tokens: node.input_tokens,
                        output_tokens: node.output_tokens,
                    },
                );
            }
            total_cost += node.cost;
            total_input_tokens += node.input_tokens;
            total_output_tokens += node.output_tokens;
            reads.extend(node.reads.iter().map(String::as_str));
        }

        let globals = self.globals();
        let mut final_outputs = Namespace::new();
        for key in self.graph.steps().flat_map(|node| node.writes.iter()) {
            if reads.contains(key.as_str()) || final_outputs.contains_key(key) {
                continue;
            }
            if let Some(value) = globals.get(key) {
                final_outputs.insert(key.clone(), value.clone());
            }
        }

        let attrs = self.graph.attrs();
        ExecutionSummary {
            session_id: attrs.session_id.clone(),
            original_query: attrs.original_query.clone(),
            completed_steps: completed,
            failed_steps: failed,
            total_steps: self.graph.len(),
            total_cost,
            total_input_tokens,
            total_output_tokens,
            total_tokens: total_input_tokens + total_output_tokens,
            cost_breakdown,
            final_outputs,
            globals_schema: globals.data().clone(),
        }
    }

    /// Build the first-turn payload for a step from the current namespace.
    ///
    /// The formatter capability additionally receives the whole namespace,
    /// the query and the session metadata.
    pub fn step_input(&self, id: &str, formatter_agent: &str) -> Result<StepInput> {
        let node = self.step(id)?;
        let mut input = StepInput {
            step_id: node.id.clone(),
            agent_prompt: node.effective_prompt().to_string(),
            reads: node.reads.clone(),
            writes: node.writes.clone(),
            inputs: self.get_inputs(&node.reads),
            previous_output: None,
            iteration_context: None,
            all_globals_schema: None,
            original_query: None,
            session_context: None,
        };

        if node.agent == formatter_agent {
            let attrs = self.graph.attrs();
            input.all_globals_schema = Some(attrs.globals_schema.data().clone());
            input.original_query = Some(attrs.original_query.clone());
            input.session_context = Some(SessionContext {
                session_id: attrs.session_id.clone(),
                created_at: attrs.created_at,
                file_manifest: attrs.file_manifest.clone(),
            });
        }
        Ok(input)
    }

    /// Store the turn history of a self-continued step.
    pub fn record_iterations(&mut self, id: &str, record: IterationRecord) -> Result<()> {
        let node = self.step_mut(id)?;
        node.iterations = record.iterations;
        node.final_iteration_output = Some(record.final_output);
        node.call_self_used = true;
        Ok(())
    }

    /// Return a step to pending and clear its runtime state. Used by replay.
    pub fn reset_step(&mut self, id: &str) -> Result<()> {
        let node = self.step_mut(id)?;
        node.reset();
        debug!(step_id = %id, "Step reset");
        Ok(())
    }

    /// Snapshot the whole session, ROOT anchor included.
    pub fn to_document(&self) -> SessionDocument {
        let mut root = StepNode::new(ROOT_ID, "System").with_description("Initial Query");
        root.status = StepStatus::Completed;

        let mut nodes = Vec::with_capacity(self.graph.len() + 1);
        nodes.push(root);
        nodes.extend(self.graph.steps().cloned());

        SessionDocument {
            directed: true,
            multigraph: false,
            graph: self.graph.attrs().clone(),
            nodes,
            links: self.graph.edges().cloned().collect(),
        }
    }

    /// Rebuild a context from a saved session.
    pub fn from_document(doc: SessionDocument, debug_mode: bool) -> Result<Self> {
        let spec = PlanSpec {
            nodes: doc.nodes,
            edges: doc.links,
        };
        let graph = PlanGraph::build(doc.graph, spec)
            .map_err(|e| PlanweaveError::Session(format!("corrupt session document: {}", e)))?;
        Ok(Self::new(graph).with_debug_mode(debug_mode))
    }
}

/// Transitions only move forward; terminal states are final.
fn check_transition(node: &StepNode, to: StepStatus) -> Result<()> {
    let allowed = match to {
        StepStatus::Running => node.status == StepStatus::Pending,
        StepStatus::Completed | StepStatus::Failed => !node.status.is_terminal(),
        StepStatus::Pending => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(PlanweaveError::InvalidTransition {
            step: node.id.clone(),
            from: node.status.to_string(),
            to: to.to_string(),
        })
    }
}
