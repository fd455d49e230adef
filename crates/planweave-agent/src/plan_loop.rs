use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use planweave_core::config::PlannerConfig;
use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::CapabilityBackend;
use planweave_core::types::{
    CapabilityInput, CapabilityResult, FileEntry, Namespace, PlanInput, ProfileInput,
};

use crate::context::ExecutionContext;
use crate::executor::{DagExecutor, ExecutionReport};
use crate::graph::{GraphAttributes, PlanSpec};

/// A user query plus whatever came with it.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub query: String,
    pub file_manifest: Vec<FileEntry>,
    /// Values seeded into the namespace before the first step runs.
    pub globals: Namespace,
    /// Paths handed to the file profiler.
    pub uploaded_files: Vec<String>,
    /// Reuse a session id instead of generating one.
    pub session_id: Option<String>,
}

impl PlanRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Query → profile files → plan → execute.
pub struct PlanLoop {
    backend: Arc<dyn CapabilityBackend>,
    executor: DagExecutor,
    planner: PlannerConfig,
}

impl PlanLoop {
    pub fn new(
        backend: Arc<dyn CapabilityBackend>,
        executor: DagExecutor,
        planner: PlannerConfig,
    ) -> Self {
        Self {
            backend,
            executor,
            planner,
        }
    }

    pub async fn run(&self, request: PlanRequest) -> Result<(ExecutionContext, ExecutionReport)> {
        let file_profiles = self.profile_files(&request).await;

        let plan_input = PlanInput {
            original_query: request.query.clone(),
            planning_strategy: self.planner.strategy.clone(),
            globals_schema: request.globals.clone(),
            file_manifest: request.file_manifest.clone(),
            file_profiles: file_profiles.clone(),
        };
        info!(
            planner = %self.planner.agent,
            strategy = %self.planner.strategy,
            files = request.file_manifest.len(),
            "Requesting plan"
        );

        let output = match self
            .backend
            .invoke(&self.planner.agent, &CapabilityInput::Plan(plan_input))
            .await
        {
            Ok(CapabilityResult::Success(output)) => output,
            Ok(CapabilityResult::Failure(error)) => {
                return Err(PlanweaveError::PlanningFailed(error));
            }
            Err(e) => return Err(PlanweaveError::PlanningFailed(e.to_string())),
        };

        let plan_graph = output.field("plan_graph").cloned().ok_or_else(|| {
            PlanweaveError::PlanningFailed(format!(
                "planner output has no plan_graph (keys: {:?})",
                output.field_keys()
            ))
        })?;
        let spec = PlanSpec::from_value(plan_graph)?;

        let attrs = GraphAttributes::new(request.session_id.clone(), request.query.clone())
            .with_file_manifest(request.file_manifest.clone());
        let mut ctx = ExecutionContext::from_plan(attrs, spec)?;
        ctx.set_file_profiles(file_profiles);
        ctx.merge_globals(&request.globals);

        info!(
            session_id = %ctx.session_id(),
            steps = ctx.graph().len(),
            "Plan accepted"
        );

        let report = self.executor.execute(&mut ctx).await?;
        Ok((ctx, report))
    }

    /// Profile uploaded files. Failures leave the profiles empty.
    async fn profile_files(&self, request: &PlanRequest) -> Value {
        if request.uploaded_files.is_empty() {
            return Value::Object(Namespace::new());
        }

        let input =
            CapabilityInput::Profile(ProfileInput::for_files(request.uploaded_files.clone()));
        match self.backend.invoke(&self.planner.profiler_agent, &input).await {
            Ok(CapabilityResult::Success(output)) => {
                info!(files = request.uploaded_files.len(), "Files profiled");
                output
                    .field("file_profiles")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(output.fields.clone()))
            }
            Ok(CapabilityResult::Failure(error)) => {
                warn!(error = %error, "File profiling failed, continuing without profiles");
                Value::Object(Namespace::new())
            }
            Err(e) => {
                warn!(error = %e, "File profiling failed, continuing without profiles");
                Value::Object(Namespace::new())
            }
        }
    }
}
