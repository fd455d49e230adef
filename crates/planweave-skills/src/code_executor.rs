use std::collections::HashMap;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use planweave_core::config::CodeExecutorConfig;
use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::CodeExecutor;
use planweave_core::types::{CodeExecution, CodeRequest};

use crate::command::run_command;

/// Runs embedded code through an external sandbox command.
///
/// The command receives the `CodeRequest` as JSON on stdin and must print a
/// `CodeExecution` object (`{"status": "success", "result": {...}}`).
pub struct CommandCodeExecutor {
    command: String,
    timeout_secs: u64,
}

impl CommandCodeExecutor {
    pub fn new(command: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            command: command.into(),
            timeout_secs,
        }
    }

    pub fn from_config(config: &CodeExecutorConfig) -> Self {
        Self::new(config.command.clone(), config.timeout_secs)
    }
}

impl CodeExecutor for CommandCodeExecutor {
    fn execute(&self, request: CodeRequest) -> BoxFuture<'_, Result<CodeExecution>> {
        Box::pin(async move {
            let variant = request.variant.clone();
            let payload = serde_json::to_vec(&request)?;
            debug!(variant = %variant, session_id = %request.session_id, "Executing code variant");

            let output = run_command(
                "code_executor",
                &self.command,
                payload,
                self.timeout_secs,
                None,
                &HashMap::new(),
            )
            .await
            .map_err(|e| PlanweaveError::CodeExecution(e.to_string()))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!(
                    variant = %variant,
                    code = ?output.status.code(),
                    "Code executor exited non-zero"
                );
                let mut failed = CodeExecution::failed(stderr);
                failed.executed_variant = Some(variant);
                return Ok(failed);
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let mut execution: CodeExecution = serde_json::from_str(stdout.trim())
                .map_err(|e| PlanweaveError::CodeExecution(format!("bad executor output: {}", e)))?;
            if execution.executed_variant.is_none() {
                execution.executed_variant = Some(variant);
            }
            Ok(execution)
        })
    }
}
