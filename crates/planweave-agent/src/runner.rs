use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use planweave_core::error::Result;
use planweave_core::traits::{CapabilityBackend, CodeExecutor};
use planweave_core::types::{
    CapabilityInput, CapabilityOutput, CapabilityResult, CodeExecution, CodeRequest, Namespace,
    StepInput,
};

use crate::context::ExecutionContext;
use crate::graph::Iteration;

/// Instruction for the second turn when the capability gives none.
pub const DEFAULT_FOLLOW_UP: &str = "Continue the task";

/// Everything a step needs to run, captured before the batch starts.
#[derive(Debug, Clone)]
pub struct StepTask {
    pub step_id: String,
    pub agent: String,
    pub input: StepInput,
    /// Namespace snapshot handed to embedded code.
    pub globals: Namespace,
    pub session_id: String,
}

impl StepTask {
    pub fn prepare(ctx: &ExecutionContext, id: &str, formatter_agent: &str) -> Result<Self> {
        let node = ctx.step(id)?;
        Ok(Self {
            step_id: node.id.clone(),
            agent: node.agent.clone(),
            input: ctx.step_input(id, formatter_agent)?,
            globals: ctx.globals().data().clone(),
            session_id: ctx.session_id().to_string(),
        })
    }
}

/// Turn history of a step that asked for a second turn.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iterations: Vec<Iteration>,
    pub final_output: CapabilityOutput,
}

/// What the runner hands back to the scheduler.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step_id: String,
    pub result: CapabilityResult,
    pub iterations: Option<IterationRecord>,
}

enum Phase {
    Idle,
    FirstTurn,
    SecondTurn {
        first: CapabilityOutput,
        inputs: Namespace,
        first_execution: Option<CodeExecution>,
    },
    Done {
        result: CapabilityResult,
        record: Option<IterationRecord>,
    },
}

/// Runs one step against its capability, including the optional
/// self-continuation turn and embedded code execution.
///
/// The runner never touches the context; the scheduler applies the
/// returned `StepOutcome`.
#[derive(Clone)]
pub struct StepRunner {
    backend: Arc<dyn CapabilityBackend>,
    code_executor: Option<Arc<dyn CodeExecutor>>,
}

impl StepRunner {
    pub fn new(backend: Arc<dyn CapabilityBackend>) -> Self {
        Self {
            backend,
            code_executor: None,
        }
    }

    pub fn with_code_executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.code_executor = Some(executor);
        self
    }

    pub fn backend(&self) -> &Arc<dyn CapabilityBackend> {
        &self.backend
    }

    /// Run a step to completion.
    ///
    /// A raised error on the first turn is returned as `Err`. A second turn
    /// that fails or raises falls back to the first turn's output.
    pub async fn run(&self, task: StepTask) -> Result<StepOutcome> {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => {
                    debug!(step_id = %task.step_id, agent = %task.agent, "Dispatching step");
                    Phase::FirstTurn
                }
                Phase::FirstTurn => match self.invoke(&task.agent, task.input.clone()).await? {
                    CapabilityResult::Failure(error) => Phase::Done {
                        result: CapabilityResult::Failure(error),
                        record: None,
                    },
                    CapabilityResult::Success(first) if !first.call_self => Phase::Done {
                        result: CapabilityResult::Success(first),
                        record: None,
                    },
                    CapabilityResult::Success(first) => {
                        info!(step_id = %task.step_id, "Step requested a second turn");
                        let mut inputs = task.input.inputs.clone();
                        let first_execution = self.execute_code(&task, &first).await;
                        if let Some(exec) = first_execution.as_ref().filter(|e| e.is_success()) {
                            for (k, v) in &exec.result {
                                inputs.insert(k.clone(), v.clone());
                            }
                        }
                        Phase::SecondTurn {
                            first,
                            inputs,
                            first_execution,
                        }
                    }
                },
                Phase::SecondTurn {
                    first,
                    inputs,
                    first_execution,
                } => {
                    let input = follow_up_input(&task.input, &first, inputs);
                    let second = match self.invoke(&task.agent, input).await {
                        Ok(result) => result,
                        Err(e) => CapabilityResult::Failure(e.to_string()),
                    };

                    // On a failed second turn the record keeps the raw first
                    // output; only the applied result carries the execution.
                    let (applied, final_output, second_entry) = match second {
                        CapabilityResult::Success(out) => {
                            (out.clone(), out.clone(), Iteration::succeeded(2, out))
                        }
                        CapabilityResult::Failure(error) => {
                            warn!(
                                step_id = %task.step_id,
                                error = %error,
                                "Second turn failed, keeping first turn output"
                            );
                            let mut out = first.clone();
                            if let Some(exec) = &first_execution {
                                out.merge_execution(exec);
                            }
                            (out, first.clone(), Iteration::failed(2, error))
                        }
                    };

                    Phase::Done {
                        result: CapabilityResult::Success(applied),
                        record: Some(IterationRecord {
                            iterations: vec![Iteration::succeeded(1, first), second_entry],
                            final_output,
                        }),
                    }
                }
                Phase::Done { result, record } => {
                    return Ok(self.finish(task, result, record).await);
                }
            };
        }
    }

    /// Run code still pending in the final output and fold the result in.
    async fn finish(
        &self,
        task: StepTask,
        result: CapabilityResult,
        mut record: Option<IterationRecord>,
    ) -> StepOutcome {
        let result = match result {
            CapabilityResult::Success(mut output) if !output.was_executed() => {
                if let Some(exec) = self.execute_code(&task, &output).await {
                    output.merge_execution(&exec);
                    if let Some(record) = record.as_mut() {
                        record.final_output = output.clone();
                    }
                }
                CapabilityResult::Success(output)
            }
            other => other,
        };

        StepOutcome {
            step_id: task.step_id,
            result,
            iterations: record,
        }
    }

    async fn invoke(&self, agent: &str, input: StepInput) -> Result<CapabilityResult> {
        self.backend
            .invoke(agent, &CapabilityInput::Step(input))
            .await
    }

    /// Try each code variant in order; the first success wins.
    ///
    /// Returns `None` when there is no executor or nothing to run.
    async fn execute_code(
        &self,
        task: &StepTask,
        output: &CapabilityOutput,
    ) -> Option<CodeExecution> {
        let executor = self.code_executor.as_ref()?;
        let variants = output.executable_code();
        if variants.is_empty() {
            return None;
        }

        let mut globals = task.globals.clone();
        for (k, v) in &output.fields {
            globals.insert(k.clone(), v.clone());
        }

        for (variant, code) in variants {
            let request = CodeRequest {
                code,
                variant: variant.clone(),
                globals: globals.clone(),
                reads_data: task.input.inputs.clone(),
                session_id: task.session_id.clone(),
            };
            match executor.execute(request).await {
                Ok(exec) if exec.is_success() => {
                    info!(step_id = %task.step_id, variant = %variant, "Code variant succeeded");
                    return Some(CodeExecution {
                        executed_variant: Some(variant),
                        ..exec
                    });
                }
                Ok(exec) => {
                    debug!(
                        step_id = %task.step_id,
                        variant = %variant,
                        error = ?exec.error,
                        "Code variant failed"
                    );
                }
                Err(e) => {
                    warn!(
                        step_id = %task.step_id,
                        variant = %variant,
                        error = %e,
                        "Code executor error"
                    );
                }
            }
        }

        Some(CodeExecution::failed("All code variants failed"))
    }
}

/// Second-turn payload: same step, new instruction, first output attached.
fn follow_up_input(base: &StepInput, first: &CapabilityOutput, inputs: Namespace) -> StepInput {
    let mut input = base.clone();
    input.agent_prompt = first
        .next_instruction
        .clone()
        .unwrap_or_else(|| DEFAULT_FOLLOW_UP.to_string());
    input.inputs = inputs;
    input.previous_output = Some(first.clone());
    input.iteration_context = Some(
        first
            .iteration_context
            .clone()
            .unwrap_or_else(|| json!({})),
    );
    input
}

/// Error text carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "step panicked".to_string()
    }
}
