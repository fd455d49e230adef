use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use planweave_core::config::ExecutorConfig;
use planweave_core::error::Result;
use planweave_core::event::EventBus;
use planweave_core::types::{CapabilityResult, ExecutionEvent};

use crate::context::ExecutionContext;
use crate::runner::{panic_message, StepOutcome, StepRunner, StepTask};
use crate::session::SessionStore;

/// Why the scheduler loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step completed without failure.
    Completed,
    /// At least one step failed and nothing else could run.
    HaltedWithFailures,
    /// The iteration budget ran out first.
    BudgetExhausted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::HaltedWithFailures => f.write_str("halted_with_failures"),
            RunOutcome::BudgetExhausted => f.write_str("budget_exhausted"),
        }
    }
}

/// Result of driving a context through the scheduler loop.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: RunOutcome,
    /// Scheduler iterations consumed, idle ones included.
    pub iterations: usize,
    pub total_elapsed_ms: u64,
}

/// Drives an execution context to completion in concurrent batches.
///
/// Each iteration runs every ready step at once and waits for the whole
/// batch before looking for the next one. Results are applied in batch
/// order once all steps have returned.
pub struct DagExecutor {
    runner: StepRunner,
    config: ExecutorConfig,
    formatter_agent: String,
    event_bus: Option<Arc<EventBus>>,
    store: Option<SessionStore>,
}

impl DagExecutor {
    pub fn new(runner: StepRunner, config: ExecutorConfig) -> Self {
        Self {
            runner,
            config,
            formatter_agent: "FormatterAgent".to_string(),
            event_bus: None,
            store: None,
        }
    }

    /// Capability that gets the whole namespace in its payload.
    pub fn with_formatter_agent(mut self, name: impl Into<String>) -> Self {
        self.formatter_agent = name.into();
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Save the session after every round of state changes.
    pub fn with_session_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn runner(&self) -> &StepRunner {
        &self.runner
    }

    pub fn formatter_agent(&self) -> &str {
        &self.formatter_agent
    }

    /// Run the loop until every step is terminal, a failure leaves nothing
    /// runnable, or the iteration budget is spent.
    ///
    /// Step failures are recorded in the context; only bookkeeping errors
    /// are returned.
    pub async fn execute(&self, ctx: &mut ExecutionContext) -> Result<ExecutionReport> {
        let start = Instant::now();
        let mut iteration = 0;

        info!(
            session_id = %ctx.session_id(),
            steps = ctx.graph().len(),
            max_iterations = self.config.max_iterations,
            "Starting plan execution"
        );
        self.publish(ExecutionEvent::RunStarted {
            session_id: ctx.session_id().to_string(),
            total_steps: ctx.graph().len(),
        });

        let mut halted = false;
        while !ctx.all_done() && iteration < self.config.max_iterations {
            iteration += 1;

            let ready = ctx.get_ready_steps();
            if ready.is_empty() {
                if ctx.has_failures() {
                    warn!(
                        iteration,
                        blocked = ?ctx.blocked_steps(),
                        "No runnable steps left after failures, stopping"
                    );
                    halted = true;
                    break;
                }
                debug!(iteration, "No steps ready, waiting");
                self.publish(ExecutionEvent::Idle { iteration });
                tokio::time::sleep(Duration::from_millis(self.config.idle_backoff_ms)).await;
                continue;
            }

            self.run_batch(ctx, iteration, ready).await?;
            self.auto_save(ctx).await;
        }

        let outcome = if ctx.all_done() && !ctx.has_failures() {
            RunOutcome::Completed
        } else if halted || ctx.all_done() {
            RunOutcome::HaltedWithFailures
        } else {
            RunOutcome::BudgetExhausted
        };

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            RunOutcome::Completed => info!(iteration, total_elapsed_ms, "Plan execution finished"),
            _ => warn!(
                outcome = %outcome,
                iteration,
                total_elapsed_ms,
                "Plan execution stopped early"
            ),
        }
        self.publish(ExecutionEvent::RunFinished {
            outcome: outcome.to_string(),
            iterations: iteration,
        });
        self.auto_save(ctx).await;

        Ok(ExecutionReport {
            outcome,
            iterations: iteration,
            total_elapsed_ms,
        })
    }

    async fn run_batch(
        &self,
        ctx: &mut ExecutionContext,
        iteration: usize,
        ready: Vec<String>,
    ) -> Result<()> {
        info!(iteration, steps = ?ready, "Running batch");
        self.publish(ExecutionEvent::BatchStarted {
            iteration,
            steps: ready.clone(),
        });

        let mut tasks = Vec::with_capacity(ready.len());
        for id in &ready {
            ctx.mark_running(id)?;
            let task = StepTask::prepare(ctx, id, &self.formatter_agent)?;
            self.publish(ExecutionEvent::StepStarted {
                step_id: id.clone(),
                agent: task.agent.clone(),
            });
            tasks.push(task);
        }

        let futures = tasks
            .into_iter()
            .map(|task| AssertUnwindSafe(self.runner.run(task)).catch_unwind());
        let results = join_all(futures).await;

        for (id, result) in ready.iter().zip(results) {
            match result {
                Ok(Ok(outcome)) => self.apply(ctx, outcome)?,
                Ok(Err(e)) => {
                    error!(step_id = %id, error = %e, "Step raised an error");
                    self.fail(ctx, id, e.to_string())?;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(step_id = %id, error = %message, "Step panicked");
                    self.fail(ctx, id, format!("step panicked: {}", message))?;
                }
            }
        }
        Ok(())
    }

    fn apply(&self, ctx: &mut ExecutionContext, outcome: StepOutcome) -> Result<()> {
        let StepOutcome {
            step_id,
            result,
            iterations,
        } = outcome;

        let call_self_used = iterations.is_some();
        if let Some(record) = iterations {
            ctx.record_iterations(&step_id, record)?;
        }
        match result {
            CapabilityResult::Success(output) => {
                ctx.mark_done(&step_id, output)?;
                self.publish(ExecutionEvent::StepCompleted {
                    step_id,
                    call_self_used,
                });
            }
            CapabilityResult::Failure(error) => self.fail(ctx, &step_id, error)?,
        }
        Ok(())
    }

    fn fail(&self, ctx: &mut ExecutionContext, id: &str, error: String) -> Result<()> {
        ctx.mark_failed(id, error.clone())?;
        self.publish(ExecutionEvent::StepFailed {
            step_id: id.to_string(),
            error,
        });
        Ok(())
    }

    async fn auto_save(&self, ctx: &ExecutionContext) {
        if ctx.is_debug() {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.save(ctx).await {
                warn!(session_id = %ctx.session_id(), error = %e, "Auto-save failed");
            }
        }
    }

    fn publish(&self, event: ExecutionEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}
