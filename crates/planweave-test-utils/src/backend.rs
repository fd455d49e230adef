use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::{Capability, CapabilityBackend};
use planweave_core::types::{CapabilityInput, CapabilityOutput, CapabilityResult, StepInput};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return this JSON object as a successful output.
    Succeed(Value),
    /// Return a structured failure.
    Fail(String),
    /// Raise an error instead of returning.
    Raise(String),
    /// Panic while the invocation is being polled.
    Panic(String),
}

impl Script {
    fn resolve(self, capability: &str) -> Result<CapabilityResult> {
        match self {
            Script::Succeed(value) => Ok(CapabilityResult::Success(CapabilityOutput::from_value(
                value,
            )?)),
            Script::Fail(error) => Ok(CapabilityResult::Failure(error)),
            Script::Raise(message) => Err(PlanweaveError::CapabilityExecution {
                capability: capability.to_string(),
                message,
            }),
            Script::Panic(message) => panic!("{}", message),
        }
    }
}

/// A backend that answers from per-capability queues and records every call.
///
/// Queued answers are consumed in order; once a queue is drained the
/// capability's standing answer (if any) is used.
#[derive(Default)]
pub struct ScriptedBackend {
    queues: Mutex<HashMap<String, VecDeque<Script>>>,
    standing: HashMap<String, Script>,
    calls: Mutex<Vec<(String, CapabilityInput)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a single answer for `capability`.
    pub fn script(self, capability: &str, script: Script) -> Self {
        self.queues
            .lock()
            .unwrap()
            .entry(capability.to_string())
            .or_default()
            .push_back(script);
        self
    }

    /// Answer every call to `capability` the same way once its queue is empty.
    pub fn always(mut self, capability: &str, script: Script) -> Self {
        self.standing.insert(capability.to_string(), script);
        self
    }

    pub fn succeed(self, capability: &str, output: Value) -> Self {
        self.script(capability, Script::Succeed(output))
    }

    pub fn fail(self, capability: &str, error: &str) -> Self {
        self.script(capability, Script::Fail(error.to_string()))
    }

    pub fn raise(self, capability: &str, message: &str) -> Self {
        self.script(capability, Script::Raise(message.to_string()))
    }

    pub fn panic(self, capability: &str, message: &str) -> Self {
        self.script(capability, Script::Panic(message.to_string()))
    }

    /// Every invocation so far, in call order.
    pub fn calls(&self) -> Vec<(String, CapabilityInput)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, capability: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == capability)
            .count()
    }

    /// Step payloads sent to `capability`, in call order.
    pub fn step_inputs(&self, capability: &str) -> Vec<StepInput> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == capability)
            .filter_map(|(_, input)| match input {
                CapabilityInput::Step(step) => Some(step.clone()),
                _ => None,
            })
            .collect()
    }

    fn next_script(&self, capability: &str) -> Option<Script> {
        let queued = self
            .queues
            .lock()
            .unwrap()
            .get_mut(capability)
            .and_then(|q| q.pop_front());
        queued.or_else(|| self.standing.get(capability).cloned())
    }
}

impl CapabilityBackend for ScriptedBackend {
    fn invoke(
        &self,
        capability: &str,
        input: &CapabilityInput,
    ) -> BoxFuture<'_, Result<CapabilityResult>> {
        let capability = capability.to_string();
        self.calls
            .lock()
            .unwrap()
            .push((capability.clone(), input.clone()));
        let script = self.next_script(&capability);
        Box::pin(async move {
            match script {
                Some(script) => script.resolve(&capability),
                None => Err(PlanweaveError::UnknownCapability(capability)),
            }
        })
    }

    fn capabilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.lock().unwrap().keys().cloned().collect();
        for name in self.standing.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }
}

/// A single named capability answering from a queue.
pub struct ScriptedCapability {
    name: String,
    queue: Mutex<VecDeque<Script>>,
}

impl ScriptedCapability {
    pub fn new(name: &str, scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            name: name.to_string(),
            queue: Mutex::new(scripts.into_iter().collect()),
        }
    }

    /// Always succeed with the given output.
    pub fn echo(name: &str, output: Value) -> Self {
        Self::new(name, std::iter::repeat(Script::Succeed(output)).take(64))
    }
}

impl Capability for ScriptedCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, _input: &CapabilityInput) -> BoxFuture<'_, Result<CapabilityResult>> {
        let script = self.queue.lock().unwrap().pop_front();
        Box::pin(async move {
            match script {
                Some(script) => script.resolve(&self.name),
                None => Err(PlanweaveError::CapabilityExecution {
                    capability: self.name.clone(),
                    message: "script exhausted".to_string(),
                }),
            }
        })
    }
}
