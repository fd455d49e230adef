use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::CodeExecutor;
use planweave_core::types::{CodeExecution, CodeRequest, ExecutionStatus, Namespace};

/// Code executor that answers by variant name and records every request.
///
/// Variants without a scripted answer fail.
#[derive(Default)]
pub struct FakeCodeExecutor {
    answers: HashMap<String, std::result::Result<Namespace, String>>,
    requests: Mutex<Vec<CodeRequest>>,
}

impl FakeCodeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `variant` succeed with the given result object.
    pub fn succeed(mut self, variant: &str, result: Value) -> Self {
        let map = match result {
            Value::Object(map) => map,
            other => {
                let mut map = Namespace::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        self.answers.insert(variant.to_string(), Ok(map));
        self
    }

    /// Make `variant` report an execution error.
    pub fn fail(mut self, variant: &str, error: &str) -> Self {
        self.answers
            .insert(variant.to_string(), Err(error.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<CodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CodeExecutor for FakeCodeExecutor {
    fn execute(&self, request: CodeRequest) -> BoxFuture<'_, Result<CodeExecution>> {
        let answer = self.answers.get(&request.variant).cloned();
        let variant = request.variant.clone();
        self.requests.lock().unwrap().push(request);
        Box::pin(async move {
            match answer {
                Some(Ok(result)) => Ok(CodeExecution {
                    status: ExecutionStatus::Success,
                    result,
                    error: None,
                    execution_time: Some(0.01),
                    executed_variant: None,
                }),
                Some(Err(error)) => Ok(CodeExecution::failed(error)),
                None => Err(PlanweaveError::CodeExecution(format!(
                    "no answer scripted for {}",
                    variant
                ))),
            }
        })
    }
}
