use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use planweave_core::config::CapabilityConfig;
use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::Capability;
use planweave_core::types::{CapabilityInput, CapabilityOutput, CapabilityResult};

use crate::manifest::CapabilityManifest;

/// A capability backed by a shell command.
///
/// The payload is written to stdin as JSON. Stdout must hold a JSON object:
/// either the output itself, or an envelope `{"success", "output", "error"}`.
pub struct CommandCapability {
    name: String,
    command: String,
    timeout_secs: u64,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl CommandCapability {
    pub fn new(name: impl Into<String>, command: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout_secs,
            working_dir: None,
            env: HashMap::new(),
        }
    }

    /// Build from a drop-in manifest found in `dir`.
    pub fn from_manifest(manifest: CapabilityManifest, dir: &Path) -> Self {
        let command = manifest
            .command
            .replace("$CAPABILITY_DIR", &dir.display().to_string());
        Self {
            name: manifest.name,
            command,
            timeout_secs: manifest.timeout_secs,
            working_dir: Some(dir.to_path_buf()),
            env: manifest.env,
        }
    }

    /// Build from a `[capabilities.<name>]` config entry.
    pub fn from_config(name: &str, config: &CapabilityConfig) -> Self {
        Self {
            name: name.to_string(),
            command: config.command.clone(),
            timeout_secs: config.timeout_secs,
            working_dir: config.working_dir.as_ref().map(PathBuf::from),
            env: config.env.clone(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Capability for CommandCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, input: &CapabilityInput) -> BoxFuture<'_, Result<CapabilityResult>> {
        let payload = serde_json::to_vec(input);

        Box::pin(async move {
            debug!(capability = %self.name, command = %self.command, "Invoking capability command");
            let output = run_command(
                &self.name,
                &self.command,
                payload?,
                self.timeout_secs,
                self.working_dir.as_deref(),
                &self.env,
            )
            .await?;

            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let msg = if stderr.trim().is_empty() { stdout } else { stderr };
                return Ok(CapabilityResult::Failure(format!(
                    "Exit code {}\n{}",
                    output.status.code().unwrap_or(-1),
                    msg.trim()
                )));
            }

            parse_response(&self.name, &stdout)
        })
    }
}

/// Interpret a command's stdout.
pub fn parse_response(capability: &str, stdout: &str) -> Result<CapabilityResult> {
    let value: Value = serde_json::from_str(stdout.trim()).map_err(|e| {
        PlanweaveError::CapabilityExecution {
            capability: capability.to_string(),
            message: format!("stdout is not JSON: {}", e),
        }
    })?;
    let Value::Object(mut obj) = value else {
        return Err(PlanweaveError::CapabilityExecution {
            capability: capability.to_string(),
            message: "stdout is not a JSON object".to_string(),
        });
    };

    match obj.remove("success") {
        Some(Value::Bool(false)) => {
            let error = obj
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("capability reported failure")
                .to_string();
            Ok(CapabilityResult::Failure(error))
        }
        Some(Value::Bool(true)) => match obj.remove("output") {
            Some(output) => Ok(CapabilityResult::Success(CapabilityOutput::from_value(output)?)),
            None => Ok(CapabilityResult::Success(CapabilityOutput::from_value(
                Value::Object(obj),
            )?)),
        },
        Some(other) => {
            // Not an envelope; put the field back.
            obj.insert("success".to_string(), other);
            Ok(CapabilityResult::Success(CapabilityOutput::from_value(
                Value::Object(obj),
            )?))
        }
        None => Ok(CapabilityResult::Success(CapabilityOutput::from_value(
            Value::Object(obj),
        )?)),
    }
}

/// Run `command` through the shell with `stdin`, bounded by a timeout.
pub(crate) async fn run_command(
    label: &str,
    command: &str,
    stdin: Vec<u8>,
    timeout_secs: u64,
    working_dir: Option<&Path>,
    env: &HashMap<String, String>,
) -> Result<Output> {
    let timeout = std::time::Duration::from_secs(timeout_secs);
    let result = tokio::time::timeout(timeout, async {
        let mut cmd = if cfg!(windows) {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = tokio::process::Command::new("bash");
            c.arg("-c").arg(command);
            c
        };
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut pipe) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            pipe.write_all(&stdin).await.ok();
            // Dropping the pipe closes stdin so the child sees EOF
        }

        child.wait_with_output().await
    })
    .await;

    match result {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(PlanweaveError::CapabilityExecution {
            capability: label.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(PlanweaveError::CapabilityTimeout {
            capability: label.to_string(),
            timeout_secs,
        }),
    }
}
