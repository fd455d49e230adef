use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanweaveError {
    // Planning errors
    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    #[error("Plan graph construction failed: {0}")]
    GraphConstruction(String),

    // Graph state errors
    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Invalid status transition for {step}: {from} -> {to}")]
    InvalidTransition {
        step: String,
        from: String,
        to: String,
    },

    // Capability errors
    #[error("Capability not found: {0}")]
    UnknownCapability(String),

    #[error("Capability execution failed: {capability}: {message}")]
    CapabilityExecution { capability: String, message: String },

    #[error("Capability timeout after {timeout_secs}s: {capability}")]
    CapabilityTimeout {
        capability: String,
        timeout_secs: u64,
    },

    #[error("Code execution failed: {0}")]
    CodeExecution(String),

    // Debugger errors
    #[error("Replay unavailable: no capability backend attached")]
    ReadOnly,

    #[error("No session loaded")]
    NoSession,

    // Session errors
    #[error("Session error: {0}")]
    Session(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlanweaveError>;
