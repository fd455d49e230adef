use serde::{Deserialize, Serialize};

/// Id of the sentinel anchor node. It has no agent, is never stored in the
/// step arena and always counts as completed.
pub const ROOT_ID: &str = "ROOT";

/// A dependency edge: `target` consumes data produced by `source`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Upstream node id (may be `ROOT`).
    pub source: String,
    /// Downstream node id.
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Edge hanging off the root anchor.
    pub fn from_root(target: impl Into<String>) -> Self {
        Self::new(ROOT_ID, target)
    }

    pub fn is_from_root(&self) -> bool {
        self.source == ROOT_ID
    }
}
