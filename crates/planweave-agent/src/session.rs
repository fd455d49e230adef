use std::path::{Path, PathBuf};

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use planweave_core::error::{PlanweaveError, Result};

use crate::context::ExecutionContext;
use crate::graph::{Edge, GraphAttributes, StepNode};

/// On-disk form of a session: node-link JSON with graph attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(default = "default_directed")]
    pub directed: bool,
    #[serde(default)]
    pub multigraph: bool,
    pub graph: GraphAttributes,
    pub nodes: Vec<StepNode>,
    #[serde(default, alias = "edges")]
    pub links: Vec<Edge>,
}

fn default_directed() -> bool {
    true
}

/// Date-partitioned session files under a base directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base>/YYYY/MM/DD/session_<id>.json`, dated by the session's creation.
    pub fn path_for(&self, attrs: &GraphAttributes) -> PathBuf {
        let created = attrs.created_at;
        self.base_dir
            .join(format!("{:04}", created.year()))
            .join(format!("{:02}", created.month()))
            .join(format!("{:02}", created.day()))
            .join(format!("session_{}.json", attrs.session_id))
    }

    /// Write the context to its dated path, creating directories as needed.
    pub async fn save(&self, ctx: &ExecutionContext) -> Result<PathBuf> {
        let path = self.path_for(ctx.attrs());
        write_document(&path, &ctx.to_document()).await?;
        debug!(session_id = %ctx.session_id(), path = %path.display(), "Session saved");
        Ok(path)
    }

    /// Read a session file back into a context.
    pub async fn load(path: &Path, debug_mode: bool) -> Result<ExecutionContext> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            PlanweaveError::Session(format!("cannot read {}: {}", path.display(), e))
        })?;
        let doc: SessionDocument = serde_json::from_str(&content).map_err(|e| {
            PlanweaveError::Session(format!("cannot parse {}: {}", path.display(), e))
        })?;
        let ctx = ExecutionContext::from_document(doc, debug_mode)?;
        info!(
            session_id = %ctx.session_id(),
            steps = ctx.graph().len(),
            path = %path.display(),
            "Session loaded"
        );
        Ok(ctx)
    }

    /// Session files under the base directory, newest first.
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut pending = vec![self.base_dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if is_session_file(&path) {
                    found.push(path);
                }
            }
        }
        // Paths are date partitioned, so lexical order is chronological.
        found.sort();
        found.reverse();
        Ok(found)
    }
}

fn is_session_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("session_"))
}

/// Pretty-print a document to `path`.
pub async fn write_document(path: &Path, doc: &SessionDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(doc)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
