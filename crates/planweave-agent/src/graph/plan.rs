use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use planweave_core::error::{PlanweaveError, Result};
use planweave_core::types::{FileEntry, Namespace, SessionId};

use super::edge::{Edge, ROOT_ID};
use super::globals::Globals;
use super::node::StepNode;

/// Session-level attributes stored alongside the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphAttributes {
    #[serde(default = "generate_session_id")]
    pub session_id: String,
    /// Set once at creation.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub original_query: String,
    #[serde(default)]
    pub file_manifest: Vec<FileEntry>,
    #[serde(default)]
    pub globals_schema: Globals,
    #[serde(default)]
    pub file_profiles: Value,
    #[serde(flatten)]
    pub extra: Namespace,
}

fn generate_session_id() -> String {
    SessionId::new().0
}

impl Default for GraphAttributes {
    fn default() -> Self {
        Self {
            session_id: generate_session_id(),
            created_at: Utc::now(),
            original_query: String::new(),
            file_manifest: vec![],
            globals_schema: Globals::new(),
            file_profiles: Value::Null,
            extra: Namespace::new(),
        }
    }
}

impl GraphAttributes {
    /// Fresh attributes for a new query. A missing session id is generated.
    pub fn new(session_id: Option<String>, original_query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.unwrap_or_else(generate_session_id),
            original_query: original_query.into(),
            ..Default::default()
        }
    }

    pub fn with_file_manifest(mut self, manifest: Vec<FileEntry>) -> Self {
        self.file_manifest = manifest;
        self
    }
}

/// The planner's graph description, as found under `plan_graph` in its output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    #[serde(default)]
    pub nodes: Vec<StepNode>,
    #[serde(default, alias = "links")]
    pub edges: Vec<Edge>,
}

impl PlanSpec {
    /// Parse a `plan_graph` value.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| PlanweaveError::GraphConstruction(format!("invalid plan_graph: {}", e)))
    }
}

/// Arena of steps plus an adjacency index.
///
/// Steps keep plan insertion order, which is also the order readiness is
/// reported in. `ROOT` is never stored.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    attrs: GraphAttributes,
    steps: IndexMap<String, StepNode>,
    edges: IndexSet<Edge>,
    upstream: HashMap<String, Vec<String>>,
    downstream: HashMap<String, Vec<String>>,
}

impl PlanGraph {
    /// Build a graph from the planner's spec. Runtime fields on the incoming
    /// nodes are taken as given, so a saved graph can be rebuilt the same way.
    pub fn build(attrs: GraphAttributes, spec: PlanSpec) -> Result<Self> {
        let mut steps = IndexMap::with_capacity(spec.nodes.len());
        for node in spec.nodes {
            if node.id == ROOT_ID {
                continue;
            }
            if node.id.trim().is_empty() {
                return Err(PlanweaveError::GraphConstruction(
                    "step with empty id".to_string(),
                ));
            }
            if steps.contains_key(&node.id) {
                return Err(PlanweaveError::GraphConstruction(format!(
                    "duplicate step id '{}'",
                    node.id
                )));
            }
            steps.insert(node.id.clone(), node);
        }

        let mut edges = IndexSet::with_capacity(spec.edges.len());
        let mut upstream: HashMap<String, Vec<String>> = HashMap::new();
        let mut downstream: HashMap<String, Vec<String>> = HashMap::new();
        for edge in spec.edges {
            if !edge.is_from_root() && !steps.contains_key(&edge.source) {
                return Err(PlanweaveError::GraphConstruction(format!(
                    "edge {} -> {} references unknown node '{}'",
                    edge.source, edge.target, edge.source
                )));
            }
            if !steps.contains_key(&edge.target) {
                return Err(PlanweaveError::GraphConstruction(format!(
                    "edge {} -> {} references unknown node '{}'",
                    edge.source, edge.target, edge.target
                )));
            }
            if edges.contains(&edge) {
                continue;
            }
            if !edge.is_from_root() {
                upstream
                    .entry(edge.target.clone())
                    .or_default()
                    .push(edge.source.clone());
                downstream
                    .entry(edge.source.clone())
                    .or_default()
                    .push(edge.target.clone());
            }
            edges.insert(edge);
        }

        debug!(
            session_id = %attrs.session_id,
            steps = steps.len(),
            edges = edges.len(),
            "Plan graph built"
        );

        Ok(Self {
            attrs,
            steps,
            edges,
            upstream,
            downstream,
        })
    }

    pub fn attrs(&self) -> &GraphAttributes {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut GraphAttributes {
        &mut self.attrs
    }

    pub fn globals(&self) -> &Globals {
        &self.attrs.globals_schema
    }

    pub fn globals_mut(&mut self) -> &mut Globals {
        &mut self.attrs.globals_schema
    }

    pub fn step(&self, id: &str) -> Option<&StepNode> {
        self.steps.get(id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut StepNode> {
        self.steps.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    /// Steps in plan order.
    pub fn steps(&self) -> impl Iterator<Item = &StepNode> {
        self.steps.values()
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.steps.keys().cloned().collect()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Direct non-ROOT predecessors of a step.
    pub fn predecessors(&self, id: &str) -> &[String] {
        self.upstream.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct successors of a step.
    pub fn successors(&self, id: &str) -> &[String] {
        self.downstream.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of steps, ROOT excluded.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: Value) -> PlanSpec {
        PlanSpec::from_value(value).unwrap()
    }

    #[test]
    fn test_build_indexes_edges() {
        let graph = PlanGraph::build(
            GraphAttributes::new(None, "q"),
            spec(json!({
                "nodes": [
                    {"id": "T1", "agent": "A", "writes": ["a"]},
                    {"id": "T2", "agent": "B", "reads": ["a"]}
                ],
                "edges": [
                    {"source": "ROOT", "target": "T1"},
                    {"source": "T1", "target": "T2"},
                    {"source": "T1", "target": "T2"}
                ]
            })),
        )
        .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.edges().count(), 2);
        assert!(graph.predecessors("T1").is_empty());
        assert_eq!(graph.predecessors("T2"), ["T1".to_string()]);
        assert_eq!(graph.successors("T1"), ["T2".to_string()]);
        assert!(!graph.contains(ROOT_ID));
    }

    #[test]
    fn test_unknown_edge_endpoint_is_fatal() {
        let err = PlanGraph::build(
            GraphAttributes::default(),
            spec(json!({
                "nodes": [{"id": "T1", "agent": "A"}],
                "edges": [{"source": "T1", "target": "T9"}]
            })),
        )
        .unwrap_err();
        assert!(matches!(err, PlanweaveError::GraphConstruction(_)));
        assert!(err.to_string().contains("T9"));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let err = PlanGraph::build(
            GraphAttributes::default(),
            spec(json!({
                "nodes": [{"id": "T1", "agent": "A"}, {"id": "T1", "agent": "B"}]
            })),
        )
        .unwrap_err();
        assert!(matches!(err, PlanweaveError::GraphConstruction(_)));
    }

    #[test]
    fn test_root_node_in_spec_is_skipped() {
        let graph = PlanGraph::build(
            GraphAttributes::default(),
            spec(json!({
                "nodes": [
                    {"id": "ROOT", "agent": "System", "status": "completed"},
                    {"id": "T1", "agent": "A"}
                ],
                "links": [{"source": "ROOT", "target": "T1"}]
            })),
        )
        .unwrap();
        assert_eq!(graph.step_ids(), vec!["T1"]);
        assert_eq!(graph.edges().count(), 1);
    }

    #[test]
    fn test_malformed_plan_graph() {
        let err = PlanSpec::from_value(json!({"nodes": [{"agent": "A"}]})).unwrap_err();
        assert!(matches!(err, PlanweaveError::GraphConstruction(_)));
    }

    #[test]
    fn test_attributes_generate_session_id() {
        let attrs = GraphAttributes::new(None, "Compare X and Y");
        assert_eq!(attrs.session_id.len(), 8);
        assert_eq!(attrs.original_query, "Compare X and Y");

        let named = GraphAttributes::new(Some("abc".into()), "q");
        assert_eq!(named.session_id, "abc");
    }
}
