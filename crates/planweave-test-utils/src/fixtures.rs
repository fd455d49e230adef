use std::io::Write;

use serde_json::{json, Value};
use tempfile::NamedTempFile;

/// T1 writes `x`; T2 reads `x` and writes `y`.
pub fn chain_plan() -> Value {
    json!({
        "nodes": [
            {"id": "T1", "agent": "ProducerAgent", "description": "Produce x", "writes": ["x"]},
            {"id": "T2", "agent": "ConsumerAgent", "description": "Use x",
             "reads": ["x"], "writes": ["y"]}
        ],
        "edges": [
            {"source": "ROOT", "target": "T1"},
            {"source": "T1", "target": "T2"}
        ]
    })
}

/// Two independent roots feeding a formatter step.
pub fn fan_in_plan() -> Value {
    json!({
        "nodes": [
            {"id": "T1", "agent": "RetrieverAgent", "description": "Find A", "writes": ["a"]},
            {"id": "T2", "agent": "RetrieverAgent", "description": "Find B", "writes": ["b"]},
            {"id": "T3", "agent": "FormatterAgent", "description": "Report",
             "reads": ["a", "b"], "writes": ["report"]}
        ],
        "edges": [
            {"source": "ROOT", "target": "T1"},
            {"source": "ROOT", "target": "T2"},
            {"source": "T1", "target": "T3"},
            {"source": "T2", "target": "T3"}
        ]
    })
}

/// Two steps waiting on each other; neither ever becomes ready.
pub fn cyclic_plan() -> Value {
    json!({
        "nodes": [
            {"id": "T1", "agent": "ThinkerAgent", "writes": ["a"], "reads": ["b"]},
            {"id": "T2", "agent": "ThinkerAgent", "writes": ["b"], "reads": ["a"]}
        ],
        "edges": [
            {"source": "T1", "target": "T2"},
            {"source": "T2", "target": "T1"}
        ]
    })
}

/// Write content to a temporary file with the given suffix.
pub fn temp_file(content: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
