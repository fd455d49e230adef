use std::collections::HashMap;

use serde::Deserialize;

/// Environment prerequisites for a capability.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Prerequisites {
    /// Required binaries that must be on PATH (e.g., ["python3"]).
    #[serde(default)]
    pub required_binaries: Vec<String>,
    /// Required environment variables (e.g., ["OPENAI_API_KEY"]).
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Required OS: "linux", "macos", or "windows".
    #[serde(default)]
    pub required_os: Option<String>,
}

/// TOML manifest for a drop-in capability.
///
/// Lives at `<capabilities_dir>/<name>/capability.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityManifest {
    /// Name plan steps refer to (e.g., "RetrieverAgent").
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Shell command to execute. `$CAPABILITY_DIR` is substituted
    /// with the manifest's directory at runtime.
    pub command: String,

    /// Timeout for one invocation in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Extra environment for the command.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Environment prerequisites (optional).
    #[serde(default)]
    pub prerequisites: Prerequisites,
}

fn default_timeout() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_manifest() {
        let toml_str = r#"
name = "RetrieverAgent"
description = "Finds sources for a topic"
command = "python3 $CAPABILITY_DIR/retriever.py"
timeout_secs = 45

[env]
SEARCH_REGION = "eu"

[prerequisites]
required_binaries = ["python3"]
required_env = ["SEARCH_API_KEY"]
"#;
        let manifest: CapabilityManifest = toml::from_str(toml_str).unwrap();
        assert_eq!(manifest.name, "RetrieverAgent");
        assert_eq!(manifest.timeout_secs, 45);
        assert_eq!(manifest.env["SEARCH_REGION"], "eu");
        assert_eq!(manifest.prerequisites.required_binaries, vec!["python3"]);
        assert_eq!(manifest.prerequisites.required_env, vec!["SEARCH_API_KEY"]);
    }

    #[test]
    fn parse_minimal_manifest() {
        let toml_str = r#"
name = "EchoAgent"
command = "cat"
"#;
        let manifest: CapabilityManifest = toml::from_str(toml_str).unwrap();
        assert_eq!(manifest.timeout_secs, 120);
        assert!(manifest.description.is_empty());
        assert!(manifest.env.is_empty());
        assert!(manifest.prerequisites.required_os.is_none());
    }
}
