use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use planweave_core::config::AppConfig;
use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::{Capability, CapabilityBackend};
use planweave_core::types::{CapabilityInput, CapabilityResult};

use crate::command::CommandCapability;
use crate::load_capabilities;

/// Capabilities reachable by name.
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// Build from config: drop-in manifests first, then `[capabilities.*]`
    /// entries, which replace a manifest of the same name.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        if let Some(dir) = config.capabilities_dir() {
            for cap in load_capabilities(&dir) {
                registry.register(cap);
            }
        }
        for (name, entry) in &config.capabilities {
            registry.register(CommandCapability::from_config(name, entry));
        }
        info!(count = registry.len(), "Capability registry ready");
        registry
    }

    /// Register a capability, replacing any with the same name.
    pub fn register(&mut self, capability: impl Capability) {
        let name = capability.name().to_string();
        self.capabilities.insert(name, Arc::new(capability));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityBackend for CapabilityRegistry {
    fn invoke(
        &self,
        capability: &str,
        input: &CapabilityInput,
    ) -> BoxFuture<'_, Result<CapabilityResult>> {
        let target = self.get(capability);
        let name = capability.to_string();
        let input = input.clone();
        Box::pin(async move {
            let cap = target.ok_or(PlanweaveError::UnknownCapability(name))?;
            cap.invoke(&input).await
        })
    }

    fn capabilities(&self) -> Vec<String> {
        self.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planweave_core::config::CapabilityConfig;
    use planweave_core::types::ProfileInput;
    use planweave_test_utils::ScriptedCapability;
    use serde_json::json;

    fn input() -> CapabilityInput {
        CapabilityInput::Profile(ProfileInput::for_files(vec![]))
    }

    #[tokio::test]
    async fn routes_by_name() {
        let mut registry = CapabilityRegistry::new();
        registry.register(ScriptedCapability::echo("RetrieverAgent", json!({"sources": 3})));

        let result = registry.invoke("RetrieverAgent", &input()).await.unwrap();
        assert_eq!(result.output().unwrap().field("sources"), Some(&json!(3)));
        assert_eq!(registry.capabilities(), vec!["RetrieverAgent".to_string()]);
    }

    #[tokio::test]
    async fn unknown_name_is_error() {
        let registry = CapabilityRegistry::new();
        let err = registry.invoke("Nobody", &input()).await.unwrap_err();
        assert!(matches!(err, PlanweaveError::UnknownCapability(ref n) if n == "Nobody"));
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = CapabilityRegistry::new();
        registry.register(ScriptedCapability::echo("A", json!({"v": 1})));
        registry.register(ScriptedCapability::echo("A", json!({"v": 2})));
        assert_eq!(registry.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn config_entry_overrides_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let cap_dir = dir.path().join("coder");
        std::fs::create_dir_all(&cap_dir).unwrap();
        std::fs::write(
            cap_dir.join("capability.toml"),
            "name = \"CoderAgent\"\ncommand = \"echo '{\\\"from\\\": \\\"manifest\\\"}'\"\n",
        )
        .unwrap();
        let other_dir = dir.path().join("retriever");
        std::fs::create_dir_all(&other_dir).unwrap();
        std::fs::write(
            other_dir.join("capability.toml"),
            "name = \"RetrieverAgent\"\ncommand = \"cat\"\n",
        )
        .unwrap();

        let mut config = AppConfig {
            capabilities_dir: Some(dir.path().display().to_string()),
            ..Default::default()
        };
        config.capabilities.insert(
            "CoderAgent".into(),
            CapabilityConfig {
                command: r#"echo '{"from": "config"}'"#.into(),
                timeout_secs: 30,
                working_dir: None,
                env: HashMap::new(),
            },
        );

        let registry = CapabilityRegistry::from_config(&config);
        assert_eq!(registry.names(), vec!["CoderAgent", "RetrieverAgent"]);
        let result = registry.invoke("CoderAgent", &input()).await.unwrap();
        assert_eq!(result.output().unwrap().field("from"), Some(&json!("config")));
    }
}
