pub mod code_executor;
pub mod command;
pub mod manifest;
pub mod registry;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub use code_executor::CommandCodeExecutor;
pub use command::CommandCapability;
pub use manifest::{CapabilityManifest, Prerequisites};
pub use registry::CapabilityRegistry;

/// Manifest file name looked up in each capability directory.
pub const MANIFEST_FILE: &str = "capability.toml";

/// Load drop-in capabilities from a directory.
///
/// Scans `dir` for subdirectories containing `capability.toml`. Entries with
/// unreadable manifests or unmet prerequisites are skipped with a warning.
pub fn load_capabilities(dir: &Path) -> Vec<CommandCapability> {
    let mut loaded = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "Cannot read capabilities directory");
            return loaded;
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    for cap_dir in dirs {
        let manifest_path = cap_dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            debug!(path = %cap_dir.display(), "No capability.toml, skipping");
            continue;
        }

        let content = match std::fs::read_to_string(&manifest_path) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    path = %manifest_path.display(),
                    error = %e,
                    "Failed to read capability manifest"
                );
                continue;
            }
        };

        let manifest: CapabilityManifest = match toml::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    path = %manifest_path.display(),
                    error = %e,
                    "Failed to parse capability manifest"
                );
                continue;
            }
        };

        if let Err(reason) = check_prerequisites(&manifest.prerequisites) {
            warn!(
                capability = %manifest.name,
                reason = %reason,
                "Skipping capability: prerequisites not met"
            );
            continue;
        }

        debug!(capability = %manifest.name, "Loaded capability manifest");
        loaded.push(CommandCapability::from_manifest(manifest, &cap_dir));
    }

    loaded
}

/// Check that a capability's prerequisites are met.
pub fn check_prerequisites(prereqs: &Prerequisites) -> std::result::Result<(), String> {
    for bin in &prereqs.required_binaries {
        if which(bin).is_none() {
            return Err(format!("required binary '{}' not found on PATH", bin));
        }
    }

    for var in &prereqs.required_env {
        if std::env::var(var).is_err() {
            return Err(format!("required env var '{}' is not set", var));
        }
    }

    if let Some(ref required_os) = prereqs.required_os {
        let current_os = std::env::consts::OS;
        let matches = match required_os.as_str() {
            "linux" => current_os == "linux",
            "macos" | "darwin" => current_os == "macos",
            "windows" => current_os == "windows",
            other => {
                return Err(format!("unknown required_os value: '{}'", other));
            }
        };
        if !matches {
            return Err(format!(
                "requires OS '{}', but running on '{}'",
                required_os, current_os
            ));
        }
    }

    Ok(())
}

/// Search PATH for a binary.
fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use planweave_core::traits::Capability;
    use std::fs;

    fn write_manifest(root: &Path, sub: &str, body: &str) {
        let dir = root.join(sub);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), body).unwrap();
    }

    #[test]
    fn load_from_temp_dir() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "echo",
            r#"
name = "EchoAgent"
description = "Echo back input"
command = "cat"
"#,
        );

        let caps = load_capabilities(tmp.path());
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].name(), "EchoAgent");
    }

    #[test]
    fn capability_dir_is_substituted() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "coder",
            r#"
name = "CoderAgent"
command = "python3 $CAPABILITY_DIR/coder.py"
"#,
        );

        let caps = load_capabilities(tmp.path());
        let expected = format!("python3 {}/coder.py", tmp.path().join("coder").display());
        assert_eq!(caps[0].command(), expected);
    }

    #[test]
    fn skip_invalid_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), "bad", "not valid toml {{{");
        assert!(load_capabilities(tmp.path()).is_empty());
    }

    #[test]
    fn skip_dir_without_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("empty")).unwrap();
        fs::write(tmp.path().join("stray.toml"), "name = \"x\"").unwrap();
        assert!(load_capabilities(tmp.path()).is_empty());
    }

    #[test]
    fn skip_missing_dir() {
        assert!(load_capabilities(Path::new("/nonexistent/planweave/capabilities")).is_empty());
    }

    #[test]
    fn skip_capability_with_missing_binary() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "needs_nonexistent",
            r#"
name = "NeedsNothingReal"
command = "echo"

[prerequisites]
required_binaries = ["_planweave_nonexistent_binary_xyz"]
"#,
        );
        assert!(load_capabilities(tmp.path()).is_empty());
    }

    #[test]
    fn prerequisites_env_and_os() {
        let missing_env = Prerequisites {
            required_env: vec!["_PLANWEAVE_UNSET_VAR_XYZ".into()],
            ..Default::default()
        };
        assert!(check_prerequisites(&missing_env).is_err());

        let bad_os = Prerequisites {
            required_os: Some("plan9".into()),
            ..Default::default()
        };
        assert!(check_prerequisites(&bad_os)
            .unwrap_err()
            .contains("unknown required_os"));

        assert!(check_prerequisites(&Prerequisites::default()).is_ok());
    }
}
