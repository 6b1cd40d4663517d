//! Configuration loader: reads `project.yml` into domain models.
//!
//! The manifest may carry its fields at the top level or nested under a
//! `project:` key; both layouts normalize to the same [`Project`]. This is
//! the only layer allowed to surface errors: a broken manifest is a
//! pre-flight condition that blocks all work.

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::{debug, info};

use crate::core::error::DcpError;
use crate::core::project::Project;

/// Default manifest filename.
pub const PROJECT_CONFIG_FILE: &str = "project.yml";

/// Upward-walk cap. Prevents runaway traversal on malformed filesystems.
const MAX_WALK_DEPTH: usize = 20;

/// Search for `project.yml` starting from `start_dir`, walking upward.
///
/// Allows running commands from subdirectories and still finding the
/// project root. Returns the manifest path, or `None`.
pub fn find_project_file(start_dir: Option<&Path>) -> Option<PathBuf> {
    let mut current = match start_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().ok()?,
    };
    if let Ok(canonical) = current.canonicalize() {
        current = canonical;
    }

    for _ in 0..MAX_WALK_DEPTH {
        let candidate = current.join(PROJECT_CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    None
}

/// The project root directory for a given manifest path.
pub fn project_root(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or_else(|| Path::new("."));
    parent
        .canonicalize()
        .unwrap_or_else(|_| parent.to_path_buf())
}

/// Load and validate the project manifest.
///
/// Fails with `ConfigMissing` / `ConfigUnreadable` / `ConfigMalformed` /
/// `ConfigInvalid`; these are the only errors the loader produces.
pub fn load_project(path: &Path) -> Result<Project, DcpError> {
    let project = load_project_unchecked(path)?;
    let errors = validate_project(&project);
    if !errors.is_empty() {
        return Err(DcpError::ConfigInvalid(errors.join("; ")));
    }
    info!(
        "Loaded project '{}' with {} modules",
        project.name,
        project.modules.len()
    );
    Ok(project)
}

/// Parse and construct a `Project` without semantic validation.
///
/// The config-check use case calls this directly so it can accumulate
/// every semantic issue instead of stopping at the first.
pub fn load_project_unchecked(path: &Path) -> Result<Project, DcpError> {
    if !path.is_file() {
        return Err(DcpError::ConfigMissing);
    }

    debug!("Loading project config from {}", path.display());

    let raw = std::fs::read_to_string(path).map_err(|source| DcpError::ConfigUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let data: Value = serde_yaml::from_str(&raw).map_err(|e| DcpError::ConfigMalformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let Value::Mapping(mapping) = data else {
        return Err(DcpError::ConfigMalformed {
            path: path.to_path_buf(),
            message: "expected a YAML mapping at the top level".to_string(),
        });
    };

    // The manifest may wrap everything under a `project:` key or be flat.
    // Top-level keys that sit alongside the wrapper are merged in unless
    // the wrapper shadows them.
    let project_key = Value::from("project");
    let project_value = match mapping.get(&project_key) {
        Some(Value::Mapping(inner)) => {
            let mut merged = inner.clone();
            for key in ["version", "domains", "environments", "modules", "external"] {
                let k = Value::from(key);
                if let Some(v) = mapping.get(&k) {
                    if !merged.contains_key(&k) {
                        merged.insert(k, v.clone());
                    }
                }
            }
            Value::Mapping(merged)
        }
        Some(other) => {
            return Err(DcpError::ConfigMalformed {
                path: path.to_path_buf(),
                message: format!(
                    "expected a mapping under 'project', got {}",
                    yaml_kind(other)
                ),
            });
        }
        None => Value::Mapping(mapping),
    };

    serde_yaml::from_value(project_value)
        .map_err(|e| DcpError::ConfigInvalid(e.to_string()))
}

/// Semantic validation. Returns every violation, not just the first.
pub fn validate_project(project: &Project) -> Vec<String> {
    let mut errors = Vec::new();

    if project.name.trim().is_empty() {
        errors.push("project name must not be empty".to_string());
    }

    let mut dupes = duplicate_names(project.modules.iter().map(|m| m.name.as_str()));
    if !dupes.is_empty() {
        dupes.sort();
        errors.push(format!("duplicate module names: {}", dupes.join(", ")));
    }

    let mut env_dupes = duplicate_names(project.environments.iter().map(|e| e.name.as_str()));
    if !env_dupes.is_empty() {
        env_dupes.sort();
        errors.push(format!(
            "duplicate environment names: {}",
            env_dupes.join(", ")
        ));
    }

    errors
}

fn duplicate_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = std::collections::BTreeMap::new();
    for name in names {
        *seen.entry(name).or_insert(0u32) += 1;
    }
    seen.into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect()
}

fn yaml_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join(PROJECT_CONFIG_FILE);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_flat_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_manifest(
            tmp.path(),
            "name: demo\nmodules:\n  - name: api\n    path: src/api\n    stack: python\n",
        );
        let project = load_project(&path).unwrap();
        assert_eq!(project.name, "demo");
        assert_eq!(project.version, 1);
        assert_eq!(project.modules.len(), 1);
        assert_eq!(project.modules[0].stack, "python");
        assert_eq!(project.modules[0].domain, "service");
    }

    #[test]
    fn test_load_wrapped_manifest_merges_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_manifest(
            tmp.path(),
            concat!(
                "project:\n",
                "  name: demo\n",
                "version: 2\n",
                "environments:\n",
                "  - name: dev\n",
                "    default: true\n",
                "modules:\n",
                "  - name: api\n",
                "    path: src/api\n",
            ),
        );
        let project = load_project(&path).unwrap();
        assert_eq!(project.name, "demo");
        assert_eq!(project.version, 2);
        assert_eq!(project.environments.len(), 1);
        assert_eq!(project.modules.len(), 1);
    }

    #[test]
    fn test_wrapper_shadows_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_manifest(
            tmp.path(),
            "project:\n  name: demo\n  version: 5\nversion: 2\n",
        );
        let project = load_project(&path).unwrap();
        assert_eq!(project.version, 5);
    }

    #[test]
    fn test_missing_file_is_config_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_project(&tmp.path().join("project.yml")).unwrap_err();
        assert!(matches!(err, DcpError::ConfigMissing));
    }

    #[test]
    fn test_syntax_error_is_config_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_manifest(tmp.path(), "name: [unclosed\n");
        let err = load_project(&path).unwrap_err();
        assert!(matches!(err, DcpError::ConfigMalformed { .. }));
    }

    #[test]
    fn test_non_mapping_is_config_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_manifest(tmp.path(), "- just\n- a list\n");
        let err = load_project(&path).unwrap_err();
        assert!(matches!(err, DcpError::ConfigMalformed { .. }));
    }

    #[test]
    fn test_duplicate_modules_is_config_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_manifest(
            tmp.path(),
            concat!(
                "name: demo\n",
                "modules:\n",
                "  - name: api\n",
                "    path: a\n",
                "  - name: api\n",
                "    path: b\n",
            ),
        );
        let err = load_project(&path).unwrap_err();
        match err {
            DcpError::ConfigInvalid(msg) => assert!(msg.contains("duplicate module names: api")),
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_find_project_file_walks_upward() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), "name: demo\n");
        let nested = tmp.path().join("a").join("b").join("c");
        fs::create_dir_all(&nested).unwrap();

        let found = find_project_file(Some(&nested)).unwrap();
        assert_eq!(
            found.canonicalize().unwrap(),
            tmp.path().join(PROJECT_CONFIG_FILE).canonicalize().unwrap()
        );
    }

    #[test]
    fn test_find_project_file_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("deep");
        fs::create_dir_all(&nested).unwrap();
        // No manifest anywhere under the temp root; the walk may still hit
        // one above it, so only assert it does not find ours.
        let found = find_project_file(Some(&nested));
        if let Some(found) = found {
            assert!(!found.starts_with(tmp.path()));
        }
    }
}
