//! Project state: the single persisted document plus its atomic store.
//!
//! `ProjectState` is the observed reality of the project at a point in
//! time, serialized to `.state/current.json`. It is disposable and
//! reproducible: delete it and the engine regenerates everything from
//! `project.yml` plus detection. Reads therefore never fail; corruption
//! falls back to a fresh default. Writes are atomic via
//! write-temp-then-rename in the destination directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::core::error::DcpError;
use crate::core::time::now_iso;

pub const STATE_DIR: &str = ".state";
pub const STATE_FILE: &str = "current.json";

/// Runtime state of an adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdapterState {
    pub name: String,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub last_used_at: Option<String>,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default = "default_circuit_state")]
    pub circuit_state: String,
}

fn default_circuit_state() -> String {
    "closed".to_string()
}

impl AdapterState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: false,
            version: None,
            last_used_at: None,
            failure_count: 0,
            circuit_state: default_circuit_state(),
        }
    }
}

/// Runtime state of a module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleState {
    pub name: String,
    #[serde(default)]
    pub detected: bool,
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub last_action_at: Option<String>,
    #[serde(default)]
    pub last_action_status: Option<String>,
}

impl ModuleState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            detected: false,
            stack: String::new(),
            version: None,
            last_action_at: None,
            last_action_status: None,
        }
    }
}

/// Summary of the last operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OperationRecord {
    #[serde(default)]
    pub operation_id: String,
    #[serde(default)]
    pub automation: String,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub ended_at: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub actions_total: u32,
    #[serde(default)]
    pub actions_succeeded: u32,
    #[serde(default)]
    pub actions_failed: u32,
}

/// Root state document, serialized to `.state/current.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default)]
    pub project_name: String,
    #[serde(default = "default_environment")]
    pub current_environment: String,

    #[serde(default = "now_iso")]
    pub created_at: String,
    #[serde(default = "now_iso")]
    pub updated_at: String,
    #[serde(default)]
    pub last_detection_at: Option<String>,

    #[serde(default)]
    pub modules: BTreeMap<String, ModuleState>,
    #[serde(default)]
    pub adapters: BTreeMap<String, AdapterState>,

    #[serde(default)]
    pub last_operation: OperationRecord,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_schema_version() -> u32 {
    1
}

fn default_environment() -> String {
    "dev".to_string()
}

impl Default for ProjectState {
    fn default() -> Self {
        let now = now_iso();
        Self {
            schema_version: default_schema_version(),
            project_name: String::new(),
            current_environment: default_environment(),
            created_at: now.clone(),
            updated_at: now,
            last_detection_at: None,
            modules: BTreeMap::new(),
            adapters: BTreeMap::new(),
            last_operation: OperationRecord::default(),
            metadata: Map::new(),
        }
    }
}

impl ProjectState {
    /// Refresh the `updated_at` timestamp.
    pub fn touch(&mut self) {
        self.updated_at = now_iso();
    }

    /// Merge fields onto an existing module entry, or create one.
    pub fn set_module_state<F>(&mut self, name: &str, update: F)
    where
        F: FnOnce(&mut ModuleState),
    {
        let entry = self
            .modules
            .entry(name.to_string())
            .or_insert_with(|| ModuleState::new(name));
        update(entry);
    }

    /// Merge fields onto an existing adapter entry, or create one.
    pub fn set_adapter_state<F>(&mut self, name: &str, update: F)
    where
        F: FnOnce(&mut AdapterState),
    {
        let entry = self
            .adapters
            .entry(name.to_string())
            .or_insert_with(|| AdapterState::new(name));
        update(entry);
    }
}

/// Default state file path for a project root.
pub fn default_state_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join(STATE_FILE)
}

/// Load project state, tolerating absence and corruption.
///
/// Never fails: a missing file yields a fresh default, an unreadable or
/// corrupt one is logged and replaced by a fresh default.
pub fn load_state(path: &Path) -> ProjectState {
    if !path.is_file() {
        info!("No state file at {}; starting fresh", path.display());
        return ProjectState::default();
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                "Cannot read state file {}: {}; starting fresh",
                path.display(),
                e
            );
            return ProjectState::default();
        }
    };

    match serde_json::from_str::<ProjectState>(&raw) {
        Ok(state) => {
            debug!(
                "Loaded state from {} (updated_at={})",
                path.display(),
                state.updated_at
            );
            state
        }
        Err(e) => {
            warn!(
                "Corrupt state file {}: {}; starting fresh",
                path.display(),
                e
            );
            ProjectState::default()
        }
    }
}

/// Save project state atomically.
///
/// Serializes with two-space indentation, writes to a temp file in the
/// destination directory, then renames over the target. A crash between
/// the write and the rename leaves the previous file intact.
pub fn save_state(state: &mut ProjectState, path: &Path) -> Result<(), DcpError> {
    state.touch();

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut content = serde_json::to_string_pretty(state)?;
    content.push('\n');

    atomic_write(path, &content)?;
    debug!("State saved to {}", path.display());
    Ok(())
}

/// Write-temp-then-rename within the destination directory.
pub(crate) fn atomic_write(path: &Path, content: &str) -> Result<(), DcpError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(".write-{}.tmp", Ulid::new()));
    if let Err(e) = std::fs::write(&tmp, content) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_module_state_creates_then_merges() {
        let mut state = ProjectState::default();
        state.set_module_state("api", |m| {
            m.detected = true;
            m.stack = "python".to_string();
        });
        state.set_module_state("api", |m| {
            m.version = Some("1.0.0".to_string());
        });

        let m = &state.modules["api"];
        assert!(m.detected);
        assert_eq!(m.stack, "python");
        assert_eq!(m.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_set_adapter_state_creates_then_merges() {
        let mut state = ProjectState::default();
        state.set_adapter_state("shell", |a| a.available = true);
        state.set_adapter_state("shell", |a| a.failure_count = 2);

        let a = &state.adapters["shell"];
        assert!(a.available);
        assert_eq!(a.failure_count, 2);
        assert_eq!(a.circuit_state, "closed");
    }

    #[test]
    fn test_state_json_round_trip() {
        let mut state = ProjectState::default();
        state.project_name = "demo".to_string();
        state.set_module_state("api", |m| m.detected = true);
        state.last_operation.operation_id = "op-1".to_string();

        let json = serde_json::to_string_pretty(&state).unwrap();
        let back: ProjectState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn test_load_state_missing_file_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let state = load_state(&dir.path().join("nope.json"));
        assert_eq!(state.project_name, "");
        assert_eq!(state.schema_version, 1);
    }

    #[test]
    fn test_load_state_corrupt_file_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current.json");
        std::fs::write(&path, "{ not json").unwrap();
        let state = load_state(&path);
        assert_eq!(state.schema_version, 1);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".state").join("current.json");

        let mut state = ProjectState::default();
        state.project_name = "demo".to_string();
        save_state(&mut state, &path).unwrap();

        let loaded = load_state(&path);
        assert_eq!(loaded.project_name, "demo");
        assert_eq!(loaded.updated_at, state.updated_at);
    }

    #[test]
    fn test_save_updates_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current.json");

        let mut state = ProjectState::default();
        let before = state.updated_at.clone();
        std::thread::sleep(std::time::Duration::from_millis(5));
        save_state(&mut state, &path).unwrap();
        assert!(state.updated_at > before);
    }
}
