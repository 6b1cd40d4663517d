//! Stack definitions: reusable technology descriptors.
//!
//! A stack says how a kind of module behaves: what adapters it needs, how
//! to detect it on disk, and which capabilities it exposes. Stacks live in
//! `stacks/<name>/stack.yml` and support single-parent inheritance which is
//! resolved once at load time; consumers only ever see flat stacks.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::error::DcpError;

/// How to detect a stack in a directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionRule {
    /// At least one of these files must exist.
    #[serde(default)]
    pub files_any_of: Vec<String>,
    /// All of these files must exist.
    #[serde(default)]
    pub files_all_of: Vec<String>,
    /// File must exist and contain the substring, e.g.
    /// `pyproject.toml: fastapi`.
    #[serde(default)]
    pub content_contains: BTreeMap<String, String>,
}

/// A required tool adapter with optional version constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdapterRequirement {
    pub adapter: String,
    #[serde(default)]
    pub min_version: String,
}

/// A named capability a stack supports, mapping an automation name to an
/// adapter and command without hardcoding behavior in the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackCapability {
    pub name: String,
    #[serde(default)]
    pub adapter: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub description: String,
}

fn default_domain() -> String {
    "service".to_string()
}

/// Technology knowledge for one kind of module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stack {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub icon: String,
    /// Single-parent inheritance. Kept after resolution as provenance only.
    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub requires: Vec<AdapterRequirement>,
    #[serde(default)]
    pub detection: DetectionRule,
    #[serde(default)]
    pub capabilities: Vec<StackCapability>,
}

impl Stack {
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == name)
    }

    pub fn get_capability(&self, name: &str) -> Option<&StackCapability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Resolved stacks in detection order: flavored (child) stacks iterate
/// before base stacks so the detection service prefers specific matches.
#[derive(Debug, Clone, Default)]
pub struct StackCatalog {
    stacks: Vec<Stack>,
}

impl StackCatalog {
    pub fn from_stacks(stacks: Vec<Stack>) -> Self {
        Self { stacks }
    }

    pub fn get(&self, name: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stack> {
        self.stacks.iter()
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stacks.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Load a single stack definition. Malformed files are skipped with a
/// warning rather than failing discovery.
pub fn load_stack(path: &Path) -> Option<Stack> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to read stack file {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_yaml::from_str::<Stack>(&raw) {
        Ok(stack) => {
            debug!("Loaded stack '{}' from {}", stack.name, path.display());
            Some(stack)
        }
        Err(e) => {
            warn!("Failed to load stack from {}: {}", path.display(), e);
            None
        }
    }
}

/// Discover, load, and resolve all stack definitions under `stacks_dir`.
///
/// Expects `stacks/<name>/stack.yml` (or `stack.yaml`). Children are merged
/// onto their parent in a single pass; a missing parent downgrades the child
/// to a base stack with a warning, and a parent chain that loops back on
/// itself is refused.
pub fn discover_stacks(stacks_dir: &Path) -> Result<StackCatalog, DcpError> {
    let raw = load_all(stacks_dir)?;
    let resolved = resolve_parents(raw);
    info!(
        "Discovered {} stacks: {:?}",
        resolved.len(),
        resolved.names()
    );
    Ok(resolved)
}

fn load_all(stacks_dir: &Path) -> Result<Vec<Stack>, DcpError> {
    let mut stacks: Vec<Stack> = Vec::new();

    if !stacks_dir.is_dir() {
        debug!("Stacks directory not found: {}", stacks_dir.display());
        return Ok(stacks);
    }

    let mut children: Vec<_> = std::fs::read_dir(stacks_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    children.sort();

    for child in children {
        let mut stack_file = child.join("stack.yml");
        if !stack_file.is_file() {
            stack_file = child.join("stack.yaml");
        }
        if !stack_file.is_file() {
            continue;
        }
        if let Some(stack) = load_stack(&stack_file) {
            // Last definition wins when two directories declare the same name.
            stacks.retain(|s| s.name != stack.name);
            stacks.push(stack);
        }
    }

    Ok(stacks)
}

/// Resolve parent references and merge inherited fields.
///
/// Merge rules:
///   icon/detail      child's value if set, else parent's
///   domain           parent's unless the child sets a non-default value
///   requires         merged by adapter name, child wins
///   detection        files lists deduplicated concatenations,
///                    content_contains merged with child winning per key
///   capabilities     merged by name, child overrides, child extras appended,
///                    parent order preserved
fn resolve_parents(raw: Vec<Stack>) -> StackCatalog {
    let by_name: BTreeMap<String, Stack> =
        raw.iter().map(|s| (s.name.clone(), s.clone())).collect();

    let mut resolved: Vec<Stack> = Vec::new();

    for stack in raw {
        let Some(parent_name) = stack.parent.clone() else {
            resolved.push(stack);
            continue;
        };

        if parent_name == stack.name {
            warn!(
                "Stack '{}' declares itself as parent; loading as base stack",
                stack.name
            );
            let mut s = stack;
            s.parent = None;
            resolved.push(s);
            continue;
        }

        let Some(parent) = by_name.get(&parent_name) else {
            warn!(
                "Stack '{}' declares parent '{}' which does not exist; loading as base stack",
                stack.name, parent_name
            );
            resolved.push(stack);
            continue;
        };

        if parent.parent.as_deref() == Some(stack.name.as_str()) {
            warn!(
                "Stacks '{}' and '{}' form an inheritance cycle; loading '{}' as base stack",
                stack.name, parent_name, stack.name
            );
            let mut s = stack;
            s.parent = None;
            resolved.push(s);
            continue;
        }

        resolved.push(merge_child(parent, &stack));
    }

    // Flavored stacks first so detection prefers the more specific match.
    let (flavors, bases): (Vec<Stack>, Vec<Stack>) =
        resolved.into_iter().partition(|s| s.parent.is_some());
    let mut ordered = flavors;
    ordered.extend(bases);
    StackCatalog::from_stacks(ordered)
}

fn merge_child(parent: &Stack, child: &Stack) -> Stack {
    let icon = if child.icon.is_empty() {
        parent.icon.clone()
    } else {
        child.icon.clone()
    };
    let detail = if child.detail.is_empty() {
        parent.detail.clone()
    } else {
        child.detail.clone()
    };
    let domain = if child.domain == "service" {
        parent.domain.clone()
    } else {
        child.domain.clone()
    };

    // Requires merged by adapter name, child wins, parent order preserved.
    let mut requires = parent.requires.clone();
    for r in &child.requires {
        if let Some(existing) = requires.iter_mut().find(|p| p.adapter == r.adapter) {
            *existing = r.clone();
        } else {
            requires.push(r.clone());
        }
    }

    let detection = merge_detection(&parent.detection, &child.detection);
    let capabilities = merge_capabilities(&parent.capabilities, &child.capabilities);

    Stack {
        name: child.name.clone(),
        description: child.description.clone(),
        detail,
        domain,
        icon,
        parent: child.parent.clone(),
        requires,
        detection,
        capabilities,
    }
}

fn merge_detection(parent: &DetectionRule, child: &DetectionRule) -> DetectionRule {
    let mut files_any_of = parent.files_any_of.clone();
    for f in &child.files_any_of {
        if !files_any_of.contains(f) {
            files_any_of.push(f.clone());
        }
    }
    let mut files_all_of = parent.files_all_of.clone();
    for f in &child.files_all_of {
        if !files_all_of.contains(f) {
            files_all_of.push(f.clone());
        }
    }
    let mut content_contains = parent.content_contains.clone();
    for (k, v) in &child.content_contains {
        content_contains.insert(k.clone(), v.clone());
    }
    DetectionRule {
        files_any_of,
        files_all_of,
        content_contains,
    }
}

fn merge_capabilities(
    parent_caps: &[StackCapability],
    child_caps: &[StackCapability],
) -> Vec<StackCapability> {
    let mut merged = parent_caps.to_vec();
    for c in child_caps {
        if let Some(existing) = merged.iter_mut().find(|p| p.name == c.name) {
            *existing = c.clone();
        } else {
            merged.push(c.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(name: &str, adapter: &str, command: &str) -> StackCapability {
        StackCapability {
            name: name.to_string(),
            adapter: adapter.to_string(),
            command: command.to_string(),
            description: String::new(),
        }
    }

    fn base_stack(name: &str) -> Stack {
        Stack {
            name: name.to_string(),
            description: String::new(),
            detail: String::new(),
            domain: "service".to_string(),
            icon: String::new(),
            parent: None,
            requires: Vec::new(),
            detection: DetectionRule::default(),
            capabilities: Vec::new(),
        }
    }

    #[test]
    fn test_merge_capabilities_child_overrides_and_appends() {
        let parent = vec![cap("test", "shell", "pytest"), cap("lint", "shell", "ruff")];
        let child = vec![cap("test", "shell", "pytest -x"), cap("fmt", "shell", "black .")];
        let merged = merge_capabilities(&parent, &child);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].name, "test");
        assert_eq!(merged[0].command, "pytest -x");
        assert_eq!(merged[1].name, "lint");
        assert_eq!(merged[2].name, "fmt");
    }

    #[test]
    fn test_merge_detection_dedups_and_child_wins() {
        let mut parent = DetectionRule::default();
        parent.files_any_of = vec!["pyproject.toml".to_string()];
        parent
            .content_contains
            .insert("pyproject.toml".to_string(), "poetry".to_string());

        let mut child = DetectionRule::default();
        child.files_any_of = vec!["pyproject.toml".to_string(), "setup.cfg".to_string()];
        child
            .content_contains
            .insert("pyproject.toml".to_string(), "fastapi".to_string());

        let merged = merge_detection(&parent, &child);
        assert_eq!(merged.files_any_of, vec!["pyproject.toml", "setup.cfg"]);
        assert_eq!(merged.content_contains["pyproject.toml"], "fastapi");
    }

    #[test]
    fn test_resolve_parents_orders_flavors_first() {
        let mut parent = base_stack("python");
        parent.capabilities = vec![cap("test", "shell", "pytest")];
        let mut child = base_stack("python-fastapi");
        child.parent = Some("python".to_string());

        let catalog = resolve_parents(vec![parent, child]);
        assert_eq!(catalog.names(), vec!["python-fastapi", "python"]);
        // Child inherited the parent capability.
        assert!(catalog.get("python-fastapi").unwrap().has_capability("test"));
    }

    #[test]
    fn test_resolve_parents_missing_parent_downgrades() {
        let mut child = base_stack("python-fastapi");
        child.parent = Some("python".to_string());
        let catalog = resolve_parents(vec![child]);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("python-fastapi").is_some());
    }

    #[test]
    fn test_resolve_parents_refuses_cycle() {
        let mut a = base_stack("a");
        a.parent = Some("b".to_string());
        let mut b = base_stack("b");
        b.parent = Some("a".to_string());
        let catalog = resolve_parents(vec![a, b]);
        // Both survive, neither inherits through the cycle.
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_domain_inherits_unless_child_overrides() {
        let mut parent = base_stack("terraform");
        parent.domain = "infra".to_string();
        let mut child = base_stack("terraform-aws");
        child.parent = Some("terraform".to_string());

        let merged = merge_child(&parent, &child);
        assert_eq!(merged.domain, "infra");

        child.domain = "platform".to_string();
        let merged = merge_child(&parent, &child);
        assert_eq!(merged.domain, "platform");
    }
}
