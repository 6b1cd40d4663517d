//! Project and module models.
//!
//! `Project` is the root identity loaded from `project.yml`; it is the
//! canonical truth about what the control plane manages. `Module` pairs a
//! declared reference with the state discovered for it by detection.

use serde::{Deserialize, Serialize};

/// A deployment context (dev, staging, production).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: bool,
}

/// Links to external systems. Informational only; resolved by adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalLinks {
    #[serde(default)]
    pub ci: Option<String>,
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub monitoring: Option<String>,
    #[serde(flatten)]
    pub extra: std::collections::BTreeMap<String, String>,
}

/// A module declared in `project.yml`.
///
/// This is a declaration of intent: "this module exists at this path and
/// uses this stack." The discovered state lives in [`Module`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleRef {
    pub name: String,
    pub path: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub description: String,
}

fn default_domain() -> String {
    "service".to_string()
}

fn default_domains() -> Vec<String> {
    vec!["service".to_string()]
}

fn default_version() -> u32 {
    1
}

/// Root project identity, loaded from `project.yml`.
///
/// If something is not declared here, it does not exist to the control
/// plane. Constructed by the config loader and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    /// Manifest schema version.
    #[serde(default = "default_version")]
    pub version: u32,

    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub repository: String,

    #[serde(default = "default_domains")]
    pub domains: Vec<String>,
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub modules: Vec<ModuleRef>,
    #[serde(default)]
    pub external: ExternalLinks,
}

impl Project {
    /// Look up an environment by name.
    pub fn get_environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// The environment marked default, or the first one if none is marked.
    pub fn default_environment(&self) -> Option<&Environment> {
        self.environments
            .iter()
            .find(|e| e.default)
            .or_else(|| self.environments.first())
    }

    /// Look up a module reference by name.
    pub fn get_module(&self, name: &str) -> Option<&ModuleRef> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// All modules in a given domain.
    pub fn modules_by_domain(&self, domain: &str) -> Vec<&ModuleRef> {
        self.modules.iter().filter(|m| m.domain == domain).collect()
    }
}

/// Health snapshot of a module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleHealth {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub last_checked_at: Option<String>,
}

impl Default for ModuleHealth {
    fn default() -> Self {
        Self {
            status: "unknown".to_string(),
            message: String::new(),
            last_checked_at: None,
        }
    }
}

/// A project module with both declared and discovered state.
///
/// The declared fields come from `project.yml`; the discovered fields are
/// populated by the detection service and may change between runs. Modules
/// are produced per detection run and are not persisted as a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Module {
    // Declared (from project.yml).
    pub name: String,
    pub path: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub description: String,

    // Discovered (from detection).
    #[serde(default)]
    pub detected: bool,
    #[serde(default)]
    pub detected_stack: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub health: ModuleHealth,
}

impl Module {
    /// An undetected module carrying only the declared identity.
    pub fn undetected(r: &ModuleRef) -> Self {
        Self {
            name: r.name.clone(),
            path: r.path.clone(),
            domain: r.domain.clone(),
            stack: r.stack.clone(),
            description: r.description.clone(),
            detected: false,
            detected_stack: String::new(),
            version: None,
            language: None,
            dependencies: Vec::new(),
            health: ModuleHealth::default(),
        }
    }

    /// The stack to plan against: detected overrides declared when present.
    pub fn effective_stack(&self) -> &str {
        if self.detected_stack.is_empty() {
            &self.stack
        } else {
            &self.detected_stack
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with_envs(envs: Vec<Environment>) -> Project {
        Project {
            version: 1,
            name: "demo".to_string(),
            description: String::new(),
            repository: String::new(),
            domains: default_domains(),
            environments: envs,
            modules: Vec::new(),
            external: ExternalLinks::default(),
        }
    }

    fn env(name: &str, default: bool) -> Environment {
        Environment {
            name: name.to_string(),
            description: String::new(),
            default,
        }
    }

    #[test]
    fn test_default_environment_prefers_marked() {
        let p = project_with_envs(vec![env("dev", false), env("prod", true)]);
        assert_eq!(p.default_environment().unwrap().name, "prod");
    }

    #[test]
    fn test_default_environment_falls_back_to_first() {
        let p = project_with_envs(vec![env("dev", false), env("prod", false)]);
        assert_eq!(p.default_environment().unwrap().name, "dev");
    }

    #[test]
    fn test_default_environment_empty() {
        let p = project_with_envs(Vec::new());
        assert!(p.default_environment().is_none());
    }

    #[test]
    fn test_effective_stack_prefers_detected() {
        let mut m = Module::undetected(&ModuleRef {
            name: "api".to_string(),
            path: "src/api".to_string(),
            domain: "service".to_string(),
            stack: "python".to_string(),
            description: String::new(),
        });
        assert_eq!(m.effective_stack(), "python");
        m.detected_stack = "python-fastapi".to_string();
        assert_eq!(m.effective_stack(), "python-fastapi");
    }

    #[test]
    fn test_project_yaml_round_trip() {
        let p = project_with_envs(vec![env("dev", true)]);
        let yaml = serde_yaml::to_string(&p).unwrap();
        let back: Project = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(p, back);
    }
}
