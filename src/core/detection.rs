//! Detection service: discover modules and match stacks.
//!
//! The intelligence layer that looks at a project's filesystem and
//! determines what is actually there. Pure logic: it reads files but
//! never mutates the filesystem and never runs a process.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::core::project::{Module, Project};
use crate::core::stack::{Stack, StackCatalog};

/// Result of detecting modules in a project.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionResult {
    pub modules: Vec<Module>,
    /// Declared but the path is missing.
    pub unmatched_refs: Vec<String>,
    /// Found on disk but undeclared. Reserved for future discovery.
    pub extra_detections: Vec<Module>,
}

impl DetectionResult {
    pub fn total_modules(&self) -> usize {
        self.modules.len()
    }

    pub fn total_detected(&self) -> usize {
        self.modules.iter().filter(|m| m.detected).count()
    }

    pub fn get_module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "total": self.total_modules(),
            "detected": self.total_detected(),
            "unmatched": self.unmatched_refs,
            "modules": self.modules,
            "extra_detections": self.extra_detections,
        })
    }
}

/// Match a directory against stack detection rules, in catalog order.
///
/// A stack matches iff its `files_any_of` has at least one file present
/// (when non-empty), every `files_all_of` entry is present, and every
/// `content_contains` pair is satisfied. First match wins.
pub fn match_stack<'a>(directory: &Path, stacks: &'a StackCatalog) -> Option<&'a Stack> {
    stacks.iter().find(|stack| rule_matches(directory, stack))
}

fn rule_matches(directory: &Path, stack: &Stack) -> bool {
    let rule = &stack.detection;

    if !rule.files_any_of.is_empty()
        && !rule.files_any_of.iter().any(|f| directory.join(f).exists())
    {
        return false;
    }

    if !rule.files_all_of.iter().all(|f| directory.join(f).exists()) {
        return false;
    }

    for (filename, needle) in &rule.content_contains {
        let filepath = directory.join(filename);
        if !filepath.is_file() {
            return false;
        }
        // Tolerant decode: non-UTF-8 bytes are replaced, not fatal.
        let content = match std::fs::read(&filepath) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => return false,
        };
        if !content.contains(needle) {
            return false;
        }
    }

    true
}

static PYPROJECT_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"version\s*=\s*"([^"]+)""#).unwrap());
static GO_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^go\s+(\d+\.\d+(?:\.\d+)?)").unwrap());
static MIX_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"version:\s*"([^"]+)""#).unwrap());
static CHART_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^version:\s*(.+)$").unwrap());

/// Try to detect a module's version from technology marker files,
/// ordered by specificity. First successful hit wins.
pub fn detect_version(directory: &Path) -> Option<String> {
    // Python: pyproject.toml
    if let Some(content) = read_marker(directory, "pyproject.toml") {
        if let Some(c) = PYPROJECT_VERSION.captures(&content) {
            return Some(c[1].to_string());
        }
    }

    // Node / TypeScript: package.json
    if let Some(content) = read_marker(directory, "package.json") {
        if let Ok(data) = serde_json::from_str::<serde_json::Value>(&content) {
            if let Some(version) = data.get("version") {
                if let Some(s) = version.as_str() {
                    return Some(s.to_string());
                }
                return Some(version.to_string());
            }
        }
    }

    // Go: the go directive in go.mod
    if let Some(content) = read_marker(directory, "go.mod") {
        if let Some(c) = GO_DIRECTIVE.captures(&content) {
            return Some(c[1].to_string());
        }
    }

    // Rust: Cargo.toml
    if let Some(content) = read_marker(directory, "Cargo.toml") {
        if let Some(c) = PYPROJECT_VERSION.captures(&content) {
            return Some(c[1].to_string());
        }
    }

    // Elixir: mix.exs
    if let Some(content) = read_marker(directory, "mix.exs") {
        if let Some(c) = MIX_VERSION.captures(&content) {
            return Some(c[1].to_string());
        }
    }

    // Helm: Chart.yaml
    if let Some(content) = read_marker(directory, "Chart.yaml") {
        if let Some(c) = CHART_VERSION.captures(&content) {
            return Some(c[1].trim().trim_matches(|c| c == '"' || c == '\'').to_string());
        }
    }

    None
}

fn read_marker(directory: &Path, name: &str) -> Option<String> {
    let path = directory.join(name);
    if !path.is_file() {
        return None;
    }
    std::fs::read_to_string(&path).ok()
}

/// Fixed stack-name to language table. Exact match first, then longest
/// prefix allowing a flavor suffix (`python-flask` resolves to `python`).
const LANG_MAP: &[(&str, Option<&str>)] = &[
    ("python", Some("python")),
    ("node", Some("javascript")),
    ("typescript", Some("typescript")),
    ("go", Some("go")),
    ("rust", Some("rust")),
    ("ruby", Some("ruby")),
    ("java", Some("java")),
    ("dotnet", Some("csharp")),
    ("swift", Some("swift")),
    ("elixir", Some("elixir")),
    ("zig", Some("zig")),
    ("cpp", Some("cpp")),
    ("c", Some("c")),
    ("protobuf", Some("protobuf")),
    ("terraform", Some("hcl")),
    ("helm", Some("yaml")),
    ("kubernetes", Some("yaml")),
    ("docker-compose", None),
    ("static-site", Some("html")),
    ("markdown", None),
];

/// Infer the primary language from a stack name.
pub fn detect_language(stack_name: &str) -> Option<String> {
    if let Some((_, lang)) = LANG_MAP.iter().find(|(name, _)| *name == stack_name) {
        return lang.map(str::to_string);
    }

    let mut best: Option<&str> = None;
    let mut best_len = 0;
    for (prefix, lang) in LANG_MAP {
        if stack_name.starts_with(&format!("{prefix}-")) && prefix.len() > best_len {
            best = *lang;
            best_len = prefix.len();
        }
    }
    best.map(str::to_string)
}

/// Detect the modules declared in the project manifest.
///
/// For each reference: check the path exists, match it against stack
/// detection rules, extract a version, infer a language, and emit the
/// enriched module.
pub fn detect_modules(
    project: &Project,
    project_root: &Path,
    stacks: &StackCatalog,
) -> DetectionResult {
    let mut result = DetectionResult::default();

    for r in &project.modules {
        let module_dir = project_root.join(&r.path);

        if !module_dir.is_dir() {
            warn!("Module '{}' path does not exist: {}", r.name, r.path);
            result.unmatched_refs.push(r.name.clone());
            result.modules.push(Module::undetected(r));
            continue;
        }

        let matched = match_stack(&module_dir, stacks);
        let detected_stack = matched.map(|s| s.name.clone()).unwrap_or_default();
        let effective = if detected_stack.is_empty() {
            r.stack.clone()
        } else {
            detected_stack.clone()
        };

        let version = detect_version(&module_dir);
        let language = detect_language(&effective);

        let mut module = Module::undetected(r);
        module.detected = true;
        module.detected_stack = detected_stack;
        module.version = version.clone();
        module.language = language;
        result.modules.push(module);

        info!(
            "Detected module '{}': stack={}, version={:?}",
            r.name, effective, version
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stack::{DetectionRule, StackCapability};
    use std::fs;

    fn stack_with_rule(name: &str, rule: DetectionRule) -> Stack {
        Stack {
            name: name.to_string(),
            description: String::new(),
            detail: String::new(),
            domain: "service".to_string(),
            icon: String::new(),
            parent: None,
            requires: Vec::new(),
            detection: rule,
            capabilities: vec![StackCapability {
                name: "test".to_string(),
                adapter: "shell".to_string(),
                command: "true".to_string(),
                description: String::new(),
            }],
        }
    }

    #[test]
    fn test_match_stack_any_of() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("pyproject.toml"), "[project]\n").unwrap();

        let rule = DetectionRule {
            files_any_of: vec!["pyproject.toml".to_string(), "setup.py".to_string()],
            ..Default::default()
        };
        let catalog = StackCatalog::from_stacks(vec![stack_with_rule("python", rule)]);
        assert_eq!(match_stack(tmp.path(), &catalog).unwrap().name, "python");
    }

    #[test]
    fn test_match_stack_all_of_requires_every_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("go.mod"), "module x\n").unwrap();

        let rule = DetectionRule {
            files_all_of: vec!["go.mod".to_string(), "go.sum".to_string()],
            ..Default::default()
        };
        let catalog = StackCatalog::from_stacks(vec![stack_with_rule("go", rule)]);
        assert!(match_stack(tmp.path(), &catalog).is_none());

        fs::write(tmp.path().join("go.sum"), "").unwrap();
        assert!(match_stack(tmp.path(), &catalog).is_some());
    }

    #[test]
    fn test_match_stack_content_contains() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("pyproject.toml"), "[tool.poetry]\nfastapi\n").unwrap();

        let mut rule = DetectionRule::default();
        rule.content_contains
            .insert("pyproject.toml".to_string(), "fastapi".to_string());
        let fastapi = stack_with_rule("python-fastapi", rule);

        let mut base_rule = DetectionRule::default();
        base_rule.files_any_of = vec!["pyproject.toml".to_string()];
        let base = stack_with_rule("python", base_rule);

        // Catalog order decides: flavored first wins.
        let catalog = StackCatalog::from_stacks(vec![fastapi, base]);
        assert_eq!(
            match_stack(tmp.path(), &catalog).unwrap().name,
            "python-fastapi"
        );
    }

    #[test]
    fn test_detect_version_pyproject() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("pyproject.toml"),
            "[project]\nname = \"x\"\nversion = \"1.0.0\"\n",
        )
        .unwrap();
        assert_eq!(detect_version(tmp.path()).as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_detect_version_package_json() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("package.json"),
            "{\"name\": \"x\", \"version\": \"2.3.4\"}",
        )
        .unwrap();
        assert_eq!(detect_version(tmp.path()).as_deref(), Some("2.3.4"));
    }

    #[test]
    fn test_detect_version_go_mod() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("go.mod"), "module demo\n\ngo 1.22.1\n").unwrap();
        assert_eq!(detect_version(tmp.path()).as_deref(), Some("1.22.1"));
    }

    #[test]
    fn test_detect_version_chart_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("Chart.yaml"),
            "apiVersion: v2\nversion: \"0.7.0\"\n",
        )
        .unwrap();
        assert_eq!(detect_version(tmp.path()).as_deref(), Some("0.7.0"));
    }

    #[test]
    fn test_detect_language_exact_and_flavor() {
        assert_eq!(detect_language("python").as_deref(), Some("python"));
        assert_eq!(detect_language("python-flask").as_deref(), Some("python"));
        assert_eq!(detect_language("node").as_deref(), Some("javascript"));
        assert_eq!(detect_language("terraform-aws").as_deref(), Some("hcl"));
        assert_eq!(detect_language("markdown"), None);
        assert_eq!(detect_language("fortran"), None);
    }

    #[test]
    fn test_detect_language_longest_prefix_wins() {
        // "c" and "cpp" both prefix "cpp-cmake"; the longer prefix decides.
        assert_eq!(detect_language("cpp-cmake").as_deref(), Some("cpp"));
        assert_eq!(detect_language("c-make").as_deref(), Some("c"));
    }
}
