//! Use cases: the top-level orchestrators the CLI calls into.
//!
//! Each returns a typed result struct with an `error` field instead of
//! failing: a broken manifest, an empty plan, or a failed action all
//! surface as data for the presentation layer to render. Nothing in this
//! module returns `Err`.

use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::warn;

use crate::adapters::docker::DockerAdapter;
use crate::adapters::filesystem::FilesystemAdapter;
use crate::adapters::git::GitAdapter;
use crate::adapters::node::NodeAdapter;
use crate::adapters::python::PythonAdapter;
use crate::adapters::registry::AdapterRegistry;
use crate::adapters::shell::ShellAdapter;
use crate::core::action::Action;
use crate::core::audit::{AuditEntry, AuditLedger};
use crate::core::circuit::CircuitBreakerRegistry;
use crate::core::config::{
    find_project_file, load_project, load_project_unchecked, project_root, validate_project,
};
use crate::core::detection::{DetectionResult, detect_modules};
use crate::core::engine::{
    ExecutionPlan, ExecutionReport, build_actions, execute_plan, generate_operation_id,
};
use crate::core::error::DcpError;
use crate::core::health::{SystemHealth, check_system_health};
use crate::core::project::Project;
use crate::core::retry::RetryQueue;
use crate::core::stack::{StackCatalog, discover_stacks};
use crate::core::state::{ProjectState, default_state_path, load_state, save_state};
use crate::core::time::now_iso;

/// Resolve the manifest path: explicit flag first, else the upward walk.
fn resolve_config(config_path: Option<&Path>) -> Option<PathBuf> {
    match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => find_project_file(None),
    }
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ConfigCheckResult {
    pub valid: bool,
    pub project: Option<Project>,
    pub config_path: Option<PathBuf>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigCheckResult {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "valid": self.valid,
            "config_path": self.config_path.as_ref().map(|p| p.display().to_string()),
            "errors": self.errors,
            "warnings": self.warnings,
            "project_name": self.project.as_ref().map(|p| p.name.clone()),
            "module_count": self.project.as_ref().map(|p| p.modules.len()).unwrap_or(0),
            "environment_count": self.project.as_ref().map(|p| p.environments.len()).unwrap_or(0),
        })
    }
}

/// Validate the project manifest and report every issue found.
pub fn check_config(config_path: Option<&Path>) -> ConfigCheckResult {
    let mut result = ConfigCheckResult::default();

    let Some(config_path) = resolve_config(config_path) else {
        result.errors.push("No project.yml found.".to_string());
        return result;
    };
    result.config_path = Some(config_path.clone());

    let project = match load_project_unchecked(&config_path) {
        Ok(project) => project,
        Err(e) => {
            result.errors.push(e.to_string());
            return result;
        }
    };

    result.errors.extend(validate_project(&project));

    if project.environments.is_empty() {
        result
            .warnings
            .push("No environments defined. Consider adding at least 'dev'.".to_string());
    }
    if project.modules.is_empty() {
        result
            .warnings
            .push("No modules defined. The project has nothing to manage.".to_string());
    }

    let defaults: Vec<&str> = project
        .environments
        .iter()
        .filter(|e| e.default)
        .map(|e| e.name.as_str())
        .collect();
    if defaults.len() > 1 {
        result.warnings.push(format!(
            "Multiple default environments: {}. Only the first will be used.",
            defaults.join(", ")
        ));
    }

    let root = project_root(&config_path);
    for module in &project.modules {
        if !root.join(&module.path).exists() {
            result.warnings.push(format!(
                "Module '{}' path does not exist: {}",
                module.name, module.path
            ));
        }
    }

    result.valid = result.errors.is_empty();
    result.project = Some(project);
    result
}

/// Aggregated project status.
#[derive(Debug, Default)]
pub struct StatusResult {
    pub project: Option<Project>,
    pub state: Option<ProjectState>,
    pub project_root: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub error: Option<String>,

    pub module_count: usize,
    pub environment_count: usize,
    pub detected_count: usize,
    pub current_environment: String,
}

impl StatusResult {
    pub fn to_json(&self) -> serde_json::Value {
        if let Some(error) = &self.error {
            return json!({ "error": error });
        }
        let project = self.project.as_ref();
        let mut out = json!({
            "project": {
                "name": project.map(|p| p.name.clone()).unwrap_or_default(),
                "description": project.map(|p| p.description.clone()).unwrap_or_default(),
                "repository": project.map(|p| p.repository.clone()).unwrap_or_default(),
            },
            "config_path": self.config_path.as_ref().map(|p| p.display().to_string()),
            "project_root": self.project_root.as_ref().map(|p| p.display().to_string()),
            "current_environment": self.current_environment,
            "modules": { "total": self.module_count, "detected": self.detected_count },
            "environments": self.environment_count,
        });
        if let Some(project) = project {
            out["module_list"] = json!(
                project
                    .modules
                    .iter()
                    .map(|m| json!({
                        "name": m.name,
                        "path": m.path,
                        "stack": m.stack,
                        "domain": m.domain,
                    }))
                    .collect::<Vec<_>>()
            );
            out["environment_list"] = json!(
                project
                    .environments
                    .iter()
                    .map(|e| json!({ "name": e.name, "default": e.default }))
                    .collect::<Vec<_>>()
            );
        }
        if let Some(state) = &self.state {
            if !state.last_operation.operation_id.is_empty() {
                out["last_operation"] = json!({
                    "id": state.last_operation.operation_id,
                    "type": state.last_operation.automation,
                    "status": state.last_operation.status,
                    "at": state.last_operation.ended_at,
                });
            }
        }
        out
    }
}

/// Load manifest plus state and produce the status summary.
pub fn get_status(config_path: Option<&Path>) -> StatusResult {
    let mut result = StatusResult {
        current_environment: "dev".to_string(),
        ..Default::default()
    };

    let Some(config_path) = resolve_config(config_path) else {
        result.error = Some("No project.yml found. Create one or pass --config.".to_string());
        return result;
    };

    let project = match load_project(&config_path) {
        Ok(project) => project,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };

    let root = project_root(&config_path);
    let state = load_state(&default_state_path(&root));

    result.module_count = project.modules.len();
    result.environment_count = project.environments.len();
    result.current_environment = state.current_environment.clone();
    result.detected_count = state.modules.values().filter(|m| m.detected).count();

    result.config_path = Some(config_path);
    result.project_root = Some(root);
    result.project = Some(project);
    result.state = Some(state);
    result
}

/// Result of the detect use case.
#[derive(Debug, Default)]
pub struct DetectResult {
    pub detection: Option<DetectionResult>,
    pub project: Option<Project>,
    pub project_root: Option<PathBuf>,
    pub stacks_loaded: usize,
    pub state_saved: bool,
    pub error: Option<String>,
}

impl DetectResult {
    pub fn to_json(&self) -> serde_json::Value {
        if let Some(error) = &self.error {
            return json!({ "error": error });
        }
        let mut out = json!({
            "project_name": self.project.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
            "project_root": self.project_root.as_ref().map(|p| p.display().to_string()),
            "stacks_loaded": self.stacks_loaded,
            "state_saved": self.state_saved,
        });
        if let Some(detection) = &self.detection {
            out["detection"] = detection.to_json();
        }
        out
    }
}

/// Run module detection, optionally persisting the findings.
pub fn run_detect(
    config_path: Option<&Path>,
    stacks_dir: Option<&Path>,
    save: bool,
) -> DetectResult {
    let mut result = DetectResult::default();

    let Some(config_path) = resolve_config(config_path) else {
        result.error = Some("No project.yml found.".to_string());
        return result;
    };

    let project = match load_project(&config_path) {
        Ok(project) => project,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };
    let root = project_root(&config_path);

    let stacks = match load_stacks(&root, stacks_dir) {
        Ok(stacks) => stacks,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };
    result.stacks_loaded = stacks.len();

    let detection = detect_modules(&project, &root, &stacks);

    if save {
        let state_path = default_state_path(&root);
        let mut state = load_state(&state_path);
        state.project_name = project.name.clone();
        state.last_detection_at = Some(now_iso());

        for module in &detection.modules {
            let effective = module.effective_stack().to_string();
            let detected = module.detected;
            let version = module.version.clone();
            state.set_module_state(&module.name, |m| {
                m.detected = detected;
                m.stack = effective;
                m.version = version;
            });
        }

        match save_state(&mut state, &state_path) {
            Ok(()) => result.state_saved = true,
            Err(e) => warn!("Failed to persist detection state: {}", e),
        }
    }

    result.project_root = Some(root);
    result.project = Some(project);
    result.detection = Some(detection);
    result
}

fn load_stacks(root: &Path, stacks_dir: Option<&Path>) -> Result<StackCatalog, DcpError> {
    let dir = match stacks_dir {
        Some(dir) => dir.to_path_buf(),
        None => root.join("stacks"),
    };
    discover_stacks(&dir)
}

/// Options for [`run_automation`].
#[derive(Debug, Default)]
pub struct RunOptions {
    pub capability: String,
    pub config_path: Option<PathBuf>,
    pub stacks_dir: Option<PathBuf>,
    /// Module allow-list; empty targets every detected module.
    pub modules: Vec<String>,
    pub environment: String,
    pub dry_run: bool,
    pub mock_mode: bool,
}

/// Result of running an automation.
#[derive(Debug, Default)]
pub struct RunResult {
    pub report: Option<ExecutionReport>,
    pub plan: Option<ExecutionPlan>,
    pub project: Option<Project>,
    pub project_root: Option<PathBuf>,
    pub modules_targeted: usize,
    pub actions_planned: usize,
    pub error: Option<String>,
}

impl RunResult {
    pub fn to_json(&self) -> serde_json::Value {
        if let Some(error) = &self.error {
            return json!({ "error": error });
        }
        let mut out = json!({
            "project_name": self.project.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
            "project_root": self.project_root.as_ref().map(|p| p.display().to_string()),
            "modules_targeted": self.modules_targeted,
            "actions_planned": self.actions_planned,
        });
        if let Some(report) = &self.report {
            out["report"] = report.to_json();
        }
        out
    }
}

/// The default adapter set registered when the caller supplies none.
pub fn default_registry(mock_mode: bool) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new(mock_mode);
    registry.register(Box::new(ShellAdapter));
    registry.register(Box::new(FilesystemAdapter));
    registry.register(Box::new(GitAdapter));
    registry.register(Box::new(DockerAdapter));
    registry.register(Box::new(PythonAdapter));
    registry.register(Box::new(NodeAdapter));
    registry.set_circuit_breakers(CircuitBreakerRegistry::new());
    registry
}

/// Execute a capability across project modules: the full vertical slice
/// from manifest to audited execution.
pub fn run_automation(opts: RunOptions, registry: Option<&mut AdapterRegistry>) -> RunResult {
    let mut result = RunResult::default();

    let Some(config_path) = resolve_config(opts.config_path.as_deref()) else {
        result.error = Some("No project.yml found.".to_string());
        return result;
    };

    let project = match load_project(&config_path) {
        Ok(project) => project,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };
    let root = project_root(&config_path);
    result.project_root = Some(root.clone());

    let stacks = match load_stacks(&root, opts.stacks_dir.as_deref()) {
        Ok(stacks) => stacks,
        Err(e) => {
            result.error = Some(e.to_string());
            result.project = Some(project);
            return result;
        }
    };

    // Detect, then narrow to the requested target set.
    let detection = detect_modules(&project, &root, &stacks);
    let mut targets = detection.modules;
    if !opts.modules.is_empty() {
        targets.retain(|m| opts.modules.iter().any(|name| *name == m.name));
    }
    targets.retain(|m| m.detected);
    result.modules_targeted = targets.len();

    let operation_id = generate_operation_id();
    let started_at = now_iso();
    let plan = build_actions(&opts.capability, &targets, &stacks, &operation_id);
    result.actions_planned = plan.total_actions();

    if plan.total_actions() == 0 {
        result.error = Some(format!(
            "No actions to execute: capability '{}' not found in any targeted module's stack.",
            opts.capability
        ));
        result.plan = Some(plan);
        result.project = Some(project);
        return result;
    }

    let mut default_reg;
    let registry = match registry {
        Some(registry) => registry,
        None => {
            default_reg = default_registry(opts.mock_mode);
            &mut default_reg
        }
    };

    let report = execute_plan(&plan, registry, &root, &opts.environment, opts.dry_run);

    // Persist state: last operation plus per-module action outcomes.
    let state_path = default_state_path(&root);
    let mut state = load_state(&state_path);
    state.project_name = project.name.clone();
    state.last_operation.operation_id = operation_id.clone();
    state.last_operation.automation = opts.capability.clone();
    state.last_operation.started_at = started_at;
    state.last_operation.ended_at = now_iso();
    state.last_operation.status = report.status().as_str().to_string();
    state.last_operation.actions_total = report.total() as u32;
    state.last_operation.actions_succeeded = report.succeeded() as u32;
    state.last_operation.actions_failed = report.failed() as u32;

    for (module_name, receipts) in report.module_receipts() {
        if let Some(last) = receipts.last() {
            let at = Some(last.started_at.clone());
            let status = Some(
                match last.status {
                    crate::core::action::ReceiptStatus::Ok => "ok",
                    crate::core::action::ReceiptStatus::Skipped => "skipped",
                    crate::core::action::ReceiptStatus::Failed => "failed",
                }
                .to_string(),
            );
            state.set_module_state(&module_name, |m| {
                m.last_action_at = at;
                m.last_action_status = status;
            });
        }
    }

    if let Err(e) = save_state(&mut state, &state_path) {
        warn!("Failed to persist state: {}", e);
    }

    // Audit: one self-contained entry per operation. A write failure is
    // logged, never fatal.
    let ledger = AuditLedger::default_for_root(&root);
    let entry = AuditEntry {
        operation_id: operation_id.clone(),
        operation_type: opts.capability.clone(),
        automation: opts.capability.clone(),
        status: report.status().as_str().to_string(),
        actions_total: report.total() as u32,
        actions_succeeded: report.succeeded() as u32,
        actions_failed: report.failed() as u32,
        modules_affected: report.module_receipts().keys().cloned().collect(),
        timestamp: now_iso(),
    };
    if let Err(e) = ledger.write(&entry) {
        warn!("Failed to write audit entry: {}", e);
    }

    // Queue failed actions for re-drive. Dry runs and mock runs produce
    // no real failures worth retrying.
    if !opts.dry_run && !opts.mock_mode {
        let mut queue = RetryQueue::open(RetryQueue::default_path(&root));
        for receipt in report.receipts.iter().filter(|r| r.failed()) {
            let params = plan
                .actions
                .iter()
                .find(|a| a.id == receipt.action_id)
                .map(|a| a.params.clone())
                .unwrap_or_default();
            queue.enqueue(
                &receipt.action_id,
                &receipt.action_id,
                &receipt.adapter,
                receipt.error.as_deref().unwrap_or(""),
                params,
            );
        }
    }

    result.report = Some(report);
    result.plan = Some(plan);
    result.project = Some(project);
    result
}

/// Result of a retry-queue re-drive pass.
#[derive(Debug, Default)]
pub struct RetryRunResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub exhausted: Vec<String>,
    pub remaining: usize,
    pub error: Option<String>,
}

impl RetryRunResult {
    pub fn to_json(&self) -> serde_json::Value {
        if let Some(error) = &self.error {
            return json!({ "error": error });
        }
        json!({
            "attempted": self.attempted,
            "succeeded": self.succeeded,
            "failed": self.failed,
            "exhausted": self.exhausted,
            "remaining": self.remaining,
        })
    }
}

/// Re-drive ready retry items through the adapter registry.
///
/// Each ready item is rebuilt into an action and dispatched; success
/// completes the item, failure re-schedules it, and exhausted items are
/// drained and reported.
pub fn run_retry(
    config_path: Option<&Path>,
    environment: &str,
    registry: Option<&mut AdapterRegistry>,
) -> RetryRunResult {
    let mut result = RetryRunResult::default();

    let Some(config_path) = resolve_config(config_path) else {
        result.error = Some("No project.yml found.".to_string());
        return result;
    };
    let root = project_root(&config_path);

    let mut queue = RetryQueue::open(RetryQueue::default_path(&root));

    let mut default_reg;
    let registry = match registry {
        Some(registry) => registry,
        None => {
            default_reg = default_registry(false);
            &mut default_reg
        }
    };

    let ready = queue.dequeue_ready();
    result.attempted = ready.len();

    for item in ready {
        let mut action = Action::new(&item.action_id, &item.adapter);
        action.params = item.params.clone();
        let module_path = action.param_str("_module_path").map(str::to_string);

        let receipt =
            registry.execute_action(action, &root, environment, module_path.as_deref(), false);

        if receipt.ok() {
            queue.complete(&item.id);
            result.succeeded += 1;
        } else {
            queue.fail(&item.id, receipt.error.as_deref().unwrap_or("retry failed"));
            result.failed += 1;
        }
    }

    result.exhausted = queue
        .remove_exhausted()
        .into_iter()
        .map(|item| item.id)
        .collect();
    result.remaining = queue.size();
    result
}

/// Inspect reliability components and roll up system health.
pub fn system_health(config_path: Option<&Path>) -> SystemHealth {
    let cb_registry = CircuitBreakerRegistry::new();

    let queue = resolve_config(config_path)
        .map(|config_path| project_root(&config_path))
        .map(|root| RetryQueue::open(RetryQueue::default_path(&root)))
        .unwrap_or_else(RetryQueue::in_memory);

    check_system_health(Some(&cb_registry), Some(&queue))
}
