//! Engine: the central planning and orchestration loop.
//!
//! Takes a capability request, resolves targets, builds actions from
//! stack capabilities, executes them through the adapter registry,
//! and collects receipts.
//!
//! Flow: request -> resolve modules -> build actions -> execute -> receipts

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tracing::{debug, info};

use crate::adapters::registry::AdapterRegistry;
use crate::core::action::{Action, Receipt};
use crate::core::project::Module;
use crate::core::stack::{Stack, StackCatalog};

/// A planned, totally-ordered set of actions for one operation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub operation_id: String,
    pub automation: String,
    pub actions: Vec<Action>,
}

impl ExecutionPlan {
    pub fn total_actions(&self) -> usize {
        self.actions.len()
    }

    /// Actions grouped by target module, in plan order.
    pub fn actions_for_module(&self, module: &str) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.for_module.as_deref() == Some(module))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Ok,
    Partial,
    Failed,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Ok => "ok",
            ReportStatus::Partial => "partial",
            ReportStatus::Failed => "failed",
        }
    }
}

/// Result of executing a plan: a parallel container of receipts with
/// derived counters.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub operation_id: String,
    pub automation: String,
    pub receipts: Vec<Receipt>,
}

impl ExecutionReport {
    pub fn total(&self) -> usize {
        self.receipts.len()
    }

    pub fn succeeded(&self) -> usize {
        self.receipts.iter().filter(|r| r.ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.receipts.iter().filter(|r| r.failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.receipts.iter().filter(|r| r.skipped()).count()
    }

    pub fn all_ok(&self) -> bool {
        self.failed() == 0
    }

    /// Tri-state status: `ok` when nothing failed and something succeeded
    /// (an empty plan counts as ok), `failed` when nothing succeeded and
    /// something failed, `partial` otherwise. Skipped receipts count
    /// toward neither side.
    pub fn status(&self) -> ReportStatus {
        let succeeded = self.succeeded();
        let failed = self.failed();
        if failed == 0 && (succeeded > 0 || self.total() == 0) {
            ReportStatus::Ok
        } else if succeeded == 0 && failed > 0 {
            ReportStatus::Failed
        } else {
            ReportStatus::Partial
        }
    }

    /// Receipts grouped by module name (from the action id's middle
    /// segment recorded at dispatch), insertion order within each group.
    pub fn module_receipts(&self) -> BTreeMap<String, Vec<&Receipt>> {
        let mut grouped: BTreeMap<String, Vec<&Receipt>> = BTreeMap::new();
        for receipt in &self.receipts {
            let module = receipt
                .action_id
                .split(':')
                .nth(1)
                .unwrap_or("unknown")
                .to_string();
            grouped.entry(module).or_default().push(receipt);
        }
        grouped
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "operation_id": self.operation_id,
            "automation": self.automation,
            "status": self.status().as_str(),
            "total": self.total(),
            "succeeded": self.succeeded(),
            "failed": self.failed(),
            "skipped": self.skipped(),
            "receipts": self.receipts,
        })
    }
}

/// Resolve a stack name with the flavor fallback.
///
/// Exact match first, then the name with the suffix after the last
/// hyphen stripped: `python-lib` resolves to `python`. This lets users
/// declare fine-grained variants while reusing coarse stack definitions,
/// and is the only place the fallback appears.
pub fn resolve_stack<'a>(name: &str, stacks: &'a StackCatalog) -> Option<&'a Stack> {
    if let Some(stack) = stacks.get(name) {
        return Some(stack);
    }
    if let Some((base, _)) = name.rsplit_once('-') {
        return stacks.get(base);
    }
    None
}

/// Build an execution plan for a capability across the target modules.
///
/// Modules without an effective stack, with an unresolvable stack, or
/// whose stack lacks the capability are skipped.
pub fn build_actions(
    capability_name: &str,
    modules: &[Module],
    stacks: &StackCatalog,
    operation_id: &str,
) -> ExecutionPlan {
    let mut plan = ExecutionPlan {
        operation_id: operation_id.to_string(),
        automation: capability_name.to_string(),
        actions: Vec::new(),
    };

    for module in modules {
        let stack_name = module.effective_stack();
        if stack_name.is_empty() {
            debug!("Module '{}' has no stack, skipping", module.name);
            continue;
        }

        let Some(stack) = resolve_stack(stack_name, stacks) else {
            debug!(
                "Stack '{}' not found for module '{}'",
                stack_name, module.name
            );
            continue;
        };

        let Some(capability) = stack.get_capability(capability_name) else {
            debug!(
                "Stack '{}' has no capability '{}'",
                stack_name, capability_name
            );
            continue;
        };

        let adapter = if capability.adapter.is_empty() {
            "shell"
        } else {
            &capability.adapter
        };

        let mut action = Action::new(
            format!("{}:{}:{}", operation_id, module.name, capability_name),
            adapter,
        );
        action.capability = capability_name.to_string();
        action.for_module = Some(module.name.clone());
        action.params.insert("command".into(), json!(capability.command));
        action
            .params
            .insert("capability".into(), json!(capability_name));
        action.params.insert("_stack".into(), json!(stack_name));
        action
            .params
            .insert("_module_path".into(), json!(module.path));
        action
            .params
            .insert("_description".into(), json!(capability.description));

        plan.actions.push(action);
    }

    plan
}

/// Execute all actions in a plan through the adapter registry,
/// sequentially and in plan order.
pub fn execute_plan(
    plan: &ExecutionPlan,
    registry: &mut AdapterRegistry,
    project_root: &Path,
    environment: &str,
    dry_run: bool,
) -> ExecutionReport {
    let mut report = ExecutionReport {
        operation_id: plan.operation_id.clone(),
        automation: plan.automation.clone(),
        receipts: Vec::new(),
    };

    for action in &plan.actions {
        let module_path = action.param_str("_module_path").map(str::to_string);
        let module_name = action.for_module.clone().unwrap_or_default();

        let receipt = registry.execute_action(
            action.clone(),
            project_root,
            environment,
            module_path.as_deref(),
            dry_run,
        );

        let glyph = if receipt.ok() {
            "✓"
        } else if receipt.failed() {
            "✗"
        } else {
            "⊘"
        };
        info!(
            "{} {}:{} -> {}",
            glyph,
            module_name,
            plan.automation,
            match receipt.status {
                crate::core::action::ReceiptStatus::Ok => "ok",
                crate::core::action::ReceiptStatus::Skipped => "skipped",
                crate::core::action::ReceiptStatus::Failed => "failed",
            }
        );

        report.receipts.push(receipt);
    }

    report
}

/// Generate a unique operation id: `op-<YYYYMMDD-HHMMSS>-<6 hex>` from a
/// UTC timestamp and six hex characters of randomness.
pub fn generate_operation_id() -> String {
    let now = Utc::now().format("%Y%m%d-%H%M%S");
    let short: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("op-{}-{:06x}", now, short)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::Receipt;
    use crate::core::project::{Module, ModuleRef};
    use crate::core::stack::{DetectionRule, StackCapability};

    fn module(name: &str, stack: &str) -> Module {
        let mut m = Module::undetected(&ModuleRef {
            name: name.to_string(),
            path: format!("src/{name}"),
            domain: "service".to_string(),
            stack: stack.to_string(),
            description: String::new(),
        });
        m.detected = true;
        m
    }

    fn python_stack() -> Stack {
        Stack {
            name: "python".to_string(),
            description: String::new(),
            detail: String::new(),
            domain: "service".to_string(),
            icon: String::new(),
            parent: None,
            requires: Vec::new(),
            detection: DetectionRule::default(),
            capabilities: vec![StackCapability {
                name: "test".to_string(),
                adapter: String::new(),
                command: "pytest".to_string(),
                description: String::new(),
            }],
        }
    }

    #[test]
    fn test_build_actions_flavor_fallback() {
        let stacks = StackCatalog::from_stacks(vec![python_stack()]);
        let modules = vec![module("api", "python-fastapi")];
        let plan = build_actions("test", &modules, &stacks, "op-x");

        assert_eq!(plan.total_actions(), 1);
        let action = &plan.actions[0];
        assert_eq!(action.id, "op-x:api:test");
        assert_eq!(action.adapter, "shell");
        assert_eq!(action.param_str("command"), Some("pytest"));
        assert_eq!(action.param_str("_stack"), Some("python-fastapi"));
        assert_eq!(action.param_str("_module_path"), Some("src/api"));
    }

    #[test]
    fn test_build_actions_skips_unplannable_modules() {
        let stacks = StackCatalog::from_stacks(vec![python_stack()]);
        let modules = vec![
            module("api", "python"),
            module("web", ""),           // no stack
            module("infra", "terraform"), // unknown stack
        ];
        let plan = build_actions("test", &modules, &stacks, "op-x");
        assert_eq!(plan.total_actions(), 1);
        assert_eq!(plan.actions[0].for_module.as_deref(), Some("api"));
    }

    #[test]
    fn test_build_actions_skips_missing_capability() {
        let stacks = StackCatalog::from_stacks(vec![python_stack()]);
        let modules = vec![module("api", "python")];
        let plan = build_actions("deploy", &modules, &stacks, "op-x");
        assert_eq!(plan.total_actions(), 0);
    }

    #[test]
    fn test_report_status_rule() {
        let mut report = ExecutionReport::default();
        assert_eq!(report.status(), ReportStatus::Ok); // empty plan

        report.receipts.push(Receipt::success("shell", "op:a:t", ""));
        assert_eq!(report.status(), ReportStatus::Ok);

        report.receipts.push(Receipt::failure("shell", "op:b:t", "x"));
        assert_eq!(report.status(), ReportStatus::Partial);

        report.receipts.clear();
        report.receipts.push(Receipt::failure("shell", "op:a:t", "x"));
        assert_eq!(report.status(), ReportStatus::Failed);
    }

    #[test]
    fn test_report_counters_partition() {
        let mut report = ExecutionReport::default();
        report.receipts.push(Receipt::success("shell", "op:a:t", ""));
        report.receipts.push(Receipt::failure("shell", "op:b:t", "x"));
        report.receipts.push(Receipt::skip("shell", "op:c:t", "later"));

        assert_eq!(report.total(), 3);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(
            report.total(),
            report.succeeded() + report.failed() + report.skipped()
        );
        assert!(!report.all_ok());
    }

    #[test]
    fn test_module_receipts_groups_by_action_id() {
        let mut report = ExecutionReport::default();
        report.receipts.push(Receipt::success("shell", "op:api:test", ""));
        report.receipts.push(Receipt::success("shell", "op:web:test", ""));
        report.receipts.push(Receipt::failure("shell", "op:api:lint", "x"));

        let grouped = report.module_receipts();
        assert_eq!(grouped["api"].len(), 2);
        assert_eq!(grouped["web"].len(), 1);
    }

    #[test]
    fn test_operation_id_format_and_uniqueness() {
        let id = generate_operation_id();
        assert!(id.starts_with("op-"));
        // op-YYYYMMDD-HHMMSS-xxxxxx
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 6);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(generate_operation_id()));
        }
    }

    #[test]
    fn test_resolve_stack_exact_beats_fallback() {
        let mut fastapi = python_stack();
        fastapi.name = "python-fastapi".to_string();
        let stacks = StackCatalog::from_stacks(vec![fastapi, python_stack()]);
        assert_eq!(
            resolve_stack("python-fastapi", &stacks).unwrap().name,
            "python-fastapi"
        );
        assert_eq!(resolve_stack("python-lib", &stacks).unwrap().name, "python");
        assert!(resolve_stack("golang", &stacks).is_none());
    }
}
