//! Node toolchain adapter.
//!
//! Detects the package manager from lockfiles (pnpm, yarn, npm) and
//! exposes a small set of named operations next to the raw command path.
//!
//! Action params:
//!   operation   one of version, run, install, script
//!   command     raw command line from stack capabilities
//!   script      package.json script name (for script) or js file (for run)

use std::path::Path;
use std::process::Command;

use serde_json::json;

use crate::adapters::{Adapter, ExecutionContext, binary_on_path, run_with_timeout};
use crate::core::action::Receipt;

const VALID_OPS: &[&str] = &["version", "run", "install", "script"];

pub struct NodeAdapter;

impl NodeAdapter {
    fn package_manager(cwd: &Path) -> &'static str {
        if cwd.join("pnpm-lock.yaml").is_file() && binary_on_path("pnpm") {
            "pnpm"
        } else if cwd.join("yarn.lock").is_file() && binary_on_path("yarn") {
            "yarn"
        } else {
            "npm"
        }
    }

    fn exec(&self, program: &str, args: &[&str], ctx: &ExecutionContext) -> Result<String, String> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(ctx.working_dir());
        let outcome = run_with_timeout(&mut cmd, ctx.timeout())
            .map_err(|e| format!("{} spawn error: {}", program, e))?;
        if outcome.timed_out {
            return Err(format!(
                "{} timed out after {}s",
                program,
                ctx.timeout().as_secs()
            ));
        }
        if outcome.code != Some(0) {
            let stderr = outcome.stderr.trim();
            return Err(if stderr.is_empty() {
                format!("{} exited with code {}", program, outcome.code.unwrap_or(-1))
            } else {
                stderr.to_string()
            });
        }
        Ok(outcome.stdout.trim().to_string())
    }
}

impl Adapter for NodeAdapter {
    fn name(&self) -> &str {
        "node"
    }

    fn is_available(&self) -> bool {
        binary_on_path("node")
    }

    fn validate(&self, context: &ExecutionContext) -> (bool, String) {
        let operation = context.param_str("operation").unwrap_or_default();
        if operation.is_empty() {
            if !context.param_str("command").unwrap_or_default().is_empty() {
                return (true, String::new());
            }
            return (
                false,
                "Missing required param: 'operation' or 'command'".to_string(),
            );
        }
        if !VALID_OPS.contains(&operation) {
            return (
                false,
                format!(
                    "Unknown operation '{}'. Valid: {}",
                    operation,
                    VALID_OPS.join(", ")
                ),
            );
        }
        if matches!(operation, "run" | "script")
            && context.param_str("script").unwrap_or_default().is_empty()
        {
            return (
                false,
                format!("Missing required param: 'script' for {} operation", operation),
            );
        }
        (true, String::new())
    }

    fn execute(&self, context: &ExecutionContext) -> Receipt {
        let action_id = context.action.id.clone();

        let operation = context.param_str("operation").unwrap_or_default();
        if operation.is_empty() {
            let receipt = crate::adapters::shell::ShellAdapter.execute(context);
            return Receipt {
                adapter: self.name().to_string(),
                ..receipt
            };
        }

        let pm = Self::package_manager(&context.working_dir());
        let result = match operation {
            "version" => self.exec("node", &["--version"], context),
            "run" => {
                let script = context.param_str("script").unwrap_or_default();
                self.exec("node", &[script], context)
            }
            "install" => self.exec(pm, &["install"], context),
            "script" => {
                let script = context.param_str("script").unwrap_or_default();
                self.exec(pm, &["run", script], context)
            }
            other => Err(format!("Unknown operation: {}", other)),
        };

        match result {
            Ok(output) => Receipt::success(self.name(), &action_id, output)
                .with_metadata("operation", json!(operation))
                .with_metadata("package_manager", json!(pm)),
            Err(e) => Receipt::failure(self.name(), &action_id, format!("Node error: {}", e))
                .with_metadata("operation", json!(operation)),
        }
    }
}
