//! Python toolchain adapter.
//!
//! Action params:
//!   operation   one of version, run, venv, pip_install
//!   command     raw command line from stack capabilities
//!   script      script path (for run)
//!   packages    space-separated package list (for pip_install)

use std::process::Command;

use serde_json::json;

use crate::adapters::{Adapter, ExecutionContext, binary_on_path, run_with_timeout};
use crate::core::action::Receipt;

const VALID_OPS: &[&str] = &["version", "run", "venv", "pip_install"];

pub struct PythonAdapter;

impl PythonAdapter {
    fn python_cmd() -> &'static str {
        if binary_on_path("python3") {
            "python3"
        } else {
            "python"
        }
    }

    fn exec(&self, args: &[&str], ctx: &ExecutionContext) -> Result<String, String> {
        let mut cmd = Command::new(Self::python_cmd());
        cmd.args(args).current_dir(ctx.working_dir());
        let outcome = run_with_timeout(&mut cmd, ctx.timeout())
            .map_err(|e| format!("python spawn error: {}", e))?;
        if outcome.timed_out {
            return Err(format!(
                "python timed out after {}s",
                ctx.timeout().as_secs()
            ));
        }
        if outcome.code != Some(0) {
            let stderr = outcome.stderr.trim();
            return Err(if stderr.is_empty() {
                format!("python exited with code {}", outcome.code.unwrap_or(-1))
            } else {
                stderr.to_string()
            });
        }
        Ok(outcome.stdout.trim().to_string())
    }
}

impl Adapter for PythonAdapter {
    fn name(&self) -> &str {
        "python"
    }

    fn is_available(&self) -> bool {
        binary_on_path("python3") || binary_on_path("python")
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
        if operation == "run" && context.param_str("script").unwrap_or_default().is_empty() {
            return (
                false,
                "Missing required param: 'script' for run operation".to_string(),
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

        let result = match operation {
            "version" => self.exec(&["--version"], context),
            "run" => {
                let script = context.param_str("script").unwrap_or_default();
                self.exec(&[script], context)
            }
            "venv" => self.exec(&["-m", "venv", ".venv"], context),
            "pip_install" => {
                let packages = context.param_str("packages").unwrap_or_default();
                let mut args = vec!["-m", "pip", "install"];
                if packages.is_empty() {
                    args.extend(["-e", "."]);
                } else {
                    args.extend(packages.split_whitespace());
                }
                self.exec(&args, context)
            }
            other => Err(format!("Unknown operation: {}", other)),
        };

        match result {
            Ok(output) => Receipt::success(self.name(), &action_id, output)
                .with_metadata("operation", json!(operation)),
            Err(e) => Receipt::failure(self.name(), &action_id, format!("Python error: {}", e))
                .with_metadata("operation", json!(operation)),
        }
    }
}
