//! Docker adapter: container operations through the docker CLI.
//!
//! Action params:
//!   operation   one of ps, images, build, up, down, logs, version
//!   command     raw command line from stack capabilities
//!   tag         image tag (for build, default module name)
//!   service     compose service name (for logs)

use std::process::Command;

use serde_json::json;

use crate::adapters::{Adapter, ExecutionContext, binary_on_path, run_with_timeout};
use crate::core::action::Receipt;

const VALID_OPS: &[&str] = &["ps", "images", "build", "up", "down", "logs", "version"];

pub struct DockerAdapter;

impl DockerAdapter {
    fn docker(&self, args: &[&str], ctx: &ExecutionContext) -> Result<String, String> {
        let mut cmd = Command::new("docker");
        cmd.args(args).current_dir(ctx.working_dir());
        let outcome = run_with_timeout(&mut cmd, ctx.timeout())
            .map_err(|e| format!("docker spawn error: {}", e))?;
        if outcome.timed_out {
            return Err(format!(
                "docker {} timed out after {}s",
                args.first().unwrap_or(&""),
                ctx.timeout().as_secs()
            ));
        }
        if outcome.code != Some(0) {
            let stderr = outcome.stderr.trim();
            return Err(if stderr.is_empty() {
                format!("docker exited with code {}", outcome.code.unwrap_or(-1))
            } else {
                stderr.to_string()
            });
        }
        Ok(outcome.stdout.trim().to_string())
    }
}

impl Adapter for DockerAdapter {
    fn name(&self) -> &str {
        "docker"
    }

    fn is_available(&self) -> bool {
        binary_on_path("docker")
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

        let tag_owned;
        let result = match operation {
            "ps" => self.docker(&["ps", "--format", "{{.Names}}\t{{.Status}}"], context),
            "images" => self.docker(
                &["images", "--format", "{{.Repository}}:{{.Tag}}"],
                context,
            ),
            "build" => {
                tag_owned = context
                    .param_str("tag")
                    .map(str::to_string)
                    .or_else(|| context.action.for_module.clone())
                    .unwrap_or_else(|| "latest".to_string());
                self.docker(&["build", "-t", &tag_owned, "."], context)
            }
            "up" => self.docker(&["compose", "up", "-d"], context),
            "down" => self.docker(&["compose", "down"], context),
            "logs" => match context.param_str("service") {
                Some(service) => self.docker(&["compose", "logs", "--tail", "100", service], context),
                None => self.docker(&["compose", "logs", "--tail", "100"], context),
            },
            "version" => self.docker(&["--version"], context),
            other => Err(format!("Unknown operation: {}", other)),
        };

        match result {
            Ok(output) => Receipt::success(self.name(), &action_id, output)
                .with_metadata("operation", json!(operation)),
            Err(e) => Receipt::failure(self.name(), &action_id, format!("Docker error: {}", e))
                .with_metadata("operation", json!(operation)),
        }
    }
}
