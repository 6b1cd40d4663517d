//! Git adapter: version control operations through the git CLI.
//!
//! Accepts either a raw `command` (how stack capabilities arrive) or a
//! named `operation` with its own params.
//!
//! Action params:
//!   operation   one of status, commit, push, pull, log, branch, diff, init
//!   command     raw command line, run through the shell pattern instead
//!   message     commit message (required for commit)
//!   branch      target branch (for branch)
//!   count       number of log entries (default 10)
//!   timeout     seconds (default 300)

use std::path::Path;
use std::process::Command;

use serde_json::json;

use crate::adapters::{Adapter, ExecutionContext, binary_on_path, run_with_timeout};
use crate::core::action::Receipt;

const VALID_OPS: &[&str] = &[
    "status", "commit", "push", "pull", "log", "branch", "diff", "init",
];

pub struct GitAdapter;

impl GitAdapter {
    fn git(&self, args: &[&str], cwd: &Path, context: &ExecutionContext) -> Result<String, String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(cwd);
        let outcome = run_with_timeout(&mut cmd, context.timeout())
            .map_err(|e| format!("git spawn error: {}", e))?;
        if outcome.timed_out {
            return Err(format!(
                "git {} timed out after {}s",
                args.first().unwrap_or(&""),
                context.timeout().as_secs()
            ));
        }
        if outcome.code != Some(0) {
            let stderr = outcome.stderr.trim();
            return Err(if stderr.is_empty() {
                format!("git exited with code {}", outcome.code.unwrap_or(-1))
            } else {
                stderr.to_string()
            });
        }
        Ok(outcome.stdout)
    }

    fn status(&self, ctx: &ExecutionContext) -> Result<Receipt, String> {
        let cwd = ctx.working_dir();
        let branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"], &cwd, ctx)?;
        let porcelain = self.git(&["status", "--porcelain"], &cwd, ctx)?;
        let dirty = !porcelain.trim().is_empty();
        let changes = if dirty { porcelain.trim().lines().count() } else { 0 };

        Ok(Receipt::success(
            self.name(),
            &ctx.action.id,
            format!("branch={}, dirty={}", branch.trim(), dirty),
        )
        .with_metadata("branch", json!(branch.trim()))
        .with_metadata("dirty", json!(dirty))
        .with_metadata("changes", json!(changes)))
    }

    fn commit(&self, ctx: &ExecutionContext) -> Result<Receipt, String> {
        let cwd = ctx.working_dir();
        let message = ctx.param_str("message").unwrap_or_default();
        self.git(&["add", "-A"], &cwd, ctx)?;
        let output = self.git(&["commit", "-m", message], &cwd, ctx)?;
        Ok(Receipt::success(self.name(), &ctx.action.id, output.trim().to_string()))
    }

    fn log(&self, ctx: &ExecutionContext) -> Result<Receipt, String> {
        let cwd = ctx.working_dir();
        let count = ctx.action.param_u64("count", 10).to_string();
        let output = self.git(&["log", "--oneline", "-n", &count], &cwd, ctx)?;
        Ok(Receipt::success(self.name(), &ctx.action.id, output.trim().to_string()))
    }

    fn simple(&self, ctx: &ExecutionContext, args: &[&str]) -> Result<Receipt, String> {
        let cwd = ctx.working_dir();
        let output = self.git(args, &cwd, ctx)?;
        Ok(Receipt::success(self.name(), &ctx.action.id, output.trim().to_string()))
    }
}

impl Adapter for GitAdapter {
    fn name(&self) -> &str {
        "git"
    }

    fn is_available(&self) -> bool {
        binary_on_path("git")
    }

    fn validate(&self, context: &ExecutionContext) -> (bool, String) {
        let operation = context.param_str("operation").unwrap_or_default();
        if operation.is_empty() {
            // Command-style execution from stack capabilities.
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
        if operation == "commit" && context.param_str("message").unwrap_or_default().is_empty() {
            return (
                false,
                "Missing required param: 'message' for commit operation".to_string(),
            );
        }
        (true, String::new())
    }

    fn execute(&self, context: &ExecutionContext) -> Receipt {
        let action_id = context.action.id.clone();

        let operation = context.param_str("operation").unwrap_or_default();
        if operation.is_empty() {
            // Raw command from stack capabilities: delegate to the shell
            // pattern with this adapter's identity.
            let receipt = crate::adapters::shell::ShellAdapter.execute(context);
            return Receipt {
                adapter: self.name().to_string(),
                ..receipt
            };
        }

        let result = match operation {
            "status" => self.status(context),
            "commit" => self.commit(context),
            "push" => self.simple(context, &["push"]),
            "pull" => self.simple(context, &["pull", "--ff-only"]),
            "log" => self.log(context),
            "branch" => match context.param_str("branch") {
                Some(branch) => self.simple(context, &["checkout", "-B", branch]),
                None => self.simple(context, &["branch", "--show-current"]),
            },
            "diff" => self.simple(context, &["diff", "--stat"]),
            "init" => self.simple(context, &["init"]),
            other => Err(format!("Unknown operation: {}", other)),
        };

        match result {
            Ok(receipt) => receipt,
            Err(e) => Receipt::failure(self.name(), &action_id, format!("Git error: {}", e))
                .with_metadata("operation", json!(operation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::Action;

    fn ctx(root: &std::path::Path, params: &[(&str, serde_json::Value)]) -> ExecutionContext {
        let mut action = Action::new("op:repo:git", "git");
        for (k, v) in params {
            action.params.insert(k.to_string(), v.clone());
        }
        ExecutionContext {
            action,
            project_root: root.to_path_buf(),
            environment: "dev".to_string(),
            module_path: None,
            dry_run: false,
        }
    }

    #[test]
    fn test_validate_requires_operation_or_command() {
        let adapter = GitAdapter;
        let tmp = tempfile::tempdir().unwrap();
        let (ok, _) = adapter.validate(&ctx(tmp.path(), &[]));
        assert!(!ok);
        let (ok, _) = adapter.validate(&ctx(tmp.path(), &[("command", json!("git fetch"))]));
        assert!(ok);
    }

    #[test]
    fn test_validate_commit_requires_message() {
        let adapter = GitAdapter;
        let tmp = tempfile::tempdir().unwrap();
        let (ok, msg) = adapter.validate(&ctx(tmp.path(), &[("operation", json!("commit"))]));
        assert!(!ok);
        assert!(msg.contains("message"));
    }

    #[test]
    fn test_init_then_status() {
        if !binary_on_path("git") {
            return;
        }
        let adapter = GitAdapter;
        let tmp = tempfile::tempdir().unwrap();

        let receipt = adapter.execute(&ctx(tmp.path(), &[("operation", json!("init"))]));
        assert!(receipt.ok(), "init failed: {:?}", receipt.error);

        std::fs::write(tmp.path().join("a.txt"), "x").unwrap();
        let receipt = adapter.execute(&ctx(tmp.path(), &[("operation", json!("status"))]));
        assert!(receipt.ok(), "status failed: {:?}", receipt.error);
        assert_eq!(receipt.metadata["dirty"], json!(true));
    }

    #[test]
    fn test_status_outside_repo_is_failure() {
        if !binary_on_path("git") {
            return;
        }
        let adapter = GitAdapter;
        let tmp = tempfile::tempdir().unwrap();
        let receipt = adapter.execute(&ctx(tmp.path(), &[("operation", json!("status"))]));
        assert!(receipt.failed());
    }
}
