//! Shell adapter: execute arbitrary commands and capture output.
//!
//! The most fundamental adapter; the other tool bindings follow the same
//! run-and-receipt pattern, and the planner falls back to this adapter
//! whenever a stack capability names no other.
//!
//! Action params:
//!   command   the command line to execute (required)
//!   timeout   seconds before the child is killed (default 300)
//!   cwd       override the working directory

use std::process::Command;

use serde_json::json;
use tracing::debug;

use crate::adapters::{Adapter, ExecutionContext, binary_on_path, run_with_timeout};
use crate::core::action::Receipt;

pub struct ShellAdapter;

impl Adapter for ShellAdapter {
    fn name(&self) -> &str {
        "shell"
    }

    fn is_available(&self) -> bool {
        binary_on_path("sh")
    }

    fn validate(&self, context: &ExecutionContext) -> (bool, String) {
        let command = context.param_str("command").unwrap_or_default();
        if command.is_empty() {
            return (false, "Missing required param: 'command'".to_string());
        }

        let cwd = match context.param_str("cwd") {
            Some(cwd) => std::path::PathBuf::from(cwd),
            None => context.working_dir(),
        };
        if !cwd.is_dir() {
            return (
                false,
                format!("Working directory does not exist: {}", cwd.display()),
            );
        }

        (true, String::new())
    }

    fn execute(&self, context: &ExecutionContext) -> Receipt {
        let action_id = &context.action.id;
        let command = context.param_str("command").unwrap_or_default().to_string();
        let cwd = match context.param_str("cwd") {
            Some(cwd) => std::path::PathBuf::from(cwd),
            None => context.working_dir(),
        };
        let timeout = context.timeout();

        debug!("Executing: {} (cwd={})", command, cwd.display());

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command).current_dir(&cwd);

        let outcome = match run_with_timeout(&mut cmd, timeout) {
            Ok(outcome) => outcome,
            Err(e) => {
                return Receipt::failure(
                    self.name(),
                    action_id,
                    format!("Command execution error: {}", e),
                )
                .with_metadata("command", json!(command));
            }
        };

        if outcome.timed_out {
            return Receipt::failure(
                self.name(),
                action_id,
                format!("Command timed out after {}s", timeout.as_secs()),
            )
            .with_metadata("command", json!(command))
            .with_metadata("timeout", json!(timeout.as_secs()));
        }

        let stdout = outcome.stdout.trim().to_string();
        let stderr = outcome.stderr.trim().to_string();

        match outcome.code {
            Some(0) => Receipt::success(self.name(), action_id, stdout)
                .with_metadata("command", json!(command))
                .with_metadata("return_code", json!(0))
                .with_metadata("stderr", json!(stderr)),
            code => {
                let error = if stderr.is_empty() {
                    format!("Command exited with code {}", code.unwrap_or(-1))
                } else {
                    stderr
                };
                Receipt::failure(self.name(), action_id, error)
                    .with_metadata("command", json!(command))
                    .with_metadata("return_code", json!(code))
                    .with_metadata("stdout", json!(stdout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::Action;
    use serde_json::json;
    use std::path::PathBuf;

    fn ctx(command: &str, dir: &std::path::Path) -> ExecutionContext {
        let mut action = Action::new("op:api:test", "shell");
        action.params.insert("command".to_string(), json!(command));
        ExecutionContext {
            action,
            project_root: dir.to_path_buf(),
            environment: "dev".to_string(),
            module_path: None,
            dry_run: false,
        }
    }

    #[test]
    fn test_validate_requires_command() {
        let adapter = ShellAdapter;
        let tmp = tempfile::tempdir().unwrap();
        let mut context = ctx("", tmp.path());
        context.action.params.remove("command");
        let (ok, msg) = adapter.validate(&context);
        assert!(!ok);
        assert!(msg.contains("command"));
    }

    #[test]
    fn test_validate_rejects_missing_cwd() {
        let adapter = ShellAdapter;
        let context = ExecutionContext {
            module_path: Some("does/not/exist".to_string()),
            ..ctx("true", &PathBuf::from("/tmp"))
        };
        let (ok, msg) = adapter.validate(&context);
        assert!(!ok);
        assert!(msg.contains("Working directory"));
    }

    #[test]
    fn test_execute_success_captures_stdout() {
        let adapter = ShellAdapter;
        let tmp = tempfile::tempdir().unwrap();
        let receipt = adapter.execute(&ctx("echo hello", tmp.path()));
        assert!(receipt.ok());
        assert_eq!(receipt.output, "hello");
        assert_eq!(receipt.metadata["return_code"], json!(0));
    }

    #[test]
    fn test_execute_nonzero_is_failure_with_stderr() {
        let adapter = ShellAdapter;
        let tmp = tempfile::tempdir().unwrap();
        let receipt = adapter.execute(&ctx("echo broken >&2; exit 3", tmp.path()));
        assert!(receipt.failed());
        assert_eq!(receipt.error.as_deref(), Some("broken"));
        assert_eq!(receipt.metadata["return_code"], json!(3));
    }

    #[test]
    fn test_execute_timeout_is_failure() {
        let adapter = ShellAdapter;
        let tmp = tempfile::tempdir().unwrap();
        let mut context = ctx("sleep 10", tmp.path());
        context.action.params.insert("timeout".to_string(), json!(1));
        let receipt = adapter.execute(&context);
        assert!(receipt.failed());
        assert!(receipt.error.as_deref().unwrap().contains("timed out"));
    }
}
