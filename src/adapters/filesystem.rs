//! Filesystem adapter: file and directory operations with receipts.
//!
//! A safe, auditable interface for the handful of filesystem operations
//! the engine may plan, so they flow through the same dry-run and
//! receipt discipline as everything else.
//!
//! Action params:
//!   operation   one of exists, read, write, mkdir, list (required)
//!   path        target, relative to the working directory or absolute
//!   content     payload for the write operation

use std::path::PathBuf;

use serde_json::json;

use crate::adapters::{Adapter, ExecutionContext};
use crate::core::action::Receipt;

const VALID_OPS: &[&str] = &["exists", "read", "write", "mkdir", "list"];

pub struct FilesystemAdapter;

impl FilesystemAdapter {
    fn resolve(&self, context: &ExecutionContext, raw: &str) -> PathBuf {
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            context.working_dir().join(path)
        }
    }
}

impl Adapter for FilesystemAdapter {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn validate(&self, context: &ExecutionContext) -> (bool, String) {
        let operation = context.param_str("operation").unwrap_or_default();
        if operation.is_empty() {
            return (false, "Missing required param: 'operation'".to_string());
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
        if context.param_str("path").unwrap_or_default().is_empty() {
            return (false, "Missing required param: 'path'".to_string());
        }
        if operation == "write" && context.param_str("content").is_none() {
            return (
                false,
                "Missing required param: 'content' for write operation".to_string(),
            );
        }
        (true, String::new())
    }

    fn execute(&self, context: &ExecutionContext) -> Receipt {
        let action_id = &context.action.id;
        let operation = context.param_str("operation").unwrap_or_default();
        let path = self.resolve(context, context.param_str("path").unwrap_or_default());

        let result = match operation {
            "exists" => {
                let exists = path.exists();
                return Receipt::success(self.name(), action_id, exists.to_string())
                    .with_metadata("path", json!(path.display().to_string()))
                    .with_metadata("exists", json!(exists));
            }
            "read" => std::fs::read_to_string(&path),
            "write" => {
                let content = context.param_str("content").unwrap_or_default();
                std::fs::write(&path, content).map(|_| format!("wrote {} bytes", content.len()))
            }
            "mkdir" => std::fs::create_dir_all(&path).map(|_| format!("created {}", path.display())),
            "list" => std::fs::read_dir(&path).map(|entries| {
                let mut names: Vec<String> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                names.join("\n")
            }),
            other => {
                return Receipt::failure(
                    self.name(),
                    action_id,
                    format!("Unknown operation: {}", other),
                );
            }
        };

        match result {
            Ok(output) => Receipt::success(self.name(), action_id, output)
                .with_metadata("operation", json!(operation))
                .with_metadata("path", json!(path.display().to_string())),
            Err(e) => Receipt::failure(
                self.name(),
                action_id,
                format!("Filesystem error: {}", e),
            )
            .with_metadata("operation", json!(operation))
            .with_metadata("path", json!(path.display().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::Action;

    fn ctx(op: &str, path: &str, root: &std::path::Path) -> ExecutionContext {
        let mut action = Action::new("op:api:fs", "filesystem");
        action.params.insert("operation".to_string(), json!(op));
        action.params.insert("path".to_string(), json!(path));
        ExecutionContext {
            action,
            project_root: root.to_path_buf(),
            environment: "dev".to_string(),
            module_path: None,
            dry_run: false,
        }
    }

    #[test]
    fn test_validate_rejects_unknown_operation() {
        let adapter = FilesystemAdapter;
        let tmp = tempfile::tempdir().unwrap();
        let (ok, msg) = adapter.validate(&ctx("truncate", "x", tmp.path()));
        assert!(!ok);
        assert!(msg.contains("Unknown operation"));
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let adapter = FilesystemAdapter;
        let tmp = tempfile::tempdir().unwrap();

        let mut context = ctx("write", "note.txt", tmp.path());
        context
            .action
            .params
            .insert("content".to_string(), json!("hello"));
        assert!(adapter.execute(&context).ok());

        let receipt = adapter.execute(&ctx("read", "note.txt", tmp.path()));
        assert!(receipt.ok());
        assert_eq!(receipt.output, "hello");
    }

    #[test]
    fn test_read_missing_file_is_failure() {
        let adapter = FilesystemAdapter;
        let tmp = tempfile::tempdir().unwrap();
        let receipt = adapter.execute(&ctx("read", "ghost.txt", tmp.path()));
        assert!(receipt.failed());
    }

    #[test]
    fn test_exists_and_mkdir_and_list() {
        let adapter = FilesystemAdapter;
        let tmp = tempfile::tempdir().unwrap();

        let receipt = adapter.execute(&ctx("exists", "sub", tmp.path()));
        assert_eq!(receipt.output, "false");

        assert!(adapter.execute(&ctx("mkdir", "sub", tmp.path())).ok());
        std::fs::write(tmp.path().join("sub/a.txt"), "").unwrap();
        std::fs::write(tmp.path().join("sub/b.txt"), "").unwrap();

        let receipt = adapter.execute(&ctx("list", "sub", tmp.path()));
        assert_eq!(receipt.output, "a.txt\nb.txt");
    }
}
