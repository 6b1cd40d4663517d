//! Adapters: the protocol contract between engine and external tools.
//!
//! An adapter knows how to talk to exactly one external tool (shell, git,
//! docker, a language toolchain) and returns a [`Receipt`] for every
//! execution. The engine only ever talks to adapters through the
//! [`registry::AdapterRegistry`], never directly.
//!
//! The contract: `execute` never surfaces an error. Any failure, including
//! a missing binary, a timeout, or a spawn error, is encoded as a failed
//! Receipt.

pub mod docker;
pub mod filesystem;
pub mod git;
pub mod mock;
pub mod node;
pub mod python;
pub mod registry;
pub mod shell;

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::core::action::{Action, Receipt};

/// Default per-action timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Everything an adapter needs to execute an action: the action itself,
/// the project root, the environment, and the dry-run flag.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub action: Action,
    pub project_root: PathBuf,
    pub environment: String,
    pub module_path: Option<String>,
    pub dry_run: bool,
}

impl ExecutionContext {
    /// Resolved working directory: `project_root/module_path` when a
    /// module path is given, else the project root.
    pub fn working_dir(&self) -> PathBuf {
        match &self.module_path {
            Some(p) => self.project_root.join(p),
            None => self.project_root.clone(),
        }
    }

    /// The action's parameter bag.
    pub fn params(&self) -> &Map<String, Value> {
        &self.action.params
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.action.param_str(key)
    }

    /// Timeout for this action in seconds.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.action.param_u64("timeout", DEFAULT_TIMEOUT_SECS))
    }
}

/// The tool-binding protocol.
///
/// To add a new adapter: implement the four operations and register the
/// instance in the [`registry::AdapterRegistry`].
pub trait Adapter: Send + Sync {
    /// Stable identifier ("shell", "docker", "git", ...).
    fn name(&self) -> &str;

    /// Fast, non-failing availability check; typically "is the underlying
    /// binary on PATH?".
    fn is_available(&self) -> bool;

    /// Validate that the action can be executed. Returns `(ok, message)`
    /// where the message is empty when valid.
    fn validate(&self, context: &ExecutionContext) -> (bool, String);

    /// Execute the action and return a receipt. All failures are captured
    /// in the Receipt with `failed` status.
    fn execute(&self, context: &ExecutionContext) -> Receipt;
}

/// Whether `binary` resolves on PATH.
pub(crate) fn binary_on_path(binary: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file())
}

/// Outcome of a bounded subprocess run.
pub(crate) struct CommandOutcome {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Run a command with piped output and a hard deadline.
///
/// Output is drained on reader threads so a chatty child cannot block on
/// a full pipe while we poll its exit status. On deadline expiry the
/// child is killed and the outcome flagged as timed out.
pub(crate) fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
) -> std::io::Result<CommandOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;

    let stdout_handle = child.stdout.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    });
    let stderr_handle = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    });

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let code = loop {
        match child.try_wait()? {
            Some(status) => break status.code(),
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    timed_out = true;
                    break None;
                }
                std::thread::sleep(Duration::from_millis(25));
            }
        }
    };

    let stdout = stdout_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    Ok(CommandOutcome {
        code,
        stdout,
        stderr,
        timed_out,
    })
}
