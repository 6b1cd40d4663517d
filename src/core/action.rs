//! Action and Receipt models: the execution contract.
//!
//! Actions represent requested operations. Receipts represent results.
//! This is the fundamental I/O contract between the engine and adapters:
//! the engine sends Actions, adapters return Receipts. Never errors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::time::{new_delivery_id, now_iso};

/// A requested operation to be executed by an adapter.
///
/// Actions are the engine's way of saying "do this thing." They are created
/// by the planner and consumed once by the adapter registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Unique action identifier, typically `<op-id>:<module>:<capability>`.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Which adapter handles this.
    pub adapter: String,
    /// Stack capability name.
    #[serde(default)]
    pub capability: String,
    /// Opaque parameter bag. Keys prefixed with `_` are engine-provided
    /// metadata (`_stack`, `_module_path`, `_description`); adapters parse
    /// only the subset they care about.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Target module. `None` means project-wide.
    #[serde(default)]
    pub for_module: Option<String>,
}

impl Action {
    pub fn new(id: impl Into<String>, adapter: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            adapter: adapter.into(),
            capability: String::new(),
            params: Map::new(),
            for_module: None,
        }
    }

    /// String-typed param lookup.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Integer param with fallback (used for `timeout` and friends).
    pub fn param_u64(&self, key: &str, default: u64) -> u64 {
        self.params.get(key).and_then(Value::as_u64).unwrap_or(default)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Ok,
    Skipped,
    Failed,
}

/// Result of an adapter execution.
///
/// Receipts capture the full outcome of an action. An adapter NEVER
/// surfaces an error to the registry; failures are captured here. This is
/// the keystone invariant of the whole system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Receipt {
    pub adapter: String,
    pub action_id: String,
    pub status: ReceiptStatus,

    pub started_at: String,
    pub ended_at: String,
    #[serde(default)]
    pub duration_ms: u64,

    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    /// Unique execution trace identifier.
    #[serde(default)]
    pub delivery_id: Option<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Receipt {
    fn base(adapter: &str, action_id: &str, status: ReceiptStatus) -> Self {
        let now = now_iso();
        Self {
            adapter: adapter.to_string(),
            action_id: action_id.to_string(),
            status,
            started_at: now.clone(),
            ended_at: now,
            duration_ms: 0,
            output: String::new(),
            error: None,
            delivery_id: Some(new_delivery_id()),
            metadata: Map::new(),
        }
    }

    /// Create a success receipt.
    pub fn success(adapter: &str, action_id: &str, output: impl Into<String>) -> Self {
        let mut r = Self::base(adapter, action_id, ReceiptStatus::Ok);
        r.output = output.into();
        r
    }

    /// Create a failure receipt.
    pub fn failure(adapter: &str, action_id: &str, error: impl Into<String>) -> Self {
        let mut r = Self::base(adapter, action_id, ReceiptStatus::Failed);
        r.error = Some(error.into());
        r
    }

    /// Create a skip receipt. The reason lands in `output`.
    pub fn skip(adapter: &str, action_id: &str, reason: impl Into<String>) -> Self {
        let mut r = Self::base(adapter, action_id, ReceiptStatus::Skipped);
        r.output = reason.into();
        r
    }

    /// Builder-style metadata attachment.
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn ok(&self) -> bool {
        self.status == ReceiptStatus::Ok
    }

    pub fn failed(&self) -> bool {
        self.status == ReceiptStatus::Failed
    }

    pub fn skipped(&self) -> bool {
        self.status == ReceiptStatus::Skipped
    }
}
