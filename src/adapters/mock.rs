//! Mock adapter: universal test double for adapter operations.
//!
//! Used in mock mode and in tests to simulate adapter behavior without
//! touching external tools. Clones share state, so a test can keep a
//! handle while the registry owns the boxed instance.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use serde_json::json;

use crate::adapters::{Adapter, ExecutionContext};
use crate::core::action::Receipt;

#[derive(Default)]
struct MockState {
    responses: FxHashMap<String, Receipt>,
    call_log: Vec<String>,
    invalid_reason: Option<String>,
}

/// Configurable mock. Returns success for everything by default; custom
/// responses can be installed per action id.
#[derive(Clone)]
pub struct MockAdapter {
    name: String,
    available: bool,
    default_output: String,
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: true,
            default_output: "[mock] executed".to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Number of times `execute` has been called.
    pub fn call_count(&self) -> usize {
        self.state.lock().map(|s| s.call_log.len()).unwrap_or(0)
    }

    /// Action ids this mock has executed, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.call_log.clone())
            .unwrap_or_default()
    }

    /// Install a custom response for a specific action id.
    pub fn set_response(&self, action_id: &str, receipt: Receipt) {
        if let Ok(mut state) = self.state.lock() {
            state.responses.insert(action_id.to_string(), receipt);
        }
    }

    /// Configure a specific action to fail.
    pub fn set_failure(&self, action_id: &str, error: &str) {
        self.set_response(action_id, Receipt::failure(&self.name, action_id, error));
    }

    /// Make `validate` reject everything with the given reason.
    pub fn set_invalid(&self, reason: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.invalid_reason = Some(reason.to_string());
        }
    }

    /// Clear the call log and custom responses.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.responses.clear();
            state.call_log.clear();
            state.invalid_reason = None;
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn validate(&self, _context: &ExecutionContext) -> (bool, String) {
        match self.state.lock() {
            Ok(state) => match &state.invalid_reason {
                Some(reason) => (false, reason.clone()),
                None => (true, String::new()),
            },
            Err(_) => (true, String::new()),
        }
    }

    fn execute(&self, context: &ExecutionContext) -> Receipt {
        let action_id = context.action.id.clone();
        if let Ok(mut state) = self.state.lock() {
            state.call_log.push(action_id.clone());
            if let Some(receipt) = state.responses.get(&action_id) {
                return receipt.clone();
            }
        }
        Receipt::success(&self.name, &action_id, self.default_output.clone())
            .with_metadata("mock", json!(true))
    }
}
