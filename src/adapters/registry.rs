//! Adapter registry: central dispatch for all adapter operations.
//!
//! The single point of adapter management: registration, lookup, mock
//! mode, dry-run, validation, execution, timing, and circuit-breaker
//! coupling. `execute_action` upholds the system's keystone invariant:
//! one Receipt per dispatched Action, and no error ever escapes.

use std::path::Path;
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::adapters::{Adapter, ExecutionContext};
use crate::core::action::{Action, Receipt};
use crate::core::circuit::CircuitBreakerRegistry;

pub struct AdapterRegistry {
    adapters: FxHashMap<String, Box<dyn Adapter>>,
    /// Registration order, for stable listings.
    order: Vec<String>,
    mock_mode: bool,
    mock_adapter: Option<Box<dyn Adapter>>,
    circuit_breakers: Option<CircuitBreakerRegistry>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new(false)
    }
}

impl AdapterRegistry {
    pub fn new(mock_mode: bool) -> Self {
        Self {
            adapters: FxHashMap::default(),
            order: Vec::new(),
            mock_mode,
            mock_adapter: None,
            circuit_breakers: None,
        }
    }

    pub fn mock_mode(&self) -> bool {
        self.mock_mode
    }

    /// Enable or disable mock mode, optionally with a custom mock adapter
    /// that receives every dispatch.
    pub fn set_mock_mode(&mut self, enabled: bool, mock_adapter: Option<Box<dyn Adapter>>) {
        self.mock_mode = enabled;
        self.mock_adapter = mock_adapter;
    }

    /// Attach a circuit-breaker registry; dispatch consults it for every
    /// non-dry-run execution.
    pub fn set_circuit_breakers(&mut self, breakers: CircuitBreakerRegistry) {
        self.circuit_breakers = Some(breakers);
    }

    pub fn circuit_breakers(&self) -> Option<&CircuitBreakerRegistry> {
        self.circuit_breakers.as_ref()
    }

    /// Register an adapter, overwriting any prior entry with the same name.
    pub fn register(&mut self, adapter: Box<dyn Adapter>) {
        let name = adapter.name().to_string();
        if self.adapters.insert(name.clone(), adapter).is_some() {
            warn!("Overwriting existing adapter: {}", name);
        } else {
            self.order.push(name.clone());
        }
        debug!("Registered adapter: {}", name);
    }

    /// Remove an adapter; silent if absent.
    pub fn unregister(&mut self, name: &str) {
        self.adapters.remove(name);
        self.order.retain(|n| n != name);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Adapter> {
        self.adapters.get(name).map(|a| a.as_ref())
    }

    /// Registered adapter names, in insertion order.
    pub fn list_adapters(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Availability status per registered adapter. An `is_available` that
    /// misbehaves is reported as unavailable, never propagated.
    pub fn adapter_status(&self) -> serde_json::Value {
        let mut status = serde_json::Map::new();
        for name in &self.order {
            let adapter = &self.adapters[name];
            let available = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                adapter.is_available()
            }))
            .unwrap_or(false);
            status.insert(
                name.clone(),
                json!({
                    "name": name,
                    "available": available,
                    "type": adapter.name(),
                }),
            );
        }
        serde_json::Value::Object(status)
    }

    /// Execute an action through the appropriate adapter.
    ///
    /// The main dispatch method: resolve the adapter (or mock), build the
    /// context, validate, honor dry-run, consult the circuit breaker,
    /// execute, record the outcome on the breaker, and stamp the duration.
    /// Always returns a Receipt.
    pub fn execute_action(
        &mut self,
        action: Action,
        project_root: &Path,
        environment: &str,
        module_path: Option<&str>,
        dry_run: bool,
    ) -> Receipt {
        let start = Instant::now();
        let adapter_name = action.adapter.clone();
        let action_id = action.id.clone();

        let context = ExecutionContext {
            action,
            project_root: project_root.to_path_buf(),
            environment: environment.to_string(),
            module_path: module_path.map(str::to_string),
            dry_run,
        };

        let mut receipt = self.dispatch(&adapter_name, &action_id, &context);
        receipt.duration_ms = start.elapsed().as_millis() as u64;
        receipt
    }

    /// The adapter a dispatch would use: the custom mock when mock mode is
    /// on, the registered adapter otherwise.
    fn resolve_adapter(&self, name: &str) -> Option<&dyn Adapter> {
        if self.mock_mode {
            self.mock_adapter.as_deref()
        } else {
            self.adapters.get(name).map(|a| a.as_ref())
        }
    }

    fn dispatch(&mut self, adapter_name: &str, action_id: &str, ctx: &ExecutionContext) -> Receipt {
        // Mock mode with no custom mock: synthesize a success.
        if self.mock_mode && self.mock_adapter.is_none() {
            return Receipt::success(
                adapter_name,
                action_id,
                format!("[mock] {}:{} executed", adapter_name, action_id),
            )
            .with_metadata("mock", json!(true))
            .with_metadata("dry_run", json!(ctx.dry_run));
        }

        if self.resolve_adapter(adapter_name).is_none() {
            return Receipt::failure(
                adapter_name,
                action_id,
                format!("No adapter registered for '{}'", adapter_name),
            );
        }

        // Validate. A validator that misbehaves is itself a validation
        // failure, not an escape hatch.
        let validation = {
            let Some(adapter) = self.resolve_adapter(adapter_name) else {
                return Receipt::failure(adapter_name, action_id, "adapter vanished mid-dispatch");
            };
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| adapter.validate(ctx)))
        };
        match validation {
            Ok((true, _)) => {}
            Ok((false, message)) => {
                return Receipt::failure(
                    adapter_name,
                    action_id,
                    format!("Validation failed: {}", message),
                );
            }
            Err(_) => {
                return Receipt::failure(
                    adapter_name,
                    action_id,
                    "Validation error: validator panicked".to_string(),
                );
            }
        }

        // Dry run: validated but not executed.
        if ctx.dry_run {
            return Receipt::skip(
                adapter_name,
                action_id,
                format!("[dry-run] Would execute {}:{}", adapter_name, action_id),
            )
            .with_metadata("dry_run", json!(true));
        }

        // Circuit check. The adapter is not called on rejection.
        if let Some(breakers) = self.circuit_breakers.as_mut() {
            let cb = breakers.get_or_create(adapter_name);
            if !cb.allow_request() {
                return Receipt::failure(
                    adapter_name,
                    action_id,
                    format!("Circuit breaker OPEN for adapter '{}'", adapter_name),
                )
                .with_metadata("circuit_state", json!(cb.state().as_str()));
            }
        }

        // Execute. An adapter that panics is a contract violation; the
        // violation is logged and folded into a failed receipt.
        let executed = {
            let Some(adapter) = self.resolve_adapter(adapter_name) else {
                return Receipt::failure(adapter_name, action_id, "adapter vanished mid-dispatch");
            };
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| adapter.execute(ctx)))
        };
        let receipt = match executed {
            Ok(receipt) => receipt,
            Err(_) => {
                error!(
                    "Adapter {} panicked during execution of {}",
                    adapter_name, action_id
                );
                Receipt::failure(
                    adapter_name,
                    action_id,
                    "Unexpected error: adapter panicked".to_string(),
                )
            }
        };

        // Circuit record: skipped receipts are neutral.
        if let Some(breakers) = self.circuit_breakers.as_mut() {
            let cb = breakers.get_or_create(adapter_name);
            if receipt.ok() {
                cb.record_success();
            } else if receipt.failed() {
                cb.record_failure();
            }
        }

        receipt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockAdapter;
    use crate::core::circuit::CircuitBreakerRegistry;
    use std::path::PathBuf;

    fn action(id: &str, adapter: &str) -> Action {
        Action::new(id, adapter)
    }

    fn root() -> PathBuf {
        PathBuf::from(".")
    }

    #[test]
    fn test_mock_mode_short_circuit() {
        let mut registry = AdapterRegistry::new(true);
        let receipt = registry.execute_action(action("a1", "shell"), &root(), "dev", None, false);

        assert!(receipt.ok());
        assert_eq!(receipt.output, "[mock] shell:a1 executed");
        assert_eq!(receipt.metadata["mock"], json!(true));
        assert_eq!(receipt.metadata["dry_run"], json!(false));
    }

    #[test]
    fn test_missing_adapter_is_failure_receipt() {
        let mut registry = AdapterRegistry::new(false);
        let receipt = registry.execute_action(action("a1", "ghost"), &root(), "dev", None, false);
        assert!(receipt.failed());
        assert_eq!(
            receipt.error.as_deref(),
            Some("No adapter registered for 'ghost'")
        );
    }

    #[test]
    fn test_dry_run_skips_without_calling_adapter() {
        let mock = MockAdapter::named("shell");
        let handle = mock.clone();
        let mut registry = AdapterRegistry::new(false);
        registry.register(Box::new(mock));

        let receipt = registry.execute_action(action("a1", "shell"), &root(), "dev", None, true);
        assert!(receipt.skipped());
        assert_eq!(receipt.output, "[dry-run] Would execute shell:a1");
        assert_eq!(handle.call_count(), 0);
    }

    #[test]
    fn test_registered_adapter_executes() {
        let mock = MockAdapter::named("shell");
        let handle = mock.clone();
        let mut registry = AdapterRegistry::new(false);
        registry.register(Box::new(mock));

        let receipt = registry.execute_action(action("a1", "shell"), &root(), "dev", None, false);
        assert!(receipt.ok());
        assert_eq!(handle.call_count(), 1);
    }

    #[test]
    fn test_circuit_opens_after_failures_and_blocks() {
        let mock = MockAdapter::named("shell");
        mock.set_failure("a1", "tool exploded");
        let mut registry = AdapterRegistry::new(false);
        registry.register(Box::new(mock.clone()));
        registry.set_circuit_breakers(CircuitBreakerRegistry::with_defaults(
            2,
            std::time::Duration::from_secs(60),
        ));

        for _ in 0..2 {
            let r = registry.execute_action(action("a1", "shell"), &root(), "dev", None, false);
            assert!(r.failed());
        }
        // Breaker is now open: the adapter must not be called again.
        let calls_before = mock.call_count();
        let r = registry.execute_action(action("a1", "shell"), &root(), "dev", None, false);
        assert!(r.failed());
        assert!(r.error.as_deref().unwrap().contains("Circuit breaker OPEN"));
        assert_eq!(r.metadata["circuit_state"], json!("open"));
        assert_eq!(mock.call_count(), calls_before);
    }

    #[test]
    fn test_validation_failure_is_receipt() {
        let mock = MockAdapter::named("shell");
        mock.set_invalid("missing required param");
        let mut registry = AdapterRegistry::new(false);
        registry.register(Box::new(mock.clone()));

        let receipt = registry.execute_action(action("a1", "shell"), &root(), "dev", None, false);
        assert!(receipt.failed());
        assert_eq!(
            receipt.error.as_deref(),
            Some("Validation failed: missing required param")
        );
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_register_overwrites_same_name() {
        let mut registry = AdapterRegistry::new(false);
        registry.register(Box::new(MockAdapter::named("shell")));
        registry.register(Box::new(MockAdapter::named("shell")));
        assert_eq!(registry.list_adapters(), vec!["shell"]);
    }

    #[test]
    fn test_unregister_is_silent_when_absent() {
        let mut registry = AdapterRegistry::new(false);
        registry.unregister("ghost");
        registry.register(Box::new(MockAdapter::named("shell")));
        registry.unregister("shell");
        assert!(registry.list_adapters().is_empty());
    }

    #[test]
    fn test_adapter_status_reports_availability() {
        let mut registry = AdapterRegistry::new(false);
        registry.register(Box::new(MockAdapter::named("shell")));
        let status = registry.adapter_status();
        assert_eq!(status["shell"]["available"], json!(true));
    }

    #[test]
    fn test_duration_is_stamped() {
        let mut registry = AdapterRegistry::new(true);
        let receipt = registry.execute_action(action("a1", "shell"), &root(), "dev", None, false);
        // Mock dispatch is fast; the stamp just has to be present and sane.
        assert!(receipt.duration_ms < 5_000);
    }
}
