//! Health checker: aggregate system health from components.
//!
//! Reports circuit breakers and the retry queue, rolled up to a single
//! three-valued status. Used by the CLI `health` command.

use serde::Serialize;
use serde_json::json;

use crate::core::circuit::{CircuitBreakerRegistry, CircuitState};
use crate::core::retry::RetryQueue;
use crate::core::time::now_iso;

/// Health of a single component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl ComponentHealth {
    pub fn new(name: &str, status: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: status.to_string(),
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Aggregate health of the entire system.
///
/// Rollup: any unhealthy component makes the system unhealthy, else any
/// degraded makes it degraded, else all healthy makes it healthy, else
/// unknown.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: String,
    pub timestamp: String,
    pub components: Vec<ComponentHealth>,
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: now_iso(),
            components: Vec::new(),
        }
    }
}

impl SystemHealth {
    pub fn add(&mut self, component: ComponentHealth) {
        self.components.push(component);
        self.recalculate();
    }

    fn recalculate(&mut self) {
        let statuses: Vec<&str> = self.components.iter().map(|c| c.status.as_str()).collect();
        self.status = if statuses.iter().any(|s| *s == "unhealthy") {
            "unhealthy"
        } else if statuses.iter().any(|s| *s == "degraded") {
            "degraded"
        } else if statuses.iter().all(|s| *s == "healthy") {
            "healthy"
        } else {
            "unknown"
        }
        .to_string();
    }
}

/// Check the health of circuit breakers.
pub fn check_circuit_breakers(registry: &CircuitBreakerRegistry) -> ComponentHealth {
    if registry.is_empty() {
        return ComponentHealth::new(
            "circuit_breakers",
            "healthy",
            "No circuit breakers registered",
        );
    }

    let total = registry.breakers().count();
    let open = registry
        .breakers()
        .filter(|cb| cb.state() == CircuitState::Open)
        .count();
    let half_open = registry
        .breakers()
        .filter(|cb| cb.state() == CircuitState::HalfOpen)
        .count();

    let (status, message) = if open > 0 {
        ("unhealthy", format!("{}/{} circuits open", open, total))
    } else if half_open > 0 {
        (
            "degraded",
            format!("{}/{} circuits half-open", half_open, total),
        )
    } else {
        ("healthy", format!("All {} circuits closed", total))
    };

    ComponentHealth::new("circuit_breakers", status, message).with_details(registry.get_status())
}

/// Check the health of the retry queue.
pub fn check_retry_queue(queue: &RetryQueue) -> ComponentHealth {
    let total = queue.size();
    let exhausted = queue.exhausted_count();

    let (status, message) = if exhausted > 0 {
        (
            "degraded",
            format!("{} exhausted items, {} total", exhausted, total),
        )
    } else if total > 0 {
        ("healthy", format!("{} items pending retry", total))
    } else {
        ("healthy", "Queue empty".to_string())
    };

    ComponentHealth::new("retry_queue", status, message).with_details(queue.get_status())
}

/// Run all health checks and return the aggregate.
pub fn check_system_health(
    cb_registry: Option<&CircuitBreakerRegistry>,
    retry_queue: Option<&RetryQueue>,
) -> SystemHealth {
    let mut health = SystemHealth::default();

    if let Some(registry) = cb_registry {
        health.add(check_circuit_breakers(registry));
    }
    if let Some(queue) = retry_queue {
        health.add(check_retry_queue(queue));
    }

    health
}
