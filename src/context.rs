//! The per-run execution context every operator reads and writes.
//!
//! `ExecutionContext` is a trait object so operators never depend on a
//! concrete state store; `InMemoryContext` is the only implementation this
//! crate ships (persistence/restart of in-flight runs is out of scope).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;

use crate::cache::ValueCache;
use crate::concurrency::CancelToken;
use crate::config::RuntimeConfig;
use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// What kind of value an `Accumulator` slot was first written with. The
/// first write for a run fixes the expected variant for the rest of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorKind {
    Sum,
    Product,
    Concat,
    Array,
    Count,
}

pub trait ExecutionContext: Send + Sync {
    fn get_node_inputs(&self, node_id: &str) -> Vec<Value>;
    fn set_node_inputs(&self, node_id: &str, inputs: Vec<Value>);

    fn get_node_result(&self, node_id: &str) -> Option<Value>;
    fn set_node_result(&self, node_id: &str, value: Value) -> EngineResult<()>;
    fn get_all_node_results(&self) -> Vec<(String, Value)>;

    fn get_variable(&self, name: &str) -> Option<Value>;
    fn set_variable(&self, name: &str, value: Value);
    fn get_variables(&self) -> Vec<(String, Value)>;

    fn get_context_variable(&self, name: &str) -> Option<Value>;
    fn set_context_variable(&self, name: &str, value: Value);
    fn get_context_constant(&self, name: &str) -> Option<Value>;
    fn set_context_constant(&self, name: &str, value: Value);
    /// Used by the expression engine's `context.x` qualifier: checks the
    /// variable store first, then the constant store.
    fn get_context_value(&self, name: &str) -> Option<Value> {
        self.get_context_variable(name).or_else(|| self.get_context_constant(name))
    }

    fn get_accumulator(&self) -> Option<Value>;
    fn set_accumulator(&self, kind: AccumulatorKind, value: Value) -> EngineResult<()>;

    fn get_counter(&self) -> f64;
    fn set_counter(&self, value: f64);

    fn cache(&self) -> &ValueCache;
    fn config(&self) -> &RuntimeConfig;
    fn cancel_token(&self) -> &CancelToken;

    fn increment_node_execution(&self) -> EngineResult<u64>;
    fn increment_http_call(&self) -> EngineResult<u64>;
    fn node_execution_count(&self) -> u64;
    fn http_call_count(&self) -> u64;

    /// Lookup of a pre-configured named HTTP client; `None` when `uid` is
    /// absent from the registry (callers fall back to the default client).
    fn http_client(&self, uid: &str) -> Option<Arc<Client>>;
    fn default_http_client(&self) -> Arc<Client>;

    /// Substitute `{{name}}` placeholders from the context variable/constant
    /// stores. Unknown placeholders are left verbatim.
    fn interpolate_template(&self, template: &str) -> String {
        interpolate(template, |name| self.get_context_value(name))
    }
}

fn interpolate(template: &str, resolve: impl Fn(&str) -> Option<Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match resolve(name) {
                    Some(v) => out.push_str(&v.stringify()),
                    None => out.push_str(&rest[start..start + 4 + end]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

struct AccumulatorSlot {
    kind: AccumulatorKind,
    value: Value,
}

pub struct InMemoryContext {
    node_inputs: DashMap<String, Vec<Value>>,
    node_results: DashMap<String, Value>,
    variables: DashMap<String, Value>,
    context_variables: DashMap<String, Value>,
    context_constants: DashMap<String, Value>,
    accumulator: Mutex<Option<AccumulatorSlot>>,
    counter: Mutex<f64>,
    cache: ValueCache,
    config: RuntimeConfig,
    cancel_token: CancelToken,
    node_execution_count: AtomicU64,
    http_call_count: AtomicU64,
    http_clients: DashMap<String, Arc<Client>>,
    default_http_client: RwLock<Option<Arc<Client>>>,
}

impl InMemoryContext {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            node_inputs: DashMap::new(),
            node_results: DashMap::new(),
            variables: DashMap::new(),
            context_variables: DashMap::new(),
            context_constants: DashMap::new(),
            accumulator: Mutex::new(None),
            counter: Mutex::new(0.0),
            cache: ValueCache::new(),
            config,
            cancel_token: CancelToken::new(),
            node_execution_count: AtomicU64::new(0),
            http_call_count: AtomicU64::new(0),
            http_clients: DashMap::new(),
            default_http_client: RwLock::new(None),
        }
    }

    /// Register a pre-configured named HTTP client, reachable from nodes
    /// via `http_client_uid`. Named clients bypass the default SSRF path —
    /// they are expected to embed their own policy.
    pub fn register_http_client(&self, uid: impl Into<String>, client: Arc<Client>) {
        self.http_clients.insert(uid.into(), client);
    }
}

impl ExecutionContext for InMemoryContext {
    fn get_node_inputs(&self, node_id: &str) -> Vec<Value> {
        self.node_inputs.get(node_id).map(|v| v.clone()).unwrap_or_default()
    }

    fn set_node_inputs(&self, node_id: &str, inputs: Vec<Value>) {
        self.node_inputs.insert(node_id.to_string(), inputs);
    }

    fn get_node_result(&self, node_id: &str) -> Option<Value> {
        self.node_results.get(node_id).map(|v| v.clone())
    }

    fn set_node_result(&self, node_id: &str, value: Value) -> EngineResult<()> {
        if self.node_results.contains_key(node_id) {
            return Err(EngineError::invalid_input(format!(
                "node '{node_id}' already has a result for this run"
            )));
        }
        self.node_results.insert(node_id.to_string(), value);
        Ok(())
    }

    fn get_all_node_results(&self) -> Vec<(String, Value)> {
        self.node_results.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    fn get_variable(&self, name: &str) -> Option<Value> {
        self.variables.get(name).map(|v| v.clone())
    }

    fn set_variable(&self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    fn get_variables(&self) -> Vec<(String, Value)> {
        self.variables.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    fn get_context_variable(&self, name: &str) -> Option<Value> {
        self.context_variables.get(name).map(|v| v.clone())
    }

    fn set_context_variable(&self, name: &str, value: Value) {
        self.context_variables.insert(name.to_string(), value);
    }

    fn get_context_constant(&self, name: &str) -> Option<Value> {
        self.context_constants.get(name).map(|v| v.clone())
    }

    fn set_context_constant(&self, name: &str, value: Value) {
        self.context_constants.insert(name.to_string(), value);
    }

    fn get_accumulator(&self) -> Option<Value> {
        self.accumulator.lock().as_ref().map(|s| s.value.clone())
    }

    fn set_accumulator(&self, kind: AccumulatorKind, value: Value) -> EngineResult<()> {
        let mut slot = self.accumulator.lock();
        match slot.as_ref() {
            Some(existing) if existing.kind != kind => {
                return Err(EngineError::invalid_input(format!(
                    "accumulator already bound to {:?}, cannot switch to {:?}",
                    existing.kind, kind
                )));
            }
            _ => {}
        }
        *slot = Some(AccumulatorSlot { kind, value });
        Ok(())
    }

    fn get_counter(&self) -> f64 {
        *self.counter.lock()
    }

    fn set_counter(&self, value: f64) {
        *self.counter.lock() = value;
    }

    fn cache(&self) -> &ValueCache {
        &self.cache
    }

    fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn cancel_token(&self) -> &CancelToken {
        &self.cancel_token
    }

    fn increment_node_execution(&self) -> EngineResult<u64> {
        let next = self.node_execution_count.fetch_add(1, Ordering::SeqCst) + 1;
        if next > self.config.quota.max_node_executions {
            return Err(EngineError::QuotaExceeded {
                quota: "max_node_executions".to_string(),
                limit: self.config.quota.max_node_executions,
            });
        }
        Ok(next)
    }

    fn increment_http_call(&self) -> EngineResult<u64> {
        let next = self.http_call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if next > self.config.quota.max_http_calls {
            return Err(EngineError::QuotaExceeded {
                quota: "max_http_calls".to_string(),
                limit: self.config.quota.max_http_calls,
            });
        }
        Ok(next)
    }

    fn node_execution_count(&self) -> u64 {
        self.node_execution_count.load(Ordering::SeqCst)
    }

    fn http_call_count(&self) -> u64 {
        self.http_call_count.load(Ordering::SeqCst)
    }

    fn http_client(&self, uid: &str) -> Option<Arc<Client>> {
        self.http_clients.get(uid).map(|c| c.clone())
    }

    fn default_http_client(&self) -> Arc<Client> {
        if let Some(client) = self.default_http_client.read().as_ref() {
            return client.clone();
        }
        let mut guard = self.default_http_client.write();
        if let Some(client) = guard.as_ref() {
            return client.clone();
        }
        let http = &self.config.http;
        let client = Arc::new(
            Client::builder()
                .timeout(Duration::from_millis(http.request_timeout_ms))
                .connect_timeout(Duration::from_millis(http.connect_timeout_ms))
                .pool_max_idle_per_host(http.pool_max_idle_per_host)
                .pool_idle_timeout(Duration::from_millis(http.pool_idle_timeout_ms))
                .tcp_keepalive(Duration::from_millis(http.tcp_keepalive_ms))
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap_or_else(|_| Client::new()),
        );
        *guard = Some(client.clone());
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> InMemoryContext {
        InMemoryContext::new(RuntimeConfig::default())
    }

    #[test]
    fn node_result_written_once() {
        let c = ctx();
        c.set_node_result("n1", Value::Number(1.0)).unwrap();
        assert!(c.set_node_result("n1", Value::Number(2.0)).is_err());
        assert_eq!(c.get_node_result("n1"), Some(Value::Number(1.0)));
    }

    #[test]
    fn accumulator_kind_is_fixed_on_first_write() {
        let c = ctx();
        c.set_accumulator(AccumulatorKind::Sum, Value::Number(1.0)).unwrap();
        assert!(c.set_accumulator(AccumulatorKind::Concat, Value::String("x".into())).is_err());
    }

    #[test]
    fn quota_exceeded_is_fatal() {
        let mut cfg = RuntimeConfig::default();
        cfg.quota.max_node_executions = 1;
        let c = InMemoryContext::new(cfg);
        assert!(c.increment_node_execution().is_ok());
        assert!(c.increment_node_execution().is_err());
    }

    #[test]
    fn interpolate_substitutes_known_and_leaves_unknown() {
        let c = ctx();
        c.set_context_variable("name", Value::String("Ada".into()));
        assert_eq!(c.interpolate_template("hi {{name}}, {{missing}}"), "hi Ada, {{missing}}");
    }
}
