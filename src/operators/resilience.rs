//! Resilience operators: Retry, TryCatch, Timeout, RateLimiter, Throttle
//! (§4.6). `BackoffStrategy` is grounded directly on the teacher's
//! `connectors/resilience.rs::BackoffStrategy`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::helpers::parse_duration;
use crate::node::Node;
use crate::registry::Operator;
use crate::value::Value;

fn primary_input(ctx: &dyn ExecutionContext, node: &Node) -> Value {
    ctx.get_node_inputs(&node.id).into_iter().next().unwrap_or(Value::Null)
}

fn input_error(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("error").map(Value::stringify),
        _ => None,
    }
}

/// Backoff strategies available to `RetryOperator`.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    Exponential { multiplier: f64, max_delay: Duration },
    Linear { increment: Duration },
    Constant { delay: Duration },
}

impl BackoffStrategy {
    pub fn calculate_delay(&self, attempt: u32, initial_delay: Duration) -> Duration {
        match self {
            Self::Exponential { multiplier, max_delay } => {
                let delay = initial_delay.as_secs_f64() * multiplier.powi(attempt as i32);
                Duration::from_secs_f64(delay.min(max_delay.as_secs_f64()))
            }
            Self::Linear { increment } => initial_delay + *increment * attempt,
            Self::Constant { delay } => *delay,
        }
    }
}

async fn sleep_cancellable(ctx: &dyn ExecutionContext, duration: Duration) -> EngineResult<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = ctx.cancel_token().cancelled() => Err(EngineError::Cancelled),
    }
}

pub struct RetryOperator;

#[async_trait]
impl Operator for RetryOperator {
    fn node_type(&self) -> &'static str {
        "Retry"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("backoff_strategy") {
            None | Some("exponential") | Some("linear") | Some("constant") => Ok(()),
            Some(other) => Err(EngineError::invalid_input(format!("unknown backoff_strategy '{other}'"))),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let max_attempts = legacy.extra_f64("max_attempts").unwrap_or(3.0) as u32;
        let initial_delay = legacy
            .extra_str("initial_delay")
            .map(parse_duration)
            .transpose()?
            .unwrap_or(Duration::from_secs(1));
        let max_delay = legacy.extra_str("max_delay").map(parse_duration).transpose()?.unwrap_or(Duration::from_secs(30));
        let multiplier = legacy.extra_f64("multiplier").unwrap_or(2.0);
        let strategy = match legacy.extra_str("backoff_strategy").unwrap_or("exponential") {
            "linear" => BackoffStrategy::Linear { increment: initial_delay },
            "constant" => BackoffStrategy::Constant { delay: initial_delay },
            _ => BackoffStrategy::Exponential { multiplier, max_delay },
        };
        let retry_on: Vec<&str> = legacy.extra_array("retry_on_errors").map(|a| a.iter().filter_map(Value::as_str).collect()).unwrap_or_default();

        let input = primary_input(ctx, node);
        let mut last_delay = Duration::ZERO;
        let mut last_error = input_error(&input);

        if last_error.is_none() {
            return Ok(Value::object([
                ("value".to_string(), input),
                ("attempts".to_string(), Value::Number(1.0)),
                ("success".to_string(), Value::Bool(true)),
            ]));
        }

        for attempt in 1..=max_attempts {
            let err = last_error.as_deref().unwrap_or_default();
            let should_retry = retry_on.is_empty() || retry_on.iter().any(|pattern| err.contains(pattern));
            if !should_retry {
                break;
            }
            last_delay = strategy.calculate_delay(attempt - 1, initial_delay);
            sleep_cancellable(ctx, last_delay).await?;

            let retried = primary_input(ctx, node);
            last_error = input_error(&retried);
            if last_error.is_none() {
                return Ok(Value::object([
                    ("value".to_string(), retried),
                    ("attempts".to_string(), Value::Number((attempt + 1) as f64)),
                    ("success".to_string(), Value::Bool(true)),
                ]));
            }
        }

        Ok(Value::object([
            ("value".to_string(), input),
            ("attempts".to_string(), Value::Number(max_attempts as f64)),
            ("success".to_string(), Value::Bool(false)),
            ("error".to_string(), Value::String(last_error.unwrap_or_default())),
            ("last_delay".to_string(), Value::String(format!("{}ms", last_delay.as_millis()))),
        ]))
    }
}

pub struct TryCatchOperator;

#[async_trait]
impl Operator for TryCatchOperator {
    fn node_type(&self) -> &'static str {
        "TryCatch"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let input = primary_input(ctx, node);
        let continue_on_error = legacy.extra_bool("continue_on_error").unwrap_or(true);

        match input_error(&input) {
            None => Ok(Value::object([("value".to_string(), input), ("caught".to_string(), Value::Bool(false))])),
            Some(error) => {
                if continue_on_error {
                    let fallback = legacy.extra("fallback_value").cloned().unwrap_or(Value::Null);
                    Ok(Value::object([
                        ("value".to_string(), fallback),
                        ("caught".to_string(), Value::Bool(true)),
                        ("error".to_string(), Value::String(error)),
                    ]))
                } else {
                    Err(EngineError::OperationFailed { message: error })
                }
            }
        }
    }
}

pub struct TimeoutOperator;

#[async_trait]
impl Operator for TimeoutOperator {
    fn node_type(&self) -> &'static str {
        "Timeout"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("timeout_action") {
            None | Some("error") | Some("continue_with_partial") => Ok(()),
            Some(other) => Err(EngineError::invalid_input(format!("unknown timeout_action '{other}'"))),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let timeout_ms = legacy.extra_f64("timeout_ms").unwrap_or(30_000.0);
        let elapsed_ms = legacy.extra_f64("elapsed_ms").unwrap_or(0.0);
        let action = legacy.extra_str("timeout_action").unwrap_or("error");
        let input = primary_input(ctx, node);

        if elapsed_ms <= timeout_ms {
            return Ok(Value::object([("value".to_string(), input), ("timed_out".to_string(), Value::Bool(false))]));
        }

        match action {
            "continue_with_partial" => Ok(Value::object([
                ("value".to_string(), input),
                ("timed_out".to_string(), Value::Bool(true)),
                ("partial".to_string(), Value::Bool(true)),
            ])),
            _ => Err(EngineError::HttpTimeout { timeout_ms: timeout_ms as u64 }),
        }
    }
}

struct FixedWindowBucket {
    timestamps: VecDeque<Instant>,
}

pub struct RateLimiterOperator {
    buckets: DashMap<String, Mutex<FixedWindowBucket>>,
}

impl RateLimiterOperator {
    pub fn new() -> Self {
        Self { buckets: DashMap::new() }
    }
}

impl Default for RateLimiterOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operator for RateLimiterOperator {
    fn node_type(&self) -> &'static str {
        "RateLimiter"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("rate_limit_strategy") {
            None | Some("fixed_window") => Ok(()),
            Some(other) => Err(EngineError::UnsupportedOperation { operation: format!("rate_limit_strategy '{other}'") }),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let max_requests = legacy.extra_f64("max_requests").unwrap_or(10.0) as usize;
        let per_duration = legacy.extra_str("per_duration").map(parse_duration).transpose()?.unwrap_or(Duration::from_secs(1));

        loop {
            let wait = {
                let entry = self.buckets.entry(node.id.clone()).or_insert_with(|| Mutex::new(FixedWindowBucket { timestamps: VecDeque::new() }));
                let mut bucket = entry.lock();
                let now = Instant::now();
                while let Some(&oldest) = bucket.timestamps.front() {
                    if now.duration_since(oldest) >= per_duration {
                        bucket.timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                if bucket.timestamps.len() < max_requests {
                    bucket.timestamps.push_back(now);
                    None
                } else {
                    let oldest = *bucket.timestamps.front().expect("bucket full implies non-empty");
                    Some(per_duration.saturating_sub(now.duration_since(oldest)))
                }
            };

            match wait {
                None => break,
                Some(wait) => sleep_cancellable(ctx, wait).await?,
            }
        }

        Ok(primary_input(ctx, node))
    }
}

pub struct ThrottleOperator {
    last_request: DashMap<String, Mutex<Instant>>,
}

impl ThrottleOperator {
    pub fn new() -> Self {
        Self { last_request: DashMap::new() }
    }
}

impl Default for ThrottleOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operator for ThrottleOperator {
    fn node_type(&self) -> &'static str {
        "Throttle"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        if legacy.extra_f64("requests_per_second").map(|r| r <= 0.0).unwrap_or(false) {
            return Err(EngineError::invalid_input("requests_per_second must be > 0"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let rps = legacy.extra_f64("requests_per_second").unwrap_or(1.0);
        let spacing = Duration::from_secs_f64(1.0 / rps);

        let wait = {
            let entry = self.last_request.entry(node.id.clone()).or_insert_with(|| Mutex::new(Instant::now() - spacing));
            let mut last = entry.lock();
            let now = Instant::now();
            let elapsed = now.duration_since(*last);
            let wait = spacing.saturating_sub(elapsed);
            *last = now + wait;
            wait
        };

        if !wait.is_zero() {
            sleep_cancellable(ctx, wait).await?;
        }

        Ok(primary_input(ctx, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::context::InMemoryContext;
    use crate::node::{LegacyNodeData, NodeData};

    fn ctx() -> InMemoryContext {
        InMemoryContext::new(RuntimeConfig::default())
    }

    fn node_with(legacy: LegacyNodeData) -> Node {
        Node { id: "n".into(), node_type: "x".into(), data: NodeData::Legacy(legacy) }
    }

    fn with_extra(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> LegacyNodeData {
        LegacyNodeData {
            extra: pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn exponential_backoff_caps_at_max_delay() {
        let strategy = BackoffStrategy::Exponential { multiplier: 2.0, max_delay: Duration::from_secs(10) };
        let initial = Duration::from_secs(1);
        assert_eq!(strategy.calculate_delay(0, initial), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(1, initial), Duration::from_secs(2));
        assert_eq!(strategy.calculate_delay(10, initial), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retry_passes_through_non_error_input() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::Number(7.0)]);
        let n = node_with(LegacyNodeData::default());
        let result = RetryOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result.get_field("success"), Some(&Value::Bool(true)));
        assert_eq!(result.get_field("attempts"), Some(&Value::Number(1.0)));
    }

    #[tokio::test]
    async fn retry_exhausts_attempts_on_persistent_error() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::object([("error".to_string(), Value::String("boom".to_string()))])]);
        let n = node_with(with_extra([
            ("max_attempts", Value::Number(2.0)),
            ("initial_delay", Value::String("1ms".to_string())),
        ]));
        let result = RetryOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result.get_field("success"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn trycatch_applies_fallback() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::object([("error".to_string(), Value::String("bad".to_string()))])]);
        let n = node_with(with_extra([("fallback_value", Value::Number(0.0))]));
        let result = TryCatchOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result.get_field("value"), Some(&Value::Number(0.0)));
        assert_eq!(result.get_field("caught"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn trycatch_propagates_when_not_continuing() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::object([("error".to_string(), Value::String("bad".to_string()))])]);
        let n = node_with(with_extra([("continue_on_error", Value::Bool(false))]));
        assert!(TryCatchOperator.execute(&c, &n).await.is_err());
    }

    #[tokio::test]
    async fn timeout_passes_within_bound() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::Number(1.0)]);
        let n = node_with(with_extra([
            ("timeout_ms", Value::Number(1000.0)),
            ("elapsed_ms", Value::Number(10.0)),
        ]));
        let result = TimeoutOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result.get_field("timed_out"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn rate_limiter_allows_within_quota() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::Number(1.0)]);
        let op = RateLimiterOperator::new();
        let n = node_with(with_extra([("max_requests", Value::Number(5.0))]));
        for _ in 0..5 {
            assert!(op.execute(&c, &n).await.is_ok());
        }
    }

    #[tokio::test]
    async fn throttle_passes_through_value() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::Number(9.0)]);
        let op = ThrottleOperator::new();
        let n = node_with(with_extra([("requests_per_second", Value::Number(1000.0))]));
        let result = op.execute(&c, &n).await.unwrap();
        assert_eq!(result, Value::Number(9.0));
    }
}
