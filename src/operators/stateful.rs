//! Workflow-scoped state operators: Variable, Accumulator, Counter, Delay
//! (§4.5).

use async_trait::async_trait;

use crate::context::{AccumulatorKind, ExecutionContext};
use crate::error::{EngineError, EngineResult};
use crate::helpers::parse_duration;
use crate::node::Node;
use crate::registry::Operator;
use crate::value::Value;

fn primary_input(ctx: &dyn ExecutionContext, node: &Node) -> Option<Value> {
    ctx.get_node_inputs(&node.id).into_iter().next()
}

pub struct VariableOperator;

#[async_trait]
impl Operator for VariableOperator {
    fn node_type(&self) -> &'static str {
        "Variable"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("var_op") {
            Some("get") | Some("set") => {}
            _ => return Err(EngineError::invalid_input("Variable requires var_op of get or set")),
        }
        if legacy.extra_str("name").is_none() {
            return Err(EngineError::missing_field("name"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let name = legacy.extra_str("name").unwrap_or_default().to_string();
        let var_op = legacy.extra_str("var_op").unwrap_or_default();

        match var_op {
            "set" => {
                let value = primary_input(ctx, node).ok_or_else(|| EngineError::missing_field("input"))?;
                ctx.set_variable(&name, value.clone());
                Ok(Value::object([
                    ("name".to_string(), Value::String(name)),
                    ("value".to_string(), value),
                    ("var_op".to_string(), Value::String("set".to_string())),
                ]))
            }
            "get" => {
                let value = ctx
                    .get_variable(&name)
                    .ok_or_else(|| EngineError::MissingRequiredInput { field: format!("variable '{name}'") })?;
                Ok(Value::object([
                    ("name".to_string(), Value::String(name)),
                    ("value".to_string(), value),
                    ("var_op".to_string(), Value::String("get".to_string())),
                ]))
            }
            other => Err(EngineError::UnsupportedOperation { operation: format!("var_op '{other}'") }),
        }
    }
}

pub struct AccumulatorOperator;

#[async_trait]
impl Operator for AccumulatorOperator {
    fn node_type(&self) -> &'static str {
        "Accumulator"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("accum_op") {
            Some("sum") | Some("product") | Some("concat") | Some("array") | Some("count") => Ok(()),
            _ => Err(EngineError::invalid_input("Accumulator requires a known accum_op")),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let accum_op = legacy.extra_str("accum_op").unwrap_or_default();
        let kind = match accum_op {
            "sum" => AccumulatorKind::Sum,
            "product" => AccumulatorKind::Product,
            "concat" => AccumulatorKind::Concat,
            "array" => AccumulatorKind::Array,
            "count" => AccumulatorKind::Count,
            other => return Err(EngineError::UnsupportedOperation { operation: format!("accum_op '{other}'") }),
        };
        let input = primary_input(ctx, node).unwrap_or(Value::Null);
        let current = ctx.get_accumulator();
        let configured_initial = current.is_none().then(|| legacy.extra("initial_value")).flatten();

        let next = match kind {
            AccumulatorKind::Sum => {
                let base = current
                    .as_ref()
                    .and_then(Value::as_f64)
                    .or_else(|| configured_initial.and_then(Value::as_f64))
                    .unwrap_or(0.0);
                let addend = input.as_f64().ok_or_else(|| EngineError::type_mismatch("number", "other"))?;
                Value::Number(base + addend)
            }
            AccumulatorKind::Product => {
                let base = current
                    .as_ref()
                    .and_then(Value::as_f64)
                    .or_else(|| configured_initial.and_then(Value::as_f64))
                    .unwrap_or(1.0);
                let factor = input.as_f64().ok_or_else(|| EngineError::type_mismatch("number", "other"))?;
                Value::Number(base * factor)
            }
            AccumulatorKind::Concat => {
                let base = current
                    .as_ref()
                    .map(Value::stringify)
                    .or_else(|| configured_initial.map(Value::stringify))
                    .unwrap_or_default();
                Value::String(format!("{base}{}", input.stringify()))
            }
            AccumulatorKind::Array => {
                let mut items = current
                    .as_ref()
                    .and_then(Value::as_array)
                    .or_else(|| configured_initial.and_then(Value::as_array))
                    .map(|a| a.to_vec())
                    .unwrap_or_default();
                items.push(input);
                Value::Array(items)
            }
            AccumulatorKind::Count => {
                let base = current
                    .as_ref()
                    .and_then(Value::as_f64)
                    .or_else(|| configured_initial.and_then(Value::as_f64))
                    .unwrap_or(0.0);
                Value::Number(base + 1.0)
            }
        };

        ctx.set_accumulator(kind, next.clone())?;
        Ok(Value::object([("value".to_string(), next), ("accum_op".to_string(), Value::String(accum_op.to_string()))]))
    }
}

pub struct CounterOperator;

#[async_trait]
impl Operator for CounterOperator {
    fn node_type(&self) -> &'static str {
        "Counter"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("counter_op") {
            Some("increment") | Some("decrement") | Some("reset") | Some("get") => Ok(()),
            _ => Err(EngineError::invalid_input("Counter requires a known counter_op")),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let counter_op = legacy.extra_str("counter_op").unwrap_or_default();
        let delta = legacy.extra_f64("delta").unwrap_or(1.0);
        let initial_value = legacy.extra_f64("initial_value").unwrap_or(0.0);

        let value = match counter_op {
            "increment" => {
                let updated = ctx.get_counter() + delta;
                ctx.set_counter(updated);
                updated
            }
            "decrement" => {
                let updated = ctx.get_counter() - delta;
                ctx.set_counter(updated);
                updated
            }
            "reset" => {
                ctx.set_counter(initial_value);
                initial_value
            }
            "get" => ctx.get_counter(),
            other => return Err(EngineError::UnsupportedOperation { operation: format!("counter_op '{other}'") }),
        };

        Ok(Value::object([
            ("value".to_string(), Value::Number(value)),
            ("counter_op".to_string(), Value::String(counter_op.to_string())),
        ]))
    }
}

pub struct DelayOperator;

#[async_trait]
impl Operator for DelayOperator {
    fn node_type(&self) -> &'static str {
        "Delay"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        let duration = legacy.extra_str("duration").or_else(|| legacy.value.as_ref().and_then(Value::as_str));
        let duration = duration.ok_or_else(|| EngineError::missing_field("duration"))?;
        parse_duration(duration)?;
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let duration_str = legacy
            .extra_str("duration")
            .or_else(|| legacy.value.as_ref().and_then(Value::as_str))
            .ok_or_else(|| EngineError::missing_field("duration"))?
            .to_string();
        let duration = parse_duration(&duration_str)?;

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = ctx.cancel_token().cancelled() => return Err(EngineError::Cancelled),
        }

        let value = primary_input(ctx, node).unwrap_or(Value::Null);
        Ok(Value::object([
            ("value".to_string(), value),
            ("duration".to_string(), Value::String(duration_str)),
            ("delayed".to_string(), Value::Bool(true)),
        ]))
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

    #[tokio::test]
    async fn variable_set_then_get() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::Number(42.0)]);
        let n = node_with(with_extra([
            ("var_op", Value::String("set".to_string())),
            ("name", Value::String("x".to_string())),
        ]));
        VariableOperator.execute(&c, &n).await.unwrap();
        assert_eq!(c.get_variable("x"), Some(Value::Number(42.0)));
    }

    #[tokio::test]
    async fn accumulator_sum_across_calls() {
        let c = ctx();
        let n1 = node_with(with_extra([("accum_op", Value::String("sum".to_string()))]));
        c.set_node_inputs("n", vec![Value::Number(2.0)]);
        AccumulatorOperator.execute(&c, &n1).await.unwrap();
        c.set_node_inputs("n", vec![Value::Number(3.0)]);
        let result = AccumulatorOperator.execute(&c, &n1).await.unwrap();
        assert_eq!(result.get_field("value"), Some(&Value::Number(5.0)));
    }

    #[tokio::test]
    async fn accumulator_sum_starts_from_configured_initial_value() {
        let c = ctx();
        let n = node_with(with_extra([
            ("accum_op", Value::String("sum".to_string())),
            ("initial_value", Value::Number(100.0)),
        ]));
        c.set_node_inputs("n", vec![Value::Number(2.0)]);
        let result = AccumulatorOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result.get_field("value"), Some(&Value::Number(102.0)));

        // initial_value only seeds the first write; a second call adds on
        // top of the accumulator's now-set state, not the config again.
        c.set_node_inputs("n", vec![Value::Number(3.0)]);
        let result = AccumulatorOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result.get_field("value"), Some(&Value::Number(105.0)));
    }

    #[tokio::test]
    async fn counter_increment_and_reset() {
        let c = ctx();
        let inc = node_with(with_extra([("counter_op", Value::String("increment".to_string()))]));
        CounterOperator.execute(&c, &inc).await.unwrap();
        CounterOperator.execute(&c, &inc).await.unwrap();
        assert_eq!(c.get_counter(), 2.0);

        let reset = node_with(with_extra([("counter_op", Value::String("reset".to_string()))]));
        CounterOperator.execute(&c, &reset).await.unwrap();
        assert_eq!(c.get_counter(), 0.0);
    }

    #[tokio::test]
    async fn delay_returns_descriptor() {
        let c = ctx();
        let n = node_with(LegacyNodeData { value: Some(Value::String("10ms".to_string())), ..Default::default() });
        let result = DelayOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result.get_field("delayed"), Some(&Value::Bool(true)));
    }
}
