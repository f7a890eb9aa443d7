//! Data-source operators: literal emitters, context writers, and Range
//! (§4.2).

use async_trait::async_trait;
use chrono::Utc;

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::node::{ContextValueEntry, Node};
use crate::registry::Operator;
use crate::value::{coerce, DeclaredType, Value};

pub struct NumberOperator;

#[async_trait]
impl Operator for NumberOperator {
    fn node_type(&self) -> &'static str {
        "Number"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.value {
            Some(Value::Number(_)) => Ok(()),
            _ => Err(EngineError::missing_field("value")),
        }
    }

    async fn execute(&self, _ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        match legacy.value.clone() {
            Some(v @ Value::Number(_)) => Ok(v),
            _ => Err(EngineError::missing_field("value")),
        }
    }
}

pub struct TextOperator;

#[async_trait]
impl Operator for TextOperator {
    fn node_type(&self) -> &'static str {
        "Text"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.value {
            Some(Value::String(_)) => Ok(()),
            _ => Err(EngineError::missing_field("value")),
        }
    }

    async fn execute(&self, _ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        match legacy.value.clone() {
            Some(v @ Value::String(_)) => Ok(v),
            _ => Err(EngineError::missing_field("value")),
        }
    }
}

pub struct BooleanOperator;

#[async_trait]
impl Operator for BooleanOperator {
    fn node_type(&self) -> &'static str {
        "Boolean"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        Ok(match legacy.value {
            Some(Value::Bool(b)) => Value::Bool(b),
            _ => Value::Bool(false),
        })
    }
}

pub struct DateTimeOperator;

#[async_trait]
impl Operator for DateTimeOperator {
    fn node_type(&self) -> &'static str {
        "DateTime"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.value {
            Some(_) => Ok(()),
            None => Err(EngineError::missing_field("value")),
        }
    }

    async fn execute(&self, _ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        match &legacy.value {
            Some(Value::Timestamp(t)) => Ok(Value::Timestamp(*t)),
            Some(Value::String(s)) => coerce(&Value::String(s.clone()), DeclaredType::TimeString)
                .and_then(|v| match v {
                    Value::String(s) => chrono::DateTime::parse_from_rfc3339(&s)
                        .map(|dt| Value::Timestamp(dt.with_timezone(&Utc)))
                        .map_err(|e| EngineError::invalid_input(e.to_string())),
                    _ => unreachable!(),
                }),
            None => Err(EngineError::missing_field("value")),
            _ => Err(EngineError::type_mismatch("timestamp or time string", "other")),
        }
    }
}

fn write_context_entries(
    ctx: &dyn ExecutionContext,
    entries: &[ContextValueEntry],
    is_variable: bool,
) -> EngineResult<Vec<(String, Value)>> {
    let mut written = Vec::with_capacity(entries.len());
    for entry in entries {
        let declared = DeclaredType::parse(&entry.declared_type)?;
        let coerced = coerce(&entry.value, declared)?;
        if is_variable {
            ctx.set_context_variable(&entry.name, coerced.clone());
        } else {
            ctx.set_context_constant(&entry.name, coerced.clone());
        }
        written.push((entry.name.clone(), coerced));
    }
    Ok(written)
}

pub struct ContextConstantOperator;

#[async_trait]
impl Operator for ContextConstantOperator {
    fn node_type(&self) -> &'static str {
        "ContextConstant"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        if legacy.context_values.is_none() && legacy.context_name.is_none() {
            return Err(EngineError::missing_field("context_name or context_values"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let entries = legacy.context_values.clone().unwrap_or_else(|| {
            vec![ContextValueEntry {
                name: legacy.context_name.clone().unwrap_or_default(),
                value: legacy.context_value.clone().unwrap_or(Value::Null),
                declared_type: "string".to_string(),
            }]
        });
        let written = write_context_entries(ctx, &entries, false)?;
        Ok(Value::object([
            ("type".to_string(), Value::String("constant".to_string())),
            ("constants".to_string(), Value::array(written.into_iter().map(|(n, v)| Value::object([
                ("name".to_string(), Value::String(n)),
                ("value".to_string(), v),
            ])))),
        ]))
    }
}

pub struct ContextVariableOperator;

#[async_trait]
impl Operator for ContextVariableOperator {
    fn node_type(&self) -> &'static str {
        "ContextVariable"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        if legacy.context_values.is_none() && legacy.context_name.is_none() {
            return Err(EngineError::missing_field("context_name or context_values"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let entries = legacy.context_values.clone().unwrap_or_else(|| {
            vec![ContextValueEntry {
                name: legacy.context_name.clone().unwrap_or_default(),
                value: legacy.context_value.clone().unwrap_or(Value::Null),
                declared_type: "string".to_string(),
            }]
        });
        let written = write_context_entries(ctx, &entries, true)?;
        Ok(Value::object([
            ("type".to_string(), Value::String("variable".to_string())),
            ("variables".to_string(), Value::array(written.into_iter().map(|(n, v)| Value::object([
                ("name".to_string(), Value::String(n)),
                ("value".to_string(), v),
            ])))),
        ]))
    }
}

pub const RANGE_MAX_ITEMS: usize = 10_000;

pub struct RangeOperator;

#[async_trait]
impl Operator for RangeOperator {
    fn node_type(&self) -> &'static str {
        "Range"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let (start, end, step) = node.data.range_bounds()?;
        validate_range(start, end, step)
    }

    async fn execute(&self, _ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let (start, end, step) = node.data.range_bounds()?;
        validate_range(start, end, step)?;
        let mut items = Vec::new();
        let mut current = start;
        loop {
            if step > 0.0 {
                if current > end {
                    break;
                }
            } else if current < end {
                break;
            }
            items.push(Value::Number(current));
            if items.len() > RANGE_MAX_ITEMS {
                return Err(EngineError::ArrayTooLarge { len: items.len(), limit: RANGE_MAX_ITEMS });
            }
            current += step;
        }
        Ok(Value::Array(items))
    }
}

fn validate_range(start: f64, end: f64, step: f64) -> EngineResult<()> {
    if step == 0.0 {
        return Err(EngineError::invalid_input("Range step must not be 0"));
    }
    if (step > 0.0 && start > end) || (step < 0.0 && start < end) {
        return Err(EngineError::invalid_input("Range step direction does not match bounds"));
    }
    Ok(())
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

    #[tokio::test]
    async fn range_inclusive_bounds() {
        let n = node_with(LegacyNodeData { start: Some(1.0), end: Some(5.0), step: Some(1.0), ..Default::default() });
        let result = RangeOperator.execute(&ctx(), &n).await.unwrap();
        assert_eq!(
            result,
            Value::Array(vec![
                Value::Number(1.0),
                Value::Number(2.0),
                Value::Number(3.0),
                Value::Number(4.0),
                Value::Number(5.0)
            ])
        );
    }

    #[test]
    fn range_rejects_zero_step() {
        let n = node_with(LegacyNodeData { start: Some(1.0), end: Some(5.0), step: Some(0.0), ..Default::default() });
        assert!(RangeOperator.validate(&n).is_err());
    }

    #[test]
    fn range_rejects_direction_mismatch() {
        let n = node_with(LegacyNodeData { start: Some(1.0), end: Some(5.0), step: Some(-1.0), ..Default::default() });
        assert!(RangeOperator.validate(&n).is_err());
    }

    #[tokio::test]
    async fn range_rejects_over_cap() {
        let n = node_with(LegacyNodeData {
            start: Some(0.0),
            end: Some(1_000_000.0),
            step: Some(1.0),
            ..Default::default()
        });
        assert!(RangeOperator.execute(&ctx(), &n).await.is_err());
    }

    #[tokio::test]
    async fn context_variable_writes_and_coerces() {
        let c = ctx();
        let n = node_with(LegacyNodeData {
            context_values: Some(vec![ContextValueEntry {
                name: "count".to_string(),
                value: Value::String("5".to_string()),
                declared_type: "number".to_string(),
            }]),
            ..Default::default()
        });
        ContextVariableOperator.execute(&c, &n).await.unwrap();
        assert_eq!(c.get_context_variable("count"), Some(Value::Number(5.0)));
    }
}
