//! SchemaValidator operator: validates a value against an embedded
//! JSON-Schema document (§4.3).

use async_trait::async_trait;
use jsonschema::JSONSchema;

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::node::Node;
use crate::registry::Operator;
use crate::value::Value;

fn schema_json(node: &Node) -> EngineResult<serde_json::Value> {
    let legacy = node.data.as_legacy()?;
    let schema_value = legacy.extra("schema").ok_or_else(|| EngineError::missing_field("schema"))?;
    Ok(schema_value.to_json())
}

pub struct SchemaValidatorOperator;

#[async_trait]
impl Operator for SchemaValidatorOperator {
    fn node_type(&self) -> &'static str {
        "SchemaValidator"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        // Compile eagerly so a malformed schema fails at validation time,
        // not on first execution. `JSONSchema` borrows its source document,
        // so it can't outlive this call — only the compile outcome matters
        // here.
        let schema = schema_json(node)?;
        JSONSchema::compile(&schema).map_err(|e| EngineError::InvalidInputValue { message: format!("invalid JSON Schema: {e}") })?;
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let strict = legacy.extra_bool("strict").unwrap_or(false);
        let input = ctx.get_node_inputs(&node.id).into_iter().next().unwrap_or(Value::Null);
        let instance = input.to_json();

        let schema = schema_json(node)?;
        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| EngineError::InvalidInputValue { message: format!("invalid JSON Schema: {e}") })?;
        let result = compiled.validate(&instance);

        match result {
            Ok(()) => Ok(Value::object([
                ("valid".to_string(), Value::Bool(true)),
                ("data".to_string(), input),
            ])),
            Err(errors) => {
                if strict {
                    let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
                    return Err(EngineError::InvalidInputValue { message: messages.join("; ") });
                }
                let errors: Vec<Value> = errors
                    .map(|e| {
                        Value::object([
                            ("field".to_string(), Value::String(e.instance_path.to_string())),
                            ("type".to_string(), Value::String(format!("{:?}", e.kind))),
                            ("description".to_string(), Value::String(e.to_string())),
                            ("value".to_string(), Value::from_json(&e.instance)),
                        ])
                    })
                    .collect();
                Ok(Value::object([
                    ("valid".to_string(), Value::Bool(false)),
                    ("data".to_string(), input),
                    ("errors".to_string(), Value::Array(errors)),
                ]))
            }
        }
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

    fn schema_node(schema: serde_json::Value, strict: bool) -> Node {
        let legacy = LegacyNodeData {
            extra: [
                ("schema".to_string(), Value::from_json(&schema)),
                ("strict".to_string(), Value::Bool(strict)),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        Node { id: "n".into(), node_type: "SchemaValidator".into(), data: NodeData::Legacy(legacy) }
    }

    #[tokio::test]
    async fn valid_input_passes() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::object([("age".to_string(), Value::Number(30.0))])]);
        let node = schema_node(
            serde_json::json!({"type": "object", "properties": {"age": {"type": "number"}}, "required": ["age"]}),
            false,
        );
        let result = SchemaValidatorOperator.execute(&c, &node).await.unwrap();
        assert_eq!(result.get_field("valid"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn non_strict_failure_returns_error_descriptors() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::object([("age".to_string(), Value::String("thirty".to_string()))])]);
        let node = schema_node(
            serde_json::json!({"type": "object", "properties": {"age": {"type": "number"}}, "required": ["age"]}),
            false,
        );
        let result = SchemaValidatorOperator.execute(&c, &node).await.unwrap();
        assert_eq!(result.get_field("valid"), Some(&Value::Bool(false)));
        assert!(!result.get_field("errors").unwrap().as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn strict_failure_propagates_error() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::object([("age".to_string(), Value::String("thirty".to_string()))])]);
        let node = schema_node(
            serde_json::json!({"type": "object", "properties": {"age": {"type": "number"}}, "required": ["age"]}),
            true,
        );
        assert!(SchemaValidatorOperator.execute(&c, &node).await.is_err());
    }
}
