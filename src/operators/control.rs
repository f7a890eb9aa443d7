//! Control-flow operators: Condition, Switch, ForEach, WhileLoop, Join,
//! Parallel (§4.4).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::expr::{evaluate_expression, Bindings};
use crate::helpers::evaluate_mini_language;
use crate::node::Node;
use crate::registry::Operator;
use crate::value::Value;

fn primary_input(ctx: &dyn ExecutionContext, node: &Node) -> Value {
    ctx.get_node_inputs(&node.id).into_iter().next().unwrap_or(Value::Null)
}

pub struct ConditionOperator;

#[async_trait]
impl Operator for ConditionOperator {
    fn node_type(&self) -> &'static str {
        "Condition"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        if legacy.condition.is_none() {
            return Err(EngineError::missing_field("condition"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let condition = legacy.condition.clone().unwrap_or_default();
        let input = primary_input(ctx, node);
        let bindings = Bindings::input(input.clone());

        let condition_met = match evaluate_expression(&condition, &bindings, ctx) {
            Ok(v) => v.is_truthy(),
            Err(_) => evaluate_mini_language(&condition, &input),
        };

        Ok(Value::object([
            ("value".to_string(), input),
            ("condition_met".to_string(), Value::Bool(condition_met)),
            ("condition".to_string(), Value::String(condition)),
            ("path".to_string(), Value::String(if condition_met { "true" } else { "false" }.to_string())),
            ("true_path".to_string(), Value::Bool(condition_met)),
            ("false_path".to_string(), Value::Bool(!condition_met)),
        ]))
    }
}

struct CaseView {
    when: Option<String>,
    is_default: bool,
    output_path: String,
}

fn switch_cases(node: &Node) -> EngineResult<Vec<CaseView>> {
    if let Ok(typed) = node.data.as_switch_data() {
        return Ok(typed
            .cases
            .iter()
            .map(|c| CaseView { when: c.when.clone(), is_default: c.is_default, output_path: c.output_path.clone() })
            .collect());
    }
    let legacy = node.data.as_legacy()?;
    let raw = legacy.extra_array("cases").ok_or_else(|| EngineError::missing_field("cases"))?;
    raw.iter()
        .map(|v| {
            let when = v.get_field("when").and_then(|w| w.as_str()).map(|s| s.to_string());
            let is_default = v.get_field("is_default").and_then(|b| b.as_bool()).unwrap_or(false);
            let output_path = v
                .get_field("output_path")
                .and_then(|p| p.as_str())
                .ok_or_else(|| EngineError::missing_field("output_path"))?
                .to_string();
            Ok(CaseView { when, is_default, output_path })
        })
        .collect()
}

pub struct SwitchOperator;

#[async_trait]
impl Operator for SwitchOperator {
    fn node_type(&self) -> &'static str {
        "Switch"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let cases = switch_cases(node)?;
        match cases.last() {
            Some(last) if last.is_default => Ok(()),
            _ => Err(EngineError::invalid_input("Switch's last case must be the default case")),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let cases = switch_cases(node)?;
        let input = primary_input(ctx, node);
        let bindings = Bindings::input(input.clone());

        for case in &cases {
            if case.is_default {
                return Ok(Value::object([
                    ("matched".to_string(), Value::Bool(false)),
                    ("case".to_string(), Value::String("default".to_string())),
                    ("output_path".to_string(), Value::String(case.output_path.clone())),
                ]));
            }
            let when = case.when.as_deref().unwrap_or_default();
            let matched = match evaluate_expression(when, &bindings, ctx) {
                Ok(v) => v.is_truthy(),
                Err(_) => evaluate_mini_language(when, &input),
            };
            if matched {
                return Ok(Value::object([
                    ("matched".to_string(), Value::Bool(true)),
                    ("case".to_string(), Value::String(when.to_string())),
                    ("output_path".to_string(), Value::String(case.output_path.clone())),
                ]));
            }
        }
        Err(EngineError::invalid_input("Switch has no default case"))
    }
}

pub struct ForEachOperator;

#[async_trait]
impl Operator for ForEachOperator {
    fn node_type(&self) -> &'static str {
        "ForEach"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        let mode = legacy.extra_str("mode").unwrap_or("map");
        if mode == "filter_map" && legacy.condition.is_none() {
            return Err(EngineError::missing_field("condition"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let mode = legacy.extra_str("mode").unwrap_or("map").to_string();
        let max_iterations = legacy.extra_f64("max_iterations").unwrap_or(1000.0) as usize;
        let input = primary_input(ctx, node);
        let items = input.as_array().map(|a| a.to_vec()).unwrap_or_default();

        if items.len() > max_iterations {
            return Err(EngineError::MaxLoopIterations { max: max_iterations as u64 });
        }

        // TODO: materialize and execute child sub-graphs per iteration once
        // the outer scheduler exposes an integration point for it; today
        // this operator only counts iterations.
        let passthrough = mode == "metadata" || mode == "foreach";
        Ok(Value::object([
            ("mode".to_string(), Value::String(mode)),
            ("iterations".to_string(), Value::Number(items.len() as f64)),
            ("items".to_string(), if passthrough { Value::Array(items) } else { Value::Null }),
        ]))
    }
}

pub struct WhileLoopOperator;

#[async_trait]
impl Operator for WhileLoopOperator {
    fn node_type(&self) -> &'static str {
        "WhileLoop"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        if legacy.condition.is_none() {
            return Err(EngineError::missing_field("condition"));
        }
        Ok(())
    }

    async fn execute(&self, _ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let condition = legacy.condition.clone().unwrap_or_default();
        let step = legacy.extra_f64("step").unwrap_or(1.0);
        let max_iterations = legacy.extra_f64("max_iterations").unwrap_or(100.0) as u64;
        let mut value = legacy.value.clone().unwrap_or(Value::Number(0.0));
        let mut iterations = 0u64;

        while evaluate_mini_language(&condition, &value) {
            iterations += 1;
            if iterations > max_iterations {
                return Err(EngineError::MaxLoopIterations { max: max_iterations });
            }
            if let Value::Number(n) = value {
                value = Value::Number(n + step);
            } else {
                break;
            }
        }

        Ok(Value::object([
            ("iterations".to_string(), Value::Number(iterations as f64)),
            ("final_value".to_string(), value),
            ("exited".to_string(), Value::Bool(true)),
        ]))
    }
}

pub struct JoinOperator;

#[async_trait]
impl Operator for JoinOperator {
    fn node_type(&self) -> &'static str {
        "Join"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("strategy").unwrap_or("all") {
            "all" | "any" | "first" => Ok(()),
            other => Err(EngineError::UnsupportedOperation { operation: format!("join strategy '{other}'") }),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let strategy = legacy.extra_str("strategy").unwrap_or("all");
        let inputs = ctx.get_node_inputs(&node.id);
        match strategy {
            "all" => Ok(Value::Array(inputs)),
            "any" | "first" => inputs.into_iter().next().ok_or_else(|| EngineError::invalid_input("Join: no inputs available")),
            other => Err(EngineError::UnsupportedOperation { operation: format!("join strategy '{other}'") }),
        }
    }
}

pub struct ParallelOperator;

#[async_trait]
impl Operator for ParallelOperator {
    fn node_type(&self) -> &'static str {
        "Parallel"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let max_concurrency = legacy.extra_f64("max_concurrency").unwrap_or(10.0).max(1.0) as usize;
        let inputs = ctx.get_node_inputs(&node.id);

        let errors: Vec<String> = inputs
            .iter()
            .filter_map(|v| v.get_field("error").and_then(|e| e.as_str()).map(|s| s.to_string()))
            .collect();
        if !errors.is_empty() {
            return Err(EngineError::OperationFailed { message: errors.join("; ") });
        }

        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let mut set = JoinSet::new();
        for (index, input) in inputs.into_iter().enumerate() {
            let permit_source = semaphore.clone();
            set.spawn(async move {
                let _permit = permit_source.acquire_owned().await;
                (index, input)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            let pair = joined.map_err(|e| EngineError::OperationFailed { message: e.to_string() })?;
            results.push(pair);
        }
        results.sort_by_key(|(index, _)| *index);
        Ok(Value::Array(results.into_iter().map(|(_, v)| v).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::context::InMemoryContext;
    use crate::node::{LegacyNodeData, NodeData, SwitchCase, SwitchData, TypedNodeData};

    fn ctx() -> InMemoryContext {
        InMemoryContext::new(RuntimeConfig::default())
    }

    fn node_with(legacy: LegacyNodeData) -> Node {
        Node { id: "n".into(), node_type: "x".into(), data: NodeData::Legacy(legacy) }
    }

    #[tokio::test]
    async fn condition_matches_scenario() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::Number(15.0)]);
        let n = node_with(LegacyNodeData { condition: Some("input>10".to_string()), ..Default::default() });
        let result = ConditionOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result.get_field("condition_met"), Some(&Value::Bool(true)));
        assert_eq!(result.get_field("path"), Some(&Value::String("true".to_string())));
    }

    #[tokio::test]
    async fn switch_matches_first_true_case() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::Number(10.0)]);
        let data = NodeData::Typed(TypedNodeData::Switch(SwitchData {
            cases: vec![
                SwitchCase { when: Some("input==10".to_string()), is_default: false, output_path: "p1".to_string() },
                SwitchCase { when: Some("input==20".to_string()), is_default: false, output_path: "p2".to_string() },
                SwitchCase { when: None, is_default: true, output_path: "d".to_string() },
            ],
        }));
        let n = Node { id: "n".into(), node_type: "Switch".into(), data };
        let result = SwitchOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result.get_field("output_path"), Some(&Value::String("p1".to_string())));
    }

    #[tokio::test]
    async fn switch_falls_back_to_default() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::Number(30.0)]);
        let data = NodeData::Typed(TypedNodeData::Switch(SwitchData {
            cases: vec![
                SwitchCase { when: Some("input==10".to_string()), is_default: false, output_path: "p1".to_string() },
                SwitchCase { when: None, is_default: true, output_path: "d".to_string() },
            ],
        }));
        let n = Node { id: "n".into(), node_type: "Switch".into(), data };
        let result = SwitchOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result.get_field("matched"), Some(&Value::Bool(false)));
        assert_eq!(result.get_field("output_path"), Some(&Value::String("d".to_string())));
    }

    #[tokio::test]
    async fn while_loop_exceeding_cap_fails() {
        let mut extra = std::collections::BTreeMap::new();
        extra.insert("max_iterations".to_string(), Value::Number(3.0));
        let n = node_with(LegacyNodeData {
            condition: Some("<1000".to_string()),
            value: Some(Value::Number(0.0)),
            extra,
            ..Default::default()
        });
        let result = WhileLoopOperator.execute(&ctx(), &n).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn parallel_preserves_input_order() {
        let c = ctx();
        c.set_node_inputs("n", vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        let n = node_with(LegacyNodeData::default());
        let result = ParallelOperator.execute(&c, &n).await.unwrap();
        assert_eq!(result, Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]));
    }
}
