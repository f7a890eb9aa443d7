//! Literal input/output scenarios exercised end to end through the
//! public `OperatorRegistry` + `InMemoryContext` surface.

use graphflow_engine::config::RuntimeConfig;
use graphflow_engine::context::{ExecutionContext, InMemoryContext};
use graphflow_engine::error::EngineErrorKind;
use graphflow_engine::node::{LegacyNodeData, Node, NodeData};
use graphflow_engine::operators::register_all;
use graphflow_engine::registry::OperatorRegistry;
use graphflow_engine::value::Value;

fn legacy_node(id: &str, node_type: &str, legacy: LegacyNodeData) -> Node {
    Node { id: id.to_string(), node_type: node_type.to_string(), data: NodeData::Legacy(legacy) }
}

fn ctx() -> InMemoryContext {
    InMemoryContext::new(RuntimeConfig::default())
}

fn extract_array(result: &Value) -> Vec<Value> {
    match result {
        Value::Array(items) => items.clone(),
        Value::Object(_) => result.get_field("results").and_then(|v| v.as_array()).map(|s| s.to_vec()).unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn range_map_filter_map_chain_produces_literal_squares() {
    let registry = OperatorRegistry::new();
    register_all(&registry).unwrap();
    let c = ctx();

    let range = legacy_node("range", "Range", LegacyNodeData { start: Some(1.0), end: Some(10.0), step: Some(1.0), ..Default::default() });
    let range_result = registry.execute(&c, &range).await.unwrap();

    let double = legacy_node("double", "Map", LegacyNodeData { expression: Some("item * 2".to_string()), ..Default::default() });
    c.set_node_inputs("double", vec![range_result]);
    let double_result = registry.execute(&c, &double).await.unwrap();

    let filter = legacy_node("filter", "Filter", LegacyNodeData { condition: Some("item > 10".to_string()), ..Default::default() });
    c.set_node_inputs("filter", vec![Value::Array(extract_array(&double_result))]);
    let filter_result = registry.execute(&c, &filter).await.unwrap();

    let square = legacy_node("square", "Map", LegacyNodeData { expression: Some("item * item".to_string()), ..Default::default() });
    c.set_node_inputs("square", vec![Value::Array(extract_array(&filter_result))]);
    let square_result = registry.execute(&c, &square).await.unwrap();

    let final_values: Vec<f64> = extract_array(&square_result).iter().map(|v| v.as_f64().unwrap()).collect();
    assert_eq!(final_values, vec![144.0, 196.0, 256.0, 324.0, 400.0]);
}

#[tokio::test]
async fn condition_reports_path_and_met_flags() {
    let registry = OperatorRegistry::new();
    register_all(&registry).unwrap();
    let c = ctx();

    let node = legacy_node("cond", "Condition", LegacyNodeData { condition: Some("input > 10".to_string()), ..Default::default() });
    c.set_node_inputs("cond", vec![Value::Number(15.0)]);
    let result = registry.execute(&c, &node).await.unwrap();

    assert_eq!(result.get_field("value"), Some(&Value::Number(15.0)));
    assert_eq!(result.get_field("condition_met"), Some(&Value::Bool(true)));
    assert_eq!(result.get_field("path"), Some(&Value::String("true".to_string())));
    assert_eq!(result.get_field("true_path"), Some(&Value::Bool(true)));
    assert_eq!(result.get_field("false_path"), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn reduce_sums_input_array() {
    let registry = OperatorRegistry::new();
    register_all(&registry).unwrap();
    let c = ctx();

    let node = legacy_node(
        "reduce",
        "Reduce",
        LegacyNodeData {
            value: Some(Value::Number(0.0)),
            expression: Some("accumulator + item".to_string()),
            ..Default::default()
        },
    );
    c.set_node_inputs("reduce", vec![Value::array([Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)])]);
    let result = registry.execute(&c, &node).await.unwrap();

    assert_eq!(result.get_field("final_value"), Some(&Value::Number(6.0)));
}

fn switch_case(when: Option<&str>, is_default: bool, output_path: &str) -> Value {
    let mut fields = vec![("is_default".to_string(), Value::Bool(is_default)), ("output_path".to_string(), Value::String(output_path.to_string()))];
    if let Some(when) = when {
        fields.push(("when".to_string(), Value::String(when.to_string())));
    }
    Value::object(fields)
}

fn switch_node(input: Value) -> (InMemoryContext, Node) {
    let c = ctx();
    c.set_node_inputs("switch", vec![input]);
    let legacy = LegacyNodeData {
        extra: [(
            "cases".to_string(),
            Value::array([
                switch_case(Some("input==10"), false, "p1"),
                switch_case(Some("input==20"), false, "p2"),
                switch_case(None, true, "d"),
            ]),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    (c, legacy_node("switch", "Switch", legacy))
}

#[tokio::test]
async fn switch_matches_first_true_case() {
    let registry = OperatorRegistry::new();
    register_all(&registry).unwrap();
    let (c, node) = switch_node(Value::Number(10.0));
    let result = registry.execute(&c, &node).await.unwrap();

    assert_eq!(result.get_field("matched"), Some(&Value::Bool(true)));
    assert_eq!(result.get_field("case"), Some(&Value::String("input==10".to_string())));
    assert_eq!(result.get_field("output_path"), Some(&Value::String("p1".to_string())));
}

#[tokio::test]
async fn switch_falls_through_to_default() {
    let registry = OperatorRegistry::new();
    register_all(&registry).unwrap();
    let (c, node) = switch_node(Value::Number(30.0));
    let result = registry.execute(&c, &node).await.unwrap();

    assert_eq!(result.get_field("matched"), Some(&Value::Bool(false)));
    assert_eq!(result.get_field("case"), Some(&Value::String("default".to_string())));
    assert_eq!(result.get_field("output_path"), Some(&Value::String("d".to_string())));
}

#[tokio::test]
async fn csv_parse_then_json_format_round_trips_the_mapping() {
    let registry = OperatorRegistry::new();
    register_all(&registry).unwrap();
    let c = ctx();

    c.set_node_inputs("parse", vec![Value::String("name,age\nAlice,30\nBob,25".to_string())]);
    let parse_node = legacy_node(
        "parse",
        "Parse",
        LegacyNodeData { extra: [("input_type".to_string(), Value::String("CSV".to_string()))].into_iter().collect(), ..Default::default() },
    );
    let parsed = registry.execute(&c, &parse_node).await.unwrap();

    let rows = parsed.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_field("name"), Some(&Value::String("Alice".to_string())));
    assert_eq!(rows[0].get_field("age"), Some(&Value::Number(30.0)));
    assert_eq!(rows[1].get_field("name"), Some(&Value::String("Bob".to_string())));
    assert_eq!(rows[1].get_field("age"), Some(&Value::Number(25.0)));

    c.set_node_inputs("format", vec![parsed.clone()]);
    let format_node = legacy_node(
        "format",
        "Format",
        LegacyNodeData {
            extra: [
                ("output_type".to_string(), Value::String("JSON".to_string())),
                ("pretty_print".to_string(), Value::Bool(true)),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        },
    );
    let formatted = registry.execute(&c, &format_node).await.unwrap();
    let text = formatted.as_str().unwrap();

    let reparsed: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(reparsed, parsed.to_json());
}

#[tokio::test]
async fn http_with_allow_http_false_rejects_plain_http() {
    let registry = OperatorRegistry::new();
    register_all(&registry).unwrap();
    let c = ctx(); // RuntimeConfig::default() has allow_http = false

    let node = legacy_node("http", "Http", LegacyNodeData { url: Some("http://example.com".to_string()), ..Default::default() });
    let err = registry.execute(&c, &node).await.unwrap_err();

    assert_eq!(err.kind(), EngineErrorKind::HttpRequestFailed);
    assert!(err.to_string().contains("AllowHTTP=false"));
}
