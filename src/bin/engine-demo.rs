//! A minimal, hard-coded walk over a small DAG to exercise the engine
//! end to end. This intentionally does not implement general graph
//! scheduling (topological sort, cycle detection, fan-in merges) — it
//! wires a fixed chain of nodes in a fixed order and prints what each
//! one produced.

use std::collections::BTreeMap;

use clap::Parser;
use graphflow_engine::config::RuntimeConfig;
use graphflow_engine::context::{ExecutionContext, InMemoryContext};
use graphflow_engine::node::{LegacyNodeData, Node, NodeData};
use graphflow_engine::operators::register_all;
use graphflow_engine::registry::OperatorRegistry;
use graphflow_engine::value::Value;

#[derive(Parser)]
#[command(name = "engine-demo")]
#[command(about = "Runs a small hard-coded Range -> Filter -> Map -> Map chain through the operator registry")]
#[command(version)]
struct Cli {
    /// Print every node's full result descriptor, not just the final array.
    #[arg(long)]
    verbose: bool,
}

fn legacy_node(id: &str, node_type: &str, legacy: LegacyNodeData) -> Node {
    Node { id: id.to_string(), node_type: node_type.to_string(), data: NodeData::Legacy(legacy) }
}

/// Pulls an array out of a node's result, whether the operator returned
/// a bare array (`Range`) or a descriptor object with a `results` field
/// (`Filter`, `Map`). A real scheduler would know each operator's output
/// shape from its registration metadata; this demo just hard-codes it
/// per step.
fn extract_array(result: &Value) -> Vec<Value> {
    match result {
        Value::Array(items) => items.clone(),
        Value::Object(_) => result.get_field("results").and_then(|v| v.as_array()).map(|s| s.to_vec()).unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let registry = OperatorRegistry::new();
    register_all(&registry)?;

    let ctx = InMemoryContext::new(RuntimeConfig::default());
    let mut results: BTreeMap<String, Value> = BTreeMap::new();

    // 1. Range(1, 10, 1) -> [1..10]
    let range_node = legacy_node(
        "range",
        "Range",
        LegacyNodeData { start: Some(1.0), end: Some(10.0), step: Some(1.0), ..Default::default() },
    );
    registry.validate(&range_node)?;
    ctx.increment_node_execution()?;
    let range_result = registry.execute(&ctx, &range_node).await?;
    ctx.set_node_result("range", range_result.clone());
    results.insert("range".to_string(), range_result.clone());

    // 2. Map(item * 2) -> double
    let double_node =
        legacy_node("double", "Map", LegacyNodeData { expression: Some("item * 2".to_string()), ..Default::default() });
    registry.validate(&double_node)?;
    ctx.set_node_inputs("double", vec![range_result]);
    ctx.increment_node_execution()?;
    let double_result = registry.execute(&ctx, &double_node).await?;
    ctx.set_node_result("double", double_result.clone());
    results.insert("double".to_string(), double_result.clone());

    // 3. Filter(item > 10) -> keep the upper half
    let filter_node =
        legacy_node("filter", "Filter", LegacyNodeData { condition: Some("item > 10".to_string()), ..Default::default() });
    registry.validate(&filter_node)?;
    ctx.set_node_inputs("filter", vec![Value::Array(extract_array(&double_result))]);
    ctx.increment_node_execution()?;
    let filter_result = registry.execute(&ctx, &filter_node).await?;
    ctx.set_node_result("filter", filter_result.clone());
    results.insert("filter".to_string(), filter_result.clone());

    // 4. Map(item * item) -> square
    let square_node =
        legacy_node("square", "Map", LegacyNodeData { expression: Some("item * item".to_string()), ..Default::default() });
    registry.validate(&square_node)?;
    ctx.set_node_inputs("square", vec![Value::Array(extract_array(&filter_result))]);
    ctx.increment_node_execution()?;
    let square_result = registry.execute(&ctx, &square_node).await?;
    ctx.set_node_result("square", square_result.clone());
    results.insert("square".to_string(), square_result.clone());

    let final_values = extract_array(&square_result);

    if cli.verbose {
        for (id, value) in &results {
            println!("--- {id} ---");
            println!("{}", serde_json::to_string_pretty(&value.to_json())?);
        }
    }

    println!("final: {}", serde_json::to_string_pretty(&Value::Array(final_values).to_json())?);
    println!(
        "nodes executed: {}, http calls: {}",
        ctx.node_execution_count(),
        ctx.http_call_count()
    );

    Ok(())
}
