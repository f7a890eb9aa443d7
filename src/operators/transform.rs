//! Array/value transform operators (§4.3). Each validates, coerces its
//! numeric/string config, performs the operation, and returns a
//! descriptor carrying the primary output plus diagnostics.

use async_trait::async_trait;
use fastrand::Rng;

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::expr::{evaluate_condition, evaluate_condition_checked, evaluate_expression, Bindings};
use crate::node::Node;
use crate::registry::Operator;
use crate::value::Value;

fn primary_input(ctx: &dyn ExecutionContext, node: &Node) -> Value {
    ctx.get_node_inputs(&node.id).into_iter().next().unwrap_or(Value::Null)
}

fn as_array_or_recover(value: &Value) -> Option<Vec<Value>> {
    if let Value::Array(a) = value {
        return Some(a.clone());
    }
    if let Value::Object(_) = value {
        for key in ["range", "array", "items", "data", "values"] {
            if let Some(Value::Array(a)) = value.get_field(key) {
                return Some(a.clone());
            }
        }
    }
    None
}

/// Map's config, narrowed from either the typed `MapData` variant or the
/// legacy catch-all shape (mirrors `control::switch_cases`'s pattern).
fn map_fields(node: &Node) -> EngineResult<(Option<String>, Option<String>)> {
    if let Ok(typed) = node.data.as_map_data() {
        return Ok((typed.expression.clone(), typed.field.clone()));
    }
    let legacy = node.data.as_legacy()?;
    Ok((legacy.expression.clone(), legacy.field.clone()))
}

pub struct MapOperator;

#[async_trait]
impl Operator for MapOperator {
    fn node_type(&self) -> &'static str {
        "Map"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let (expression, field) = map_fields(node)?;
        match (&expression, &field) {
            (Some(_), Some(_)) => Err(EngineError::invalid_input("Map requires exactly one of expression/field")),
            (None, None) => Err(EngineError::invalid_input("Map requires expression or field")),
            _ => Ok(()),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let (expression, field) = map_fields(node)?;
        let input = primary_input(ctx, node);
        let items = as_array_or_recover(&input).ok_or(EngineError::NotAnArray)?;
        let mut results = Vec::with_capacity(items.len());
        let mut successful = 0usize;
        let mut failed = 0usize;

        for (index, item) in items.iter().enumerate() {
            let outcome = if let Some(field) = &field {
                item.get_field(field).cloned().ok_or_else(|| EngineError::missing_field(field.clone()))
            } else {
                let expr = expression.as_deref().unwrap_or_default();
                let bindings = Bindings::new()
                    .with("item", item.clone())
                    .with("index", Value::Number(index as f64))
                    .with("items", Value::Array(items.clone()));
                evaluate_expression(expr, &bindings, ctx)
            };
            match outcome {
                Ok(v) => {
                    successful += 1;
                    results.push(v);
                }
                Err(_) => {
                    failed += 1;
                    results.push(Value::Null);
                }
            }
        }

        Ok(Value::object([
            ("results".to_string(), Value::Array(results)),
            ("input_count".to_string(), Value::Number(items.len() as f64)),
            ("output_count".to_string(), Value::Number(successful as f64)),
            ("successful".to_string(), Value::Number(successful as f64)),
            ("failed".to_string(), Value::Number(failed as f64)),
        ]))
    }
}

/// Filter's condition string, narrowed from either the typed `FilterData`
/// variant or the legacy catch-all shape.
fn filter_condition(node: &Node) -> EngineResult<String> {
    if let Ok(typed) = node.data.as_filter_data() {
        return Ok(typed.condition.clone());
    }
    let legacy = node.data.as_legacy()?;
    legacy.condition.clone().ok_or_else(|| EngineError::missing_field("condition"))
}

pub struct FilterOperator;

#[async_trait]
impl Operator for FilterOperator {
    fn node_type(&self) -> &'static str {
        "Filter"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        filter_condition(node).map(|_| ())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let condition = filter_condition(node)?;
        let condition = condition.as_str();
        let input = primary_input(ctx, node);

        let Some(items) = as_array_or_recover(&input) else {
            return Ok(Value::object([
                ("is_array".to_string(), Value::Bool(false)),
                ("value".to_string(), input),
            ]));
        };

        let mut passed = Vec::new();
        let mut error_count = 0usize;
        let mut skipped_count = 0usize;
        for (index, item) in items.iter().enumerate() {
            let bindings = Bindings::new().with("item", item.clone()).with("index", Value::Number(index as f64));
            match evaluate_condition_checked(condition, &bindings, ctx) {
                Ok(true) => passed.push(item.clone()),
                Ok(false) => skipped_count += 1,
                Err(_) => error_count += 1,
            }
        }

        Ok(Value::object([
            ("is_array".to_string(), Value::Bool(true)),
            ("results".to_string(), Value::Array(passed)),
            ("input_count".to_string(), Value::Number(items.len() as f64)),
            ("error_count".to_string(), Value::Number(error_count as f64)),
            ("skipped_count".to_string(), Value::Number(skipped_count as f64)),
        ]))
    }
}

/// Reduce's config, narrowed from either the typed `ReduceData` variant or
/// the legacy catch-all shape.
fn reduce_fields(node: &Node) -> EngineResult<(String, Option<Value>)> {
    if let Ok(typed) = node.data.as_reduce_data() {
        return Ok((typed.expression.clone(), typed.initial_value.clone()));
    }
    let legacy = node.data.as_legacy()?;
    let expression = legacy.expression.clone().ok_or_else(|| EngineError::missing_field("expression"))?;
    Ok((expression, legacy.value.clone()))
}

pub struct ReduceOperator;

#[async_trait]
impl Operator for ReduceOperator {
    fn node_type(&self) -> &'static str {
        "Reduce"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        reduce_fields(node).map(|_| ())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let (expr, initial_value) = reduce_fields(node)?;
        let expr = expr.as_str();
        let initial = initial_value.unwrap_or(Value::Number(0.0));
        let input = primary_input(ctx, node);
        let items = as_array_or_recover(&input).ok_or(EngineError::NotAnArray)?;

        let mut accumulator = initial.clone();
        let mut successful = 0usize;
        let mut failed = 0usize;
        for (index, item) in items.iter().enumerate() {
            let bindings = Bindings::new()
                .with("accumulator", accumulator.clone())
                .with("item", item.clone())
                .with("index", Value::Number(index as f64))
                .with("items", Value::Array(items.clone()));
            match evaluate_expression(expr, &bindings, ctx) {
                Ok(v) => {
                    accumulator = v;
                    successful += 1;
                }
                Err(_) => failed += 1,
            }
        }

        Ok(Value::object([
            ("result".to_string(), accumulator.clone()),
            ("initial_value".to_string(), initial),
            ("final_value".to_string(), accumulator),
            ("iterations".to_string(), Value::Number(items.len() as f64)),
            ("successful".to_string(), Value::Number(successful as f64)),
            ("failed".to_string(), Value::Number(failed as f64)),
        ]))
    }
}

/// Sort's config, narrowed from either the typed `SortData` variant or the
/// legacy catch-all shape.
fn sort_fields(node: &Node) -> EngineResult<(Option<String>, bool)> {
    if let Ok(typed) = node.data.as_sort_data() {
        return Ok((typed.field.clone(), typed.order.eq_ignore_ascii_case("desc")));
    }
    let legacy = node.data.as_legacy()?;
    let descending = legacy.extra_str("order").unwrap_or("asc").eq_ignore_ascii_case("desc");
    Ok((legacy.field.clone(), descending))
}

pub struct SortOperator;

#[async_trait]
impl Operator for SortOperator {
    fn node_type(&self) -> &'static str {
        "Sort"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        sort_fields(node).map(|_| ())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let (field, descending) = sort_fields(node)?;
        let input = primary_input(ctx, node);
        let mut items = as_array_or_recover(&input).ok_or(EngineError::NotAnArray)?;

        items.sort_by(|a, b| {
            let av = field.as_ref().and_then(|f| a.get_field(f)).cloned().unwrap_or(Value::Null);
            let bv = field.as_ref().and_then(|f| b.get_field(f)).cloned().unwrap_or(Value::Null);
            let ord = av.compare(&bv);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });

        Ok(Value::object([
            ("sorted".to_string(), Value::Array(items.clone())),
            ("input_count".to_string(), Value::Number(items.len() as f64)),
            ("output_count".to_string(), Value::Number(items.len() as f64)),
        ]))
    }
}

macro_rules! simple_array_operator {
    ($name:ident, $tag:literal) => {
        pub struct $name;

        impl $name {
            fn items(ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Vec<Value>> {
                let input = primary_input(ctx, node);
                as_array_or_recover(&input).ok_or(EngineError::NotAnArray)
            }
        }
    };
}

simple_array_operator!(SliceOperator, "Slice");

#[async_trait]
impl Operator for SliceOperator {
    fn node_type(&self) -> &'static str {
        "Slice"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let items = Self::items(ctx, node)?;
        let len = items.len() as i64;

        let resolve = |v: i64| -> i64 {
            if v < 0 {
                (len + v).max(0)
            } else {
                v.min(len)
            }
        };

        let start = resolve(legacy.extra_f64("start").unwrap_or(0.0) as i64);
        let end = if let Some(length) = legacy.extra_f64("length") {
            (start + length as i64).min(len)
        } else {
            resolve(legacy.extra_f64("end").unwrap_or(len as f64) as i64)
        };

        let sliced: Vec<Value> = if start >= end { Vec::new() } else { items[start as usize..end as usize].to_vec() };

        Ok(Value::object([
            ("sliced".to_string(), Value::Array(sliced.clone())),
            ("input_count".to_string(), Value::Number(items.len() as f64)),
            ("output_count".to_string(), Value::Number(sliced.len() as f64)),
        ]))
    }
}

simple_array_operator!(ChunkOperator, "Chunk");

#[async_trait]
impl Operator for ChunkOperator {
    fn node_type(&self) -> &'static str {
        "Chunk"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        if legacy.extra_f64("size").map(|s| s <= 0.0).unwrap_or(true) {
            return Err(EngineError::invalid_input("Chunk requires size > 0"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let size = legacy.extra_f64("size").unwrap_or(1.0).max(1.0) as usize;
        let items = Self::items(ctx, node)?;
        let chunks: Vec<Value> = items.chunks(size).map(|c| Value::Array(c.to_vec())).collect();

        Ok(Value::object([
            ("chunks".to_string(), Value::Array(chunks.clone())),
            ("input_count".to_string(), Value::Number(items.len() as f64)),
            ("output_count".to_string(), Value::Number(chunks.len() as f64)),
        ]))
    }
}

simple_array_operator!(SampleOperator, "Sample");

#[async_trait]
impl Operator for SampleOperator {
    fn node_type(&self) -> &'static str {
        "Sample"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let method = legacy.extra_str("method").unwrap_or("first");
        let count = legacy.extra_f64("count").unwrap_or(1.0).max(0.0) as usize;
        let mut items = Self::items(ctx, node)?;

        let sample = match method {
            "last" => {
                let start = items.len().saturating_sub(count);
                items.split_off(start)
            }
            "random" => {
                let rng = Rng::new();
                let n = count.min(items.len());
                for i in 0..n {
                    let j = i + (rng.usize(0..(items.len() - i)));
                    items.swap(i, j);
                }
                items.truncate(n);
                items
            }
            _ => {
                items.truncate(count);
                items
            }
        };

        Ok(Value::object([
            ("sample".to_string(), Value::Array(sample.clone())),
            ("method".to_string(), Value::String(method.to_string())),
            ("output_count".to_string(), Value::Number(sample.len() as f64)),
        ]))
    }
}

simple_array_operator!(ReverseOperator, "Reverse");

#[async_trait]
impl Operator for ReverseOperator {
    fn node_type(&self) -> &'static str {
        "Reverse"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let mut items = Self::items(ctx, node)?;
        items.reverse();
        Ok(Value::object([
            ("reversed".to_string(), Value::Array(items.clone())),
            ("output_count".to_string(), Value::Number(items.len() as f64)),
        ]))
    }
}

simple_array_operator!(UniqueOperator, "Unique");

#[async_trait]
impl Operator for UniqueOperator {
    fn node_type(&self) -> &'static str {
        "Unique"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let field = legacy.field.clone();
        let items = Self::items(ctx, node)?;
        let mut seen = std::collections::BTreeSet::new();
        let mut unique = Vec::new();
        for item in items.iter() {
            let key = field.as_ref().and_then(|f| item.get_field(f)).unwrap_or(item).stringify();
            if seen.insert(key) {
                unique.push(item.clone());
            }
        }
        Ok(Value::object([
            ("unique".to_string(), Value::Array(unique.clone())),
            ("input_count".to_string(), Value::Number(items.len() as f64)),
            ("output_count".to_string(), Value::Number(unique.len() as f64)),
        ]))
    }
}

simple_array_operator!(TransposeOperator, "Transpose");

#[async_trait]
impl Operator for TransposeOperator {
    fn node_type(&self) -> &'static str {
        "Transpose"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let rows = Self::items(ctx, node)?;
        let row_arrays: Option<Vec<Vec<Value>>> = rows.iter().map(|r| r.as_array().map(|a| a.to_vec())).collect();
        let Some(row_arrays) = row_arrays else {
            return Ok(Value::object([
                ("error".to_string(), Value::String("Transpose requires a 2D array".to_string())),
                ("transposed".to_string(), Value::Null),
            ]));
        };
        let width = row_arrays.first().map(|r| r.len()).unwrap_or(0);
        if row_arrays.iter().any(|r| r.len() != width) {
            return Ok(Value::object([
                ("error".to_string(), Value::String("Transpose requires rectangular input".to_string())),
                ("transposed".to_string(), Value::Null),
            ]));
        }
        let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(row_arrays.len()); width];
        for row in &row_arrays {
            for (i, v) in row.iter().enumerate() {
                columns[i].push(v.clone());
            }
        }
        Ok(Value::object([
            ("transposed".to_string(), Value::Array(columns.into_iter().map(Value::Array).collect())),
        ]))
    }
}

simple_array_operator!(FlatMapOperator, "FlatMap");

#[async_trait]
impl Operator for FlatMapOperator {
    fn node_type(&self) -> &'static str {
        "FlatMap"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let field = legacy.field.clone();
        let items = Self::items(ctx, node)?;
        let mut flattened = Vec::new();
        for item in items.iter() {
            let candidate = match &field {
                Some(f) => item.get_field(f).cloned().unwrap_or(Value::Null),
                None => item.clone(),
            };
            match candidate {
                Value::Array(a) => flattened.extend(a),
                other => flattened.push(other),
            }
        }
        Ok(Value::object([
            ("flattened".to_string(), Value::Array(flattened.clone())),
            ("input_count".to_string(), Value::Number(items.len() as f64)),
            ("output_count".to_string(), Value::Number(flattened.len() as f64)),
        ]))
    }
}

simple_array_operator!(GroupByOperator, "GroupBy");

#[async_trait]
impl Operator for GroupByOperator {
    fn node_type(&self) -> &'static str {
        "GroupBy"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        let aggregate = legacy.extra_str("aggregate").unwrap_or("count");
        if matches!(aggregate, "sum" | "avg" | "min" | "max") && legacy.extra_str("value_field").is_none() {
            return Err(EngineError::missing_field("value_field"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let field = legacy.field.clone().ok_or_else(|| EngineError::missing_field("field"))?;
        let aggregate = legacy.extra_str("aggregate").unwrap_or("count").to_string();
        let value_field = legacy.extra_str("value_field").map(|s| s.to_string());
        let items = Self::items(ctx, node)?;

        let mut groups: std::collections::BTreeMap<String, Vec<Value>> = std::collections::BTreeMap::new();
        for item in items.iter() {
            let key = item.get_field(&field).cloned().unwrap_or(Value::Null).stringify();
            groups.entry(key).or_default().push(item.clone());
        }

        let mut out = std::collections::BTreeMap::new();
        for (key, members) in groups {
            let aggregated = match aggregate.as_str() {
                "count" => Value::Number(members.len() as f64),
                "values" => Value::Array(members.clone()),
                "sum" | "avg" | "min" | "max" => {
                    let values: Vec<f64> = members
                        .iter()
                        .filter_map(|m| value_field.as_ref().and_then(|f| m.get_field(f)).and_then(|v| v.as_f64()))
                        .collect();
                    if values.is_empty() {
                        Value::Null
                    } else {
                        match aggregate.as_str() {
                            "sum" => Value::Number(values.iter().sum()),
                            "avg" => Value::Number(values.iter().sum::<f64>() / values.len() as f64),
                            "min" => Value::Number(values.iter().cloned().fold(f64::INFINITY, f64::min)),
                            "max" => Value::Number(values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)),
                            _ => unreachable!(),
                        }
                    }
                }
                other => return Err(EngineError::invalid_input(format!("unknown aggregate '{other}'"))),
            };
            out.insert(key, aggregated);
        }

        Ok(Value::object([
            ("groups".to_string(), Value::Object(out.into_iter().collect())),
            ("input_count".to_string(), Value::Number(items.len() as f64)),
        ]))
    }
}

simple_array_operator!(ZipOperator, "Zip");

#[async_trait]
impl Operator for ZipOperator {
    fn node_type(&self) -> &'static str {
        "Zip"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let fill_missing = legacy.extra("fill_missing").cloned().unwrap_or(Value::Null);
        let inputs = ctx.get_node_inputs(&node.id);
        let arrays: Vec<Vec<Value>> = inputs.iter().filter_map(|v| v.as_array().map(|a| a.to_vec())).collect();
        let max_len = arrays.iter().map(|a| a.len()).max().unwrap_or(0);

        let mut zipped = Vec::with_capacity(max_len);
        for i in 0..max_len {
            let row: Vec<Value> = arrays.iter().map(|a| a.get(i).cloned().unwrap_or_else(|| fill_missing.clone())).collect();
            zipped.push(Value::Array(row));
        }

        Ok(Value::object([
            ("zipped".to_string(), Value::Array(zipped.clone())),
            ("output_count".to_string(), Value::Number(zipped.len() as f64)),
        ]))
    }
}

simple_array_operator!(CompactOperator, "Compact");

#[async_trait]
impl Operator for CompactOperator {
    fn node_type(&self) -> &'static str {
        "Compact"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let strip_empty_strings = legacy.extra_bool("strip_empty_strings").unwrap_or(false);
        let items = Self::items(ctx, node)?;
        let compacted: Vec<Value> = items
            .into_iter()
            .filter(|v| {
                if v.is_null() {
                    return false;
                }
                if let Value::Number(n) = v {
                    if n.is_nan() {
                        return false;
                    }
                }
                if strip_empty_strings {
                    if let Value::String(s) = v {
                        if s.is_empty() {
                            return false;
                        }
                    }
                }
                true
            })
            .collect();
        Ok(Value::object([
            ("compacted".to_string(), Value::Array(compacted.clone())),
            ("output_count".to_string(), Value::Number(compacted.len() as f64)),
        ]))
    }
}

simple_array_operator!(FindOperator, "Find");

#[async_trait]
impl Operator for FindOperator {
    fn node_type(&self) -> &'static str {
        "Find"
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
        let condition = legacy.condition.as_deref().unwrap_or_default();
        let items = Self::items(ctx, node)?;
        let mut error_count = 0usize;
        for (index, item) in items.iter().enumerate() {
            let bindings = Bindings::new().with("item", item.clone()).with("index", Value::Number(index as f64));
            match evaluate_condition_checked(condition, &bindings, ctx) {
                Ok(true) => {
                    return Ok(Value::object([
                        ("found".to_string(), item.clone()),
                        ("index".to_string(), Value::Number(index as f64)),
                        ("matched".to_string(), Value::Bool(true)),
                        ("error_count".to_string(), Value::Number(error_count as f64)),
                    ]));
                }
                Ok(false) => {}
                Err(_) => error_count += 1,
            }
        }
        Ok(Value::object([
            ("found".to_string(), Value::Null),
            ("matched".to_string(), Value::Bool(false)),
            ("error_count".to_string(), Value::Number(error_count as f64)),
        ]))
    }
}

simple_array_operator!(PartitionOperator, "Partition");

#[async_trait]
impl Operator for PartitionOperator {
    fn node_type(&self) -> &'static str {
        "Partition"
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
        let condition = legacy.condition.as_deref().unwrap_or_default();
        let items = Self::items(ctx, node)?;
        let mut passed = Vec::new();
        let mut failed = Vec::new();
        let mut error_count = 0usize;
        for (index, item) in items.iter().enumerate() {
            let bindings = Bindings::new().with("item", item.clone()).with("index", Value::Number(index as f64));
            match evaluate_condition_checked(condition, &bindings, ctx) {
                Ok(true) => passed.push(item.clone()),
                Ok(false) => failed.push(item.clone()),
                Err(_) => {
                    error_count += 1;
                    failed.push(item.clone());
                }
            }
        }
        Ok(Value::object([
            ("passed".to_string(), Value::Array(passed)),
            ("failed".to_string(), Value::Array(failed)),
            ("error_count".to_string(), Value::Number(error_count as f64)),
        ]))
    }
}

pub struct ExtractOperator;

#[async_trait]
impl Operator for ExtractOperator {
    fn node_type(&self) -> &'static str {
        "Extract"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        if legacy.field.is_none() && legacy.extra_array("fields").is_none() {
            return Err(EngineError::missing_field("field or fields"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let input = primary_input(ctx, node);

        if let Some(field) = &legacy.field {
            let value = input.get_field(field).cloned().ok_or_else(|| EngineError::missing_field(field.clone()))?;
            return Ok(Value::object([
                ("field".to_string(), Value::String(field.clone())),
                ("value".to_string(), value),
            ]));
        }

        let fields = legacy.extra_array("fields").unwrap_or(&[]);
        let mut out = std::collections::BTreeMap::new();
        for f in fields {
            if let Some(name) = f.as_str() {
                if let Some(v) = input.get_field(name) {
                    out.insert(name.to_string(), v.clone());
                }
            }
        }
        Ok(Value::Object(out.into_iter().collect()))
    }
}

pub struct TransformOperator;

#[async_trait]
impl Operator for TransformOperator {
    fn node_type(&self) -> &'static str {
        "Transform"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("transform_op") {
            Some("to_array") | Some("to_object") | Some("flatten") | Some("keys") | Some("values") => Ok(()),
            _ => Err(EngineError::invalid_input("Transform requires transform_op")),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let op = legacy.extra_str("transform_op").unwrap_or_default();
        let input = primary_input(ctx, node);

        let result = match op {
            "to_array" => match &input {
                Value::Object(o) => Value::Array(o.values().cloned().collect()),
                Value::Array(_) => input.clone(),
                other => Value::Array(vec![other.clone()]),
            },
            "to_object" => match &input {
                Value::Array(a) => {
                    Value::object(a.iter().enumerate().map(|(i, v)| (i.to_string(), v.clone())))
                }
                Value::Object(_) => input.clone(),
                other => Value::object([("value".to_string(), other.clone())]),
            },
            "flatten" => Value::Array(flatten_recursive(&input)),
            "keys" => match &input {
                Value::Object(o) => Value::Array(o.keys().map(|k| Value::String(k.clone())).collect()),
                _ => Value::Array(Vec::new()),
            },
            "values" => match &input {
                Value::Object(o) => Value::Array(o.values().cloned().collect()),
                _ => Value::Array(Vec::new()),
            },
            other => return Err(EngineError::UnsupportedOperation { operation: other.to_string() }),
        };
        Ok(result)
    }
}

fn flatten_recursive(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(a) => a.iter().flat_map(flatten_recursive).collect(),
        other => vec![other.clone()],
    }
}

pub struct TextOperationOperator;

#[async_trait]
impl Operator for TextOperationOperator {
    fn node_type(&self) -> &'static str {
        "TextOperation"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("text_op") {
            Some("uppercase") | Some("lowercase") | Some("titlecase") | Some("camelcase") | Some("inversecase")
            | Some("concat") | Some("repeat") => Ok(()),
            _ => Err(EngineError::invalid_input("TextOperation requires text_op")),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        use crate::helpers::{camelcase, inversecase, lowercase, titlecase, uppercase};
        let legacy = node.data.as_legacy()?;
        let op = legacy.extra_str("text_op").unwrap_or_default();
        let inputs = ctx.get_node_inputs(&node.id);
        let first = inputs.first().cloned().unwrap_or(Value::Null);

        let result = match op {
            "concat" => {
                let separator = legacy.extra_str("separator").unwrap_or("");
                Value::String(inputs.iter().map(|v| v.stringify()).collect::<Vec<_>>().join(separator))
            }
            "repeat" => {
                let n = legacy.extra_f64("repeat_n").unwrap_or(0.0);
                if n < 0.0 {
                    return Err(EngineError::invalid_input("repeat_n must be >= 0"));
                }
                Value::String(first.stringify().repeat(n as usize))
            }
            _ => {
                let s = first.as_str().ok_or_else(|| EngineError::type_mismatch("string", "other"))?;
                Value::String(match op {
                    "uppercase" => uppercase(s),
                    "lowercase" => lowercase(s),
                    "titlecase" => titlecase(s),
                    "camelcase" => camelcase(s),
                    "inversecase" => inversecase(s),
                    other => return Err(EngineError::UnsupportedOperation { operation: other.to_string() }),
                })
            }
        };
        Ok(result)
    }
}

pub struct OperationOperator;

#[async_trait]
impl Operator for OperationOperator {
    fn node_type(&self) -> &'static str {
        "Operation"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("op") {
            Some("add") | Some("subtract") | Some("multiply") | Some("divide") => Ok(()),
            _ => Err(EngineError::invalid_input("Operation requires op")),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let op = legacy.extra_str("op").unwrap_or_default();
        let inputs = ctx.get_node_inputs(&node.id);
        if inputs.len() != 2 {
            return Err(EngineError::invalid_input("Operation requires exactly two inputs"));
        }
        let a = inputs[0].as_f64().ok_or_else(|| EngineError::type_mismatch("number", "other"))?;
        let b = inputs[1].as_f64().ok_or_else(|| EngineError::type_mismatch("number", "other"))?;
        let result = match op {
            "add" => a + b,
            "subtract" => a - b,
            "multiply" => a * b,
            "divide" => {
                if b == 0.0 {
                    return Err(EngineError::DivisionByZero);
                }
                a / b
            }
            other => return Err(EngineError::UnsupportedOperation { operation: other.to_string() }),
        };
        Ok(Value::Number(result))
    }
}

pub struct ExpressionOperator;

#[async_trait]
impl Operator for ExpressionOperator {
    fn node_type(&self) -> &'static str {
        "Expression"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let expr = legacy.expression.clone().unwrap_or_default();
        let input = primary_input(ctx, node);
        if expr.trim().is_empty() {
            return Ok(Value::object([
                ("value".to_string(), input),
                ("warning".to_string(), Value::String("empty expression, passed input through".to_string())),
            ]));
        }
        let bindings = Bindings::input(input.clone());
        match evaluate_expression(&expr, &bindings, ctx) {
            Ok(v) => Ok(v),
            Err(_) => Ok(Value::Bool(evaluate_condition(&expr, &bindings, ctx))),
        }
    }
}

pub struct RendererOperator;

#[async_trait]
impl Operator for RendererOperator {
    fn node_type(&self) -> &'static str {
        "Renderer"
    }

    fn validate(&self, _node: &Node) -> EngineResult<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        Ok(primary_input(ctx, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::context::InMemoryContext;
    use crate::node::{FilterData, LegacyNodeData, MapData, NodeData, ReduceData, SortData, TypedNodeData};

    fn ctx_with_input(input: Value) -> InMemoryContext {
        let ctx = InMemoryContext::new(RuntimeConfig::default());
        ctx.set_node_inputs("n", vec![input]);
        ctx
    }

    fn node_with(legacy: LegacyNodeData) -> Node {
        Node { id: "n".into(), node_type: "x".into(), data: NodeData::Legacy(legacy) }
    }

    #[tokio::test]
    async fn renderer_passes_input_through_unchanged() {
        let ctx = ctx_with_input(Value::String("chart-data".to_string()));
        let n = node_with(LegacyNodeData::default());
        let result = RendererOperator.execute(&ctx, &n).await.unwrap();
        assert_eq!(result, Value::String("chart-data".to_string()));
    }

    #[tokio::test]
    async fn filter_counts_and_passes() {
        let ctx = ctx_with_input(Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(11.0)]));
        let n = node_with(LegacyNodeData { condition: Some("item > 10".to_string()), ..Default::default() });
        let result = FilterOperator.execute(&ctx, &n).await.unwrap();
        assert_eq!(result.get_field("results"), Some(&Value::Array(vec![Value::Number(11.0)])));
    }

    #[tokio::test]
    async fn filter_counts_expression_errors_separately_from_skips() {
        let ctx = ctx_with_input(Value::Array(vec![
            Value::object([("x".to_string(), Value::Number(5.0))]),
            Value::Number(1.0), // has no `x` field: condition errors, not just false
            Value::object([("x".to_string(), Value::Number(0.0))]),
        ]));
        let n = node_with(LegacyNodeData { condition: Some("item.x > 1".to_string()), ..Default::default() });
        let result = FilterOperator.execute(&ctx, &n).await.unwrap();
        assert_eq!(result.get_field("results"), Some(&Value::Array(vec![Value::object([("x".to_string(), Value::Number(5.0))])])));
        assert_eq!(result.get_field("error_count"), Some(&Value::Number(1.0)));
        assert_eq!(result.get_field("skipped_count"), Some(&Value::Number(1.0)));
    }

    #[tokio::test]
    async fn reduce_sums_with_accumulator() {
        let ctx = ctx_with_input(Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]));
        let n = node_with(LegacyNodeData {
            value: Some(Value::Number(0.0)),
            expression: Some("accumulator + item".to_string()),
            ..Default::default()
        });
        let result = ReduceOperator.execute(&ctx, &n).await.unwrap();
        assert_eq!(result.get_field("final_value"), Some(&Value::Number(6.0)));
    }

    fn typed_node(data: TypedNodeData) -> Node {
        Node { id: "n".into(), node_type: "x".into(), data: NodeData::Typed(data) }
    }

    #[tokio::test]
    async fn map_accepts_typed_map_data() {
        let ctx = ctx_with_input(Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]));
        let n = typed_node(TypedNodeData::Map(MapData { expression: Some("item * 2".to_string()), field: None }));
        MapOperator.validate(&n).unwrap();
        let result = MapOperator.execute(&ctx, &n).await.unwrap();
        assert_eq!(result.get_field("results"), Some(&Value::Array(vec![Value::Number(2.0), Value::Number(4.0)])));
    }

    #[tokio::test]
    async fn filter_accepts_typed_filter_data() {
        let ctx = ctx_with_input(Value::Array(vec![Value::Number(1.0), Value::Number(11.0)]));
        let n = typed_node(TypedNodeData::Filter(FilterData { condition: "item > 10".to_string() }));
        FilterOperator.validate(&n).unwrap();
        let result = FilterOperator.execute(&ctx, &n).await.unwrap();
        assert_eq!(result.get_field("results"), Some(&Value::Array(vec![Value::Number(11.0)])));
    }

    #[tokio::test]
    async fn reduce_accepts_typed_reduce_data() {
        let ctx = ctx_with_input(Value::Array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]));
        let n = typed_node(TypedNodeData::Reduce(ReduceData {
            initial_value: Some(Value::Number(0.0)),
            expression: "accumulator + item".to_string(),
        }));
        ReduceOperator.validate(&n).unwrap();
        let result = ReduceOperator.execute(&ctx, &n).await.unwrap();
        assert_eq!(result.get_field("final_value"), Some(&Value::Number(6.0)));
    }

    #[tokio::test]
    async fn sort_accepts_typed_sort_data() {
        let ctx = ctx_with_input(Value::Array(vec![Value::Number(3.0), Value::Number(1.0), Value::Number(2.0)]));
        let n = typed_node(TypedNodeData::Sort(SortData { field: None, order: "desc".to_string() }));
        SortOperator.validate(&n).unwrap();
        let result = SortOperator.execute(&ctx, &n).await.unwrap();
        assert_eq!(
            result.get_field("sorted"),
            Some(&Value::Array(vec![Value::Number(3.0), Value::Number(2.0), Value::Number(1.0)]))
        );
    }

    #[tokio::test]
    async fn reverse_twice_is_identity() {
        let items = vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)];
        let ctx = ctx_with_input(Value::Array(items.clone()));
        let once = ReverseOperator.execute(&ctx, &node_with(LegacyNodeData::default())).await.unwrap();
        let reversed_once = once.get_field("reversed").unwrap().clone();
        let ctx2 = ctx_with_input(reversed_once);
        let twice = ReverseOperator.execute(&ctx2, &node_with(LegacyNodeData::default())).await.unwrap();
        assert_eq!(twice.get_field("reversed"), Some(&Value::Array(items)));
    }

    #[tokio::test]
    async fn unique_already_unique_is_identity() {
        let items = vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)];
        let ctx = ctx_with_input(Value::Array(items.clone()));
        let result = UniqueOperator.execute(&ctx, &node_with(LegacyNodeData::default())).await.unwrap();
        assert_eq!(result.get_field("unique"), Some(&Value::Array(items)));
    }

    #[tokio::test]
    async fn slice_negative_start_measures_from_end() {
        let ctx = ctx_with_input(Value::Array(vec![
            Value::Number(1.0),
            Value::Number(2.0),
            Value::Number(3.0),
            Value::Number(4.0),
        ]));
        let mut extra = std::collections::BTreeMap::new();
        extra.insert("start".to_string(), Value::Number(-2.0));
        let n = node_with(LegacyNodeData { extra, ..Default::default() });
        let result = SliceOperator.execute(&ctx, &n).await.unwrap();
        assert_eq!(result.get_field("sliced"), Some(&Value::Array(vec![Value::Number(3.0), Value::Number(4.0)])));
    }
}
