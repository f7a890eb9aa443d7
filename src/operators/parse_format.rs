//! Parse and Format operators: text ⇄ structured-value conversion for
//! JSON/CSV/TSV/YAML and (parse-only) a shallow XML reader (§4.3).

use std::collections::BTreeMap;

use async_trait::async_trait;
use csv::{ReaderBuilder, WriterBuilder};

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::node::Node;
use crate::registry::Operator;
use crate::value::Value;

fn primary_input_str(ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<String> {
    let value = ctx.get_node_inputs(&node.id).into_iter().next().unwrap_or(Value::Null);
    match value {
        Value::String(s) => Ok(s),
        other => Err(EngineError::type_mismatch("string", crate::value::type_name(&other))),
    }
}

/// Coerce a loose textual cell into `true`/`false`/`null`/number/string, in
/// that priority order.
fn coerce_cell(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if raw.eq_ignore_ascii_case("null") || raw.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = raw.parse::<f64>() {
        return Value::Number(n);
    }
    Value::String(raw.to_string())
}

fn detect_input_type(input: &str) -> &'static str {
    let trimmed = input.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('[')) && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return "JSON";
    }
    if trimmed.starts_with('<') {
        return "XML";
    }
    let lines: Vec<&str> = input.lines().filter(|l| !l.trim().is_empty()).collect();
    let colon_lines = lines.iter().filter(|l| l.contains(':') && !l.contains(',') && !l.contains('\t')).count();
    if !lines.is_empty() && colon_lines * 2 >= lines.len() {
        return "YAML";
    }
    let tabs: usize = input.matches('\t').count();
    let commas: usize = input.matches(',').count();
    if tabs > 0 && tabs >= commas {
        return "TSV";
    }
    if commas > 0 {
        return "CSV";
    }
    "JSON"
}

fn parse_delimited(input: &str, delimiter: u8) -> EngineResult<Value> {
    let mut reader = ReaderBuilder::new().delimiter(delimiter).has_headers(true).from_reader(input.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| EngineError::InvalidInputValue { message: format!("bad delimited header row: {e}") })?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| EngineError::InvalidInputValue { message: format!("bad delimited row: {e}") })?;
        let mut row = BTreeMap::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), coerce_cell(cell));
        }
        rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
}

fn parse_yaml_flat(input: &str) -> EngineResult<Value> {
    let doc: serde_yaml::Value = serde_yaml::from_str(input)
        .map_err(|e| EngineError::InvalidInputValue { message: format!("invalid YAML: {e}") })?;
    let serde_yaml::Value::Mapping(map) = doc else {
        return Err(EngineError::InvalidInputValue { message: "YAML parsing is restricted to flat key/value maps".to_string() });
    };
    let mut object = BTreeMap::new();
    for (key, value) in map {
        let key = key.as_str().ok_or_else(|| EngineError::InvalidInputValue { message: "YAML keys must be strings".to_string() })?;
        if matches!(value, serde_yaml::Value::Mapping(_) | serde_yaml::Value::Sequence(_)) {
            return Err(EngineError::InvalidInputValue { message: "YAML parsing is restricted to flat key/value maps".to_string() });
        }
        let coerced = match value {
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::String(s) => coerce_cell(&s),
            _ => Value::Null,
        };
        object.insert(key.to_string(), coerced);
    }
    Ok(Value::Object(object))
}

/// Minimal recursive-descent reader for a single root element and its
/// children. No attributes, namespaces, CDATA, or processing instructions —
/// just nested tags and text content, enough to round-trip what Format(XML)
/// would never actually need to emit (Format doesn't support XML output).
struct XmlReader<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> XmlReader<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        while self.input[self.pos..].starts_with(|c: char| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse_element(&mut self) -> EngineResult<Value> {
        self.skip_whitespace();
        let malformed = || EngineError::InvalidInputValue { message: "malformed XML".to_string() };
        if !self.input[self.pos..].starts_with('<') {
            return Err(malformed());
        }
        let tag_end = self.input[self.pos..].find('>').ok_or_else(malformed)? + self.pos;
        let open_tag = &self.input[self.pos + 1..tag_end];
        let tag_name = open_tag.split_whitespace().next().ok_or_else(malformed)?.to_string();
        self.pos = tag_end + 1;

        let close_tag = format!("</{tag_name}>");
        let mut children = BTreeMap::new();
        let mut text = String::new();

        loop {
            self.skip_whitespace();
            if self.input[self.pos..].starts_with(&close_tag) {
                self.pos += close_tag.len();
                break;
            }
            if self.pos >= self.input.len() {
                return Err(malformed());
            }
            if self.input[self.pos..].starts_with('<') {
                let child = self.parse_element()?;
                if let Value::Object(obj) = &child {
                    for (k, v) in obj {
                        children.insert(k.clone(), v.clone());
                    }
                }
            } else {
                let next_tag = self.input[self.pos..].find('<').map(|i| i + self.pos).unwrap_or(self.input.len());
                text.push_str(self.input[self.pos..next_tag].trim());
                self.pos = next_tag;
            }
        }

        let value = if children.is_empty() { coerce_cell(&text) } else { Value::Object(children) };
        Ok(Value::object([(tag_name, value)]))
    }
}

fn parse_xml(input: &str) -> EngineResult<Value> {
    XmlReader::new(input.trim()).parse_element()
}

pub struct ParseOperator;

#[async_trait]
impl Operator for ParseOperator {
    fn node_type(&self) -> &'static str {
        "Parse"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("input_type") {
            None | Some("AUTO") | Some("JSON") | Some("CSV") | Some("TSV") | Some("YAML") | Some("XML") => Ok(()),
            Some(other) => Err(EngineError::invalid_input(format!("unknown input_type '{other}'"))),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let input = primary_input_str(ctx, node)?;
        let requested = legacy.extra_str("input_type").unwrap_or("AUTO");
        let input_type = if requested == "AUTO" { detect_input_type(&input) } else { requested };

        match input_type {
            "JSON" => {
                let json: serde_json::Value = serde_json::from_str(&input)?;
                Ok(Value::from_json(&json))
            }
            "CSV" => parse_delimited(&input, b','),
            "TSV" => parse_delimited(&input, b'\t'),
            "YAML" => parse_yaml_flat(&input),
            "XML" => parse_xml(&input),
            other => Err(EngineError::UnsupportedOperation { operation: format!("input_type '{other}'") }),
        }
    }
}

fn format_value_for_cell(value: &Value) -> String {
    match value {
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}

fn format_delimited(rows: &[Value], delimiter: u8) -> EngineResult<String> {
    let mut headers: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for row in rows {
        if let Value::Object(map) = row {
            headers.extend(map.keys().cloned());
        } else {
            return Err(EngineError::type_mismatch("array of objects", "array with non-object element"));
        }
    }
    let headers: Vec<String> = headers.into_iter().collect();

    let mut writer = WriterBuilder::new().delimiter(delimiter).from_writer(Vec::new());
    writer
        .write_record(&headers)
        .map_err(|e| EngineError::OperationFailed { message: format!("failed to write header row: {e}") })?;
    for row in rows {
        let Value::Object(map) = row else { unreachable!("validated above") };
        let record: Vec<String> = headers.iter().map(|h| map.get(h).map(format_value_for_cell).unwrap_or_default()).collect();
        writer.write_record(&record).map_err(|e| EngineError::OperationFailed { message: format!("failed to write row: {e}") })?;
    }
    let bytes = writer.into_inner().map_err(|e| EngineError::OperationFailed { message: e.to_string() })?;
    String::from_utf8(bytes).map_err(|e| EngineError::OperationFailed { message: e.to_string() })
}

pub struct FormatOperator;

#[async_trait]
impl Operator for FormatOperator {
    fn node_type(&self) -> &'static str {
        "Format"
    }

    fn validate(&self, node: &Node) -> EngineResult<()> {
        let legacy = node.data.as_legacy()?;
        match legacy.extra_str("output_type") {
            Some("JSON") | Some("CSV") | Some("TSV") => Ok(()),
            Some(other) => Err(EngineError::invalid_input(format!("unknown output_type '{other}'"))),
            None => Err(EngineError::missing_field("output_type")),
        }
    }

    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let legacy = node.data.as_legacy()?;
        let input = ctx.get_node_inputs(&node.id).into_iter().next().unwrap_or(Value::Null);
        let output_type = legacy.extra_str("output_type").unwrap_or("JSON");

        let text = match output_type {
            "JSON" => {
                let json = input.to_json();
                if legacy.extra_bool("pretty_print").unwrap_or(false) {
                    serde_json::to_string_pretty(&json)?
                } else {
                    serde_json::to_string(&json)?
                }
            }
            "CSV" | "TSV" => {
                let rows = input.as_array().ok_or(EngineError::NotAnArray)?;
                let delimiter = legacy
                    .extra_str("delimiter")
                    .and_then(|d| d.bytes().next())
                    .unwrap_or(if output_type == "TSV" { b'\t' } else { b',' });
                format_delimited(rows, delimiter)?
            }
            other => return Err(EngineError::UnsupportedOperation { operation: format!("output_type '{other}'") }),
        };

        Ok(Value::String(text))
    }
}
