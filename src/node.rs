//! The graph's static data model: `Node` and its `Data` payload.
//!
//! Two parallel shapes are supported per node: a loosely typed legacy
//! catch-all record, and a family of strongly typed variants. Operators
//! narrow `NodeData` with an `AsXxxData` accessor rather than matching on
//! it directly, so a narrowing failure always produces the same
//! `InputTypeMismatch` error shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub data: NodeData,
}

/// A node's configuration payload. Untagged: whichever variant's shape
/// matches the incoming document deserializes successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeData {
    Typed(TypedNodeData),
    Legacy(LegacyNodeData),
}

/// The loose catch-all shape every node type historically accepted.
/// Every field is optional; operators pull out what they need and fail
/// with `MissingRequiredInput` if it's absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyNodeData {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub context_name: Option<String>,
    #[serde(default)]
    pub context_value: Option<Value>,
    #[serde(default)]
    pub context_values: Option<Vec<ContextValueEntry>>,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub http_client_uid: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl LegacyNodeData {
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }

    pub fn extra_f64(&self, key: &str) -> Option<f64> {
        self.extra.get(key).and_then(|v| v.as_f64())
    }

    pub fn extra_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(|v| v.as_bool())
    }

    pub fn extra_array(&self, key: &str) -> Option<&[Value]> {
        self.extra.get(key).and_then(|v| v.as_array())
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextValueEntry {
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub declared_type: String,
}

/// Strongly typed node payloads, one variant per operator family that has
/// moved off the legacy shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TypedNodeData {
    Filter(FilterData),
    Map(MapData),
    Reduce(ReduceData),
    Sort(SortData),
    Switch(SwitchData),
    Range(RangeData),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterData {
    pub condition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapData {
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceData {
    #[serde(default)]
    pub initial_value: Option<Value>,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortData {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default = "default_sort_order")]
    pub order: String,
}

fn default_sort_order() -> String {
    "asc".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchData {
    pub cases: Vec<SwitchCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    pub output_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeData {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

macro_rules! as_xxx_data {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> EngineResult<&$ty> {
            match self {
                NodeData::Typed(TypedNodeData::$variant(d)) => Ok(d),
                _ => Err(EngineError::type_mismatch(stringify!($variant), "legacy or other typed data")),
            }
        }
    };
}

impl NodeData {
    as_xxx_data!(as_filter_data, Filter, FilterData);
    as_xxx_data!(as_map_data, Map, MapData);
    as_xxx_data!(as_reduce_data, Reduce, ReduceData);
    as_xxx_data!(as_sort_data, Sort, SortData);
    as_xxx_data!(as_switch_data, Switch, SwitchData);
    as_xxx_data!(as_range_data, Range, RangeData);

    /// Narrow to the legacy catch-all shape; fails if this node used a
    /// strongly typed variant instead.
    pub fn as_legacy(&self) -> EngineResult<&LegacyNodeData> {
        match self {
            NodeData::Legacy(d) => Ok(d),
            NodeData::Typed(_) => Err(EngineError::type_mismatch("legacy node data", "typed node data")),
        }
    }

    /// Prefer the typed range shape, fall back to legacy `start/end/step`.
    pub fn range_bounds(&self) -> EngineResult<(f64, f64, f64)> {
        if let Ok(r) = self.as_range_data() {
            return Ok((r.start, r.end, r.step));
        }
        let legacy = self.as_legacy()?;
        let start = legacy.start.ok_or_else(|| EngineError::missing_field("start"))?;
        let end = legacy.end.ok_or_else(|| EngineError::missing_field("end"))?;
        let step = legacy.step.ok_or_else(|| EngineError::missing_field("step"))?;
        Ok((start, end, step))
    }
}
