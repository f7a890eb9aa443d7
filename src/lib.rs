//! A node-graph workflow execution engine.
//!
//! Nodes are pure-ish operators (data sources, transforms, control flow,
//! stateful accumulators, resilience wrappers, and one HTTP egress point)
//! dispatched through an [`registry::OperatorRegistry`] against a shared
//! [`context::ExecutionContext`]. The graph's static shape lives in
//! [`node::Node`]; dynamic values flow as [`value::Value`].

pub mod cache;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod error;
pub mod expr;
pub mod helpers;
pub mod http;
pub mod node;
pub mod operators;
pub mod registry;
pub mod value;

pub use config::RuntimeConfig;
pub use context::{ExecutionContext, InMemoryContext};
pub use error::{EngineError, EngineResult};
pub use node::{Node, NodeData};
pub use registry::{Operator, OperatorRegistry};
pub use value::Value;
