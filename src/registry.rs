//! Operator trait and the concurrent registry that dispatches by node-type
//! tag (§4.1).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::node::Node;
use crate::value::Value;

#[async_trait]
pub trait Operator: Send + Sync {
    /// The node-type tag this operator handles. Pure, no side effects.
    fn node_type(&self) -> &'static str;

    /// Static admission check. MUST NOT perform side effects.
    fn validate(&self, node: &Node) -> EngineResult<()>;

    /// Execute against the shared context. May block, may mutate `ctx`.
    async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value>;
}

/// Thread-safe tag → operator mapping.
pub struct OperatorRegistry {
    operators: DashMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self { operators: DashMap::new() }
    }

    pub fn register(&self, operator: Arc<dyn Operator>) -> EngineResult<()> {
        let tag = operator.node_type().to_string();
        if self.operators.contains_key(&tag) {
            return Err(EngineError::Registry { message: format!("operator '{tag}' already registered") });
        }
        self.operators.insert(tag, operator);
        Ok(())
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn Operator>> {
        self.operators.get(node_type).map(|e| e.clone())
    }

    pub fn validate(&self, node: &Node) -> EngineResult<()> {
        let op = self
            .get(&node.node_type)
            .ok_or_else(|| EngineError::Registry { message: format!("unknown node type '{}'", node.node_type) })?;
        op.validate(node)
    }

    #[tracing::instrument(skip(self, ctx, node), fields(node_id = %node.id, node_type = %node.node_type))]
    pub async fn execute(&self, ctx: &dyn ExecutionContext, node: &Node) -> EngineResult<Value> {
        let op = self
            .get(&node.node_type)
            .ok_or_else(|| EngineError::Registry { message: format!("unknown node type '{}'", node.node_type) })?;
        op.execute(ctx, node).await
    }

    pub fn list_registered_types(&self) -> Vec<String> {
        self.operators.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{LegacyNodeData, NodeData};

    struct Echo;

    #[async_trait]
    impl Operator for Echo {
        fn node_type(&self) -> &'static str {
            "echo"
        }

        fn validate(&self, _node: &Node) -> EngineResult<()> {
            Ok(())
        }

        async fn execute(&self, _ctx: &dyn ExecutionContext, _node: &Node) -> EngineResult<Value> {
            Ok(Value::Bool(true))
        }
    }

    fn node() -> Node {
        Node { id: "n1".into(), node_type: "echo".into(), data: NodeData::Legacy(LegacyNodeData::default()) }
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = OperatorRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        assert!(registry.register(Arc::new(Echo)).is_err());
    }

    #[test]
    fn unknown_type_fails_validate() {
        let registry = OperatorRegistry::new();
        let mut n = node();
        n.node_type = "missing".into();
        assert!(registry.validate(&n).is_err());
    }

    #[tokio::test]
    async fn execute_dispatches_by_tag() {
        let registry = OperatorRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        let ctx = crate::context::InMemoryContext::new(crate::config::RuntimeConfig::default());
        let result = registry.execute(&ctx, &node()).await.unwrap();
        assert_eq!(result, Value::Bool(true));
    }
}
