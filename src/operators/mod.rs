//! Operator implementations, grouped by family. [`register_all`] wires
//! every operator in this module into a fresh [`OperatorRegistry`].

pub mod control;
pub mod parse_format;
pub mod resilience;
pub mod schema;
pub mod sources;
pub mod stateful;
pub mod transform;

use std::sync::Arc;

use crate::error::EngineResult;
use crate::http::HttpOperator;
use crate::registry::{Operator, OperatorRegistry};

/// Register every operator this crate ships. Demonstration binaries and
/// integration tests both go through this so the registered set never
/// drifts from what's actually implemented.
pub fn register_all(registry: &OperatorRegistry) -> EngineResult<()> {
    let operators: Vec<Arc<dyn Operator>> = vec![
        Arc::new(sources::NumberOperator),
        Arc::new(sources::TextOperator),
        Arc::new(sources::BooleanOperator),
        Arc::new(sources::DateTimeOperator),
        Arc::new(sources::ContextConstantOperator),
        Arc::new(sources::ContextVariableOperator),
        Arc::new(sources::RangeOperator),
        Arc::new(transform::MapOperator),
        Arc::new(transform::FilterOperator),
        Arc::new(transform::ReduceOperator),
        Arc::new(transform::SortOperator),
        Arc::new(transform::SliceOperator),
        Arc::new(transform::ChunkOperator),
        Arc::new(transform::SampleOperator),
        Arc::new(transform::ReverseOperator),
        Arc::new(transform::UniqueOperator),
        Arc::new(transform::TransposeOperator),
        Arc::new(transform::FlatMapOperator),
        Arc::new(transform::GroupByOperator),
        Arc::new(transform::ZipOperator),
        Arc::new(transform::CompactOperator),
        Arc::new(transform::FindOperator),
        Arc::new(transform::PartitionOperator),
        Arc::new(transform::ExtractOperator),
        Arc::new(transform::TransformOperator),
        Arc::new(transform::TextOperationOperator),
        Arc::new(transform::OperationOperator),
        Arc::new(transform::ExpressionOperator),
        Arc::new(transform::RendererOperator),
        Arc::new(parse_format::ParseOperator),
        Arc::new(parse_format::FormatOperator),
        Arc::new(schema::SchemaValidatorOperator),
        Arc::new(control::ConditionOperator),
        Arc::new(control::SwitchOperator),
        Arc::new(control::ForEachOperator),
        Arc::new(control::WhileLoopOperator),
        Arc::new(control::JoinOperator),
        Arc::new(control::ParallelOperator),
        Arc::new(stateful::VariableOperator),
        Arc::new(stateful::AccumulatorOperator),
        Arc::new(stateful::CounterOperator),
        Arc::new(stateful::DelayOperator),
        Arc::new(resilience::RetryOperator),
        Arc::new(resilience::TryCatchOperator),
        Arc::new(resilience::TimeoutOperator),
        Arc::new(resilience::RateLimiterOperator::new()),
        Arc::new(resilience::ThrottleOperator::new()),
        Arc::new(HttpOperator),
    ];
    for operator in operators {
        registry.register(operator)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operator_registers_exactly_once() {
        let registry = OperatorRegistry::new();
        register_all(&registry).unwrap();
        let types = registry.list_registered_types();
        assert_eq!(types.len(), 48);
    }
}
