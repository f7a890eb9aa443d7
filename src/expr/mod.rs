//! Expression engine: lexer → parser → AST → tree-walking evaluator.
//! No code generation, no parser-generator crate (§4.8, §9).

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use eval::{evaluate_condition, evaluate_condition_checked, evaluate_expression, Bindings};
