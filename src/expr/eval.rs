//! Tree-walking evaluator plus the two public entry points the rest of
//! the engine calls: [`evaluate_condition`] and [`evaluate_expression`].

use std::collections::BTreeMap;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::parser::parse;
use crate::context::ExecutionContext;
use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// Per-iteration bindings a caller sets before evaluating: `item`,
/// `index`, `items`, `accumulator`, `input`.
#[derive(Debug, Clone, Default)]
pub struct Bindings(BTreeMap<String, Value>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn input(value: Value) -> Self {
        Self::new().with("input", value)
    }
}

/// Condition form: the top-level result must be boolean. Field-access and
/// other evaluation failures are treated as `false` (the spec's
/// "safe" fallback), not propagated.
pub fn evaluate_condition(expr: &str, bindings: &Bindings, ctx: &dyn ExecutionContext) -> bool {
    match evaluate_expression(expr, bindings, ctx) {
        Ok(v) => v.is_truthy(),
        Err(_) => false,
    }
}

/// Like [`evaluate_condition`], but surfaces the evaluation-failure case
/// instead of collapsing it into `false`. Callers that need to count
/// per-item expression errors separately from items that legitimately
/// evaluate to `false` (Filter, Find, Partition) use this instead.
pub fn evaluate_condition_checked(expr: &str, bindings: &Bindings, ctx: &dyn ExecutionContext) -> EngineResult<bool> {
    evaluate_expression(expr, bindings, ctx).map(|v| v.is_truthy())
}

/// Value form: any evaluation failure propagates to the caller.
pub fn evaluate_expression(expr: &str, bindings: &Bindings, ctx: &dyn ExecutionContext) -> EngineResult<Value> {
    let ast = parse(expr)?;
    eval(&ast, bindings, ctx)
}

fn eval(expr: &Expr, b: &Bindings, ctx: &dyn ExecutionContext) -> EngineResult<Value> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(v) => Ok(Value::Bool(*v)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Ident(name) => eval_ident(name, b, ctx),
        Expr::Field(base, field) => eval_field(base, field, b, ctx),
        Expr::MethodCall(base, method, args) => eval_method_call(base, method, args, b, ctx),
        Expr::Unary(op, inner) => eval_unary(*op, inner, b, ctx),
        Expr::Binary(op, l, r) => eval_binary(*op, l, r, b, ctx),
        Expr::Ternary(cond, then_e, else_e) => {
            if eval(cond, b, ctx)?.is_truthy() {
                eval(then_e, b, ctx)
            } else {
                eval(else_e, b, ctx)
            }
        }
    }
}

fn eval_ident(name: &str, b: &Bindings, ctx: &dyn ExecutionContext) -> EngineResult<Value> {
    if let Some(v) = b.get(name) {
        return Ok(v.clone());
    }
    if let Some(v) = ctx.get_variable(name) {
        return Ok(v);
    }
    if let Some(item) = b.get("item") {
        if let Some(v) = item.get_field(name) {
            return Ok(v.clone());
        }
    }
    Err(EngineError::ExpressionEvaluation { message: format!("unresolved identifier '{name}'") })
}

fn eval_field(base: &Expr, field: &str, b: &Bindings, ctx: &dyn ExecutionContext) -> EngineResult<Value> {
    if let Expr::Ident(ns) = base {
        match ns.as_str() {
            "variables" => {
                return ctx
                    .get_variable(field)
                    .ok_or_else(|| EngineError::ExpressionEvaluation {
                        message: format!("unresolved variable '{field}'"),
                    });
            }
            "context" => {
                return ctx
                    .get_context_value(field)
                    .ok_or_else(|| EngineError::ExpressionEvaluation {
                        message: format!("unresolved context value '{field}'"),
                    });
            }
            "node" => {
                return ctx.get_node_result(field).ok_or_else(|| EngineError::ExpressionEvaluation {
                    message: format!("no result for node '{field}'"),
                });
            }
            _ => {}
        }
    }
    let base_val = eval(base, b, ctx)?;
    base_val
        .get_field(field)
        .cloned()
        .ok_or_else(|| EngineError::ExpressionEvaluation { message: format!("no field '{field}'") })
}

fn eval_method_call(
    base: &Expr,
    method: &str,
    args: &[Expr],
    b: &Bindings,
    ctx: &dyn ExecutionContext,
) -> EngineResult<Value> {
    let base_val = eval(base, b, ctx)?;
    let s = base_val
        .as_str()
        .ok_or_else(|| EngineError::ExpressionEvaluation {
            message: format!("method '{method}' requires a string receiver"),
        })?;
    match method {
        "toLowerCase" => Ok(Value::String(s.to_lowercase())),
        "toUpperCase" => Ok(Value::String(s.to_uppercase())),
        "trim" => Ok(Value::String(s.trim().to_string())),
        "includes" => {
            let needle = args
                .first()
                .ok_or_else(|| EngineError::ExpressionEvaluation {
                    message: "includes() requires one argument".to_string(),
                })
                .and_then(|e| eval(e, b, ctx))?;
            let needle = needle.stringify();
            Ok(Value::Bool(s.contains(&needle)))
        }
        other => Err(EngineError::UnsupportedOperation { operation: format!("string method '{other}'") }),
    }
}

fn eval_unary(op: UnaryOp, inner: &Expr, b: &Bindings, ctx: &dyn ExecutionContext) -> EngineResult<Value> {
    let v = eval(inner, b, ctx)?;
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
        UnaryOp::Neg => {
            let n = v.as_f64().ok_or_else(|| EngineError::type_mismatch("number", crate::value::type_name(&v)))?;
            Ok(Value::Number(-n))
        }
    }
}

fn eval_binary(op: BinaryOp, l: &Expr, r: &Expr, b: &Bindings, ctx: &dyn ExecutionContext) -> EngineResult<Value> {
    use BinaryOp::*;
    if matches!(op, And | Or) {
        let left = eval(l, b, ctx)?.is_truthy();
        return match op {
            And => Ok(Value::Bool(left && eval(r, b, ctx)?.is_truthy())),
            Or => Ok(Value::Bool(left || eval(r, b, ctx)?.is_truthy())),
            _ => unreachable!(),
        };
    }

    let lv = eval(l, b, ctx)?;
    let rv = eval(r, b, ctx)?;

    match op {
        Add => {
            if matches!(lv, Value::String(_)) || matches!(rv, Value::String(_)) {
                Ok(Value::String(format!("{}{}", lv.stringify(), rv.stringify())))
            } else {
                Ok(Value::Number(numeric(&lv)? + numeric(&rv)?))
            }
        }
        Sub => Ok(Value::Number(numeric(&lv)? - numeric(&rv)?)),
        Mul => Ok(Value::Number(numeric(&lv)? * numeric(&rv)?)),
        Div => {
            let denom = numeric(&rv)?;
            if denom == 0.0 {
                return Err(EngineError::DivisionByZero);
            }
            Ok(Value::Number(numeric(&lv)? / denom))
        }
        Mod => {
            let denom = numeric(&rv)?;
            if denom == 0.0 {
                return Err(EngineError::DivisionByZero);
            }
            Ok(Value::Number(numeric(&lv)? % denom))
        }
        Eq => Ok(Value::Bool(lv == rv)),
        NotEq => Ok(Value::Bool(lv != rv)),
        Lt => Ok(Value::Bool(lv.compare(&rv) == std::cmp::Ordering::Less)),
        Gt => Ok(Value::Bool(lv.compare(&rv) == std::cmp::Ordering::Greater)),
        LtEq => Ok(Value::Bool(lv.compare(&rv) != std::cmp::Ordering::Greater)),
        GtEq => Ok(Value::Bool(lv.compare(&rv) != std::cmp::Ordering::Less)),
        And | Or => unreachable!("handled above"),
    }
}

fn numeric(v: &Value) -> EngineResult<f64> {
    v.as_f64().ok_or_else(|| EngineError::type_mismatch("number", crate::value::type_name(v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::context::InMemoryContext;

    fn ctx() -> InMemoryContext {
        InMemoryContext::new(RuntimeConfig::default())
    }

    #[test]
    fn bare_field_resolves_against_item() {
        let c = ctx();
        let item = Value::object([("age".to_string(), Value::Number(21.0))]);
        let b = Bindings::new().with("item", item);
        assert!(evaluate_condition("age >= 18", &b, &c));
    }

    #[test]
    fn string_concatenation_via_plus() {
        let c = ctx();
        let b = Bindings::new();
        let v = evaluate_expression(r#""a" + "b""#, &b, &c).unwrap();
        assert_eq!(v, Value::String("ab".to_string()));
    }

    #[test]
    fn variables_namespace_lookup() {
        let c = ctx();
        c.set_variable("threshold", Value::Number(10.0));
        let b = Bindings::new().with("input", Value::Number(15.0));
        assert!(evaluate_condition("input > variables.threshold", &b, &c));
    }

    #[test]
    fn unresolved_field_is_false_in_condition_form() {
        let c = ctx();
        let b = Bindings::new();
        assert!(!evaluate_condition("nope > 1", &b, &c));
    }

    #[test]
    fn unresolved_field_is_error_in_value_form() {
        let c = ctx();
        let b = Bindings::new();
        assert!(evaluate_expression("nope + 1", &b, &c).is_err());
    }

    #[test]
    fn ternary_and_method_chain() {
        let c = ctx();
        let b = Bindings::new().with("input", Value::String(" Hi ".to_string()));
        let v = evaluate_expression("input.trim().toUpperCase()", &b, &c).unwrap();
        assert_eq!(v, Value::String("HI".to_string()));
    }
}
