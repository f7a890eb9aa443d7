//! Small stand-alone helpers that don't belong to a single operator:
//! the condition mini-language fallback, duration parsing, and text case
//! conversions shared by several transform operators.

use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// Evaluate the mini-language fallback grammar: `"true"|"false"` literal,
/// or `<op><number>` compared against a numeric input (or the `value`
/// field of a mapping input). Anything else is `false` (§4.8).
pub fn evaluate_mini_language(condition: &str, input: &Value) -> bool {
    let condition = condition.trim();
    if condition.eq_ignore_ascii_case("true") {
        return true;
    }
    if condition.eq_ignore_ascii_case("false") {
        return false;
    }

    let subject = match input {
        Value::Number(_) => input.clone(),
        Value::Object(_) => input.get_field("value").cloned().unwrap_or(Value::Null),
        _ => return false,
    };
    let Some(n) = subject.as_f64() else { return false };

    let (op, rest) = match condition.as_bytes() {
        [b'>', b'=', ..] => (">=", &condition[2..]),
        [b'<', b'=', ..] => ("<=", &condition[2..]),
        [b'=', b'=', ..] => ("==", &condition[2..]),
        [b'!', b'=', ..] => ("!=", &condition[2..]),
        [b'>', ..] => (">", &condition[1..]),
        [b'<', ..] => ("<", &condition[1..]),
        _ => return false,
    };
    let Ok(rhs) = rest.trim().parse::<f64>() else { return false };

    match op {
        ">" => n > rhs,
        "<" => n < rhs,
        ">=" => n >= rhs,
        "<=" => n <= rhs,
        "==" => n == rhs,
        "!=" => n != rhs,
        _ => false,
    }
}

/// Parse `Ns`, `Nms`, `Nm`, `Nh`, or a raw integer (milliseconds).
pub fn parse_duration(input: &str) -> EngineResult<Duration> {
    let s = input.trim();
    let invalid = || EngineError::invalid_input(format!("invalid duration '{input}'"));

    if let Some(num) = s.strip_suffix("ms") {
        let ms: f64 = num.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_secs_f64(ms / 1000.0));
    }
    if let Some(num) = s.strip_suffix('s') {
        let secs: f64 = num.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_secs_f64(secs));
    }
    if let Some(num) = s.strip_suffix('m') {
        let mins: f64 = num.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_secs_f64(mins * 60.0));
    }
    if let Some(num) = s.strip_suffix('h') {
        let hours: f64 = num.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_secs_f64(hours * 3600.0));
    }
    let ms: f64 = s.parse().map_err(|_| invalid())?;
    Ok(Duration::from_secs_f64(ms / 1000.0))
}

pub fn uppercase(s: &str) -> String {
    s.to_uppercase()
}

pub fn lowercase(s: &str) -> String {
    s.to_lowercase()
}

pub fn titlecase(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn camelcase(s: &str) -> String {
    let mut words = s.split(|c: char| c == ' ' || c == '_' || c == '-').filter(|w| !w.is_empty());
    let mut out = String::new();
    if let Some(first) = words.next() {
        out.push_str(&first.to_lowercase());
    }
    for word in words {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push_str(&first.to_uppercase().to_string());
            out.push_str(&chars.as_str().to_lowercase());
        }
    }
    out
}

pub fn inversecase(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_uppercase() { c.to_lowercase().next().unwrap_or(c) } else { c.to_uppercase().next().unwrap_or(c) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mini_language_numeric_comparison() {
        assert!(evaluate_mini_language(">10", &Value::Number(15.0)));
        assert!(!evaluate_mini_language(">10", &Value::Number(5.0)));
    }

    #[test]
    fn mini_language_literal() {
        assert!(evaluate_mini_language("true", &Value::Null));
        assert!(!evaluate_mini_language("false", &Value::Number(100.0)));
    }

    #[test]
    fn mini_language_against_value_field() {
        let input = Value::object([("value".to_string(), Value::Number(42.0))]);
        assert!(evaluate_mini_language(">=42", &input));
    }

    #[test]
    fn duration_parsing_variants() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn case_conversions() {
        assert_eq!(titlecase("hello world"), "Hello World");
        assert_eq!(camelcase("hello world-again"), "helloWorldAgain");
        assert_eq!(inversecase("HeLLo"), "hEllO");
    }
}
