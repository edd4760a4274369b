//! Expression evaluator
//!
//! Walks a parsed [`Expr`] against a set of variable bindings. Values are
//! [`CellValue`]s so dates and enums keep their identity through the
//! expression and come out the other side ready to coerce into a field.

use super::parser::Expr;
use super::Bindings;
use crate::convert::{date_to_serial, serial_to_date};
use crate::types::CellValue;
use chrono::{Datelike, NaiveDate};
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EvalError {}

type EvalResult = Result<CellValue, EvalError>;

pub fn evaluate(expr: &Expr, vars: &Bindings) -> EvalResult {
    match expr {
        Expr::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Ok(CellValue::Int(*n as i64)),
        Expr::Number(n) => Ok(CellValue::Float(*n)),
        Expr::Text(s) => Ok(CellValue::Text(s.clone())),
        Expr::Bool(b) => Ok(CellValue::Bool(*b)),
        Expr::Null => Ok(CellValue::Null),
        Expr::Variable(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::new(format!("unknown variable '{}'", name))),
        Expr::Negate(inner) => {
            let value = evaluate(inner, vars)?;
            match value {
                CellValue::Int(i) => Ok(i.checked_neg().map_or(CellValue::Float(-(i as f64)), CellValue::Int)),
                other => Ok(CellValue::Float(-number(&other, "-")?)),
            }
        }
        Expr::Binary { op, left, right } => {
            let l = evaluate(left, vars)?;
            let r = evaluate(right, vars)?;
            binary(op, &l, &r)
        }
        Expr::Call { name, args } => call(name, args, vars),
    }
}

/// Numeric view of a value; blank counts as zero
fn number(value: &CellValue, context: &str) -> Result<f64, EvalError> {
    if value.is_null() {
        return Ok(0.0);
    }
    value.as_f64().ok_or_else(|| {
        EvalError::new(format!(
            "{} expects a number, got {} '{}'",
            context,
            value.type_name(),
            value
        ))
    })
}

fn binary(op: &str, left: &CellValue, right: &CellValue) -> EvalResult {
    match op {
        "&" => Ok(CellValue::Text(format!("{}{}", left, right))),
        "+" | "-" | "*" => {
            if let (CellValue::Int(a), CellValue::Int(b)) = (left, right) {
                let exact = match op {
                    "+" => a.checked_add(*b),
                    "-" => a.checked_sub(*b),
                    _ => a.checked_mul(*b),
                };
                if let Some(v) = exact {
                    return Ok(CellValue::Int(v));
                }
            }
            let (a, b) = (number(left, op)?, number(right, op)?);
            Ok(CellValue::Float(match op {
                "+" => a + b,
                "-" => a - b,
                _ => a * b,
            }))
        }
        "/" => {
            let (a, b) = (number(left, op)?, number(right, op)?);
            if b == 0.0 {
                return Err(EvalError::new("division by zero"));
            }
            Ok(CellValue::Float(a / b))
        }
        "^" => Ok(CellValue::Float(number(left, op)?.powf(number(right, op)?))),
        "=" => Ok(CellValue::Bool(values_equal(left, right))),
        "<>" => Ok(CellValue::Bool(!values_equal(left, right))),
        "<" | ">" | "<=" | ">=" => {
            let ordering = compare(left, right)?;
            Ok(CellValue::Bool(match op {
                "<" => ordering.is_lt(),
                ">" => ordering.is_gt(),
                "<=" => ordering.is_le(),
                _ => ordering.is_ge(),
            }))
        }
        _ => Err(EvalError::new(format!("unknown operator '{}'", op))),
    }
}

fn is_textual(value: &CellValue) -> bool {
    matches!(value, CellValue::Text(_) | CellValue::Enum(_))
}

fn values_equal(left: &CellValue, right: &CellValue) -> bool {
    match (left, right) {
        (CellValue::Null, other) | (other, CellValue::Null) => other.is_blank(),
        (l, r) if is_textual(l) && is_textual(r) => {
            l.as_text().to_lowercase() == r.as_text().to_lowercase()
        }
        (CellValue::Bool(l), CellValue::Bool(r)) => l == r,
        (l, r) if !is_textual(l) && !is_textual(r) => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < 1e-10,
            _ => false,
        },
        _ => false,
    }
}

fn compare(left: &CellValue, right: &CellValue) -> Result<std::cmp::Ordering, EvalError> {
    if is_textual(left) && is_textual(right) {
        return Ok(left
            .as_text()
            .to_lowercase()
            .cmp(&right.as_text().to_lowercase()));
    }
    let (a, b) = (number(left, "comparison")?, number(right, "comparison")?);
    a.partial_cmp(&b)
        .ok_or_else(|| EvalError::new("cannot compare NaN"))
}

fn require(name: &str, args: &[Expr], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(EvalError::new(format!(
            "{} takes {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn text_arg(args: &[Expr], i: usize, vars: &Bindings) -> Result<String, EvalError> {
    Ok(evaluate(&args[i], vars)?.as_text())
}

fn count_arg(name: &str, args: &[Expr], i: usize, default: usize, vars: &Bindings) -> Result<usize, EvalError> {
    match args.get(i) {
        None => Ok(default),
        Some(arg) => {
            let n = number(&evaluate(arg, vars)?, name)?;
            if n < 0.0 {
                return Err(EvalError::new(format!("{} count must not be negative", name)));
            }
            Ok(n as usize)
        }
    }
}

/// Whole part of a `DATE` argument; `None` outside the range any date can use
fn date_part(n: f64) -> Option<i64> {
    (n.is_finite() && n.abs() < 1e9).then(|| n.trunc() as i64)
}

fn date_arg(name: &str, value: &CellValue) -> Result<NaiveDate, EvalError> {
    let date = match value {
        CellValue::Date(d) => Some(*d),
        CellValue::DateTime(dt) => Some(dt.date()),
        CellValue::Int(_) | CellValue::Float(_) => value.as_f64().and_then(serial_to_date),
        CellValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        _ => None,
    };
    date.ok_or_else(|| EvalError::new(format!("{} expects a date, got '{}'", name, value)))
}

fn call(name: &str, args: &[Expr], vars: &Bindings) -> EvalResult {
    match name {
        // logical
        "IF" => {
            require(name, args, 2, 3)?;
            if evaluate(&args[0], vars)?.is_truthy() {
                evaluate(&args[1], vars)
            } else if let Some(otherwise) = args.get(2) {
                evaluate(otherwise, vars)
            } else {
                Ok(CellValue::Bool(false))
            }
        }
        "AND" => {
            require(name, args, 1, usize::MAX)?;
            for arg in args {
                if !evaluate(arg, vars)?.is_truthy() {
                    return Ok(CellValue::Bool(false));
                }
            }
            Ok(CellValue::Bool(true))
        }
        "OR" => {
            require(name, args, 1, usize::MAX)?;
            for arg in args {
                if evaluate(arg, vars)?.is_truthy() {
                    return Ok(CellValue::Bool(true));
                }
            }
            Ok(CellValue::Bool(false))
        }
        "NOT" => {
            require(name, args, 1, 1)?;
            Ok(CellValue::Bool(!evaluate(&args[0], vars)?.is_truthy()))
        }
        "ISBLANK" => {
            require(name, args, 1, 1)?;
            Ok(CellValue::Bool(evaluate(&args[0], vars)?.is_blank()))
        }
        "IFERROR" => {
            require(name, args, 2, 2)?;
            evaluate(&args[0], vars).or_else(|_| evaluate(&args[1], vars))
        }
        "SWITCH" => {
            require(name, args, 3, usize::MAX)?;
            let subject = evaluate(&args[0], vars)?;
            let mut pairs = args[1..].chunks_exact(2);
            for pair in pairs.by_ref() {
                if values_equal(&subject, &evaluate(&pair[0], vars)?) {
                    return evaluate(&pair[1], vars);
                }
            }
            match pairs.remainder().first() {
                Some(default) => evaluate(default, vars),
                None => Err(EvalError::new(format!("SWITCH: no case matches '{}'", subject))),
            }
        }
        "CHOOSE" => {
            require(name, args, 2, usize::MAX)?;
            let index = number(&evaluate(&args[0], vars)?, name)? as usize;
            if index == 0 || index >= args.len() {
                return Err(EvalError::new(format!("CHOOSE: index {} out of range", index)));
            }
            evaluate(&args[index], vars)
        }

        // text
        "LEN" => {
            require(name, args, 1, 1)?;
            Ok(CellValue::Int(text_arg(args, 0, vars)?.chars().count() as i64))
        }
        "TRIM" => {
            require(name, args, 1, 1)?;
            let text = text_arg(args, 0, vars)?;
            Ok(CellValue::Text(text.split_whitespace().collect::<Vec<_>>().join(" ")))
        }
        "UPPER" => {
            require(name, args, 1, 1)?;
            Ok(CellValue::Text(text_arg(args, 0, vars)?.to_uppercase()))
        }
        "LOWER" => {
            require(name, args, 1, 1)?;
            Ok(CellValue::Text(text_arg(args, 0, vars)?.to_lowercase()))
        }
        "LEFT" => {
            require(name, args, 1, 2)?;
            let text = text_arg(args, 0, vars)?;
            let n = count_arg(name, args, 1, 1, vars)?;
            Ok(CellValue::Text(text.chars().take(n).collect()))
        }
        "RIGHT" => {
            require(name, args, 1, 2)?;
            let chars: Vec<char> = text_arg(args, 0, vars)?.chars().collect();
            let n = count_arg(name, args, 1, 1, vars)?;
            let start = chars.len().saturating_sub(n);
            Ok(CellValue::Text(chars[start..].iter().collect()))
        }
        "MID" => {
            require(name, args, 3, 3)?;
            let text = text_arg(args, 0, vars)?;
            let start = count_arg(name, args, 1, 1, vars)?;
            if start == 0 {
                return Err(EvalError::new("MID: start is 1-based"));
            }
            let len = count_arg(name, args, 2, 0, vars)?;
            Ok(CellValue::Text(text.chars().skip(start - 1).take(len).collect()))
        }
        "CONCAT" | "CONCATENATE" => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&evaluate(arg, vars)?.as_text());
            }
            Ok(CellValue::Text(out))
        }
        "SUBSTITUTE" => {
            require(name, args, 3, 3)?;
            let text = text_arg(args, 0, vars)?;
            let old = text_arg(args, 1, vars)?;
            if old.is_empty() {
                return Ok(CellValue::Text(text));
            }
            let new = text_arg(args, 2, vars)?;
            Ok(CellValue::Text(text.replace(&old, &new)))
        }
        "MATCHES" => {
            require(name, args, 2, 2)?;
            let text = text_arg(args, 0, vars)?;
            let pattern = text_arg(args, 1, vars)?;
            let re = Regex::new(&pattern)
                .map_err(|e| EvalError::new(format!("MATCHES: bad pattern '{}': {}", pattern, e)))?;
            Ok(CellValue::Bool(re.is_match(&text)))
        }
        "TEXT" => {
            require(name, args, 2, 2)?;
            let value = evaluate(&args[0], vars)?;
            let format = text_arg(args, 1, vars)?;
            Ok(CellValue::Text(format_value(&value, &format)))
        }

        // math
        "ABS" => {
            require(name, args, 1, 1)?;
            match evaluate(&args[0], vars)? {
                CellValue::Int(i) => Ok(CellValue::Int(i.saturating_abs())),
                other => Ok(CellValue::Float(number(&other, name)?.abs())),
            }
        }
        "ROUND" => {
            require(name, args, 1, 2)?;
            let n = number(&evaluate(&args[0], vars)?, name)?;
            let digits = match args.get(1) {
                Some(d) => number(&evaluate(d, vars)?, name)? as i32,
                None => 0,
            };
            let factor = 10f64.powi(digits);
            Ok(CellValue::Float((n * factor).round() / factor))
        }
        "INT" => {
            require(name, args, 1, 1)?;
            let n = number(&evaluate(&args[0], vars)?, name)?;
            Ok(CellValue::Int(n.floor() as i64))
        }
        "MOD" => {
            require(name, args, 2, 2)?;
            let n = number(&evaluate(&args[0], vars)?, name)?;
            let d = number(&evaluate(&args[1], vars)?, name)?;
            if d == 0.0 {
                return Err(EvalError::new("MOD: division by zero"));
            }
            // result takes the sign of the divisor
            Ok(CellValue::Float(n - d * (n / d).floor()))
        }
        "MIN" | "MAX" => {
            require(name, args, 1, usize::MAX)?;
            let mut best: Option<f64> = None;
            for arg in args {
                let value = evaluate(arg, vars)?;
                if value.is_null() {
                    continue;
                }
                let n = number(&value, name)?;
                best = Some(match best {
                    None => n,
                    Some(b) if name == "MIN" => b.min(n),
                    Some(b) => b.max(n),
                });
            }
            Ok(CellValue::Float(best.unwrap_or(0.0)))
        }

        // dates
        "TODAY" => {
            require(name, args, 0, 0)?;
            Ok(CellValue::Date(chrono::Local::now().date_naive()))
        }
        "DATE" => {
            require(name, args, 3, 3)?;
            let year = number(&evaluate(&args[0], vars)?, name)?;
            let month = number(&evaluate(&args[1], vars)?, name)?;
            let day = number(&evaluate(&args[2], vars)?, name)?;
            let invalid = || EvalError::new(format!("DATE: invalid date {}-{}-{}", year, month, day));
            let (Some(y), Some(m), Some(d)) = (date_part(year), date_part(month), date_part(day)) else {
                return Err(invalid());
            };
            // month overflow rolls into the year, day overflow into the month
            let months = y
                .checked_mul(12)
                .and_then(|v| v.checked_add(m))
                .and_then(|v| v.checked_sub(1))
                .ok_or_else(invalid)?;
            let first_year = i32::try_from(months.div_euclid(12)).map_err(|_| invalid())?;
            let first = NaiveDate::from_ymd_opt(first_year, months.rem_euclid(12) as u32 + 1, 1).ok_or_else(invalid)?;
            let offset = d.checked_sub(1).ok_or_else(invalid)?;
            serial_to_date(date_to_serial(first) + offset as f64)
                .map(CellValue::Date)
                .ok_or_else(invalid)
        }
        "YEAR" | "MONTH" | "DAY" => {
            require(name, args, 1, 1)?;
            let date = date_arg(name, &evaluate(&args[0], vars)?)?;
            Ok(CellValue::Int(match name {
                "YEAR" => date.year() as i64,
                "MONTH" => date.month() as i64,
                _ => date.day() as i64,
            }))
        }

        _ => Err(EvalError::new(format!("unknown function '{}'", name))),
    }
}

/// `TEXT` formatting for the common Excel codes: date parts and fixed decimals
fn format_value(value: &CellValue, format: &str) -> String {
    let date_time = match value {
        CellValue::Date(d) => d.and_hms_opt(0, 0, 0),
        CellValue::DateTime(dt) => Some(*dt),
        _ => None,
    };
    let lower = format.to_lowercase();

    if let Some(dt) = date_time {
        let pattern = lower
            .replace("yyyy", "%Y")
            .replace("yy", "%y")
            .replace("hh:mm", "%H:%M")
            .replace("mm", "%m")
            .replace("dd", "%d")
            .replace("hh", "%H")
            .replace("ss", "%S");
        return dt.format(&pattern).to_string();
    }

    if lower.starts_with('0') {
        if let Some(n) = value.as_f64() {
            let decimals = lower
                .split_once('.')
                .map(|(_, frac)| frac.chars().filter(|c| *c == '0').count())
                .unwrap_or(0);
            return format!("{:.*}", decimals, n);
        }
    }
    value.as_text()
}

#[cfg(test)]
mod tests {
    use super::super::parser::Parser;
    use super::super::tokenizer::tokenize;
    use super::*;

    fn eval_with(src: &str, vars: &Bindings) -> EvalResult {
        let expr = Parser::new(tokenize(src).unwrap()).parse().unwrap();
        evaluate(&expr, vars)
    }

    fn eval(src: &str) -> EvalResult {
        eval_with(src, &Bindings::new())
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), CellValue::Int(7));
        assert_eq!(eval("7 / 2").unwrap(), CellValue::Float(3.5));
        assert_eq!(eval("2 ^ 10").unwrap(), CellValue::Float(1024.0));
        assert_eq!(eval("-(4 - 6)").unwrap(), CellValue::Int(2));
        assert_eq!(eval("1.5 * 2").unwrap(), CellValue::Float(3.0));
        assert!(eval("1 / 0").is_err());
    }

    #[test]
    fn test_int_arithmetic_stays_int() {
        let mut vars = Bindings::new();
        vars.insert("age".into(), CellValue::Int(30));
        vars.insert("bonus".into(), CellValue::Int(2));
        assert_eq!(eval_with("age + bonus", &vars).unwrap(), CellValue::Int(32));
    }

    #[test]
    fn test_comparison_and_logic() {
        let mut vars = Bindings::new();
        vars.insert("age".into(), CellValue::Int(20));
        assert_eq!(
            eval_with("AND(age >= 18, age < 65)", &vars).unwrap(),
            CellValue::Bool(true)
        );
        assert_eq!(eval("\"abc\" = \"ABC\"").unwrap(), CellValue::Bool(true));
        assert_eq!(eval("NOT(TRUE)").unwrap(), CellValue::Bool(false));
        assert_eq!(
            eval_with("IF(age > 30, \"old\", \"young\")", &vars).unwrap(),
            CellValue::Text("young".into())
        );
    }

    #[test]
    fn test_blank_semantics() {
        let mut vars = Bindings::new();
        vars.insert("value".into(), CellValue::Null);
        assert_eq!(eval_with("ISBLANK(value)", &vars).unwrap(), CellValue::Bool(true));
        assert_eq!(eval_with("value = \"\"", &vars).unwrap(), CellValue::Bool(true));
        assert_eq!(eval_with("value + 1", &vars).unwrap(), CellValue::Float(1.0));
    }

    #[test]
    fn test_unknown_variable_is_error() {
        let err = eval("missing + 1").unwrap_err();
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_text_functions() {
        assert_eq!(eval("LEN(\"héllo\")").unwrap(), CellValue::Int(5));
        assert_eq!(eval("TRIM(\"  a   b \")").unwrap(), CellValue::Text("a b".into()));
        assert_eq!(eval("LEFT(\"abcdef\", 2)").unwrap(), CellValue::Text("ab".into()));
        assert_eq!(eval("RIGHT(\"abcdef\", 2)").unwrap(), CellValue::Text("ef".into()));
        assert_eq!(eval("MID(\"abcdef\", 2, 3)").unwrap(), CellValue::Text("bcd".into()));
        assert_eq!(eval("\"a\" & 1 & TRUE").unwrap(), CellValue::Text("a1TRUE".into()));
        assert_eq!(
            eval("SUBSTITUTE(\"a-b-c\", \"-\", \"/\")").unwrap(),
            CellValue::Text("a/b/c".into())
        );
        assert_eq!(
            eval("MATCHES(\"AB-123\", \"^[A-Z]{2}-\\d+$\")").unwrap(),
            CellValue::Bool(true)
        );
    }

    #[test]
    fn test_switch_and_choose() {
        assert_eq!(
            eval("SWITCH(2, 1, \"one\", 2, \"two\", \"many\")").unwrap(),
            CellValue::Text("two".into())
        );
        assert_eq!(
            eval("SWITCH(9, 1, \"one\", \"many\")").unwrap(),
            CellValue::Text("many".into())
        );
        assert!(eval("SWITCH(9, 1, \"one\")").is_err());
        assert_eq!(eval("CHOOSE(2, \"a\", \"b\")").unwrap(), CellValue::Text("b".into()));
        assert!(eval("CHOOSE(3, \"a\", \"b\")").is_err());
    }

    #[test]
    fn test_iferror_recovers() {
        assert_eq!(eval("IFERROR(1 / 0, -1)").unwrap(), CellValue::Int(-1));
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(eval("ROUND(2.346, 2)").unwrap(), CellValue::Float(2.35));
        assert_eq!(eval("INT(-2.5)").unwrap(), CellValue::Int(-3));
        assert_eq!(eval("MOD(-3, 2)").unwrap(), CellValue::Float(1.0));
        assert_eq!(eval("MAX(1, 5, 3)").unwrap(), CellValue::Float(5.0));
        assert_eq!(eval("MIN(4, 2)").unwrap(), CellValue::Float(2.0));
    }

    #[test]
    fn test_date_functions() {
        assert_eq!(eval("DATE(2024, 13, 1)").unwrap(), CellValue::Date(ymd(2025, 1, 1)));
        assert_eq!(eval("DATE(2024, 3, 0)").unwrap(), CellValue::Date(ymd(2024, 2, 29)));
        let mut vars = Bindings::new();
        vars.insert("born".into(), CellValue::Date(ymd(1990, 7, 4)));
        assert_eq!(eval_with("YEAR(born)", &vars).unwrap(), CellValue::Int(1990));
        assert_eq!(eval_with("MONTH(born)", &vars).unwrap(), CellValue::Int(7));
        assert_eq!(
            eval_with("TEXT(born, \"yyyy/mm/dd\")", &vars).unwrap(),
            CellValue::Text("1990/07/04".into())
        );
        assert_eq!(eval("TEXT(3.14159, \"0.00\")").unwrap(), CellValue::Text("3.14".into()));
    }

    #[test]
    fn test_date_rejects_out_of_range_parts() {
        assert!(eval("DATE(3000000000, 1, 1)").is_err());
        assert!(eval("DATE(2020, 1, -1e300)").is_err());
        assert!(eval("DATE(2020, 1e300, 1)").is_err());
        assert!(eval("DATE(1, 1, 1)").is_err());

        let mut vars = Bindings::new();
        vars.insert("huge".into(), CellValue::Float(f64::MAX));
        assert!(eval_with("DATE(huge, huge, huge)", &vars).is_err());
    }

    #[test]
    fn test_negating_the_smallest_integer() {
        let mut vars = Bindings::new();
        vars.insert("n".into(), CellValue::Int(i64::MIN));
        assert_eq!(eval_with("-n", &vars).unwrap(), CellValue::Float(9.223372036854776e18));
    }

    #[test]
    fn test_unknown_function() {
        assert!(eval("NOPE(1)").is_err());
    }
}
