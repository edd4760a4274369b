//! Conversion and assertion expressions
//!
//! Fields may carry a read conversion, a write conversion and an assertion,
//! each written as an Excel-flavoured expression over the record's field
//! names. The codecs only see the [`Evaluator`] trait: the embedded
//! [`FormulaEvaluator`] is the default, and [`ClosureEvaluator`] lets tests
//! and callers swap in compiled closures keyed by expression text.

pub mod evaluator;
pub mod parser;
pub mod tokenizer;

use crate::error::{ExcelError, ExcelResult};
use crate::types::CellValue;
use parser::{Expr, Parser};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Variable name to value
pub type Bindings = HashMap<String, CellValue>;

/// `(expression, bindings) -> value`, shared across threads
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expr: &str, vars: &Bindings) -> ExcelResult<CellValue>;
}

/// Parse an expression without evaluating it
pub fn compile(source: &str) -> ExcelResult<Expr> {
    let tokens = tokenizer::tokenize(source).map_err(|e| ExcelError::Expression {
        expr: source.to_string(),
        message: e.to_string(),
    })?;
    Parser::new(tokens).parse().map_err(|e| ExcelError::Expression {
        expr: source.to_string(),
        message: e.to_string(),
    })
}

/// The embedded expression engine. Parsed expressions are memoized.
#[derive(Debug, Default)]
pub struct FormulaEvaluator {
    parsed: RwLock<HashMap<String, Arc<Expr>>>,
}

impl FormulaEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn parsed(&self, source: &str) -> ExcelResult<Arc<Expr>> {
        if let Ok(cache) = self.parsed.read() {
            if let Some(expr) = cache.get(source) {
                return Ok(Arc::clone(expr));
            }
        }
        let expr = Arc::new(compile(source)?);
        if let Ok(mut cache) = self.parsed.write() {
            cache.insert(source.to_string(), Arc::clone(&expr));
        }
        Ok(expr)
    }
}

impl Evaluator for FormulaEvaluator {
    fn evaluate(&self, source: &str, vars: &Bindings) -> ExcelResult<CellValue> {
        let expr = self.parsed(source)?;
        evaluator::evaluate(&expr, vars).map_err(|e| ExcelError::Expression {
            expr: source.to_string(),
            message: e.message,
        })
    }
}

type Compiled = Box<dyn Fn(&Bindings) -> CellValue + Send + Sync>;

/// Evaluator backed by closures registered per expression text.
///
/// Unregistered expressions go to the fallback, if any.
#[derive(Default)]
pub struct ClosureEvaluator {
    closures: HashMap<String, Compiled>,
    fallback: Option<Arc<dyn Evaluator>>,
}

impl ClosureEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, expr: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Bindings) -> CellValue + Send + Sync + 'static,
    {
        self.closures.insert(expr.into(), Box::new(f));
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Evaluator>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl Evaluator for ClosureEvaluator {
    fn evaluate(&self, expr: &str, vars: &Bindings) -> ExcelResult<CellValue> {
        if let Some(f) = self.closures.get(expr) {
            return Ok(f(vars));
        }
        match &self.fallback {
            Some(fallback) => fallback.evaluate(expr, vars),
            None => Err(ExcelError::Expression {
                expr: expr.to_string(),
                message: "no closure registered".to_string(),
            }),
        }
    }
}

/// Process-wide default engine
pub fn default_evaluator() -> Arc<dyn Evaluator> {
    static DEFAULT: OnceLock<Arc<FormulaEvaluator>> = OnceLock::new();
    let engine = DEFAULT.get_or_init(|| Arc::new(FormulaEvaluator::new()));
    Arc::clone(engine) as Arc<dyn Evaluator>
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_evaluator_memoizes_and_evaluates() {
        let engine = FormulaEvaluator::new();
        let mut vars = Bindings::new();
        vars.insert("qty".into(), CellValue::Int(3));
        assert_eq!(engine.evaluate("qty * 2", &vars).unwrap(), CellValue::Int(6));
        vars.insert("qty".into(), CellValue::Int(5));
        assert_eq!(engine.evaluate("qty * 2", &vars).unwrap(), CellValue::Int(10));
        assert_eq!(engine.parsed.read().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_error_names_expression() {
        let err = FormulaEvaluator::new()
            .evaluate("IF(", &Bindings::new())
            .unwrap_err();
        match err {
            ExcelError::Expression { expr, .. } => assert_eq!(expr, "IF("),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_closure_evaluator_with_fallback() {
        let engine = ClosureEvaluator::new()
            .register("double", |vars| {
                CellValue::Int(vars.get("n").and_then(|v| v.as_f64()).unwrap_or(0.0) as i64 * 2)
            })
            .with_fallback(default_evaluator());
        let mut vars = Bindings::new();
        vars.insert("n".into(), CellValue::Int(21));
        assert_eq!(engine.evaluate("double", &vars).unwrap(), CellValue::Int(42));
        assert_eq!(engine.evaluate("n + 1", &vars).unwrap(), CellValue::Int(22));
    }

    #[test]
    fn test_closure_evaluator_without_fallback() {
        assert!(ClosureEvaluator::new()
            .evaluate("anything", &Bindings::new())
            .is_err());
    }
}
