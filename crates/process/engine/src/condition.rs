//! Condition evaluator: expressions over an instance's variables
//!
//! Sequence-flow conditions and correlation keys are minijinja expressions
//! (`amount > 100`, `order.id`, `status == "ok" and not cancelled`)
//! evaluated with the variable scope as context.

use minijinja::{Environment, Value};
use process_types::VariableScope;

use crate::error::{EngineError, EngineResult};

/// Evaluates flow conditions and correlation-key expressions
#[derive(Debug)]
pub struct ConditionEvaluator {
    env: Environment<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    /// Whether a condition holds for the given scope
    pub fn evaluate(&self, expression: &str, scope: &VariableScope) -> EngineResult<bool> {
        Ok(self.eval(expression, scope)?.is_true())
    }

    /// The correlation key an expression yields; `None` when it is undefined
    pub fn correlation_key(
        &self,
        expression: &str,
        scope: &VariableScope,
    ) -> EngineResult<Option<String>> {
        let value = self.eval(expression, scope)?;
        if value.is_undefined() || value.is_none() {
            return Ok(None);
        }
        Ok(Some(value.to_string()))
    }

    fn eval(&self, expression: &str, scope: &VariableScope) -> EngineResult<Value> {
        let to_error = |e: minijinja::Error| EngineError::Expression {
            expression: expression.to_string(),
            message: e.to_string(),
        };
        let compiled = self.env.compile_expression(expression).map_err(to_error)?;
        compiled.eval(scope.as_map()).map_err(to_error)
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
