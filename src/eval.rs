//! Expression evaluation against a variable context
//!
//! Both modes share one post-order walk. In scaled mode every variable leaf
//! is converted from normalised to real units with its own `rho`/`delta`
//! before use, so the tree always computes in real units internally and only
//! the boundary differs.

use serde::Serialize;

use crate::ast::{BinaryOp, Expr, Node, NodeKind};
use crate::error::{CompileError, CompileResult};
use crate::system::GlobalTable;

/// A named value with the scale parameters it is stored under
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub name: String,
    pub value: f64,
    pub rho: f64,
    pub delta: f64,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self::scaled(name, value, 1.0, 0.0)
    }

    pub fn scaled(name: impl Into<String>, value: f64, rho: f64, delta: f64) -> Self {
        Self {
            name: name.into(),
            value,
            rho,
            delta,
        }
    }

    /// Initial binding for a compiled declaration
    pub fn from_expr(name: impl Into<String>, expr: &Expr) -> Self {
        Self::scaled(name, expr.initial_condition, expr.rho, expr.delta)
    }
}

/// Convert a normalised value back to real units
///
/// A `rho` of zero means the scale was never set and is treated as 1.
pub fn to_real(value: f64, rho: f64, delta: f64) -> f64 {
    let rho = if rho == 0.0 { 1.0 } else { rho };
    value / rho + delta
}

/// Convert a real value to normalised units
pub fn to_normalized(value: f64, rho: f64, delta: f64) -> f64 {
    let rho = if rho == 0.0 { 1.0 } else { rho };
    rho * (value - delta)
}

/// Where a name was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Constant,
    Variable,
    Global,
}

/// Result of a name lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub scope: Scope,
    pub value: f64,
    pub rho: f64,
    pub delta: f64,
}

static EMPTY_GLOBALS: GlobalTable = GlobalTable::new();

/// Lookup context for one evaluation: constants, then state variables, then globals
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    constants: &'a [Binding],
    variables: &'a [Binding],
    globals: &'a GlobalTable,
}

impl<'a> EvalContext<'a> {
    pub fn new(constants: &'a [Binding], variables: &'a [Binding], globals: &'a GlobalTable) -> Self {
        Self {
            constants,
            variables,
            globals,
        }
    }

    /// Context with nothing in scope, for literal-only expressions
    pub fn empty() -> EvalContext<'static> {
        EvalContext {
            constants: &[],
            variables: &[],
            globals: &EMPTY_GLOBALS,
        }
    }

    pub fn lookup(&self, name: &str) -> CompileResult<Resolved> {
        let binding = |scope: Scope, b: &Binding| Resolved {
            scope,
            value: b.value,
            rho: b.rho,
            delta: b.delta,
        };

        if let Some(b) = self.constants.iter().find(|b| b.name == name) {
            return Ok(binding(Scope::Constant, b));
        }
        if let Some(b) = self.variables.iter().find(|b| b.name == name) {
            return Ok(binding(Scope::Variable, b));
        }
        if let Some(entry) = self.globals.get(name) {
            return Ok(Resolved {
                scope: Scope::Global,
                value: entry.value,
                rho: entry.rho,
                delta: entry.delta,
            });
        }
        Err(CompileError::undefined(name))
    }
}

/// Evaluation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Leaves and results are real-valued
    Unscaled,
    /// Leaves and results are hardware-normalised
    Scaled,
}

/// Tree evaluator
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    mode: EvalMode,
}

impl Evaluator {
    pub fn new(mode: EvalMode) -> Self {
        Self { mode }
    }

    /// Evaluate a subtree in real units
    pub fn evaluate_node(&self, node: &Node, context: &EvalContext<'_>) -> CompileResult<f64> {
        match &node.kind {
            NodeKind::Number(value) => Ok(*value),

            NodeKind::Variable(name) => {
                let resolved = context.lookup(name)?;
                Ok(match self.mode {
                    EvalMode::Unscaled => resolved.value,
                    EvalMode::Scaled => to_real(resolved.value, resolved.rho, resolved.delta),
                })
            }

            NodeKind::Operator { op, left, right } => {
                let l = self.evaluate_node(left, context)?;
                let r = self.evaluate_node(right, context)?;
                if *op == BinaryOp::Div && r == 0.0 {
                    return Err(CompileError::division_by_zero(node.to_string()));
                }
                Ok(op.apply(l, r))
            }

            NodeKind::Wave { wave, operand } => {
                Ok(wave.apply(self.evaluate_node(operand, context)?))
            }

            // The accumulated state lives in the integration vector
            NodeKind::Integrator { operand } => self.evaluate_node(operand, context),
        }
    }

    /// Time derivative of an integrator's variable, in this evaluator's units
    pub fn evaluate_derivative(&self, expr: &Expr, context: &EvalContext<'_>) -> CompileResult<f64> {
        let real = self.evaluate_node(expr.body(), context)?;
        Ok(match self.mode {
            EvalMode::Unscaled => real,
            // d/dt of rho * (x - delta)
            EvalMode::Scaled => real * expr.rho,
        })
    }

    /// Value of a non-integrator expression, in this evaluator's units
    pub fn evaluate_value(&self, expr: &Expr, context: &EvalContext<'_>) -> CompileResult<f64> {
        let real = self.evaluate_node(&expr.root, context)?;
        Ok(match self.mode {
            EvalMode::Unscaled => real,
            EvalMode::Scaled => to_normalized(real, expr.rho, expr.delta),
        })
    }
}
