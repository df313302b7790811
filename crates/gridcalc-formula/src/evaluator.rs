//! Formula evaluator
//!
//! Evaluates formula ASTs to produce values. Evaluation is a future so that
//! a call to an async function suspends only the formula waiting on it;
//! [`evaluate`] drives that future to completion for synchronous callers.
//!
//! Two kinds of failure exist. Error *values* (`#DIV/0!` from `1/0`, an error
//! read from a cell) flow through as [`Value::Error`] and are contagious.
//! [`EvalError`]s are faults raised at a call boundary or by a resource guard:
//! unknown names, wrong argument counts, panicking functions, exhausted limits.

use crate::ast::{BinaryOperator, FormulaExpr, UnaryOperator};
use crate::error::{EvalError, EvalResult};
use crate::functions::math::{finite, power};
use crate::functions::{FunctionImpl, FunctionRegistry, FunctionSpec};
use crate::resolver::{CellValueProvider, Detached, EvalLimits, ReferenceResolver, SheetResolver};
use crate::value::Value;
use futures::future::{FutureExt, LocalBoxFuture};
use gridcalc_core::{CellAddress, CellError};
use std::any::Any;
use std::cmp::Ordering;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Context for formula evaluation
pub struct EvalContext<'a> {
    resolver: ReferenceResolver<'a>,
    registry: &'a FunctionRegistry,
    /// Cell holding the formula, when there is one
    pub cell: Option<CellAddress>,
    pub limits: EvalLimits,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        cells: &'a dyn CellValueProvider,
        sheets: &'a dyn SheetResolver,
        registry: &'a FunctionRegistry,
        sheet: usize,
        limits: EvalLimits,
    ) -> Self {
        Self {
            resolver: ReferenceResolver::new(cells, sheets, sheet, limits.max_range_cells),
            registry,
            cell: None,
            limits,
        }
    }

    /// Evaluate without a grid: every reference reads as blank and any
    /// sheet-qualified reference is `#REF!`
    pub fn detached(registry: &'a FunctionRegistry) -> Self {
        static DETACHED: Detached = Detached;
        Self::new(&DETACHED, &DETACHED, registry, 0, EvalLimits::default())
    }

    /// Set the address of the formula being evaluated
    pub fn at(mut self, cell: CellAddress) -> Self {
        self.cell = Some(cell);
        self
    }

    pub fn resolver(&self) -> &ReferenceResolver<'a> {
        &self.resolver
    }

    pub fn registry(&self) -> &'a FunctionRegistry {
        self.registry
    }
}

/// Evaluate an expression on the current thread
///
/// # Example
/// ```rust
/// use gridcalc_formula::{evaluate, parse_formula, EvalContext, FunctionRegistry, Value};
///
/// let registry = FunctionRegistry::new();
/// let ast = parse_formula("=SUM(1, 2) * 2").unwrap();
/// let value = evaluate(&ast, &EvalContext::detached(&registry)).unwrap();
/// assert_eq!(value, Value::Number(6.0));
/// ```
pub fn evaluate(expr: &FormulaExpr, ctx: &EvalContext<'_>) -> EvalResult<Value> {
    futures::executor::block_on(evaluate_async(expr, ctx))
}

/// Evaluate an expression as a future
pub fn evaluate_async<'a>(
    expr: &'a FormulaExpr,
    ctx: &'a EvalContext<'a>,
) -> LocalBoxFuture<'a, EvalResult<Value>> {
    eval_node(expr, ctx, 1)
}

fn eval_node<'a>(
    expr: &'a FormulaExpr,
    ctx: &'a EvalContext<'a>,
    depth: usize,
) -> LocalBoxFuture<'a, EvalResult<Value>> {
    async move {
        if depth > ctx.limits.max_depth {
            return Err(EvalError::exhausted(format!(
                "expression nested deeper than {} levels",
                ctx.limits.max_depth
            )));
        }

        match expr {
            // === Literals ===
            FormulaExpr::Number(n) => Ok(Value::Number(*n)),
            FormulaExpr::Text(s) => Ok(Value::Text(s.clone())),
            FormulaExpr::Boolean(b) => Ok(Value::Boolean(*b)),
            FormulaExpr::Error(e) => Ok(Value::Error(*e)),

            // === References ===
            FormulaExpr::CellRef(r) => Ok(ctx.resolver.resolve_cell(r)),
            FormulaExpr::RangeRef(r) => ctx.resolver.resolve_range(r),
            FormulaExpr::Name(name) => Err(EvalError::new(
                CellError::Name,
                format!("unknown name '{}'", name),
            )),

            // === Operators ===
            // A left-associative run such as `A1+A2+A3` is one level of
            // nesting, not one per operator
            FormulaExpr::BinaryOp { op, left, right } if !op.is_right_associative() => {
                let mut tail = vec![(*op, &**right)];
                let mut head: &FormulaExpr = left;
                while let FormulaExpr::BinaryOp {
                    op: inner,
                    left,
                    right,
                } = head
                {
                    if inner.precedence() != op.precedence() {
                        break;
                    }
                    tail.push((*inner, &**right));
                    head = left;
                }

                let mut acc = eval_node(head, ctx, depth + 1).await?.into_scalar();
                for (op, operand) in tail.into_iter().rev() {
                    let r = eval_node(operand, ctx, depth + 1).await?.into_scalar();
                    acc = binary_op(op, &acc, &r);
                }
                Ok(acc)
            }
            FormulaExpr::BinaryOp { op, left, right } => {
                let l = eval_node(left, ctx, depth + 1).await?.into_scalar();
                let r = eval_node(right, ctx, depth + 1).await?.into_scalar();
                Ok(binary_op(*op, &l, &r))
            }
            FormulaExpr::UnaryOp { op, operand } => {
                let v = eval_node(operand, ctx, depth + 1).await?.into_scalar();
                Ok(unary_op(*op, &v))
            }

            // === Functions ===
            FormulaExpr::Function { name, args } => call_function(name, args, ctx, depth).await,
        }
    }
    .boxed_local()
}

/// Apply a binary operator to two scalars
pub fn binary_op(op: BinaryOperator, left: &Value, right: &Value) -> Value {
    // Errors are contagious, left operand first
    if let Some(e) = left.error().or_else(|| right.error()) {
        return Value::Error(e);
    }

    if op.is_comparison() {
        let ord = left.compare(right);
        let result = match op {
            BinaryOperator::Equal => ord == Ordering::Equal,
            BinaryOperator::NotEqual => ord != Ordering::Equal,
            BinaryOperator::LessThan => ord == Ordering::Less,
            BinaryOperator::LessEqual => ord != Ordering::Greater,
            BinaryOperator::GreaterThan => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        };
        return Value::Boolean(result);
    }

    if op == BinaryOperator::Concat {
        return Value::Text(left.as_text() + &right.as_text());
    }

    let (l, r) = match (left.to_number(), right.to_number()) {
        (Ok(l), Ok(r)) => (l, r),
        (Err(e), _) | (_, Err(e)) => return Value::Error(e),
    };
    match op {
        BinaryOperator::Add => finite(l + r),
        BinaryOperator::Subtract => finite(l - r),
        BinaryOperator::Multiply => finite(l * r),
        BinaryOperator::Divide if r == 0.0 => Value::Error(CellError::Div0),
        BinaryOperator::Divide => finite(l / r),
        _ => power(l, r),
    }
}

/// Apply a unary operator to a scalar
pub fn unary_op(op: UnaryOperator, operand: &Value) -> Value {
    match operand.to_number() {
        Ok(n) => match op {
            UnaryOperator::Negate => Value::Number(-n),
            UnaryOperator::Percent => Value::Number(n / 100.0),
        },
        Err(e) => Value::Error(e),
    }
}

/// Resolve, check and invoke a function call
async fn call_function(
    name: &str,
    args: &[FormulaExpr],
    ctx: &EvalContext<'_>,
    depth: usize,
) -> EvalResult<Value> {
    // Looked up on every call so late registrations are picked up
    let spec = ctx.registry.resolve(name).ok_or_else(|| {
        EvalError::new(CellError::Name, format!("unknown function '{}'", name)).in_function(name)
    })?;
    let options = &spec.options;

    if !options.accepts(args.len()) {
        let expected = match options.max_args() {
            Some(max) if max == options.arg_count => format!("{}", max),
            Some(max) => format!("{} to {}", options.arg_count, max),
            None => format!("at least {}", options.arg_count),
        };
        return Err(EvalError::value(format!(
            "expected {} arguments, got {}",
            expected,
            args.len()
        ))
        .in_function(&spec.name));
    }

    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        let value = match eval_node(arg, ctx, depth + 1).await {
            Ok(v) => v,
            // Error-aware functions see faults as plain error values, but a
            // tripped resource guard always aborts the whole formula
            Err(e) if options.handles_errors && e.code != CellError::Calc => Value::Error(e.code),
            Err(e) => return Err(e),
        };
        let value = if options.range_aware {
            value
        } else {
            value.into_scalar()
        };
        if !options.handles_errors {
            if let Some(e) = value.first_error() {
                return Ok(Value::Error(e));
            }
        }
        values.push(value);
    }

    invoke(&spec, values)
        .await
        .map_err(|e| e.in_function(&spec.name))
}

/// Run the implementation, turning a panic into a `#VALUE!` fault
async fn invoke(spec: &FunctionSpec, args: Vec<Value>) -> EvalResult<Value> {
    match &spec.implementation {
        FunctionImpl::Sync(f) => catch_unwind(AssertUnwindSafe(|| (f.as_ref())(&args)))
            .unwrap_or_else(|payload| Err(panic_error(&spec.name, payload))),
        FunctionImpl::Async(f) => {
            let future = match catch_unwind(AssertUnwindSafe(|| (f.as_ref())(args))) {
                Ok(future) => future,
                Err(payload) => return Err(panic_error(&spec.name, payload)),
            };
            AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panic_error(&spec.name, payload)))
        }
    }
}

fn panic_error(function: &str, payload: Box<dyn Any + Send>) -> EvalError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "function panicked".to_string());
    tracing::warn!(function, %message, "function implementation panicked");
    EvalError::value(format!("panicked: {}", message)).in_function(function)
}
