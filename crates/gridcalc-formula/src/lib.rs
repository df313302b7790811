//! # gridcalc-formula
//!
//! Formula parser, evaluator and dependency graph for gridcalc.
//!
//! This crate provides:
//! - Formula parsing (text → AST → text)
//! - Formula evaluation (AST → value), synchronous or suspended
//! - Built-in functions and a registry for host-supplied ones
//! - Dependency tracking for recalculation
//!
//! ## Example
//!
//! ```rust
//! use gridcalc_formula::{evaluate, parse_formula, EvalContext, FunctionRegistry, Value};
//!
//! let ast = parse_formula("=SUM(1, 2) * 2").unwrap();
//! let registry = FunctionRegistry::new();
//! let ctx = EvalContext::detached(&registry);
//! assert_eq!(evaluate(&ast, &ctx).unwrap(), Value::Number(6.0));
//! ```

pub mod ast;
pub mod dependency;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod resolver;
pub mod tokenizer;
pub mod value;

pub use ast::{
    BinaryOperator, CellReference, FormulaExpr, RangeReference, Reference, UnaryOperator,
};
pub use dependency::{
    extract_precedents, extract_references, CellKey, DependencyGraph, GraphSnapshot, Precedent,
    RangeKey, References,
};
pub use error::{EvalError, EvalResult, FormulaError, FormulaResult};
pub use evaluator::{binary_op, evaluate, evaluate_async, unary_op, EvalContext};
pub use functions::{FunctionImpl, FunctionInfo, FunctionOptions, FunctionRegistry, FunctionSpec};
pub use parser::{parse_formula, parse_formula_with_depth, DEFAULT_MAX_PARSE_DEPTH};
pub use resolver::{CellValueProvider, EvalLimits, RawCell, ReferenceResolver, SheetResolver};
pub use value::{format_number, Value};

pub use gridcalc_core::{CellAddress, CellError, CellRange};
