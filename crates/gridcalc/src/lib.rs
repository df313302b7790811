//! # gridcalc
//!
//! An incremental formula engine for spreadsheet-style grids.
//!
//! The host keeps cell storage and implements
//! [`CellValueProvider`] and [`SheetResolver`]; the [`Engine`] parses
//! formulas, tracks which cells read which, and recomputes only what an edit
//! affects.
//!
//! ## Features
//!
//! - Formula parsing with precedence, ranges and cross-sheet references
//! - A shared, extensible function registry (sync and async functions)
//! - Dirty-set recalculation in dependency order, with cycle detection
//! - Cooperative evaluation: an async function suspends only its dependents
//! - Edits from other threads through [`EngineHandle`]
//!
//! ## Example
//!
//! ```rust
//! use gridcalc::prelude::*;
//! use std::sync::Arc;
//!
//! let grid = Arc::new(InMemoryGrid::with_sheets(&["Sheet1"]).unwrap());
//! let mut engine = Engine::new(Arc::clone(&grid));
//!
//! let a1 = grid.set_cell_value(0, "A1", 4.0).unwrap();
//! let b1 = grid.set_cell_formula(0, "B1", "=SQRT(A1)+1").unwrap();
//! engine.set_formula(b1, "=SQRT(A1)+1");
//! engine.recalculate(0, None, RecalcOptions::default()).unwrap();
//! assert_eq!(engine.value(b1), Value::Number(3.0));
//!
//! grid.set_value_at(a1, 9.0).unwrap();
//! engine.cell_changed(a1);
//! engine.recalculate(0, None, RecalcOptions::default()).unwrap();
//! assert_eq!(engine.value(b1), Value::Number(4.0));
//! ```

pub mod engine;
pub mod grid;
pub mod handle;
pub mod options;
pub mod prelude;
pub mod record;

pub use engine::Engine;
pub use grid::InMemoryGrid;
pub use handle::{Edit, EngineHandle};
pub use options::{CalculationOptions, RecalcOptions, RecalcStats};
pub use record::{CellState, FormulaId, FormulaRecord};

// Re-export core types
pub use gridcalc_core::{CellAddress, CellError, CellRange, Error, Result};

// Re-export formula types
pub use gridcalc_formula::{
    evaluate, evaluate_async, parse_formula, CellKey, CellValueProvider, DependencyGraph,
    EvalContext, EvalError, EvalResult, FormulaError, FormulaExpr, FunctionImpl, FunctionInfo,
    FunctionOptions, FunctionRegistry, FunctionSpec, GraphSnapshot, RawCell, SheetResolver, Value,
};
