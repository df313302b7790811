//! Prelude module - common imports for gridcalc users
//!
//! ```rust
//! use gridcalc::prelude::*;
//! ```

pub use crate::{
    // Addressing
    CellAddress,
    CellError,
    CellKey,
    CellRange,
    // Engine
    CalculationOptions,
    CellState,
    Edit,
    Engine,
    EngineHandle,
    RecalcOptions,
    RecalcStats,
    // Host traits and the reference host
    CellValueProvider,
    InMemoryGrid,
    RawCell,
    SheetResolver,
    // Functions
    FunctionImpl,
    FunctionOptions,
    FunctionRegistry,
    // Errors
    Error,
    EvalError,
    Result,
    Value,
};
