//! Cell-related types
//!
//! This module contains:
//! - [`CellAddress`] - A cell's location (e.g., "A1")
//! - [`CellRange`] - A rectangular block of cells (e.g., "A1:B10")
//! - [`CellError`] - Error codes shown in place of a value

mod address;
mod error;

pub use address::{CellAddress, CellRange, CellRangeIterator};
pub use error::CellError;
