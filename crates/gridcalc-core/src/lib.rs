//! # gridcalc-core
//!
//! Core data structures shared by the gridcalc crates.
//!
//! This crate provides:
//! - [`CellAddress`] and [`CellRange`] - A1-style cell addressing
//! - [`CellError`] - The stable error codes a cell can display
//! - [`Error`] - Failures of the non-formula APIs (addressing, engine control)
//!
//! ## Example
//!
//! ```rust
//! use gridcalc_core::{CellAddress, CellRange};
//!
//! let addr = CellAddress::parse("B3").unwrap();
//! assert_eq!((addr.row, addr.col), (2, 1));
//!
//! let range = CellRange::parse("A1:B10").unwrap();
//! assert!(range.contains(&addr));
//! ```

pub mod cell;
pub mod error;

pub use cell::{CellAddress, CellError, CellRange};
pub use error::{Error, Result};

/// Maximum number of rows in a sheet
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns in a sheet
pub const MAX_COLS: u16 = 16_384;
