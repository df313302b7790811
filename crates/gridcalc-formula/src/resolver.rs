//! Reference resolution
//!
//! The engine never owns cell storage. A host implements [`CellValueProvider`]
//! and [`SheetResolver`], and [`ReferenceResolver`] turns AST references into
//! values through them.

use crate::ast::{CellReference, RangeReference};
use crate::dependency::CellKey;
use crate::error::{EvalError, EvalResult};
use crate::value::Value;
use gridcalc_core::CellError;

/// What a host knows about one cell
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawCell {
    /// The literal value, or the last computed value of a formula cell
    pub value: Value,
    /// Formula text including the leading `=`, if the cell holds one
    pub formula: Option<String>,
}

impl RawCell {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            formula: None,
        }
    }

    pub fn formula(text: impl Into<String>, computed: Value) -> Self {
        Self {
            value: computed,
            formula: Some(text.into()),
        }
    }
}

/// Cell storage owned by the host
pub trait CellValueProvider: Send + Sync {
    /// Current contents of a cell; blank cells report [`Value::Empty`]
    fn cell_raw(&self, key: CellKey) -> RawCell;

    /// Store the computed value (possibly an error) of a formula cell
    fn set_cell_computed(&self, key: CellKey, value: &Value);
}

/// Sheet name lookup owned by the host
pub trait SheetResolver: Send + Sync {
    /// Sheet index for a name, matched case-insensitively by convention
    fn resolve_sheet(&self, name: &str) -> Option<usize>;
}

/// Resource limits applied while evaluating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalLimits {
    /// Deepest AST nesting evaluated before failing with `#CALC!`
    pub max_depth: usize,
    /// Largest range expanded into an array before failing with `#CALC!`
    pub max_range_cells: u64,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_depth: 256,
            max_range_cells: 1_000_000,
        }
    }
}

/// Resolves references relative to the sheet of the formula being evaluated
#[derive(Clone, Copy)]
pub struct ReferenceResolver<'a> {
    cells: &'a dyn CellValueProvider,
    sheets: &'a dyn SheetResolver,
    sheet: usize,
    max_range_cells: u64,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(
        cells: &'a dyn CellValueProvider,
        sheets: &'a dyn SheetResolver,
        sheet: usize,
        max_range_cells: u64,
    ) -> Self {
        Self {
            cells,
            sheets,
            sheet,
            max_range_cells,
        }
    }

    /// Sheet the formula lives on
    pub fn current_sheet(&self) -> usize {
        self.sheet
    }

    /// Index of a referenced sheet; an unqualified reference means the current one
    pub fn sheet_index(&self, sheet: Option<&str>) -> Option<usize> {
        match sheet {
            None => Some(self.sheet),
            Some(name) => self.sheets.resolve_sheet(name),
        }
    }

    /// Value of a single cell; an unknown sheet is `#REF!`
    pub fn resolve_cell(&self, reference: &CellReference) -> Value {
        match self.sheet_index(reference.sheet.as_deref()) {
            Some(sheet) => {
                let key = CellKey::from_address(sheet, &reference.address);
                self.cells.cell_raw(key).value
            }
            None => Value::Error(CellError::Ref),
        }
    }

    /// Values of a range as a row-major array, blanks included as [`Value::Empty`]
    pub fn resolve_range(&self, reference: &RangeReference) -> EvalResult<Value> {
        let Some(sheet) = self.sheet_index(reference.sheet.as_deref()) else {
            return Ok(Value::Error(CellError::Ref));
        };

        let range = reference.range;
        if range.cell_count() > self.max_range_cells {
            return Err(EvalError::exhausted(format!(
                "range {} has {} cells, limit is {}",
                range,
                range.cell_count(),
                self.max_range_cells
            )));
        }

        let rows = (range.start.row..=range.end.row)
            .map(|row| {
                (range.start.col..=range.end.col)
                    .map(|col| self.cells.cell_raw(CellKey::new(sheet, row, col)).value)
                    .collect()
            })
            .collect();
        Ok(Value::Array(rows))
    }
}

/// A provider with no cells and no named sheets
pub(crate) struct Detached;

impl CellValueProvider for Detached {
    fn cell_raw(&self, _key: CellKey) -> RawCell {
        RawCell::default()
    }

    fn set_cell_computed(&self, _key: CellKey, _value: &Value) {}
}

impl SheetResolver for Detached {
    fn resolve_sheet(&self, _name: &str) -> Option<usize> {
        None
    }
}
