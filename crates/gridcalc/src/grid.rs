//! A thread-safe in-memory host
//!
//! [`InMemoryGrid`] stores named sheets of raw values and formula text and
//! implements both host traits, so it can back an [`Engine`](crate::Engine)
//! directly. Sheet indices are never reused after a sheet is removed.

use ahash::AHashMap;
use gridcalc_core::{CellAddress, CellRange, Error, Result};
use gridcalc_formula::{CellKey, CellValueProvider, RawCell, SheetResolver, Value};
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct Sheet {
    name: String,
    cells: AHashMap<(u32, u16), RawCell>,
}

#[derive(Debug, Default)]
struct GridInner {
    sheets: AHashMap<usize, Sheet>,
    /// Lowercased name → index
    names: AHashMap<String, usize>,
    next_index: usize,
}

impl GridInner {
    fn sheet(&self, index: usize) -> Result<&Sheet> {
        self.sheets
            .get(&index)
            .ok_or_else(|| Error::SheetNotFound(format!("#{}", index)))
    }

    fn sheet_mut(&mut self, index: usize) -> Result<&mut Sheet> {
        self.sheets
            .get_mut(&index)
            .ok_or_else(|| Error::SheetNotFound(format!("#{}", index)))
    }
}

/// Named sheets of cells behind a read-write lock
#[derive(Debug, Default)]
pub struct InMemoryGrid {
    inner: RwLock<GridInner>,
}

impl InMemoryGrid {
    /// Create a grid with no sheets
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a grid with the given sheets, indexed from 0 in order
    pub fn with_sheets(names: &[&str]) -> Result<Self> {
        let grid = Self::new();
        for name in names {
            grid.add_sheet(name)?;
        }
        Ok(grid)
    }

    /// Add a sheet; names are unique ignoring case
    pub fn add_sheet(&self, name: &str) -> Result<usize> {
        let mut inner = self.inner.write();
        let lower = name.to_lowercase();
        if inner.names.contains_key(&lower) {
            return Err(Error::other(format!("Sheet '{}' already exists", name)));
        }
        let index = inner.next_index;
        inner.next_index += 1;
        inner.names.insert(lower, index);
        inner.sheets.insert(
            index,
            Sheet {
                name: name.to_string(),
                cells: AHashMap::new(),
            },
        );
        Ok(index)
    }

    /// Delete a sheet and its cells, returning its index
    pub fn remove_sheet(&self, name: &str) -> Result<usize> {
        let mut inner = self.inner.write();
        let index = inner
            .names
            .remove(&name.to_lowercase())
            .ok_or_else(|| Error::SheetNotFound(name.to_string()))?;
        inner.sheets.remove(&index);
        Ok(index)
    }

    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        self.inner.read().names.get(&name.to_lowercase()).copied()
    }

    pub fn sheet_name(&self, index: usize) -> Option<String> {
        self.inner.read().sheets.get(&index).map(|s| s.name.clone())
    }

    pub fn sheet_count(&self) -> usize {
        self.inner.read().sheets.len()
    }

    /// Set a plain value by A1 address
    pub fn set_cell_value<V: Into<Value>>(&self, sheet: usize, address: &str, value: V) -> Result<CellKey> {
        let key = CellKey::from_address(sheet, &CellAddress::parse(address)?);
        self.set_value_at(key, value)?;
        Ok(key)
    }

    /// Set formula text by A1 address; the computed value starts blank
    pub fn set_cell_formula(&self, sheet: usize, address: &str, formula: &str) -> Result<CellKey> {
        let key = CellKey::from_address(sheet, &CellAddress::parse(address)?);
        self.set_formula_at(key, formula)?;
        Ok(key)
    }

    pub fn set_value_at<V: Into<Value>>(&self, key: CellKey, value: V) -> Result<()> {
        let mut inner = self.inner.write();
        let sheet = inner.sheet_mut(key.sheet)?;
        match value.into() {
            Value::Empty => {
                sheet.cells.remove(&(key.row, key.col));
            }
            value => {
                sheet.cells.insert((key.row, key.col), RawCell::value(value));
            }
        }
        Ok(())
    }

    pub fn set_formula_at(&self, key: CellKey, formula: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let sheet = inner.sheet_mut(key.sheet)?;
        sheet
            .cells
            .insert((key.row, key.col), RawCell::formula(formula, Value::Empty));
        Ok(())
    }

    pub fn clear_cell_at(&self, key: CellKey) -> Result<()> {
        let mut inner = self.inner.write();
        inner.sheet_mut(key.sheet)?.cells.remove(&(key.row, key.col));
        Ok(())
    }

    /// Displayed value: the literal, or a formula's last computed value
    pub fn get_value_at(&self, key: CellKey) -> Value {
        self.cell_raw(key).value
    }

    /// Displayed value by A1 address
    pub fn get_value(&self, sheet: usize, address: &str) -> Result<Value> {
        let key = CellKey::from_address(sheet, &CellAddress::parse(address)?);
        Ok(self.get_value_at(key))
    }

    pub fn formula_at(&self, key: CellKey) -> Option<String> {
        self.cell_raw(key).formula
    }

    /// Every non-blank cell of a sheet, row-major
    pub fn cells(&self, sheet: usize) -> Result<Vec<(CellKey, RawCell)>> {
        let inner = self.inner.read();
        let mut cells: Vec<(CellKey, RawCell)> = inner
            .sheet(sheet)?
            .cells
            .iter()
            .map(|(&(row, col), raw)| (CellKey::new(sheet, row, col), raw.clone()))
            .collect();
        cells.sort_by_key(|(key, _)| *key);
        Ok(cells)
    }

    /// Smallest range covering every non-blank cell, anchored at A1
    pub fn used_range(&self, sheet: usize) -> Option<CellRange> {
        let inner = self.inner.read();
        let cells = &inner.sheets.get(&sheet)?.cells;
        let max_row = cells.keys().map(|(row, _)| *row).max()?;
        let max_col = cells.keys().map(|(_, col)| *col).max()?;
        Some(CellRange::from_indices(0, 0, max_row, max_col))
    }
}

impl CellValueProvider for InMemoryGrid {
    fn cell_raw(&self, key: CellKey) -> RawCell {
        let inner = self.inner.read();
        inner
            .sheets
            .get(&key.sheet)
            .and_then(|s| s.cells.get(&(key.row, key.col)))
            .cloned()
            .unwrap_or_default()
    }

    fn set_cell_computed(&self, key: CellKey, value: &Value) {
        let mut inner = self.inner.write();
        let cell = inner
            .sheets
            .get_mut(&key.sheet)
            .and_then(|s| s.cells.get_mut(&(key.row, key.col)));
        match cell {
            Some(cell) if cell.formula.is_some() => cell.value = value.clone(),
            _ => tracing::trace!(cell = %key, "computed value for a cell without a formula ignored"),
        }
    }
}

impl SheetResolver for InMemoryGrid {
    fn resolve_sheet(&self, name: &str) -> Option<usize> {
        self.sheet_index(name)
    }
}
