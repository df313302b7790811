//! Formula records
//!
//! Every formula cell owns one [`FormulaRecord`], stored in an arena and
//! addressed by an opaque [`FormulaId`]. The dependency graph keys on cell
//! positions, so records never point at each other.

use gridcalc_formula::{CellError, CellKey, EvalError, EvalResult, FormulaError, FormulaExpr, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Opaque handle to a record slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormulaId(u32);

impl FormulaId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Where a formula cell is in the recalculation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellState {
    /// Cached value is current
    Clean,
    /// Waiting to be recomputed
    Dirty,
    /// Evaluation in flight
    Evaluating,
    /// Holds an error value, or the text did not parse
    Error,
}

/// A formula cell: text, parsed form and last result
#[derive(Debug, Clone)]
pub struct FormulaRecord {
    id: FormulaId,
    cell: CellKey,
    text: String,
    ast: Option<Arc<FormulaExpr>>,
    parse_error: Option<FormulaError>,
    value: Value,
    error: Option<EvalError>,
    state: CellState,
    generation: u64,
}

impl FormulaRecord {
    pub fn id(&self) -> FormulaId {
        self.id
    }

    pub fn cell(&self) -> CellKey {
        self.cell
    }

    /// Formula text as entered, including `=`
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parsed form; `None` when the text did not parse
    pub fn ast(&self) -> Option<&Arc<FormulaExpr>> {
        self.ast.as_ref()
    }

    pub fn parse_error(&self) -> Option<&FormulaError> {
        self.parse_error.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.ast.is_some()
    }

    /// Last computed value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The error behind an `Error` state
    pub fn error(&self) -> Option<&EvalError> {
        self.error.as_ref()
    }

    /// Error code of the last result, if it was an error
    pub fn error_code(&self) -> Option<CellError> {
        self.value.error()
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    /// Bumped on every edit to the cell
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_state(&mut self, state: CellState) {
        self.state = state;
    }

    /// Store an evaluation outcome; arrays collapse to their top-left element
    pub(crate) fn finish(&mut self, result: EvalResult<Value>) -> &Value {
        match result {
            Ok(value) => {
                let value = value.into_scalar();
                match value.error() {
                    Some(code) => {
                        self.error = Some(EvalError::from(code));
                        self.state = CellState::Error;
                    }
                    None => {
                        self.error = None;
                        self.state = CellState::Clean;
                    }
                }
                self.value = value;
            }
            Err(e) => {
                self.value = Value::Error(e.code);
                self.error = Some(e);
                self.state = CellState::Error;
            }
        }
        &self.value
    }
}

/// Arena of formula records, indexed by cell
#[derive(Debug, Default)]
pub(crate) struct RecordArena {
    slots: Vec<Option<FormulaRecord>>,
    free: Vec<FormulaId>,
    by_cell: BTreeMap<CellKey, FormulaId>,
    next_generation: u64,
}

impl RecordArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the record at `cell`
    ///
    /// An existing record keeps its id and last value but gets a fresh
    /// generation. A record whose text failed to parse starts in `Error`
    /// holding `#ERROR!`; any other starts `Dirty`.
    pub fn upsert(
        &mut self,
        cell: CellKey,
        text: String,
        parsed: Result<FormulaExpr, FormulaError>,
    ) -> &mut FormulaRecord {
        self.next_generation += 1;
        let generation = self.next_generation;

        let (ast, parse_error) = match parsed {
            Ok(ast) => (Some(Arc::new(ast)), None),
            Err(e) => (None, Some(e)),
        };

        let id = match self.by_cell.get(&cell) {
            Some(&id) => id,
            None => {
                let id = self.free.pop().unwrap_or_else(|| {
                    self.slots.push(None);
                    FormulaId((self.slots.len() - 1) as u32)
                });
                self.by_cell.insert(cell, id);
                id
            }
        };

        let previous = self.slots[id.index()].take().map(|r| r.value);
        let record = match &parse_error {
            Some(e) => FormulaRecord {
                id,
                cell,
                text,
                ast,
                parse_error: Some(e.clone()),
                value: Value::Error(CellError::Invalid),
                error: Some(EvalError::new(CellError::Invalid, e.to_string())),
                state: CellState::Error,
                generation,
            },
            None => FormulaRecord {
                id,
                cell,
                text,
                ast,
                parse_error: None,
                value: previous.unwrap_or_default(),
                error: None,
                state: CellState::Dirty,
                generation,
            },
        };
        self.slots[id.index()].insert(record)
    }

    /// Remove the record at `cell`, freeing its slot
    pub fn remove(&mut self, cell: CellKey) -> Option<FormulaRecord> {
        let id = self.by_cell.remove(&cell)?;
        let record = self.slots[id.index()].take();
        self.free.push(id);
        record
    }

    pub fn get(&self, cell: CellKey) -> Option<&FormulaRecord> {
        let id = self.by_cell.get(&cell)?;
        self.slots[id.index()].as_ref()
    }

    pub fn get_mut(&mut self, cell: CellKey) -> Option<&mut FormulaRecord> {
        let id = self.by_cell.get(&cell)?;
        self.slots[id.index()].as_mut()
    }

    pub fn by_id(&self, id: FormulaId) -> Option<&FormulaRecord> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn contains(&self, cell: CellKey) -> bool {
        self.by_cell.contains_key(&cell)
    }

    /// Records in cell order
    pub fn iter(&self) -> impl Iterator<Item = &FormulaRecord> + '_ {
        self.by_cell
            .values()
            .filter_map(|id| self.slots[id.index()].as_ref())
    }

    /// Cells holding a record on `sheet`, in cell order
    pub fn cells_on_sheet(&self, sheet: usize) -> Vec<CellKey> {
        let lo = CellKey::new(sheet, 0, 0);
        let hi = CellKey::new(sheet, u32::MAX, u16::MAX);
        self.by_cell.range(lo..=hi).map(|(k, _)| *k).collect()
    }

    /// Records inside a rectangle of one sheet, row-major
    pub fn within(
        &self,
        sheet: usize,
        range: gridcalc_formula::CellRange,
    ) -> Vec<&FormulaRecord> {
        let (start, end) = (range.start, range.end);
        let rows = range.row_count() as usize;
        let keys: Vec<CellKey> = if rows < self.by_cell.len() {
            (start.row..=end.row)
                .flat_map(|row| {
                    let lo = CellKey::new(sheet, row, start.col);
                    let hi = CellKey::new(sheet, row, end.col);
                    self.by_cell.range(lo..=hi).map(|(k, _)| *k)
                })
                .collect()
        } else {
            self.by_cell
                .keys()
                .filter(|k| k.sheet == sheet && range.contains(&k.address()))
                .copied()
                .collect()
        };
        keys.into_iter().filter_map(|k| self.get(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.by_cell.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_formula::{parse_formula, CellRange};
    use pretty_assertions::assert_eq;

    fn key(row: u32, col: u16) -> CellKey {
        CellKey::new(0, row, col)
    }

    #[test]
    fn test_upsert_reuses_id_and_bumps_generation() {
        let mut arena = RecordArena::new();
        let first = arena.upsert(key(0, 0), "=1".into(), parse_formula("=1"));
        let (id, gen) = (first.id(), first.generation());
        assert_eq!(first.state(), CellState::Dirty);

        let second = arena.upsert(key(0, 0), "=2".into(), parse_formula("=2"));
        assert_eq!(second.id(), id);
        assert!(second.generation() > gen);
        assert_eq!(second.text(), "=2");
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_invalid_text_is_stored_flagged() {
        let mut arena = RecordArena::new();
        let record = arena.upsert(key(0, 0), "=1+".into(), parse_formula("=1+"));
        assert!(!record.is_valid());
        assert_eq!(record.state(), CellState::Error);
        assert_eq!(record.value(), &Value::Error(CellError::Invalid));
        assert!(record.parse_error().is_some());
    }

    #[test]
    fn test_remove_frees_slot() {
        let mut arena = RecordArena::new();
        let id = arena.upsert(key(0, 0), "=1".into(), parse_formula("=1")).id();
        assert!(arena.remove(key(0, 0)).is_some());
        assert!(arena.by_id(id).is_none());
        let reused = arena.upsert(key(5, 5), "=1".into(), parse_formula("=1")).id();
        assert_eq!(reused, id);
        assert!(!arena.contains(key(0, 0)));
    }

    #[test]
    fn test_finish_collapses_arrays_and_tracks_errors() {
        let mut arena = RecordArena::new();
        let record = arena.upsert(key(0, 0), "=A1".into(), parse_formula("=A1"));
        record.finish(Ok(Value::Array(vec![vec![Value::Number(2.0), Value::Number(3.0)]])));
        assert_eq!(record.value(), &Value::Number(2.0));
        assert_eq!(record.state(), CellState::Clean);

        record.finish(Ok(Value::Error(CellError::Div0)));
        assert_eq!(record.state(), CellState::Error);
        assert_eq!(record.error_code(), Some(CellError::Div0));

        record.finish(Err(EvalError::value("boom").in_function("F")));
        assert_eq!(record.value(), &Value::Error(CellError::Value));
        assert_eq!(record.error().and_then(|e| e.function.as_deref()), Some("F"));
    }

    #[test]
    fn test_within_and_sheet_queries() {
        let mut arena = RecordArena::new();
        for (row, col) in [(0, 0), (1, 1), (2, 2), (9, 0)] {
            arena.upsert(key(row, col), "=1".into(), parse_formula("=1"));
        }
        arena.upsert(CellKey::new(1, 0, 0), "=1".into(), parse_formula("=1"));

        let inside: Vec<CellKey> = arena
            .within(0, CellRange::parse("A1:B2").unwrap())
            .iter()
            .map(|r| r.cell())
            .collect();
        assert_eq!(inside, vec![key(0, 0), key(1, 1)]);
        assert_eq!(arena.cells_on_sheet(1), vec![CellKey::new(1, 0, 0)]);
        assert_eq!(arena.iter().count(), 5);
    }
}
