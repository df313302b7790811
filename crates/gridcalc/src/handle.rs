//! Queued edits
//!
//! The engine is the single owner of the dependency graph. Other threads
//! describe changes as [`Edit`]s and send them through an [`EngineHandle`];
//! the engine applies them one at a time, before a pass and while one is in
//! flight.

use futures::channel::mpsc::UnboundedSender;
use gridcalc_core::{Error, Result};
use gridcalc_formula::CellKey;

/// A change to the grid the engine must account for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// A cell was given formula text (including `=`)
    SetFormula { cell: CellKey, text: String },
    /// The host changed a plain value; a formula previously there is dropped
    CellChanged(CellKey),
    /// The host cleared a cell
    ClearCell(CellKey),
    /// The host deleted a sheet
    RemoveSheet(usize),
    /// The host created a sheet with this name
    AddSheet(String),
}

impl Edit {
    pub fn set_formula(cell: CellKey, text: impl Into<String>) -> Self {
        Edit::SetFormula {
            cell,
            text: text.into(),
        }
    }
}

/// Cloneable sender of edits to an engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: UnboundedSender<Edit>,
}

impl EngineHandle {
    pub(crate) fn new(tx: UnboundedSender<Edit>) -> Self {
        Self { tx }
    }

    /// Queue an edit; fails only once the engine has been dropped
    pub fn send(&self, edit: Edit) -> Result<()> {
        self.tx
            .unbounded_send(edit)
            .map_err(|_| Error::other("engine has been dropped"))
    }

    pub fn set_formula(&self, cell: CellKey, text: impl Into<String>) -> Result<()> {
        self.send(Edit::set_formula(cell, text))
    }

    pub fn cell_changed(&self, cell: CellKey) -> Result<()> {
        self.send(Edit::CellChanged(cell))
    }

    pub fn clear_cell(&self, cell: CellKey) -> Result<()> {
        self.send(Edit::ClearCell(cell))
    }

    pub fn remove_sheet(&self, sheet: usize) -> Result<()> {
        self.send(Edit::RemoveSheet(sheet))
    }

    pub fn add_sheet(&self, name: impl Into<String>) -> Result<()> {
        self.send(Edit::AddSheet(name.into()))
    }
}
