//! Calculation settings and per-pass statistics

use gridcalc_formula::{EvalLimits, DEFAULT_MAX_PARSE_DEPTH};

/// Options for the recalculation engine
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct CalculationOptions {
    /// Deepest expression nesting evaluated before `#CALC!` (default: 256)
    pub max_depth: usize,
    /// Largest range expanded into an array before `#CALC!` (default: 1,000,000)
    pub max_range_cells: u64,
    /// Replans allowed when edits arrive mid-pass (default: 16)
    pub max_restarts: u32,
    /// Deepest nesting the parser accepts (default: 256)
    pub max_parse_depth: usize,
}

impl Default for CalculationOptions {
    fn default() -> Self {
        let limits = EvalLimits::default();
        Self {
            max_depth: limits.max_depth,
            max_range_cells: limits.max_range_cells,
            max_restarts: 16,
            max_parse_depth: DEFAULT_MAX_PARSE_DEPTH,
        }
    }
}

impl CalculationOptions {
    /// The evaluator guards these options translate to
    pub fn eval_limits(&self) -> EvalLimits {
        EvalLimits {
            max_depth: self.max_depth,
            max_range_cells: self.max_range_cells,
        }
    }
}

/// Options for a single `recalculate` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalcOptions {
    /// Rebuild and re-evaluate every formula on the sheet, clean or not
    pub force: bool,
}

impl RecalcOptions {
    pub fn force() -> Self {
        Self { force: true }
    }
}

/// Statistics from a recalculation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecalcStats {
    /// Wall-clock time of the whole call
    pub duration_ms: u64,
    /// Cells whose value was recomputed, including short-circuited and circular ones
    pub cells_recalculated: usize,
    /// Cells whose formula actually ran through the evaluator
    pub cells_evaluated: usize,
    /// Cells marked `#CIRCULAR!`
    pub circular: usize,
    /// Cells that ended the pass holding an error
    pub errors: usize,
    /// In-flight results discarded because their cell changed
    pub stale_dropped: usize,
    /// Times the pass was replanned after an edit arrived
    pub restarts: u32,
}
