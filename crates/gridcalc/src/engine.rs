//! Incremental recalculation engine
//!
//! The engine owns every [`FormulaRecord`] and the [`DependencyGraph`]; the
//! host owns cell storage. Edits mark the edited cell and its transitive
//! dependents dirty. A recalculation pass orders exactly that dirty set with
//! Kahn's algorithm and runs each cell as soon as its precedents are done, so
//! a cell suspended in an async function holds up only the cells reading it.
//!
//! # Example
//!
//! ```rust
//! use gridcalc::prelude::*;
//! use std::sync::Arc;
//!
//! let grid = Arc::new(InMemoryGrid::with_sheets(&["Sheet1"]).unwrap());
//! let mut engine = Engine::new(Arc::clone(&grid));
//!
//! grid.set_cell_value(0, "A1", 10.0).unwrap();
//! grid.set_cell_value(0, "A2", 20.0).unwrap();
//! let a3 = grid.set_cell_formula(0, "A3", "=SUM(A1:A2)").unwrap();
//! engine.set_formula(a3, "=SUM(A1:A2)");
//!
//! let stats = engine.recalculate(0, None, RecalcOptions::default()).unwrap();
//! assert_eq!(stats.cells_recalculated, 1);
//! assert_eq!(grid.get_value_at(a3), Value::Number(30.0));
//! ```

use crate::handle::{Edit, EngineHandle};
use crate::options::{CalculationOptions, RecalcOptions, RecalcStats};
use crate::record::{CellState, FormulaId, FormulaRecord, RecordArena};
use ahash::AHashMap;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::future::{self, Either, FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use gridcalc_core::{CellAddress, CellError, Error, Result};
use gridcalc_formula::{
    evaluate_async, extract_references, parse_formula_with_depth, CellKey, CellValueProvider,
    DependencyGraph, EvalContext, EvalError, EvalResult, FormulaExpr, FunctionInfo,
    FunctionRegistry, GraphSnapshot, Precedent, References, SheetResolver, Value,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

type EvalHook = Box<dyn Fn(CellKey) + Send + Sync>;

/// Outcome of one in-flight evaluation
///
/// Edits never land while a pass has work in flight: an arriving edit drops
/// every in-flight future before it is applied, so a result always belongs to
/// the record that dispatched it.
struct Evaluated {
    cell: CellKey,
    result: EvalResult<Value>,
}

enum PassOutcome {
    Complete,
    /// An edit arrived; in-flight work was dropped
    Interrupted(Edit),
}

/// Kahn's algorithm bookkeeping for one pass
struct Plan {
    /// Unfinished precedents inside the plan, per waiting cell
    pending: AHashMap<CellKey, usize>,
    successors: AHashMap<CellKey, Vec<CellKey>>,
    ready: BTreeSet<CellKey>,
}

impl Plan {
    fn build(graph: &DependencyGraph, dirty: &BTreeSet<CellKey>) -> Self {
        let mut plan = Plan {
            pending: AHashMap::with_capacity(dirty.len()),
            successors: AHashMap::new(),
            ready: BTreeSet::new(),
        };
        for &cell in dirty {
            let precedents = graph.precedents_within(cell, dirty);
            for p in &precedents {
                plan.successors.entry(*p).or_default().push(cell);
            }
            if precedents.is_empty() {
                plan.ready.insert(cell);
            } else {
                plan.pending.insert(cell, precedents.len());
            }
        }
        plan
    }

    /// `cell` is done; dependents with nothing left to wait for become ready
    fn release(&mut self, cell: CellKey) {
        let Some(successors) = self.successors.get(&cell) else {
            return;
        };
        for next in successors {
            if let Some(count) = self.pending.get_mut(next) {
                *count -= 1;
                if *count == 0 {
                    self.pending.remove(next);
                    self.ready.insert(*next);
                }
            }
        }
    }
}

/// The recalculation engine
pub struct Engine<H> {
    host: Arc<H>,
    registry: Arc<FunctionRegistry>,
    options: CalculationOptions,
    records: RecordArena,
    graph: DependencyGraph,
    dirty: BTreeSet<CellKey>,
    /// Registry version seen by the last pass
    registry_version: u64,
    edits_tx: UnboundedSender<Edit>,
    edits_rx: UnboundedReceiver<Edit>,
    eval_hook: Option<EvalHook>,
}

impl<H> Engine<H>
where
    H: CellValueProvider + SheetResolver + 'static,
{
    /// Create an engine with its own registry of built-in functions
    pub fn new(host: Arc<H>) -> Self {
        Self::with_registry(host, Arc::new(FunctionRegistry::new()))
    }

    /// Create an engine using a registry that may be shared with others
    pub fn with_registry(host: Arc<H>, registry: Arc<FunctionRegistry>) -> Self {
        Self::with_options(host, registry, CalculationOptions::default())
    }

    pub fn with_options(
        host: Arc<H>,
        registry: Arc<FunctionRegistry>,
        options: CalculationOptions,
    ) -> Self {
        let (edits_tx, edits_rx) = mpsc::unbounded();
        Self {
            registry_version: registry.version(),
            host,
            registry,
            options,
            records: RecordArena::new(),
            graph: DependencyGraph::new(),
            dirty: BTreeSet::new(),
            edits_tx,
            edits_rx,
            eval_hook: None,
        }
    }

    /// A sender for queuing edits from other threads
    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.edits_tx.clone())
    }

    // === Edits ===

    /// Give `cell` formula text; the host must already store the same text
    pub fn set_formula(&mut self, cell: CellKey, text: &str) {
        self.apply_edit(Edit::set_formula(cell, text));
    }

    /// The host changed a plain value at `cell`
    pub fn cell_changed(&mut self, cell: CellKey) {
        self.apply_edit(Edit::CellChanged(cell));
    }

    /// The host cleared `cell`
    pub fn clear_cell(&mut self, cell: CellKey) {
        self.apply_edit(Edit::ClearCell(cell));
    }

    /// The host deleted `sheet`; its name must no longer resolve
    pub fn remove_sheet(&mut self, sheet: usize) {
        self.apply_edit(Edit::RemoveSheet(sheet));
    }

    /// The host created a sheet called `name`; it must already resolve
    pub fn add_sheet(&mut self, name: &str) {
        self.apply_edit(Edit::AddSheet(name.to_string()));
    }

    /// Apply a batch of edits; they share the next recalculation pass
    pub fn apply(&mut self, edits: impl IntoIterator<Item = Edit>) {
        for edit in edits {
            self.apply_edit(edit);
        }
    }

    fn apply_edit(&mut self, edit: Edit) {
        tracing::trace!(?edit, "applying edit");
        match edit {
            Edit::SetFormula { cell, text } => self.install_formula(cell, text),
            Edit::CellChanged(cell) | Edit::ClearCell(cell) => {
                self.drop_record(cell);
                let dependents = self.graph.transitive_dependents([cell]);
                self.mark_dirty(dependents);
            }
            Edit::RemoveSheet(sheet) => self.drop_sheet(sheet),
            Edit::AddSheet(name) => self.link_sheet(&name),
        }
    }

    fn drain_edits(&mut self) {
        while let Ok(Some(edit)) = self.edits_rx.try_next() {
            self.apply_edit(edit);
        }
    }

    /// Replace the record at `cell`: parse, swap all outgoing edges, mark dirty
    fn install_formula(&mut self, cell: CellKey, text: String) {
        let parsed = parse_formula_with_depth(&text, self.options.max_parse_depth);
        let references = match &parsed {
            Ok(ast) => Some(self.extract(ast, cell)),
            Err(e) => {
                tracing::debug!(cell = %cell, error = %e, "formula text is invalid");
                None
            }
        };
        self.records.upsert(cell, text, parsed);

        let mut affected = self.graph.transitive_dependents([cell]);
        match references {
            Some(references) => {
                self.graph.replace_references(cell, references);
                affected.insert(cell);
            }
            None => {
                self.graph.remove_formula(cell);
                self.dirty.remove(&cell);
                self.host
                    .set_cell_computed(cell, &Value::Error(CellError::Invalid));
            }
        }
        self.mark_dirty(affected);
    }

    fn extract(&self, ast: &FormulaExpr, cell: CellKey) -> References {
        extract_references(ast, cell.sheet, |name| self.host.resolve_sheet(name))
    }

    /// Re-resolve a record's references against the current sheets
    fn rebuild_edges(&mut self, cell: CellKey) {
        let Some(ast) = self.records.get(cell).and_then(|r| r.ast().cloned()) else {
            return;
        };
        let references = self.extract(&ast, cell);
        self.graph.replace_references(cell, references);
    }

    fn drop_record(&mut self, cell: CellKey) {
        if self.records.remove(cell).is_some() {
            self.graph.remove_formula(cell);
            self.dirty.remove(&cell);
        }
    }

    fn drop_sheet(&mut self, sheet: usize) {
        let cells = self.records.cells_on_sheet(sheet);
        tracing::debug!(sheet, formulas = cells.len(), "removing sheet");
        for cell in cells {
            self.drop_record(cell);
        }

        // Readers on other sheets lose their edges into the sheet and will
        // evaluate those references to #REF!
        let readers = self.graph.formulas_reading_sheet(sheet);
        for &reader in &readers {
            self.rebuild_edges(reader);
        }
        let mut affected = self.graph.transitive_dependents(readers.iter().copied());
        affected.extend(readers);
        self.mark_dirty(affected);
    }

    /// Formulas that named `name` before it existed get their edges into the
    /// new sheet and are recomputed
    fn link_sheet(&mut self, name: &str) {
        let waiting = self.graph.formulas_awaiting_sheet(name);
        if waiting.is_empty() {
            return;
        }
        tracing::debug!(sheet = name, formulas = waiting.len(), "sheet added, relinking formulas");
        for &cell in &waiting {
            self.rebuild_edges(cell);
        }
        let mut affected = self.graph.transitive_dependents(waiting.iter().copied());
        affected.extend(waiting);
        self.mark_dirty(affected);
    }

    fn mark_dirty(&mut self, cells: impl IntoIterator<Item = CellKey>) {
        for cell in cells {
            if let Some(record) = self.records.get_mut(cell) {
                if record.is_valid() {
                    record.set_state(CellState::Dirty);
                    self.dirty.insert(cell);
                }
            }
        }
    }

    /// Re-dirty `#NAME?` cells once the registry has changed
    fn heal_unknown_names(&mut self) {
        let version = self.registry.version();
        if version == self.registry_version {
            return;
        }
        self.registry_version = version;

        let named: Vec<CellKey> = self
            .records
            .iter()
            .filter(|r| r.is_valid() && r.error_code() == Some(CellError::Name))
            .map(FormulaRecord::cell)
            .collect();
        if named.is_empty() {
            return;
        }
        tracing::debug!(cells = named.len(), version, "registry changed, retrying #NAME? cells");
        let mut affected = self.graph.transitive_dependents(named.iter().copied());
        affected.extend(named);
        self.mark_dirty(affected);
    }

    // === Recalculation ===

    /// Recalculate on the current thread
    ///
    /// Everything dirty is recomputed. `address` additionally marks that cell
    /// of `sheet` and its dependents dirty; `force` does so for every formula
    /// on `sheet` after re-resolving its references.
    pub fn recalculate(
        &mut self,
        sheet: usize,
        address: Option<CellAddress>,
        options: RecalcOptions,
    ) -> Result<RecalcStats> {
        futures::executor::block_on(self.recalculate_async(sheet, address, options))
    }

    /// Recalculate as a future; edits queued on an [`EngineHandle`] while it
    /// runs interrupt and replan the pass
    pub async fn recalculate_async(
        &mut self,
        sheet: usize,
        address: Option<CellAddress>,
        options: RecalcOptions,
    ) -> Result<RecalcStats> {
        let started = Instant::now();
        let mut stats = RecalcStats::default();
        self.drain_edits();

        if options.force {
            let cells = self.records.cells_on_sheet(sheet);
            for &cell in &cells {
                self.rebuild_edges(cell);
            }
            let mut affected = self.graph.transitive_dependents(cells.iter().copied());
            affected.extend(cells);
            self.mark_dirty(affected);
        }
        if let Some(address) = address {
            let cell = CellKey::from_address(sheet, &address);
            let mut affected = self.graph.transitive_dependents([cell]);
            affected.insert(cell);
            self.mark_dirty(affected);
        }

        loop {
            self.heal_unknown_names();
            match self.run_pass(&mut stats).await {
                PassOutcome::Complete => break,
                PassOutcome::Interrupted(edit) => {
                    stats.restarts += 1;
                    self.apply_edit(edit);
                    self.drain_edits();
                    if stats.restarts > self.options.max_restarts {
                        tracing::warn!(
                            restarts = stats.restarts,
                            dirty = self.dirty.len(),
                            "recalculation aborted"
                        );
                        return Err(Error::RecalcAborted {
                            restarts: stats.restarts,
                        });
                    }
                    tracing::debug!(restarts = stats.restarts, "edit arrived mid-pass, replanning");
                }
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            recalculated = stats.cells_recalculated,
            evaluated = stats.cells_evaluated,
            circular = stats.circular,
            restarts = stats.restarts,
            duration_ms = stats.duration_ms,
            "recalculation finished"
        );
        Ok(stats)
    }

    async fn run_pass(&mut self, stats: &mut RecalcStats) -> PassOutcome {
        if self.dirty.is_empty() {
            return PassOutcome::Complete;
        }
        tracing::debug!(dirty = self.dirty.len(), "recalculation pass");

        let mut plan = Plan::build(&self.graph, &self.dirty);
        let mut in_flight = FuturesUnordered::new();
        let mut evaluating = BTreeSet::new();

        loop {
            while let Some(cell) = plan.ready.pop_first() {
                if let Some(code) = self.short_circuit(cell) {
                    self.store(cell, Ok(Value::Error(code)), stats);
                    plan.release(cell);
                    continue;
                }
                match self.dispatch(cell, stats) {
                    Some(future) => {
                        evaluating.insert(cell);
                        in_flight.push(future);
                    }
                    None => plan.release(cell),
                }
            }

            if in_flight.is_empty() {
                if plan.pending.is_empty() {
                    return PassOutcome::Complete;
                }
                self.break_cycles(&mut plan, stats);
                continue;
            }

            let event = match future::select(in_flight.next(), self.edits_rx.next()).await {
                Either::Left((evaluated, _)) => Either::Left(evaluated),
                Either::Right((edit, _)) => Either::Right(edit),
            };
            match event {
                Either::Left(Some(evaluated)) => {
                    let cell = evaluated.cell;
                    evaluating.remove(&cell);
                    self.store(cell, evaluated.result, stats);
                    plan.release(cell);
                }
                Either::Right(Some(edit)) => {
                    stats.stale_dropped += evaluating.len();
                    for cell in evaluating {
                        if let Some(record) = self.records.get_mut(cell) {
                            record.set_state(CellState::Dirty);
                        }
                    }
                    return PassOutcome::Interrupted(edit);
                }
                // The engine keeps a sender, so the queue never closes; an
                // empty poll of a non-empty set does not happen either
                Either::Left(None) | Either::Right(None) => {}
            }
        }
    }

    /// Code of the first error among `cell`'s formula precedents, unless its
    /// formula calls a function that handles errors itself
    fn short_circuit(&self, cell: CellKey) -> Option<CellError> {
        let ast = self.records.get(cell)?.ast()?;
        let failed = |r: &FormulaRecord| {
            if r.state() == CellState::Error {
                r.error_code()
            } else {
                None
            }
        };

        let code = self.graph.precedents(cell).iter().find_map(|p| match p {
            Precedent::Cell(key) => self.records.get(*key).and_then(failed),
            Precedent::Range(range) => self
                .records
                .within(range.sheet, range.range)
                .into_iter()
                .find_map(failed),
        })?;

        let handles_errors = ast.any_function(&|name| {
            self.registry
                .resolve(name)
                .map_or(false, |spec| spec.options.handles_errors)
        });
        (!handles_errors).then_some(code)
    }

    fn dispatch(
        &mut self,
        cell: CellKey,
        stats: &mut RecalcStats,
    ) -> Option<LocalBoxFuture<'static, Evaluated>> {
        let record = self.records.get_mut(cell)?;
        let ast = Arc::clone(record.ast()?);
        record.set_state(CellState::Evaluating);
        tracing::trace!(cell = %cell, formula = record.text(), "evaluating");

        if let Some(hook) = &self.eval_hook {
            hook(cell);
        }
        stats.cells_evaluated += 1;

        let host = Arc::clone(&self.host);
        let registry = Arc::clone(&self.registry);
        let limits = self.options.eval_limits();
        Some(
            async move {
                let ctx = EvalContext::new(&*host, &*host, &registry, cell.sheet, limits)
                    .at(cell.address());
                let result = evaluate_async(&ast, &ctx).await;
                Evaluated { cell, result }
            }
            .boxed_local(),
        )
    }

    /// Write a result to the record and the host
    fn store(&mut self, cell: CellKey, result: EvalResult<Value>, stats: &mut RecalcStats) {
        let Some(record) = self.records.get_mut(cell) else {
            return;
        };

        if let Err(e) = &result {
            tracing::debug!(cell = %cell, error = %e, "evaluation failed");
        }
        let value = record.finish(result).clone();
        if record.state() == CellState::Error {
            stats.errors += 1;
        }
        stats.cells_recalculated += 1;
        self.dirty.remove(&cell);
        self.host.set_cell_computed(cell, &value);
    }

    /// Every cell still waiting sits on or behind a cycle; mark the cycles
    /// `#CIRCULAR!` and let the cells behind them proceed
    fn break_cycles(&mut self, plan: &mut Plan, stats: &mut RecalcStats) {
        let stuck: BTreeSet<CellKey> = plan.pending.keys().copied().collect();
        let mut members: Vec<CellKey> = self
            .graph
            .find_cycles(&stuck)
            .into_iter()
            .flatten()
            .collect();
        if members.is_empty() {
            members = stuck.into_iter().collect();
        }

        for &cell in &members {
            plan.pending.remove(&cell);
        }
        for cell in members {
            tracing::debug!(cell = %cell, "circular reference");
            self.store(
                cell,
                Err(EvalError::new(
                    CellError::Circular,
                    "cell is part of a circular reference",
                )),
                stats,
            );
            stats.circular += 1;
            plan.release(cell);
        }
    }

    // === Inspection ===

    pub fn record(&self, cell: CellKey) -> Option<&FormulaRecord> {
        self.records.get(cell)
    }

    pub fn record_by_id(&self, id: FormulaId) -> Option<&FormulaRecord> {
        self.records.by_id(id)
    }

    /// Current value of a cell: a formula's cached result, or the host's raw value
    pub fn value(&self, cell: CellKey) -> Value {
        match self.records.get(cell) {
            Some(record) => record.value().clone(),
            None => self.host.cell_raw(cell).value,
        }
    }

    /// State of a formula cell; `None` for plain cells
    pub fn state(&self, cell: CellKey) -> Option<CellState> {
        self.records.get(cell).map(FormulaRecord::state)
    }

    /// Number of formula records
    pub fn formula_count(&self) -> usize {
        self.records.len()
    }

    /// Number of cells waiting for the next pass
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn function_catalog(&self) -> Vec<FunctionInfo> {
        self.registry.catalog()
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.graph.snapshot()
    }

    pub fn options(&self) -> &CalculationOptions {
        &self.options
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Call `hook` once for each formula the evaluator actually runs
    pub fn set_eval_hook(&mut self, hook: impl Fn(CellKey) + Send + Sync + 'static) {
        self.eval_hook = Some(Box::new(hook));
    }

    pub fn clear_eval_hook(&mut self) {
        self.eval_hook = None;
    }
}
