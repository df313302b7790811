//! End-to-end recalculation behavior against the in-memory host

use futures::channel::oneshot;
use futures::FutureExt;
use gridcalc::prelude::*;
use gridcalc::{parse_formula, FormulaExpr};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Workbook {
    grid: Arc<InMemoryGrid>,
    engine: Engine<InMemoryGrid>,
}

impl Workbook {
    fn new() -> Self {
        Self::with_options(CalculationOptions::default())
    }

    fn with_options(options: CalculationOptions) -> Self {
        let grid = Arc::new(InMemoryGrid::with_sheets(&["Sheet1", "Sheet2"]).unwrap());
        let engine = Engine::with_options(
            Arc::clone(&grid),
            Arc::new(FunctionRegistry::new()),
            options,
        );
        Self { grid, engine }
    }

    fn key(&self, a1: &str) -> CellKey {
        CellKey::from_address(0, &CellAddress::parse(a1).unwrap())
    }

    fn set(&mut self, a1: &str, value: impl Into<Value>) -> CellKey {
        let key = self.grid.set_cell_value(0, a1, value).unwrap();
        self.engine.cell_changed(key);
        key
    }

    fn formula(&mut self, a1: &str, text: &str) -> CellKey {
        let key = self.grid.set_cell_formula(0, a1, text).unwrap();
        self.engine.set_formula(key, text);
        key
    }

    fn recalc(&mut self) -> RecalcStats {
        self.engine
            .recalculate(0, None, RecalcOptions::default())
            .unwrap()
    }

    fn get(&self, a1: &str) -> Value {
        self.engine.value(self.key(a1))
    }

    /// Record every real evaluation from now on
    fn watch(&mut self) -> Arc<Mutex<Vec<CellKey>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        self.engine.set_eval_hook(move |cell| sink.lock().push(cell));
        log
    }
}

fn sorted(log: &Mutex<Vec<CellKey>>) -> Vec<CellKey> {
    let mut cells = log.lock().clone();
    cells.sort();
    cells
}

#[test]
fn sum_scenario_recalculates_only_the_dependent() {
    let mut wb = Workbook::new();
    wb.set("A1", 10.0);
    wb.set("A2", 20.0);
    wb.formula("A3", "=SUM(A1:A2)");
    wb.recalc();
    assert_eq!(wb.get("A3"), Value::Number(30.0));

    let log = wb.watch();
    wb.set("A1", 15.0);
    let stats = wb.recalc();
    assert_eq!(stats.cells_recalculated, 1);
    assert_eq!(sorted(&log), vec![wb.key("A3")]);
    assert_eq!(wb.get("A3"), Value::Number(35.0));
}

#[test]
fn evaluation_is_deterministic_and_idempotent() {
    let mut wb = Workbook::new();
    wb.set("A1", 3.0);
    wb.set("A2", "4");
    wb.formula("B1", "=A1*A2+1");
    wb.formula("B2", "=B1&\" items\"");
    wb.formula("B3", "=IF(B1>10, UPPER(B2), \"few\")");
    wb.recalc();
    let first: Vec<Value> = ["B1", "B2", "B3"].iter().map(|a| wb.get(a)).collect();

    let log = wb.watch();
    let stats = wb.recalc();
    assert_eq!(stats.cells_recalculated, 0);
    assert_eq!(stats.cells_evaluated, 0);
    assert!(log.lock().is_empty());

    let forced = wb
        .engine
        .recalculate(0, None, RecalcOptions::force())
        .unwrap();
    assert_eq!(forced.cells_evaluated, 3);
    let second: Vec<Value> = ["B1", "B2", "B3"].iter().map(|a| wb.get(a)).collect();
    assert_eq!(first, second);
    assert_eq!(second[2], Value::from("13 ITEMS"));
}

#[test]
fn cycle_is_flagged_then_healed_by_an_edit() {
    let mut wb = Workbook::new();
    let a1 = wb.formula("A1", "=B1");
    let b1 = wb.formula("B1", "=A1");
    let stats = wb.recalc();
    assert_eq!(stats.circular, 2);
    assert_eq!(wb.get("A1"), Value::Error(CellError::Circular));
    assert_eq!(wb.get("B1"), Value::Error(CellError::Circular));
    assert_eq!(wb.engine.state(a1), Some(CellState::Error));

    wb.formula("B1", "=5");
    let stats = wb.recalc();
    assert_eq!(stats.circular, 0);
    assert_eq!(wb.get("A1"), Value::Number(5.0));
    assert_eq!(wb.get("B1"), Value::Number(5.0));
    assert_eq!(wb.engine.state(a1), Some(CellState::Clean));
    assert_eq!(wb.engine.state(b1), Some(CellState::Clean));
}

#[test]
fn cells_behind_a_cycle_see_circular() {
    let mut wb = Workbook::new();
    wb.formula("A1", "=B1+1");
    wb.formula("B1", "=C1+1");
    wb.formula("C1", "=A1+1");
    wb.formula("D1", "=C1*2");
    wb.formula("E1", "=ISERROR(D1)");
    let stats = wb.recalc();
    assert_eq!(stats.circular, 3);
    assert_eq!(wb.get("D1"), Value::Error(CellError::Circular));
    assert_eq!(wb.get("E1"), Value::Boolean(true));
}

#[test]
fn edit_touches_only_reachable_cells() {
    let mut wb = Workbook::new();
    wb.set("A1", 1.0);
    wb.set("A2", 1.0);
    let x = wb.formula("X1", "=A1+1");
    let y = wb.formula("Y1", "=A1*2");
    let z = wb.formula("Z1", "=A2+1");
    wb.recalc();

    let log = wb.watch();
    wb.set("A1", 7.0);
    let stats = wb.recalc();
    assert_eq!(stats.cells_evaluated, 2);
    assert_eq!(sorted(&log), vec![x, y]);
    assert!(!log.lock().contains(&z));
    assert_eq!(wb.get("Y1"), Value::Number(14.0));
}

#[test]
fn errors_propagate_downstream() {
    let mut wb = Workbook::new();
    wb.set("A1", 1.0);
    let c1 = wb.formula("C1", "=A1/0");
    wb.formula("D1", "=C1+1");
    wb.formula("E1", "=IFERROR(D1, -1)");

    let log = wb.watch();
    let stats = wb.recalc();
    assert_eq!(wb.get("C1"), Value::Error(CellError::Div0));
    assert_eq!(wb.get("D1"), Value::Error(CellError::Div0));
    assert_eq!(wb.get("E1"), Value::Number(-1.0));
    assert_eq!(stats.errors, 2);
    // D1 takes C1's error without running
    assert!(log.lock().contains(&c1));
    assert!(!log.lock().contains(&wb.key("D1")));
}

#[test]
fn late_registration_heals_name_errors() {
    let mut wb = Workbook::new();
    wb.set("A1", 21.0);
    let b1 = wb.formula("B1", "=DOUBLE(A1)");
    wb.formula("C1", "=B1+1");
    wb.recalc();
    assert_eq!(wb.get("B1"), Value::Error(CellError::Name));
    assert_eq!(wb.get("C1"), Value::Error(CellError::Name));
    assert_eq!(
        wb.engine.record(b1).unwrap().error().unwrap().function.as_deref(),
        Some("DOUBLE")
    );

    wb.engine.registry().register_fn(
        "DOUBLE",
        FunctionOptions::fixed(1).describe("Twice the argument"),
        |args| Ok(Value::Number(args[0].to_number()? * 2.0)),
    );
    wb.engine
        .recalculate(0, None, RecalcOptions::force())
        .unwrap();
    assert_eq!(wb.get("B1"), Value::Number(42.0));
    assert_eq!(wb.get("C1"), Value::Number(43.0));
    assert!(wb.engine.function_catalog().iter().any(|f| f.name == "DOUBLE"));
}

#[test]
fn late_registration_heals_without_force() {
    let mut wb = Workbook::new();
    wb.formula("A1", "=triple(2)");
    wb.recalc();
    assert_eq!(wb.get("A1"), Value::Error(CellError::Name));

    wb.engine.registry().register_fn("TRIPLE", FunctionOptions::fixed(1), |args| {
        Ok(Value::Number(args[0].to_number()? * 3.0))
    });
    let stats = wb.recalc();
    assert_eq!(stats.cells_evaluated, 1);
    assert_eq!(wb.get("A1"), Value::Number(6.0));
}

#[test]
fn async_function_suspends_only_its_dependents() {
    let mut wb = Workbook::new();
    let (tx, rx) = oneshot::channel::<f64>();
    let tx = Mutex::new(Some(tx));
    let rx = Mutex::new(Some(rx));
    let order = Arc::new(Mutex::new(Vec::new()));

    let resumed = Arc::clone(&order);
    wb.engine.registry().register(
        "LATER",
        FunctionImpl::from_async(move |_args: Vec<Value>| {
            let rx = rx.lock().take();
            let resumed = Arc::clone(&resumed);
            async move {
                let rx = rx.ok_or_else(|| EvalError::value("already awaited"))?;
                let value = rx.await.map_err(|_| EvalError::value("sender dropped"))?;
                resumed.lock().push("resumed");
                Ok::<_, EvalError>(Value::Number(value))
            }
            .boxed()
        }),
        FunctionOptions::fixed(0),
    );
    let released = Arc::clone(&order);
    wb.engine
        .registry()
        .register_fn("RELEASE", FunctionOptions::fixed(0), move |_| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(42.0);
            }
            released.lock().push("released");
            Ok(Value::Boolean(true))
        });

    wb.formula("A1", "=LATER()");
    wb.formula("B1", "=RELEASE()");
    wb.formula("C1", "=A1+1");
    let stats = wb.recalc();

    assert_eq!(stats.cells_evaluated, 3);
    assert_eq!(*order.lock(), vec!["released", "resumed"]);
    assert_eq!(wb.get("A1"), Value::Number(42.0));
    assert_eq!(wb.get("C1"), Value::Number(43.0));
    assert!(wb.engine.registry().resolve("later").unwrap().is_async());
}

/// Registers `WAIT(x)`: the first call blocks until its gate is released and
/// signals `entered`; later calls return `x` at once
fn register_wait(wb: &Workbook) -> (std::sync::mpsc::Receiver<()>, oneshot::Sender<()>) {
    let (entered_tx, entered_rx) = std::sync::mpsc::channel();
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    let entered = Mutex::new(entered_tx);
    let gate = Mutex::new(Some(gate_rx));

    wb.engine.registry().register(
        "WAIT",
        FunctionImpl::from_async(move |args: Vec<Value>| {
            let gate = gate.lock().take();
            let _ = entered.lock().send(());
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Ok::<_, EvalError>(args.into_iter().next().unwrap_or_default())
            }
            .boxed()
        }),
        FunctionOptions::fixed(1),
    );
    (entered_rx, gate_tx)
}

#[test]
fn edit_arriving_mid_pass_replans() {
    let mut wb = Workbook::new();
    let (entered, _gate) = register_wait(&wb);
    wb.set("A1", 1.0);
    wb.formula("B1", "=WAIT(A1)");
    wb.formula("C1", "=A1*10");

    let handle = wb.engine.handle();
    let grid = Arc::clone(&wb.grid);
    let editor = std::thread::spawn(move || {
        entered.recv().unwrap();
        let a1 = grid.set_cell_value(0, "A1", 2.0).unwrap();
        handle.cell_changed(a1).unwrap();
    });

    let stats = wb.recalc();
    editor.join().unwrap();

    assert_eq!(stats.restarts, 1);
    assert!(stats.stale_dropped >= 1);
    assert_eq!(wb.get("B1"), Value::Number(2.0));
    assert_eq!(wb.get("C1"), Value::Number(20.0));
}

#[test]
fn too_many_restarts_abort_the_pass() {
    let mut wb = Workbook::with_options(CalculationOptions {
        max_restarts: 0,
        ..Default::default()
    });
    let (entered, _gate) = register_wait(&wb);
    let b1 = wb.formula("B1", "=WAIT(7)");

    let handle = wb.engine.handle();
    let editor = std::thread::spawn(move || {
        entered.recv().unwrap();
        handle.cell_changed(CellKey::new(0, 9, 9)).unwrap();
    });

    let result = wb.engine.recalculate(0, None, RecalcOptions::default());
    editor.join().unwrap();
    assert!(matches!(result, Err(Error::RecalcAborted { restarts: 1 })));
    assert_eq!(wb.engine.state(b1), Some(CellState::Dirty));

    // The gate is spent, so the retry completes
    wb.recalc();
    assert_eq!(wb.get("B1"), Value::Number(7.0));
}

#[test]
fn panicking_function_fails_only_its_cell() {
    let mut wb = Workbook::new();
    wb.engine
        .registry()
        .register_fn("BOOM", FunctionOptions::fixed(0), |_| panic!("kaboom"));
    let a1 = wb.formula("A1", "=BOOM()");
    wb.formula("B1", "=1+1");
    wb.formula("C1", "=A1+1");
    let stats = wb.recalc();

    assert_eq!(stats.cells_recalculated, 3);
    assert_eq!(wb.get("A1"), Value::Error(CellError::Value));
    assert_eq!(wb.get("B1"), Value::Number(2.0));
    assert_eq!(wb.get("C1"), Value::Error(CellError::Value));
    let error = wb.engine.record(a1).unwrap().error().unwrap().clone();
    assert_eq!(error.function.as_deref(), Some("BOOM"));
    assert!(error.message.contains("kaboom"));
}

#[test]
fn batched_edits_share_one_pass() {
    let mut wb = Workbook::new();
    let a1 = wb.set("A1", 1.0);
    let a2 = wb.set("A2", 2.0);
    let b1 = wb.formula("B1", "=A1+A2");
    wb.recalc();

    let log = wb.watch();
    wb.grid.set_value_at(a1, 10.0).unwrap();
    wb.grid.set_value_at(a2, 20.0).unwrap();
    wb.engine.apply([Edit::CellChanged(a1), Edit::CellChanged(a2)]);
    wb.recalc();
    assert_eq!(*log.lock(), vec![b1]);
    assert_eq!(wb.get("B1"), Value::Number(30.0));
}

#[test]
fn queued_edits_are_applied_before_the_pass() {
    let mut wb = Workbook::new();
    let handle = wb.engine.handle();
    let grid = Arc::clone(&wb.grid);
    std::thread::spawn(move || {
        let a1 = grid.set_cell_value(0, "A1", 4.0).unwrap();
        let b1 = grid.set_cell_formula(0, "B1", "=A1^2").unwrap();
        handle.send(Edit::CellChanged(a1)).unwrap();
        handle.set_formula(b1, "=A1^2").unwrap();
    })
    .join()
    .unwrap();

    wb.recalc();
    assert_eq!(wb.get("B1"), Value::Number(16.0));
}

#[test]
fn clearing_a_cell_drops_its_record_but_keeps_readers() {
    let mut wb = Workbook::new();
    let a1 = wb.formula("A1", "=1+1");
    wb.formula("B1", "=A1*3");
    wb.recalc();
    assert_eq!(wb.get("B1"), Value::Number(6.0));

    wb.grid.clear_cell_at(a1).unwrap();
    wb.engine.clear_cell(a1);
    wb.recalc();
    assert!(wb.engine.record(a1).is_none());
    assert_eq!(wb.get("B1"), Value::Number(0.0));

    wb.set("A1", 5.0);
    wb.recalc();
    assert_eq!(wb.get("B1"), Value::Number(15.0));
}

#[test]
fn cross_sheet_references_and_removed_sheets() {
    let mut wb = Workbook::new();
    let data = wb.grid.set_cell_value(1, "B1", 5.0).unwrap();
    let total = wb.grid.set_cell_formula(1, "B2", "=B1*2").unwrap();
    wb.engine.cell_changed(data);
    wb.engine.set_formula(total, "=B1*2");
    wb.formula("A1", "=Sheet2!B2+1");
    wb.formula("A2", "=SUM('Sheet2'!B1:B2)");
    wb.formula("A3", "=Nowhere!A1");
    wb.recalc();
    assert_eq!(wb.get("A1"), Value::Number(11.0));
    assert_eq!(wb.get("A2"), Value::Number(15.0));
    assert_eq!(wb.get("A3"), Value::Error(CellError::Ref));

    let removed = wb.grid.remove_sheet("Sheet2").unwrap();
    wb.engine.remove_sheet(removed);
    let stats = wb.recalc();
    assert_eq!(stats.cells_recalculated, 2);
    assert_eq!(wb.engine.formula_count(), 3);
    assert_eq!(wb.get("A1"), Value::Error(CellError::Ref));
    assert_eq!(wb.get("A2"), Value::Error(CellError::Ref));
}

#[test]
fn force_picks_up_sheets_added_later() {
    let mut wb = Workbook::new();
    wb.formula("A1", "=Later!A1+1");
    wb.recalc();
    assert_eq!(wb.get("A1"), Value::Error(CellError::Ref));

    let later = wb.grid.add_sheet("Later").unwrap();
    wb.grid.set_cell_value(later, "A1", 1.0).unwrap();
    wb.engine
        .recalculate(0, None, RecalcOptions::force())
        .unwrap();
    assert_eq!(wb.get("A1"), Value::Number(2.0));

    // The rebuilt edge now tracks the new sheet
    let a1 = wb.grid.set_cell_value(later, "A1", 9.0).unwrap();
    wb.engine.cell_changed(a1);
    wb.recalc();
    assert_eq!(wb.get("A1"), Value::Number(10.0));
}

#[test]
fn adding_a_sheet_relinks_formulas_that_named_it() {
    let mut wb = Workbook::new();
    wb.formula("B1", "=Later!A1+1");
    wb.formula("B2", "=SUM(later!A1:A2)");
    wb.formula("B3", "=B1*2");
    wb.formula("B4", "=Elsewhere!A1+0");
    wb.recalc();
    assert_eq!(wb.get("B1"), Value::Error(CellError::Ref));
    assert_eq!(wb.get("B3"), Value::Error(CellError::Ref));

    let later = wb.grid.add_sheet("Later").unwrap();
    wb.engine.add_sheet("Later");
    let log = wb.watch();
    wb.recalc();
    assert_eq!(sorted(&log), vec![wb.key("B1"), wb.key("B2"), wb.key("B3")]);
    assert_eq!(wb.get("B1"), Value::Number(1.0));
    assert_eq!(wb.get("B2"), Value::Number(0.0));
    assert_eq!(wb.get("B3"), Value::Number(2.0));
    assert_eq!(wb.get("B4"), Value::Error(CellError::Ref));

    // Edits on the new sheet now reach its readers
    let a1 = wb.grid.set_cell_value(later, "A1", 5.0).unwrap();
    wb.engine.cell_changed(a1);
    wb.recalc();
    assert_eq!(wb.get("B1"), Value::Number(6.0));
    assert_eq!(wb.get("B2"), Value::Number(5.0));
    assert_eq!(wb.get("B3"), Value::Number(12.0));

    // A queued add behaves the same
    wb.grid.add_sheet("Elsewhere").unwrap();
    wb.engine.handle().add_sheet("ELSEWHERE").unwrap();
    wb.recalc();
    assert_eq!(wb.get("B4"), Value::Number(0.0));
}

#[test]
fn long_flat_sums_are_not_deep_nesting() {
    let mut wb = Workbook::new();
    let terms: Vec<String> = (1..=300).map(|row| format!("A{}", row)).collect();
    for term in &terms {
        wb.set(term, 1.0);
    }
    wb.formula("B1", &format!("={}", terms.join("+")));
    wb.formula("B2", &format!("={}", terms.join("*")));
    wb.recalc();
    assert_eq!(wb.get("B1"), Value::Number(300.0));
    assert_eq!(wb.get("B2"), Value::Number(1.0));

    wb.set("A150", 2.0);
    wb.recalc();
    assert_eq!(wb.get("B1"), Value::Number(301.0));
    assert_eq!(wb.get("B2"), Value::Number(2.0));
}

#[test]
fn resource_guards_report_calc() {
    let mut wb = Workbook::with_options(CalculationOptions {
        max_range_cells: 10,
        ..Default::default()
    });
    wb.formula("A1", "=SUM(B1:B100)");
    let deep = format!("={}1{}", "(".repeat(300), ")".repeat(300));
    let c1 = wb.formula("C1", &deep);
    wb.recalc();
    assert_eq!(wb.get("A1"), Value::Error(CellError::Calc));
    // Too deep to parse at all
    assert_eq!(wb.get("C1"), Value::Error(CellError::Invalid));
    assert!(wb.engine.record(c1).unwrap().parse_error().is_some());
}

#[test]
fn printed_formulas_parse_back_to_the_same_tree() {
    let formulas = [
        "=1+2*3",
        "=(1+2)*3",
        "=-A1^2",
        "=2^3^2",
        "=(2^3)^2",
        "=A1&\"say \"\"hi\"\"\"",
        "=SUM($A$1:B10, 'My Sheet'!C3)/COUNT(A1:A3)",
        "=IF(A1>=10%, TRUE, #N/A)",
        "=1-(2-3)",
        "=Sheet2!A1:B2",
    ];
    for text in formulas {
        let ast: FormulaExpr = parse_formula(text).unwrap();
        let printed = ast.to_formula();
        assert_eq!(parse_formula(&printed).unwrap(), ast, "{text} printed as {printed}");
    }
}

mod incremental {
    use super::*;
    use proptest::prelude::*;

    fn column(col: usize) -> String {
        CellAddress::column_to_letters(col as u16)
    }

    /// Formula for column `col`, reading only columns to its left
    fn template(col: usize, kind: usize, a: usize, b: usize) -> String {
        let x = format!("{}1", column(a % col));
        let y = format!("{}1", column(b % col));
        match kind {
            0 => format!("={}+{}", x, y),
            1 => format!("={}*2-{}", x, y),
            2 => format!("=SUM(A1:{})", x),
            _ => format!("=IF({}>{}, {}, 1)", x, y, y),
        }
    }

    fn values(engine: &Engine<InMemoryGrid>, width: usize) -> Vec<Value> {
        (0..width)
            .map(|col| engine.value(CellKey::new(0, 0, col as u16)))
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn incremental_matches_fresh_calculation(
            initial in prop::collection::vec(-5i32..5, 3),
            formulas in prop::collection::vec((0usize..4, 0usize..64, 0usize..64), 5),
            edits in prop::collection::vec((0usize..3, -5i32..5), 1..4),
        ) {
            let width = 3 + formulas.len();
            let mut wb = Workbook::new();
            for (col, v) in initial.iter().enumerate() {
                wb.set(&format!("{}1", column(col)), *v as f64);
            }
            for (i, (kind, a, b)) in formulas.iter().enumerate() {
                let col = 3 + i;
                wb.formula(&format!("{}1", column(col)), &template(col, *kind, *a, *b));
            }
            wb.recalc();

            for (col, v) in &edits {
                wb.set(&format!("{}1", column(*col)), *v as f64);
                wb.recalc();
            }

            let fresh_grid = Arc::clone(&wb.grid);
            let mut fresh = Engine::new(Arc::clone(&fresh_grid));
            for (key, raw) in fresh_grid.cells(0).unwrap() {
                if let Some(text) = raw.formula {
                    fresh.set_formula(key, &text);
                }
            }
            fresh.recalculate(0, None, RecalcOptions::default()).unwrap();

            prop_assert_eq!(values(&wb.engine, width), values(&fresh, width));
        }
    }
}
