//! Dependency tracking for formula calculation
//!
//! The graph stores, for every formula cell, the ordered list of references
//! it reads (its precedents), and the reverse index from cells and ranges to
//! the formulas reading them. Both sides are rebuilt together on every edit,
//! so `dependents(a)` always lists exactly the formulas whose precedents
//! include `a`, whether directly or through a range.

use crate::ast::{FormulaExpr, Reference};
use ahash::{AHashMap, AHashSet};
use gridcalc_core::{CellAddress, CellRange};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Unique key for a cell (sheet index + address)
///
/// Orders by sheet, then row, then column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellKey {
    pub sheet: usize,
    pub row: u32,
    pub col: u16,
}

impl CellKey {
    /// Create a new cell key
    pub fn new(sheet: usize, row: u32, col: u16) -> Self {
        Self { sheet, row, col }
    }

    /// Create from sheet index and cell address
    pub fn from_address(sheet: usize, addr: &CellAddress) -> Self {
        Self::new(sheet, addr.row, addr.col)
    }

    pub fn address(&self) -> CellAddress {
        CellAddress::new(self.row, self.col)
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.sheet, self.address())
    }
}

/// A range on a specific sheet, without `$` markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeKey {
    pub sheet: usize,
    pub range: CellRange,
}

impl RangeKey {
    pub fn new(sheet: usize, range: CellRange) -> Self {
        Self {
            sheet,
            range: range.position(),
        }
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        self.sheet == key.sheet && self.range.contains(&key.address())
    }
}

/// One reference a formula reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Precedent {
    Cell(CellKey),
    Range(RangeKey),
}

impl Precedent {
    pub fn sheet(&self) -> usize {
        match self {
            Precedent::Cell(k) => k.sheet,
            Precedent::Range(r) => r.sheet,
        }
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        match self {
            Precedent::Cell(k) => k == key,
            Precedent::Range(r) => r.contains(key),
        }
    }
}

/// Everything a formula reads, as far as the sheets it names can be resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    /// Resolved references in source order, without duplicates
    pub precedents: Vec<Precedent>,
    /// Lowercased sheet qualifiers that resolved to no sheet, in source order
    pub unresolved_sheets: Vec<String>,
}

/// Extract the references of a formula
///
/// `resolve_sheet` maps a sheet qualifier to its index. A reference to a
/// sheet it cannot resolve produces no edge; its name is kept so the formula
/// can be re-linked once a sheet by that name exists.
pub fn extract_references(
    expr: &FormulaExpr,
    sheet: usize,
    mut resolve_sheet: impl FnMut(&str) -> Option<usize>,
) -> References {
    let mut seen = AHashSet::new();
    let mut out = References::default();
    expr.for_each_reference(&mut |reference| {
        let qualifier = match reference {
            Reference::Cell(r) => r.sheet.as_deref(),
            Reference::Range(r) => r.sheet.as_deref(),
        };
        let target = match qualifier {
            None => Some(sheet),
            Some(name) => resolve_sheet(name),
        };
        let Some(s) = target else {
            let name = qualifier.unwrap_or_default().to_lowercase();
            if !out.unresolved_sheets.contains(&name) {
                out.unresolved_sheets.push(name);
            }
            return;
        };
        let precedent = match reference {
            Reference::Cell(r) => Precedent::Cell(CellKey::from_address(s, &r.address)),
            Reference::Range(r) => Precedent::Range(RangeKey::new(s, r.range)),
        };
        if seen.insert(precedent) {
            out.precedents.push(precedent);
        }
    });
    out
}

/// Extract the precedents of a formula in source order, without duplicates
///
/// References to sheets `resolve_sheet` cannot resolve produce no edge.
pub fn extract_precedents(
    expr: &FormulaExpr,
    sheet: usize,
    resolve_sheet: impl FnMut(&str) -> Option<usize>,
) -> Vec<Precedent> {
    extract_references(expr, sheet, resolve_sheet).precedents
}

/// Dependency graph for formula cells
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Formula → what it reads, in source order
    precedents: AHashMap<CellKey, Vec<Precedent>>,
    /// Cell → formulas reading it directly
    cell_dependents: AHashMap<CellKey, AHashSet<CellKey>>,
    /// Sheet → range → formulas reading that range
    range_dependents: AHashMap<usize, AHashMap<CellRange, AHashSet<CellKey>>>,
    /// Lowercased sheet name → formulas naming that sheet while it does not exist
    awaiting: AHashMap<String, AHashSet<CellKey>>,
    /// Formula → the missing sheet names it is listed under
    awaited_by: AHashMap<CellKey, Vec<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every edge out of `formula` with `precedents`
    ///
    /// Old edges are removed first; nothing is patched in place.
    pub fn replace_precedents(&mut self, formula: CellKey, precedents: Vec<Precedent>) {
        self.remove_formula(formula);

        for p in &precedents {
            match p {
                Precedent::Cell(cell) => {
                    self.cell_dependents.entry(*cell).or_default().insert(formula);
                }
                Precedent::Range(r) => {
                    self.range_dependents
                        .entry(r.sheet)
                        .or_default()
                        .entry(r.range)
                        .or_default()
                        .insert(formula);
                }
            }
        }
        self.precedents.insert(formula, precedents);
    }

    /// Replace every edge out of `formula`, and record the sheet names it
    /// could not resolve
    pub fn replace_references(&mut self, formula: CellKey, references: References) {
        self.replace_precedents(formula, references.precedents);
        if references.unresolved_sheets.is_empty() {
            return;
        }
        for name in &references.unresolved_sheets {
            self.awaiting.entry(name.clone()).or_default().insert(formula);
        }
        self.awaited_by.insert(formula, references.unresolved_sheets);
    }

    /// Remove every edge out of `formula`; returns whether it was tracked
    ///
    /// Edges *into* the address stay: other formulas still reference it by text.
    pub fn remove_formula(&mut self, formula: CellKey) -> bool {
        for name in self.awaited_by.remove(&formula).unwrap_or_default() {
            if let Some(set) = self.awaiting.get_mut(&name) {
                set.remove(&formula);
                if set.is_empty() {
                    self.awaiting.remove(&name);
                }
            }
        }

        let Some(old) = self.precedents.remove(&formula) else {
            return false;
        };
        for p in old {
            match p {
                Precedent::Cell(cell) => {
                    if let Some(set) = self.cell_dependents.get_mut(&cell) {
                        set.remove(&formula);
                        if set.is_empty() {
                            self.cell_dependents.remove(&cell);
                        }
                    }
                }
                Precedent::Range(r) => {
                    if let Some(ranges) = self.range_dependents.get_mut(&r.sheet) {
                        if let Some(set) = ranges.get_mut(&r.range) {
                            set.remove(&formula);
                            if set.is_empty() {
                                ranges.remove(&r.range);
                            }
                        }
                        if ranges.is_empty() {
                            self.range_dependents.remove(&r.sheet);
                        }
                    }
                }
            }
        }
        true
    }

    /// Whether `formula` has an entry in the graph
    pub fn contains(&self, formula: CellKey) -> bool {
        self.precedents.contains_key(&formula)
    }

    /// What `formula` reads, in source order
    pub fn precedents(&self, formula: CellKey) -> &[Precedent] {
        self.precedents.get(&formula).map_or(&[], Vec::as_slice)
    }

    /// Formulas reading `cell` directly or through a range, sorted
    pub fn dependents(&self, cell: CellKey) -> Vec<CellKey> {
        let mut out = BTreeSet::new();
        self.collect_dependents(cell, &mut out);
        out.into_iter().collect()
    }

    fn collect_dependents(&self, cell: CellKey, out: &mut BTreeSet<CellKey>) {
        if let Some(set) = self.cell_dependents.get(&cell) {
            out.extend(set.iter().copied());
        }
        if let Some(ranges) = self.range_dependents.get(&cell.sheet) {
            let addr = cell.address();
            for (range, set) in ranges {
                if range.contains(&addr) {
                    out.extend(set.iter().copied());
                }
            }
        }
    }

    /// Every formula reachable from `seeds` through dependent edges
    ///
    /// Seeds themselves are included only when reached from another seed or
    /// from themselves.
    pub fn transitive_dependents(&self, seeds: impl IntoIterator<Item = CellKey>) -> BTreeSet<CellKey> {
        let mut reached = BTreeSet::new();
        let mut queue: VecDeque<CellKey> = seeds.into_iter().collect();
        let mut step = BTreeSet::new();

        while let Some(cell) = queue.pop_front() {
            step.clear();
            self.collect_dependents(cell, &mut step);
            for &dep in &step {
                if reached.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }
        reached
    }

    /// Precedents of `formula` that are members of `within`, sorted
    ///
    /// Used to restrict ordering to a subgraph: a range contributes only the
    /// member cells it covers.
    pub fn precedents_within(&self, formula: CellKey, within: &BTreeSet<CellKey>) -> Vec<CellKey> {
        let mut out = BTreeSet::new();
        for p in self.precedents(formula) {
            match p {
                Precedent::Cell(cell) => {
                    if within.contains(cell) {
                        out.insert(*cell);
                    }
                }
                Precedent::Range(r) => {
                    let start = r.range.start;
                    let end = r.range.end;
                    if (r.range.row_count() as usize) < within.len() {
                        for row in start.row..=end.row {
                            let lo = CellKey::new(r.sheet, row, start.col);
                            let hi = CellKey::new(r.sheet, row, end.col);
                            out.extend(within.range(lo..=hi).copied());
                        }
                    } else {
                        out.extend(within.iter().filter(|k| r.contains(k)).copied());
                    }
                }
            }
        }
        out.into_iter().collect()
    }

    /// Formulas on other sheets that read anything on `sheet`
    pub fn formulas_reading_sheet(&self, sheet: usize) -> Vec<CellKey> {
        let mut out: Vec<CellKey> = self
            .precedents
            .iter()
            .filter(|(formula, precs)| {
                formula.sheet != sheet && precs.iter().any(|p| p.sheet() == sheet)
            })
            .map(|(formula, _)| *formula)
            .collect();
        out.sort();
        out
    }

    /// Formulas living on `sheet`, sorted
    pub fn formulas_on_sheet(&self, sheet: usize) -> Vec<CellKey> {
        let mut out: Vec<CellKey> = self
            .precedents
            .keys()
            .filter(|k| k.sheet == sheet)
            .copied()
            .collect();
        out.sort();
        out
    }

    /// Formulas naming a sheet called `name` that did not exist when their
    /// edges were last built, sorted
    pub fn formulas_awaiting_sheet(&self, name: &str) -> Vec<CellKey> {
        let mut out: Vec<CellKey> = self
            .awaiting
            .get(&name.to_lowercase())
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Strongly connected components of `nodes` that form cycles
    ///
    /// Only edges between members of `nodes` are followed. A component is a
    /// cycle if it has more than one member or a member that reads itself.
    pub fn find_cycles(&self, nodes: &BTreeSet<CellKey>) -> Vec<Vec<CellKey>> {
        let mut tarjan = Tarjan {
            graph: self,
            nodes,
            index: 0,
            indices: AHashMap::new(),
            lowlink: AHashMap::new(),
            stack: Vec::new(),
            on_stack: AHashSet::new(),
            cycles: Vec::new(),
        };
        for &node in nodes {
            if !tarjan.indices.contains_key(&node) {
                tarjan.visit(node);
            }
        }
        tarjan.cycles
    }

    /// Number of formulas tracked
    pub fn len(&self) -> usize {
        self.precedents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precedents.is_empty()
    }

    /// Sorted copy of the edges for diagnostics
    pub fn snapshot(&self) -> GraphSnapshot {
        let precedents: BTreeMap<CellKey, Vec<Precedent>> = self
            .precedents
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        GraphSnapshot {
            formulas: precedents.into_iter().collect(),
        }
    }

    /// Clear the entire graph
    pub fn clear(&mut self) {
        self.precedents.clear();
        self.cell_dependents.clear();
        self.range_dependents.clear();
        self.awaiting.clear();
        self.awaited_by.clear();
    }
}

/// Serializable view of a [`DependencyGraph`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphSnapshot {
    /// Each formula with its precedents, sorted by formula
    pub formulas: Vec<(CellKey, Vec<Precedent>)>,
}

/// Iterative state for Tarjan's algorithm, following precedent → dependent edges
struct Tarjan<'g> {
    graph: &'g DependencyGraph,
    nodes: &'g BTreeSet<CellKey>,
    index: usize,
    indices: AHashMap<CellKey, usize>,
    lowlink: AHashMap<CellKey, usize>,
    stack: Vec<CellKey>,
    on_stack: AHashSet<CellKey>,
    cycles: Vec<Vec<CellKey>>,
}

impl Tarjan<'_> {
    fn successors(&self, node: CellKey) -> Vec<CellKey> {
        let mut out = BTreeSet::new();
        self.graph.collect_dependents(node, &mut out);
        out.into_iter().filter(|k| self.nodes.contains(k)).collect()
    }

    fn visit(&mut self, root: CellKey) {
        // Explicit work stack so deep chains do not overflow the call stack
        let mut work: Vec<(CellKey, Vec<CellKey>, usize)> = Vec::new();
        self.open(root);
        work.push((root, self.successors(root), 0));

        while let Some((node, succ, next)) = work.last_mut() {
            let node = *node;
            if let Some(&child) = succ.get(*next) {
                *next += 1;
                if !self.indices.contains_key(&child) {
                    self.open(child);
                    let child_succ = self.successors(child);
                    work.push((child, child_succ, 0));
                } else if self.on_stack.contains(&child) {
                    let low = self.lowlink[&node].min(self.indices[&child]);
                    self.lowlink.insert(node, low);
                }
                continue;
            }

            work.pop();
            if let Some((parent, _, _)) = work.last() {
                let low = self.lowlink[parent].min(self.lowlink[&node]);
                self.lowlink.insert(*parent, low);
            }

            if self.lowlink[&node] == self.indices[&node] {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack.remove(&member);
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                let self_loop = component.len() == 1
                    && self.graph.precedents(node).iter().any(|p| p.contains(&node));
                if component.len() > 1 || self_loop {
                    component.sort();
                    self.cycles.push(component);
                }
            }
        }
    }

    fn open(&mut self, node: CellKey) {
        self.indices.insert(node, self.index);
        self.lowlink.insert(node, self.index);
        self.index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_formula;
    use pretty_assertions::assert_eq;

    fn key(a1: &str) -> CellKey {
        CellKey::from_address(0, &CellAddress::parse(a1).unwrap())
    }

    fn set_formula(graph: &mut DependencyGraph, cell: &str, formula: &str) {
        let ast = parse_formula(formula).unwrap();
        let refs = extract_references(&ast, 0, |name| (name == "Data").then_some(1));
        graph.replace_references(key(cell), refs);
    }

    #[test]
    fn test_extract_precedents_in_order_without_duplicates() {
        let ast = parse_formula("=B1+SUM(A1:A3)+B1+Data!C2+Gone!A1").unwrap();
        let precs = extract_precedents(&ast, 0, |name| (name == "Data").then_some(1));
        assert_eq!(
            precs,
            vec![
                Precedent::Cell(key("B1")),
                Precedent::Range(RangeKey::new(0, CellRange::parse("A1:A3").unwrap())),
                Precedent::Cell(CellKey::new(1, 1, 2)),
            ]
        );
    }

    #[test]
    fn test_dependents_include_ranges() {
        let mut graph = DependencyGraph::new();
        set_formula(&mut graph, "A3", "=SUM(A1:A2)");
        set_formula(&mut graph, "B1", "=A1*2");
        set_formula(&mut graph, "C1", "=Z9");

        assert_eq!(graph.dependents(key("A1")), vec![key("B1"), key("A3")]);
        assert_eq!(graph.dependents(key("A2")), vec![key("A3")]);
        assert!(graph.dependents(key("A4")).is_empty());
    }

    #[test]
    fn test_edit_replaces_edges() {
        let mut graph = DependencyGraph::new();
        set_formula(&mut graph, "B1", "=A1");
        set_formula(&mut graph, "B1", "=A2");
        assert!(graph.dependents(key("A1")).is_empty());
        assert_eq!(graph.dependents(key("A2")), vec![key("B1")]);

        assert!(graph.remove_formula(key("B1")));
        assert!(graph.dependents(key("A2")).is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_transitive_dependents() {
        let mut graph = DependencyGraph::new();
        set_formula(&mut graph, "B1", "=A1");
        set_formula(&mut graph, "C1", "=B1+1");
        set_formula(&mut graph, "D1", "=SUM(B1:C1)");
        set_formula(&mut graph, "E1", "=Z1");

        let reached = graph.transitive_dependents([key("A1")]);
        assert_eq!(
            reached.into_iter().collect::<Vec<_>>(),
            vec![key("B1"), key("C1"), key("D1")]
        );
    }

    #[test]
    fn test_precedents_within_subset() {
        let mut graph = DependencyGraph::new();
        set_formula(&mut graph, "D1", "=SUM(A1:C3)+E5");
        let within: BTreeSet<_> = [key("B2"), key("C3"), key("E5"), key("Z1")].into_iter().collect();
        assert_eq!(
            graph.precedents_within(key("D1"), &within),
            vec![key("B2"), key("C3"), key("E5")]
        );
    }

    #[test]
    fn test_find_cycles() {
        let mut graph = DependencyGraph::new();
        set_formula(&mut graph, "A1", "=C1");
        set_formula(&mut graph, "B1", "=A1");
        set_formula(&mut graph, "C1", "=B1");
        set_formula(&mut graph, "D1", "=D1+1");
        set_formula(&mut graph, "E1", "=A1");

        let nodes: BTreeSet<_> = ["A1", "B1", "C1", "D1", "E1"].into_iter().map(key).collect();
        let mut cycles = graph.find_cycles(&nodes);
        cycles.sort();
        assert_eq!(
            cycles,
            vec![vec![key("A1"), key("B1"), key("C1")], vec![key("D1")]]
        );
    }

    #[test]
    fn test_sheet_queries_and_snapshot() {
        let mut graph = DependencyGraph::new();
        set_formula(&mut graph, "A1", "=Data!A1");
        set_formula(&mut graph, "A2", "=B2");
        assert_eq!(graph.formulas_reading_sheet(1), vec![key("A1")]);
        assert_eq!(graph.formulas_on_sheet(0), vec![key("A1"), key("A2")]);

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.formulas.len(), 2);
        assert_eq!(snapshot.formulas[0].0, key("A1"));
    }

    #[test]
    fn test_unresolved_sheets_are_remembered() {
        let ast = parse_formula("=Later!A1+later!B1+SUM('Other Sheet'!A1:A2)+Data!A1").unwrap();
        let refs = extract_references(&ast, 0, |name| (name == "Data").then_some(1));
        assert_eq!(refs.unresolved_sheets, vec!["later", "other sheet"]);
        assert_eq!(refs.precedents, vec![Precedent::Cell(CellKey::new(1, 0, 0))]);

        let mut graph = DependencyGraph::new();
        graph.replace_references(key("B1"), refs);
        set_formula(&mut graph, "B2", "=LATER!C3");
        assert_eq!(graph.formulas_awaiting_sheet("Later"), vec![key("B1"), key("B2")]);
        assert_eq!(graph.formulas_awaiting_sheet("other sheet"), vec![key("B1")]);

        // Rebuilding once the sheet resolves drops the entry
        let ast = parse_formula("=LATER!C3").unwrap();
        let refs = extract_references(&ast, 0, |_| Some(2));
        graph.replace_references(key("B2"), refs);
        assert_eq!(graph.formulas_awaiting_sheet("later"), vec![key("B1")]);

        graph.remove_formula(key("B1"));
        assert!(graph.formulas_awaiting_sheet("later").is_empty());
        assert!(graph.formulas_awaiting_sheet("Other Sheet").is_empty());
    }
}
