//! Formula Abstract Syntax Tree types
//!
//! [`FormulaExpr`] implements `Display`, printing canonical formula text
//! (without the leading `=`) that parses back into an equal tree.

use gridcalc_core::{CellAddress, CellError, CellRange};
use std::fmt;

/// Formula expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    // === Literals ===
    /// Numeric literal
    Number(f64),
    /// String literal
    Text(String),
    /// Boolean literal
    Boolean(bool),
    /// Error literal
    Error(CellError),

    // === References ===
    /// Single cell reference
    CellRef(CellReference),
    /// Range reference
    RangeRef(RangeReference),
    /// Bare identifier that is not a function call; evaluates to `#NAME?`
    Name(String),

    // === Operators ===
    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<FormulaExpr>,
    },

    // === Function call ===
    /// Function name keeps the case it was written in
    Function { name: String, args: Vec<FormulaExpr> },
}

/// Cell reference with optional sheet
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellReference {
    pub sheet: Option<String>,
    pub address: CellAddress,
}

/// Range reference with optional sheet
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeReference {
    pub sheet: Option<String>,
    pub range: CellRange,
}

/// A reference found while walking an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    Cell(&'a CellReference),
    Range(&'a RangeReference),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,

    // Text
    Concat,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Percent,
}

// Binding strength, lowest first
const PREC_COMPARISON: u8 = 1;
const PREC_CONCAT: u8 = 2;
const PREC_ADDITIVE: u8 = 3;
const PREC_MULTIPLICATIVE: u8 = 4;
const PREC_POWER: u8 = 5;
const PREC_NEGATE: u8 = 6;
const PREC_PERCENT: u8 = 7;
const PREC_PRIMARY: u8 = 8;

impl BinaryOperator {
    /// Operator as written in formula text
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Power => "^",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "<>",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::Concat => "&",
        }
    }

    pub(crate) fn precedence(&self) -> u8 {
        match self {
            BinaryOperator::Equal
            | BinaryOperator::NotEqual
            | BinaryOperator::LessThan
            | BinaryOperator::LessEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterEqual => PREC_COMPARISON,
            BinaryOperator::Concat => PREC_CONCAT,
            BinaryOperator::Add | BinaryOperator::Subtract => PREC_ADDITIVE,
            BinaryOperator::Multiply | BinaryOperator::Divide => PREC_MULTIPLICATIVE,
            BinaryOperator::Power => PREC_POWER,
        }
    }

    /// `^` groups to the right; everything else to the left
    pub(crate) fn is_right_associative(&self) -> bool {
        matches!(self, BinaryOperator::Power)
    }

    /// True for `=`, `<>`, `<`, `<=`, `>`, `>=`
    pub fn is_comparison(&self) -> bool {
        self.precedence() == PREC_COMPARISON
    }
}

impl FormulaExpr {
    /// Render as formula text with the leading `=`
    pub fn to_formula(&self) -> String {
        format!("={}", self)
    }

    fn precedence(&self) -> u8 {
        match self {
            FormulaExpr::BinaryOp { op, .. } => op.precedence(),
            FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                ..
            } => PREC_NEGATE,
            FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                ..
            } => PREC_PERCENT,
            _ => PREC_PRIMARY,
        }
    }

    /// Visit every cell and range reference, left to right
    pub fn for_each_reference<'a>(&'a self, f: &mut impl FnMut(Reference<'a>)) {
        match self {
            FormulaExpr::CellRef(r) => f(Reference::Cell(r)),
            FormulaExpr::RangeRef(r) => f(Reference::Range(r)),
            FormulaExpr::BinaryOp { left, right, .. } => {
                left.for_each_reference(f);
                right.for_each_reference(f);
            }
            FormulaExpr::UnaryOp { operand, .. } => operand.for_each_reference(f),
            FormulaExpr::Function { args, .. } => {
                for arg in args {
                    arg.for_each_reference(f);
                }
            }
            FormulaExpr::Number(_)
            | FormulaExpr::Text(_)
            | FormulaExpr::Boolean(_)
            | FormulaExpr::Error(_)
            | FormulaExpr::Name(_) => {}
        }
    }

    /// All references in source order
    pub fn references(&self) -> Vec<Reference<'_>> {
        let mut refs = Vec::new();
        self.for_each_reference(&mut |r| refs.push(r));
        refs
    }

    /// True if any function call in the tree satisfies `pred`
    pub fn any_function(&self, pred: &impl Fn(&str) -> bool) -> bool {
        match self {
            FormulaExpr::Function { name, args } => {
                pred(name) || args.iter().any(|a| a.any_function(pred))
            }
            FormulaExpr::BinaryOp { left, right, .. } => {
                left.any_function(pred) || right.any_function(pred)
            }
            FormulaExpr::UnaryOp { operand, .. } => operand.any_function(pred),
            _ => false,
        }
    }

    /// Depth of the tree; a literal has depth 1
    pub fn depth(&self) -> usize {
        match self {
            FormulaExpr::BinaryOp { left, right, .. } => 1 + left.depth().max(right.depth()),
            FormulaExpr::UnaryOp { operand, .. } => 1 + operand.depth(),
            FormulaExpr::Function { args, .. } => {
                1 + args.iter().map(FormulaExpr::depth).max().unwrap_or(0)
            }
            _ => 1,
        }
    }
}

impl fmt::Display for FormulaExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaExpr::Number(n) => write!(f, "{}", n),
            FormulaExpr::Text(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            FormulaExpr::Boolean(true) => f.write_str("TRUE"),
            FormulaExpr::Boolean(false) => f.write_str("FALSE"),
            FormulaExpr::Error(e) => f.write_str(e.as_str()),
            FormulaExpr::CellRef(r) => write!(f, "{}", r),
            FormulaExpr::RangeRef(r) => write!(f, "{}", r),
            FormulaExpr::Name(name) => f.write_str(name),
            FormulaExpr::BinaryOp { op, left, right } => {
                let prec = op.precedence();
                let (left_min, right_min) = if op.is_right_associative() {
                    (prec + 1, prec)
                } else {
                    (prec, prec + 1)
                };
                write_operand(f, left, left_min)?;
                f.write_str(op.symbol())?;
                write_operand(f, right, right_min)
            }
            FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                operand,
            } => {
                f.write_str("-")?;
                write_operand(f, operand, PREC_NEGATE)
            }
            FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                operand,
            } => {
                write_operand(f, operand, PREC_PERCENT)?;
                f.write_str("%")
            }
            FormulaExpr::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Write `expr`, parenthesized if it binds looser than `min_prec`
fn write_operand(f: &mut fmt::Formatter<'_>, expr: &FormulaExpr, min_prec: u8) -> fmt::Result {
    if expr.precedence() < min_prec {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

fn write_sheet_prefix(f: &mut fmt::Formatter<'_>, sheet: &Option<String>) -> fmt::Result {
    let Some(name) = sheet else {
        return Ok(());
    };
    let plain = name
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if plain {
        write!(f, "{}!", name)
    } else {
        write!(f, "'{}'!", name.replace('\'', "''"))
    }
}

impl fmt::Display for CellReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_sheet_prefix(f, &self.sheet)?;
        write!(f, "{}", self.address)
    }
}

impl fmt::Display for RangeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_sheet_prefix(f, &self.sheet)?;
        write!(f, "{}", self.range)
    }
}
