//! Runtime values
//!
//! Every coercion the evaluator applies lives here as an explicit method so
//! operator and function code never inspects types ad hoc.

use gridcalc_core::CellError;
use std::cmp::Ordering;
use std::fmt;

/// Value types during formula evaluation
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),
    /// Row-major 2-D array, as produced by a range reference
    Array(Vec<Vec<Value>>),
    /// A blank cell; distinct from `0` and `""`
    #[default]
    Empty,
}

impl Value {
    /// Convert to number, if possible
    ///
    /// Booleans count as 0/1, blanks as 0, and text only when the whole
    /// (trimmed) string is a finite number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Empty => Some(0.0),
            Value::Text(s) => parse_numeric_text(s),
            Value::Array(_) => self.top_left().as_number(),
            Value::Error(_) => None,
        }
    }

    /// Number for arithmetic: an error operand yields its own code, anything
    /// non-numeric yields `#VALUE!`
    pub fn to_number(&self) -> Result<f64, CellError> {
        if let Some(e) = self.error() {
            return Err(e);
        }
        self.as_number().ok_or(CellError::Value)
    }

    /// Convert to boolean, if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            Value::Empty => Some(false),
            Value::Text(s) => {
                if s.eq_ignore_ascii_case("TRUE") {
                    Some(true)
                } else if s.eq_ignore_ascii_case("FALSE") {
                    Some(false)
                } else {
                    None
                }
            }
            Value::Array(_) => self.top_left().as_bool(),
            Value::Error(_) => None,
        }
    }

    /// Boolean for logical functions, with the same error rules as [`Value::to_number`]
    pub fn to_bool(&self) -> Result<bool, CellError> {
        if let Some(e) = self.error() {
            return Err(e);
        }
        self.as_bool().ok_or(CellError::Value)
    }

    /// Convert to text the way a cell displays it
    pub fn as_text(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Boolean(true) => "TRUE".to_string(),
            Value::Boolean(false) => "FALSE".to_string(),
            Value::Error(e) => e.to_string(),
            Value::Empty => String::new(),
            Value::Array(_) => self.top_left().as_text(),
        }
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Get the error if this is one
    pub fn error(&self) -> Option<CellError> {
        match self {
            Value::Error(e) => Some(*e),
            _ => None,
        }
    }

    /// First error in row-major order, looking inside arrays
    pub fn first_error(&self) -> Option<CellError> {
        match self {
            Value::Error(e) => Some(*e),
            Value::Array(rows) => rows.iter().flatten().find_map(Value::error),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Reduce an array to its top-left element; scalars are returned as is
    ///
    /// An empty array has no top-left element and reduces to `#VALUE!`.
    pub fn into_scalar(self) -> Value {
        match self {
            Value::Array(rows) => rows
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .map_or(Value::Error(CellError::Value), Value::into_scalar),
            v => v,
        }
    }

    fn top_left(&self) -> Value {
        self.clone().into_scalar()
    }

    /// Iterate every scalar: the value itself, or each array element row by row
    pub fn flatten(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::Array(rows) => Box::new(rows.iter().flatten()),
            v => Box::new(std::iter::once(v)),
        }
    }

    /// Rank used when comparing values of different types
    fn type_rank(&self) -> u8 {
        match self {
            Value::Number(_) | Value::Empty => 0,
            Value::Text(_) => 1,
            Value::Boolean(_) => 2,
            Value::Error(_) => 3,
            Value::Array(_) => 4,
        }
    }

    /// Compare two scalars
    ///
    /// Numbers order numerically and text case-insensitively; across types
    /// number < text < boolean. A blank takes the "zero" of the other side:
    /// `0`, `""` or `FALSE`.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Array(_), _) => self.top_left().compare(other),
            (_, Value::Array(_)) => self.compare(&other.top_left()),
            (Value::Empty, Value::Text(_)) => Value::Text(String::new()).compare(other),
            (Value::Text(_), Value::Empty) => self.compare(&Value::Text(String::new())),
            (Value::Empty, Value::Boolean(_)) => Value::Boolean(false).compare(other),
            (Value::Boolean(_), Value::Empty) => self.compare(&Value::Boolean(false)),
            (Value::Number(_) | Value::Empty, Value::Number(_) | Value::Empty) => {
                let l = self.as_number().unwrap_or(0.0);
                let r = other.as_number().unwrap_or(0.0);
                l.partial_cmp(&r).unwrap_or(Ordering::Equal)
            }
            (Value::Text(l), Value::Text(r)) => l.to_lowercase().cmp(&r.to_lowercase()),
            (Value::Boolean(l), Value::Boolean(r)) => l.cmp(r),
            (Value::Error(l), Value::Error(r)) => l.code().cmp(&r.code()),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

/// Parse text as a number the way arithmetic coercion does
fn parse_numeric_text(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Rust accepts "inf" and "NaN"; cells do not
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
    {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Format a number like a cell: integers without a fractional part
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<CellError> for Value {
    fn from(e: CellError) -> Self {
        Value::Error(e)
    }
}

impl<E: Into<Value>> From<Result<f64, E>> for Value {
    fn from(result: Result<f64, E>) -> Self {
        match result {
            Ok(n) => Value::Number(n),
            Err(e) => e.into(),
        }
    }
}
