//! Cell address and range types

use crate::error::{Error, Result};
use crate::{MAX_COLS, MAX_ROWS};
use std::fmt;
use std::str::FromStr;

/// A cell address (e.g., "A1", "$B$2")
///
/// Rows and columns are stored 0-based. The `$` markers are kept so that a
/// parsed formula prints back exactly as written; they do not take part in
/// equality with the dependency graph, which keys on [`CellAddress::position`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellAddress {
    /// Row index (0-based internally, 1-based in display)
    pub row: u32,
    /// Column index (0-based, A=0, B=1, ..., XFD=16383)
    pub col: u16,
    /// Whether the row reference is absolute ($)
    pub row_absolute: bool,
    /// Whether the column reference is absolute ($)
    pub col_absolute: bool,
}

impl CellAddress {
    /// Create a new cell address with relative references
    pub fn new(row: u32, col: u16) -> Self {
        Self {
            row,
            col,
            row_absolute: false,
            col_absolute: false,
        }
    }

    /// Create a new cell address with explicit absolute flags
    pub fn with_absolute(row: u32, col: u16, row_absolute: bool, col_absolute: bool) -> Self {
        Self {
            row,
            col,
            row_absolute,
            col_absolute,
        }
    }

    /// The same position with both absolute markers cleared
    pub fn position(&self) -> CellAddress {
        CellAddress::new(self.row, self.col)
    }

    /// Parse a cell address from A1-style notation
    ///
    /// # Examples
    /// ```
    /// use gridcalc_core::CellAddress;
    ///
    /// let addr = CellAddress::parse("$B$2").unwrap();
    /// assert_eq!((addr.row, addr.col), (1, 1));
    /// assert!(addr.row_absolute && addr.col_absolute);
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let bytes = s.as_bytes();
        let mut pos = 0;

        let col_absolute = bytes.first() == Some(&b'$');
        if col_absolute {
            pos += 1;
        }

        let col_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        if pos == col_start {
            return Err(Error::InvalidAddress(format!(
                "no column letters in '{}'",
                s
            )));
        }
        let col = Self::letters_to_column(&s[col_start..pos])?;

        let row_absolute = bytes.get(pos) == Some(&b'$');
        if row_absolute {
            pos += 1;
        }

        let digits = &s[pos..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidAddress(format!(
                "invalid row number in '{}'",
                s
            )));
        }
        let row: u32 = digits
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("invalid row number in '{}'", s)))?;
        if row == 0 {
            return Err(Error::InvalidAddress(format!(
                "row number must be >= 1 in '{}'",
                s
            )));
        }
        if row > MAX_ROWS {
            return Err(Error::RowOutOfBounds(row - 1, MAX_ROWS - 1));
        }

        Ok(Self::with_absolute(row - 1, col, row_absolute, col_absolute))
    }

    /// Convert column index to letters (0 = A, 25 = Z, 26 = AA, etc.)
    pub fn column_to_letters(col: u16) -> String {
        let mut letters = Vec::new();
        let mut n = col as u32 + 1;
        while n > 0 {
            n -= 1;
            letters.push((n % 26) as u8 + b'A');
            n /= 26;
        }
        letters.reverse();
        String::from_utf8(letters).unwrap_or_default()
    }

    /// Convert column letters to index (A = 0, Z = 25, AA = 26, etc.)
    pub fn letters_to_column(letters: &str) -> Result<u16> {
        if letters.is_empty() {
            return Err(Error::InvalidAddress("empty column letters".into()));
        }

        let mut col: u32 = 0;
        for c in letters.chars() {
            if !c.is_ascii_alphabetic() {
                return Err(Error::InvalidAddress(format!(
                    "invalid column letter '{}'",
                    c
                )));
            }
            col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
            if col > MAX_COLS as u32 {
                return Err(Error::ColumnOutOfBounds(
                    u16::try_from(col - 1).unwrap_or(u16::MAX),
                    MAX_COLS - 1,
                ));
            }
        }

        Ok((col - 1) as u16)
    }

    /// Format as A1-style string, keeping `$` markers
    pub fn to_a1_string(&self) -> String {
        let mut out = String::new();
        if self.col_absolute {
            out.push('$');
        }
        out.push_str(&Self::column_to_letters(self.col));
        if self.row_absolute {
            out.push('$');
        }
        out.push_str(&(self.row + 1).to_string());
        out
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1_string())
    }
}

impl FromStr for CellAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A rectangular range of cells (e.g., "A1:B10"), inclusive of both corners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellRange {
    /// Top-left corner
    pub start: CellAddress,
    /// Bottom-right corner
    pub end: CellAddress,
}

impl CellRange {
    /// Create a range from two corners in any order
    ///
    /// The corners are normalized so `start` is top-left; `$` markers stay
    /// attached to the corner they were written on.
    pub fn new(start: CellAddress, end: CellAddress) -> Self {
        let (top, bottom) = if start.row <= end.row {
            (start, end)
        } else {
            (end, start)
        };
        let (left_col, right_col) = (top.col.min(bottom.col), top.col.max(bottom.col));
        let (left_abs, right_abs) = if top.col <= bottom.col {
            (top.col_absolute, bottom.col_absolute)
        } else {
            (bottom.col_absolute, top.col_absolute)
        };

        Self {
            start: CellAddress::with_absolute(top.row, left_col, top.row_absolute, left_abs),
            end: CellAddress::with_absolute(bottom.row, right_col, bottom.row_absolute, right_abs),
        }
    }

    /// Create a range from row/column indices
    pub fn from_indices(start_row: u32, start_col: u16, end_row: u32, end_col: u16) -> Self {
        Self::new(
            CellAddress::new(start_row, start_col),
            CellAddress::new(end_row, end_col),
        )
    }

    /// Parse a range from A1:B10 notation; a lone address is a 1x1 range
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once(':') {
            Some((a, b)) => {
                let start = CellAddress::parse(a)
                    .map_err(|e| Error::InvalidRange(format!("'{}': {}", s, e)))?;
                let end = CellAddress::parse(b)
                    .map_err(|e| Error::InvalidRange(format!("'{}': {}", s, e)))?;
                Ok(Self::new(start, end))
            }
            None => {
                let addr = CellAddress::parse(s)?;
                Ok(Self::new(addr, addr))
            }
        }
    }

    /// Check if a cell is within this range
    pub fn contains(&self, addr: &CellAddress) -> bool {
        addr.row >= self.start.row
            && addr.row <= self.end.row
            && addr.col >= self.start.col
            && addr.col <= self.end.col
    }

    /// Number of rows in the range
    pub fn row_count(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    /// Number of columns in the range
    pub fn col_count(&self) -> u16 {
        self.end.col - self.start.col + 1
    }

    /// Total number of cells in the range
    pub fn cell_count(&self) -> u64 {
        self.row_count() as u64 * self.col_count() as u64
    }

    /// The same range with all `$` markers cleared
    pub fn position(&self) -> CellRange {
        CellRange {
            start: self.start.position(),
            end: self.end.position(),
        }
    }

    /// Iterate over all cell addresses in the range, row by row
    pub fn cells(&self) -> CellRangeIterator {
        CellRangeIterator {
            range: *self,
            row: self.start.row,
            col: self.start.col,
            remaining: self.cell_count(),
        }
    }

    /// Format as `A1:B10`, keeping `$` markers
    pub fn to_a1_string(&self) -> String {
        format!("{}:{}", self.start.to_a1_string(), self.end.to_a1_string())
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1_string())
    }
}

impl FromStr for CellRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Row-major iterator over the cells of a [`CellRange`]
pub struct CellRangeIterator {
    range: CellRange,
    row: u32,
    col: u16,
    remaining: u64,
}

impl Iterator for CellRangeIterator {
    type Item = CellAddress;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let addr = CellAddress::new(self.row, self.col);
        self.remaining -= 1;
        if self.col == self.range.end.col {
            self.col = self.range.start.col;
            self.row += 1;
        } else {
            self.col += 1;
        }
        Some(addr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

impl ExactSizeIterator for CellRangeIterator {}
