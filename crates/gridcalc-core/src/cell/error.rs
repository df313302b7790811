//! Cell error codes

use std::fmt;

/// Error values a cell can hold or display
///
/// Each variant has a stable display code (e.g. `#DIV/0!`) that round-trips
/// through [`CellError::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellError {
    /// #DIV/0! - Division by zero
    Div0,
    /// #VALUE! - Wrong type of argument or operand
    Value,
    /// #REF! - Invalid cell reference or unknown sheet
    Ref,
    /// #NAME? - Unrecognized function or name
    Name,
    /// #NUM! - Invalid numeric domain
    Num,
    /// #N/A - Value not available
    Na,
    /// #CIRCULAR! - Cell participates in (or reads from) a dependency cycle
    Circular,
    /// #CALC! - Evaluation exceeded a resource guard
    Calc,
    /// #ERROR! - Formula text could not be tokenized or parsed
    Invalid,
}

impl CellError {
    /// All error codes, in display order
    pub const ALL: [CellError; 9] = [
        CellError::Div0,
        CellError::Value,
        CellError::Ref,
        CellError::Name,
        CellError::Num,
        CellError::Na,
        CellError::Circular,
        CellError::Calc,
        CellError::Invalid,
    ];

    /// Get the display string for this error
    pub fn as_str(&self) -> &'static str {
        match self {
            CellError::Div0 => "#DIV/0!",
            CellError::Value => "#VALUE!",
            CellError::Ref => "#REF!",
            CellError::Name => "#NAME?",
            CellError::Num => "#NUM!",
            CellError::Na => "#N/A",
            CellError::Circular => "#CIRCULAR!",
            CellError::Calc => "#CALC!",
            CellError::Invalid => "#ERROR!",
        }
    }

    /// Parse an error code such as `#N/A` (case-insensitive)
    pub fn from_code(s: &str) -> Option<Self> {
        let upper = s.to_ascii_uppercase();
        Self::ALL.into_iter().find(|e| e.as_str() == upper)
    }

    /// Numeric code, matching the order of [`CellError::ALL`] starting at 1
    pub fn code(&self) -> u8 {
        match self {
            CellError::Div0 => 1,
            CellError::Value => 2,
            CellError::Ref => 3,
            CellError::Name => 4,
            CellError::Num => 5,
            CellError::Na => 6,
            CellError::Circular => 7,
            CellError::Calc => 8,
            CellError::Invalid => 9,
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
