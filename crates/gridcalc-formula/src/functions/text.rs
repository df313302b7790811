//! Text functions
//!
//! Lengths and positions count characters, not bytes.

use super::{FunctionOptions, FunctionRegistry};
use crate::error::EvalResult;
use crate::value::Value;
use gridcalc_core::CellError;

pub(crate) fn register(registry: &FunctionRegistry) {
    registry.register_fn(
        "CONCATENATE",
        FunctionOptions::variadic(1).describe("Joins text values"),
        fn_concatenate,
    );
    registry.register_fn(
        "CONCAT",
        FunctionOptions::variadic(1)
            .range_aware()
            .describe("Joins text values, including whole ranges"),
        fn_concat,
    );
    registry.register_fn("LEN", FunctionOptions::fixed(1).describe("Number of characters"), fn_len);
    registry.register_fn("UPPER", FunctionOptions::fixed(1).describe("Converts to upper case"), fn_upper);
    registry.register_fn("LOWER", FunctionOptions::fixed(1).describe("Converts to lower case"), fn_lower);
    registry.register_fn(
        "TRIM",
        FunctionOptions::fixed(1).describe("Removes extra spaces"),
        fn_trim,
    );
    registry.register_fn(
        "LEFT",
        FunctionOptions::fixed(1)
            .optional(1)
            .describe("Leading characters of a text"),
        fn_left,
    );
    registry.register_fn(
        "RIGHT",
        FunctionOptions::fixed(1)
            .optional(1)
            .describe("Trailing characters of a text"),
        fn_right,
    );
    registry.register_fn(
        "MID",
        FunctionOptions::fixed(3).describe("Characters from the middle of a text"),
        fn_mid,
    );
    registry.register_fn(
        "EXACT",
        FunctionOptions::fixed(2).describe("Case-sensitive text equality"),
        fn_exact,
    );
    registry.register_fn(
        "REPT",
        FunctionOptions::fixed(2).describe("Repeats a text a number of times"),
        fn_rept,
    );
}

/// A non-negative character count; fractions truncate
fn to_count(v: &Value) -> Result<usize, CellError> {
    let n = v.to_number()?.trunc();
    if n < 0.0 {
        return Err(CellError::Value);
    }
    Ok(n.min(usize::MAX as f64) as usize)
}

fn text_result(r: Result<String, CellError>) -> EvalResult<Value> {
    Ok(match r {
        Ok(s) => Value::Text(s),
        Err(e) => Value::Error(e),
    })
}

/// CONCATENATE(text1, [text2], ...)
pub fn fn_concatenate(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Text(args.iter().map(Value::as_text).collect()))
}

/// CONCAT(text1, [text2], ...), flattening ranges row by row
pub fn fn_concat(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Text(
        args.iter()
            .flat_map(Value::flatten)
            .map(Value::as_text)
            .collect(),
    ))
}

/// LEN(text)
pub fn fn_len(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Number(args[0].as_text().chars().count() as f64))
}

/// UPPER(text)
pub fn fn_upper(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Text(args[0].as_text().to_uppercase()))
}

/// LOWER(text)
pub fn fn_lower(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Text(args[0].as_text().to_lowercase()))
}

/// TRIM(text): strips both ends and collapses inner runs of spaces
pub fn fn_trim(args: &[Value]) -> EvalResult<Value> {
    let text = args[0].as_text();
    Ok(Value::Text(
        text.split(' ')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
    ))
}

/// LEFT(text, [num_chars])
pub fn fn_left(args: &[Value]) -> EvalResult<Value> {
    text_result(left(args))
}

fn left(args: &[Value]) -> Result<String, CellError> {
    let n = args.get(1).map(to_count).transpose()?.unwrap_or(1);
    Ok(args[0].as_text().chars().take(n).collect())
}

/// RIGHT(text, [num_chars])
pub fn fn_right(args: &[Value]) -> EvalResult<Value> {
    text_result(right(args))
}

fn right(args: &[Value]) -> Result<String, CellError> {
    let n = args.get(1).map(to_count).transpose()?.unwrap_or(1);
    let text = args[0].as_text();
    let len = text.chars().count();
    Ok(text.chars().skip(len.saturating_sub(n)).collect())
}

/// MID(text, start_num, num_chars); `start_num` is 1-based
pub fn fn_mid(args: &[Value]) -> EvalResult<Value> {
    text_result(mid(args))
}

fn mid(args: &[Value]) -> Result<String, CellError> {
    let start = to_count(&args[1])?;
    if start == 0 {
        return Err(CellError::Value);
    }
    let n = to_count(&args[2])?;
    Ok(args[0].as_text().chars().skip(start - 1).take(n).collect())
}

/// EXACT(text1, text2)
pub fn fn_exact(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(args[0].as_text() == args[1].as_text()))
}

/// Longest text REPT will build, in characters
const MAX_TEXT_LEN: usize = 32_767;

/// REPT(text, number_times)
pub fn fn_rept(args: &[Value]) -> EvalResult<Value> {
    text_result(rept(args))
}

fn rept(args: &[Value]) -> Result<String, CellError> {
    let times = to_count(&args[1])?;
    let text = args[0].as_text();
    if text.chars().count().saturating_mul(times) > MAX_TEXT_LEN {
        return Err(CellError::Value);
    }
    Ok(text.repeat(times))
}
