//! Statistical functions

use super::{collect_numbers, FunctionOptions, FunctionRegistry};
use crate::error::EvalResult;
use crate::value::Value;
use gridcalc_core::CellError;

pub(crate) fn register(registry: &FunctionRegistry) {
    let range = |n| FunctionOptions::variadic(n).range_aware();

    registry.register_fn(
        "AVERAGE",
        range(1).describe("Arithmetic mean of its arguments"),
        fn_average,
    );
    registry.register_fn("MIN", range(1).describe("Smallest number"), fn_min);
    registry.register_fn("MAX", range(1).describe("Largest number"), fn_max);
    registry.register_fn(
        "MEDIAN",
        range(1).describe("Middle value of the numbers"),
        fn_median,
    );

    // Counting never fails on error cells, it just looks at them
    registry.register_fn(
        "COUNT",
        range(1).handles_errors().describe("Counts numbers"),
        fn_count,
    );
    registry.register_fn(
        "COUNTA",
        range(1).handles_errors().describe("Counts non-blank values"),
        fn_counta,
    );
    registry.register_fn(
        "COUNTBLANK",
        FunctionOptions::fixed(1)
            .range_aware()
            .handles_errors()
            .describe("Counts blank cells in a range"),
        fn_countblank,
    );
}

/// AVERAGE(number1, [number2], ...)
pub fn fn_average(args: &[Value]) -> EvalResult<Value> {
    Ok(match collect_numbers(args) {
        Ok(numbers) if numbers.is_empty() => Value::Error(CellError::Div0),
        Ok(numbers) => Value::Number(numbers.iter().sum::<f64>() / numbers.len() as f64),
        Err(e) => Value::Error(e),
    })
}

/// MIN(number1, [number2], ...); 0 when there are no numbers
pub fn fn_min(args: &[Value]) -> EvalResult<Value> {
    Ok(match collect_numbers(args) {
        Ok(numbers) => Value::Number(numbers.into_iter().reduce(f64::min).unwrap_or(0.0)),
        Err(e) => Value::Error(e),
    })
}

/// MAX(number1, [number2], ...); 0 when there are no numbers
pub fn fn_max(args: &[Value]) -> EvalResult<Value> {
    Ok(match collect_numbers(args) {
        Ok(numbers) => Value::Number(numbers.into_iter().reduce(f64::max).unwrap_or(0.0)),
        Err(e) => Value::Error(e),
    })
}

/// MEDIAN(number1, [number2], ...)
pub fn fn_median(args: &[Value]) -> EvalResult<Value> {
    let mut numbers = match collect_numbers(args) {
        Ok(numbers) if numbers.is_empty() => return Ok(Value::Error(CellError::Num)),
        Ok(numbers) => numbers,
        Err(e) => return Ok(Value::Error(e)),
    };
    numbers.sort_by(f64::total_cmp);

    let mid = numbers.len() / 2;
    let median = if numbers.len() % 2 == 0 {
        (numbers[mid - 1] + numbers[mid]) / 2.0
    } else {
        numbers[mid]
    };
    Ok(Value::Number(median))
}

/// COUNT(value1, [value2], ...)
///
/// Inside ranges only numbers count; a scalar argument counts when it
/// coerces to a number.
pub fn fn_count(args: &[Value]) -> EvalResult<Value> {
    let count = args
        .iter()
        .map(|arg| match arg {
            Value::Array(_) => arg.flatten().filter(|v| matches!(v, Value::Number(_))).count(),
            Value::Empty | Value::Error(_) => 0,
            v => usize::from(v.as_number().is_some()),
        })
        .sum::<usize>();
    Ok(Value::Number(count as f64))
}

/// COUNTA(value1, [value2], ...)
pub fn fn_counta(args: &[Value]) -> EvalResult<Value> {
    let count = args
        .iter()
        .flat_map(Value::flatten)
        .filter(|v| !v.is_empty())
        .count();
    Ok(Value::Number(count as f64))
}

/// COUNTBLANK(range); empty text counts as blank
pub fn fn_countblank(args: &[Value]) -> EvalResult<Value> {
    let count = args[0]
        .flatten()
        .filter(|v| match v {
            Value::Empty => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        })
        .count();
    Ok(Value::Number(count as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn n(v: f64) -> Value {
        Value::Number(v)
    }

    fn range() -> Value {
        Value::Array(vec![
            vec![n(4.0), Value::from("label"), Value::Empty],
            vec![n(1.0), Value::Error(CellError::Na), n(7.0)],
        ])
    }

    #[test]
    fn test_average_and_median() {
        assert_eq!(fn_average(&[n(1.0), n(2.0), n(6.0)]).unwrap(), n(3.0));
        assert_eq!(fn_average(&[Value::Array(vec![vec![Value::Empty]])]).unwrap(), Value::Error(CellError::Div0));
        assert_eq!(fn_median(&[n(5.0), n(1.0), n(3.0), n(2.0)]).unwrap(), n(2.5));
        assert_eq!(fn_median(&[n(9.0), n(1.0), n(3.0)]).unwrap(), n(3.0));
    }

    #[test]
    fn test_min_max() {
        assert_eq!(fn_min(&[n(3.0), n(-2.0)]).unwrap(), n(-2.0));
        assert_eq!(fn_max(&[Value::Array(vec![vec![Value::from("a")]])]).unwrap(), n(0.0));
    }

    #[test]
    fn test_counting_sees_errors_without_failing() {
        assert_eq!(fn_count(&[range()]).unwrap(), n(3.0));
        assert_eq!(fn_counta(&[range()]).unwrap(), n(5.0));
        assert_eq!(fn_countblank(&[range()]).unwrap(), n(1.0));
        assert_eq!(fn_count(&[Value::from("12"), Value::from("x")]).unwrap(), n(1.0));
    }
}
