//! Logical functions

use super::{FunctionOptions, FunctionRegistry};
use crate::error::EvalResult;
use crate::value::Value;
use gridcalc_core::CellError;

pub(crate) fn register(registry: &FunctionRegistry) {
    // IF sees errors so that only the branch it picks can fail the cell
    registry.register_fn(
        "IF",
        FunctionOptions::fixed(2)
            .optional(1)
            .handles_errors()
            .describe("Chooses between two values by a condition"),
        fn_if,
    );
    registry.register_fn(
        "AND",
        FunctionOptions::variadic(1)
            .range_aware()
            .describe("TRUE if every argument is TRUE"),
        fn_and,
    );
    registry.register_fn(
        "OR",
        FunctionOptions::variadic(1)
            .range_aware()
            .describe("TRUE if any argument is TRUE"),
        fn_or,
    );
    registry.register_fn(
        "XOR",
        FunctionOptions::variadic(1)
            .range_aware()
            .describe("TRUE if an odd number of arguments are TRUE"),
        fn_xor,
    );
    registry.register_fn("NOT", FunctionOptions::fixed(1).describe("Logical negation"), fn_not);
    registry.register_fn("TRUE", FunctionOptions::fixed(0).describe("The value TRUE"), |_| {
        Ok(Value::Boolean(true))
    });
    registry.register_fn("FALSE", FunctionOptions::fixed(0).describe("The value FALSE"), |_| {
        Ok(Value::Boolean(false))
    });
    registry.register_fn(
        "IFERROR",
        FunctionOptions::fixed(2)
            .handles_errors()
            .describe("A fallback value when the first argument is an error"),
        fn_iferror,
    );
    registry.register_fn(
        "IFNA",
        FunctionOptions::fixed(2)
            .handles_errors()
            .describe("A fallback value when the first argument is #N/A"),
        fn_ifna,
    );
}

/// IF(condition, value_if_true, [value_if_false])
pub fn fn_if(args: &[Value]) -> EvalResult<Value> {
    let condition = match args[0].to_bool() {
        Ok(b) => b,
        Err(e) => return Ok(Value::Error(e)),
    };

    if condition {
        Ok(args[1].clone())
    } else {
        Ok(args.get(2).cloned().unwrap_or(Value::Boolean(false)))
    }
}

/// Collect the logical values of the arguments
///
/// Text and blanks inside ranges are skipped; a scalar that is not logical is
/// `#VALUE!`. No logical values at all is also `#VALUE!`.
fn collect_bools(args: &[Value]) -> Result<Vec<bool>, CellError> {
    let mut bools = Vec::new();
    for arg in args {
        match arg {
            Value::Array(_) => {
                for v in arg.flatten() {
                    match v {
                        Value::Boolean(b) => bools.push(*b),
                        Value::Number(n) => bools.push(*n != 0.0),
                        Value::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
            Value::Empty => {}
            v => bools.push(v.to_bool()?),
        }
    }
    if bools.is_empty() {
        return Err(CellError::Value);
    }
    Ok(bools)
}

/// AND(logical1, [logical2], ...)
pub fn fn_and(args: &[Value]) -> EvalResult<Value> {
    Ok(match collect_bools(args) {
        Ok(bools) => Value::Boolean(bools.into_iter().all(|b| b)),
        Err(e) => Value::Error(e),
    })
}

/// OR(logical1, [logical2], ...)
pub fn fn_or(args: &[Value]) -> EvalResult<Value> {
    Ok(match collect_bools(args) {
        Ok(bools) => Value::Boolean(bools.into_iter().any(|b| b)),
        Err(e) => Value::Error(e),
    })
}

/// XOR(logical1, [logical2], ...)
pub fn fn_xor(args: &[Value]) -> EvalResult<Value> {
    Ok(match collect_bools(args) {
        Ok(bools) => Value::Boolean(bools.into_iter().filter(|b| *b).count() % 2 == 1),
        Err(e) => Value::Error(e),
    })
}

/// NOT(logical)
pub fn fn_not(args: &[Value]) -> EvalResult<Value> {
    Ok(match args[0].to_bool() {
        Ok(b) => Value::Boolean(!b),
        Err(e) => Value::Error(e),
    })
}

/// IFERROR(value, value_if_error)
pub fn fn_iferror(args: &[Value]) -> EvalResult<Value> {
    if args[0].is_error() {
        Ok(args[1].clone())
    } else {
        Ok(args[0].clone())
    }
}

/// IFNA(value, value_if_na)
pub fn fn_ifna(args: &[Value]) -> EvalResult<Value> {
    if args[0].error() == Some(CellError::Na) {
        Ok(args[1].clone())
    } else {
        Ok(args[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_if_only_fails_on_chosen_branch() {
        let div0 = Value::Error(CellError::Div0);
        assert_eq!(
            fn_if(&[Value::Boolean(true), Value::Number(1.0), div0.clone()]).unwrap(),
            Value::Number(1.0)
        );
        assert_eq!(
            fn_if(&[Value::Number(0.0), Value::Number(1.0), div0.clone()]).unwrap(),
            div0
        );
        assert_eq!(
            fn_if(&[Value::Number(0.0), Value::Number(1.0)]).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            fn_if(&[Value::from("maybe"), Value::Number(1.0)]).unwrap(),
            Value::Error(CellError::Value)
        );
    }

    #[test]
    fn test_and_or_xor() {
        let range = Value::Array(vec![vec![Value::Boolean(true), Value::from("x"), Value::Number(1.0)]]);
        assert_eq!(fn_and(&[range.clone()]).unwrap(), Value::Boolean(true));
        assert_eq!(
            fn_and(&[range.clone(), Value::Boolean(false)]).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(fn_or(&[Value::Number(0.0)]).unwrap(), Value::Boolean(false));
        assert_eq!(fn_xor(&[range]).unwrap(), Value::Boolean(false));
        assert_eq!(
            fn_and(&[Value::Array(vec![vec![Value::from("x")]])]).unwrap(),
            Value::Error(CellError::Value)
        );
    }

    #[test]
    fn test_error_fallbacks() {
        let na = Value::Error(CellError::Na);
        let ref_err = Value::Error(CellError::Ref);
        assert_eq!(fn_iferror(&[ref_err.clone(), Value::Number(0.0)]).unwrap(), Value::Number(0.0));
        assert_eq!(fn_ifna(&[na, Value::Number(0.0)]).unwrap(), Value::Number(0.0));
        assert_eq!(fn_ifna(&[ref_err.clone(), Value::Number(0.0)]).unwrap(), ref_err);
    }
}
