//! Math functions

use super::{collect_numbers, FunctionOptions, FunctionRegistry};
use crate::error::EvalResult;
use crate::value::Value;
use gridcalc_core::CellError;

pub(crate) fn register(registry: &FunctionRegistry) {
    let range = |n| FunctionOptions::variadic(n).range_aware();

    registry.register_fn("SUM", range(1).describe("Adds its arguments"), fn_sum);
    registry.register_fn(
        "PRODUCT",
        range(1).describe("Multiplies its arguments"),
        fn_product,
    );
    registry.register_fn("ABS", FunctionOptions::fixed(1).describe("Absolute value"), fn_abs);
    registry.register_fn(
        "ROUND",
        FunctionOptions::fixed(1)
            .optional(1)
            .describe("Rounds a number to a given number of digits"),
        fn_round,
    );
    registry.register_fn(
        "INT",
        FunctionOptions::fixed(1).describe("Rounds down to the nearest integer"),
        fn_int,
    );
    registry.register_fn(
        "MOD",
        FunctionOptions::fixed(2).describe("Remainder after division"),
        fn_mod,
    );
    registry.register_fn("SQRT", FunctionOptions::fixed(1).describe("Square root"), fn_sqrt);
    registry.register_fn(
        "POWER",
        FunctionOptions::fixed(2).describe("Raises a number to a power"),
        fn_power,
    );
    registry.register_fn(
        "SIGN",
        FunctionOptions::fixed(1).describe("Sign of a number: 1, 0 or -1"),
        fn_sign,
    );
    registry.register_fn("EXP", FunctionOptions::fixed(1).describe("e raised to a power"), fn_exp);
    registry.register_fn("LN", FunctionOptions::fixed(1).describe("Natural logarithm"), fn_ln);
    registry.register_fn("PI", FunctionOptions::fixed(0).describe("The constant pi"), fn_pi);
}

/// A finite result, or `#NUM!`
pub(crate) fn finite(n: f64) -> Value {
    if n.is_finite() {
        Value::Number(n)
    } else {
        Value::Error(CellError::Num)
    }
}

/// Apply `f` to the single numeric argument
fn unary(args: &[Value], f: impl Fn(f64) -> Value) -> EvalResult<Value> {
    Ok(match args[0].to_number() {
        Ok(n) => f(n),
        Err(e) => Value::Error(e),
    })
}

/// Apply `f` to two numeric arguments
fn binary(args: &[Value], f: impl Fn(f64, f64) -> Value) -> EvalResult<Value> {
    let a = match args[0].to_number() {
        Ok(n) => n,
        Err(e) => return Ok(Value::Error(e)),
    };
    let b = match args[1].to_number() {
        Ok(n) => n,
        Err(e) => return Ok(Value::Error(e)),
    };
    Ok(f(a, b))
}

/// SUM(number1, [number2], ...)
pub fn fn_sum(args: &[Value]) -> EvalResult<Value> {
    Ok(match collect_numbers(args) {
        Ok(numbers) => finite(numbers.iter().sum()),
        Err(e) => Value::Error(e),
    })
}

/// PRODUCT(number1, [number2], ...)
pub fn fn_product(args: &[Value]) -> EvalResult<Value> {
    Ok(match collect_numbers(args) {
        Ok(numbers) if numbers.is_empty() => Value::Number(0.0),
        Ok(numbers) => finite(numbers.iter().product()),
        Err(e) => Value::Error(e),
    })
}

/// ABS(number)
pub fn fn_abs(args: &[Value]) -> EvalResult<Value> {
    unary(args, |n| Value::Number(n.abs()))
}

/// ROUND(number, [num_digits])
///
/// Halves round away from zero.
pub fn fn_round(args: &[Value]) -> EvalResult<Value> {
    let n = match args[0].to_number() {
        Ok(n) => n,
        Err(e) => return Ok(Value::Error(e)),
    };
    let digits = match args.get(1).map(Value::to_number).transpose() {
        Ok(d) => d.unwrap_or(0.0).trunc(),
        Err(e) => return Ok(Value::Error(e)),
    };
    if digits.abs() > 308.0 {
        return Ok(Value::Error(CellError::Num));
    }

    let factor = 10f64.powi(digits as i32);
    Ok(finite((n * factor).round() / factor))
}

/// INT(number)
pub fn fn_int(args: &[Value]) -> EvalResult<Value> {
    unary(args, |n| Value::Number(n.floor()))
}

/// MOD(number, divisor)
///
/// The result takes the sign of the divisor.
pub fn fn_mod(args: &[Value]) -> EvalResult<Value> {
    binary(args, |n, d| {
        if d == 0.0 {
            Value::Error(CellError::Div0)
        } else {
            finite(n - d * (n / d).floor())
        }
    })
}

/// SQRT(number)
pub fn fn_sqrt(args: &[Value]) -> EvalResult<Value> {
    unary(args, |n| {
        if n < 0.0 {
            Value::Error(CellError::Num)
        } else {
            Value::Number(n.sqrt())
        }
    })
}

/// POWER(number, power)
pub fn fn_power(args: &[Value]) -> EvalResult<Value> {
    binary(args, power)
}

/// Shared by `^` and POWER
pub(crate) fn power(base: f64, exp: f64) -> Value {
    if base == 0.0 && exp < 0.0 {
        return Value::Error(CellError::Div0);
    }
    finite(base.powf(exp))
}

/// SIGN(number)
pub fn fn_sign(args: &[Value]) -> EvalResult<Value> {
    unary(args, |n| {
        Value::Number(if n > 0.0 {
            1.0
        } else if n < 0.0 {
            -1.0
        } else {
            0.0
        })
    })
}

/// EXP(number)
pub fn fn_exp(args: &[Value]) -> EvalResult<Value> {
    unary(args, |n| finite(n.exp()))
}

/// LN(number)
pub fn fn_ln(args: &[Value]) -> EvalResult<Value> {
    unary(args, |n| {
        if n <= 0.0 {
            Value::Error(CellError::Num)
        } else {
            Value::Number(n.ln())
        }
    })
}

/// PI()
pub fn fn_pi(_args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Number(std::f64::consts::PI))
}
