//! Information functions

use super::{FunctionOptions, FunctionRegistry};
use crate::error::EvalResult;
use crate::value::Value;
use gridcalc_core::CellError;

pub(crate) fn register(registry: &FunctionRegistry) {
    let predicates: [(&str, &str, fn(&Value) -> bool); 7] = [
        ("ISBLANK", "TRUE if the value is a blank cell", |v| v.is_empty()),
        ("ISNUMBER", "TRUE if the value is a number", |v| {
            matches!(v, Value::Number(_))
        }),
        ("ISTEXT", "TRUE if the value is text", |v| matches!(v, Value::Text(_))),
        ("ISLOGICAL", "TRUE if the value is a boolean", |v| {
            matches!(v, Value::Boolean(_))
        }),
        ("ISERROR", "TRUE if the value is any error", Value::is_error),
        ("ISERR", "TRUE if the value is an error other than #N/A", |v| {
            v.error().map_or(false, |e| e != CellError::Na)
        }),
        ("ISNA", "TRUE if the value is #N/A", |v| v.error() == Some(CellError::Na)),
    ];

    for (name, description, predicate) in predicates {
        registry.register_fn(
            name,
            FunctionOptions::fixed(1).handles_errors().describe(description),
            move |args| Ok(Value::Boolean(predicate(&args[0]))),
        );
    }

    registry.register_fn(
        "NA",
        FunctionOptions::fixed(0).describe("The #N/A error value"),
        fn_na,
    );
}

/// NA()
pub fn fn_na(_args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Error(CellError::Na))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arg: Value) -> Value {
        let registry = FunctionRegistry::empty();
        register(&registry);
        match registry.resolve(name).map(|spec| spec.implementation.clone()) {
            Some(crate::functions::FunctionImpl::Sync(f)) => (f.as_ref())(&[arg]).unwrap(),
            other => panic!("{name} not registered as sync: {:?}", other),
        }
    }

    #[test]
    fn test_type_predicates() {
        assert_eq!(call("ISBLANK", Value::Empty), Value::Boolean(true));
        assert_eq!(call("ISBLANK", Value::from("")), Value::Boolean(false));
        assert_eq!(call("ISNUMBER", Value::Number(1.0)), Value::Boolean(true));
        assert_eq!(call("ISNUMBER", Value::from("1")), Value::Boolean(false));
        assert_eq!(call("ISTEXT", Value::from("1")), Value::Boolean(true));
        assert_eq!(call("ISLOGICAL", Value::Boolean(false)), Value::Boolean(true));
    }

    #[test]
    fn test_error_predicates() {
        let na = Value::Error(CellError::Na);
        let div0 = Value::Error(CellError::Div0);
        assert_eq!(call("ISERROR", na.clone()), Value::Boolean(true));
        assert_eq!(call("ISERR", na.clone()), Value::Boolean(false));
        assert_eq!(call("ISERR", div0.clone()), Value::Boolean(true));
        assert_eq!(call("ISNA", na), Value::Boolean(true));
        assert_eq!(call("ISNA", div0), Value::Boolean(false));
        assert_eq!(fn_na(&[]).unwrap(), Value::Error(CellError::Na));
    }
}
