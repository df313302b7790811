//! Function registry and built-in functions
//!
//! The registry is an owned, shareable instance: built-ins are bootstrapped by
//! [`FunctionRegistry::new`], and host code or plugins add more at any time
//! through [`FunctionRegistry::register`]. The evaluator resolves names on
//! every call, so a late registration takes effect on the next evaluation.

pub mod info;
pub mod logical;
pub mod math;
pub mod statistical;
pub mod text;

use crate::error::EvalResult;
use crate::value::Value;
use ahash::AHashMap;
use futures::future::BoxFuture;
use gridcalc_core::CellError;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Synchronous implementation signature
pub type SyncFn = dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync;

/// Asynchronous implementation signature; the future owns its arguments
pub type AsyncFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, EvalResult<Value>> + Send + Sync;

/// A function implementation handle
#[derive(Clone)]
pub enum FunctionImpl {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl FunctionImpl {
    /// Wrap a plain function or closure
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        FunctionImpl::Sync(Arc::new(f))
    }

    /// Wrap a closure that returns a future
    ///
    /// # Example
    /// ```rust
    /// use futures::FutureExt;
    /// use gridcalc_formula::functions::FunctionImpl;
    /// use gridcalc_formula::{EvalError, Value};
    ///
    /// let quote = FunctionImpl::from_async(|args: Vec<Value>| {
    ///     async move { Ok::<_, EvalError>(args.into_iter().next().unwrap_or(Value::Empty)) }.boxed()
    /// });
    /// assert!(quote.is_async());
    /// ```
    pub fn from_async<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, EvalResult<Value>> + Send + Sync + 'static,
    {
        FunctionImpl::Async(Arc::new(f))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, FunctionImpl::Async(_))
    }
}

impl fmt::Debug for FunctionImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionImpl::Sync(_) => f.write_str("FunctionImpl::Sync"),
            FunctionImpl::Async(_) => f.write_str("FunctionImpl::Async"),
        }
    }
}

/// Registration options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionOptions {
    /// Required arguments
    pub arg_count: usize,
    /// Additional optional arguments (ignored when `variadic`)
    pub optional_args: usize,
    /// Accepts any number of arguments after the required ones
    pub variadic: bool,
    /// Range arguments arrive as arrays instead of their top-left element
    pub range_aware: bool,
    /// Error arguments are passed in rather than short-circuiting the call
    pub handles_errors: bool,
    /// One-line description for catalogs and autocomplete
    pub description: String,
}

impl FunctionOptions {
    /// Exactly `n` arguments
    pub fn fixed(n: usize) -> Self {
        Self {
            arg_count: n,
            ..Default::default()
        }
    }

    /// At least `n` arguments
    pub fn variadic(n: usize) -> Self {
        Self {
            arg_count: n,
            variadic: true,
            ..Default::default()
        }
    }

    pub fn optional(mut self, n: usize) -> Self {
        self.optional_args = n;
        self
    }

    pub fn range_aware(mut self) -> Self {
        self.range_aware = true;
        self
    }

    pub fn handles_errors(mut self) -> Self {
        self.handles_errors = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Largest accepted argument count, `None` when unlimited
    pub fn max_args(&self) -> Option<usize> {
        if self.variadic {
            None
        } else {
            Some(self.arg_count + self.optional_args)
        }
    }

    /// Check an argument count against this signature
    pub fn accepts(&self, n: usize) -> bool {
        n >= self.arg_count && self.max_args().map_or(true, |max| n <= max)
    }
}

/// A registered function
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    /// Name as given at registration (lookup ignores case)
    pub name: String,
    pub options: FunctionOptions,
    pub implementation: FunctionImpl,
}

impl FunctionSpec {
    pub fn is_async(&self) -> bool {
        self.implementation.is_async()
    }
}

/// Catalog entry for UI introspection
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionInfo {
    pub name: String,
    pub arg_count: usize,
    pub max_args: Option<usize>,
    pub variadic: bool,
    pub is_async: bool,
    pub description: String,
}

impl From<&FunctionSpec> for FunctionInfo {
    fn from(spec: &FunctionSpec) -> Self {
        Self {
            name: spec.name.clone(),
            arg_count: spec.options.arg_count,
            max_args: spec.options.max_args(),
            variadic: spec.options.variadic,
            is_async: spec.is_async(),
            description: spec.options.description.clone(),
        }
    }
}

/// Function registry
pub struct FunctionRegistry {
    functions: RwLock<AHashMap<String, Arc<FunctionSpec>>>,
    version: AtomicU64,
}

impl FunctionRegistry {
    /// Create a new registry with all built-in functions
    pub fn new() -> Self {
        let registry = Self::empty();
        math::register(&registry);
        statistical::register(&registry);
        logical::register(&registry);
        text::register(&registry);
        info::register(&registry);
        registry
    }

    /// Create a registry with no functions at all
    pub fn empty() -> Self {
        Self {
            functions: RwLock::new(AHashMap::new()),
            version: AtomicU64::new(0),
        }
    }

    /// Register a function, replacing any existing one with the same name
    pub fn register(&self, name: &str, implementation: FunctionImpl, options: FunctionOptions) {
        let key = name.to_ascii_uppercase();
        let spec = Arc::new(FunctionSpec {
            name: name.to_string(),
            options,
            implementation,
        });
        let previous = self.functions.write().insert(key, spec);
        if previous.is_some() {
            tracing::warn!(function = name, "function re-registered; previous definition replaced");
        }
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Shorthand for registering a synchronous function
    pub fn register_fn<F>(&self, name: &str, options: FunctionOptions, f: F)
    where
        F: Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.register(name, FunctionImpl::sync(f), options);
    }

    /// Look up a function by name (case-insensitive)
    pub fn resolve(&self, name: &str) -> Option<Arc<FunctionSpec>> {
        self.functions.read().get(&name.to_ascii_uppercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().contains_key(&name.to_ascii_uppercase())
    }

    /// Every registered function, sorted by name
    pub fn catalog(&self) -> Vec<FunctionInfo> {
        let mut infos: Vec<FunctionInfo> = self
            .functions
            .read()
            .values()
            .map(|spec| FunctionInfo::from(spec.as_ref()))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Bumped by every registration
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.len())
            .field("version", &self.version())
            .finish()
    }
}

/// Collect every number in the arguments, skipping text, booleans and blanks
/// inside ranges; the first error met is returned instead
pub(crate) fn collect_numbers(args: &[Value]) -> Result<Vec<f64>, CellError> {
    let mut numbers = Vec::new();
    for arg in args {
        match arg {
            Value::Array(_) => {
                for v in arg.flatten() {
                    match v {
                        Value::Number(n) => numbers.push(*n),
                        Value::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
            // A scalar argument typed directly into the call is coerced
            Value::Empty => {}
            v => numbers.push(v.to_number()?),
        }
    }
    Ok(numbers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtins_are_bootstrapped() {
        let registry = FunctionRegistry::new();
        for name in ["SUM", "IF", "CONCATENATE", "ISBLANK", "MEDIAN"] {
            assert!(registry.contains(name), "{name} missing");
        }
        assert!(FunctionRegistry::empty().is_empty());
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_case_preserving() {
        let registry = FunctionRegistry::empty();
        registry.register_fn("Double", FunctionOptions::fixed(1), |args| {
            Ok(Value::from(args[0].to_number().map(|n| n * 2.0)))
        });
        let spec = registry.resolve("DOUBLE").unwrap();
        assert_eq!(spec.name, "Double");
        assert!(registry.resolve("double").is_some());
        assert!(registry.resolve("TRIPLE").is_none());
    }

    #[test]
    fn test_reregistering_overwrites_and_bumps_version() {
        let registry = FunctionRegistry::empty();
        let v0 = registry.version();
        registry.register_fn("F", FunctionOptions::fixed(0), |_| Ok(Value::Number(1.0)));
        registry.register_fn("f", FunctionOptions::fixed(0).describe("second"), |_| {
            Ok(Value::Number(2.0))
        });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.version(), v0 + 2);
        assert_eq!(registry.catalog()[0].description, "second");
    }

    #[test]
    fn test_arity_checks() {
        let opts = FunctionOptions::fixed(1).optional(1);
        assert!(!opts.accepts(0));
        assert!(opts.accepts(2));
        assert!(!opts.accepts(3));
        assert!(FunctionOptions::variadic(1).accepts(100));
    }

    #[test]
    fn test_catalog_is_sorted() {
        let catalog = FunctionRegistry::new().catalog();
        let names: Vec<_> = catalog.iter().map(|f| f.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(catalog.iter().all(|f| !f.is_async));
    }
}
