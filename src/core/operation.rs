//! RC-004: Operation catalog.
//!
//! Operations are named callables registered once at startup and looked up
//! by name when a recipe is resolved. The catalog knows nothing about
//! recipes, trees or records.

use super::error::{Error, OpError, Result};
use super::types::{Arity, Value};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Modifier names the executor interprets itself.
pub const OMIT_ERR: &str = "omiterr";
pub const OMIT_NIL: &str = "omitnil";
pub const OMIT_EMPTY: &str = "omitempty";
pub const DEFAULT: &str = "default";
pub const POLICY: &str = "policy";

/// A named, arity-tagged callable.
pub trait Operation: Send + Sync {
    fn arity(&self) -> Arity;

    /// Run against the source values. Unary operations receive exactly one.
    fn execute(&self, options: &OpOptions, sources: &[Value]) -> Result<Value, OpError>;
}

/// Ordered modifier map attached to one operation reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpOptions {
    entries: IndexMap<String, Value>,
}

impl OpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// True when the modifier is present as boolean true.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.entries.get(name), Some(Value::Bool(true)))
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Unresolved operation request: a name plus its modifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRef {
    pub name: String,
    pub options: OpOptions,
}

impl OperationRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: OpOptions::new(),
        }
    }

    pub fn with_options(name: impl Into<String>, options: OpOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// Operation reference bound to its callable.
#[derive(Clone)]
pub struct ResolvedOperation {
    pub reference: OperationRef,
    pub operation: Arc<dyn Operation>,
}

impl ResolvedOperation {
    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn options(&self) -> &OpOptions {
        &self.reference.options
    }

    pub fn arity(&self) -> Arity {
        self.operation.arity()
    }

    pub fn execute(&self, sources: &[Value]) -> Result<Value, OpError> {
        self.operation.execute(&self.reference.options, sources)
    }
}

impl fmt::Debug for ResolvedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOperation")
            .field("name", &self.reference.name)
            .field("arity", &self.arity())
            .finish()
    }
}

/// Adapts a closure into an [`Operation`].
pub struct FnOperation<F> {
    arity: Arity,
    func: F,
}

impl<F> FnOperation<F>
where
    F: Fn(&OpOptions, &[Value]) -> Result<Value, OpError> + Send + Sync,
{
    pub fn new(arity: Arity, func: F) -> Self {
        Self { arity, func }
    }

    pub fn unary(func: F) -> Self {
        Self::new(Arity::Unary, func)
    }

    pub fn variadic(func: F) -> Self {
        Self::new(Arity::Variadic, func)
    }
}

impl<F> Operation for FnOperation<F>
where
    F: Fn(&OpOptions, &[Value]) -> Result<Value, OpError> + Send + Sync,
{
    fn arity(&self) -> Arity {
        self.arity
    }

    fn execute(&self, options: &OpOptions, sources: &[Value]) -> Result<Value, OpError> {
        (self.func)(options, sources)
    }
}

/// Name → operation registry shared across recipes.
#[derive(Default)]
pub struct OpRegistry {
    ops: RwLock<FxHashMap<String, Arc<dyn Operation>>>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `op` under `name`. A later registration replaces an earlier one.
    pub fn register(&self, name: impl Into<String>, op: Arc<dyn Operation>) {
        let name = name.into();
        let mut ops = self.ops.write().unwrap_or_else(PoisonError::into_inner);
        if ops.insert(name.clone(), op).is_some() {
            debug!(operation = %name, "replaced registered operation");
        }
    }

    /// Convenience for registering a closure.
    pub fn register_fn<F>(&self, name: impl Into<String>, arity: Arity, func: F)
    where
        F: Fn(&OpOptions, &[Value]) -> Result<Value, OpError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnOperation::new(arity, func)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.ops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Bind a reference to its registered operation. Arity is not checked here.
    pub fn resolve(&self, reference: &OperationRef) -> Result<ResolvedOperation> {
        let operation = self
            .get(&reference.name)
            .ok_or_else(|| Error::OperationNotFound(reference.name.clone()))?;
        Ok(ResolvedOperation {
            reference: reference.clone(),
            operation,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ops.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: &'static str) -> Arc<dyn Operation> {
        Arc::new(FnOperation::unary(move |_: &OpOptions, _: &[Value]| {
            Ok(Value::from(value))
        }))
    }

    #[test]
    fn test_rc004_register_and_resolve() {
        let registry = OpRegistry::new();
        registry.register("a", constant("A"));
        let resolved = registry.resolve(&OperationRef::new("a")).unwrap();
        assert_eq!(resolved.name(), "a");
        assert_eq!(resolved.arity(), Arity::Unary);
        assert_eq!(resolved.execute(&[Value::Null]).unwrap(), Value::from("A"));
    }

    #[test]
    fn test_rc004_resolve_unknown() {
        let registry = OpRegistry::new();
        let err = registry.resolve(&OperationRef::new("nope")).unwrap_err();
        assert!(matches!(err, Error::OperationNotFound(ref n) if n == "nope"));
    }

    #[test]
    fn test_rc004_last_writer_wins() {
        let registry = OpRegistry::new();
        registry.register("a", constant("first"));
        registry.register("a", constant("second"));
        assert_eq!(registry.len(), 1);
        let resolved = registry.resolve(&OperationRef::new("a")).unwrap();
        assert_eq!(resolved.execute(&[Value::Null]).unwrap(), Value::from("second"));
    }

    #[test]
    fn test_rc004_resolve_ignores_arity() {
        let registry = OpRegistry::new();
        registry.register_fn("sum", Arity::Variadic, |_, sources| {
            Ok(Value::Int(sources.iter().filter_map(Value::as_i64).sum()))
        });
        let resolved = registry.resolve(&OperationRef::new("sum")).unwrap();
        assert_eq!(resolved.arity(), Arity::Variadic);
        assert_eq!(
            resolved.execute(&[Value::Int(1), Value::Int(2)]).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_rc004_options_passed_through() {
        let registry = OpRegistry::new();
        registry.register_fn("prefix", Arity::Unary, |options, sources| {
            let prefix = options.text("with").unwrap_or("");
            Ok(Value::from(format!("{}{}", prefix, sources[0])))
        });
        let reference =
            OperationRef::with_options("prefix", OpOptions::new().with("with", "> "));
        let resolved = registry.resolve(&reference).unwrap();
        assert_eq!(resolved.execute(&["x".into()]).unwrap(), Value::from("> x"));
    }

    #[test]
    fn test_rc004_option_flags() {
        let options = OpOptions::new().with(OMIT_NIL, true).with(DEFAULT, "n/a");
        assert!(options.flag(OMIT_NIL));
        assert!(!options.flag(OMIT_ERR));
        assert!(!options.flag(DEFAULT));
        assert_eq!(options.text(DEFAULT), Some("n/a"));
        let keys: Vec<_> = options.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![OMIT_NIL, DEFAULT]);
    }

    #[test]
    fn test_rc004_names_sorted() {
        let registry = OpRegistry::new();
        registry.register("zeta", constant("z"));
        registry.register("alpha", constant("a"));
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
        assert!(registry.contains("alpha"));
        assert!(!registry.contains("beta"));
    }

    #[test]
    fn test_rc004_concurrent_registration() {
        let registry = Arc::new(OpRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.register(format!("op{}", i), constant("x"));
                    assert!(registry.contains(&format!("op{}", i)));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 8);
    }
}
