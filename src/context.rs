//! Ambient per-fiber state.
//!
//! Every fiber carries a [`Context`]: a string-keyed map of [`Value`]s that
//! is installed when a task starts and stays visible across suspension
//! points. Contexts are handed between fibers only by
//! [`Context::shallow_clone`], never by reference, so independently resumed
//! fibers cannot race on ambient state.
//!
//! # Shallow-clone semantics
//!
//! `shallow_clone` copies one level deep:
//!
//! - primitives are copied by value
//! - a list entry becomes a new top-level list whose elements still share
//!   their own nested allocations
//! - a map entry becomes a new top-level map whose values still share their
//!   own nested allocations
//!
//! The clone therefore never aliases a *top-level* entry with its source,
//! which is exactly the independence the pool's context handoff relies on.
//! [`Value::shares_identity`] makes the distinction observable in tests.
//!
//! # Invariants
//!
//! 1. An installed context is owned exclusively by its fiber.
//! 2. No code outside a fiber mutates that fiber's context while it is
//!    active; [`set`] affects only the calling fiber's own context.
//! 3. `shallow_clone` never aliases top-level entries between source and
//!    clone.

use crate::error::{Error, ErrorKind};
use crate::fiber;
use crate::promise::Promise;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A value that can travel through tasks, promises, and contexts.
///
/// List and map payloads are `Arc`-backed: `Clone` is cheap and shares the
/// allocation, which is what gives [`Context::shallow_clone`] its one-level
/// copy semantics.
#[derive(Clone, Debug)]
pub enum Value {
    /// The absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// An immutable string.
    Text(Arc<str>),
    /// An ordered list of values.
    List(Arc<Vec<Value>>),
    /// A string-keyed map of values.
    Map(Arc<BTreeMap<String, Value>>),
    /// A promise; settles independently of where the value travels.
    Promise(Promise),
}

impl Value {
    /// Builds a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Arc::from(s.into()))
    }

    /// Builds a list value.
    #[must_use]
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Arc::new(items))
    }

    /// Builds a map value.
    #[must_use]
    pub fn map(entries: BTreeMap<String, Value>) -> Self {
        Self::Map(Arc::new(entries))
    }

    /// Returns the boolean payload, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the float payload, if this is a `Float`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a `Text`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list payload, if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map payload, if this is a `Map`.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Returns the promise payload, if this is a `Promise`.
    #[must_use]
    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Self::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Returns `true` if this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` when both values share the same heap allocation.
    ///
    /// Primitives never share identity; text, list, map, and promise values
    /// share identity exactly when their `Arc`s point at the same object.
    #[must_use]
    pub fn shares_identity(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Arc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Arc::ptr_eq(a, b),
            (Self::Promise(a), Self::Promise(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Copies this value one level deep.
    ///
    /// Lists and maps get a fresh top-level allocation whose elements are
    /// plain clones (sharing *their* nested allocations); everything else is
    /// a plain clone.
    #[must_use]
    pub fn shallow_clone(&self) -> Self {
        match self {
            Self::List(items) => Self::List(Arc::new(items.as_ref().clone())),
            Self::Map(entries) => Self::Map(Arc::new(entries.as_ref().clone())),
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Promise(a), Self::Promise(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::list(items)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Self::Promise(p)
    }
}

/// A fiber's ambient key/value state.
///
/// Deliberately not `Clone`: the only duplication operation is
/// [`Context::shallow_clone`], so every handoff goes through the one-level
/// copy the pool's isolation guarantees depend on.
#[derive(Debug, Default)]
pub struct Context {
    entries: BTreeMap<String, Value>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Stores `value` under `key`, returning the previous value if any.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Removes the entry under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the context holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copies the context one level deep.
    ///
    /// Every top-level entry is [`Value::shallow_clone`]d: new top-level
    /// containers, shared nested allocations, primitives by value.
    #[must_use]
    pub fn shallow_clone(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.shallow_clone()))
                .collect(),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({} entries)", self.entries.len())
    }
}

/// Reads `key` from the current fiber's context.
///
/// Returns `None` when no fiber is running or the key is absent.
#[must_use]
pub fn get(key: &str) -> Option<Value> {
    fiber::with_active_context(|ctx| ctx.get(key).cloned()).flatten()
}

/// Writes `key` into the current fiber's context.
///
/// # Errors
///
/// Returns [`ErrorKind::NoActiveFiber`] when called outside a running fiber.
pub fn set(key: impl Into<String>, value: Value) -> Result<(), Error> {
    fiber::with_active_context(|ctx| {
        ctx.set(key, value);
    })
    .ok_or(Error::new(ErrorKind::NoActiveFiber))
}

/// Shallow-clones the current fiber's context.
///
/// Returns `None` when no fiber is running. This is the snapshot operation
/// the pool and the bridge use to carry ambient state forward.
#[must_use]
pub fn snapshot() -> Option<Context> {
    fiber::with_active_context(|ctx| ctx.shallow_clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_nested() -> (Value, Value) {
        let inner = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let outer = Value::list(vec![inner.clone(), Value::text("tail")]);
        (outer, inner)
    }

    #[test]
    fn shallow_clone_copies_top_level_list() {
        let (outer, _) = sample_nested();
        let copy = outer.shallow_clone();
        assert_eq!(outer, copy);
        assert!(!outer.shares_identity(&copy));
    }

    #[test]
    fn shallow_clone_shares_nested_allocations() {
        let (outer, inner) = sample_nested();
        let copy = outer.shallow_clone();
        let copied_inner = &copy.as_list().unwrap()[0];
        assert!(inner.shares_identity(copied_inner));
    }

    #[test]
    fn shallow_clone_copies_primitives_by_value() {
        let v = Value::Int(7);
        let c = v.shallow_clone();
        assert_eq!(v, c);
        assert!(!v.shares_identity(&c));
    }

    #[test]
    fn context_shallow_clone_never_aliases_top_level_entries() {
        let mut ctx = Context::new();
        ctx.set("nums", Value::list(vec![Value::Int(1)]));
        ctx.set("flag", Value::Bool(true));
        let copy = ctx.shallow_clone();

        let original = ctx.get("nums").unwrap();
        let cloned = copy.get("nums").unwrap();
        assert_eq!(original, cloned);
        assert!(!original.shares_identity(cloned));
        assert_eq!(copy.get("flag"), Some(&Value::Bool(true)));
    }

    #[test]
    fn context_set_replaces_and_returns_previous() {
        let mut ctx = Context::new();
        assert!(ctx.set("k", Value::Int(1)).is_none());
        assert_eq!(ctx.set("k", Value::Int(2)), Some(Value::Int(1)));
        assert_eq!(ctx.get("k"), Some(&Value::Int(2)));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn ambient_accessors_outside_fiber() {
        assert!(get("anything").is_none());
        assert!(snapshot().is_none());
        let err = set("k", Value::Int(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActiveFiber);
    }

    #[test]
    fn value_conversions() {
        assert_eq!(Value::from(3_i64).as_int(), Some(3));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert!(Value::Null.is_null());
        let list = Value::from(vec![Value::Int(1)]);
        assert_eq!(list.as_list().map(<[Value]>::len), Some(1));
    }
}
