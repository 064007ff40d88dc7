//! Values and Containers
//!
//! Observed state is made of plain containers: identity-carrying maps from
//! field name to [`Value`]. A container knows nothing about tracking; the
//! [`Observed`](super::Observed) wrapper adds that on top.
//!
//! # Change Detection
//!
//! Writes only propagate when the new value differs from the old one under
//! [`SameValue`]. Unlike `PartialEq` on floats, `NaN` is the same as `NaN`
//! and `0.0` is not the same as `-0.0`. Containers compare by identity,
//! never by contents.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Error as _, Serialize, Serializer};

use crate::error::ReactiveError;

use super::observed::forget_wrapper;
use super::runtime::Runtime;

/// Identity-preserving equality used for change detection.
pub trait SameValue {
    /// Check whether `self` and `other` are the same value.
    fn same_value(&self, other: &Self) -> bool;
}

macro_rules! same_value_via_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SameValue for $ty {
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

same_value_via_eq!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, String, str,
);

impl SameValue for f64 {
    fn same_value(&self, other: &Self) -> bool {
        if self.is_nan() && other.is_nan() {
            return true;
        }
        self == other && self.is_sign_negative() == other.is_sign_negative()
    }
}

impl SameValue for f32 {
    fn same_value(&self, other: &Self) -> bool {
        f64::from(*self).same_value(&f64::from(*other))
    }
}

impl<T: SameValue + ?Sized> SameValue for &T {
    fn same_value(&self, other: &Self) -> bool {
        (**self).same_value(*other)
    }
}

impl<T: SameValue> SameValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: SameValue> SameValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }
}

impl<A: SameValue, B: SameValue> SameValue for (A, B) {
    fn same_value(&self, other: &Self) -> bool {
        self.0.same_value(&other.0) && self.1.same_value(&other.1)
    }
}

/// Shared pointers compare by identity.
impl<T: ?Sized> SameValue for Arc<T> {
    fn same_value(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

/// Unique identifier for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    /// Generate a new unique container ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A value stored in a container field.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent or empty. Missing fields read as `Null`.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// A nested container, shared by identity.
    Object(Container),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Value::Object(c) => Some(c),
            _ => None,
        }
    }

    /// Convert a JSON value. Arrays have no container representation.
    pub fn from_json(json: serde_json::Value) -> Result<Self, ReactiveError> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(_) => {
                return Err(ReactiveError::UnsupportedJson { kind: "array" })
            }
            serde_json::Value::Object(map) => {
                let container = Container::new();
                for (key, value) in map {
                    container.insert_raw(key, Value::from_json(value)?);
                }
                Value::Object(container)
            }
        })
    }

    /// Snapshot this value as JSON.
    ///
    /// Non-finite numbers become `null`. A container that contains itself
    /// is an error.
    pub fn to_json(&self) -> Result<serde_json::Value, ReactiveError> {
        self.to_json_inner(&mut HashSet::new())
    }

    fn to_json_inner(
        &self,
        visiting: &mut HashSet<ContainerId>,
    ) -> Result<serde_json::Value, ReactiveError> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Object(container) => {
                if !visiting.insert(container.id()) {
                    return Err(ReactiveError::Cycle {
                        container: container.id(),
                    });
                }
                let mut map = serde_json::Map::new();
                for (key, value) in container.entries() {
                    map.insert(key, value.to_json_inner(visiting)?);
                }
                visiting.remove(&container.id());
                serde_json::Value::Object(map)
            }
        })
    }
}

impl SameValue for Value {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.same_value(b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Container> for Value {
    fn from(container: Container) -> Self {
        Value::Object(container)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(json).map_err(serde::de::Error::custom)
    }
}

struct ContainerInner {
    id: ContainerId,
    fields: RwLock<IndexMap<String, Value>>,
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        Runtime::forget(self.id);
        forget_wrapper(self.id);
    }
}

/// A plain, untracked data container.
///
/// Clones share the same fields; identity is the allocation, so two
/// containers with equal contents are still different containers. Wrap
/// one with [`observe`](super::observe) to track reads and writes.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Create an empty container.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                id: ContainerId::new(),
                fields: RwLock::new(IndexMap::new()),
            }),
        }
    }

    /// Builder-style field insertion.
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert_raw(key, value);
        self
    }

    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    /// Read a field without tracking. Missing fields are `Null`.
    pub fn get_raw(&self, key: &str) -> Value {
        self.inner
            .fields
            .read()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Write a field without triggering. Returns the previous value.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.fields.write().insert(key.into(), value.into())
    }

    /// Remove a field without triggering.
    pub fn remove_raw(&self, key: &str) -> Option<Value> {
        self.inner.fields.write().shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.read().keys().cloned().collect()
    }

    /// Snapshot of every field, in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .fields
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Check whether both handles refer to the same container.
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Build a container from a JSON object.
    pub fn from_json(json: serde_json::Value) -> Result<Self, ReactiveError> {
        match Value::from_json(json)? {
            Value::Object(container) => Ok(container),
            _ => Err(ReactiveError::NotAContainer {
                path: "$".to_owned(),
            }),
        }
    }

    /// Parse a container from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ReactiveError> {
        Self::from_json(serde_json::from_str(text)?)
    }

    /// Snapshot the container as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, ReactiveError> {
        Value::Object(self.clone()).to_json()
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    // Contents are not printed: a container may contain itself.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id())
            .field("keys", &self.keys())
            .finish()
    }
}

impl Serialize for Container {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Container {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Container::from_json(json).map_err(serde::de::Error::custom)
    }
}
