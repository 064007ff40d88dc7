//! Observed Containers
//!
//! [`Observed`] is the tracking view of a plain [`Container`]. Reading a
//! field through it records the running computation as a dependent of that
//! field; writing a field through it re-runs those computations when the
//! value actually changed.
//!
//! # Deep Observation
//!
//! Nested containers are wrapped lazily, on read. Nothing is wrapped up
//! front, so replacing `outer` with a fresh container and then mutating the
//! fresh container is tracked the same way as the first one.
//!
//! # Wrapper Identity
//!
//! Wrappers are cached per container, so observing one container twice
//! yields the same wrapper, and observing a wrapper returns it unchanged.
//! The cache holds wrappers weakly and is keyed by container id.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::ReactiveError;

use super::runtime::Runtime;
use super::value::{Container, ContainerId, SameValue, Value};

static WRAPPERS: OnceLock<DashMap<ContainerId, Weak<ObservedInner>>> = OnceLock::new();

fn get_wrappers() -> &'static DashMap<ContainerId, Weak<ObservedInner>> {
    WRAPPERS.get_or_init(DashMap::new)
}

/// Remove the cache slot of `container` if its wrapper is gone.
pub(crate) fn forget_wrapper(container: ContainerId) {
    get_wrappers().remove_if(&container, |_, wrapper| wrapper.strong_count() == 0);
}

struct ObservedInner {
    container: Container,
}

impl Drop for ObservedInner {
    fn drop(&mut self) {
        forget_wrapper(self.container.id());
    }
}

/// A tracking view of a container.
///
/// Clones are the same wrapper. Compare wrappers with [`Observed::ptr_eq`].
#[derive(Clone)]
pub struct Observed {
    inner: Arc<ObservedInner>,
}

/// Something that can be turned into an [`Observed`] wrapper.
pub trait IntoObserved {
    fn into_observed(self) -> Observed;
}

impl IntoObserved for Container {
    fn into_observed(self) -> Observed {
        Observed::new(self)
    }
}

impl IntoObserved for &Container {
    fn into_observed(self) -> Observed {
        Observed::new(self.clone())
    }
}

impl IntoObserved for Observed {
    fn into_observed(self) -> Observed {
        self
    }
}

impl IntoObserved for &Observed {
    fn into_observed(self) -> Observed {
        self.clone()
    }
}

/// Wrap `target` for deep observation.
///
/// Idempotent: wrapping an [`Observed`] returns it, and wrapping the same
/// container twice returns the same wrapper.
pub fn observe(target: impl IntoObserved) -> Observed {
    target.into_observed()
}

impl Observed {
    /// Get the cached wrapper for `container`, creating it if needed.
    pub fn new(container: Container) -> Self {
        // No strong wrapper may be dropped while the cache slot is locked:
        // its `Drop` goes back to the cache.
        let inner = match get_wrappers().entry(container.id()) {
            Entry::Occupied(mut slot) => match slot.get().upgrade() {
                Some(inner) => inner,
                None => {
                    let inner = Arc::new(ObservedInner { container });
                    slot.insert(Arc::downgrade(&inner));
                    inner
                }
            },
            Entry::Vacant(slot) => {
                let inner = Arc::new(ObservedInner { container });
                slot.insert(Arc::downgrade(&inner));
                inner
            }
        };

        Self { inner }
    }

    /// Wrap a container built from a JSON object.
    pub fn from_json(json: serde_json::Value) -> Result<Self, ReactiveError> {
        Ok(Self::new(Container::from_json(json)?))
    }

    /// The underlying container. Reads and writes through it are untracked.
    pub fn raw(&self) -> &Container {
        &self.inner.container
    }

    pub fn id(&self) -> ContainerId {
        self.inner.container.id()
    }

    /// Read `field`, recording the running computation as a dependent.
    ///
    /// Container-valued fields come back wrapped.
    pub fn get(&self, field: &str) -> Field {
        let raw = self.raw().get_raw(field);
        Runtime::track(self.id(), field);

        match raw {
            Value::Object(container) => Field::Observed(Observed::new(container)),
            value => Field::Value(value),
        }
    }

    /// Check whether `field` is present. Tracked like a read of `field`.
    pub fn has(&self, field: &str) -> bool {
        let present = self.raw().contains_key(field);
        Runtime::track(self.id(), field);
        present
    }

    /// Write `field`, notifying dependents if the value changed.
    ///
    /// Observed containers are stored as their raw container.
    pub fn set(&self, field: &str, value: impl Into<Value>) {
        let value = value.into();
        let old = self.raw().insert_raw(field, value.clone()).unwrap_or_default();

        if !old.same_value(&value) {
            Runtime::trigger(self.id(), field);
        }
    }

    /// Write `field` from its current value.
    ///
    /// The read is not tracked, so a computation may update a field without
    /// depending on it.
    pub fn update<V, F>(&self, field: &str, f: F)
    where
        V: Into<Value>,
        F: FnOnce(Value) -> V,
    {
        let current = self.raw().get_raw(field);
        self.set(field, f(current));
    }

    /// Remove `field`, notifying dependents if it was present.
    pub fn remove(&self, field: &str) -> Option<Value> {
        let removed = self.raw().remove_raw(field);
        if removed.is_some() {
            Runtime::trigger(self.id(), field);
        }
        removed
    }

    /// Read a dotted path such as `"outer.inner"`, tracking every hop.
    pub fn path(&self, path: &str) -> Result<Field, ReactiveError> {
        if path.is_empty() {
            return Err(ReactiveError::EmptyPath);
        }

        let mut current = Field::Observed(self.clone());
        let mut walked = 0;
        for segment in path.split('.') {
            let Field::Observed(observed) = current else {
                return Err(ReactiveError::NotAContainer {
                    path: path[..walked - 1].to_owned(),
                });
            };
            current = observed.get(segment);
            walked += segment.len() + 1;
        }
        Ok(current)
    }

    /// Snapshot the container as JSON without tracking.
    pub fn to_json(&self) -> Result<serde_json::Value, ReactiveError> {
        self.raw().to_json()
    }

    /// Check whether both handles are the same wrapper.
    pub fn ptr_eq(&self, other: &Observed) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<Observed> for Value {
    fn from(observed: Observed) -> Self {
        Value::Object(observed.raw().clone())
    }
}

impl From<&Observed> for Value {
    fn from(observed: &Observed) -> Self {
        Value::Object(observed.raw().clone())
    }
}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observed")
            .field("container", self.raw())
            .finish()
    }
}

/// The result of reading a field through an [`Observed`] wrapper.
#[derive(Debug, Clone)]
pub enum Field {
    /// A non-container value.
    Value(Value),
    /// A nested container, already wrapped.
    Observed(Observed),
}

impl Field {
    pub fn is_null(&self) -> bool {
        matches!(self, Field::Value(Value::Null))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::Value(v) => v.as_f64(),
            Field::Observed(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Field::Value(v) => v.as_bool(),
            Field::Observed(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Value(v) => v.as_str(),
            Field::Observed(_) => None,
        }
    }

    pub fn as_observed(&self) -> Option<&Observed> {
        match self {
            Field::Observed(o) => Some(o),
            Field::Value(_) => None,
        }
    }

    pub fn into_observed(self) -> Option<Observed> {
        match self {
            Field::Observed(o) => Some(o),
            Field::Value(_) => None,
        }
    }

    /// The raw value, unwrapping nested containers.
    pub fn into_value(self) -> Value {
        match self {
            Field::Value(v) => v,
            Field::Observed(o) => o.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn observing_twice_yields_same_wrapper() {
        let container = Container::new().with("a", 1);

        let first = observe(&container);
        let second = observe(&container);
        let again = observe(&first);

        assert!(first.ptr_eq(&second));
        assert!(first.ptr_eq(&again));
        assert!(first.raw().ptr_eq(&container));
    }

    #[test]
    fn nested_reads_are_wrapped_and_cached() {
        let observed = Observed::from_json(json!({ "outer": { "inner": 1 } })).unwrap();

        let outer1 = observed.get("outer").into_observed().unwrap();
        let outer2 = observed.get("outer").into_observed().unwrap();

        assert!(outer1.ptr_eq(&outer2));
        assert_eq!(outer1.get("inner").as_f64(), Some(1.0));
    }

    #[test]
    fn set_triggers_only_on_change() {
        let observed = observe(Container::new().with("a", 1).with("b", f64::NAN));
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let o = observed.clone();
        let _effect = Effect::new(move || {
            o.get("a");
            o.get("b");
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        observed.set("a", 1);
        observed.set("b", f64::NAN);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        observed.set("a", 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn signed_zero_counts_as_change() {
        let observed = observe(Container::new().with("z", 0.0));
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let o = observed.clone();
        let _effect = Effect::new(move || {
            o.get("z");
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        observed.set("z", -0.0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remove_and_has_are_tracked() {
        let observed = observe(Container::new().with("a", 1));
        let seen = Arc::new(AtomicI32::new(-1));

        let seen_clone = seen.clone();
        let o = observed.clone();
        let _effect = Effect::new(move || {
            seen_clone.store(i32::from(o.has("a")), Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(observed.remove("a").is_some());
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        // Removing again is not a change.
        assert!(observed.remove("a").is_none());
    }

    #[test]
    fn update_reads_untracked() {
        let observed = observe(Container::new().with("n", 1));

        observed.update("n", |v| v.as_f64().unwrap_or(0.0) + 1.0);
        assert_eq!(observed.get("n").as_f64(), Some(2.0));
    }

    #[test]
    fn path_walks_nested_containers() {
        let observed =
            Observed::from_json(json!({ "a": { "b": { "c": "deep" } }, "x": 1 })).unwrap();

        assert_eq!(observed.path("a.b.c").unwrap().as_str(), Some("deep"));
        assert!(observed.path("a.missing").unwrap().is_null());

        let err = observed.path("x.y").unwrap_err();
        assert!(matches!(err, ReactiveError::NotAContainer { ref path } if path == "x"));

        let err = observed.path("a.b.c.d").unwrap_err();
        assert!(matches!(err, ReactiveError::NotAContainer { ref path } if path == "a.b.c"));

        assert!(matches!(observed.path(""), Err(ReactiveError::EmptyPath)));
    }

    #[test]
    fn dropped_container_leaves_no_registry_entry() {
        let id;
        {
            let observed = observe(Container::new().with("a", 1));
            id = observed.id();

            let o = observed.clone();
            let effect = Effect::new(move || {
                o.get("a");
            });
            assert!(Runtime::is_observed(id));

            // The effect's closure owns the wrapper; stopping it releases
            // the last path back to the container.
            effect.stop();
        }
        assert!(!Runtime::is_observed(id));
    }
}
