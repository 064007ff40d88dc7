//! Signal Implementation
//!
//! A Signal is a single reactive value: the boxed counterpart of an
//! observed container field, for values that are not containers.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    signal registers that context as a subscriber.
//!
//! 2. When a signal is written with a value that is not the
//!    [same value](SameValue) as the current one, every subscriber is
//!    notified, memos first.
//!
//! 3. Writing the same value does nothing.
//!
//! # Memory Layout
//!
//! A signal owns its subscriber set directly instead of going through the
//! registry. The set is only allocated on the first tracked read, so
//! signals nobody observes cost a value and an empty cell.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::runtime::LazyDep;
use super::value::SameValue;

struct SignalInner<T> {
    value: RwLock<T>,
    dep: LazyDep,
}

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Must be Clone + Send +
///   Sync, and implement [`SameValue`] for change detection.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + SameValue + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                value: RwLock::new(value),
                dep: LazyDep::default(),
            }),
        }
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a subscriber.
    pub fn get(&self) -> T {
        self.inner.dep.track();
        self.get_untracked()
    }

    /// Borrow the current value, tracking the read.
    ///
    /// The value stays locked while `f` runs; `f` must not write this
    /// signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.dep.track();
        f(&*self.inner.value.read())
    }

    /// Get the current value without tracking dependencies.
    ///
    /// Use this when you need to read the value without establishing
    /// a reactive dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value and notify subscribers if it changed.
    ///
    /// Subscribers run before this call returns.
    pub fn set(&self, value: T) {
        let old = {
            let mut guard = self.inner.value.write();
            if guard.same_value(&value) {
                return;
            }
            std::mem::replace(&mut *guard, value)
        };

        self.inner.dep.trigger();
        drop(old);
    }

    /// Update the value using a function.
    ///
    /// This is useful for updates that depend on the current value. The
    /// read is not tracked.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = f(&*self.inner.value.read());
        self.set(new_value);
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.len()
    }

    /// Check whether any computation has ever read this signal.
    pub fn is_observed(&self) -> bool {
        self.inner.dep.is_allocated()
    }

    /// Check whether both handles refer to the same signal.
    pub fn ptr_eq(&self, other: &Signal<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + SameValue + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
