//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when it is read
//! after one of its dependencies changed.
//!
//! # How Memos Work
//!
//! 1. A memo starts dirty. Its getter does not run until the first read.
//!
//! 2. A read of a dirty memo runs the getter under the memo's own
//!    subscriber, which records the memo's dependencies, caches the result
//!    and clears the dirty flag.
//!
//! 3. When a dependency changes, the memo is not recomputed. Its scheduler
//!    marks it dirty and notifies whatever read the memo. A memo that is
//!    already dirty stays quiet, so repeated changes between reads cause a
//!    single notification.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 memos depend on it
//! - Only the memos actually accessed will recompute
//! - Memos that are never read stay dirty (no wasted work)
//!
//! Memo subscribers are notified before plain effects, and effects reached
//! through a memo wait until every memo over the changed input is marked
//! dirty. An effect that reads memos therefore recomputes them rather than
//! reading a stale cached value.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use super::runtime::LazyDep;
use super::subscriber::{Scheduler, Subscriber, SubscriberKind};

struct MemoInner<T> {
    getter: Arc<dyn Fn() -> T + Send + Sync>,

    /// Runs the getter and carries the invalidation scheduler.
    unit: Subscriber,

    /// The cached value (None if never computed).
    value: Mutex<Option<T>>,

    /// Set while the cached value may be stale.
    dirty: AtomicBool,

    /// Computations that read this memo.
    dep: LazyDep,
}

impl<T> MemoInner<T> {
    /// Scheduler body: mark dirty and pass the news on, without recomputing.
    fn invalidate(&self) {
        if self.dirty.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!(subscriber = ?self.unit.id(), "memo invalidated");
        self.dep.trigger();
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        self.unit.stop();
    }
}

/// A cached derived value that recomputes only when read after a change.
///
/// Memos are read-only; there is no way to assign one.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{Memo, Signal};
///
/// let count = Signal::new(1);
/// let count_clone = count.clone();
/// let doubled = Memo::new(move || count_clone.get() * 2);
///
/// assert_eq!(doubled.get(), 2);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Memo<T> {
    inner: Arc<MemoInner<T>>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let getter: Arc<dyn Fn() -> T + Send + Sync> = Arc::new(getter);

        let inner = Arc::new_cyclic(|weak: &Weak<MemoInner<T>>| {
            let memo = weak.clone();
            let scheduler: Scheduler = Arc::new(move |_: &Subscriber| {
                if let Some(memo) = memo.upgrade() {
                    memo.invalidate();
                }
            });

            let computation = getter.clone();
            let unit = Subscriber::new(
                SubscriberKind::Derived,
                move || {
                    computation();
                },
                Some(scheduler),
            );

            MemoInner {
                getter,
                unit,
                value: Mutex::new(None),
                dirty: AtomicBool::new(true),
                dep: LazyDep::default(),
            }
        });

        Self { inner }
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// A reader becomes a dependent of the memo itself, not of the memo's
    /// inputs. If the getter panics, the memo stays dirty and the next read
    /// tries again.
    pub fn get(&self) -> T {
        self.inner.dep.track();
        self.get_untracked()
    }

    /// Get the current value without becoming a dependent of the memo.
    pub fn get_untracked(&self) -> T {
        if !self.is_dirty() {
            if let Some(value) = self.inner.value.lock().clone() {
                return value;
            }
        }
        self.recompute()
    }

    /// Run the getter and cache its result.
    fn recompute(&self) -> T {
        let getter = &self.inner.getter;
        let value = self.inner.unit.run_with(|| getter());

        *self.inner.value.lock() = Some(value.clone());
        self.inner.dirty.store(false, Ordering::Release);
        trace!(subscriber = ?self.inner.unit.id(), "memo recomputed");

        value
    }

    /// Check whether the next read will run the getter.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// Get the number of computations that read this memo.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.len()
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.lock().is_some()
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.unit.id())
            .field("dirty", &self.is_dirty())
            .field("has_value", &self.has_value())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn memo_computes_on_first_access() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        // Not computed yet
        assert!(!memo.has_value());
        assert!(memo.is_dirty());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        // First access triggers computation
        let value = memo.get();
        assert_eq!(value, 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(memo.has_value());
        assert!(!memo.is_dirty());
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memo_is_lazy_across_many_changes() {
        let signal = Signal::new(0);
        let call_count = Arc::new(AtomicI32::new(0));

        let call_count_clone = call_count.clone();
        let signal_clone = signal.clone();
        let memo = Memo::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            signal_clone.get() * 10
        });

        assert_eq!(memo.get(), 0);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        for n in 1..=5 {
            signal.set(n);
        }
        assert!(memo.is_dirty());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        assert_eq!(memo.get(), 50);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn memo_depends_on_memo() {
        let base = Signal::new(5);

        let base_clone = base.clone();
        let doubled = Memo::new(move || base_clone.get() * 2);

        let doubled_clone = doubled.clone();
        let plus_ten = Memo::new(move || doubled_clone.get() + 10);

        assert_eq!(plus_ten.get(), 20);

        base.set(10);
        assert!(doubled.is_dirty());
        assert!(plus_ten.is_dirty());
        assert_eq!(plus_ten.get(), 30);
    }

    #[test]
    fn memo_stays_dirty_when_getter_panics() {
        let signal = Signal::new(1);

        let signal_clone = signal.clone();
        let memo = Memo::new(move || {
            let v = signal_clone.get();
            assert!(v != 2, "refusing to compute");
            v
        });

        assert_eq!(memo.get(), 1);

        signal.set(2);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| memo.get()));
        assert!(result.is_err());
        assert!(memo.is_dirty());

        signal.set(3);
        assert_eq!(memo.get(), 3);
        assert!(!memo.is_dirty());
    }

    #[test]
    fn dropping_memo_detaches_its_subscriber() {
        let signal = Signal::new(1);

        let signal_clone = signal.clone();
        let memo = Memo::new(move || signal_clone.get());
        assert_eq!(memo.get(), 1);
        assert_eq!(signal.subscriber_count(), 1);

        drop(memo);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn memo_clone_shares_state() {
        let memo1 = Memo::new(|| 42);
        assert_eq!(memo1.get(), 42);

        let memo2 = memo1.clone();
        assert!(memo2.has_value());
        assert!(!memo2.is_dirty());
        assert_eq!(memo2.get(), 42);
    }
}
