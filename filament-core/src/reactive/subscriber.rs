//! Subscriber types for the reactive system.
//!
//! A Subscriber wraps any computation that depends on reactive values:
//! effects, the getter of a memo, or a render function. Running a
//! subscriber makes it the tracking target for every reactive read that
//! happens during the run; later writes to that state re-run it (or call
//! its scheduler instead).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::debug;

use super::context::ReactiveContext;
use super::runtime::WeakDep;

/// Unique identifier for a subscriber.
///
/// Each subscriber (memo, effect, or other reactive computation) gets a unique
/// ID when created. This ID is used to track dependencies and avoid duplicate
/// subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a subscriber computes.
///
/// Notification order depends on this: every `Derived` subscriber in a
/// dependency set is notified before any `Effect` subscriber, so effects
/// never read a memo whose invalidation has not run yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberKind {
    /// A plain side-effecting computation.
    Effect,

    /// The getter of a [`Memo`](super::Memo).
    Derived,
}

/// Called instead of re-running a subscriber when one of its dependencies
/// changes.
pub type Scheduler = Arc<dyn Fn(&Subscriber) + Send + Sync>;

struct SubscriberInner {
    id: SubscriberId,
    kind: SubscriberKind,
    computation: Box<dyn Fn() + Send + Sync>,
    scheduler: Option<Scheduler>,
    /// Every dependency set this subscriber is currently a member of.
    deps: Mutex<SmallVec<[WeakDep; 4]>>,
    active: AtomicBool,
    run_count: AtomicUsize,
}

/// A tracked, re-runnable computation.
///
/// `Subscriber` is a cheap handle; clones refer to the same unit. The unit
/// lives as long as anything holds it, including the dependency sets of
/// the state it reads. Whatever the computation captures lives as long as
/// the unit, so a unit that is never stopped keeps its captures alive.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

impl Subscriber {
    /// Create a new subscriber around `computation`.
    ///
    /// The computation is not run; call [`Subscriber::run`] to run it and
    /// collect its dependencies.
    pub fn new<F>(kind: SubscriberKind, computation: F, scheduler: Option<Scheduler>) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SubscriberInner {
                id: SubscriberId::new(),
                kind,
                computation: Box::new(computation),
                scheduler,
                deps: Mutex::new(SmallVec::new()),
                active: AtomicBool::new(true),
                run_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Get what the subscriber computes.
    pub fn kind(&self) -> SubscriberKind {
        self.inner.kind
    }

    /// Whether this subscriber computes a memo.
    pub fn is_derived(&self) -> bool {
        self.inner.kind == SubscriberKind::Derived
    }

    /// Whether changes call a scheduler instead of re-running.
    pub fn has_scheduler(&self) -> bool {
        self.inner.scheduler.is_some()
    }

    /// Run the wrapped computation inside a tracking context.
    pub fn run(&self) {
        self.run_with(|| (self.inner.computation)())
    }

    /// Run `f` with this subscriber as the tracking target.
    ///
    /// The execution stack is restored on every exit path, including
    /// unwinding out of `f`. A stopped subscriber runs `f` untracked.
    pub(crate) fn run_with<R>(&self, f: impl FnOnce() -> R) -> R {
        if !self.is_active() {
            let _ctx = ReactiveContext::enter_untracked();
            return f();
        }

        let _ctx = ReactiveContext::enter(self.clone());
        self.inner.run_count.fetch_add(1, Ordering::Relaxed);
        f()
    }

    /// React to a change in one of the dependencies.
    ///
    /// Calls the scheduler if there is one, otherwise re-runs the
    /// computation.
    pub fn notify(&self) {
        match &self.inner.scheduler {
            Some(scheduler) => scheduler(self),
            None => self.run(),
        }
    }

    /// Detach this subscriber from every dependency set it belongs to.
    ///
    /// After stopping, writes no longer reach the subscriber and running it
    /// no longer records dependencies.
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let deps = std::mem::take(&mut *self.inner.deps.lock());
        let mut detached = 0;
        for dep in deps.iter().filter_map(WeakDep::upgrade) {
            dep.remove(self.id());
            detached += 1;
        }

        debug!(subscriber = ?self.id(), detached, "subscriber stopped");
    }

    /// Check if the subscriber still reacts to changes.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Get the number of times the computation ran under tracking.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Get the number of dependency sets this subscriber belongs to.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.lock().len()
    }

    /// Record a new membership. Only `Dep::track` calls this, right after
    /// inserting the subscriber into the set.
    pub(crate) fn push_dep(&self, dep: WeakDep) {
        self.inner.deps.lock().push(dep);
    }

    /// Check if two handles refer to the same unit.
    pub fn ptr_eq(&self, other: &Subscriber) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("active", &self.is_active())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn notify_without_scheduler_reruns_computation() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let subscriber = Subscriber::new(
            SubscriberKind::Effect,
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            None,
        );

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        subscriber.notify();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(subscriber.run_count(), 1);
    }

    #[test]
    fn notify_with_scheduler_skips_computation() {
        let calls = Arc::new(AtomicI32::new(0));
        let scheduled = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let scheduled_clone = scheduled.clone();

        let subscriber = Subscriber::new(
            SubscriberKind::Effect,
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            Some(Arc::new(move |_: &Subscriber| {
                scheduled_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );

        subscriber.notify();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_sets_and_restores_context() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();

        let subscriber = Subscriber::new(
            SubscriberKind::Effect,
            move || {
                *seen_clone.lock() = ReactiveContext::current_subscriber().map(|s| s.id());
            },
            None,
        );

        subscriber.run();
        assert_eq!(*seen.lock(), Some(subscriber.id()));
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn stopped_subscriber_runs_untracked() {
        let tracked = Arc::new(AtomicBool::new(true));
        let tracked_clone = tracked.clone();

        let subscriber = Subscriber::new(
            SubscriberKind::Effect,
            move || {
                tracked_clone.store(ReactiveContext::is_tracking(), Ordering::SeqCst);
            },
            None,
        );

        subscriber.stop();
        assert!(!subscriber.is_active());

        subscriber.run();
        assert!(!tracked.load(Ordering::SeqCst));
        assert_eq!(subscriber.run_count(), 0);
    }

    #[test]
    fn stopped_subscriber_hides_outer_subscriber() {
        let outer = Subscriber::new(SubscriberKind::Effect, || {}, None);
        let inner_saw_outer = Arc::new(AtomicBool::new(true));
        let saw = inner_saw_outer.clone();

        let inner = Subscriber::new(
            SubscriberKind::Effect,
            move || {
                saw.store(ReactiveContext::is_tracking(), Ordering::SeqCst);
            },
            None,
        );
        inner.stop();

        {
            let _ctx = ReactiveContext::enter(outer.clone());
            inner.run();
            assert!(ReactiveContext::is_tracking());
        }
        assert!(!inner_saw_outer.load(Ordering::SeqCst));
    }
}
