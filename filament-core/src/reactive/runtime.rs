//! Reactive Runtime
//!
//! The runtime connects reactive state to the computations that read it.
//! It owns the process-wide dependency registry and implements the two
//! halves of propagation: `track` (record that the running computation read
//! something) and `trigger` (re-run or reschedule everything that read it).
//!
//! # How It Works
//!
//! 1. An observed container field is identified by (container id, field
//!    name). The registry maps that pair to a dependency set.
//!
//! 2. When a field is read inside a running computation, the runtime adds
//!    the computation to the field's dependency set, and the set to the
//!    computation's back-reference list.
//!
//! 3. When a field changes, the runtime notifies the set:
//!    a. Memo subscribers first (they only mark themselves dirty)
//!    b. Then every other subscriber (re-run, or call their scheduler)
//!    c. Subscribers already executing on this thread are skipped
//!
//! A memo that is marked dirty notifies its own readers in turn. Plain
//! subscribers reached that way are queued and run once the outermost
//! memo pass is over, so an effect that reads several memos over the same
//! input sees all of them dirty. Everything still runs before the write
//! returns.
//!
//! Signals and memos are not keyed by container, so they own their
//! dependency set directly ([`LazyDep`]) and share the same notification
//! path.
//!
//! # Ownership
//!
//! The registry is keyed by container *identity*, never by the container
//! itself, so being observed does not keep a container alive. A container
//! prunes its own entries when it is dropped.
//!
//! Dependency sets do own their subscribers, and a subscriber owns what its
//! computation captures. An effect that captures a container it reads
//! therefore keeps that container alive until the effect is stopped.

use std::cell::RefCell;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::context::ReactiveContext;
use super::subscriber::{Subscriber, SubscriberId};
use super::value::ContainerId;

/// A set of subscribers depending on one piece of reactive state.
///
/// Iteration follows insertion order.
#[derive(Clone, Default)]
pub(crate) struct Dep {
    subscribers: Arc<Mutex<IndexMap<SubscriberId, Subscriber>>>,
}

/// Non-owning reference to a [`Dep`], held by subscribers.
#[derive(Clone)]
pub(crate) struct WeakDep {
    subscribers: Weak<Mutex<IndexMap<SubscriberId, Subscriber>>>,
}

impl WeakDep {
    pub(crate) fn upgrade(&self) -> Option<Dep> {
        self.subscribers.upgrade().map(|subscribers| Dep { subscribers })
    }
}

impl Dep {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn downgrade(&self) -> WeakDep {
        WeakDep {
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Add `subscriber` to the set unless it is already a member.
    ///
    /// Returns whether a new edge was recorded.
    pub(crate) fn track(&self, subscriber: &Subscriber) -> bool {
        if !subscriber.is_active() {
            return false;
        }

        let inserted = {
            let mut subscribers = self.subscribers.lock();
            if subscribers.contains_key(&subscriber.id()) {
                false
            } else {
                subscribers.insert(subscriber.id(), subscriber.clone());
                true
            }
        };

        if inserted {
            subscriber.push_dep(self.downgrade());
        }
        inserted
    }

    pub(crate) fn remove(&self, id: SubscriberId) {
        let removed = self.subscribers.lock().shift_remove(&id);
        drop(removed);
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Notify every member, memos before everything else.
    pub(crate) fn notify(&self) {
        // Snapshot so subscribers can track or stop while we iterate.
        let snapshot: Vec<Subscriber> = self.subscribers.lock().values().cloned().collect();
        notify_all(&snapshot);
    }
}

#[derive(Default)]
struct Propagation {
    /// Number of memo passes in progress on this thread.
    derived_depth: usize,

    /// Plain subscribers reached from inside a memo pass.
    pending: IndexMap<SubscriberId, Subscriber>,
}

thread_local! {
    static PROPAGATION: RefCell<Propagation> = RefCell::new(Propagation::default());
}

/// Guard for a memo pass. Dropping the outermost pass while unwinding
/// discards the queue.
struct DerivedPass;

impl DerivedPass {
    fn enter() -> Self {
        PROPAGATION.with(|p| p.borrow_mut().derived_depth += 1);
        DerivedPass
    }
}

impl Drop for DerivedPass {
    fn drop(&mut self) {
        let discarded = PROPAGATION.with(|p| {
            let mut p = p.borrow_mut();
            p.derived_depth -= 1;
            if p.derived_depth == 0 && std::thread::panicking() {
                std::mem::take(&mut p.pending)
            } else {
                IndexMap::new()
            }
        });
        drop(discarded);
    }
}

fn in_derived_pass() -> bool {
    PROPAGATION.with(|p| p.borrow().derived_depth > 0)
}

fn notify_one(subscriber: &Subscriber) {
    if ReactiveContext::is_running(subscriber.id()) {
        trace!(subscriber = ?subscriber.id(), "skipping running subscriber");
        return;
    }
    subscriber.notify();
}

/// Notify `subscribers` in two passes: every memo subscriber, then every
/// plain one.
///
/// A plain effect may read a memo, so the memo must already be marked dirty
/// when the effect runs. Inside a memo pass, plain subscribers are queued
/// for the outermost pass instead of run.
pub(crate) fn notify_all(subscribers: &[Subscriber]) {
    let (derived, plain): (Vec<&Subscriber>, Vec<&Subscriber>) =
        subscribers.iter().partition(|s| s.is_derived());

    debug!(
        derived = derived.len(),
        plain = plain.len(),
        "notifying subscribers"
    );

    if in_derived_pass() {
        for subscriber in derived {
            notify_one(subscriber);
        }
        PROPAGATION.with(|p| {
            let mut p = p.borrow_mut();
            for subscriber in plain {
                p.pending
                    .entry(subscriber.id())
                    .or_insert_with(|| subscriber.clone());
            }
        });
        return;
    }

    {
        let _pass = DerivedPass::enter();
        for subscriber in derived {
            notify_one(subscriber);
        }
    }

    let mut queue: IndexMap<SubscriberId, Subscriber> = plain
        .into_iter()
        .map(|subscriber| (subscriber.id(), subscriber.clone()))
        .collect();
    let pending = PROPAGATION.with(|p| std::mem::take(&mut p.borrow_mut().pending));
    for (id, subscriber) in pending {
        queue.entry(id).or_insert(subscriber);
    }

    for subscriber in queue.values() {
        notify_one(subscriber);
    }
}

/// A dependency set that is allocated on the first tracked read.
///
/// Used by signals and memos, which own their subscribers directly instead
/// of going through the registry.
#[derive(Default)]
pub(crate) struct LazyDep {
    dep: OnceLock<Dep>,
}

impl LazyDep {
    /// Record the running computation, if any, as a dependent.
    pub(crate) fn track(&self) {
        if let Some(subscriber) = ReactiveContext::current_subscriber() {
            if self.dep.get_or_init(Dep::new).track(&subscriber) {
                trace!(subscriber = ?subscriber.id(), "tracked value read");
            }
        }
    }

    pub(crate) fn trigger(&self) {
        if let Some(dep) = self.dep.get() {
            dep.notify();
        }
    }

    pub(crate) fn is_allocated(&self) -> bool {
        self.dep.get().is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.dep.get().map_or(0, Dep::len)
    }
}

/// Dependency sets of one container, by field name.
type FieldDeps = IndexMap<String, Dep>;

// Global registry of observed container fields.
// Keyed by container id so the registry never owns a container.
static REGISTRY: OnceLock<DashMap<ContainerId, FieldDeps>> = OnceLock::new();

fn get_registry() -> &'static DashMap<ContainerId, FieldDeps> {
    REGISTRY.get_or_init(DashMap::new)
}

/// The global reactive runtime.
///
/// The registry is shared by every thread; the execution stack that
/// decides what a read is recorded against is per thread (see
/// [`ReactiveContext`]).
pub struct Runtime;

impl Runtime {
    /// Record that the running computation read `field` of `container`.
    ///
    /// Does nothing outside a tracking context. Re-tracking the same pair
    /// from the same computation is a no-op.
    pub fn track(container: ContainerId, field: &str) {
        let Some(subscriber) = ReactiveContext::current_subscriber() else {
            return;
        };

        // Clone the set out so no registry shard stays locked while the
        // subscriber's back-references are updated.
        let dep = get_registry()
            .entry(container)
            .or_default()
            .entry(field.to_owned())
            .or_default()
            .clone();

        if dep.track(&subscriber) {
            trace!(subscriber = ?subscriber.id(), %container, field, "tracked field read");
        }
    }

    /// Notify every computation that read `field` of `container`.
    ///
    /// Unknown containers and fields have no subscribers.
    pub fn trigger(container: ContainerId, field: &str) {
        let dep = get_registry()
            .get(&container)
            .and_then(|fields| fields.get(field).cloned());

        if let Some(dep) = dep {
            debug!(%container, field, "field changed");
            dep.notify();
        }
    }

    /// Drop every dependency set recorded for `container`.
    ///
    /// Called when the container itself is dropped.
    pub fn forget(container: ContainerId) {
        let removed = get_registry().remove(&container);
        if let Some((_, fields)) = &removed {
            trace!(%container, fields = fields.len(), "container forgotten");
        }
        // Released outside the shard lock; dropping subscribers can drop
        // other containers, which forget themselves.
        drop(removed);
    }

    /// Number of subscribers currently depending on `field` of `container`.
    pub fn subscriber_count(container: ContainerId, field: &str) -> usize {
        let dep = get_registry()
            .get(&container)
            .and_then(|fields| fields.get(field).cloned());
        dep.map_or(0, |dep| dep.len())
    }

    /// Check if `container` has any registry entry.
    pub fn is_observed(container: ContainerId) -> bool {
        get_registry().contains_key(&container)
    }

    /// Get the subscriber reads are currently recorded against, if any.
    pub fn current_subscriber() -> Option<Subscriber> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a tracking context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_tracking()
    }
}
