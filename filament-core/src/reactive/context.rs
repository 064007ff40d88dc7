//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When entering a reactive context (e.g., running a memo or effect), we push
//! the subscriber onto the stack. When the computation completes, we pop it.
//!
//! A stack rather than a single "active subscriber" slot is what makes
//! nested runs correct: an effect that reads a dirty memo runs the memo's
//! getter in a nested context, and when the getter returns the effect is
//! the tracking target again.
//!
//! Frames pushed by [`untrack`] carry no subscriber. Reads inside such a
//! frame record nothing, even when an outer computation is running.

use std::cell::RefCell;

use super::subscriber::{Subscriber, SubscriberId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    /// The running computation, or `None` for an untracked frame.
    subscriber: Option<Subscriber>,
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// While this context is active, any reactive value that is read will
    /// register the subscriber as a dependent.
    ///
    /// The context is automatically exited when the returned guard is dropped.
    pub fn enter(subscriber: Subscriber) -> Self {
        let subscriber_id = Some(subscriber.id());
        Self::push(ContextEntry {
            subscriber: Some(subscriber),
        });

        Self { subscriber_id }
    }

    /// Enter a frame in which reads are not tracked.
    pub fn enter_untracked() -> Self {
        Self::push(ContextEntry { subscriber: None });

        Self {
            subscriber_id: None,
        }
    }

    fn push(entry: ContextEntry) {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(entry));
    }

    /// Check if reads are currently being recorded.
    pub fn is_tracking() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.subscriber.is_some())
        })
    }

    /// Get the subscriber that reads should be recorded against, if any.
    pub fn current_subscriber() -> Option<Subscriber> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.subscriber.clone())
        })
    }

    /// Check whether `id` is executing anywhere on this thread's stack.
    ///
    /// Notifications skip such subscribers so a computation never re-enters
    /// itself through its own writes.
    pub fn is_running(id: SubscriberId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|entry| entry.subscriber.as_ref().is_some_and(|s| s.id() == id))
        })
    }

    /// Number of frames on this thread's stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        // Bind the popped entry so its subscriber handle is released after
        // the stack borrow ends.
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Verify we're popping the right context.
        // This helps catch bugs where contexts are mismatched.
        if let Some(entry) = &popped {
            debug_assert_eq!(
                entry.subscriber.as_ref().map(|s| s.id()),
                self.subscriber_id,
                "ReactiveContext mismatch: expected {:?}",
                self.subscriber_id,
            );
        }
        drop(popped);
    }
}

/// Run `f` without recording any reactive reads.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter_untracked();
    f()
}
