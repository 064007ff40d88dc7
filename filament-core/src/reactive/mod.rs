//! Reactive Primitives
//!
//! This module implements the reactive engine: observed containers,
//! signals, memos, and effects, plus the runtime that ties them together.
//!
//! # Concepts
//!
//! ## Observed containers
//!
//! [`observe`] wraps a plain [`Container`] so that reading a field inside a
//! running computation subscribes the computation to that field, and
//! writing the field re-runs it. Nested containers are observed lazily as
//! they are read.
//!
//! ## Signals
//!
//! A Signal is a single reactive value, for state that is not a container.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. A change to its inputs
//! only marks it dirty; the getter runs again on the next read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change, such as re-rendering a view.
//!
//! # Implementation Notes
//!
//! The engine uses a thread-local stack of running computations to detect
//! dependencies automatically. When reactive state is read, the computation
//! on top of the stack is recorded as a dependent.
//!
//! Propagation is synchronous: a write has re-run (or rescheduled) every
//! dependent before it returns. Memos are always notified before effects,
//! and a computation never re-enters itself through its own writes.

mod context;
mod effect;
mod memo;
mod observed;
mod runtime;
mod signal;
mod subscriber;
mod value;

pub use context::{untrack, ReactiveContext};
pub use effect::{effect, Effect, EffectOptions};
pub use memo::Memo;
pub use observed::{observe, Field, IntoObserved, Observed};
pub use runtime::Runtime;
pub use signal::Signal;
pub use subscriber::{Scheduler, Subscriber, SubscriberId, SubscriberKind};
pub use value::{Container, ContainerId, SameValue, Value};
