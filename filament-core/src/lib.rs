//! Filament Core
//!
//! This crate provides a fine-grained reactive engine. It implements:
//!
//! - Automatic dependency tracking: reading state inside a computation
//!   subscribes the computation, with no declared dependency list
//! - Synchronous invalidation: writing state re-runs (or reschedules) every
//!   computation that read it
//! - Lazy memoization: derived values recompute only when read after a
//!   change
//!
//! A rendering pipeline sits on top of this as a consumer: it wraps its
//! re-render function in an effect and lets the engine call it again.
//!
//! # Architecture
//!
//! - `reactive`: containers, signals, memos, effects, and the runtime
//! - `error`: errors for path lookups and JSON conversion
//!
//! # Example
//!
//! ```rust
//! use filament_core::reactive::{Effect, Memo, Signal};
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use std::sync::Arc;
//!
//! // Create a signal
//! let count = Signal::new(1);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = Memo::new(move || c.get() * 2);
//!
//! // Create an effect
//! let seen = Arc::new(AtomicI32::new(0));
//! let (d, s) = (doubled.clone(), seen.clone());
//! let _effect = Effect::new(move || s.store(d.get(), Ordering::SeqCst));
//!
//! // Update the signal; the effect has already run when `set` returns
//! count.set(5);
//! assert_eq!(seen.load(Ordering::SeqCst), 10);
//! ```

pub mod error;
pub mod reactive;

pub use error::ReactiveError;
