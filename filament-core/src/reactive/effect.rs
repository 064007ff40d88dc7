//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever state it
//! read changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies (unless created lazy).
//!
//! 2. When any dependency changes, the effect re-runs synchronously, before
//!    the write returns. With a scheduler, the scheduler is called instead
//!    and decides when (or whether) to run the effect.
//!
//! 3. Dependencies accumulate across runs; they are only released by
//!    [`Effect::stop`].
//!
//! # Differences from Memo
//!
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; an effect hands its result back from
//!   [`Effect::run`] and otherwise drops it.
//! - Memos are notified before effects.
//!
//! # Lifetime
//!
//! Dropping the handle does not stop the effect: the state it depends on
//! keeps it alive and it keeps reacting. Anything the effect function
//! captures stays alive with it, including observed containers, whose
//! registry entries stay too. Call [`Effect::stop`] to detach it.

use std::fmt;
use std::sync::Arc;

use super::subscriber::{Scheduler, Subscriber, SubscriberKind};

/// Options for [`effect`].
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{effect, EffectOptions};
///
/// let runner = effect(|| 7, EffectOptions::new().lazy());
/// assert_eq!(runner.run_count(), 0);
/// assert_eq!(runner.run(), 7);
/// ```
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run on creation; the caller runs the effect explicitly.
    pub lazy: bool,

    /// Called instead of re-running the effect when a dependency changes.
    pub scheduler: Option<Scheduler>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Install a scheduler. It receives the effect's subscriber and may call
    /// [`Subscriber::run`] on it, now or later.
    pub fn scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn(&Subscriber) + Send + Sync + 'static,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// The handle doubles as the effect's runner: [`Effect::run`] runs the
/// computation with tracking and returns its value.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{Effect, Signal};
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
///
/// let count = Signal::new(0);
/// let seen = Arc::new(AtomicI32::new(-1));
///
/// let (count_clone, seen_clone) = (count.clone(), seen.clone());
/// let _effect = Effect::new(move || seen_clone.store(count_clone.get(), Ordering::SeqCst));
///
/// count.set(5);
/// assert_eq!(seen.load(Ordering::SeqCst), 5);
/// ```
pub struct Effect<T> {
    /// The effect function.
    run: Arc<dyn Fn() -> T + Send + Sync>,

    /// The subscriber used for dependency tracking.
    unit: Subscriber,
}

impl<T: 'static> Effect<T> {
    /// Create a new effect and run it immediately to establish its
    /// dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_options(run, EffectOptions::default())
    }

    /// Create a new effect without running it.
    ///
    /// The effect tracks nothing until [`Effect::run`] is first called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_options(run, EffectOptions::new().lazy())
    }

    /// Create a new effect configured by `options`.
    pub fn with_options<F>(run: F, options: EffectOptions) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let run: Arc<dyn Fn() -> T + Send + Sync> = Arc::new(run);

        let computation = run.clone();
        let unit = Subscriber::new(
            SubscriberKind::Effect,
            move || {
                computation();
            },
            options.scheduler,
        );

        let effect = Self { run, unit };
        if !options.lazy {
            effect.unit.run();
        }
        effect
    }

    /// Run the effect function with tracking and return its value.
    ///
    /// After [`Effect::stop`], the function still runs but records nothing.
    pub fn run(&self) -> T {
        self.unit.run_with(|| (self.run)())
    }

    /// Detach the effect from everything it depends on.
    ///
    /// After stopping, the effect will not re-run on changes.
    pub fn stop(&self) {
        self.unit.stop();
    }

    /// Check if the effect has been stopped.
    pub fn is_stopped(&self) -> bool {
        !self.unit.is_active()
    }

    /// Get the number of times the effect has run under tracking.
    pub fn run_count(&self) -> usize {
        self.unit.run_count()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.unit.dependency_count()
    }

    /// The subscriber that tracks this effect.
    pub fn subscriber(&self) -> &Subscriber {
        &self.unit
    }
}

/// Create an effect from `run` and `options`.
///
/// Returns the runner handle: call [`Effect::run`] to run the effect and get
/// its value, which is how a lazy effect is started.
pub fn effect<T, F>(run: F, options: EffectOptions) -> Effect<T>
where
    T: 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Effect::with_options(run, options)
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
            unit: self.unit.clone(),
        }
    }
}

impl<T> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.unit.id())
            .field("run_count", &self.unit.run_count())
            .field("dependency_count", &self.unit.dependency_count())
            .field("stopped", &!self.unit.is_active())
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
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Effect should have run once on creation
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new_lazy(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst) + 1
        });

        // Effect should not have run
        assert_eq!(run_count.load(Ordering::SeqCst), 0);
        assert_eq!(effect.run_count(), 0);

        // Manually run; the value comes back
        assert_eq!(effect.run(), 1);
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_on_dependency_change() {
        let signal = Signal::new(0);
        let observed = Arc::new(AtomicI32::new(-1));

        let signal_clone = signal.clone();
        let observed_clone = observed.clone();
        let effect = Effect::new(move || {
            observed_clone.store(signal_clone.get(), Ordering::SeqCst);
        });
        assert_eq!(effect.dependency_count(), 1);

        signal.set(42);
        assert_eq!(observed.load(Ordering::SeqCst), 42);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn scheduler_replaces_rerun() {
        let signal = Signal::new(0);
        let runs = Arc::new(AtomicI32::new(0));
        let queued = Arc::new(Mutex::new(Vec::<Subscriber>::new()));

        let signal_clone = signal.clone();
        let runs_clone = runs.clone();
        let queued_clone = queued.clone();
        let effect = effect(
            move || {
                signal_clone.get();
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions::new().scheduler(move |subscriber| {
                queued_clone.lock().push(subscriber.clone());
            }),
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        signal.set(1);
        signal.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queued.lock().len(), 2);

        // Flush one queued run.
        let pending = queued.lock().pop();
        if let Some(subscriber) = pending {
            assert!(subscriber.ptr_eq(effect.subscriber()));
            subscriber.run();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn effect_does_not_run_after_stop() {
        let signal = Signal::new(0);
        let run_count = Arc::new(AtomicI32::new(0));

        let signal_clone = signal.clone();
        let run_count_clone = run_count.clone();
        let effect = Effect::new(move || {
            signal_clone.get();
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        effect.stop();
        assert!(effect.is_stopped());
        assert_eq!(effect.dependency_count(), 0);
        assert_eq!(signal.subscriber_count(), 0);

        signal.set(1);
        signal.set(2);
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn self_write_does_not_reenter() {
        let signal = Signal::new(0);
        let run_count = Arc::new(AtomicI32::new(0));

        let signal_clone = signal.clone();
        let run_count_clone = run_count.clone();
        let _effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
            let current = signal_clone.get();
            signal_clone.set(current + 1);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(signal.get_untracked(), 1);
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.run_count(), 1);
        effect1.run();
        assert_eq!(effect2.run_count(), 2);

        effect1.stop();
        assert!(effect2.is_stopped());
    }
}
