//! Effect Implementation
//!
//! An Effect is a user computation that re-runs whenever an observed
//! location it read during its last run changes.
//!
//! # How Effects Work
//!
//! 1. When created (unless lazy), the effect runs immediately to establish
//!    its initial dependencies.
//!
//! 2. Every observed read during the run subscribes the effect to that
//!    location's Dep; the effect keeps the reverse edge in its dep list.
//!
//! 3. When any of those locations changes, the effect re-runs, or its
//!    scheduler is invoked instead if one was supplied.
//!
//! # Dependency diffing
//!
//! Re-running does not clear-and-resubscribe. Each nesting level owns one
//! marker bit: before the run, every current dep gets its "was tracked" bit
//! set; reads during the run set the "newly tracked" bit; afterwards, deps
//! that were tracked before but not this time are dropped in place. Beyond
//! [`MAX_MARKER_BITS`] levels the effect falls back to a full detach before
//! the run, which preserves correctness at the cost of churn.
//!
//! # Ownership
//!
//! The caller owns the effect; Deps hold weak back-references. Dropping the
//! last handle detaches the effect everywhere, so does [`Effect::stop`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::context::{self, MAX_MARKER_BITS};
use super::dep::{Dep, TrackEvent, TriggerEvent};
use super::scope::Scope;

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(u64);

impl EffectId {
    fn next() -> Self {
        Self(EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Replaces synchronous re-runs: receives the effect instead of `run()`
/// being called. Callers batch or defer however they like.
pub type Scheduler = Arc<dyn Fn(&Effect) + Send + Sync>;

/// Dev hook observing dependency subscriptions.
pub type TrackHook = Arc<dyn Fn(&TrackEvent) + Send + Sync>;

/// Dev hook observing trigger deliveries.
pub type TriggerHook = Arc<dyn Fn(&TriggerEvent) + Send + Sync>;

/// Called once when the effect is stopped.
pub type StopHook = Arc<dyn Fn() + Send + Sync>;

/// Options accepted by [`Effect::with_options`].
#[derive(Default)]
pub struct EffectOptions {
    /// Do not run on creation; the first run happens on demand.
    pub lazy: bool,
    /// Let the effect's own writes re-trigger it.
    pub allow_recurse: bool,
    pub scheduler: Option<Scheduler>,
    /// Scope that will stop this effect when it is stopped.
    pub scope: Option<Scope>,
    pub on_stop: Option<StopHook>,
    pub on_track: Option<TrackHook>,
    pub on_trigger: Option<TriggerHook>,
}

pub(crate) struct EffectInner {
    id: EffectId,
    func: Box<dyn Fn() + Send + Sync>,
    scheduler: Option<Scheduler>,
    allow_recurse: bool,
    active: AtomicBool,
    /// Set when `stop` is called while the effect is running; the stop is
    /// applied when the run frame unwinds.
    defer_stop: AtomicBool,
    /// Deps this effect is currently subscribed to. Invariant: the effect
    /// is in `dep.subscribers` for exactly the deps listed here.
    deps: Mutex<Vec<Dep>>,
    run_count: AtomicU64,
    on_stop: Option<StopHook>,
    on_track: Option<TrackHook>,
    on_trigger: Option<TriggerHook>,
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        let drained: Vec<Dep> = self
            .deps
            .get_mut()
            .expect("effect deps lock poisoned")
            .drain(..)
            .collect();
        for dep in drained {
            dep.remove_subscriber(self.id);
        }
    }
}

/// A user computation registered for automatic re-execution.
///
/// Cloning shares state; the clone is the same effect. The handle doubles
/// as the runner: call [`Effect::run`] to re-execute with tracking.
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it immediately to establish dependencies.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(func, EffectOptions::default())
    }

    /// Create an effect without running it.
    pub fn new_lazy<F>(func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_options(
            func,
            EffectOptions {
                lazy: true,
                ..EffectOptions::default()
            },
        )
    }

    /// Create an effect with the full option set.
    pub fn with_options<F>(func: F, options: EffectOptions) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let EffectOptions {
            lazy,
            allow_recurse,
            scheduler,
            scope,
            on_stop,
            on_track,
            on_trigger,
        } = options;

        let effect = Self {
            inner: Arc::new(EffectInner {
                id: EffectId::next(),
                func: Box::new(func),
                scheduler,
                allow_recurse,
                active: AtomicBool::new(true),
                defer_stop: AtomicBool::new(false),
                deps: Mutex::new(Vec::new()),
                run_count: AtomicU64::new(0),
                on_stop,
                on_track,
                on_trigger,
            }),
        };

        if let Some(scope) = scope {
            scope.register(&effect);
        }
        if !lazy {
            effect.run();
        }
        effect
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> EffectId {
        self.inner.id
    }

    /// Whether the effect has not been stopped.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn allow_recurse(&self) -> bool {
        self.inner.allow_recurse
    }

    /// Number of times the effect function has executed with tracking.
    pub fn run_count(&self) -> u64 {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of locations the effect currently depends on.
    pub fn dep_count(&self) -> usize {
        self.inner
            .deps
            .lock()
            .expect("effect deps lock poisoned")
            .len()
    }

    /// Execute the effect function with dependency tracking.
    ///
    /// A stopped effect still executes, untracked. Re-entry into a running
    /// effect is a no-op unless `allow_recurse` was set.
    pub fn run(&self) {
        if !self.is_active() {
            (self.inner.func)();
            return;
        }
        if context::effect_on_stack(self.inner.id) && !self.inner.allow_recurse {
            return;
        }

        context::push_effect(self.clone());
        context::enable_tracking();
        let depth = context::enter_level();
        if depth <= MAX_MARKER_BITS {
            self.init_dep_markers(1 << depth);
        } else {
            self.detach_all();
        }
        self.inner.run_count.fetch_add(1, Ordering::SeqCst);

        // The guard restores stack, tracking and marker state even when the
        // effect function panics.
        let _guard = RunGuard {
            effect: self,
            depth,
        };
        (self.inner.func)();
    }

    /// Detach the effect from every dep and deactivate it. Idempotent.
    ///
    /// Stopping the effect from inside its own run is applied once the run
    /// frame unwinds.
    pub fn stop(&self) {
        if context::effect_on_stack(self.inner.id) {
            self.inner.defer_stop.store(true, Ordering::SeqCst);
            return;
        }
        if self.inner.active.swap(false, Ordering::SeqCst) {
            self.detach_all();
            if let Some(hook) = &self.inner.on_stop {
                hook();
            }
        }
    }

    pub(crate) fn scheduler(&self) -> Option<Scheduler> {
        self.inner.scheduler.clone()
    }

    pub(crate) fn on_track(&self) -> Option<TrackHook> {
        self.inner.on_track.clone()
    }

    pub(crate) fn on_trigger(&self) -> Option<TriggerHook> {
        self.inner.on_trigger.clone()
    }

    pub(crate) fn push_dep(&self, dep: Dep) {
        self.inner
            .deps
            .lock()
            .expect("effect deps lock poisoned")
            .push(dep);
    }

    pub(crate) fn downgrade(&self) -> Weak<EffectInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<EffectInner>) -> Self {
        Self { inner }
    }

    /// Mark every current dep as "was tracked" for this run's level.
    fn init_dep_markers(&self, bit: u32) {
        let deps = self.inner.deps.lock().expect("effect deps lock poisoned");
        for dep in deps.iter() {
            dep.mark_was_tracked(bit);
        }
    }

    /// Compact the dep list after a run: drop deps that were tracked before
    /// this run but not during it, clear this level's marker bits.
    fn finalize_dep_markers(&self, bit: u32) {
        let removed: Vec<Dep> = {
            let mut deps = self.inner.deps.lock().expect("effect deps lock poisoned");
            let mut dropped = Vec::new();
            deps.retain(|dep| {
                let was = dep.was_tracked() & bit != 0;
                let fresh = dep.new_tracked() & bit != 0;
                dep.clear_marker(bit);
                if was && !fresh {
                    dropped.push(dep.clone());
                    false
                } else {
                    true
                }
            });
            dropped
        };
        for dep in removed {
            dep.remove_subscriber(self.inner.id);
        }
    }

    fn detach_all(&self) {
        let drained: Vec<Dep> = {
            let mut deps = self.inner.deps.lock().expect("effect deps lock poisoned");
            deps.drain(..).collect()
        };
        for dep in drained {
            dep.remove_subscriber(self.inner.id);
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("run_count", &self.run_count())
            .field("dep_count", &self.dep_count())
            .finish()
    }
}

struct RunGuard<'a> {
    effect: &'a Effect,
    depth: u32,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.depth <= MAX_MARKER_BITS {
            self.effect.finalize_dep_markers(1 << self.depth);
        }
        context::exit_level();
        context::reset_tracking();
        context::pop_effect(self.effect.id());
        if self.effect.inner.defer_stop.swap(false, Ordering::SeqCst) {
            self.effect.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let _effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lazy_effect_waits_for_first_run() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let effect = Effect::new_lazy(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(effect.run_count(), 0);

        effect.run();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn stopped_effect_still_executes_untracked() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        effect.stop();
        assert!(!effect.is_active());

        effect.run();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        // Untracked runs are not counted as tracked executions.
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn stop_is_idempotent_and_fires_hook_once() {
        let stops = Arc::new(AtomicI32::new(0));
        let stops_clone = stops.clone();

        let effect = Effect::with_options(
            || {},
            EffectOptions {
                on_stop: Some(Arc::new(move || {
                    stops_clone.fetch_add(1, Ordering::SeqCst);
                })),
                ..EffectOptions::default()
            },
        );

        effect.stop();
        effect.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clone_shares_state() {
        let effect = Effect::new(|| {});
        let other = effect.clone();

        assert_eq!(effect.id(), other.id());
        effect.run();
        assert_eq!(other.run_count(), 2);

        other.stop();
        assert!(!effect.is_active());
    }

    #[test]
    fn direct_reentry_is_guarded() {
        // A run() from inside the same effect's function must not recurse.
        struct Cell(Mutex<Option<Effect>>);
        let holder = Arc::new(Cell(Mutex::new(None)));
        let holder_clone = holder.clone();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let effect = Effect::new_lazy(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = holder_clone.0.lock().unwrap().as_ref() {
                me.run();
            }
        });
        *holder.0.lock().unwrap() = Some(effect.clone());

        effect.run();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
