//! Computed Values
//!
//! A Computed is a lazily evaluated, memoized derivation. Internally it is
//! a lazy effect whose scheduler does not re-run eagerly: it marks the
//! computed dirty and triggers the computed's own dep instead. Reading the
//! value recomputes only when dirty, then subscribes the outer effect.
//!
//! The result is pull-based invalidation: downstream effects depend on the
//! computed, the computed depends transitively on its sources, and a source
//! write costs at most one dirty-marking per computed until the next read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use super::dep::{self, Dep, TrackOp};
use super::effect::{Effect, EffectOptions};

struct ComputedInner<T> {
    dep: Dep,
    dirty: AtomicBool,
    value: RwLock<Option<T>>,
    effect: OnceLock<Effect>,
}

/// A lazily evaluated, memoized, observable derivation.
///
/// Cloning shares the computation and its cache.
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed from its derivation function. Nothing runs until
    /// the first [`Computed::get`].
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(ComputedInner {
            dep: Dep::new(),
            dirty: AtomicBool::new(true),
            value: RwLock::new(None),
            effect: OnceLock::new(),
        });

        let for_run: Weak<ComputedInner<T>> = Arc::downgrade(&inner);
        let for_schedule: Weak<ComputedInner<T>> = Arc::downgrade(&inner);

        let effect = Effect::with_options(
            move || {
                if let Some(inner) = for_run.upgrade() {
                    let value = compute();
                    *inner.value.write().expect("computed value lock poisoned") = Some(value);
                }
            },
            EffectOptions {
                lazy: true,
                // Source writes do not recompute; they invalidate once and
                // pass the wave on to whoever reads the computed.
                scheduler: Some(Arc::new(move |_effect| {
                    if let Some(inner) = for_schedule.upgrade() {
                        if !inner.dirty.swap(true, Ordering::SeqCst) {
                            dep::trigger_cell(&inner.dep, None, None);
                        }
                    }
                })),
                ..EffectOptions::default()
            },
        );
        let _ = inner.effect.set(effect);

        Self { inner }
    }

    /// Current value, recomputing if a dependency changed since the last
    /// read. Subscribes the running effect to the computed.
    pub fn get(&self) -> T {
        dep::track_cell(&self.inner.dep, TrackOp::Get);
        if self.inner.dirty.swap(false, Ordering::SeqCst) {
            self.effect().run();
        }
        self.inner
            .value
            .read()
            .expect("computed value lock poisoned")
            .clone()
            .expect("computed has produced a value")
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Stop observing sources. Later reads still recompute on demand, but
    /// source writes no longer invalidate.
    pub fn stop(&self) {
        self.effect().stop();
    }

    fn effect(&self) -> &Effect {
        self.inner.effect.get().expect("computed effect installed")
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Computed<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("dirty", &self.is_dirty())
            .field("value", &*self.inner.value.read().expect("computed value lock poisoned"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn computed_is_lazy() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let c = Computed::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(c.is_dirty());

        assert_eq!(c.get(), 42);
        assert_eq!(c.get(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!c.is_dirty());
    }

    #[test]
    fn clone_shares_the_cache() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let a = Computed::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            1
        });
        let b = a.clone();

        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
