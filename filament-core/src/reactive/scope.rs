//! Effect Scopes
//!
//! A scope collects effects so they can be disposed together. Components
//! and other composite lifetimes create a scope, pass it in the effect
//! options, and call [`Scope::stop`] once on teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::effect::Effect;

struct ScopeInner {
    active: AtomicBool,
    effects: Mutex<Vec<Effect>>,
    children: Mutex<Vec<Scope>>,
}

/// A disposable group of effects. Cloning shares the scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                active: AtomicBool::new(true),
                effects: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a nested scope that stops with this one.
    pub fn child(&self) -> Scope {
        let child = Scope::new();
        self.inner
            .children
            .lock()
            .expect("scope children lock poisoned")
            .push(child.clone());
        child
    }

    pub(crate) fn register(&self, effect: &Effect) {
        if self.is_active() {
            self.inner
                .effects
                .lock()
                .expect("scope effects lock poisoned")
                .push(effect.clone());
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Run `f` with access to the scope, so effects created inside can bind
    /// to it. A stopped scope skips the call.
    pub fn run<T>(&self, f: impl FnOnce(&Scope) -> T) -> Option<T> {
        if self.is_active() {
            Some(f(self))
        } else {
            tracing::warn!("cannot run on a stopped scope");
            None
        }
    }

    /// Number of effects registered in this scope (children excluded).
    pub fn effect_count(&self) -> usize {
        self.inner
            .effects
            .lock()
            .expect("scope effects lock poisoned")
            .len()
    }

    /// Stop every effect in the scope and in nested scopes. Idempotent.
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let effects: Vec<Effect> = self
            .inner
            .effects
            .lock()
            .expect("scope effects lock poisoned")
            .drain(..)
            .collect();
        for effect in effects {
            effect.stop();
        }
        let children: Vec<Scope> = self
            .inner
            .children
            .lock()
            .expect("scope children lock poisoned")
            .drain(..)
            .collect();
        for child in children {
            child.stop();
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::EffectOptions;

    #[test]
    fn scope_collects_effects() {
        let scope = Scope::new();
        let effect = Effect::with_options(
            || {},
            EffectOptions {
                scope: Some(scope.clone()),
                ..EffectOptions::default()
            },
        );

        assert_eq!(scope.effect_count(), 1);
        assert!(effect.is_active());

        scope.stop();
        assert!(!effect.is_active());
        assert!(!scope.is_active());
    }

    #[test]
    fn nested_scopes_stop_with_parent() {
        let parent = Scope::new();
        let child = parent.child();

        let effect = Effect::with_options(
            || {},
            EffectOptions {
                scope: Some(child.clone()),
                ..EffectOptions::default()
            },
        );

        parent.stop();
        assert!(!child.is_active());
        assert!(!effect.is_active());
    }

    #[test]
    fn run_skips_when_stopped() {
        let scope = Scope::new();
        assert_eq!(scope.run(|_| 5), Some(5));

        scope.stop();
        assert_eq!(scope.run(|_| 5), None);
    }

    #[test]
    fn stopped_scope_rejects_new_effects() {
        let scope = Scope::new();
        scope.stop();

        let _effect = Effect::with_options(
            || {},
            EffectOptions {
                scope: Some(scope.clone()),
                ..EffectOptions::default()
            },
        );
        assert_eq!(scope.effect_count(), 0);
    }
}
