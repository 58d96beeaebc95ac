//! Tracking Context
//!
//! The context tracks which effect is currently running and whether reads
//! should record dependencies at all. This enables automatic dependency
//! tracking: when an observed location is read, the engine can subscribe
//! the current effect to it.
//!
//! # Implementation
//!
//! A thread-local stack holds the currently executing effects (outermost
//! first), a parallel boolean stack holds the tracking-enable state, and a
//! depth counter assigns each nesting level its marker bit for the dep-diff
//! protocol. The single cooperative execution context the engine assumes
//! maps onto "one thread": sharing targets across threads is fine, running
//! effects from two threads concurrently is not supported.

use std::cell::RefCell;

use super::effect::{Effect, EffectId};

/// Nesting levels that get a dedicated marker bit; deeper runs fall back to
/// full cleanup-and-resubscribe.
pub const MAX_MARKER_BITS: u32 = 30;

struct TrackingState {
    /// Active effects, outermost first. The last entry is the effect whose
    /// reads are being tracked.
    stack: Vec<Effect>,
    /// Tracking-enable stack; reads record dependencies only while the top
    /// is `true`. Empty means enabled.
    enabled: Vec<bool>,
    /// Current effect nesting depth. Level `d` uses marker bit `1 << d`.
    depth: u32,
}

thread_local! {
    static TRACKING: RefCell<TrackingState> = RefCell::new(TrackingState {
        stack: Vec::new(),
        enabled: Vec::new(),
        depth: 0,
    });
}

/// The effect whose reads are currently being tracked, if any.
pub(crate) fn active_effect() -> Option<Effect> {
    TRACKING.with(|t| t.borrow().stack.last().cloned())
}

/// Whether `id` is the innermost running effect.
pub(crate) fn is_active_effect(id: EffectId) -> bool {
    TRACKING.with(|t| t.borrow().stack.last().map(Effect::id) == Some(id))
}

/// Whether `id` is anywhere on the running stack (re-entry detection).
pub(crate) fn effect_on_stack(id: EffectId) -> bool {
    TRACKING.with(|t| t.borrow().stack.iter().any(|e| e.id() == id))
}

/// Whether reads currently record dependencies.
pub(crate) fn tracking_enabled() -> bool {
    TRACKING.with(|t| t.borrow().enabled.last().copied().unwrap_or(true))
}

pub(crate) fn push_effect(effect: Effect) {
    TRACKING.with(|t| t.borrow_mut().stack.push(effect));
}

pub(crate) fn pop_effect(expected: EffectId) {
    TRACKING.with(|t| {
        let popped = t.borrow_mut().stack.pop();
        debug_assert_eq!(
            popped.map(|e| e.id()),
            Some(expected),
            "active-effect stack out of balance"
        );
    });
}

/// Enter one nesting level; returns the new depth.
pub(crate) fn enter_level() -> u32 {
    TRACKING.with(|t| {
        let mut t = t.borrow_mut();
        t.depth += 1;
        t.depth
    })
}

pub(crate) fn exit_level() {
    TRACKING.with(|t| {
        let mut t = t.borrow_mut();
        debug_assert!(t.depth > 0, "tracking depth underflow");
        t.depth = t.depth.saturating_sub(1);
    });
}

pub(crate) fn level() -> u32 {
    TRACKING.with(|t| t.borrow().depth)
}

/// The marker bit of the current nesting level, or 0 beyond the bit range.
pub(crate) fn level_bit() -> u32 {
    let depth = level();
    if depth <= MAX_MARKER_BITS {
        1u32 << depth
    } else {
        0
    }
}

/// Stop recording dependencies until the matching [`reset_tracking`].
pub fn pause_tracking() {
    TRACKING.with(|t| t.borrow_mut().enabled.push(false));
}

/// Force-record dependencies until the matching [`reset_tracking`].
pub fn enable_tracking() {
    TRACKING.with(|t| t.borrow_mut().enabled.push(true));
}

/// Undo the innermost [`pause_tracking`] / [`enable_tracking`].
pub fn reset_tracking() {
    TRACKING.with(|t| {
        t.borrow_mut().enabled.pop();
    });
}

/// Guard form of [`pause_tracking`]; resets on drop, panic included.
pub(crate) struct PauseGuard(());

impl PauseGuard {
    pub(crate) fn new() -> Self {
        pause_tracking();
        PauseGuard(())
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        reset_tracking();
    }
}

/// Run `f` with dependency tracking paused.
///
/// Reads inside `f` do not subscribe the surrounding effect.
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    let _guard = PauseGuard::new();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_enabled_by_default() {
        assert!(tracking_enabled());
    }

    #[test]
    fn pause_and_reset_nest() {
        assert!(tracking_enabled());

        pause_tracking();
        assert!(!tracking_enabled());

        enable_tracking();
        assert!(tracking_enabled());

        reset_tracking();
        assert!(!tracking_enabled());

        reset_tracking();
        assert!(tracking_enabled());
    }

    #[test]
    fn untracked_restores_on_exit() {
        untracked(|| {
            assert!(!tracking_enabled());
        });
        assert!(tracking_enabled());
    }

    #[test]
    fn levels_nest() {
        assert_eq!(level(), 0);
        let d1 = enter_level();
        assert_eq!(d1, 1);
        assert_eq!(level_bit(), 0b10);
        let d2 = enter_level();
        assert_eq!(d2, 2);
        exit_level();
        exit_level();
        assert_eq!(level(), 0);
    }
}
