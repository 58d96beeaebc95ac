//! Dependency Registry
//!
//! The registry is the bidirectional graph at the center of the engine: it
//! links every observed (target, key) location to the effects that read it,
//! and every effect back to the locations it read.
//!
//! # How It Works
//!
//! 1. While an effect runs, every observed read calls [`track`], which
//!    subscribes the effect to the location's [`Dep`].
//!
//! 2. Every observed write calls [`trigger`], which selects the affected
//!    Deps (including the iteration and length synthetics), snapshots the
//!    subscribed effects, and re-runs each one (or hands it to its
//!    scheduler).
//!
//! 3. Each Dep carries two bitfields, one bit per effect nesting level,
//!    that let a re-running effect diff its previous dependency set against
//!    the new one without clearing and re-adding everything.
//!
//! # Locking
//!
//! The registry lock is released before any effect runs; effects re-enter
//! [`track`] freely.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use serde::Serialize;

use super::context;
use super::effect::{Effect, EffectId, EffectInner};
use super::target::{StoreKind, Target, TargetId};
use super::value::{MapKey, Value};

/// Read operations surfaced to the `on_track` dev hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// Write operations surfaced to the `on_trigger` dev hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

/// A key in the dependency registry: the observable locations of a target.
///
/// `Iterate` and `MapKeyIterate` are the synthetic keys standing for "read
/// the shape" and "read the key set only"; `Length` is the sequence length
/// location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    Prop(String),
    Index(usize),
    Length,
    Entry(MapKey),
    Iterate,
    MapKeyIterate,
}

/// Record handed to an effect's `on_track` hook.
#[derive(Debug, Clone)]
pub struct TrackEvent {
    pub op: TrackOp,
    /// Absent when the location is a ref or computed cell.
    pub target: Option<TargetId>,
    pub key: Option<DepKey>,
}

/// Record handed to an effect's `on_trigger` hook.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub op: TriggerOp,
    pub target: Option<TargetId>,
    pub key: Option<DepKey>,
    pub new_value: Option<Value>,
    pub old_value: Option<Value>,
}

struct DepInner {
    /// Subscribed effects in insertion order. Weak back-references: the
    /// caller owns effects, the registry owns Deps, neither owns the other.
    subscribers: RwLock<Vec<(EffectId, Weak<EffectInner>)>>,
    /// "Was tracked before this run" marker bits, one per nesting level.
    was_tracked: AtomicU32,
    /// "Newly tracked this run" marker bits.
    new_tracked: AtomicU32,
}

/// The set of effects depending on one observed location.
#[derive(Clone)]
pub(crate) struct Dep {
    inner: Arc<DepInner>,
}

impl Dep {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(DepInner {
                subscribers: RwLock::new(Vec::new()),
                was_tracked: AtomicU32::new(0),
                new_tracked: AtomicU32::new(0),
            }),
        }
    }

    pub(crate) fn was_tracked(&self) -> u32 {
        self.inner.was_tracked.load(Ordering::SeqCst)
    }

    pub(crate) fn new_tracked(&self) -> u32 {
        self.inner.new_tracked.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_was_tracked(&self, bit: u32) {
        self.inner.was_tracked.fetch_or(bit, Ordering::SeqCst);
    }

    pub(crate) fn mark_new_tracked(&self, bit: u32) {
        self.inner.new_tracked.fetch_or(bit, Ordering::SeqCst);
    }

    pub(crate) fn clear_marker(&self, bit: u32) {
        self.inner.was_tracked.fetch_and(!bit, Ordering::SeqCst);
        self.inner.new_tracked.fetch_and(!bit, Ordering::SeqCst);
    }

    pub(crate) fn has_subscriber(&self, id: EffectId) -> bool {
        self.subscribers()
            .iter()
            .any(|(sub_id, _)| *sub_id == id)
    }

    pub(crate) fn add_subscriber(&self, effect: &Effect) {
        self.inner
            .subscribers
            .write()
            .expect("dep subscriber lock poisoned")
            .push((effect.id(), effect.downgrade()));
    }

    pub(crate) fn remove_subscriber(&self, id: EffectId) {
        self.inner
            .subscribers
            .write()
            .expect("dep subscriber lock poisoned")
            .retain(|(sub_id, _)| *sub_id != id);
    }

    /// Live subscribers in insertion order; dead entries are pruned.
    pub(crate) fn live_subscribers(&self) -> Vec<Effect> {
        let mut subs = self
            .inner
            .subscribers
            .write()
            .expect("dep subscriber lock poisoned");
        subs.retain(|(_, weak)| weak.strong_count() > 0);
        subs.iter()
            .filter_map(|(_, weak)| weak.upgrade().map(Effect::from_inner))
            .collect()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn subscribers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, Vec<(EffectId, Weak<EffectInner>)>> {
        self.inner
            .subscribers
            .read()
            .expect("dep subscriber lock poisoned")
    }
}

type DepMap = HashMap<DepKey, Dep>;

// Global registry of observed locations: target -> key -> Dep.
// Entries are created on first track and removed when the target drops.
static REGISTRY: OnceLock<RwLock<HashMap<TargetId, DepMap>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<TargetId, DepMap>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Fetch or create the Dep for a location.
fn dep_for(target: TargetId, key: DepKey) -> Dep {
    registry()
        .write()
        .expect("dep registry lock poisoned")
        .entry(target)
        .or_default()
        .entry(key)
        .or_insert_with(Dep::new)
        .clone()
}

/// Drop every Dep of a disposed target.
///
/// Called from `TargetInner::drop`; this is the disposal half of the
/// weak-reference discipline.
pub(crate) fn dispose_target(target: TargetId) {
    if let Some(lock) = REGISTRY.get() {
        lock.write()
            .expect("dep registry lock poisoned")
            .remove(&target);
    }
}

/// Number of Deps currently registered for a target. Test support.
#[doc(hidden)]
pub fn registered_dep_count(target: TargetId) -> usize {
    REGISTRY
        .get()
        .map(|lock| {
            lock.read()
                .expect("dep registry lock poisoned")
                .get(&target)
                .map(|m| m.len())
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

/// Record that the active effect read `(target, key)`.
///
/// No-op when no effect is running or tracking is paused.
pub(crate) fn track(target: &Target, op: TrackOp, key: DepKey) {
    if !context::tracking_enabled() {
        return;
    }
    let Some(effect) = context::active_effect() else {
        return;
    };
    let dep = dep_for(target.id(), key.clone());
    let event = TrackEvent {
        op,
        target: Some(target.id()),
        key: Some(key),
    };
    track_into(&effect, &dep, event);
}

/// Subscribe the active effect to a bare cell dep (refs, computeds).
pub(crate) fn track_cell(dep: &Dep, op: TrackOp) {
    if !context::tracking_enabled() {
        return;
    }
    let Some(effect) = context::active_effect() else {
        return;
    };
    let event = TrackEvent {
        op,
        target: None,
        key: None,
    };
    track_into(&effect, dep, event);
}

/// The bit-marker subscription protocol.
///
/// Within the marker range, a dep is only (re)subscribed when its
/// "was tracked" bit for the current level is clear; beyond the range the
/// effect has already been fully detached, so membership is checked
/// directly.
fn track_into(effect: &Effect, dep: &Dep, event: TrackEvent) {
    let bit = context::level_bit();
    let should_track = if bit != 0 {
        if dep.new_tracked() & bit == 0 {
            dep.mark_new_tracked(bit);
            dep.was_tracked() & bit == 0
        } else {
            false
        }
    } else {
        !dep.has_subscriber(effect.id())
    };

    if should_track {
        dep.add_subscriber(effect);
        effect.push_dep(dep.clone());
        if let Some(hook) = effect.on_track() {
            hook(&event);
        }
    }
}

/// Notify every effect subscribed to the locations a write touched.
pub(crate) fn trigger(
    target: &Target,
    op: TriggerOp,
    key: Option<DepKey>,
    new_value: Option<Value>,
    old_value: Option<Value>,
) {
    let kind = target.kind();
    let deps: Vec<Dep> = {
        let reg = registry().read().expect("dep registry lock poisoned");
        let Some(deps_map) = reg.get(&target.id()) else {
            return;
        };

        if op == TriggerOp::Clear {
            // A cleared collection invalidates everything observed on it.
            deps_map.values().cloned().collect()
        } else if key == Some(DepKey::Length) && kind == StoreKind::Sequence {
            // Length writes invalidate the length itself plus any index at
            // or past the new end.
            let new_len = new_value
                .as_ref()
                .and_then(Value::as_int)
                .unwrap_or(0)
                .max(0) as usize;
            deps_map
                .iter()
                .filter(|(k, _)| match k {
                    DepKey::Length => true,
                    DepKey::Index(i) => *i >= new_len,
                    _ => false,
                })
                .map(|(_, d)| d.clone())
                .collect()
        } else {
            let mut selected = Vec::new();
            if let Some(k) = &key {
                if let Some(dep) = deps_map.get(k) {
                    selected.push(dep.clone());
                }
            }
            let mut push = |k: DepKey| {
                if let Some(dep) = deps_map.get(&k) {
                    selected.push(dep.clone());
                }
            };
            match op {
                TriggerOp::Add => {
                    if kind != StoreKind::Sequence {
                        push(DepKey::Iterate);
                        if kind == StoreKind::Mapping {
                            push(DepKey::MapKeyIterate);
                        }
                    } else if matches!(key, Some(DepKey::Index(_))) {
                        // A new index changes the length.
                        push(DepKey::Length);
                    }
                }
                TriggerOp::Delete => {
                    if kind != StoreKind::Sequence {
                        push(DepKey::Iterate);
                        if kind == StoreKind::Mapping {
                            push(DepKey::MapKeyIterate);
                        }
                    }
                }
                TriggerOp::Set => {
                    if kind == StoreKind::Mapping {
                        push(DepKey::Iterate);
                    }
                }
                TriggerOp::Clear => unreachable!("handled above"),
            }
            selected
        }
    };
    // Registry lock released; effects are free to track again.

    tracing::trace!(target_id = target.id().raw(), ?op, "trigger");

    let event = TriggerEvent {
        op,
        target: Some(target.id()),
        key,
        new_value,
        old_value,
    };
    run_subscribers(&deps, &event);
}

/// Trigger a bare cell dep (refs, computeds).
pub(crate) fn trigger_cell(dep: &Dep, new_value: Option<Value>, old_value: Option<Value>) {
    let event = TriggerEvent {
        op: TriggerOp::Set,
        target: None,
        key: None,
        new_value,
        old_value,
    };
    run_subscribers(std::slice::from_ref(dep), &event);
}

/// Flatten the selected Deps into a unique, insertion-ordered snapshot and
/// run each effect.
///
/// The snapshot makes the batch stable against subscriptions changing while
/// it fires. The running effect is skipped unless it opted into recursion.
/// A panic in one effect does not starve the rest of the batch; the first
/// payload is re-raised after the batch completes.
fn run_subscribers(deps: &[Dep], event: &TriggerEvent) {
    let mut seen: HashSet<EffectId> = HashSet::new();
    let mut batch: Vec<Effect> = Vec::new();
    for dep in deps {
        for effect in dep.live_subscribers() {
            if seen.insert(effect.id()) {
                batch.push(effect);
            }
        }
    }

    let mut first_panic = None;
    for effect in batch {
        if context::is_active_effect(effect.id()) && !effect.allow_recurse() {
            continue;
        }
        if let Some(hook) = effect.on_trigger() {
            hook(event);
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| match effect.scheduler() {
            Some(scheduler) => scheduler(&effect),
            None => effect.run(),
        }));
        if let Err(payload) = outcome {
            first_panic.get_or_insert(payload);
        }
    }
    if let Some(payload) = first_panic {
        resume_unwind(payload);
    }
}
