//! Observable Handles
//!
//! [`Obs`] is the engine's proxy: an opaque handle over a [`Target`] whose
//! accessor methods intercept reads and writes. Reads call `track`, writes
//! call `trigger`. There is no transparent substitution; interception lives
//! in typed accessors, and the four wrap modes that would otherwise need
//! four identity maps collapse into the [`Mode`] tag, so wrapping is
//! idempotent by construction.
//!
//! This module carries the factory (`reactive`, `readonly`, `shallow_*`,
//! marker queries) and the plain interceptor for records and sequences.
//! Keyed collections (mappings, sets) are intercepted in the `collection`
//! module.

use super::context::PauseGuard;
use super::dep::{self, DepKey, TrackOp, TriggerOp};
use super::error::{Result, StateError};
use super::target::{Store, StoreKind, Target};
use super::value::{same_value, Key, Value};

/// How a handle views its target.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Mode {
    /// The unwrapped view: reads and writes bypass tracking entirely.
    Raw,
    Reactive {
        shallow: bool,
    },
    Readonly {
        shallow: bool,
        /// A readonly view taken over a reactive wrap keeps observing:
        /// reads still track even though writes are rejected.
        tracked: bool,
    },
}

impl Mode {
    pub(crate) fn is_raw(self) -> bool {
        matches!(self, Mode::Raw)
    }

    pub(crate) fn is_readonly(self) -> bool {
        matches!(self, Mode::Readonly { .. })
    }

    pub(crate) fn is_shallow(self) -> bool {
        matches!(
            self,
            Mode::Reactive { shallow: true } | Mode::Readonly { shallow: true, .. }
        )
    }

    /// Whether reads through this view record dependencies.
    pub(crate) fn tracks(self) -> bool {
        matches!(self, Mode::Reactive { .. } | Mode::Readonly { tracked: true, .. })
    }

    /// The view nested objects get when read through a deep handle.
    fn child_mode(self) -> Mode {
        match self {
            Mode::Raw => Mode::Raw,
            Mode::Reactive { .. } => Mode::Reactive { shallow: false },
            Mode::Readonly { tracked, .. } => Mode::Readonly {
                shallow: false,
                tracked,
            },
        }
    }

    fn label(self) -> &'static str {
        match self {
            Mode::Raw => "raw",
            Mode::Reactive { shallow: false } => "reactive",
            Mode::Reactive { shallow: true } => "shallow-reactive",
            Mode::Readonly { shallow: false, .. } => "readonly",
            Mode::Readonly { shallow: true, .. } => "shallow-readonly",
        }
    }
}

/// A handle onto an observable target.
///
/// Equality is proxy identity: same target, same view.
#[derive(Clone)]
pub struct Obs {
    target: Target,
    mode: Mode,
}

impl PartialEq for Obs {
    fn eq(&self, other: &Self) -> bool {
        self.target.ptr_eq(&other.target) && self.mode == other.mode
    }
}

impl Eq for Obs {}

impl std::fmt::Debug for Obs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Obs({} #{} {})",
            self.target.kind().as_str(),
            self.target.id().raw(),
            self.mode.label()
        )
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

fn wrap(value: Value, readonly: bool, shallow: bool) -> Value {
    let obs = match value {
        Value::Obj(obs) => obs,
        other => {
            tracing::warn!(
                kind = other.kind_name(),
                "value cannot be made reactive; returning it unchanged"
            );
            return other;
        }
    };
    let mode = match obs.mode {
        // A readonly view requested as reactive stays readonly.
        // An existing reactive view is returned unchanged.
        Mode::Readonly { .. } | Mode::Reactive { .. } if !readonly => return Value::Obj(obs),
        // readonly(readonly(x)) == readonly(x).
        Mode::Readonly { .. } => return Value::Obj(obs),
        // Promotion: readonly over a reactive wrap keeps observing reads.
        Mode::Reactive { .. } => Mode::Readonly {
            shallow,
            tracked: true,
        },
        Mode::Raw => {
            // Skip-marked and frozen targets are returned bare.
            if obs.target.is_skipped() || obs.target.is_frozen() {
                return Value::Obj(obs);
            }
            if readonly {
                Mode::Readonly {
                    shallow,
                    tracked: false,
                }
            } else {
                Mode::Reactive { shallow }
            }
        }
    };
    Value::Obj(Obs {
        target: obs.target,
        mode,
    })
}

/// Deep mutable observation of a structured value.
///
/// Non-structured values are returned unchanged (with a warning); wrapping
/// is idempotent.
pub fn reactive(value: Value) -> Value {
    wrap(value, false, false)
}

/// Deep readonly view. Over a reactive wrap this produces a distinct view
/// that still observes reads but rejects writes.
pub fn readonly(value: Value) -> Value {
    wrap(value, true, false)
}

/// Mutable observation of the root only: nested values are returned as
/// stored, refs included.
pub fn shallow_reactive(value: Value) -> Value {
    wrap(value, false, true)
}

/// Readonly view of the root only.
pub fn shallow_readonly(value: Value) -> Value {
    wrap(value, true, true)
}

/// Whether reads through this value record dependencies.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Obj(obs) if obs.mode.tracks())
}

pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Obj(obs) if obs.mode.is_readonly())
}

/// Whether the value is any wrapped view (reactive or readonly).
pub fn is_proxy(value: &Value) -> bool {
    matches!(value, Value::Obj(obs) if !obs.mode.is_raw())
}

/// Unwrap every layer of observation, yielding the raw view of the same
/// target. Non-structured values pass through.
pub fn to_raw(value: Value) -> Value {
    match value {
        Value::Obj(obs) => Value::Obj(Obs::raw(obs.target)),
        other => other,
    }
}

/// Exclude a target from wrapping, in place. Returns the value for
/// chaining.
pub fn mark_raw(value: Value) -> Value {
    if let Value::Obj(obs) = &value {
        obs.target.mark_skip();
    }
    value
}

// ---------------------------------------------------------------------------
// Plain interceptor: records and sequences
// ---------------------------------------------------------------------------

impl Obs {
    pub(crate) fn raw(target: Target) -> Obs {
        Obs {
            target,
            mode: Mode::Raw,
        }
    }

    /// The underlying target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The kind of structured data this handle views.
    pub fn kind(&self) -> StoreKind {
        self.target.kind()
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    fn track_key(&self, op: TrackOp, key: DepKey) {
        if self.mode.tracks() {
            dep::track(&self.target, op, key);
        }
    }

    fn is_raw_view(&self) -> bool {
        self.mode.is_raw()
    }

    fn raw_len(&self) -> usize {
        match &*self.target.store() {
            Store::Record(map) => map.len(),
            Store::Sequence(items) => items.len(),
            Store::Mapping(map) => map.len(),
            Store::SetOf(items) => items.len(),
        }
    }

    /// Convert a stored value on its way out of a read: raw and shallow
    /// views return it as stored, deep views unwrap refs (except sequence
    /// elements read by index) and lazily wrap nested objects per mode.
    pub(crate) fn convert_out(&self, value: Value, preserve_refs: bool) -> Value {
        if self.mode.is_raw() || self.mode.is_shallow() {
            return value;
        }
        match value {
            Value::Ref(r) if !preserve_refs => r.get(),
            Value::Obj(child) => self.wrap_child(child),
            other => other,
        }
    }

    fn wrap_child(&self, child: Obs) -> Value {
        match child.mode {
            Mode::Raw => {
                if child.target.is_skipped() || child.target.is_frozen() {
                    return Value::Obj(child);
                }
                Value::Obj(Obs {
                    target: child.target,
                    mode: self.mode.child_mode(),
                })
            }
            // A stored view keeps itself; a readonly parent promotes a
            // stored reactive view to readonly.
            _ => wrap(Value::Obj(child), self.mode.is_readonly(), false),
        }
    }

    /// Read a location. Missing keys read as null but still register the
    /// dependency, so a later addition re-runs the reader.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        let kind = self.kind();
        match kind {
            StoreKind::Mapping => return self.entry_get(&key.as_entry_key()),
            StoreKind::Set => return Value::Null,
            _ => {}
        }

        if kind == StoreKind::Sequence {
            if let Key::Prop(p) = &key {
                if p == "length" {
                    let n = self.raw_len();
                    self.track_key(TrackOp::Get, DepKey::Length);
                    return Value::Int(n as i64);
                }
            }
        }

        let looked_up = {
            let store = self.target.store();
            match &*store {
                Store::Record(map) => key.as_record_prop().map(|prop| {
                    let res = map.get(&prop).cloned().unwrap_or(Value::Null);
                    (DepKey::Prop(prop), res, false)
                }),
                Store::Sequence(items) => key.as_sequence_index().map(|index| {
                    let res = items.get(index).cloned().unwrap_or(Value::Null);
                    (DepKey::Index(index), res, true)
                }),
                _ => unreachable!("collections handled above"),
            }
        };
        let Some((dep_key, res, preserve_refs)) = looked_up else {
            return Value::Null;
        };

        self.track_key(TrackOp::Get, dep_key);
        self.convert_out(res, preserve_refs)
    }

    /// Write a location. Readonly views warn and leave state unchanged;
    /// raw views write without triggering.
    ///
    /// In deep mode the stored value is raw-unwrapped first, and assigning
    /// a plain value over a ref slot forwards into the ref (the ref's own
    /// trigger fires instead of the target's).
    pub fn set(&self, key: impl Into<Key>, value: Value) -> Result<()> {
        let key = key.into();
        let kind = self.kind();
        match kind {
            StoreKind::Mapping => return self.entry_set(key.as_entry_key(), value),
            StoreKind::Set => {
                return Err(StateError::KindMismatch {
                    op: "set",
                    expected: "record, sequence or mapping",
                    found: "set",
                })
            }
            _ => {}
        }
        if self.mode.is_readonly() {
            tracing::warn!(key = %key.describe(), "set on a readonly view is ignored");
            return Ok(());
        }
        if self.target.is_frozen() {
            return Err(StateError::FrozenTarget);
        }

        let mut value = value;
        if !self.mode.is_raw() && !self.mode.is_shallow() && !is_readonly(&value) {
            value = to_raw(value);
            if kind == StoreKind::Record {
                let existing = {
                    let store = self.target.store();
                    let Store::Record(map) = &*store else {
                        unreachable!()
                    };
                    key.as_record_prop().and_then(|p| map.get(&p).cloned())
                };
                if let Some(Value::Ref(slot)) = existing {
                    if !matches!(value, Value::Ref(_)) {
                        slot.set(value);
                        return Ok(());
                    }
                }
            }
        }

        let (had, old, dep_key) = match kind {
            StoreKind::Record => {
                let Some(prop) = key.as_record_prop() else {
                    return Err(StateError::InvalidKey {
                        key: key.describe(),
                        kind: kind.as_str(),
                    });
                };
                let mut store = self.target.store_mut();
                let Store::Record(map) = &mut *store else {
                    unreachable!()
                };
                let old = map.insert(prop.clone(), value.clone());
                (old.is_some(), old, DepKey::Prop(prop))
            }
            StoreKind::Sequence => {
                let Some(index) = key.as_sequence_index() else {
                    return Err(StateError::InvalidKey {
                        key: key.describe(),
                        kind: kind.as_str(),
                    });
                };
                let mut store = self.target.store_mut();
                let Store::Sequence(items) = &mut *store else {
                    unreachable!()
                };
                let had = index < items.len();
                let old = if had { Some(items[index].clone()) } else { None };
                if !had {
                    items.resize(index + 1, Value::Null);
                }
                items[index] = value.clone();
                (had, old, DepKey::Index(index))
            }
            _ => unreachable!("collections handled above"),
        };

        if self.mode.is_raw() {
            return Ok(());
        }
        if !had {
            dep::trigger(&self.target, TriggerOp::Add, Some(dep_key), Some(value), None);
        } else {
            let old = old.expect("existing key has an old value");
            if !same_value(&old, &value) {
                dep::trigger(
                    &self.target,
                    TriggerOp::Set,
                    Some(dep_key),
                    Some(value),
                    Some(old),
                );
            }
        }
        Ok(())
    }

    /// Key-presence check.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        let kind = self.kind();
        match kind {
            StoreKind::Mapping | StoreKind::Set => return self.entry_has(&key.as_entry_key()),
            _ => {}
        }

        if kind == StoreKind::Sequence {
            if let Key::Prop(p) = &key {
                if p == "length" {
                    self.track_key(TrackOp::Has, DepKey::Length);
                    return true;
                }
            }
        }

        let looked_up = {
            let store = self.target.store();
            match &*store {
                Store::Record(map) => key
                    .as_record_prop()
                    .map(|prop| (DepKey::Prop(prop.clone()), map.contains_key(&prop))),
                Store::Sequence(items) => key
                    .as_sequence_index()
                    .map(|index| (DepKey::Index(index), index < items.len())),
                _ => unreachable!("collections handled above"),
            }
        };
        let Some((dep_key, present)) = looked_up else {
            return false;
        };
        self.track_key(TrackOp::Has, dep_key);
        present
    }

    /// Remove a location. Record fields are removed; sequence slots become
    /// null without shifting (the host's delete-leaves-a-hole semantics).
    /// Readonly views warn and return false.
    pub fn delete(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        let kind = self.kind();
        match kind {
            StoreKind::Mapping | StoreKind::Set => {
                return self.entry_delete(&key.as_entry_key());
            }
            _ => {}
        }
        if self.mode.is_readonly() {
            tracing::warn!(key = %key.describe(), "delete on a readonly view is ignored");
            return false;
        }
        if self.target.is_frozen() {
            return false;
        }

        let deleted = match kind {
            StoreKind::Record => {
                let Some(prop) = key.as_record_prop() else {
                    return false;
                };
                let mut store = self.target.store_mut();
                let Store::Record(map) = &mut *store else {
                    unreachable!()
                };
                map.shift_remove(&prop).map(|old| (DepKey::Prop(prop), old))
            }
            StoreKind::Sequence => {
                let Some(index) = key.as_sequence_index() else {
                    return false;
                };
                let mut store = self.target.store_mut();
                let Store::Sequence(items) = &mut *store else {
                    unreachable!()
                };
                if index < items.len() {
                    let old = std::mem::replace(&mut items[index], Value::Null);
                    Some((DepKey::Index(index), old))
                } else {
                    None
                }
            }
            _ => unreachable!("collections handled above"),
        };

        let Some((dep_key, old)) = deleted else {
            return false;
        };
        if !self.mode.is_raw() {
            dep::trigger(
                &self.target,
                TriggerOp::Delete,
                Some(dep_key),
                None,
                Some(old),
            );
        }
        true
    }

    /// Element/field/entry count. Registers the length dependency for
    /// sequences and the iteration dependency for everything else.
    pub fn len(&self) -> usize {
        let n = self.raw_len();
        match self.kind() {
            StoreKind::Sequence => self.track_key(TrackOp::Get, DepKey::Length),
            _ => self.track_key(TrackOp::Iterate, DepKey::Iterate),
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The target's keys: field names, indices, entry keys, or set members.
    /// Registers the iteration dependency (key-only for mappings).
    pub fn keys(&self) -> Vec<Value> {
        match self.kind() {
            StoreKind::Record => {
                self.track_key(TrackOp::Iterate, DepKey::Iterate);
                let store = self.target.store();
                let Store::Record(map) = &*store else {
                    unreachable!()
                };
                map.keys().map(|k| Value::Str(k.clone())).collect()
            }
            StoreKind::Sequence => {
                self.track_key(TrackOp::Iterate, DepKey::Length);
                (0..self.raw_len() as i64).map(Value::Int).collect()
            }
            StoreKind::Mapping => self.mapping_keys(),
            StoreKind::Set => self.set_values(),
        }
    }

    /// The values behind [`Obs::keys`], read through the interceptor (so
    /// each read registers its own dependency too).
    pub fn values(&self) -> Vec<Value> {
        if self.kind() == StoreKind::Set {
            return self.set_values();
        }
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Key/value pairs, read through the interceptor.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        match self.kind() {
            StoreKind::Mapping => self.mapping_entries(),
            StoreKind::Set => self
                .set_values()
                .into_iter()
                .map(|v| (v.clone(), v))
                .collect(),
            _ => self
                .keys()
                .into_iter()
                .map(|k| {
                    let v = self.get(key_from_value(&k));
                    (k, v)
                })
                .collect(),
        }
    }

    /// Visit every entry. Iteration order is insertion order.
    pub fn for_each(&self, mut f: impl FnMut(&Value, &Value)) {
        for (k, v) in self.entries() {
            f(&k, &v);
        }
    }

    // -- Sequence instrumentation ------------------------------------------

    fn expect_sequence(&self, op: &'static str) -> Result<()> {
        let kind = self.kind();
        if kind != StoreKind::Sequence {
            return Err(StateError::KindMismatch {
                op,
                expected: "sequence",
                found: kind.as_str(),
            });
        }
        Ok(())
    }

    fn check_sequence_write(&self, op: &'static str) -> Result<bool> {
        self.expect_sequence(op)?;
        if self.mode.is_readonly() {
            tracing::warn!(op, "sequence mutation on a readonly view is ignored");
            return Ok(false);
        }
        if self.target.is_frozen() {
            return Err(StateError::FrozenTarget);
        }
        Ok(true)
    }

    fn store_value(&self, value: Value) -> Value {
        if self.mode.is_shallow() || self.mode.is_raw() {
            value
        } else {
            to_raw(value)
        }
    }

    /// Append an element; returns the new length.
    pub fn push(&self, value: Value) -> Result<usize> {
        if !self.check_sequence_write("push")? {
            return Ok(self.raw_len());
        }
        // Length mutators never subscribe their caller to the length they
        // touch; that would make any pushing effect depend on itself.
        let _pause = PauseGuard::new();
        let value = self.store_value(value);
        let index = {
            let mut store = self.target.store_mut();
            let Store::Sequence(items) = &mut *store else {
                unreachable!()
            };
            items.push(value.clone());
            items.len() - 1
        };
        if !self.is_raw_view() {
            dep::trigger(
                &self.target,
                TriggerOp::Add,
                Some(DepKey::Index(index)),
                Some(value),
                None,
            );
        }
        Ok(index + 1)
    }

    /// Remove and return the last element (null when empty).
    pub fn pop(&self) -> Result<Value> {
        if !self.check_sequence_write("pop")? {
            return Ok(Value::Null);
        }
        let _pause = PauseGuard::new();
        let (removed, old_len) = {
            let mut store = self.target.store_mut();
            let Store::Sequence(items) = &mut *store else {
                unreachable!()
            };
            let old_len = items.len();
            (items.pop(), old_len)
        };
        let Some(removed) = removed else {
            return Ok(Value::Null);
        };
        if !self.is_raw_view() {
            dep::trigger(
                &self.target,
                TriggerOp::Set,
                Some(DepKey::Length),
                Some(Value::Int(old_len as i64 - 1)),
                Some(Value::Int(old_len as i64)),
            );
        }
        Ok(self.convert_out(removed, true))
    }

    /// Remove and return the first element (null when empty).
    pub fn shift(&self) -> Result<Value> {
        if !self.check_sequence_write("shift")? {
            return Ok(Value::Null);
        }
        let _pause = PauseGuard::new();
        let (removed, moved, old_len, new_len) = {
            let mut store = self.target.store_mut();
            let Store::Sequence(items) = &mut *store else {
                unreachable!()
            };
            if items.is_empty() {
                return Ok(Value::Null);
            }
            let old = items.clone();
            let removed = items.remove(0);
            let moved = changed_indices(&old, items);
            (removed, moved, old.len(), items.len())
        };
        if !self.is_raw_view() {
            for (index, new, old) in moved {
                dep::trigger(
                    &self.target,
                    TriggerOp::Set,
                    Some(DepKey::Index(index)),
                    Some(new),
                    Some(old),
                );
            }
            dep::trigger(
                &self.target,
                TriggerOp::Set,
                Some(DepKey::Length),
                Some(Value::Int(new_len as i64)),
                Some(Value::Int(old_len as i64)),
            );
        }
        Ok(self.convert_out(removed, true))
    }

    /// Insert an element at the front; returns the new length.
    pub fn unshift(&self, value: Value) -> Result<usize> {
        if !self.check_sequence_write("unshift")? {
            return Ok(self.raw_len());
        }
        let _pause = PauseGuard::new();
        let value = self.store_value(value);
        let (moved, appended, new_len) = {
            let mut store = self.target.store_mut();
            let Store::Sequence(items) = &mut *store else {
                unreachable!()
            };
            let old = items.clone();
            items.insert(0, value);
            let moved = changed_indices(&old, items);
            let appended = (old.len(), items[old.len()].clone());
            (moved, appended, items.len())
        };
        if !self.is_raw_view() {
            for (index, new, old) in moved {
                dep::trigger(
                    &self.target,
                    TriggerOp::Set,
                    Some(DepKey::Index(index)),
                    Some(new),
                    Some(old),
                );
            }
            let (index, new) = appended;
            dep::trigger(
                &self.target,
                TriggerOp::Add,
                Some(DepKey::Index(index)),
                Some(new),
                None,
            );
        }
        Ok(new_len)
    }

    /// Replace `delete_count` elements starting at `start` with
    /// `replacement`; returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        replacement: Vec<Value>,
    ) -> Result<Vec<Value>> {
        if !self.check_sequence_write("splice")? {
            return Ok(Vec::new());
        }
        let _pause = PauseGuard::new();
        let replacement: Vec<Value> = replacement
            .into_iter()
            .map(|v| self.store_value(v))
            .collect();
        let (removed, moved, added, old_len, new_len) = {
            let mut store = self.target.store_mut();
            let Store::Sequence(items) = &mut *store else {
                unreachable!()
            };
            let old = items.clone();
            let start = start.min(old.len());
            let delete_count = delete_count.min(old.len() - start);
            let removed: Vec<Value> = items
                .splice(start..start + delete_count, replacement)
                .collect();
            let shared = old.len().min(items.len());
            let moved: Vec<(usize, Value, Value)> = (0..shared)
                .filter(|&i| !same_value(&items[i], &old[i]))
                .map(|i| (i, items[i].clone(), old[i].clone()))
                .collect();
            let added: Vec<(usize, Value)> = (old.len()..items.len())
                .map(|i| (i, items[i].clone()))
                .collect();
            (removed, moved, added, old.len(), items.len())
        };
        if !self.is_raw_view() {
            for (index, new, old) in moved {
                dep::trigger(
                    &self.target,
                    TriggerOp::Set,
                    Some(DepKey::Index(index)),
                    Some(new),
                    Some(old),
                );
            }
            for (index, new) in added {
                dep::trigger(
                    &self.target,
                    TriggerOp::Add,
                    Some(DepKey::Index(index)),
                    Some(new),
                    None,
                );
            }
            if new_len < old_len {
                dep::trigger(
                    &self.target,
                    TriggerOp::Set,
                    Some(DepKey::Length),
                    Some(Value::Int(new_len as i64)),
                    Some(Value::Int(old_len as i64)),
                );
            }
        }
        Ok(removed
            .into_iter()
            .map(|v| self.convert_out(v, true))
            .collect())
    }

    /// Resize the sequence. Shrinking re-runs readers of any removed index;
    /// growing pads with nulls.
    pub fn set_len(&self, new_len: usize) -> Result<()> {
        if !self.check_sequence_write("set_len")? {
            return Ok(());
        }
        let old_len = {
            let mut store = self.target.store_mut();
            let Store::Sequence(items) = &mut *store else {
                unreachable!()
            };
            let old_len = items.len();
            if new_len < old_len {
                items.truncate(new_len);
            } else {
                items.resize(new_len, Value::Null);
            }
            old_len
        };
        if !self.is_raw_view() && new_len != old_len {
            dep::trigger(
                &self.target,
                TriggerOp::Set,
                Some(DepKey::Length),
                Some(Value::Int(new_len as i64)),
                Some(Value::Int(old_len as i64)),
            );
        }
        Ok(())
    }

    /// First position of `needle` by identity comparison. Tracks the length
    /// and every index, so membership re-checks on any element change.
    ///
    /// The needle is raw-unwrapped before comparing: a wrapped view of an
    /// element finds the raw element it views.
    pub fn index_of(&self, needle: &Value) -> Result<Option<usize>> {
        self.expect_sequence("index_of")?;
        let snapshot = self.tracked_snapshot();
        let needle = to_raw(needle.clone());
        Ok(snapshot.iter().position(|item| same_value(item, &needle)))
    }

    /// Last position of `needle` by identity comparison.
    pub fn last_index_of(&self, needle: &Value) -> Result<Option<usize>> {
        self.expect_sequence("last_index_of")?;
        let snapshot = self.tracked_snapshot();
        let needle = to_raw(needle.clone());
        Ok(snapshot.iter().rposition(|item| same_value(item, &needle)))
    }

    /// Membership by identity comparison.
    pub fn contains(&self, needle: &Value) -> Result<bool> {
        Ok(self.index_of(needle)?.is_some())
    }

    fn tracked_snapshot(&self) -> Vec<Value> {
        let snapshot = {
            let store = self.target.store();
            let Store::Sequence(items) = &*store else {
                unreachable!()
            };
            items.clone()
        };
        self.track_key(TrackOp::Get, DepKey::Length);
        for i in 0..snapshot.len() {
            self.track_key(TrackOp::Get, DepKey::Index(i));
        }
        snapshot
    }
}

/// Pairs of (index, new, old) where the two snapshots differ.
fn changed_indices(old: &[Value], new: &[Value]) -> Vec<(usize, Value, Value)> {
    let shared = old.len().min(new.len());
    (0..shared)
        .filter(|&i| !same_value(&new[i], &old[i]))
        .map(|i| (i, new[i].clone(), old[i].clone()))
        .collect()
}

/// Interpret an iteration key back into an accessor key.
pub(crate) fn key_from_value(value: &Value) -> Key {
    match value {
        Value::Str(s) => Key::Prop(s.clone()),
        Value::Int(n) if *n >= 0 => Key::Index(*n as usize),
        other => Key::Entry(super::value::MapKey::from(other.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        reactive(Value::from_json(json!({"a": 1, "nested": {"b": 2}})))
    }

    #[test]
    fn wrapping_is_idempotent() {
        let state = sample();
        let again = reactive(state.clone());
        assert_eq!(state, again);
        assert!(is_reactive(&state));
        assert!(!is_readonly(&state));
    }

    #[test]
    fn readonly_over_reactive_still_observes() {
        let state = sample();
        let frozen_view = readonly(state.clone());
        assert!(is_readonly(&frozen_view));
        assert!(is_reactive(&frozen_view));
        assert_ne!(state, frozen_view);
    }

    #[test]
    fn to_raw_unwraps_all_layers() {
        let raw = Value::from_json(json!({"a": 1}));
        let wrapped = readonly(reactive(raw.clone()));
        assert_eq!(to_raw(wrapped), raw);
    }

    #[test]
    fn scalars_pass_through_the_factory() {
        let n = reactive(Value::Int(3));
        assert_eq!(n, Value::Int(3));
        assert!(!is_proxy(&n));
    }

    #[test]
    fn marked_raw_targets_stay_bare() {
        let raw = Value::record();
        let raw = mark_raw(raw);
        let wrapped = reactive(raw.clone());
        assert!(!is_proxy(&wrapped));
        assert_eq!(wrapped, raw);
    }

    #[test]
    fn frozen_targets_stay_bare() {
        let raw = Value::record();
        raw.as_object().unwrap().target().freeze();
        let wrapped = reactive(raw.clone());
        assert!(!is_proxy(&wrapped));
    }

    #[test]
    fn deep_reads_wrap_lazily() {
        let state = sample();
        let obs = state.as_object().unwrap();
        let nested = obs.get("nested");
        assert!(is_reactive(&nested));
        assert_eq!(nested.as_object().unwrap().get("b"), Value::Int(2));
    }

    #[test]
    fn shallow_reads_do_not_wrap() {
        let state = shallow_reactive(Value::from_json(json!({"nested": {"b": 2}})));
        let obs = state.as_object().unwrap();
        let nested = obs.get("nested");
        assert!(!is_proxy(&nested));
    }

    #[test]
    fn readonly_set_is_ignored() {
        let state = readonly(Value::from_json(json!({"a": 1})));
        let obs = state.as_object().unwrap();
        obs.set("a", Value::Int(9)).unwrap();
        assert_eq!(obs.get("a"), Value::Int(1));
        assert!(!obs.delete("a"));
        assert_eq!(obs.get("a"), Value::Int(1));
    }

    #[test]
    fn sequence_writes_past_the_end_pad() {
        let seq = reactive(Value::sequence(vec![Value::Int(1)]));
        let obs = seq.as_object().unwrap();
        obs.set(3usize, Value::Int(9)).unwrap();
        assert_eq!(obs.len(), 4);
        assert_eq!(obs.get(2usize), Value::Null);
        assert_eq!(obs.get(3usize), Value::Int(9));
    }

    #[test]
    fn delete_on_sequence_leaves_a_hole() {
        let seq = reactive(Value::sequence(vec![Value::Int(1), Value::Int(2)]));
        let obs = seq.as_object().unwrap();
        assert!(obs.delete(0usize));
        assert_eq!(obs.len(), 2);
        assert_eq!(obs.get(0usize), Value::Null);
    }

    #[test]
    fn numeric_prop_strings_address_elements() {
        let seq = reactive(Value::sequence(vec![Value::Int(7)]));
        let obs = seq.as_object().unwrap();
        assert_eq!(obs.get("0"), Value::Int(7));
        assert_eq!(obs.get("length"), Value::Int(1));
    }

    #[test]
    fn identity_queries_see_raw_and_wrapped_needles() {
        let inner = Value::record();
        let seq = reactive(Value::sequence(vec![inner.clone()]));
        let obs = seq.as_object().unwrap();

        // Raw needle.
        assert!(obs.contains(&inner).unwrap());
        // Wrapped needle for a raw-stored element.
        let wrapped = reactive(inner);
        assert!(obs.contains(&wrapped).unwrap());
        assert_eq!(obs.index_of(&wrapped).unwrap(), Some(0));
    }

    #[test]
    fn splice_reports_removed_elements() {
        let seq = reactive(Value::sequence(
            (1..=4).map(Value::Int).collect::<Vec<_>>(),
        ));
        let obs = seq.as_object().unwrap();
        let removed = obs.splice(1, 2, vec![Value::Int(9)]).unwrap();
        assert_eq!(removed, vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(obs.len(), 3);
        assert_eq!(obs.get(1usize), Value::Int(9));
        assert_eq!(obs.get(2usize), Value::Int(4));
    }
}
