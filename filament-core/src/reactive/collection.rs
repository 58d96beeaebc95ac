//! Keyed Collection Interceptor
//!
//! Mappings and sets are accessed by method call rather than property
//! lookup, so their interception lives on dedicated methods. The unified
//! `get`/`set`/`has`/`delete` surface on [`Obs`] dispatches here when the
//! target is a mapping or set.
//!
//! Keys are normalized to their raw, SameValueZero-hashable form before
//! lookup, so a wrapped view of an object and the raw object address the
//! same entry.

use super::dep::{self, DepKey, TrackOp, TriggerOp};
use super::error::{Result, StateError};
use super::handle::Obs;
use super::target::{mapping_snapshot, Store, StoreKind};
use super::value::{same_value, MapKey, Value};

impl Obs {
    pub(crate) fn entry_get(&self, key: &MapKey) -> Value {
        let res = {
            let store = self.target().store();
            let Store::Mapping(map) = &*store else {
                return Value::Null;
            };
            map.get(key).cloned()
        };
        self.track_entry(TrackOp::Get, key);
        self.convert_out(res.unwrap_or(Value::Null), true)
    }

    pub(crate) fn entry_has(&self, key: &MapKey) -> bool {
        let present = {
            let store = self.target().store();
            match &*store {
                Store::Mapping(map) => map.contains_key(key),
                Store::SetOf(items) => items.contains(key),
                _ => return false,
            }
        };
        self.track_entry(TrackOp::Has, key);
        present
    }

    /// Insert or update a mapping entry.
    pub(crate) fn entry_set(&self, key: MapKey, value: Value) -> Result<()> {
        let kind = self.kind();
        if kind != StoreKind::Mapping {
            return Err(StateError::KindMismatch {
                op: "set",
                expected: "mapping",
                found: kind.as_str(),
            });
        }
        if self.mode().is_readonly() {
            tracing::warn!(key = ?key, "set on a readonly view is ignored");
            return Ok(());
        }
        if self.target().is_frozen() {
            return Err(StateError::FrozenTarget);
        }
        let value = if self.mode().is_shallow() || self.mode().is_raw() {
            value
        } else {
            super::handle::to_raw(value)
        };

        let (had, old) = {
            let mut store = self.target().store_mut();
            let Store::Mapping(map) = &mut *store else {
                unreachable!("kind checked above")
            };
            let old = map.insert(key.clone(), value.clone());
            (old.is_some(), old)
        };

        if self.mode().is_raw() {
            return Ok(());
        }
        if !had {
            dep::trigger(
                self.target(),
                TriggerOp::Add,
                Some(DepKey::Entry(key)),
                Some(value),
                None,
            );
        } else {
            let old = old.expect("existing entry has an old value");
            if !same_value(&old, &value) {
                dep::trigger(
                    self.target(),
                    TriggerOp::Set,
                    Some(DepKey::Entry(key)),
                    Some(value),
                    Some(old),
                );
            }
        }
        Ok(())
    }

    /// Insert a member into a set. Returns whether it was new.
    pub fn add(&self, value: Value) -> Result<bool> {
        let kind = self.kind();
        if kind != StoreKind::Set {
            return Err(StateError::KindMismatch {
                op: "add",
                expected: "set",
                found: kind.as_str(),
            });
        }
        if self.mode().is_readonly() {
            tracing::warn!("add on a readonly view is ignored");
            return Ok(false);
        }
        if self.target().is_frozen() {
            return Err(StateError::FrozenTarget);
        }

        let key = MapKey::from(value);
        let inserted = {
            let mut store = self.target().store_mut();
            let Store::SetOf(items) = &mut *store else {
                unreachable!()
            };
            items.insert(key.clone())
        };
        if inserted && !self.mode().is_raw() {
            dep::trigger(
                self.target(),
                TriggerOp::Add,
                Some(DepKey::Entry(key.clone())),
                Some(Value::from(key)),
                None,
            );
        }
        Ok(inserted)
    }

    pub(crate) fn entry_delete(&self, key: &MapKey) -> bool {
        if self.mode().is_readonly() {
            tracing::warn!(key = ?key, "delete on a readonly view is ignored");
            return false;
        }
        if self.target().is_frozen() {
            return false;
        }

        let old = {
            let mut store = self.target().store_mut();
            match &mut *store {
                Store::Mapping(map) => map.shift_remove(key),
                Store::SetOf(items) => items
                    .shift_remove(key)
                    .then(|| Value::from(key.clone())),
                _ => return false,
            }
        };
        let Some(old) = old else {
            return false;
        };
        if !self.mode().is_raw() {
            dep::trigger(
                self.target(),
                TriggerOp::Delete,
                Some(DepKey::Entry(key.clone())),
                None,
                Some(old),
            );
        }
        true
    }

    /// Empty a mapping or set, invalidating everything observed on it.
    pub fn clear(&self) -> Result<()> {
        let kind = self.kind();
        if !matches!(kind, StoreKind::Mapping | StoreKind::Set) {
            return Err(StateError::KindMismatch {
                op: "clear",
                expected: "mapping or set",
                found: kind.as_str(),
            });
        }
        if self.mode().is_readonly() {
            tracing::warn!("clear on a readonly view is ignored");
            return Ok(());
        }
        if self.target().is_frozen() {
            return Err(StateError::FrozenTarget);
        }

        let had_entries = {
            let mut store = self.target().store_mut();
            match &mut *store {
                Store::Mapping(map) => {
                    let had = !map.is_empty();
                    map.clear();
                    had
                }
                Store::SetOf(items) => {
                    let had = !items.is_empty();
                    items.clear();
                    had
                }
                _ => unreachable!(),
            }
        };
        if had_entries && !self.mode().is_raw() {
            dep::trigger(self.target(), TriggerOp::Clear, None, None, None);
        }
        Ok(())
    }

    /// Mapping keys in insertion order. Registers the key-only iteration
    /// dependency: value-only updates do not re-run key iterators.
    pub(crate) fn mapping_keys(&self) -> Vec<Value> {
        self.track_iterate(DepKey::MapKeyIterate);
        let keys: Vec<MapKey> = {
            let store = self.target().store();
            let Store::Mapping(map) = &*store else {
                return Vec::new();
            };
            map.keys().cloned().collect()
        };
        keys.into_iter()
            .map(|k| self.convert_out(Value::from(k), true))
            .collect()
    }

    pub(crate) fn mapping_entries(&self) -> Vec<(Value, Value)> {
        self.track_iterate(DepKey::Iterate);
        let entries = {
            let store = self.target().store();
            let Store::Mapping(map) = &*store else {
                return Vec::new();
            };
            mapping_snapshot(map)
        };
        entries
            .into_iter()
            .map(|(k, v)| {
                (
                    self.convert_out(Value::from(k), true),
                    self.convert_out(v, true),
                )
            })
            .collect()
    }

    /// Set members in insertion order.
    pub(crate) fn set_values(&self) -> Vec<Value> {
        self.track_iterate(DepKey::Iterate);
        let members: Vec<MapKey> = {
            let store = self.target().store();
            let Store::SetOf(items) = &*store else {
                return Vec::new();
            };
            items.iter().cloned().collect()
        };
        members
            .into_iter()
            .map(|k| self.convert_out(Value::from(k), true))
            .collect()
    }

    fn track_entry(&self, op: TrackOp, key: &MapKey) {
        if self.mode().tracks() {
            dep::track(self.target(), op, DepKey::Entry(key.clone()));
        }
    }

    fn track_iterate(&self, key: DepKey) {
        if self.mode().tracks() {
            dep::track(self.target(), TrackOp::Iterate, key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::handle::reactive;

    fn mapping() -> Obs {
        reactive(Value::mapping()).as_object().unwrap().clone()
    }

    fn set() -> Obs {
        reactive(Value::set_of()).as_object().unwrap().clone()
    }

    #[test]
    fn mapping_set_and_get() {
        let map = mapping();
        map.set(MapKey::from("k"), Value::Int(1)).unwrap();
        assert_eq!(map.get(MapKey::from("k")), Value::Int(1));
        assert!(map.has(MapKey::from("k")));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn string_and_entry_keys_coincide() {
        let map = mapping();
        map.set("name", Value::from("filament")).unwrap();
        assert_eq!(map.get(MapKey::from("name")), Value::from("filament"));
    }

    #[test]
    fn numeric_keys_fold() {
        let map = mapping();
        map.set(MapKey::Int(2), Value::Int(10)).unwrap();
        assert_eq!(map.get(MapKey::from(Value::Float(2.0))), Value::Int(10));
    }

    #[test]
    fn object_keys_use_identity_and_ignore_wrapping() {
        let map = mapping();
        let obj = Value::record();
        map.set(MapKey::from(obj.clone()), Value::Int(5)).unwrap();

        let wrapped = reactive(obj);
        assert_eq!(map.get(MapKey::from(wrapped)), Value::Int(5));
    }

    #[test]
    fn set_add_is_deduplicated() {
        let s = set();
        assert!(s.add(Value::Int(1)).unwrap());
        assert!(!s.add(Value::Int(1)).unwrap());
        assert_eq!(s.len(), 1);
        assert!(s.has(MapKey::Int(1)));
    }

    #[test]
    fn delete_and_clear() {
        let map = mapping();
        map.set("a", Value::Int(1)).unwrap();
        map.set("b", Value::Int(2)).unwrap();

        assert!(map.delete("a"));
        assert!(!map.delete("a"));
        assert_eq!(map.len(), 1);

        map.clear().unwrap();
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let map = mapping();
        map.set("b", Value::Int(2)).unwrap();
        map.set("a", Value::Int(1)).unwrap();

        let keys = map.keys();
        assert_eq!(keys, vec![Value::from("b"), Value::from("a")]);
    }
}
