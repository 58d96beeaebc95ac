//! Observable Targets
//!
//! A Target is the underlying structured cell being observed: a record,
//! sequence, mapping, or set behind a lock, plus the flags that gate whether
//! the proxy factory will wrap it.
//!
//! # Disposal
//!
//! The dependency registry is keyed by [`TargetId`]. Rust has no weak-keyed
//! map in std, so instead of weak keys the last `Target` handle to drop
//! removes the target's registry entry. Holding any `Target` (directly or
//! through a `Value` stored in another target) keeps its deps alive.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::{IndexMap, IndexSet};

use super::dep;
use super::value::{MapKey, Value};

/// Counter for generating unique target IDs.
static TARGET_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for an observable target.
///
/// Used as the first-level key of the dependency registry and surfaced to
/// the dev hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        Self(TARGET_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// The kind of structured data a target holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// String-keyed fields, like a plain object.
    Record,
    /// Integer-indexed elements with a length.
    Sequence,
    /// Arbitrary-keyed entries, accessed by method call.
    Mapping,
    /// An unordered collection of distinct values.
    Set,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Record => "record",
            StoreKind::Sequence => "sequence",
            StoreKind::Mapping => "mapping",
            StoreKind::Set => "set",
        }
    }
}

/// The backing data of a target.
///
/// Records and mappings preserve insertion order so iteration (and therefore
/// trigger ordering) is stable across runs.
pub(crate) enum Store {
    Record(IndexMap<String, Value>),
    Sequence(Vec<Value>),
    Mapping(IndexMap<MapKey, Value>),
    SetOf(IndexSet<MapKey>),
}

impl Store {
    pub(crate) fn kind(&self) -> StoreKind {
        match self {
            Store::Record(_) => StoreKind::Record,
            Store::Sequence(_) => StoreKind::Sequence,
            Store::Mapping(_) => StoreKind::Mapping,
            Store::SetOf(_) => StoreKind::Set,
        }
    }
}

pub(crate) struct TargetInner {
    id: TargetId,
    store: RwLock<Store>,
    /// Set by `mark_raw`: the factory returns this target bare.
    skip: AtomicBool,
    /// Frozen targets are never wrapped and reject raw mutation.
    frozen: AtomicBool,
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        dep::dispose_target(self.id);
    }
}

/// Shared handle to an observable target.
///
/// Cloning shares the underlying cell. Equality and hashing are by identity,
/// matching the host-object identity semantics the engine observes.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

impl Target {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id: TargetId::next(),
                store: RwLock::new(store),
                skip: AtomicBool::new(false),
                frozen: AtomicBool::new(false),
            }),
        }
    }

    /// Get the target's unique ID.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// The kind of data this target holds.
    pub fn kind(&self) -> StoreKind {
        self.store().kind()
    }

    pub(crate) fn store(&self) -> RwLockReadGuard<'_, Store> {
        self.inner.store.read().expect("target store lock poisoned")
    }

    pub(crate) fn store_mut(&self) -> RwLockWriteGuard<'_, Store> {
        self.inner.store.write().expect("target store lock poisoned")
    }

    /// Whether `mark_raw` excluded this target from wrapping.
    pub fn is_skipped(&self) -> bool {
        self.inner.skip.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_skip(&self) {
        self.inner.skip.store(true, Ordering::SeqCst);
    }

    /// Whether the target was frozen.
    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::SeqCst)
    }

    /// Freeze the target: it will never be wrapped and raw mutation fails.
    pub fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::SeqCst);
    }

    pub(crate) fn ptr_eq(&self, other: &Target) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Target {}

impl std::hash::Hash for Target {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.inner.id)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Snapshot of a mapping's entries.
pub(crate) fn mapping_snapshot(map: &IndexMap<MapKey, Value>) -> Vec<(MapKey, Value)> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_ids_are_unique() {
        let a = Target::new(Store::Record(IndexMap::new()));
        let b = Target::new(Store::Record(IndexMap::new()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn kind_reflects_store() {
        let rec = Target::new(Store::Record(IndexMap::new()));
        let seq = Target::new(Store::Sequence(Vec::new()));
        assert_eq!(rec.kind(), StoreKind::Record);
        assert_eq!(seq.kind(), StoreKind::Sequence);
    }

    #[test]
    fn flags_default_off() {
        let t = Target::new(Store::Sequence(Vec::new()));
        assert!(!t.is_skipped());
        assert!(!t.is_frozen());

        t.mark_skip();
        t.freeze();
        assert!(t.is_skipped());
        assert!(t.is_frozen());
    }

    #[test]
    fn identity_is_by_handle() {
        let a = Target::new(Store::Record(IndexMap::new()));
        let b = a.clone();
        let c = Target::new(Store::Record(IndexMap::new()));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
