//! Ref Cells
//!
//! A Ref is a single-slot observable cell: reading `get` subscribes the
//! running effect to the cell's own dep, writing `set` triggers it when the
//! value actually changed (identity comparison, NaN-aware).
//!
//! Deep refs store structured values reactively wrapped, so `r.get()` of an
//! object is already observable; shallow refs store exactly what they were
//! given.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::dep::{self, Dep, TrackOp};
use super::handle::{reactive, to_raw};
use super::value::{same_value, Value};

/// Counter for generating unique ref IDs.
static REF_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

struct RefInner {
    id: u64,
    dep: Dep,
    shallow: bool,
    value: RwLock<Value>,
}

/// A single-slot observable cell. Cloning shares the slot.
#[derive(Clone)]
pub struct Ref {
    inner: Arc<RefInner>,
}

impl Ref {
    /// A deep ref: structured values are stored reactively wrapped.
    pub fn new(value: Value) -> Ref {
        Self::build(value, false)
    }

    /// A shallow ref: the value is stored as given, only the slot itself is
    /// observable.
    pub fn shallow(value: Value) -> Ref {
        Self::build(value, true)
    }

    fn build(value: Value, shallow: bool) -> Ref {
        let stored = if shallow { value } else { deep_wrap(value) };
        Ref {
            inner: Arc::new(RefInner {
                id: REF_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                dep: Dep::new(),
                shallow,
                value: RwLock::new(stored),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn ptr_eq(&self, other: &Ref) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read the cell, subscribing the running effect.
    pub fn get(&self) -> Value {
        dep::track_cell(&self.inner.dep, TrackOp::Get);
        self.raw_value()
    }

    /// Read the cell without tracking.
    pub fn raw_value(&self) -> Value {
        self.inner
            .value
            .read()
            .expect("ref value lock poisoned")
            .clone()
    }

    /// Write the cell. Triggers subscribers only when the raw value
    /// actually changed; two NaNs count as unchanged.
    pub fn set(&self, value: Value) {
        let old = {
            let current = self.inner.value.read().expect("ref value lock poisoned");
            if same_value(&to_raw(value.clone()), &to_raw(current.clone())) {
                return;
            }
            current.clone()
        };
        let stored = if self.inner.shallow {
            value
        } else {
            deep_wrap(value)
        };
        *self.inner.value.write().expect("ref value lock poisoned") = stored.clone();
        dep::trigger_cell(&self.inner.dep, Some(stored), Some(old));
    }
}

impl std::fmt::Debug for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ref(#{} {:?})", self.inner.id, self.raw_value())
    }
}

fn deep_wrap(value: Value) -> Value {
    if value.is_object() {
        reactive(value)
    } else {
        value
    }
}

/// Whether the value is a ref cell.
pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// Read through a ref if the value is one, otherwise pass it through.
pub fn unref(value: Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other,
    }
}
