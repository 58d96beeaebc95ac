//! Reactive Primitives
//!
//! This module implements the core reactive system: observable values,
//! effects, refs, and computed derivations, connected by a dependency
//! registry that maps every observed (target, key) location to the effects
//! that read it.
//!
//! # Concepts
//!
//! ## Observable values
//!
//! A structured value (record, sequence, mapping, or set) is wrapped by
//! [`reactive`] into a handle whose accessor methods intercept reads and
//! writes. Reading a location within a tracking context automatically
//! registers the current effect as a dependent; writing a location re-runs
//! the effects that depend on it.
//!
//! ## Effects
//!
//! An [`Effect`] is a side-effecting computation that re-runs whenever one
//! of the locations it read during its last run changes. After every run
//! its dependency set equals exactly what it read in that run: stale
//! subscriptions from earlier runs are pruned in place.
//!
//! ## Refs and computeds
//!
//! A [`Ref`] is a single-slot observable cell. A [`Computed`] is a lazy,
//! memoized derivation: source writes invalidate it once, and it recomputes
//! on the next read.
//!
//! # Implementation Notes
//!
//! The tracking context is thread-local: the engine assumes one cooperative
//! execution context, and sharing values across threads is supported while
//! running effects concurrently is not. This approach (sometimes called
//! "automatic dependency tracking" or "transparent reactivity") follows the
//! fine-grained reactive systems popularized by declarative UI frameworks.

mod collection;
mod computed;
mod context;
mod dep;
mod effect;
mod error;
mod handle;
mod reference;
mod scope;
mod target;
mod value;

pub use computed::Computed;
pub use context::{enable_tracking, pause_tracking, reset_tracking, untracked, MAX_MARKER_BITS};
pub use dep::{DepKey, TrackEvent, TrackOp, TriggerEvent, TriggerOp};
pub use effect::{
    Effect, EffectId, EffectOptions, Scheduler, StopHook, TrackHook, TriggerHook,
};
pub use error::{Result, StateError};
pub use handle::{
    is_proxy, is_reactive, is_readonly, mark_raw, reactive, readonly, shallow_reactive,
    shallow_readonly, to_raw, Obs,
};
pub use reference::{is_ref, unref, Ref};
pub use scope::Scope;
pub use target::{StoreKind, Target, TargetId};
pub use value::{same_value, store_kind, Key, MapKey, Value};

#[doc(hidden)]
pub use dep::registered_dep_count;
