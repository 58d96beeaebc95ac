//! Filament Core
//!
//! This crate provides the core of a fine-grained reactive value system:
//! a runtime that observes reads and writes of structured, mutable state
//! and automatically re-executes dependent computations when the values
//! they read change.
//!
//! It implements:
//!
//! - Observable handles over records, sequences, mappings, and sets, with
//!   deep/shallow and mutable/readonly views
//! - A dependency registry linking effects to the exact locations they read
//! - Effect execution with in-place dependency-set diffing
//! - Refs (observable scalar cells) and computeds (lazy derivations)
//!
//! The engine is UI-agnostic: renderers, schedulers, and component
//! lifecycles are external collaborators that drive it through
//! [`reactive::Effect`] and the wrap constructors.
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_core::reactive::{reactive, Effect, Value};
//! use serde_json::json;
//!
//! let state = reactive(Value::from_json(json!({ "count": 0 })));
//! let state = state.as_object().unwrap().clone();
//!
//! let observed = state.clone();
//! Effect::new(move || {
//!     println!("count is {:?}", observed.get("count"));
//! });
//!
//! // Re-runs the effect, prints: count is 1
//! state.set("count", Value::Int(1)).unwrap();
//! ```

pub mod reactive;
