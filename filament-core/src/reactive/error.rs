//! Error types for the reactive engine.
//!
//! Genuine API misuse (calling a sequence operation on a record, writing to
//! a frozen target) surfaces as [`StateError`]. Readonly violations are
//! deliberately NOT errors: they warn and leave state unchanged, so
//! non-strict call sites keep working.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("operation `{op}` requires a {expected} target, found {found}")]
    KindMismatch {
        op: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("cannot mutate a frozen target")]
    FrozenTarget,

    #[error("key `{key}` cannot address a {kind} target")]
    InvalidKey { key: String, kind: &'static str },
}
