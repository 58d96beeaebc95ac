//! Dynamic Value Model
//!
//! The engine observes structured, dynamically-shaped state. [`Value`] is
//! the datum it traffics in: scalars, structured objects (records,
//! sequences, mappings, sets) and single-slot ref cells.
//!
//! # Identity
//!
//! Change detection and mapping keys use SameValueZero-style comparison:
//! NaN equals NaN, integers and floats compare numerically, objects and
//! refs compare by identity. The one place the engine is stricter is
//! [`same_value`], which distinguishes `+0.0` from `-0.0` so a sign-flipping
//! write still triggers.
//!
//! # JSON boundary
//!
//! State trees are commonly ingested from JSON. `Value::from_json` converts
//! objects into raw record targets and arrays into raw sequence targets;
//! `to_json` snapshots raw state back out without tracking anything.

use indexmap::{IndexMap, IndexSet};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use super::handle::Obs;
use super::reference::Ref;
use super::target::{Store, StoreKind, Target};

/// A dynamic reactive datum.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A structured object: a handle onto a [`Target`], raw or wrapped.
    Obj(Obs),
    /// A single-slot observable cell.
    Ref(Ref),
}

impl Value {
    /// An empty raw record target.
    pub fn record() -> Value {
        Value::Obj(Obs::raw(Target::new(Store::Record(IndexMap::new()))))
    }

    /// A raw sequence target with the given elements.
    pub fn sequence(items: Vec<Value>) -> Value {
        Value::Obj(Obs::raw(Target::new(Store::Sequence(items))))
    }

    /// An empty raw mapping target.
    pub fn mapping() -> Value {
        Value::Obj(Obs::raw(Target::new(Store::Mapping(IndexMap::new()))))
    }

    /// An empty raw set target.
    pub fn set_of() -> Value {
        Value::Obj(Obs::raw(Target::new(Store::SetOf(IndexSet::new()))))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Obj(_))
    }

    pub fn as_object(&self) -> Option<&Obs> {
        match self {
            Value::Obj(obs) => Some(obs),
            _ => None,
        }
    }

    pub fn as_ref_cell(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Host-style truthiness: null, false, 0, NaN and "" are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Obj(_) | Value::Ref(_) => true,
        }
    }

    /// A short name for the value's kind, used in warnings and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Obj(obs) => obs.target().kind().as_str(),
            Value::Ref(_) => "ref",
        }
    }

    /// Convert a JSON tree into a raw value graph.
    ///
    /// Objects become record targets, arrays become sequence targets.
    /// Numbers keep their integer-ness where JSON had it.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::sequence(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => {
                let map: IndexMap<String, Value> = fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect();
                Value::Obj(Obs::raw(Target::new(Store::Record(map))))
            }
        }
    }

    /// Snapshot the raw state as JSON, without tracking.
    ///
    /// Refs flatten to their current value. Mappings serialize as objects
    /// when every key is a string, otherwise as arrays of `[key, value]`
    /// pairs; sets serialize as arrays. Non-finite floats become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Ref(r) => r.raw_value().to_json(),
            Value::Obj(obs) => {
                let target = obs.target();
                match &*target.store() {
                    Store::Record(map) => serde_json::Value::Object(
                        map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
                    ),
                    Store::Sequence(items) => {
                        serde_json::Value::Array(items.iter().map(Value::to_json).collect())
                    }
                    Store::Mapping(map) => {
                        if map.keys().all(|k| matches!(k, MapKey::Str(_))) {
                            serde_json::Value::Object(
                                map.iter()
                                    .map(|(k, v)| {
                                        let name = match k {
                                            MapKey::Str(s) => s.clone(),
                                            _ => unreachable!(),
                                        };
                                        (name, v.to_json())
                                    })
                                    .collect(),
                            )
                        } else {
                            serde_json::Value::Array(
                                map.iter()
                                    .map(|(k, v)| {
                                        serde_json::Value::Array(vec![
                                            Value::from(k.clone()).to_json(),
                                            v.to_json(),
                                        ])
                                    })
                                    .collect(),
                            )
                        }
                    }
                    Store::SetOf(items) => serde_json::Value::Array(
                        items
                            .iter()
                            .map(|k| Value::from(k.clone()).to_json())
                            .collect(),
                    ),
                }
            }
        }
    }
}

/// SameValueZero-flavored identity comparison, except that `+0.0` and
/// `-0.0` are distinct (a sign flip is an observable change).
///
/// Integers and floats compare numerically: a state tree ingested from JSON
/// as `2` and later written as `2.0` has not changed.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Obj(x), Value::Obj(y)) => x.target().ptr_eq(y.target()),
        (Value::Ref(x), Value::Ref(y)) => x.ptr_eq(y),
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                return false;
            };
            if x.is_nan() && y.is_nan() {
                return true;
            }
            x.to_bits() == y.to_bits()
        }
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        same_value(self, other)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Obj(obs) => write!(f, "{obs:?}"),
            Value::Ref(r) => write!(f, "{r:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from_json)
    }
}

/// The SameValueZero-hashable form of a value, used as mapping and set
/// member keys.
///
/// NaN collapses to one key, `-0.0` folds into `+0.0`, and floats with an
/// exact integer value fold into [`MapKey::Int`] so `2` and `2.0` address
/// the same entry. Objects and refs key by identity.
#[derive(Clone)]
pub enum MapKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Canonicalized bit pattern of a non-integral float.
    Float(u64),
    Str(String),
    Obj(Target),
    Ref(Ref),
}

impl MapKey {
    fn canonical_float(f: f64) -> MapKey {
        if f.is_nan() {
            return MapKey::Float(f64::NAN.to_bits());
        }
        let f = if f == 0.0 { 0.0 } else { f };
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
            MapKey::Int(f as i64)
        } else {
            MapKey::Float(f.to_bits())
        }
    }
}

impl From<Value> for MapKey {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => MapKey::Null,
            Value::Bool(b) => MapKey::Bool(b),
            Value::Int(n) => MapKey::Int(n),
            Value::Float(f) => MapKey::canonical_float(f),
            Value::Str(s) => MapKey::Str(s),
            // Keys are stored raw: a proxy key and its raw target address
            // the same entry.
            Value::Obj(obs) => MapKey::Obj(obs.target().clone()),
            Value::Ref(r) => MapKey::Ref(r),
        }
    }
}

impl From<MapKey> for Value {
    fn from(k: MapKey) -> Self {
        match k {
            MapKey::Null => Value::Null,
            MapKey::Bool(b) => Value::Bool(b),
            MapKey::Int(n) => Value::Int(n),
            MapKey::Float(bits) => Value::Float(f64::from_bits(bits)),
            MapKey::Str(s) => Value::Str(s),
            MapKey::Obj(target) => Value::Obj(Obs::raw(target)),
            MapKey::Ref(r) => Value::Ref(r),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::Str(s.to_owned())
    }
}

impl From<i64> for MapKey {
    fn from(n: i64) -> Self {
        MapKey::Int(n)
    }
}

impl From<bool> for MapKey {
    fn from(b: bool) -> Self {
        MapKey::Bool(b)
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MapKey::Null, MapKey::Null) => true,
            (MapKey::Bool(x), MapKey::Bool(y)) => x == y,
            (MapKey::Int(x), MapKey::Int(y)) => x == y,
            (MapKey::Float(x), MapKey::Float(y)) => x == y,
            (MapKey::Str(x), MapKey::Str(y)) => x == y,
            (MapKey::Obj(x), MapKey::Obj(y)) => x.ptr_eq(y),
            (MapKey::Ref(x), MapKey::Ref(y)) => x.ptr_eq(y),
            _ => false,
        }
    }
}

impl Eq for MapKey {}

impl std::hash::Hash for MapKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            MapKey::Null => 0u8.hash(state),
            MapKey::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            MapKey::Int(n) => {
                2u8.hash(state);
                n.hash(state);
            }
            MapKey::Float(bits) => {
                3u8.hash(state);
                bits.hash(state);
            }
            MapKey::Str(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            MapKey::Obj(t) => {
                5u8.hash(state);
                t.id().hash(state);
            }
            MapKey::Ref(r) => {
                6u8.hash(state);
                r.id().hash(state);
            }
        }
    }
}

impl std::fmt::Debug for MapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", Value::from(self.clone()))
    }
}

/// A public accessor key for record and sequence access.
///
/// Mapping and set operations take [`MapKey`] (or anything `Into<MapKey>`);
/// `Key::Entry` lets the unified `get`/`set`/`has`/`delete` surface address
/// those targets too.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Key {
    Prop(String),
    Index(usize),
    Entry(MapKey),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Prop(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Prop(s)
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl From<MapKey> for Key {
    fn from(k: MapKey) -> Self {
        Key::Entry(k)
    }
}

impl Key {
    /// Coerce to a record field name. Integer keys read as their decimal
    /// form, like host property access does.
    pub(crate) fn as_record_prop(&self) -> Option<String> {
        match self {
            Key::Prop(s) => Some(s.clone()),
            Key::Index(i) => Some(i.to_string()),
            Key::Entry(MapKey::Str(s)) => Some(s.clone()),
            Key::Entry(MapKey::Int(n)) => Some(n.to_string()),
            Key::Entry(_) => None,
        }
    }

    /// Coerce to a sequence index. Numeric property strings address
    /// elements, everything else does not.
    pub(crate) fn as_sequence_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Prop(s) => s.parse::<usize>().ok(),
            Key::Entry(MapKey::Int(n)) => usize::try_from(*n).ok(),
            Key::Entry(_) => None,
        }
    }

    /// Coerce to a mapping/set entry key.
    pub(crate) fn as_entry_key(&self) -> MapKey {
        match self {
            Key::Prop(s) => MapKey::Str(s.clone()),
            Key::Index(i) => MapKey::Int(*i as i64),
            Key::Entry(k) => k.clone(),
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Key::Prop(s) => s.clone(),
            Key::Index(i) => i.to_string(),
            Key::Entry(k) => format!("{k:?}"),
        }
    }
}

/// Reach the value's underlying [`StoreKind`], if it is structured.
pub fn store_kind(v: &Value) -> Option<StoreKind> {
    v.as_object().map(|obs| obs.target().kind())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_value_is_nan_aware() {
        assert!(same_value(&Value::Float(f64::NAN), &Value::Float(f64::NAN)));
        assert!(!same_value(&Value::Float(0.0), &Value::Float(-0.0)));
        assert!(same_value(&Value::Int(2), &Value::Float(2.0)));
        assert!(!same_value(&Value::Int(2), &Value::Str("2".into())));
    }

    #[test]
    fn object_identity_ignores_wrap_mode() {
        let a = Value::record();
        let obs = a.as_object().unwrap().clone();
        let b = Value::Obj(obs);
        assert!(same_value(&a, &b));
        assert!(!same_value(&Value::record(), &Value::record()));
    }

    #[test]
    fn map_key_folds_numeric_aliases() {
        assert_eq!(MapKey::from(Value::Float(2.0)), MapKey::Int(2));
        assert_eq!(MapKey::from(Value::Float(-0.0)), MapKey::Int(0));
        assert_eq!(
            MapKey::from(Value::Float(f64::NAN)),
            MapKey::from(Value::Float(-f64::NAN))
        );
        assert_ne!(MapKey::from(Value::Float(2.5)), MapKey::Int(2));
    }

    #[test]
    fn json_round_trip() {
        let json = serde_json::json!({
            "name": "filament",
            "count": 3,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "nested": {"on": true}
        });
        let value = Value::from_json(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn key_coercions() {
        assert_eq!(Key::from("3").as_sequence_index(), Some(3));
        assert_eq!(Key::from("x").as_sequence_index(), None);
        assert_eq!(Key::from(4usize).as_record_prop(), Some("4".into()));
        assert_eq!(Key::from("k").as_entry_key(), MapKey::Str("k".into()));
    }
}
