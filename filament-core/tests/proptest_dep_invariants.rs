//! Property-based invariant tests for the dependency-tracking engine.
//!
//! Verifies structural guarantees under randomized schedules:
//!
//! 1. Dep-diff law: after a run, an effect's dependency list equals exactly
//!    the set of locations it read during that run
//! 2. Writes to locations outside the current read set never re-run
//! 3. Writes that do not change a value (identity comparison) never re-run
//! 4. A stopped effect never re-runs and holds no dependencies
//! 5. Sequence mutators keep observers consistent with a plain-vector model

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use filament_core::reactive::{reactive, Effect, Value};

const KEY_NAMES: [&str; 5] = ["k0", "k1", "k2", "k3", "k4"];

fn reactive_record_with_keys() -> filament_core::reactive::Obs {
    let raw = Value::record();
    {
        let obs = raw.as_object().unwrap();
        for (i, name) in KEY_NAMES.iter().enumerate() {
            obs.set(*name, Value::Int(i as i64)).unwrap();
        }
        obs.set("pulse", Value::Int(0)).unwrap();
    }
    reactive(raw).as_object().unwrap().clone()
}

fn arb_mask() -> impl Strategy<Value = Vec<bool>> {
    proptest::collection::vec(any::<bool>(), KEY_NAMES.len())
}

// ── 1 + 2: dep-diff law under shifting read sets ─────────────────────────

proptest! {
    #[test]
    fn dep_list_matches_the_last_read_set(masks in proptest::collection::vec(arb_mask(), 1..8)) {
        let state = reactive_record_with_keys();
        let mask: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(masks[0].clone()));

        let observed = state.clone();
        let mask_for_effect = mask.clone();
        let effect = Effect::new(move || {
            // "pulse" is always read so re-runs can be forced externally.
            observed.get("pulse");
            let mask = mask_for_effect.lock().unwrap().clone();
            for (i, name) in KEY_NAMES.iter().enumerate() {
                if mask[i] {
                    observed.get(*name);
                }
            }
        });

        let mut pulse = 0i64;
        for next_mask in masks {
            *mask.lock().unwrap() = next_mask.clone();
            pulse += 1;
            state.set("pulse", Value::Int(pulse)).unwrap();

            let selected = next_mask.iter().filter(|m| **m).count();
            prop_assert_eq!(effect.dep_count(), selected + 1);

            // Writes to keys outside the read set never re-run; writes to
            // keys inside it always do.
            let runs_before = effect.run_count();
            for (i, name) in KEY_NAMES.iter().enumerate() {
                let fresh = Value::Int(1000 + pulse * 10 + i as i64);
                let expected_delta = u64::from(next_mask[i]);
                let before = effect.run_count();
                state.set(*name, fresh).unwrap();
                prop_assert_eq!(effect.run_count(), before + expected_delta);
            }
            prop_assert!(effect.run_count() >= runs_before);
        }
    }
}

// ── 3: identity-equal writes are silent ──────────────────────────────────

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<f64>().prop_map(Value::Float),
        "[a-z]{0,6}".prop_map(Value::from),
    ]
}

proptest! {
    #[test]
    fn unchanged_writes_never_rerun(values in proptest::collection::vec(arb_scalar(), 1..16)) {
        let state = reactive_record_with_keys();
        let observed = state.clone();
        let effect = Effect::new(move || {
            observed.get("k0");
        });

        for value in values {
            state.set("k0", value.clone()).unwrap();
            let runs = effect.run_count();
            // Writing the identical value again must be invisible.
            state.set("k0", value).unwrap();
            prop_assert_eq!(effect.run_count(), runs);
        }
    }
}

// ── 4: stop is final ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn stopped_effects_hold_nothing(writes in proptest::collection::vec(0usize..KEY_NAMES.len(), 1..16)) {
        let state = reactive_record_with_keys();
        let observed = state.clone();
        let effect = Effect::new(move || {
            for name in KEY_NAMES.iter() {
                observed.get(*name);
            }
        });
        prop_assert_eq!(effect.dep_count(), KEY_NAMES.len());

        effect.stop();
        prop_assert_eq!(effect.dep_count(), 0);

        let runs = effect.run_count();
        for (step, key) in writes.into_iter().enumerate() {
            state.set(KEY_NAMES[key], Value::Int(step as i64 + 100)).unwrap();
        }
        prop_assert_eq!(effect.run_count(), runs);
    }
}

// ── 5: sequence mutators against a plain-vector model ────────────────────

#[derive(Debug, Clone)]
enum SeqOp {
    Push(i64),
    Pop,
    Shift,
    Unshift(i64),
    Set(usize, i64),
    SetLen(usize),
    Splice(usize, usize, Vec<i64>),
}

fn arb_seq_op() -> impl Strategy<Value = SeqOp> {
    prop_oneof![
        any::<i64>().prop_map(SeqOp::Push),
        Just(SeqOp::Pop),
        Just(SeqOp::Shift),
        any::<i64>().prop_map(SeqOp::Unshift),
        (0usize..8, any::<i64>()).prop_map(|(i, v)| SeqOp::Set(i, v)),
        (0usize..8).prop_map(SeqOp::SetLen),
        (0usize..4, 0usize..4, proptest::collection::vec(any::<i64>(), 0..3))
            .prop_map(|(s, d, items)| SeqOp::Splice(s, d, items)),
    ]
}

/// Apply the op to the model with the engine's padding semantics: missing
/// slots read as null, which the observer folds to 0.
fn apply_to_model(model: &mut Vec<i64>, op: &SeqOp) {
    match op {
        SeqOp::Push(v) => model.push(*v),
        SeqOp::Pop => {
            model.pop();
        }
        SeqOp::Shift => {
            if !model.is_empty() {
                model.remove(0);
            }
        }
        SeqOp::Unshift(v) => model.insert(0, *v),
        SeqOp::Set(i, v) => {
            if *i >= model.len() {
                model.resize(*i + 1, 0);
            }
            model[*i] = *v;
        }
        SeqOp::SetLen(n) => model.resize(*n, 0),
        SeqOp::Splice(start, delete_count, items) => {
            let start = (*start).min(model.len());
            let delete_count = (*delete_count).min(model.len() - start);
            model.splice(start..start + delete_count, items.iter().copied());
        }
    }
}

proptest! {
    #[test]
    fn sequence_observers_match_a_vector_model(ops in proptest::collection::vec(arb_seq_op(), 1..24)) {
        let seq = reactive(Value::sequence(vec![Value::Int(1), Value::Int(2)]));
        let seq = seq.as_object().unwrap().clone();
        let mut model: Vec<i64> = vec![1, 2];

        let observed = seq.clone();
        let snapshot: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let total = Arc::new(AtomicI64::new(0));
        let snapshot_clone = snapshot.clone();
        let total_clone = total.clone();
        let _effect = Effect::new(move || {
            let items: Vec<i64> = observed
                .values()
                .into_iter()
                .map(|v| v.as_int().unwrap_or(0))
                .collect();
            total_clone.store(items.iter().sum(), Ordering::SeqCst);
            *snapshot_clone.lock().unwrap() = items;
        });

        prop_assert_eq!(snapshot.lock().unwrap().clone(), model.clone());

        for op in ops {
            match &op {
                SeqOp::Push(v) => {
                    seq.push(Value::Int(*v)).unwrap();
                }
                SeqOp::Pop => {
                    seq.pop().unwrap();
                }
                SeqOp::Shift => {
                    seq.shift().unwrap();
                }
                SeqOp::Unshift(v) => {
                    seq.unshift(Value::Int(*v)).unwrap();
                }
                SeqOp::Set(i, v) => {
                    seq.set(*i, Value::Int(*v)).unwrap();
                }
                SeqOp::SetLen(n) => {
                    seq.set_len(*n).unwrap();
                }
                SeqOp::Splice(start, delete_count, items) => {
                    let items: Vec<Value> = items.iter().map(|v| Value::Int(*v)).collect();
                    seq.splice(*start, *delete_count, items).unwrap();
                }
            }
            apply_to_model(&mut model, &op);

            // The observer sees exactly the model after every mutation.
            prop_assert_eq!(snapshot.lock().unwrap().clone(), model.clone());
            prop_assert_eq!(total.load(Ordering::SeqCst), model.iter().sum::<i64>());
        }
    }
}
