//! Reference-count engine: pure transitions on [`State`].
//!
//! Invariants maintained by these functions:
//! - a model appears in `model_refcounts` only while its count is > 0;
//! - a model never has both a nonzero refcount and a pending lease;
//! - counts never go below zero.

use crate::state::State;

/// Count one more active session for each model and cancel any pending deletion.
pub fn increment<'a, I>(state: &mut State, models: I)
where
    I: IntoIterator<Item = &'a str>,
{
    for model in models {
        let count = state.model_refcounts.entry(model.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        state.model_leases.remove(model);
    }
}

/// Release one session for each model. Models reaching zero are dropped from the
/// refcount map and leased for deletion at `now + lease_delay_secs`.
///
/// A model that is untracked and has no lease is left alone. A model already at
/// zero with a pending lease gets its expiration refreshed.
pub fn decrement<'a, I>(state: &mut State, models: I, lease_delay_secs: f64, now: f64)
where
    I: IntoIterator<Item = &'a str>,
{
    let delete_after = now + lease_delay_secs;
    for model in models {
        match state.model_refcounts.get_mut(model) {
            Some(count) if *count > 1 => {
                *count -= 1;
            }
            Some(_) => {
                state.model_refcounts.remove(model);
                state.model_leases.insert(model.to_string(), delete_after);
            }
            None => {
                if let Some(lease) = state.model_leases.get_mut(model) {
                    *lease = delete_after;
                }
            }
        }
    }
}

/// Models whose lease has elapsed and which are still unreferenced.
pub fn expired_leases(state: &State, now: f64) -> Vec<String> {
    state
        .model_leases
        .iter()
        .filter(|(model, delete_after)| now >= **delete_after && state.refcount(model) == 0)
        .map(|(model, _)| model.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invariants_hold(st: &State) {
        for (model, count) in &st.model_refcounts {
            assert!(*count > 0, "zero refcount kept for {model}");
            assert!(
                !st.model_leases.contains_key(model),
                "{model} has both refcount and lease"
            );
        }
    }

    #[test]
    fn test_increment_from_absent_and_twice() {
        let mut st = State::default();
        increment(&mut st, ["m1", "m2"]);
        increment(&mut st, ["m1"]);
        assert_eq!(st.refcount("m1"), 2);
        assert_eq!(st.refcount("m2"), 1);
        invariants_hold(&st);
    }

    #[test]
    fn test_increment_saturates_at_max() {
        let mut st = State::default();
        st.model_refcounts.insert("m".to_string(), u32::MAX);
        increment(&mut st, ["m"]);
        assert_eq!(st.refcount("m"), u32::MAX);
        invariants_hold(&st);
    }

    #[test]
    fn test_decrement_to_zero_creates_lease_and_drops_entry() {
        let mut st = State::default();
        increment(&mut st, ["m"]);
        decrement(&mut st, ["m"], 900.0, 1000.0);
        assert!(!st.model_refcounts.contains_key("m"));
        assert_eq!(st.lease("m"), Some(1900.0));
        invariants_hold(&st);
    }

    #[test]
    fn test_decrement_above_one_keeps_no_lease() {
        let mut st = State::default();
        increment(&mut st, ["m"]);
        increment(&mut st, ["m"]);
        decrement(&mut st, ["m"], 900.0, 0.0);
        assert_eq!(st.refcount("m"), 1);
        assert_eq!(st.lease("m"), None);
    }

    #[test]
    fn test_decrement_untracked_is_noop() {
        let mut st = State::default();
        decrement(&mut st, ["ghost"], 900.0, 5.0);
        assert!(st.model_refcounts.is_empty());
        assert!(st.model_leases.is_empty());
    }

    #[test]
    fn test_second_decrement_refreshes_existing_lease() {
        let mut st = State::default();
        increment(&mut st, ["m"]);
        decrement(&mut st, ["m"], 900.0, 100.0);
        decrement(&mut st, ["m"], 900.0, 200.0);
        assert_eq!(st.refcount("m"), 0);
        assert_eq!(st.lease("m"), Some(1100.0));
        invariants_hold(&st);
    }

    #[test]
    fn test_reentry_cancels_lease() {
        let mut st = State::default();
        increment(&mut st, ["m"]);
        decrement(&mut st, ["m"], 900.0, 0.0);
        increment(&mut st, ["m"]);
        assert_eq!(st.lease("m"), None);
        assert_eq!(st.refcount("m"), 1);
        assert!(expired_leases(&st, 10_000.0).is_empty());
    }

    #[test]
    fn test_expired_leases_requires_elapsed_and_zero() {
        let mut st = State::default();
        st.model_leases.insert("old".to_string(), 50.0);
        st.model_leases.insert("fresh".to_string(), 500.0);
        // Hand-built inconsistent entry: a lease on a referenced model must survive.
        st.model_leases.insert("busy".to_string(), 10.0);
        st.model_refcounts.insert("busy".to_string(), 1);
        let mut expired = expired_leases(&st, 100.0);
        expired.sort();
        assert_eq!(expired, vec!["old".to_string()]);
        assert_eq!(expired_leases(&st, 50.0), vec!["old".to_string()]);
    }

    #[test]
    fn test_random_sequences_keep_invariants() {
        // Deterministic LCG walk over increment/decrement.
        let models = ["a", "b", "c"];
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut st = State::default();
        for step in 0..2000u32 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let m = models[(seed >> 33) as usize % models.len()];
            if (seed >> 17) & 1 == 0 {
                increment(&mut st, [m]);
            } else {
                decrement(&mut st, [m], 900.0, step as f64);
            }
            invariants_hold(&st);
        }
    }
}
