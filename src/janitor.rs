//! Lease janitor: deletes models whose grace period elapsed while unreferenced.
//!
//! Behavior
//! - Automatic sweeps are rate-limited to one per `JANITOR_INTERVAL_SECS`; a
//!   rate-limited sweep does not touch the state file.
//! - The sweep runs in three steps: a locked claim (stamp `last_janitor_run`,
//!   snapshot expired leases), unlocked deletes, then a locked settle that clears
//!   a lease only while the model is still unreferenced.
//! - A model re-entered after the claim can still be deleted by the registry
//!   call; its refcount survives the settle and the next `enter` re-registers it.
//! - A failed delete keeps its lease for the next sweep; the batch continues.

use crate::errors::{RegistryError, StateError};
use crate::refcount::expired_leases;
use crate::registry::ModelRegistry;
use crate::settings::JANITOR_INTERVAL_SECS;
use crate::state::State;
use crate::store::StateStore;

#[derive(Debug, Default)]
pub struct SweepReport {
    /// True when the sweep was skipped by the rate limit.
    pub rate_limited: bool,
    pub deleted: Vec<String>,
    pub failed: Vec<(String, RegistryError)>,
}

impl SweepReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// Stamp the run and return the expired leases, or `None` when rate-limited
/// (in which case `state` is left untouched).
pub fn claim_expired(state: &mut State, force: bool, now: f64) -> Option<Vec<String>> {
    if !force && now - state.last_janitor_run < JANITOR_INTERVAL_SECS {
        return None;
    }
    state.last_janitor_run = now;
    Some(expired_leases(state, now))
}

/// Clear leases of deleted models that are still unreferenced. Returns the
/// models whose lease was cleared.
pub fn settle_deleted(state: &mut State, deleted: &[String]) -> Vec<String> {
    deleted
        .iter()
        .filter(|m| state.refcount(m) == 0 && state.clear_lease(m))
        .cloned()
        .collect()
}

/// Issue the deletes. No lock is held here.
pub fn delete_models(registry: &dyn ModelRegistry, models: Vec<String>) -> SweepReport {
    let mut report = SweepReport::default();
    for model in models {
        match registry.delete_model(&model) {
            Ok(()) => report.deleted.push(model),
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "lease kept for retry");
                report.failed.push((model, e));
            }
        }
    }
    report
}

/// Sweep against the persisted state; the lock is only held for the claim and
/// the settle.
pub fn sweep(
    store: &StateStore,
    registry: &dyn ModelRegistry,
    force: bool,
    now: f64,
) -> Result<SweepReport, StateError> {
    let claimed = store.transact_if(|state| {
        let claimed = claim_expired(state, force, now);
        let changed = claimed.is_some();
        (claimed, changed)
    })?;
    let Some(expired) = claimed else {
        return Ok(SweepReport {
            rate_limited: true,
            ..SweepReport::default()
        });
    };
    if expired.is_empty() {
        return Ok(SweepReport::default());
    }

    let report = delete_models(registry, expired);
    if !report.deleted.is_empty() {
        let cleared = store.transact_if(|state| {
            let cleared = settle_deleted(state, &report.deleted);
            let changed = !cleared.is_empty();
            (cleared, changed)
        })?;
        if cleared.len() < report.deleted.len() {
            tracing::info!(
                deleted = report.deleted.len(),
                cleared = cleared.len(),
                "models re-referenced during sweep"
            );
        }
    }
    Ok(report)
}
