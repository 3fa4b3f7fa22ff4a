//! Session controller: `enter`/`leave` for directory tokens.
//!
//! Behavior
//! - enter: resolve profile (no mutation on failure) -> locked commit of token and
//!   refcounts -> best-effort registration of the profile's models, outside the lock.
//! - leave: locked; unknown tokens are a no-op, unresolvable profiles release nothing
//!   but still drop the token.
//! - Re-entry with the same token and a different profile releases the previous
//!   profile's models first; re-entry with the same profile only refreshes the token.

use crate::errors::SessionError;
use crate::profiles::{Profile, ProfileResolver};
use crate::refcount;
use crate::registry::{EnsureResult, ModelRegistry};
use crate::state::now_epoch;
use crate::store::StateStore;

#[derive(Debug)]
pub struct EnterOutcome {
    pub profile: Profile,
    /// Profile previously bound to this token, when it differed.
    pub switched_from: Option<String>,
    /// True when the token was already bound to the same profile.
    pub refreshed: bool,
    /// Registration result; `None` when the profile has no models.
    pub registration: Option<EnsureResult>,
}

impl EnterOutcome {
    /// All models confirmed present in the registry.
    pub fn registration_confirmed(&self) -> bool {
        matches!(self.registration, None | Some(Ok(_)))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub found: bool,
    pub profile: Option<String>,
    /// Models whose refcount dropped.
    pub released: Vec<String>,
    /// Models that reached zero and now carry a lease.
    pub leased: Vec<String>,
}

pub struct SessionController<P, R> {
    store: StateStore,
    profiles: P,
    registry: R,
    lease_delay_secs: f64,
    clock: Box<dyn Fn() -> f64>,
}

impl<P: ProfileResolver, R: ModelRegistry> SessionController<P, R> {
    pub fn new(store: StateStore, profiles: P, registry: R, lease_delay_secs: f64) -> Self {
        SessionController {
            store,
            profiles,
            registry,
            lease_delay_secs,
            clock: Box::new(now_epoch),
        }
    }

    /// Replace the wall clock (epoch seconds).
    pub fn with_clock(mut self, clock: impl Fn() -> f64 + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn profiles_mut(&mut self) -> &mut P {
        &mut self.profiles
    }

    pub fn enter(
        &mut self,
        token: &str,
        profile_name: &str,
        directory: &str,
    ) -> Result<EnterOutcome, SessionError> {
        let profile = self
            .profiles
            .resolve(profile_name)
            .ok_or_else(|| SessionError::ProfileNotFound(profile_name.to_string()))?;
        let models = profile.model_names();
        let now = (self.clock)();
        let lease_delay = self.lease_delay_secs;

        let store = &self.store;
        let profiles = &mut self.profiles;
        let (switched_from, refreshed) = store.transact(|state| {
            let previous = state.token(token).map(|info| info.profile.clone());
            let mut switched_from = None;
            let mut refreshed = false;
            match previous {
                Some(prev) if prev == profile_name => {
                    refreshed = true;
                }
                Some(prev) => {
                    if let Some(old) = profiles.resolve(&prev) {
                        let old_models = old.model_names();
                        refcount::decrement(
                            state,
                            old_models.iter().map(String::as_str),
                            lease_delay,
                            now,
                        );
                    }
                    tracing::info!(token, from = %prev, to = profile_name, "token switched profile");
                    switched_from = Some(prev);
                }
                None => {}
            }
            state.add_token(token, profile_name, directory, now);
            if !refreshed {
                refcount::increment(state, models.iter().map(String::as_str));
            }
            (switched_from, refreshed)
        })?;
        tracing::debug!(token, profile = profile_name, models = models.len(), refreshed, "entered");

        let registration = if profile.model_list.is_empty() {
            None
        } else {
            let result = self.registry.ensure_models(&profile.model_list);
            if let Err(pf) = &result {
                tracing::warn!(profile = profile_name, error = %pf, "model registration unconfirmed");
            }
            Some(result)
        };

        Ok(EnterOutcome {
            profile,
            switched_from,
            refreshed,
            registration,
        })
    }

    pub fn leave(&mut self, token: &str) -> Result<LeaveOutcome, SessionError> {
        let now = (self.clock)();
        let lease_delay = self.lease_delay_secs;
        let store = &self.store;
        let profiles = &mut self.profiles;
        let outcome = store.transact_if(|state| {
            let Some(info) = state.remove_token(token) else {
                return (LeaveOutcome::default(), false);
            };
            let mut outcome = LeaveOutcome {
                found: true,
                profile: Some(info.profile.clone()),
                ..LeaveOutcome::default()
            };
            match profiles.resolve(&info.profile) {
                Some(p) => {
                    let models = p.model_names();
                    for m in &models {
                        if state.refcount(m) > 0 {
                            outcome.released.push(m.clone());
                            if state.refcount(m) == 1 {
                                outcome.leased.push(m.clone());
                            }
                        }
                    }
                    refcount::decrement(state, models.iter().map(String::as_str), lease_delay, now);
                }
                None => {
                    tracing::warn!(token, profile = %info.profile, "profile no longer resolvable; nothing released");
                }
            }
            (outcome, true)
        })?;
        tracing::debug!(token, found = outcome.found, released = outcome.released.len(), "left");
        Ok(outcome)
    }
}
