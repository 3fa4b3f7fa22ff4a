use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

use run_claude::{
    sweep, EnsureReport, EnsureResult, ModelDef, ModelRegistry, RegistryError, SessionController,
    StateStore, StaticProfiles,
};

/// Registry whose deletes block like a hung proxy.
struct SlowDeletes(Duration);

impl ModelRegistry for SlowDeletes {
    fn ensure_models(&self, _defs: &[ModelDef]) -> EnsureResult {
        Ok(EnsureReport::default())
    }
    fn delete_model(&self, _model_id: &str) -> Result<(), RegistryError> {
        thread::sleep(self.0);
        Ok(())
    }
    fn list_model_ids(&self) -> Result<BTreeSet<String>, RegistryError> {
        Ok(BTreeSet::new())
    }
    fn health_check(&self, _wait: bool) -> bool {
        true
    }
}

#[test]
fn test_leave_is_not_blocked_by_slow_janitor_deletes() {
    let td = tempfile::tempdir().expect("tmpdir");
    let store = StateStore::new(td.path()).with_lock_wait(Duration::from_millis(200));
    let profiles = StaticProfiles::new().with_models("p", &["m"]);
    let registry = SlowDeletes(Duration::ZERO);
    let mut ctl = SessionController::new(store.clone(), profiles, &registry, 900.0)
        .with_clock(|| 1_000.0);
    ctl.enter("tok", "p", "/w").expect("enter");
    store
        .transact(|st| {
            st.model_leases.insert("old1".to_string(), 0.0);
            st.model_leases.insert("old2".to_string(), 0.0);
        })
        .expect("seed leases");

    let janitor_store = store.clone();
    let janitor = thread::spawn(move || {
        let slow = SlowDeletes(Duration::from_millis(600));
        sweep(&janitor_store, &slow, true, 1_000.0)
    });
    thread::sleep(Duration::from_millis(150));

    let started = Instant::now();
    let left = ctl.leave("tok").expect("leave during sweep");
    assert!(left.found);
    assert!(started.elapsed() < Duration::from_millis(600));

    let report = janitor.join().expect("join").expect("sweep");
    assert_eq!(report.deleted.len(), 2);

    let st = store.load();
    assert!(st.token("tok").is_none());
    assert_eq!(st.refcount("m"), 0);
    assert_eq!(st.lease("m"), Some(1_900.0));
    assert_eq!(st.lease("old1"), None);
    assert_eq!(st.lease("old2"), None);
}

#[test]
fn test_model_reentered_during_sweep_keeps_refcount() {
    let td = tempfile::tempdir().expect("tmpdir");
    let store = StateStore::new(td.path()).with_lock_wait(Duration::from_millis(200));
    let profiles = StaticProfiles::new().with_models("p", &["m"]);
    let registry = SlowDeletes(Duration::ZERO);
    let mut ctl = SessionController::new(store.clone(), profiles, &registry, 0.0)
        .with_clock(|| 1_000.0);
    ctl.enter("tok", "p", "/w").expect("enter");
    ctl.leave("tok").expect("leave");
    assert_eq!(store.load().lease("m"), Some(1_000.0));

    let janitor_store = store.clone();
    let janitor = thread::spawn(move || {
        let slow = SlowDeletes(Duration::from_millis(400));
        sweep(&janitor_store, &slow, true, 2_000.0)
    });
    thread::sleep(Duration::from_millis(150));
    ctl.enter("tok", "p", "/w").expect("re-enter during sweep");

    let report = janitor.join().expect("join").expect("sweep");
    assert_eq!(report.deleted, vec!["m".to_string()]);
    let st = store.load();
    assert_eq!(st.refcount("m"), 1);
    assert_eq!(st.lease("m"), None);
}
