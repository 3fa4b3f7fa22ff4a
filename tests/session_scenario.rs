use std::cell::RefCell;
use std::collections::BTreeSet;

use run_claude::{
    sweep, EnsureReport, EnsureResult, ModelDef, ModelRegistry, RegistryError, SessionController,
    StateStore, StaticProfiles,
};

#[derive(Default)]
struct Recorder {
    ensured: RefCell<Vec<String>>,
    deleted: RefCell<Vec<String>>,
}

impl ModelRegistry for Recorder {
    fn ensure_models(&self, defs: &[ModelDef]) -> EnsureResult {
        let mut r = EnsureReport::default();
        for d in defs {
            self.ensured.borrow_mut().push(d.model_name.clone());
            r.added.push(d.model_name.clone());
        }
        Ok(r)
    }
    fn delete_model(&self, model_id: &str) -> Result<(), RegistryError> {
        self.deleted.borrow_mut().push(model_id.to_string());
        Ok(())
    }
    fn list_model_ids(&self) -> Result<BTreeSet<String>, RegistryError> {
        Ok(BTreeSet::new())
    }
    fn health_check(&self, _wait: bool) -> bool {
        true
    }
}

fn counts(store: &StateStore) -> Vec<(String, u32)> {
    store.load().model_refcounts.into_iter().collect()
}

#[test]
fn test_two_tokens_share_models_and_janitor_deletes_after_grace() {
    let td = tempfile::tempdir().expect("tmpdir");
    let store = StateStore::new(td.path());
    let registry = Recorder::default();
    let profiles = StaticProfiles::new().with_models("profileA", &["m1", "m2"]);
    let mut ctl = SessionController::new(store.clone(), profiles, &registry, 900.0)
        .with_clock(|| 10_000.0);

    let out = ctl.enter("tok1", "profileA", "/d1").expect("enter tok1");
    assert!(out.registration_confirmed());
    assert_eq!(counts(&store), vec![("m1".into(), 1), ("m2".into(), 1)]);

    ctl.enter("tok2", "profileA", "/d2").expect("enter tok2");
    assert_eq!(counts(&store), vec![("m1".into(), 2), ("m2".into(), 2)]);

    ctl.leave("tok1").expect("leave tok1");
    assert_eq!(counts(&store), vec![("m1".into(), 1), ("m2".into(), 1)]);
    assert!(store.load().model_leases.is_empty());

    ctl.leave("tok2").expect("leave tok2");
    let st = store.load();
    assert!(st.model_refcounts.is_empty());
    assert_eq!(st.lease("m1"), Some(10_900.0));
    assert_eq!(st.lease("m2"), Some(10_900.0));

    let early = sweep(&store, &registry, false, 10_001.0).expect("sweep");
    assert!(early.deleted.is_empty());
    assert!(registry.deleted.borrow().is_empty());

    let late = sweep(&store, &registry, false, 10_900.0).expect("sweep");
    let deleted: BTreeSet<String> = late.deleted.into_iter().collect();
    let want: BTreeSet<String> = ["m1", "m2"].iter().map(|s| s.to_string()).collect();
    assert_eq!(deleted, want);
    assert!(store.load().model_leases.is_empty());
    assert_eq!(registry.deleted.borrow().len(), 2);
}

#[test]
fn test_reentry_before_sweep_cancels_lease() {
    let td = tempfile::tempdir().expect("tmpdir");
    let store = StateStore::new(td.path());
    let registry = Recorder::default();
    let profiles = StaticProfiles::new().with_models("p", &["m"]);
    let mut ctl = SessionController::new(store.clone(), profiles, &registry, 900.0)
        .with_clock(|| 500.0);

    ctl.enter("t", "p", "/d").expect("enter");
    ctl.leave("t").expect("leave");
    assert_eq!(store.load().lease("m"), Some(1400.0));
    ctl.enter("t", "p", "/d").expect("re-enter");
    assert_eq!(store.load().lease("m"), None);

    let r = sweep(&store, &registry, true, 100_000.0).expect("sweep");
    assert!(r.deleted.is_empty());
    assert!(registry.deleted.borrow().is_empty());
    assert_eq!(store.load().refcount("m"), 1);
}
