//! Persisted launcher state: active tokens, model refcounts, deletion leases.
//!
//! On-disk layout (JSON object):
//! `{proxy_pid, active_tokens: {token: {profile, last_seen, dir}}, model_refcounts,
//! model_leases: {model: delete_after_epoch}, last_janitor_run}`.
//! Every field defaults when absent so older or partial files still load.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as fractional epoch seconds.
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One active session bound to a profile and a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TokenInfo {
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub last_seen: f64,
    #[serde(default, rename = "dir")]
    pub directory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct State {
    #[serde(default)]
    pub proxy_pid: Option<i32>,
    #[serde(default)]
    pub active_tokens: BTreeMap<String, TokenInfo>,
    #[serde(default)]
    pub model_refcounts: BTreeMap<String, u32>,
    #[serde(default)]
    pub model_leases: BTreeMap<String, f64>,
    #[serde(default)]
    pub last_janitor_run: f64,
}

impl State {
    pub fn refcount(&self, model: &str) -> u32 {
        self.model_refcounts.get(model).copied().unwrap_or(0)
    }

    pub fn lease(&self, model: &str) -> Option<f64> {
        self.model_leases.get(model).copied()
    }

    pub fn token(&self, token: &str) -> Option<&TokenInfo> {
        self.active_tokens.get(token)
    }

    /// Record (or replace) a token's profile/directory association.
    pub fn add_token(&mut self, token: &str, profile: &str, directory: &str, now: f64) {
        self.active_tokens.insert(
            token.to_string(),
            TokenInfo {
                profile: profile.to_string(),
                last_seen: now,
                directory: directory.to_string(),
            },
        );
    }

    pub fn remove_token(&mut self, token: &str) -> Option<TokenInfo> {
        self.active_tokens.remove(token)
    }

    pub fn clear_lease(&mut self, model: &str) -> bool {
        self.model_leases.remove(model).is_some()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_json_layout_field_names() {
        let mut st = State::default();
        st.add_token("tok", "cerebras", "/work", 10.0);
        st.model_refcounts.insert("m1".to_string(), 2);
        st.model_leases.insert("m2".to_string(), 99.5);
        let v: serde_json::Value = serde_json::from_str(&st.to_json_pretty()).expect("json");
        assert!(v["proxy_pid"].is_null());
        assert_eq!(v["active_tokens"]["tok"]["dir"], "/work");
        assert_eq!(v["active_tokens"]["tok"]["profile"], "cerebras");
        assert_eq!(v["model_refcounts"]["m1"], 2);
        assert_eq!(v["model_leases"]["m2"], 99.5);
        assert_eq!(v["last_janitor_run"], 0.0);
    }

    #[test]
    fn test_partial_state_loads_with_defaults() {
        let st: State = serde_json::from_str(r#"{"model_refcounts": {"a": 1}}"#).expect("parse");
        assert_eq!(st.refcount("a"), 1);
        assert!(st.active_tokens.is_empty());
        assert_eq!(st.proxy_pid, None);
    }

    #[test]
    fn test_add_token_replaces_previous_association() {
        let mut st = State::default();
        st.add_token("t", "a", "/d1", 1.0);
        st.add_token("t", "b", "/d2", 2.0);
        assert_eq!(st.active_tokens.len(), 1);
        let info = st.token("t").expect("token");
        assert_eq!(info.profile, "b");
        assert_eq!(info.directory, "/d2");
    }
}
