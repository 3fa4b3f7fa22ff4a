#![allow(clippy::module_name_repetitions)]
//! Model registry: the running proxy's model management API.
//!
//! Endpoints (all with `Authorization: Bearer <master key>`):
//! - `GET /health` (200 = healthy)
//! - `GET /model/info` -> `{data: [{model_name, model_info: {id}}]}`
//! - `POST /model/new` with `{model_name, litellm_params}`
//! - `POST /model/delete` with `{id}`
//!
//! Every call is a fallible remote call with no transactional guarantee.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::errors::RegistryError;
use crate::profiles::ModelDef;
use crate::settings::{mask_secret, Settings};

/// Outcome of an `ensure_models` call where every model is confirmed present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsureReport {
    pub added: Vec<String>,
    pub skipped: Vec<String>,
}

impl EnsureReport {
    pub fn added_count(&self) -> usize {
        self.added.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Some models could not be confirmed; `report` holds what did succeed.
#[derive(Debug)]
pub struct PartialFailure {
    pub report: EnsureReport,
    pub failed: Vec<(String, RegistryError)>,
    /// Set when the registry could not be reached at all.
    pub unavailable: Option<RegistryError>,
}

impl PartialFailure {
    pub fn unavailable(e: RegistryError, models: &[ModelDef]) -> Self {
        PartialFailure {
            report: EnsureReport::default(),
            failed: models
                .iter()
                .map(|m| {
                    (
                        m.model_name.clone(),
                        RegistryError::Unavailable("registry unreachable".to_string()),
                    )
                })
                .collect(),
            unavailable: Some(e),
        }
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl std::fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(e) = &self.unavailable {
            return write!(f, "models not registered: {e}");
        }
        write!(
            f,
            "added {}, skipped {}, failed {} ({})",
            self.report.added_count(),
            self.report.skipped_count(),
            self.failed.len(),
            self.failed_names().join(", ")
        )
    }
}

pub type EnsureResult = Result<EnsureReport, PartialFailure>;

/// Contract the session controller and janitor rely on.
pub trait ModelRegistry {
    fn ensure_models(&self, defs: &[ModelDef]) -> EnsureResult;
    fn delete_model(&self, model_id: &str) -> Result<(), RegistryError>;
    fn list_model_ids(&self) -> Result<BTreeSet<String>, RegistryError>;
    fn health_check(&self, wait_for_recovery: bool) -> bool;
}

impl<T: ModelRegistry + ?Sized> ModelRegistry for &T {
    fn ensure_models(&self, defs: &[ModelDef]) -> EnsureResult {
        (**self).ensure_models(defs)
    }
    fn delete_model(&self, model_id: &str) -> Result<(), RegistryError> {
        (**self).delete_model(model_id)
    }
    fn list_model_ids(&self) -> Result<BTreeSet<String>, RegistryError> {
        (**self).list_model_ids()
    }
    fn health_check(&self, wait_for_recovery: bool) -> bool {
        (**self).health_check(wait_for_recovery)
    }
}

#[derive(Debug, Deserialize)]
struct ModelInfoResponse {
    #[serde(default)]
    data: Vec<ModelInfoEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelInfoEntry {
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    model_info: Option<ModelInfoId>,
}

#[derive(Debug, Deserialize)]
struct ModelInfoId {
    #[serde(default)]
    id: Option<String>,
}

/// Extract the set of registered model names and ids from a `/model/info` body.
pub fn parse_model_ids(body: &str) -> Result<BTreeSet<String>, RegistryError> {
    let parsed: ModelInfoResponse = serde_json::from_str(body).map_err(|e| RegistryError::Http {
        status: 200,
        body: format!("invalid /model/info body: {e}"),
    })?;
    let mut ids = BTreeSet::new();
    for entry in parsed.data {
        if let Some(name) = entry.model_name {
            ids.insert(name);
        }
        if let Some(id) = entry.model_info.and_then(|i| i.id) {
            ids.insert(id);
        }
    }
    Ok(ids)
}

/// Replace `os.environ/VAR` string values in `litellm_params` with the variable's value
/// when it is set; unset variables keep the reference.
pub fn hydrate_model_def(def: &ModelDef) -> ModelDef {
    let mut out = def.clone();
    for value in out.litellm_params.values_mut() {
        if let Value::String(s) = value {
            if let Some(var) = s.strip_prefix("os.environ/") {
                if let Ok(v) = std::env::var(var) {
                    if !v.is_empty() {
                        *value = Value::String(v);
                    }
                }
            }
        }
    }
    out
}

/// HTTP client for the proxy's management API.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    base_url: String,
    master_key: String,
    http: reqwest::blocking::Client,
    health_timeout: Duration,
    health_interval: Duration,
    health_retries: u32,
}

impl ProxyClient {
    pub fn new(settings: &Settings) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        ProxyClient {
            base_url: settings.proxy_url.trim_end_matches('/').to_string(),
            master_key: settings.master_key.clone(),
            http,
            health_timeout: settings.health_timeout,
            health_interval: settings.health_interval,
            health_retries: settings.health_retries,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.master_key)
    }

    /// Single health probe.
    pub fn probe_health(&self) -> Result<(), RegistryError> {
        let url = self.endpoint("/health");
        tracing::debug!(%url, key = %mask_secret(&self.master_key), "health check");
        let resp = self
            .http
            .get(&url)
            .header("Authorization", self.bearer())
            .timeout(self.health_timeout)
            .send()?;
        let status = resp.status().as_u16();
        if status == 200 {
            Ok(())
        } else {
            Err(RegistryError::Http {
                status,
                body: resp.text().unwrap_or_default(),
            })
        }
    }

    /// Poll health until healthy; `max_retries == 0` means no bound.
    pub fn wait_healthy(&self, max_retries: u32) -> bool {
        let mut attempt: u32 = 0;
        loop {
            match self.probe_health() {
                Ok(()) => return true,
                Err(e) => {
                    tracing::debug!(error = %e, attempt, "proxy not healthy yet");
                }
            }
            if max_retries > 0 && attempt >= max_retries {
                tracing::warn!(retries = attempt, "proxy did not become healthy");
                return false;
            }
            attempt += 1;
            std::thread::sleep(self.health_interval);
        }
    }

    /// Raw `/model/info` entries.
    pub fn list_models(&self) -> Result<Vec<Value>, RegistryError> {
        let body = self.get_text("/model/info")?;
        let v: Value = serde_json::from_str(&body).map_err(|e| RegistryError::Http {
            status: 200,
            body: format!("invalid /model/info body: {e}"),
        })?;
        Ok(v.get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default())
    }

    fn get_text(&self, path: &str) -> Result<String, RegistryError> {
        let resp = self
            .http
            .get(self.endpoint(path))
            .header("Authorization", self.bearer())
            .send()?;
        let status = resp.status().as_u16();
        let body = resp.text().unwrap_or_default();
        if status == 200 {
            Ok(body)
        } else {
            Err(RegistryError::Http { status, body })
        }
    }

    fn post_json(&self, path: &str, payload: &Value) -> Result<(u16, String), RegistryError> {
        let resp = self
            .http
            .post(self.endpoint(path))
            .header("Authorization", self.bearer())
            .json(payload)
            .send()?;
        let status = resp.status().as_u16();
        Ok((status, resp.text().unwrap_or_default()))
    }

    /// Register one model definition (hydrated from the environment).
    pub fn add_model(&self, def: &ModelDef) -> Result<(), RegistryError> {
        let hydrated = hydrate_model_def(def);
        let payload = json!({
            "model_name": hydrated.model_name,
            "litellm_params": hydrated.litellm_params,
        });
        tracing::debug!(model = %def.model_name, "registering model");
        let (status, body) = self.post_json("/model/new", &payload)?;
        if status == 200 || status == 201 {
            tracing::info!(model = %def.model_name, status, "model registered");
            Ok(())
        } else {
            tracing::warn!(model = %def.model_name, status, %body, "model registration failed");
            Err(RegistryError::Http { status, body })
        }
    }
}

impl ModelRegistry for ProxyClient {
    fn ensure_models(&self, defs: &[ModelDef]) -> EnsureResult {
        let existing = match self.list_model_ids() {
            Ok(ids) => ids,
            Err(e) => return Err(PartialFailure::unavailable(e, defs)),
        };
        let mut report = EnsureReport::default();
        let mut failed = Vec::new();
        for def in defs {
            if existing.contains(&def.model_name) {
                report.skipped.push(def.model_name.clone());
                continue;
            }
            match self.add_model(def) {
                Ok(()) => report.added.push(def.model_name.clone()),
                Err(e) => failed.push((def.model_name.clone(), e)),
            }
        }
        tracing::info!(
            added = report.added_count(),
            skipped = report.skipped_count(),
            failed = failed.len(),
            "ensure models summary"
        );
        if failed.is_empty() {
            Ok(report)
        } else {
            Err(PartialFailure {
                report,
                failed,
                unavailable: None,
            })
        }
    }

    fn delete_model(&self, model_id: &str) -> Result<(), RegistryError> {
        let (status, body) = self
            .post_json("/model/delete", &json!({ "id": model_id }))
            .map_err(|e| RegistryError::DeletionFailed {
                model: model_id.to_string(),
                reason: e.to_string(),
            })?;
        if status == 200 || status == 204 {
            tracing::info!(model = model_id, status, "model deleted");
            Ok(())
        } else {
            Err(RegistryError::DeletionFailed {
                model: model_id.to_string(),
                reason: format!("HTTP {status}: {body}"),
            })
        }
    }

    fn list_model_ids(&self) -> Result<BTreeSet<String>, RegistryError> {
        let body = self.get_text("/model/info")?;
        parse_model_ids(&body)
    }

    fn health_check(&self, wait_for_recovery: bool) -> bool {
        if wait_for_recovery {
            self.wait_healthy(self.health_retries)
        } else {
            self.probe_health().is_ok()
        }
    }
}
