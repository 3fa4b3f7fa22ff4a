//! LiteLLM proxy lifecycle: config generation, detached start, stop, status.
//!
//! The proxy runs as a detached child in its own process group with output
//! appended to `proxy.log`. Its pid is recorded both in `proxy.pid` and in
//! `State.proxy_pid`; a pid whose process is gone is treated as stale and cleared.
//!
//! `ManagedProxy` adapts the lifecycle to the `ModelRegistry` contract: model
//! registration starts the proxy on demand, deletion never does.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;

use crate::errors::RegistryError;
use crate::exec::{self, ExecRequest};
use crate::profiles::ModelDef;
use crate::registry::{hydrate_model_def, EnsureResult, ModelRegistry, PartialFailure, ProxyClient};
use crate::settings::{mask_secret, Settings};
use crate::store::StateStore;

const STOP_POLL_ATTEMPTS: u32 = 10;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct LitellmSettings {
    drop_params: bool,
    forward_client_headers_to_llm_api: bool,
}

#[derive(Debug, Serialize)]
struct GeneralSettings<'a> {
    master_key: &'a str,
    database_url: String,
}

#[derive(Debug, Serialize)]
struct LitellmConfig<'a> {
    litellm_settings: LitellmSettings,
    general_settings: GeneralSettings<'a>,
    model_list: Vec<ModelDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyStatus {
    pub running: bool,
    pub pid: Option<i32>,
    pub healthy: bool,
    pub url: String,
    pub model_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(i32),
    NotRunning,
    /// No pid on record, but processes matching the proxy command line exist.
    Untracked(Vec<i32>),
}

/// Liveness probe via signal 0. A process we may not signal still exists.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct ProxyManager {
    settings: Settings,
    store: StateStore,
    client: ProxyClient,
    secrets: BTreeMap<String, String>,
}

impl ProxyManager {
    pub fn new(settings: Settings, store: StateStore) -> Self {
        let client = ProxyClient::new(&settings);
        ProxyManager {
            settings,
            store,
            client,
            secrets: BTreeMap::new(),
        }
    }

    /// Secrets applied to the child environment and to `${VAR}` expansion when the
    /// process environment lacks them.
    pub fn with_secrets(mut self, secrets: BTreeMap<String, String>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn client(&self) -> &ProxyClient {
        &self.client
    }

    pub fn pid_file(&self) -> PathBuf {
        self.store.dir().join(crate::paths::PID_FILE_NAME)
    }

    pub fn log_file(&self) -> PathBuf {
        self.store.dir().join(crate::paths::LOG_FILE_NAME)
    }

    pub fn config_file(&self) -> PathBuf {
        self.store.dir().join(crate::paths::LITELLM_CONFIG_FILE_NAME)
    }

    /// Recorded pid of a live proxy. A stale pid file is removed.
    pub fn pid(&self) -> Option<i32> {
        let path = self.pid_file();
        let text = fs::read_to_string(&path).ok()?;
        let pid: i32 = match text.trim().parse() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(path = %path.display(), "ignoring malformed pid file");
                let _ = fs::remove_file(&path);
                return None;
            }
        };
        if pid_alive(pid) {
            Some(pid)
        } else {
            tracing::debug!(pid, "removing stale pid file");
            let _ = fs::remove_file(&path);
            None
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid().is_some()
    }

    /// Render the proxy YAML config for `models` (hydrated from the environment).
    pub fn render_config(&self, models: &[ModelDef]) -> anyhow::Result<String> {
        let config = LitellmConfig {
            litellm_settings: LitellmSettings {
                drop_params: true,
                forward_client_headers_to_llm_api: false,
            },
            general_settings: GeneralSettings {
                master_key: &self.settings.master_key,
                database_url: self.settings.expanded_database_url(&self.secrets),
            },
            model_list: models.iter().map(hydrate_model_def).collect(),
        };
        serde_yaml::to_string(&config).context("serializing proxy config")
    }

    pub fn generate_config(&self, models: &[ModelDef]) -> anyhow::Result<PathBuf> {
        let path = self.config_file();
        fs::create_dir_all(self.store.dir())
            .with_context(|| format!("creating {}", self.store.dir().display()))?;
        fs::write(&path, self.render_config(models)?)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!(path = %path.display(), models = models.len(), "wrote proxy config");
        Ok(path)
    }

    /// Start the proxy unless a healthy one is already running. With `config == None`
    /// a config with an empty model list is generated; models are registered later.
    /// Returns whether the proxy reported healthy (always true when `wait` is false
    /// and the spawn succeeded).
    pub fn start(&self, config: Option<&Path>, wait: bool) -> anyhow::Result<bool> {
        if self.is_running() && self.client.probe_health().is_ok() {
            tracing::debug!("proxy already running and healthy");
            return Ok(true);
        }
        let config_path = match config {
            Some(p) => p.to_path_buf(),
            None => self.generate_config(&[])?,
        };
        let program = which::which(&self.settings.litellm_command).map_err(|_| {
            anyhow!(
                "proxy command not found: {} (set LITELLM_COMMAND)",
                self.settings.litellm_command
            )
        })?;

        let log_path = self.log_file();
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("opening {}", log_path.display()))?;
        let log_err = log.try_clone().context("duplicating log handle")?;

        let port = self.settings.proxy_port().to_string();
        let mut cmd = Command::new(&program);
        cmd.arg("--host")
            .arg(crate::settings::DEFAULT_PROXY_HOST)
            .arg("--port")
            .arg(&port)
            .arg("--config")
            .arg(&config_path)
            .env("STORE_MODEL_IN_DB", "True")
            .env("USE_PRISMA_MIGRATE", "True")
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0);
        if std::env::var_os("LITELLM_MASTER_KEY").is_none() {
            cmd.env("LITELLM_MASTER_KEY", &self.settings.master_key);
        }
        for (k, v) in &self.secrets {
            if std::env::var_os(k).is_none() {
                cmd.env(k, v);
            }
        }

        tracing::info!(
            program = %program.display(),
            port = %port,
            key = %mask_secret(&self.settings.master_key),
            log = %log_path.display(),
            "starting proxy"
        );
        let child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", program.display()))?;
        let pid = child.id() as i32;
        fs::write(self.pid_file(), pid.to_string())
            .with_context(|| format!("writing {}", self.pid_file().display()))?;
        self.store.transact(|st| st.proxy_pid = Some(pid))?;

        if !wait {
            return Ok(true);
        }
        Ok(self.client.wait_healthy(self.settings.health_retries))
    }

    fn forget_pid(&self) -> anyhow::Result<()> {
        match fs::remove_file(self.pid_file()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("removing pid file"),
        }
        self.store.transact(|st| st.proxy_pid = None)?;
        Ok(())
    }

    /// SIGTERM, poll for exit, then SIGKILL.
    pub fn stop(&self) -> anyhow::Result<StopOutcome> {
        let Some(pid) = self.pid() else {
            let untracked = self.find_untracked();
            if untracked.is_empty() {
                self.forget_pid()?;
                return Ok(StopOutcome::NotRunning);
            }
            return Ok(StopOutcome::Untracked(untracked));
        };
        let target = Pid::from_raw(pid);
        match kill(target, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                self.forget_pid()?;
                return Ok(StopOutcome::Stopped(pid));
            }
            Err(e) => return Err(anyhow!("signalling proxy {pid}: {e}")),
        }
        for _ in 0..STOP_POLL_ATTEMPTS {
            if !pid_alive(pid) {
                self.forget_pid()?;
                return Ok(StopOutcome::Stopped(pid));
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
        tracing::warn!(pid, "proxy ignored SIGTERM; sending SIGKILL");
        let _ = kill(target, Signal::SIGKILL);
        thread::sleep(STOP_POLL_INTERVAL);
        if pid_alive(pid) {
            return Err(anyhow!("failed to kill proxy process {pid}"));
        }
        self.forget_pid()?;
        Ok(StopOutcome::Stopped(pid))
    }

    fn find_untracked(&self) -> Vec<i32> {
        let req = ExecRequest::new("pgrep")
            .args(["-f", "litellm.*--host.*--port"])
            .capture_output(true);
        match exec::run(req, Duration::from_secs(5)) {
            Ok(out) if out.success() => out
                .stdout
                .lines()
                .filter_map(|l| l.trim().parse().ok())
                .collect(),
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::debug!(error = %e, "pgrep unavailable");
                Vec::new()
            }
        }
    }

    pub fn status(&self) -> ProxyStatus {
        let pid = self.pid();
        let running = pid.is_some();
        let healthy = running && self.client.probe_health().is_ok();
        let model_count = if healthy {
            self.client.list_models().map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        ProxyStatus {
            running,
            pid,
            healthy,
            url: self.client.base_url().to_string(),
            model_count,
        }
    }
}

/// Registry backed by a locally managed proxy.
#[derive(Debug, Clone)]
pub struct ManagedProxy {
    manager: ProxyManager,
}

impl ManagedProxy {
    pub fn new(manager: ProxyManager) -> Self {
        ManagedProxy { manager }
    }

    pub fn manager(&self) -> &ProxyManager {
        &self.manager
    }

    /// Start the proxy when no live pid is recorded and confirm it answers.
    pub fn ensure_running(&self) -> Result<(), RegistryError> {
        if !self.manager.is_running() {
            match self.manager.start(None, true) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(RegistryError::Unavailable(
                        "proxy started but did not become healthy".to_string(),
                    ))
                }
                Err(e) => return Err(RegistryError::Unavailable(format!("{e:#}"))),
            }
        }
        self.manager.client.probe_health()
    }
}

impl ModelRegistry for ManagedProxy {
    fn ensure_models(&self, defs: &[ModelDef]) -> EnsureResult {
        if let Err(e) = self.ensure_running() {
            return Err(PartialFailure::unavailable(e, defs));
        }
        self.manager.client.ensure_models(defs)
    }

    fn delete_model(&self, model_id: &str) -> Result<(), RegistryError> {
        self.manager.client.delete_model(model_id)
    }

    fn list_model_ids(&self) -> Result<BTreeSet<String>, RegistryError> {
        self.manager.client.list_model_ids()
    }

    fn health_check(&self, wait_for_recovery: bool) -> bool {
        self.manager.client.health_check(wait_for_recovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(td: &tempfile::TempDir) -> ProxyManager {
        let settings = Settings {
            proxy_url: "http://127.0.0.1:9".to_string(),
            database_url: "postgresql://u:${RC_PROXY_TEST_PW}@db/x".to_string(),
            ..Settings::default()
        };
        let mut secrets = BTreeMap::new();
        secrets.insert("RC_PROXY_TEST_PW".to_string(), "pw".to_string());
        ProxyManager::new(settings, StateStore::new(td.path())).with_secrets(secrets)
    }

    #[test]
    fn test_render_config_layout() {
        let td = tempfile::tempdir().expect("tmpdir");
        let m = manager(&td);
        let mut def = ModelDef {
            model_name: "big".to_string(),
            ..ModelDef::default()
        };
        def.litellm_params
            .insert("model".into(), serde_json::json!("cerebras/big"));
        let yaml = m.render_config(&[def]).expect("render");
        let v: serde_yaml::Value = serde_yaml::from_str(&yaml).expect("yaml");
        assert_eq!(v["litellm_settings"]["drop_params"], serde_yaml::Value::Bool(true));
        assert_eq!(
            v["litellm_settings"]["forward_client_headers_to_llm_api"],
            serde_yaml::Value::Bool(false)
        );
        assert_eq!(v["general_settings"]["database_url"].as_str(), Some("postgresql://u:pw@db/x"));
        assert_eq!(v["model_list"][0]["model_name"].as_str(), Some("big"));
        assert_eq!(
            v["model_list"][0]["litellm_params"]["model"].as_str(),
            Some("cerebras/big")
        );
    }

    #[test]
    fn test_stale_pid_file_is_cleared() {
        let td = tempfile::tempdir().expect("tmpdir");
        let m = manager(&td);
        // Spawn and reap a short-lived child to obtain a pid that no longer exists.
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id() as i32;
        child.wait().expect("wait");
        fs::write(m.pid_file(), pid.to_string()).expect("write pid");
        assert_eq!(m.pid(), None);
        assert!(!m.pid_file().exists());
    }

    #[test]
    fn test_malformed_pid_file_is_ignored() {
        let td = tempfile::tempdir().expect("tmpdir");
        let m = manager(&td);
        fs::write(m.pid_file(), "not-a-pid").expect("write");
        assert!(!m.is_running());
        assert!(!m.pid_file().exists());
    }

    #[test]
    fn test_start_with_missing_command_fails_cleanly() {
        let td = tempfile::tempdir().expect("tmpdir");
        let mut m = manager(&td);
        m.settings.litellm_command = "run-claude-no-such-proxy-binary".to_string();
        let err = m.start(None, false).expect_err("should fail");
        assert!(err.to_string().contains("proxy command not found"));
        assert!(!m.pid_file().exists());
        assert!(m.config_file().exists());
    }

    #[test]
    fn test_start_and_stop_detached_child() {
        let td = tempfile::tempdir().expect("tmpdir");
        let script = td.path().join("fake-litellm");
        fs::write(&script, "#!/bin/sh\nexec sleep 30\n").expect("write script");
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
        }
        let mut m = manager(&td);
        m.settings.litellm_command = script.display().to_string();
        assert!(m.start(None, false).expect("start"));
        let pid = m.pid().expect("pid recorded");
        assert_eq!(m.store.load().proxy_pid, Some(pid));

        // The child is ours, so reap it in the background once it exits.
        thread::spawn(move || {
            let _ = nix::sys::wait::waitpid(Pid::from_raw(pid), None);
        });
        assert_eq!(m.stop().expect("stop"), StopOutcome::Stopped(pid));
        assert!(!m.pid_file().exists());
        assert_eq!(m.store.load().proxy_pid, None);
    }
}
