#![allow(clippy::module_name_repetitions)]
//! Database container managed through `docker compose`.
//!
//! The compose project is expected to define a container named `run-claude-db`
//! with a health check. Every docker invocation is bounded by a timeout.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use which::which;

use crate::exec::{self, ExecRequest};
use crate::secrets::{export_env_file_to, Secrets};

pub const DB_CONTAINER_NAME: &str = "run-claude-db";
const COMPOSE_TIMEOUT: Duration = Duration::from_secs(120);
const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Locate the docker CLI; `RUN_CLAUDE_DOCKER` overrides discovery.
pub fn container_runtime_path() -> io::Result<PathBuf> {
    if let Some(p) = env::var_os("RUN_CLAUDE_DOCKER").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(p));
    }
    which("docker").map_err(|_| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "Docker is required but was not found in PATH.",
        )
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbHealth {
    Healthy,
    Starting,
    Unhealthy,
    /// Container exists but defines no health check.
    NoHealthCheck,
    NotRunning,
}

impl DbHealth {
    /// Map `docker inspect --format {{.State.Health.Status}}` output.
    pub fn from_inspect(output: &str) -> DbHealth {
        match output.trim() {
            "healthy" => DbHealth::Healthy,
            "starting" => DbHealth::Starting,
            "unhealthy" => DbHealth::Unhealthy,
            "" | "<no value>" => DbHealth::NoHealthCheck,
            _ => DbHealth::Unhealthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbHealth::Healthy => "healthy",
            DbHealth::Starting => "starting",
            DbHealth::Unhealthy => "unhealthy",
            DbHealth::NoHealthCheck => "running (no health check)",
            DbHealth::NotRunning => "not running",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseContainer {
    docker: PathBuf,
    compose_file: PathBuf,
    env_file: PathBuf,
}

impl DatabaseContainer {
    pub fn new(docker: PathBuf, compose_file: PathBuf, env_file: PathBuf) -> Self {
        DatabaseContainer {
            docker,
            compose_file,
            env_file,
        }
    }

    pub fn from_env() -> io::Result<Self> {
        Ok(DatabaseContainer::new(
            container_runtime_path()?,
            crate::paths::compose_file(),
            crate::secrets::env_file(),
        ))
    }

    pub fn compose_file(&self) -> &Path {
        &self.compose_file
    }

    fn compose(&self, args: &[&str]) -> anyhow::Result<()> {
        if !self.compose_file.is_file() {
            bail!("compose file not found: {}", self.compose_file.display());
        }
        let mut full = vec!["compose".to_string(), "-f".to_string()];
        full.push(self.compose_file.display().to_string());
        if self.env_file.is_file() {
            full.push("--env-file".to_string());
            full.push(self.env_file.display().to_string());
        }
        full.extend(args.iter().map(|s| s.to_string()));
        let mut req = ExecRequest::new(&self.docker)
            .args(full)
            .capture_output(true);
        if let Some(dir) = self.compose_file.parent() {
            req = req.cwd(dir);
        }
        let out = exec::run(req, COMPOSE_TIMEOUT)?;
        if !out.success() {
            bail!(
                "docker compose {} failed ({}): {}",
                args.join(" "),
                out.status,
                out.stderr.trim()
            );
        }
        tracing::debug!(args = ?args, elapsed_ms = out.duration.as_millis() as u64, "compose ok");
        Ok(())
    }

    /// Export secrets to the compose `.env`, then `up -d`.
    pub fn start(&self, secrets: &Secrets) -> anyhow::Result<()> {
        if !secrets.is_empty() {
            export_env_file_to(secrets, &self.env_file)?;
        }
        self.compose(&["up", "-d"])
            .context("starting database container")
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        self.compose(&["down"]).context("stopping database container")
    }

    pub fn health(&self) -> anyhow::Result<DbHealth> {
        let req = ExecRequest::new(&self.docker)
            .args([
                "inspect",
                "--format",
                "{{.State.Health.Status}}",
                DB_CONTAINER_NAME,
            ])
            .capture_output(true);
        let out = exec::run(req, INSPECT_TIMEOUT)?;
        if !out.success() {
            return Ok(DbHealth::NotRunning);
        }
        Ok(DbHealth::from_inspect(&out.stdout))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn fake_docker(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let p = dir.join("docker");
        fs::write(&p, format!("#!/bin/sh\n{body}\n")).expect("write");
        fs::set_permissions(&p, fs::Permissions::from_mode(0o755)).expect("chmod");
        p
    }

    #[test]
    fn test_inspect_mapping() {
        assert_eq!(DbHealth::from_inspect("healthy\n"), DbHealth::Healthy);
        assert_eq!(DbHealth::from_inspect("starting"), DbHealth::Starting);
        assert_eq!(DbHealth::from_inspect("<no value>"), DbHealth::NoHealthCheck);
        assert_eq!(DbHealth::from_inspect("weird"), DbHealth::Unhealthy);
    }

    #[test]
    fn test_health_reports_not_running_on_inspect_failure() {
        let td = tempfile::tempdir().expect("tmpdir");
        let docker = fake_docker(td.path(), "exit 1");
        let db = DatabaseContainer::new(docker, td.path().join("c.yaml"), td.path().join(".env"));
        assert_eq!(db.health().expect("health"), DbHealth::NotRunning);
    }

    #[test]
    fn test_start_exports_env_and_runs_compose() {
        let td = tempfile::tempdir().expect("tmpdir");
        let log = td.path().join("args.log");
        let docker = fake_docker(td.path(), &format!("echo \"$@\" >> {}", log.display()));
        let compose = td.path().join("docker-compose.yaml");
        fs::write(&compose, "services: {}\n").expect("write");
        let secrets_path = td.path().join(".secrets");
        fs::write(&secrets_path, "RUN_CLAUDE_TIMESCALEDB_PASSWORD: pw\n").expect("write");
        let secrets = crate::secrets::load_secrets_from(&secrets_path).expect("load");
        let env_file = td.path().join(".env");
        let db = DatabaseContainer::new(docker, compose.clone(), env_file.clone());
        db.start(&secrets).expect("start");
        assert_eq!(
            fs::read_to_string(&env_file).expect("env"),
            "RUN_CLAUDE_TIMESCALEDB_PASSWORD=pw\n"
        );
        let args = fs::read_to_string(&log).expect("log");
        assert!(args.contains("compose -f"));
        assert!(args.trim_end().ends_with("up -d"));
    }

    #[test]
    fn test_missing_compose_file_is_an_error() {
        let td = tempfile::tempdir().expect("tmpdir");
        let docker = fake_docker(td.path(), "exit 0");
        let db = DatabaseContainer::new(docker, td.path().join("none.yaml"), td.path().join(".env"));
        assert!(db.stop().is_err());
    }
}
