//! Secrets: a YAML map in `$RUN_CLAUDE_HOME/.secrets` (or the config dir).
//!
//! - `load_secrets` returns an empty map when the file is absent.
//! - Template and exported `.env` are written with mode 0600.
//! - Values already present in the process environment win over file values.

use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Secrets {
    values: BTreeMap<String, String>,
}

impl Secrets {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Key/value pairs suitable for a child process environment.
    pub fn to_env(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }

    /// Pairs not already set in the current process environment.
    pub fn missing_from_env(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter(|(k, _)| std::env::var_os(k).is_none())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

pub fn secrets_file() -> PathBuf {
    crate::paths::secrets_home().join(".secrets")
}

pub fn env_file() -> PathBuf {
    crate::paths::secrets_home().join(".env")
}

pub fn load_secrets() -> anyhow::Result<Secrets> {
    load_secrets_from(&secrets_file())
}

pub fn load_secrets_from(path: &Path) -> anyhow::Result<Secrets> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Secrets::default()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let doc: serde_yaml::Value = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    let mut values = BTreeMap::new();
    match doc {
        serde_yaml::Value::Null => {}
        serde_yaml::Value::Mapping(m) => {
            for (k, v) in m {
                let Some(key) = k.as_str() else { continue };
                let val = match v {
                    serde_yaml::Value::Null => continue,
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    other => serde_yaml::to_string(&other)?.trim().to_string(),
                };
                values.insert(key.to_string(), val);
            }
        }
        _ => bail!("{} must contain a YAML mapping", path.display()),
    }
    tracing::debug!(path = %path.display(), keys = values.len(), "loaded secrets");
    Ok(Secrets { values })
}

/// Random password drawn from the OS RNG.
pub fn generate_password(len: usize) -> anyhow::Result<String> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow::anyhow!("reading OS randomness: {e}"))?;
    Ok(buf
        .iter()
        .map(|b| PASSWORD_ALPHABET[*b as usize % PASSWORD_ALPHABET.len()] as char)
        .collect())
}

pub fn secrets_template(db_password: &str) -> String {
    let mut s = String::new();
    s.push_str("# run-claude secrets (YAML). Keep this file private: chmod 600.\n");
    s.push_str("#\n");
    s.push_str("# Required:\n");
    s.push_str("#   RUN_CLAUDE_TIMESCALEDB_PASSWORD  database password (run-claude secrets init --generate)\n");
    s.push_str("#   ANTHROPIC_API_KEY                provider API key\n");
    s.push_str("# Optional:\n");
    s.push_str("#   RUN_CLAUDE_TIMESCALEDB_USER      (default: postgres)\n");
    s.push_str("#   RUN_CLAUDE_TIMESCALEDB_DATABASE  (default: postgres)\n");
    s.push_str("#\n");
    s.push_str("# `run-claude secrets export` writes these to the compose .env file.\n\n");
    s.push_str(&format!("RUN_CLAUDE_TIMESCALEDB_PASSWORD: \"{db_password}\"\n"));
    s.push_str("ANTHROPIC_API_KEY: \"sk-your-key-here\"\n\n");
    s.push_str("# RUN_CLAUDE_TIMESCALEDB_USER: \"postgres\"\n");
    s.push_str("# RUN_CLAUDE_TIMESCALEDB_DATABASE: \"postgres\"\n");
    s
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Create the secrets template unless it exists (or `force`). Returns (path, created).
pub fn ensure_secrets_template_at(
    path: &Path,
    force: bool,
    generate: bool,
) -> anyhow::Result<(PathBuf, bool)> {
    if path.exists() && !force {
        return Ok((path.to_path_buf(), false));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let password = if generate {
        generate_password(32)?
    } else {
        "your-postgres-password".to_string()
    };
    fs::write(path, secrets_template(&password))
        .with_context(|| format!("writing {}", path.display()))?;
    if let Err(e) = restrict_permissions(path) {
        tracing::warn!(path = %path.display(), error = %e, "could not restrict secrets permissions");
    }
    Ok((path.to_path_buf(), true))
}

/// Render secrets as `KEY=value` lines.
pub fn render_env_file(secrets: &Secrets) -> String {
    let mut out = String::new();
    for (k, v) in &secrets.values {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    }
    out
}

pub fn export_env_file_to(secrets: &Secrets, path: &Path) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, render_env_file(secrets))
        .with_context(|| format!("writing {}", path.display()))?;
    if let Err(e) = restrict_permissions(path) {
        tracing::warn!(path = %path.display(), error = %e, "could not restrict .env permissions");
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_secrets_file_is_empty() {
        let td = tempfile::tempdir().expect("tmpdir");
        let s = load_secrets_from(&td.path().join(".secrets")).expect("load");
        assert!(s.is_empty());
    }

    #[test]
    fn test_scalar_values_are_stringified_and_nulls_skipped() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join(".secrets");
        fs::write(&p, "A: \"x\"\nB: 5\nC: true\nD: null\n").expect("write");
        let s = load_secrets_from(&p).expect("load");
        assert_eq!(s.get("A"), Some("x"));
        assert_eq!(s.get("B"), Some("5"));
        assert_eq!(s.get("C"), Some("true"));
        assert_eq!(s.get("D"), None);
    }

    #[test]
    fn test_non_mapping_is_rejected() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join(".secrets");
        fs::write(&p, "- a\n- b\n").expect("write");
        assert!(load_secrets_from(&p).is_err());
    }

    #[test]
    fn test_generated_password_uses_alphabet() {
        let a = generate_password(24).expect("password");
        let b = generate_password(24).expect("password");
        assert_eq!(a.len(), 24);
        assert!(a.bytes().all(|c| PASSWORD_ALPHABET.contains(&c)));
        assert_ne!(a, b);
    }

    #[test]
    fn test_template_generate_and_no_overwrite() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join("home").join(".secrets");
        let (_, created) = ensure_secrets_template_at(&p, false, true).expect("create");
        assert!(created);
        let s = load_secrets_from(&p).expect("parse template");
        let pw = s.get("RUN_CLAUDE_TIMESCALEDB_PASSWORD").expect("password");
        assert_eq!(pw.len(), 32);
        assert_ne!(pw, "your-postgres-password");
        let (_, created_again) = ensure_secrets_template_at(&p, false, true).expect("noop");
        assert!(!created_again);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&p).expect("meta").permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn test_env_file_rendering() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join(".secrets");
        fs::write(&p, "B: two\nA: one\n").expect("write");
        let s = load_secrets_from(&p).expect("load");
        assert_eq!(render_env_file(&s), "A=one\nB=two\n");
    }
}
