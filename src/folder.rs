//! Per-directory setup (`.envrc`, `.envrc.user`, `.gitignore`) and the client
//! environment a profile exports.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::lock::directory_token;
use crate::profiles::ProfileMeta;
use crate::settings::{Settings, API_TIMEOUT_MS};

/// Environment handed to the client for `meta`, in a stable order.
pub fn profile_env(settings: &Settings, meta: &ProfileMeta) -> Vec<(String, String)> {
    let mut vars = vec![
        ("ANTHROPIC_AUTH_TOKEN".to_string(), settings.master_key.clone()),
        ("ANTHROPIC_BASE_URL".to_string(), settings.proxy_url.clone()),
        ("API_TIMEOUT_MS".to_string(), API_TIMEOUT_MS.to_string()),
    ];
    let tiers = [
        ("ANTHROPIC_DEFAULT_HAIKU_MODEL", &meta.haiku_model),
        ("ANTHROPIC_DEFAULT_SONNET_MODEL", &meta.sonnet_model),
        ("ANTHROPIC_DEFAULT_OPUS_MODEL", &meta.opus_model),
    ];
    for (key, value) in tiers {
        if !value.is_empty() {
            vars.push((key.to_string(), value.clone()));
        }
    }
    vars
}

/// `KEY=value` lines, or `export KEY="value"` lines for shell evaluation.
pub fn render_env(vars: &[(String, String)], export: bool) -> String {
    let mut out = String::new();
    for (k, v) in vars {
        if export {
            out.push_str(&format!("export {k}=\"{v}\"\n"));
        } else {
            out.push_str(&format!("{k}={v}\n"));
        }
    }
    out
}

fn envrc_contents(token: &str) -> String {
    format!(
        r#"# run-claude: generated
# Edit .envrc.user for customization (gitignored)

# Stable token for this directory
export AGENT_SHIM_TOKEN="{token}"

source_env_if_exists .envrc.user

if [[ -n "$AGENT_SHIM_PROFILE" ]]; then
    eval "$(run-claude env --export "$AGENT_SHIM_PROFILE" 2>/dev/null)"
fi
"#
    )
}

fn envrc_user_contents(profile: &str) -> String {
    format!(
        r#"# run-claude user config (gitignored)

export AGENT_SHIM_PROFILE="{profile}"

# Optional: override specific models
# export ANTHROPIC_DEFAULT_OPUS_MODEL="custom-opus"
"#
    )
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FolderSetup {
    pub token: String,
    pub envrc_created: Option<PathBuf>,
    pub envrc_user: PathBuf,
    pub gitignore_updated: Option<PathBuf>,
}

/// Write the direnv files binding `dir` to `profile`. An existing `.envrc` is kept;
/// `.envrc.user` is always rewritten.
pub fn set_folder(dir: &Path, profile: &str) -> anyhow::Result<FolderSetup> {
    let token = directory_token(dir);
    let envrc = dir.join(".envrc");
    let envrc_user = dir.join(".envrc.user");
    let gitignore = dir.join(".gitignore");

    let mut setup = FolderSetup {
        token: token.clone(),
        envrc_user: envrc_user.clone(),
        ..FolderSetup::default()
    };
    if !envrc.exists() {
        fs::write(&envrc, envrc_contents(&token))
            .with_context(|| format!("writing {}", envrc.display()))?;
        setup.envrc_created = Some(envrc);
    }
    fs::write(&envrc_user, envrc_user_contents(profile))
        .with_context(|| format!("writing {}", envrc_user.display()))?;

    let mut entries = vec![".envrc.user"];
    if setup.envrc_created.is_some() {
        entries.push(".envrc");
    }
    if update_gitignore(&gitignore, &entries)? {
        setup.gitignore_updated = Some(gitignore);
    }
    tracing::debug!(dir = %dir.display(), profile, token = %setup.token, "folder configured");
    Ok(setup)
}

/// Append missing entries. Returns whether the file changed.
pub fn update_gitignore(path: &Path, entries: &[&str]) -> anyhow::Result<bool> {
    let existing = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let mut lines: Vec<String> = existing.lines().map(|l| l.to_string()).collect();
    for entry in entries {
        if !lines.iter().any(|l| l.trim() == *entry) {
            lines.push(entry.to_string());
        }
    }
    let mut updated = lines.join("\n");
    if !updated.ends_with('\n') {
        updated.push('\n');
    }
    if updated == existing {
        return Ok(false);
    }
    fs::write(path, updated).with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}
