//! Copying shipped assets (models, profiles, compose file) into the user config dir.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub const ASSET_FILES: &[&str] = &["models.yaml", "profiles.yaml", "docker-compose.yaml"];
const INIT_MARKER: &str = ".initialized";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Copy each shipped asset into `config_dir`; existing files are skipped unless `force`.
pub fn install_assets(
    builtin_dir: &Path,
    config_dir: &Path,
    force: bool,
) -> anyhow::Result<InstallReport> {
    fs::create_dir_all(config_dir)
        .with_context(|| format!("creating {}", config_dir.display()))?;
    let mut report = InstallReport::default();
    for name in ASSET_FILES {
        let src = builtin_dir.join(name);
        if !src.is_file() {
            continue;
        }
        let dst = config_dir.join(name);
        if dst.exists() && !force {
            report.skipped.push(dst);
            continue;
        }
        fs::copy(&src, &dst)
            .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
        report.installed.push(dst);
    }
    Ok(report)
}

/// One-time initialization guarded by a marker file. Returns the number of files
/// copied (0 when already initialized).
pub fn ensure_initialized(builtin_dir: &Path, config_dir: &Path) -> anyhow::Result<usize> {
    let marker = config_dir.join(INIT_MARKER);
    if marker.exists() {
        return Ok(0);
    }
    let report = install_assets(builtin_dir, config_dir, false)?;
    fs::write(&marker, b"").with_context(|| format!("writing {}", marker.display()))?;
    if !report.installed.is_empty() {
        tracing::info!(dir = %config_dir.display(), files = report.installed.len(), "initialized config");
    }
    Ok(report.installed.len())
}

/// Install only `profiles.yaml`, never overwriting.
pub fn install_profiles(builtin_dir: &Path, config_dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let src = builtin_dir.join("profiles.yaml");
    let dst = config_dir.join("profiles.yaml");
    if !src.is_file() || dst.exists() {
        return Ok(None);
    }
    fs::create_dir_all(config_dir)
        .with_context(|| format!("creating {}", config_dir.display()))?;
    fs::copy(&src, &dst).with_context(|| format!("copying {}", src.display()))?;
    Ok(Some(dst))
}
