use std::path::Path;

use run_claude::{DbHealth, ProxyManager};

fn present(p: &Path) -> &'static str {
    if p.exists() {
        "present"
    } else {
        "missing"
    }
}

fn highlight(s: &str) -> String {
    run_claude::paint(run_claude::color_enabled_stderr(), "\x1b[34;1m", s)
}

pub fn run_doctor(manager: &ProxyManager) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("run-claude doctor");
    eprintln!();
    eprintln!("  version: v{}", version);
    eprintln!(
        "  build:   {} ({}, {})",
        env!("RUN_CLAUDE_BUILD_DATE"),
        env!("RUN_CLAUDE_BUILD_TARGET"),
        env!("RUN_CLAUDE_BUILD_RUSTC")
    );
    eprintln!(
        "  host:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    eprintln!();

    let state_dir = run_claude::state_dir();
    let config_dir = run_claude::config_dir();
    let builtin_dir = run_claude::builtin_dir();
    eprintln!("  state dir:   {}", state_dir.display());
    eprintln!("  config dir:  {}", config_dir.display());
    eprintln!("  builtin dir: {}", builtin_dir.display());
    match run_claude::StateStore::new(&state_dir).try_load() {
        Ok(st) => eprintln!(
            "  state:       ok ({} token(s), {} referenced model(s), {} lease(s))",
            st.active_tokens.len(),
            st.model_refcounts.len(),
            st.model_leases.len()
        ),
        Err(e) => eprintln!("  state:       {} (will be reset on next write)", e),
    }
    for name in run_claude::ASSET_FILES {
        let p = config_dir.join(name);
        eprintln!("    {name}: {}", present(&p));
    }
    let secrets = run_claude::secrets_file();
    eprintln!("  secrets: {} ({})", secrets.display(), present(&secrets));
    let compose = run_claude::compose_file();
    eprintln!("  compose: {} ({})", compose.display(), present(&compose));
    eprintln!();

    let settings = manager.settings();
    match which::which(&settings.litellm_command) {
        Ok(p) => eprintln!("  litellm: {}", highlight(&p.display().to_string())),
        Err(_) => eprintln!(
            "  litellm: not found ({}; set LITELLM_COMMAND)",
            settings.litellm_command
        ),
    }
    eprintln!("  proxy url:  {}", settings.proxy_url);
    eprintln!(
        "  master key: {}",
        run_claude::mask_secret(&settings.master_key)
    );
    let status = manager.status();
    let proxy_state = match (status.running, status.healthy) {
        (true, true) => "running (healthy)",
        (true, false) => "running (unhealthy)",
        _ => "stopped",
    };
    eprintln!("  proxy:      {}", highlight(proxy_state));
    eprintln!("  proxy log:  {}", manager.log_file().display());
    eprintln!();

    match run_claude::container_runtime_path() {
        Ok(p) => {
            eprintln!("  docker: {}", p.display());
            let db = run_claude::DatabaseContainer::new(
                p,
                compose,
                run_claude::env_file(),
            );
            let health = db.health().unwrap_or(DbHealth::NotRunning);
            eprintln!("  database: {}", highlight(health.as_str()));
        }
        Err(e) => eprintln!("  docker: not found ({e})"),
    }
    eprintln!();
    eprintln!("doctor: completed diagnostics.");
}
