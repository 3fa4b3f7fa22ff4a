use std::path::PathBuf;
use std::process::ExitCode;

use run_claude::{
    DatabaseContainer, ManagedProxy, ModelRegistry, ProfileCatalog, ProxyManager, Secrets,
    SessionController, Settings, StateStore, StopOutcome,
};

use crate::cli::{DbCmd, ModelsCmd, ProfilesCmd, ProxyCmd, SecretsCmd};

/// Per-invocation wiring shared by the handlers.
pub(crate) struct Context {
    pub(crate) settings: Settings,
    pub(crate) store: StateStore,
    pub(crate) secrets: Secrets,
}

impl Context {
    pub(crate) fn from_env() -> Self {
        let secrets = match run_claude::load_secrets() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "could not load secrets");
                Secrets::default()
            }
        };
        Context {
            settings: Settings::from_env(),
            store: StateStore::default_location(),
            secrets,
        }
    }

    pub(crate) fn proxy_manager(&self) -> ProxyManager {
        ProxyManager::new(self.settings.clone(), self.store.clone())
            .with_secrets(self.secrets.missing_from_env())
    }

    fn controller(&self) -> SessionController<ProfileCatalog, ManagedProxy> {
        SessionController::new(
            self.store.clone(),
            catalog(),
            ManagedProxy::new(self.proxy_manager()),
            self.settings.lease_delay.as_secs_f64(),
        )
    }
}

fn use_err() -> bool {
    run_claude::color_enabled_stderr()
}

fn info(msg: &str) {
    run_claude::log_info_stderr(use_err(), msg);
}

fn warn(msg: &str) {
    run_claude::log_warn_stderr(use_err(), msg);
}

fn error(msg: &str) {
    run_claude::log_error_stderr(use_err(), msg);
}

/// Catalog over the user config dir, seeded from the shipped assets on first run.
pub(crate) fn catalog() -> ProfileCatalog {
    let catalog = ProfileCatalog::from_env();
    if let Err(e) = run_claude::ensure_initialized(catalog.builtin_dir(), catalog.config_dir()) {
        tracing::warn!(error = %format!("{e:#}"), "first-run initialization failed");
    }
    catalog
}

fn current_dir_or(dir: Option<PathBuf>) -> PathBuf {
    dir.or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn warn_unresolved(profile: &run_claude::Profile) {
    let missing = profile.unresolved_tiers();
    if !missing.is_empty() {
        warn(&format!(
            "run-claude: warning: profile '{}' references models without definitions: {}",
            profile.meta.name,
            missing.join(", ")
        ));
    }
}

pub(crate) fn run_enter(ctx: &Context, token: &str, profile: &str, dir: Option<PathBuf>) -> ExitCode {
    let dir = current_dir_or(dir);
    let mut controller = ctx.controller();
    match controller.enter(token, profile, &dir.display().to_string()) {
        Ok(outcome) => {
            warn_unresolved(&outcome.profile);
            if let Some(Err(pf)) = &outcome.registration {
                warn(&format!("run-claude: warning: {pf}"));
            }
            ExitCode::from(0)
        }
        Err(e) => {
            error(&format!("Error: {e}"));
            ExitCode::from(run_claude::exit_code_for_session_error(&e))
        }
    }
}

pub(crate) fn run_leave(ctx: &Context, token: &str) -> ExitCode {
    let mut controller = ctx.controller();
    if let Err(e) = controller.leave(token) {
        warn(&format!("run-claude: warning: leave not recorded: {e}"));
    }
    ExitCode::from(0)
}

pub(crate) fn run_janitor(ctx: &Context, quiet: bool, force: bool) -> ExitCode {
    let registry = ManagedProxy::new(ctx.proxy_manager());
    let report = match run_claude::sweep(&ctx.store, &registry, force, run_claude::now_epoch()) {
        Ok(r) => r,
        Err(e) => {
            if !quiet {
                warn(&format!("run-claude: janitor skipped: {e}"));
            }
            return ExitCode::from(0);
        }
    };
    if !quiet {
        for model in &report.deleted {
            println!("Deleted model: {model}");
        }
        for (model, e) in &report.failed {
            warn(&format!("run-claude: could not delete {model}: {e}"));
        }
        if report.deleted_count() > 0 {
            println!("Janitor: deleted {} expired model(s)", report.deleted_count());
        }
    }
    ExitCode::from(0)
}

fn format_remaining(delete_after: f64, now: f64) -> String {
    let remaining = (delete_after - now) as i64;
    if remaining > 0 {
        format!("expires in {remaining}s")
    } else {
        "expired (pending deletion)".to_string()
    }
}

fn print_proxy_status(status: &run_claude::ProxyStatus, indent: &str) {
    let health = if status.healthy { "healthy" } else { "unhealthy" };
    println!("{indent}Status: running ({health})");
    if let Some(pid) = status.pid {
        println!("{indent}PID: {pid}");
    }
    println!("{indent}URL: {}", status.url);
    println!("{indent}Models: {}", status.model_count);
}

pub(crate) fn run_status(ctx: &Context) -> ExitCode {
    let st = ctx.store.load();
    let status = ctx.proxy_manager().status();

    println!("=== run-claude status ===");
    println!();
    println!("Proxy:");
    if status.running {
        print_proxy_status(&status, "  ");
    } else {
        println!("  Status: stopped");
    }
    println!();

    println!("Active Tokens:");
    if st.active_tokens.is_empty() {
        println!("  (none)");
    }
    for (token, info) in &st.active_tokens {
        let short: String = token.chars().take(8).collect();
        println!("  {short}...: {} ({})", info.profile, info.directory);
    }
    println!();

    println!("Model Refcounts:");
    if st.model_refcounts.is_empty() {
        println!("  (none)");
    }
    for (model, count) in &st.model_refcounts {
        println!("  {model}: {count}");
    }
    println!();

    println!("Pending Leases:");
    if st.model_leases.is_empty() {
        println!("  (none)");
    }
    let now = run_claude::now_epoch();
    for (model, delete_after) in &st.model_leases {
        println!("  {model}: {}", format_remaining(*delete_after, now));
    }
    ExitCode::from(0)
}

pub(crate) fn run_set_folder(profile: &str, dir: Option<PathBuf>) -> ExitCode {
    let dir = current_dir_or(dir);
    if catalog().load_profile(profile).is_none() {
        error(&format!("Error: Profile not found: {profile}"));
        return ExitCode::from(1);
    }
    match run_claude::set_folder(&dir, profile) {
        Ok(setup) => {
            if let Some(p) = &setup.envrc_created {
                println!("Created: {}", p.display());
            }
            println!("Created: {}", setup.envrc_user.display());
            if let Some(p) = &setup.gitignore_updated {
                println!("Updated: {}", p.display());
            }
            println!();
            println!("Profile '{profile}' configured for {}", dir.display());
            println!("Run 'direnv allow' to activate");
            ExitCode::from(0)
        }
        Err(e) => {
            error(&format!("run-claude: set-folder failed: {e:#}"));
            ExitCode::from(1)
        }
    }
}

pub(crate) fn run_env(ctx: &Context, profile: &str, export: bool) -> ExitCode {
    let Some(p) = catalog().load_profile(profile) else {
        error(&format!("Error: Profile not found: {profile}"));
        return ExitCode::from(1);
    };
    let vars = run_claude::profile_env(&ctx.settings, &p.meta);
    print!("{}", run_claude::render_env(&vars, export));
    ExitCode::from(0)
}

/// Make sure the proxy is up and serves the profile's models.
fn prepare_proxy_for(manager: &ProxyManager, profile: &run_claude::Profile) -> anyhow::Result<()> {
    let models = &profile.model_list;
    if !manager.is_running() {
        let config = if models.is_empty() {
            None
        } else {
            Some(manager.generate_config(models)?)
        };
        if !manager.start(config.as_deref(), true)? {
            anyhow::bail!("proxy did not become healthy");
        }
        return Ok(());
    }
    if !manager.client().health_check(false) {
        warn("run-claude: warning: proxy is not healthy, proceeding anyway");
        return Ok(());
    }
    if models.is_empty() {
        return Ok(());
    }
    match manager.client().ensure_models(models) {
        Ok(report) => {
            tracing::debug!(added = report.added_count(), skipped = report.skipped_count(), "models ensured");
            Ok(())
        }
        Err(pf) if pf.report.added.is_empty() && pf.report.skipped.is_empty() => {
            tracing::info!(error = %pf, "dynamic registration failed; restarting proxy with config");
            manager.stop()?;
            let config = manager.generate_config(models)?;
            if !manager.start(Some(&config), true)? {
                anyhow::bail!("proxy did not become healthy after restart");
            }
            Ok(())
        }
        Err(pf) => {
            warn(&format!("run-claude: warning: {pf}"));
            Ok(())
        }
    }
}

fn exit_code_for_status(status: std::process::ExitStatus) -> u8 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        return (code & 0xff) as u8;
    }
    match status.signal() {
        Some(sig) => (128 + sig).min(255) as u8,
        None => 1,
    }
}

pub(crate) fn run_with(ctx: &Context, profile: &str, cmd: Vec<String>) -> ExitCode {
    let Some(p) = catalog().load_profile(profile) else {
        error(&format!("Error: Profile not found: {profile}"));
        return ExitCode::from(1);
    };
    if p.model_list.is_empty() {
        warn(&format!(
            "run-claude: warning: profile '{profile}' has no models resolved; check model definitions for: {}",
            p.meta.tier_models().join(", ")
        ));
    } else {
        warn_unresolved(&p);
    }

    let manager = ctx.proxy_manager();
    if let Err(e) = prepare_proxy_for(&manager, &p) {
        error(&format!("Error: Failed to start proxy: {e:#}"));
        return ExitCode::from(1);
    }

    let mut argv = if cmd.is_empty() {
        vec!["claude".to_string()]
    } else {
        cmd
    };
    let program = argv.remove(0);
    let vars = run_claude::profile_env(&ctx.settings, &p.meta);
    tracing::debug!(program = %program, args = ?argv, "running client");
    match std::process::Command::new(&program)
        .args(&argv)
        .envs(vars)
        .status()
    {
        Ok(status) => ExitCode::from(exit_code_for_status(status)),
        Err(e) => {
            if e.kind() == std::io::ErrorKind::NotFound {
                error(&format!("Error: Command not found: {program}"));
            } else {
                error(&format!("Error: failed to run {program}: {e}"));
            }
            ExitCode::from(run_claude::exit_code_for_io_error(&e))
        }
    }
}

pub(crate) fn run_proxy(ctx: &Context, cmd: ProxyCmd) -> ExitCode {
    let manager = ctx.proxy_manager();
    match cmd {
        ProxyCmd::Start => match manager.start(None, true) {
            Ok(true) => {
                println!("Proxy started");
                info(&format!("run-claude: proxy logs: {}", manager.log_file().display()));
                ExitCode::from(0)
            }
            Ok(false) => {
                error(&format!(
                    "Proxy started but did not become healthy; see {}",
                    manager.log_file().display()
                ));
                ExitCode::from(1)
            }
            Err(e) => {
                error(&format!("Failed to start proxy: {e:#}"));
                ExitCode::from(1)
            }
        },
        ProxyCmd::Stop => match manager.stop() {
            Ok(StopOutcome::Stopped(_)) | Ok(StopOutcome::NotRunning) => {
                println!("Proxy stopped");
                ExitCode::from(0)
            }
            Ok(StopOutcome::Untracked(pids)) => {
                error("Found running proxy process(es) not started by run-claude. Run one of:");
                for pid in pids {
                    eprintln!("  kill {pid}");
                }
                ExitCode::from(1)
            }
            Err(e) => {
                error(&format!("Failed to stop proxy: {e:#}"));
                ExitCode::from(1)
            }
        },
        ProxyCmd::Status => {
            let status = manager.status();
            if status.running {
                print_proxy_status(&status, "");
            } else {
                println!("Stopped");
            }
            ExitCode::from(0)
        }
        ProxyCmd::Health => {
            if manager.client().health_check(false) {
                println!("Healthy");
                ExitCode::from(0)
            } else {
                println!("Unhealthy");
                ExitCode::from(1)
            }
        }
    }
}

pub(crate) fn run_db(ctx: &Context, cmd: DbCmd) -> ExitCode {
    let db = match DatabaseContainer::from_env() {
        Ok(db) => db,
        Err(e) => {
            error(&format!("run-claude: {e}"));
            return ExitCode::from(run_claude::exit_code_for_io_error(&e));
        }
    };
    let result = match cmd {
        DbCmd::Start => db.start(&ctx.secrets).map(|()| "Database started".to_string()),
        DbCmd::Stop => db.stop().map(|()| "Database stopped".to_string()),
        DbCmd::Status => db.health().map(|h| format!("Database: {}", h.as_str())),
    };
    match result {
        Ok(msg) => {
            println!("{msg}");
            ExitCode::from(0)
        }
        Err(e) => {
            error(&format!("run-claude: {e:#}"));
            ExitCode::from(1)
        }
    }
}

pub(crate) fn run_profiles(cmd: ProfilesCmd) -> ExitCode {
    let mut catalog = catalog();
    match cmd {
        ProfilesCmd::List => {
            let names = catalog.list_profiles();
            if names.is_empty() {
                println!("No profiles found");
            } else {
                println!("Available profiles:");
                for name in names {
                    println!("  {name}");
                }
            }
            ExitCode::from(0)
        }
        ProfilesCmd::Show { name } => {
            let Some(p) = catalog.load_profile(&name) else {
                error(&format!("Profile not found: {name}"));
                return ExitCode::from(1);
            };
            let or_unset = |s: &str| {
                if s.is_empty() {
                    "(not set)".to_string()
                } else {
                    s.to_string()
                }
            };
            println!("Profile: {}", p.meta.name);
            if let Some(src) = &p.source_path {
                println!("Source: {}", src.display());
            }
            println!();
            println!("Model Aliases:");
            println!("  opus:   {}", or_unset(&p.meta.opus_model));
            println!("  sonnet: {}", or_unset(&p.meta.sonnet_model));
            println!("  haiku:  {}", or_unset(&p.meta.haiku_model));
            println!();
            println!("Models:");
            for m in &p.model_list {
                println!("  - {}", m.model_name);
            }
            ExitCode::from(0)
        }
        ProfilesCmd::Install => {
            match run_claude::install_profiles(catalog.builtin_dir(), catalog.config_dir()) {
                Ok(Some(p)) => println!("Installed: {}", p.display()),
                Ok(None) => println!(
                    "Nothing installed (no shipped profiles, or {} exists; use 'run-claude install --force' to overwrite)",
                    catalog.config_dir().join("profiles.yaml").display()
                ),
                Err(e) => {
                    error(&format!("run-claude: {e:#}"));
                    return ExitCode::from(1);
                }
            }
            ExitCode::from(0)
        }
    }
}

fn display_param(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn run_models(cmd: ModelsCmd) -> ExitCode {
    let mut catalog = catalog();
    match cmd {
        ModelsCmd::List => {
            let names = catalog.list_models();
            if names.is_empty() {
                println!("No model definitions found");
            } else {
                println!("Available model definitions:");
                for name in names {
                    println!("  {name}");
                }
            }
            ExitCode::from(0)
        }
        ModelsCmd::Show { name } => {
            let Some(def) = catalog.model_definition(&name) else {
                error(&format!("Model definition not found: {name}"));
                return ExitCode::from(1);
            };
            println!("Model: {}", def.model_name);
            println!();
            println!("LiteLLM Params:");
            for (k, v) in &def.litellm_params {
                println!("  {k}: {}", display_param(v));
            }
            ExitCode::from(0)
        }
    }
}

pub(crate) fn run_secrets(ctx: &Context, cmd: SecretsCmd) -> ExitCode {
    match cmd {
        SecretsCmd::Init { generate, force } => {
            let path = run_claude::secrets_file();
            match run_claude::ensure_secrets_template_at(&path, force, generate) {
                Ok((p, true)) => {
                    println!("Created: {}", p.display());
                    info("run-claude: edit the file and fill in your keys");
                    ExitCode::from(0)
                }
                Ok((p, false)) => {
                    println!(
                        "Secrets file already exists: {} (use --force to overwrite)",
                        p.display()
                    );
                    ExitCode::from(0)
                }
                Err(e) => {
                    error(&format!("run-claude: {e:#}"));
                    ExitCode::from(1)
                }
            }
        }
        SecretsCmd::Export => {
            if ctx.secrets.is_empty() {
                warn(&format!(
                    "run-claude: no secrets found in {}",
                    run_claude::secrets_file().display()
                ));
            }
            match run_claude::export_env_file_to(&ctx.secrets, &run_claude::env_file()) {
                Ok(p) => {
                    println!("Wrote: {}", p.display());
                    ExitCode::from(0)
                }
                Err(e) => {
                    error(&format!("run-claude: {e:#}"));
                    ExitCode::from(1)
                }
            }
        }
    }
}

pub(crate) fn run_install(force: bool) -> ExitCode {
    let config_dir = run_claude::config_dir();
    let builtin_dir = run_claude::builtin_dir();
    match run_claude::install_assets(&builtin_dir, &config_dir, force) {
        Ok(report) => {
            for p in &report.installed {
                println!("Installed: {}", p.display());
            }
            for p in &report.skipped {
                println!("Skipped (exists): {}", p.display());
            }
            println!();
            println!(
                "Installed {} file(s) to {}",
                report.installed.len(),
                config_dir.display()
            );
            if !report.skipped.is_empty() {
                println!(
                    "Skipped {} existing file(s). Use --force to overwrite.",
                    report.skipped.len()
                );
            }
            ExitCode::from(0)
        }
        Err(e) => {
            error(&format!("run-claude: install failed: {e:#}"));
            ExitCode::from(1)
        }
    }
}

pub(crate) fn run_doctor_command(ctx: &Context) -> ExitCode {
    crate::doctor::run_doctor(&ctx.proxy_manager());
    ExitCode::from(0)
}

