//! Diagnostic logging setup: a `tracing-subscriber` fmt layer on stderr.
//!
//! Filter precedence: `RUN_CLAUDE_LOG` (EnvFilter syntax), then `debug` when
//! `--debug` is given, then `warn`.

use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;

static INIT: OnceCell<()> = OnceCell::new();

pub const LOG_ENV: &str = "RUN_CLAUDE_LOG";

fn filter_directive(debug: bool) -> String {
    match env::var(LOG_ENV) {
        Ok(v) if !v.trim().is_empty() => v,
        _ if debug => "run_claude=debug,warn".to_string(),
        _ => "warn".to_string(),
    }
}

/// Install the global subscriber once; later calls are no-ops.
pub fn telemetry_init(debug: bool) {
    if INIT.get().is_some() {
        return;
    }
    let directive = filter_directive(debug);
    let env_filter = tracing_subscriber::EnvFilter::try_new(&directive)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(crate::color::color_enabled_stderr());
    if tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        eprintln!("run-claude: logging init skipped (global subscriber already set)");
        return;
    }
    let _ = INIT.set(());
}
