#![allow(clippy::module_name_repetitions)]
//! run-claude: directory-aware launcher for a local LiteLLM proxy.
//!
//! Architecture
//! - Binary glue (src/main.rs) parses the CLI and dispatches to command handlers.
//! - Core: state record + store (cross-process lock, atomic save), refcount engine,
//!   session controller (enter/leave), janitor (lease sweep), registry client.
//! - Lifecycle: proxy process (pid file, config, start/stop), database container,
//!   secrets, folder setup.
//!
//! Environment invariants
//! - XDG_STATE_HOME / XDG_CONFIG_HOME: roots of the state and config directories.
//! - LITELLM_PROXY_URL / LITELLM_MASTER_KEY: proxy endpoint and bearer key.
//! - RUN_CLAUDE_LEASE_SECONDS: grace period before an unreferenced model is deleted.
//! - RUN_CLAUDE_LOG: tracing filter; RUN_CLAUDE_COLOR / NO_COLOR: stderr color control.

mod color;
mod db;
mod errors;
mod exec;
mod folder;
mod install;
mod janitor;
mod lock;
mod paths;
mod profiles;
mod proxy;
mod refcount;
mod registry;
mod secrets;
mod session;
mod settings;
mod state;
mod store;
mod telemetry;

pub use color::*;
pub use db::*;
pub use errors::*;
pub use folder::*;
pub use install::*;
pub use janitor::*;
pub use lock::*;
pub use paths::*;
pub use profiles::*;
pub use proxy::*;
pub use refcount::{decrement, expired_leases, increment};
pub use registry::*;
pub use secrets::*;
pub use session::*;
pub use settings::*;
pub use state::*;
pub use store::*;
pub use telemetry::*;
