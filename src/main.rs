#![allow(clippy::module_name_repetitions)]
//! run-claude binary entry: parse CLI, set up logging, dispatch to handlers.

mod cli;
mod commands;
mod doctor;

use clap::Parser;
use std::process::ExitCode;

use crate::cli::{Cli, Command};
use crate::commands::Context;

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Some(mode) = cli.color {
        run_claude::set_color_mode(mode);
    }
    run_claude::telemetry_init(cli.debug);

    // Catalog and install commands never touch the state dir or secrets.
    let ctx = Context::from_env;
    match cli.command {
        Command::SetFolder { profile, dir } => commands::run_set_folder(&profile, dir),
        Command::Profiles { cmd } => commands::run_profiles(cmd),
        Command::Models { cmd } => commands::run_models(cmd),
        Command::Install { force } => commands::run_install(force),
        Command::Enter {
            token,
            profile,
            dir,
        } => commands::run_enter(&ctx(), &token, &profile, dir),
        Command::Leave { token } => commands::run_leave(&ctx(), &token),
        Command::Janitor { quiet, force } => commands::run_janitor(&ctx(), quiet, force),
        Command::Status => commands::run_status(&ctx()),
        Command::Env { profile, export } => commands::run_env(&ctx(), &profile, export),
        Command::With { profile, cmd } => commands::run_with(&ctx(), &profile, cmd),
        Command::Proxy { cmd } => commands::run_proxy(&ctx(), cmd),
        Command::Db { cmd } => commands::run_db(&ctx(), cmd),
        Command::Secrets { cmd } => commands::run_secrets(&ctx(), cmd),
        Command::Doctor => commands::run_doctor_command(&ctx()),
    }
}
