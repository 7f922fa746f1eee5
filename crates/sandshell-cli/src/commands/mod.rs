//! CLI command definitions and dispatch.
//!
//! Every handler returns the process exit code instead of a `Result`,
//! since individual commands document exit codes beyond success/failure
//! and the shell side scripts against them.

pub mod caps;
pub mod fd;
pub mod id;
pub mod mount;
pub mod ns;
pub mod sandbox;
pub mod seccomp;
pub mod sock;

use clap::{Parser, Subcommand};
use sandshell_common::constants::{BIN_NAME, EXIT_FAILURE, EXIT_USAGE};
use sandshell_common::error::SandshellError;

/// sandshell — syscall and sandbox-construction commands for shells.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available command groups.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// File-descriptor operations.
    #[command(subcommand)]
    Fd(fd::FdCommand),
    /// User, group, and supplementary-group identity.
    #[command(subcommand)]
    Id(id::IdCommand),
    /// Unix sockets and SCM_RIGHTS descriptor passing.
    #[command(subcommand)]
    Sock(sock::SockCommand),
    /// Process hardening: no-new-privs and securebits.
    #[command(subcommand)]
    Sandbox(sandbox::SandboxCommand),
    /// Namespace creation, entry, and the child launcher.
    #[command(subcommand)]
    Ns(ns::NsCommand),
    /// Bind mounts, remounts, and mount composition.
    #[command(subcommand)]
    Mount(mount::MountCommand),
    /// Capability-set management.
    #[command(subcommand)]
    Caps(caps::CapsCommand),
    /// Build and load or export a seccomp filter.
    #[command(name = "seccomp-filter")]
    Seccomp(seccomp::SeccompArgs),
}

/// Dispatches the parsed command to its handler.
///
/// Returns the process exit code.
#[must_use]
pub fn execute(cli: Cli) -> i32 {
    match cli.command {
        Command::Fd(cmd) => fd::execute(cmd),
        Command::Id(cmd) => id::execute(cmd),
        Command::Sock(cmd) => sock::execute(cmd),
        Command::Sandbox(cmd) => sandbox::execute(cmd),
        Command::Ns(cmd) => ns::execute(cmd),
        Command::Mount(cmd) => mount::execute(cmd),
        Command::Caps(cmd) => caps::execute(cmd),
        Command::Seccomp(args) => seccomp::execute(args),
    }
}

/// Default failure handling: diagnostic to stderr, 2 for usage errors,
/// 1 for everything else.
pub(crate) fn fail(err: &SandshellError) -> i32 {
    eprintln!("{BIN_NAME}: {err}");
    if err.is_usage() { EXIT_USAGE } else { EXIT_FAILURE }
}

/// Like [`fail`] but with a command-specific exit code.
pub(crate) fn fail_with(err: &SandshellError, code: i32) -> i32 {
    eprintln!("{BIN_NAME}: {err}");
    code
}

/// Validates a variable name argument.
pub(crate) fn check_name(name: &str) -> Result<(), SandshellError> {
    if crate::output::is_valid_name(name) {
        Ok(())
    } else {
        Err(SandshellError::usage(format!(
            "`{name}` is not a valid variable name"
        )))
    }
}

/// Exec failure in a launcher: 127 for the exec itself, default mapping
/// for anything that went wrong before it.
pub(crate) fn launcher_fail(err: &SandshellError) -> i32 {
    match err {
        SandshellError::Sys { call: "execvp", .. } => fail_with(err, 127),
        other => fail(other),
    }
}
