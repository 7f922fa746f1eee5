//! `sbsh sandbox` — process hardening: no-new-privs and securebits.

use clap::{Args, Subcommand};
use sandshell_common::constants::EXIT_SUCCESS;
use sandshell_common::error::Result;
use sandshell_core::process;

use super::launcher_fail;

/// Hardening subcommands.
#[derive(Subcommand, Debug)]
pub enum SandboxCommand {
    /// Forbid gaining privileges, for this process and all descendants.
    NoNewPrivs(NoNewPrivsArgs),
    /// Raise securebits on the calling process.
    SetSecurebits(SetSecurebitsArgs),
}

/// Arguments for `sandbox no-new-privs`.
#[derive(Args, Debug)]
pub struct NoNewPrivsArgs {
    /// Program to exec afterwards, with its arguments.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Arguments for `sandbox set-securebits`.
#[derive(Args, Debug)]
pub struct SetSecurebitsArgs {
    /// Also raise the matching lock bits, freezing the new values.
    #[arg(short = 'L')]
    pub lock: bool,

    /// Bits to raise: noroot, no_setuid_fixup, keep_caps,
    /// no_cap_ambient_raise.
    #[arg(required = true)]
    pub bits: Vec<String>,

    /// Program to exec afterwards, with its arguments.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Dispatches a `sandbox` subcommand.
#[must_use]
pub fn execute(cmd: SandboxCommand) -> i32 {
    match cmd {
        SandboxCommand::NoNewPrivs(args) => no_new_privs(&args),
        SandboxCommand::SetSecurebits(args) => set_securebits(&args),
    }
}

fn maybe_exec(command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Ok(EXIT_SUCCESS);
    }
    let never = process::exec(command)?;
    match never {}
}

fn no_new_privs(args: &NoNewPrivsArgs) -> i32 {
    let result = (|| -> Result<i32> {
        process::no_new_privs()?;
        maybe_exec(&args.command)
    })();
    result.unwrap_or_else(|err| launcher_fail(&err))
}

fn set_securebits(args: &SetSecurebitsArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let mut bits = 0u64;
        for name in &args.bits {
            bits |= process::parse_securebit(name)?;
        }
        process::raise_securebits(bits, args.lock)?;
        maybe_exec(&args.command)
    })();
    result.unwrap_or_else(|err| launcher_fail(&err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_securebit_names_exit_with_usage() {
        let args = SetSecurebitsArgs {
            lock: false,
            bits: vec!["keepcaps".into()],
            command: Vec::new(),
        };
        assert_eq!(set_securebits(&args), 2);
    }
}
