//! `sbsh id` — user, group, and supplementary-group identity.

use clap::{Args, Subcommand};
use nix::errno::Errno;
use nix::unistd::Gid;
use sandshell_common::constants::EXIT_SUCCESS;
use sandshell_common::error::{Result, SandshellError};
use sandshell_core::{parse, process};

use super::{check_name, fail, fail_with, launcher_fail};
use crate::output;

/// Identity subcommands.
#[derive(Subcommand, Debug)]
pub enum IdCommand {
    /// Print the real, effective, and saved user ids.
    Getresuid(GetresArgs),
    /// Print the real, effective, and saved group ids.
    Getresgid(GetresArgs),
    /// Set the real, effective, and saved user ids.
    Setresuid(SetresArgs),
    /// Set the real, effective, and saved group ids.
    Setresgid(SetresArgs),
    /// Print the supplementary group ids as an array binding.
    Getgroups(GetgroupsArgs),
    /// Replace the supplementary group list.
    Setgroups(SetgroupsArgs),
    /// Test membership in a group (exit 0 member, 1 not).
    InGroup(InGroupArgs),
}

/// Arguments for the `getres*` commands.
#[derive(Args, Debug)]
pub struct GetresArgs {
    /// Variable for the real id.
    pub var_real: String,
    /// Variable for the effective id.
    pub var_effective: String,
    /// Variable for the saved id.
    pub var_saved: String,
}

/// Arguments for the `setres*` commands.
#[derive(Args, Debug)]
pub struct SetresArgs {
    /// Real id: numeric, symbolic, or `-1` for unchanged.
    #[arg(allow_hyphen_values = true)]
    pub real: String,
    /// Effective id.
    #[arg(allow_hyphen_values = true)]
    pub effective: String,
    /// Saved id.
    #[arg(allow_hyphen_values = true)]
    pub saved: String,

    /// Program to exec after the change, with its arguments.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Arguments for `id getgroups`.
#[derive(Args, Debug)]
pub struct GetgroupsArgs {
    /// Variable for the array binding.
    pub var: String,
}

/// Arguments for `id setgroups`.
#[derive(Args, Debug)]
pub struct SetgroupsArgs {
    /// Groups to install; an empty list clears the supplementary set.
    pub groups: Vec<String>,

    /// Program to exec after the change, with its arguments.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Arguments for `id in-group`.
#[derive(Args, Debug)]
pub struct InGroupArgs {
    /// Group to test, numeric or by name.
    pub group: String,
}

/// Dispatches an `id` subcommand.
#[must_use]
pub fn execute(cmd: IdCommand) -> i32 {
    match cmd {
        IdCommand::Getresuid(args) => getres(&args, process::getresuid),
        IdCommand::Getresgid(args) => getres(&args, process::getresgid),
        IdCommand::Setresuid(args) => setresuid(&args),
        IdCommand::Setresgid(args) => setresgid(&args),
        IdCommand::Getgroups(args) => getgroups(&args),
        IdCommand::Setgroups(args) => setgroups(&args),
        IdCommand::InGroup(args) => in_group(&args),
    }
}

fn getres(args: &GetresArgs, read: fn() -> Result<process::IdTriple>) -> i32 {
    let result = (|| -> Result<i32> {
        check_name(&args.var_real)?;
        check_name(&args.var_effective)?;
        check_name(&args.var_saved)?;
        let ids = read()?;
        println!("{}", output::scalar(&args.var_real, ids.real));
        println!("{}", output::scalar(&args.var_effective, ids.effective));
        println!("{}", output::scalar(&args.var_saved, ids.saved));
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| fail(&err))
}

/// Kernel failures from `setres*` exit 3, except the transient `EAGAIN`.
fn setres_code(err: &SandshellError) -> i32 {
    match err.errno() {
        Some(Errno::EAGAIN) => fail_with(err, 1),
        Some(_) => fail_with(err, 3),
        None => fail(err),
    }
}

fn maybe_exec(command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Ok(EXIT_SUCCESS);
    }
    let never = process::exec(command)?;
    match never {}
}

fn setresuid(args: &SetresArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let real = parse::uid(&args.real)?;
        let effective = parse::uid(&args.effective)?;
        let saved = parse::uid(&args.saved)?;
        process::setresuid(real, effective, saved)?;
        maybe_exec(&args.command)
    })();
    result.unwrap_or_else(|err| match &err {
        SandshellError::Sys { call: "execvp", .. } => launcher_fail(&err),
        _ => setres_code(&err),
    })
}

fn setresgid(args: &SetresArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let real = parse::gid(&args.real)?;
        let effective = parse::gid(&args.effective)?;
        let saved = parse::gid(&args.saved)?;
        process::setresgid(real, effective, saved)?;
        maybe_exec(&args.command)
    })();
    result.unwrap_or_else(|err| match &err {
        SandshellError::Sys { call: "execvp", .. } => launcher_fail(&err),
        _ => setres_code(&err),
    })
}

fn getgroups(args: &GetgroupsArgs) -> i32 {
    let result = (|| -> Result<i32> {
        check_name(&args.var)?;
        let groups = process::getgroups()?;
        let raw: Vec<u32> = groups.iter().map(|g| g.as_raw()).collect();
        println!("{}", output::array(&args.var, raw));
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| fail(&err))
}

fn setgroups(args: &SetgroupsArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let groups: Vec<Gid> = args
            .groups
            .iter()
            .map(|g| parse::gid_required(g))
            .collect::<Result<Vec<_>>>()?;
        process::setgroups(&groups)?;
        maybe_exec(&args.command)
    })();
    result.unwrap_or_else(|err| launcher_fail(&err))
}

fn in_group(args: &InGroupArgs) -> i32 {
    match parse::gid_required(&args.group) {
        Ok(gid) => match process::in_group(gid) {
            Ok(true) => EXIT_SUCCESS,
            Ok(false) => 1,
            Err(err) => fail_with(&err, 3),
        },
        // Unknown names count as lookup errors, not usage errors; only a
        // malformed invocation exits 2 and clap already covers that.
        Err(err) => fail_with(&err, 3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_group_distinguishes_membership() {
        let egid = nix::unistd::getegid();
        let args = InGroupArgs {
            group: egid.as_raw().to_string(),
        };
        assert_eq!(in_group(&args), 0);
    }

    #[test]
    fn in_group_unknown_name_is_a_lookup_error() {
        let args = InGroupArgs {
            group: "no-such-group-sandshell".into(),
        };
        assert_eq!(in_group(&args), 3);
    }

    #[test]
    fn setres_noop_succeeds() {
        let args = SetresArgs {
            real: "-1".into(),
            effective: "-1".into(),
            saved: "-1".into(),
            command: Vec::new(),
        };
        assert_eq!(setresuid(&args), 0);
        assert_eq!(setresgid(&args), 0);
    }
}
