//! `sbsh ns` — namespace creation, entry, and the child launcher.

use clap::{Args, Subcommand};
use sandshell_common::constants::EXIT_SUCCESS;
use sandshell_common::error::Result;
use sandshell_core::namespace::{self, CloneRequest, NamespaceSet};
use sandshell_core::parse;
use std::path::PathBuf;

use super::{check_name, fail, launcher_fail};
use crate::output;

/// Namespace flag letters shared by the `ns` subcommands.
#[derive(Args, Debug, Clone, Copy)]
pub struct NamespaceFlags {
    /// New cgroup namespace.
    #[arg(short = 'C')]
    pub cgroup: bool,
    /// New IPC namespace.
    #[arg(short = 'I')]
    pub ipc: bool,
    /// New network namespace.
    #[arg(short = 'N')]
    pub net: bool,
    /// New mount namespace.
    #[arg(short = 'M')]
    pub mount: bool,
    /// New PID namespace.
    #[arg(short = 'p')]
    pub pid: bool,
    /// New user namespace.
    #[arg(short = 'u')]
    pub user: bool,
    /// New UTS namespace.
    #[arg(short = 'U')]
    pub uts: bool,
}

impl NamespaceFlags {
    fn set(self) -> NamespaceSet {
        NamespaceSet {
            cgroup: self.cgroup,
            ipc: self.ipc,
            net: self.net,
            mount: self.mount,
            pid: self.pid,
            user: self.user,
            uts: self.uts,
        }
    }
}

/// Namespace subcommands.
#[derive(Subcommand, Debug)]
pub enum NsCommand {
    /// Clone a child in new namespaces; the child execs the command.
    CloneNs(CloneNsArgs),
    /// Unshare namespaces, then exec the command in place.
    UnshareNs(UnshareNsArgs),
    /// Join the namespace behind a descriptor, then exec the command.
    Setns(SetnsArgs),
    /// Change the root directory, then exec the command.
    Chroot(ChrootArgs),
}

/// Arguments for `ns clone-ns`.
#[derive(Args, Debug)]
pub struct CloneNsArgs {
    /// Block until the child has exec'd or exited.
    #[arg(short = 'V')]
    pub wait_for_exec: bool,

    /// Give the child this process's parent (CLONE_PARENT).
    #[arg(short = 'P')]
    pub share_parent: bool,

    #[command(flatten)]
    pub namespaces: NamespaceFlags,

    /// Print the child pid as a binding of this name.
    #[arg(long = "var")]
    pub var: Option<String>,

    /// Program the child execs, with its arguments.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for `ns unshare-ns`.
#[derive(Args, Debug)]
pub struct UnshareNsArgs {
    #[command(flatten)]
    pub namespaces: NamespaceFlags,

    /// Program to exec, with its arguments.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for `ns setns`.
#[derive(Args, Debug)]
pub struct SetnsArgs {
    #[command(flatten)]
    pub namespaces: NamespaceFlags,

    /// Descriptor referring to a namespace (from /proc/PID/ns/...).
    pub fd: String,

    /// Program to exec, with its arguments.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for `ns chroot`.
#[derive(Args, Debug)]
pub struct ChrootArgs {
    /// New root directory.
    pub dir: PathBuf,

    /// Program to exec, with its arguments.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Dispatches an `ns` subcommand.
#[must_use]
pub fn execute(cmd: NsCommand) -> i32 {
    match cmd {
        NsCommand::CloneNs(args) => clone_ns(&args),
        NsCommand::UnshareNs(args) => unshare_ns(&args),
        NsCommand::Setns(args) => setns(&args),
        NsCommand::Chroot(args) => chroot(&args),
    }
}

fn clone_ns(args: &CloneNsArgs) -> i32 {
    let result = (|| -> Result<i32> {
        if let Some(var) = &args.var {
            check_name(var)?;
        }
        let request = CloneRequest {
            namespaces: args.namespaces.set(),
            share_parent: args.share_parent,
            wait_for_exec: args.wait_for_exec,
            argv: &args.command,
        };
        let pid = namespace::clone_child(&request)?;
        if let Some(var) = &args.var {
            println!("{}", output::scalar(var, pid.as_raw()));
        }
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| fail(&err))
}

fn unshare_ns(args: &UnshareNsArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let never = namespace::unshare_and_exec(args.namespaces.set(), &args.command)?;
        match never {}
    })();
    result.unwrap_or_else(|err| launcher_fail(&err))
}

fn setns(args: &SetnsArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let fd = parse::fd(&args.fd)?;
        let never = namespace::setns_and_exec(fd, args.namespaces.set(), &args.command)?;
        match never {}
    })();
    result.unwrap_or_else(|err| launcher_fail(&err))
}

fn chroot(args: &ChrootArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let never = namespace::chroot_and_exec(&args.dir, &args.command)?;
        match never {}
    })();
    result.unwrap_or_else(|err| launcher_fail(&err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_struct_maps_onto_the_namespace_set() {
        let flags = NamespaceFlags {
            cgroup: false,
            ipc: true,
            net: false,
            mount: true,
            pid: false,
            user: false,
            uts: false,
        };
        let set = flags.set();
        assert!(set.ipc && set.mount);
        assert!(!set.pid && !set.user);
    }

    #[test]
    fn clone_with_a_bad_variable_name_is_usage() {
        let args = CloneNsArgs {
            wait_for_exec: false,
            share_parent: false,
            namespaces: NamespaceFlags {
                cgroup: false,
                ipc: false,
                net: false,
                mount: false,
                pid: false,
                user: false,
                uts: false,
            },
            var: Some("bad-name".into()),
            command: vec!["true".into()],
        };
        assert_eq!(clone_ns(&args), 2);
    }
}
