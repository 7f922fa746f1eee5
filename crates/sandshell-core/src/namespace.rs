//! Namespace creation, entry, and the child launcher.
//!
//! The launcher makes exactly one `clone(2)` attempt per call. When the
//! caller wants to block until the child is underway, a close-on-exec pipe
//! provides the handshake: the parent reads until end-of-file, which the
//! kernel delivers once the child either execs (the descriptor closes with
//! the old image) or exits.

use std::convert::Infallible;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::path::Path;

use nix::fcntl::OFlag;
use nix::sched::CloneFlags;
use nix::unistd::{Pid, pipe2, read};
use sandshell_common::error::{Result, SandshellError};

use crate::process;

/// Which namespaces to create or join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceSet {
    /// Cgroup namespace.
    pub cgroup: bool,
    /// IPC namespace.
    pub ipc: bool,
    /// Network namespace.
    pub net: bool,
    /// Mount namespace.
    pub mount: bool,
    /// PID namespace.
    pub pid: bool,
    /// User namespace.
    pub user: bool,
    /// UTS namespace.
    pub uts: bool,
}

impl NamespaceSet {
    /// The corresponding `CLONE_NEW*` flag bits.
    #[must_use]
    pub fn clone_flags(self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        if self.cgroup {
            flags |= CloneFlags::CLONE_NEWCGROUP;
        }
        if self.ipc {
            flags |= CloneFlags::CLONE_NEWIPC;
        }
        if self.net {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        if self.mount {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        if self.pid {
            flags |= CloneFlags::CLONE_NEWPID;
        }
        if self.user {
            flags |= CloneFlags::CLONE_NEWUSER;
        }
        if self.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }
        flags
    }

    /// Whether no namespace was selected.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self == Self::default()
    }
}

/// A single child-launch request.
#[derive(Debug)]
pub struct CloneRequest<'a> {
    /// Namespaces to create for the child.
    pub namespaces: NamespaceSet,
    /// Give the child the caller's parent instead of the caller
    /// (`CLONE_PARENT`).
    pub share_parent: bool,
    /// Block until the child has exec'd or exited.
    pub wait_for_exec: bool,
    /// Program and arguments the child execs.
    pub argv: &'a [String],
}

/// Clones a child in the requested namespaces; the child execs `argv`.
///
/// Returns the child's pid as seen by the caller. With no namespaces
/// selected this is plain child creation. The child exits with 127 when
/// the exec fails.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when the pipe or the clone itself
/// fails. An exec failure inside the child is *not* an error here; it
/// surfaces through the child's exit status.
#[allow(clippy::print_stderr)]
pub fn clone_child(request: &CloneRequest<'_>) -> Result<Pid> {
    if request.argv.is_empty() {
        return Err(SandshellError::usage("no program to run in the child"));
    }

    let mut flags = request.namespaces.clone_flags();
    if request.share_parent {
        flags |= CloneFlags::CLONE_PARENT;
    }

    let handshake = if request.wait_for_exec {
        let (rd, wr) =
            pipe2(OFlag::O_CLOEXEC).map_err(|errno| SandshellError::sys("pipe2", errno))?;
        Some((rd, wr))
    } else {
        None
    };

    // Everything the child needs is prepared before the clone; the callback
    // only execs and reports failure. The child's copy of the pipe's write
    // end rides along close-on-exec, so a successful exec is what signals
    // the parent.
    let argv_c = process::to_cstrings(request.argv)?;
    let cb = Box::new(move || -> isize {
        match nix::unistd::execvp(&argv_c[0], &argv_c) {
            Ok(infallible) => match infallible {},
            Err(errno) => {
                eprintln!("exec failed: {errno}");
                127
            }
        }
    });

    let mut stack = vec![0u8; 1024 * 1024];
    // SAFETY: the callback only execs or exits; it touches no parent-side
    // locks or allocator state beyond what was prepared above.
    let pid = unsafe { nix::sched::clone(cb, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|errno| SandshellError::sys("clone", errno))?;
    tracing::debug!(child = %pid, ?flags, "cloned child");

    if let Some((rd, wr)) = handshake {
        // Closing the parent's write end makes the child's copy the only
        // one; end-of-file then means "exec'd or gone".
        drop(wr);
        let mut buf = [0u8; 1];
        loop {
            match read(&rd, &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => {}
                Err(errno) => return Err(SandshellError::sys("read", errno)),
            }
        }
    }

    Ok(pid)
}

/// Unshares the given namespaces, then execs `argv` in place.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `unshare(2)` or the exec fails.
pub fn unshare_and_exec(namespaces: NamespaceSet, argv: &[String]) -> Result<Infallible> {
    nix::sched::unshare(namespaces.clone_flags())
        .map_err(|errno| SandshellError::sys("unshare", errno))?;
    tracing::debug!(?namespaces, "unshared namespaces");
    process::exec(argv)
}

/// Joins the namespace behind `fd`, then execs `argv` in place.
///
/// The namespace flags act as a type check: `setns(2)` fails with `EINVAL`
/// when the descriptor does not refer to a namespace of the given kind.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `setns(2)` or the exec fails.
pub fn setns_and_exec(fd: RawFd, namespaces: NamespaceSet, argv: &[String]) -> Result<Infallible> {
    // SAFETY: fd was decoded by `parse::fd` and names an inherited
    // descriptor that stays open for the call.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    nix::sched::setns(borrowed, namespaces.clone_flags())
        .map_err(|errno| SandshellError::sys("setns", errno))?;
    tracing::debug!(fd, ?namespaces, "joined namespace");
    process::exec(argv)
}

/// Changes the root directory to `dir`, then execs `argv` in place.
///
/// The working directory moves to the new root first so no reference to
/// the old tree survives.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `chroot(2)`, `chdir(2)`, or the
/// exec fails.
pub fn chroot_and_exec(dir: &Path, argv: &[String]) -> Result<Infallible> {
    nix::unistd::chroot(dir).map_err(|errno| SandshellError::sys("chroot", errno))?;
    nix::unistd::chdir("/").map_err(|errno| SandshellError::sys("chdir", errno))?;
    tracing::debug!(dir = %dir.display(), "changed root");
    process::exec(argv)
}

#[cfg(test)]
mod tests {
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::Uid;

    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| (*p).to_owned()).collect()
    }

    #[test]
    fn empty_set_has_no_flags() {
        assert!(NamespaceSet::default().is_empty());
        assert_eq!(NamespaceSet::default().clone_flags(), CloneFlags::empty());
    }

    #[test]
    fn each_namespace_maps_to_its_flag() {
        let set = NamespaceSet {
            net: true,
            uts: true,
            ..NamespaceSet::default()
        };
        assert_eq!(
            set.clone_flags(),
            CloneFlags::CLONE_NEWNET | CloneFlags::CLONE_NEWUTS
        );
    }

    #[test]
    fn plain_clone_runs_the_child_to_completion() {
        let args = argv(&["true"]);
        let request = CloneRequest {
            namespaces: NamespaceSet::default(),
            share_parent: false,
            wait_for_exec: false,
            argv: &args,
        };
        let pid = clone_child(&request).unwrap();
        assert!(pid.as_raw() > 0);
        match waitpid(pid, None).unwrap() {
            WaitStatus::Exited(_, code) => assert_eq!(code, 0),
            other => panic!("unexpected wait status: {other:?}"),
        }
    }

    #[test]
    fn handshake_clone_observes_exec_failure_as_127() {
        let args = argv(&["/no/such/sandshell/program"]);
        let request = CloneRequest {
            namespaces: NamespaceSet::default(),
            share_parent: false,
            wait_for_exec: true,
            argv: &args,
        };
        let pid = clone_child(&request).unwrap();
        match waitpid(pid, None).unwrap() {
            WaitStatus::Exited(_, code) => assert_eq!(code, 127),
            other => panic!("unexpected wait status: {other:?}"),
        }
    }

    #[test]
    fn empty_argv_is_a_usage_error() {
        let args: Vec<String> = Vec::new();
        let request = CloneRequest {
            namespaces: NamespaceSet::default(),
            share_parent: false,
            wait_for_exec: false,
            argv: &args,
        };
        assert!(clone_child(&request).unwrap_err().is_usage());
    }

    #[test]
    fn uts_namespace_clone_needs_privilege() {
        let args = argv(&["true"]);
        let request = CloneRequest {
            namespaces: NamespaceSet {
                uts: true,
                ..NamespaceSet::default()
            },
            share_parent: false,
            wait_for_exec: false,
            argv: &args,
        };
        let result = clone_child(&request);
        if Uid::effective().is_root() {
            let pid = result.unwrap();
            let _ = waitpid(pid, None);
        } else {
            assert_eq!(
                result.unwrap_err().errno(),
                Some(nix::errno::Errno::EPERM)
            );
        }
    }
}
