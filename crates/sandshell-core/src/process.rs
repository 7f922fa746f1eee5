//! Process-wide state: exec, identity, no-new-privs, and securebits.

use std::convert::Infallible;
use std::ffi::CString;

use nix::errno::Errno;
use nix::unistd::{Gid, Uid};
use sandshell_common::error::{ParseError, Result, SandshellError};

/// Converts argument strings into C strings for an exec.
///
/// # Errors
///
/// Returns a usage error when an argument contains a NUL byte.
pub fn to_cstrings(argv: &[String]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|arg| {
            CString::new(arg.as_str())
                .map_err(|_| SandshellError::usage("argument contains a NUL byte"))
        })
        .collect()
}

/// Replaces the current image with `argv`, searching `PATH`.
///
/// Only returns on failure.
///
/// # Errors
///
/// Returns a usage error for an empty argv and [`SandshellError::Sys`]
/// with the exec errno otherwise.
pub fn exec(argv: &[String]) -> Result<Infallible> {
    if argv.is_empty() {
        return Err(SandshellError::usage("no program to run"));
    }
    let argv_c = to_cstrings(argv)?;
    match nix::unistd::execvp(&argv_c[0], &argv_c) {
        Ok(infallible) => match infallible {},
        Err(errno) => Err(SandshellError::sys("execvp", errno)),
    }
}

/// Forbids this process and its descendants from gaining privileges.
///
/// Sets `PR_SET_NO_NEW_PRIVS`; there is no way back.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when the prctl fails.
pub fn no_new_privs() -> Result<()> {
    // SAFETY: plain prctl with integer arguments.
    let ret = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if ret < 0 {
        return Err(SandshellError::sys("prctl", Errno::last()));
    }
    tracing::debug!("no_new_privs set");
    Ok(())
}

// Securebits from linux/securebits.h. Each bit's lock is the next bit up.
const SECBIT_NOROOT: u64 = 0x1;
const SECBIT_NO_SETUID_FIXUP: u64 = 0x4;
const SECBIT_KEEP_CAPS: u64 = 0x10;
const SECBIT_NO_CAP_AMBIENT_RAISE: u64 = 0x40;

const PR_GET_SECUREBITS: libc::c_int = 27;
const PR_SET_SECUREBITS: libc::c_int = 28;

/// Decodes a securebit name.
///
/// # Errors
///
/// Returns [`ParseError::UnknownSymbol`] for anything but `noroot`,
/// `no_setuid_fixup`, `keep_caps`, or `no_cap_ambient_raise`.
pub fn parse_securebit(input: &str) -> Result<u64> {
    let bit = match input.to_ascii_lowercase().as_str() {
        "noroot" => SECBIT_NOROOT,
        "no_setuid_fixup" => SECBIT_NO_SETUID_FIXUP,
        "keep_caps" => SECBIT_KEEP_CAPS,
        "no_cap_ambient_raise" => SECBIT_NO_CAP_AMBIENT_RAISE,
        _ => {
            return Err(ParseError::UnknownSymbol {
                input: input.to_owned(),
                what: "securebit",
            }
            .into());
        }
    };
    Ok(bit)
}

/// Raises securebits on the calling process.
///
/// `bits` is an OR of values from [`parse_securebit`]; with `lock` the
/// matching lock bits are raised too, freezing each flag at its new value.
/// Already-set bits are preserved.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when reading or writing the bits fails;
/// `EPERM` means the caller lacks `CAP_SETPCAP`.
pub fn raise_securebits(bits: u64, lock: bool) -> Result<()> {
    // SAFETY: plain prctl with integer arguments.
    let current = unsafe { libc::prctl(PR_GET_SECUREBITS, 0, 0, 0, 0) };
    if current < 0 {
        return Err(SandshellError::sys("prctl", Errno::last()));
    }
    #[allow(clippy::cast_sign_loss)]
    let mut value = current as u64 | bits;
    if lock {
        // Lock bits sit one position above their flag.
        value |= bits << 1;
    }
    // SAFETY: plain prctl with integer arguments.
    let ret = unsafe { libc::prctl(PR_SET_SECUREBITS, value as libc::c_ulong, 0, 0, 0) };
    if ret < 0 {
        return Err(SandshellError::sys("prctl", Errno::last()));
    }
    tracing::debug!(value, "securebits updated");
    Ok(())
}

/// Real, effective, and saved ids as a printable triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdTriple {
    /// Real id.
    pub real: u32,
    /// Effective id.
    pub effective: u32,
    /// Saved id.
    pub saved: u32,
}

/// Reads the real, effective, and saved user ids.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `getresuid(2)` fails.
pub fn getresuid() -> Result<IdTriple> {
    let ids = nix::unistd::getresuid().map_err(|errno| SandshellError::sys("getresuid", errno))?;
    Ok(IdTriple {
        real: ids.real.as_raw(),
        effective: ids.effective.as_raw(),
        saved: ids.saved.as_raw(),
    })
}

/// Reads the real, effective, and saved group ids.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `getresgid(2)` fails.
pub fn getresgid() -> Result<IdTriple> {
    let ids = nix::unistd::getresgid().map_err(|errno| SandshellError::sys("getresgid", errno))?;
    Ok(IdTriple {
        real: ids.real.as_raw(),
        effective: ids.effective.as_raw(),
        saved: ids.saved.as_raw(),
    })
}

fn sentinel_uid(id: Option<Uid>) -> Uid {
    // -1 leaves the corresponding id unchanged, as with setresuid(2).
    id.unwrap_or_else(|| Uid::from_raw(u32::MAX))
}

fn sentinel_gid(id: Option<Gid>) -> Gid {
    id.unwrap_or_else(|| Gid::from_raw(u32::MAX))
}

/// Sets the real, effective, and saved user ids.
///
/// `None` leaves the corresponding id unchanged.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `setresuid(2)` fails; `EAGAIN`
/// indicates a temporary condition (for instance a `RLIMIT_NPROC` hit),
/// everything else is a permission or argument problem.
pub fn setresuid(real: Option<Uid>, effective: Option<Uid>, saved: Option<Uid>) -> Result<()> {
    nix::unistd::setresuid(
        sentinel_uid(real),
        sentinel_uid(effective),
        sentinel_uid(saved),
    )
    .map_err(|errno| SandshellError::sys("setresuid", errno))
}

/// Sets the real, effective, and saved group ids.
///
/// `None` leaves the corresponding id unchanged.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `setresgid(2)` fails.
pub fn setresgid(real: Option<Gid>, effective: Option<Gid>, saved: Option<Gid>) -> Result<()> {
    nix::unistd::setresgid(
        sentinel_gid(real),
        sentinel_gid(effective),
        sentinel_gid(saved),
    )
    .map_err(|errno| SandshellError::sys("setresgid", errno))
}

/// Reads the supplementary group ids.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `getgroups(2)` fails.
pub fn getgroups() -> Result<Vec<Gid>> {
    nix::unistd::getgroups().map_err(|errno| SandshellError::sys("getgroups", errno))
}

/// Replaces the supplementary group list; an empty list is allowed.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `setgroups(2)` fails; needs
/// `CAP_SETGID`.
pub fn setgroups(groups: &[Gid]) -> Result<()> {
    nix::unistd::setgroups(groups).map_err(|errno| SandshellError::sys("setgroups", errno))
}

/// Whether the process is a member of the given group.
///
/// Checks the effective gid and the supplementary list.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when the group list cannot be read.
pub fn in_group(gid: Gid) -> Result<bool> {
    if nix::unistd::getegid() == gid {
        return Ok(true);
    }
    Ok(getgroups()?.contains(&gid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn securebit_names_decode() {
        assert_eq!(parse_securebit("keep_caps").unwrap(), 0x10);
        assert_eq!(parse_securebit("NOROOT").unwrap(), 0x1);
        assert!(parse_securebit("keepcaps").is_err());
    }

    #[test]
    fn getres_triples_are_consistent_with_simple_getters() {
        let uids = getresuid().unwrap();
        assert_eq!(uids.effective, nix::unistd::geteuid().as_raw());
        let gids = getresgid().unwrap();
        assert_eq!(gids.effective, nix::unistd::getegid().as_raw());
    }

    #[test]
    fn setresuid_with_all_unchanged_is_a_no_op() {
        setresuid(None, None, None).unwrap();
        setresgid(None, None, None).unwrap();
    }

    #[test]
    fn effective_gid_counts_as_membership() {
        assert!(in_group(nix::unistd::getegid()).unwrap());
    }

    #[test]
    fn exec_of_missing_program_reports_enoent() {
        let argv = vec!["/no/such/sandshell/program".to_owned()];
        let err = exec(&argv).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::ENOENT));
    }

    #[test]
    fn empty_exec_is_a_usage_error() {
        assert!(exec(&[]).unwrap_err().is_usage());
    }
}
