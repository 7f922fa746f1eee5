//! Operations on numbered file descriptors.
//!
//! Descriptors named on the command line are inherited from the parent and
//! are referenced here by raw number; every function borrows them for the
//! duration of one call only. Descriptors created here are returned as
//! [`OwnedFd`] so they close on every exit path unless the caller hands
//! them off.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::ptr;

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::{Gid, Uid, Whence};
use sandshell_common::error::{Result, SandshellError};

/// Borrows an inherited descriptor by number.
///
/// SAFETY: callers only pass numbers decoded by [`crate::parse::fd`], which
/// name descriptors the parent handed to this process; they remain open for
/// the duration of the call.
fn borrowed(fd: RawFd) -> BorrowedFd<'static> {
    unsafe { BorrowedFd::borrow_raw(fd) }
}

fn cstring(text: &str) -> Result<CString> {
    CString::new(text).map_err(|_| SandshellError::usage("argument contains a NUL byte"))
}

fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SandshellError::usage("path contains a NUL byte"))
}

/// Creates an anonymous RAM-backed file.
///
/// The name is a debugging label only; it appears in `/proc/self/fd` but
/// lives in no filesystem.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `memfd_create(2)` fails.
pub fn memfd_create(name: &str, cloexec: bool) -> Result<OwnedFd> {
    let c_name = cstring(name)?;
    let mut flags: libc::c_uint = 0;
    if cloexec {
        flags |= libc::MFD_CLOEXEC;
    }
    // SAFETY: c_name is a valid NUL-terminated string for the call.
    let raw = unsafe { libc::memfd_create(c_name.as_ptr(), flags) };
    if raw < 0 {
        return Err(SandshellError::sys("memfd_create", Errno::last()));
    }
    tracing::debug!(name, fd = raw, "created memfd");
    // SAFETY: raw is a freshly created descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Access mode for [`create_tmpfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmpfileAccess {
    /// Open read-write.
    ReadWrite,
    /// Open write-only.
    WriteOnly,
}

/// Creates an unnamed file in `dir` via `O_TMPFILE`.
///
/// With `excl` the file can never be linked into the filesystem later;
/// without it, [`flink`] can give it a name.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when the open fails; `EISDIR` and
/// `EOPNOTSUPP` indicate a kernel or filesystem without `O_TMPFILE`
/// support.
pub fn create_tmpfile(
    dir: &Path,
    access: TmpfileAccess,
    excl: bool,
    cloexec: bool,
    mode: u32,
) -> Result<OwnedFd> {
    let c_dir = path_cstring(dir)?;
    let mut flags = libc::O_TMPFILE
        | match access {
            TmpfileAccess::ReadWrite => libc::O_RDWR,
            TmpfileAccess::WriteOnly => libc::O_WRONLY,
        };
    if excl {
        flags |= libc::O_EXCL;
    }
    if cloexec {
        flags |= libc::O_CLOEXEC;
    }
    // SAFETY: c_dir is a valid NUL-terminated path and mode is passed as the
    // third open(2) argument as required by O_TMPFILE.
    let raw = unsafe { libc::open(c_dir.as_ptr(), flags, mode as libc::c_uint) };
    if raw < 0 {
        return Err(SandshellError::sys("open", Errno::last()));
    }
    tracing::debug!(dir = %dir.display(), fd = raw, "created O_TMPFILE file");
    // SAFETY: raw is a freshly opened descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Repositions the file offset of an inherited descriptor.
///
/// Returns the resulting offset from the start of the file.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `lseek(2)` fails.
pub fn seek(fd: RawFd, offset: i64, whence: Whence) -> Result<i64> {
    nix::unistd::lseek(borrowed(fd), offset, whence)
        .map_err(|errno| SandshellError::sys("lseek", errno))
}

/// Executes the file behind an inherited descriptor.
///
/// The current environment is passed through unchanged. Only returns on
/// failure; `ENOSYS` means the system lacks `fexecve(2)` support.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] with the exec errno.
pub fn fexecve(fd: RawFd, argv: &[String]) -> Result<Infallible> {
    let args: Vec<CString> = argv
        .iter()
        .map(|a| cstring(a))
        .collect::<Result<Vec<_>>>()?;
    let env: Vec<CString> = std::env::vars()
        .map(|(k, v)| cstring(&format!("{k}={v}")))
        .collect::<Result<Vec<_>>>()?;

    let mut arg_ptrs: Vec<*const libc::c_char> = args.iter().map(|a| a.as_ptr()).collect();
    arg_ptrs.push(ptr::null());
    let mut env_ptrs: Vec<*const libc::c_char> = env.iter().map(|e| e.as_ptr()).collect();
    env_ptrs.push(ptr::null());

    // SAFETY: both vectors are NULL-terminated arrays of pointers into
    // CStrings that outlive the call.
    let _ = unsafe { libc::fexecve(fd, arg_ptrs.as_ptr(), env_ptrs.as_ptr()) };
    Err(SandshellError::sys("fexecve", Errno::last()))
}

/// Links an open descriptor into the filesystem at `path`.
///
/// Uses `linkat(2)` with `AT_EMPTY_PATH`, which requires
/// `CAP_DAC_READ_SEARCH`. The descriptor must not have been opened with
/// `O_EXCL`.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when the link fails; `EINVAL` indicates
/// missing kernel support for `AT_EMPTY_PATH`.
pub fn flink(fd: RawFd, path: &Path) -> Result<()> {
    let c_path = path_cstring(path)?;
    let empty = c"";
    // SAFETY: both strings are valid and NUL-terminated for the call.
    let ret = unsafe {
        libc::linkat(
            fd,
            empty.as_ptr(),
            libc::AT_FDCWD,
            c_path.as_ptr(),
            libc::AT_EMPTY_PATH,
        )
    };
    if ret < 0 {
        return Err(SandshellError::sys("linkat", Errno::last()));
    }
    tracing::debug!(fd, path = %path.display(), "linked descriptor into filesystem");
    Ok(())
}

/// Changes the mode of the file behind an inherited descriptor.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `fchmod(2)` fails.
pub fn fchmod(fd: RawFd, mode: u32) -> Result<()> {
    nix::sys::stat::fchmod(borrowed(fd), Mode::from_bits_truncate(mode))
        .map_err(|errno| SandshellError::sys("fchmod", errno))
}

/// Changes the owner and group of the file behind an inherited descriptor.
///
/// `None` leaves the corresponding id unchanged.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `fchown(2)` fails.
pub fn fchown(fd: RawFd, owner: Option<Uid>, group: Option<Gid>) -> Result<()> {
    nix::unistd::fchown(borrowed(fd), owner, group)
        .map_err(|errno| SandshellError::sys("fchown", errno))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::os::unix::io::AsRawFd;

    use super::*;

    #[test]
    fn memfd_is_readable_and_writable() {
        let fd = memfd_create("sandshell-test", true).unwrap();
        let mut file = std::fs::File::from(fd);
        file.write_all(b"hello").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = String::new();
        file.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");
    }

    #[test]
    fn memfd_rejects_embedded_nul() {
        assert!(memfd_create("bad\0name", false).is_err());
    }

    #[test]
    fn seek_reports_the_new_offset() {
        let fd = memfd_create("seek-test", true).unwrap();
        let mut file = std::fs::File::from(fd);
        file.write_all(b"0123456789").unwrap();
        let pos = seek(file.as_raw_fd(), 4, Whence::SeekSet).unwrap();
        assert_eq!(pos, 4);
        let pos = seek(file.as_raw_fd(), -2, Whence::SeekEnd).unwrap();
        assert_eq!(pos, 8);
    }

    #[test]
    fn seek_on_a_closed_descriptor_reports_ebadf() {
        let fd = memfd_create("ebadf-test", true).unwrap();
        let raw = fd.as_raw_fd();
        drop(fd);
        let err = seek(raw, 0, Whence::SeekSet).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EBADF));
    }

    #[test]
    fn tmpfile_in_tmp_accepts_writes() {
        // O_TMPFILE needs filesystem support; tmpfs and ext4 both have it.
        let dir = tempfile::tempdir().unwrap();
        let fd = match create_tmpfile(dir.path(), TmpfileAccess::ReadWrite, false, true, 0o600) {
            Ok(fd) => fd,
            Err(err) if err.errno() == Some(Errno::EOPNOTSUPP) => return,
            Err(err) => panic!("create_tmpfile: {err}"),
        };
        let mut file = std::fs::File::from(fd);
        file.write_all(b"anonymous").unwrap();
    }

    #[test]
    fn fchmod_applies_the_requested_bits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        let file = std::fs::File::create(&path).unwrap();
        fchmod(file.as_raw_fd(), 0o640).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(meta.permissions().mode() & 0o7777, 0o640);
    }

    #[test]
    fn fchown_with_both_unchanged_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::File::create(dir.path().join("plain")).unwrap();
        fchown(file.as_raw_fd(), None, None).unwrap();
    }
}
