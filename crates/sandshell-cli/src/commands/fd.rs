//! `sbsh fd` — operations on numbered file descriptors.

use clap::{Args, Subcommand};
use nix::errno::Errno;
use nix::unistd::{Gid, Uid};
use sandshell_common::constants::EXIT_SUCCESS;
use sandshell_common::error::{Result, SandshellError};
use sandshell_core::fdops::{self, TmpfileAccess};
use sandshell_core::parse;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use super::{check_name, fail, fail_with};
use crate::output;

/// File-descriptor subcommands.
#[derive(Subcommand, Debug)]
pub enum FdCommand {
    /// Create an anonymous RAM-backed file.
    MemfdCreate(MemfdCreateArgs),
    /// Create an unnamed O_TMPFILE file in a directory.
    CreateTmpfile(CreateTmpfileArgs),
    /// Reposition the offset of an open descriptor.
    Lseek(LseekArgs),
    /// Execute the file behind a descriptor.
    Fexecve(FexecveArgs),
    /// Link an open descriptor into the filesystem.
    Flink(FlinkArgs),
    /// Change the mode of the file behind a descriptor.
    Fchmod(FchmodArgs),
    /// Change the owner of the file behind a descriptor.
    Fchown(FchownArgs),
}

/// Arguments for `fd memfd-create`.
#[derive(Args, Debug)]
pub struct MemfdCreateArgs {
    /// Make the descriptor close-on-exec.
    #[arg(short = 'C')]
    pub cloexec: bool,

    /// Variable name to bind; also used as the memfd label.
    pub var: String,
}

/// Arguments for `fd create-tmpfile`.
#[derive(Args, Debug)]
pub struct CreateTmpfileArgs {
    /// Make the descriptor close-on-exec.
    #[arg(short = 'C')]
    pub cloexec: bool,

    /// Forbid ever linking the file into the filesystem (O_EXCL).
    #[arg(short = 'E')]
    pub excl: bool,

    /// Variable name to bind.
    pub var: String,

    /// Directory the unnamed file lives in.
    pub dir: PathBuf,

    /// Access mode: `rw` or `w`.
    pub access: String,

    /// Octal file mode (default 600).
    pub mode: Option<String>,
}

/// Arguments for `fd lseek`.
#[derive(Args, Debug)]
pub struct LseekArgs {
    /// Descriptor to reposition.
    pub fd: String,
    /// Signed byte offset.
    #[arg(allow_hyphen_values = true)]
    pub offset: String,
    /// Seek origin: seek_set, seek_cur, seek_end, seek_data, seek_hole.
    pub whence: String,
}

/// Arguments for `fd fexecve`.
#[derive(Args, Debug)]
pub struct FexecveArgs {
    /// Descriptor of the program to execute.
    pub fd: String,
    /// Argument vector, starting with argv[0].
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub argv: Vec<String>,
}

/// Arguments for `fd flink`.
#[derive(Args, Debug)]
pub struct FlinkArgs {
    /// Descriptor to link.
    pub fd: String,
    /// Path to create.
    pub path: PathBuf,
}

/// Arguments for `fd fchmod`.
#[derive(Args, Debug)]
pub struct FchmodArgs {
    /// Descriptor whose file to change.
    pub fd: String,
    /// Octal mode.
    pub mode: String,
}

/// Arguments for `fd fchown`.
#[derive(Args, Debug)]
pub struct FchownArgs {
    /// Descriptor whose file to change.
    pub fd: String,
    /// Owner as `uid`, `uid:`, `uid:gid`, `:gid`, or `:`; ids numeric,
    /// symbolic, or `-1` for unchanged.
    #[arg(allow_hyphen_values = true)]
    pub owner: String,
}

/// Dispatches an `fd` subcommand.
#[must_use]
pub fn execute(cmd: FdCommand) -> i32 {
    match cmd {
        FdCommand::MemfdCreate(args) => memfd_create(&args),
        FdCommand::CreateTmpfile(args) => create_tmpfile(&args),
        FdCommand::Lseek(args) => lseek(&args),
        FdCommand::Fexecve(args) => fexecve(&args),
        FdCommand::Flink(args) => flink(&args),
        FdCommand::Fchmod(args) => fchmod(&args),
        FdCommand::Fchown(args) => fchown(&args),
    }
}

fn memfd_create(args: &MemfdCreateArgs) -> i32 {
    let result = (|| -> Result<i32> {
        check_name(&args.var)?;
        let fd = fdops::memfd_create(&args.var, args.cloexec)?;
        println!("{}", output::scalar(&args.var, fd.as_raw_fd()));
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| match err.errno() {
        Some(Errno::EFAULT | Errno::EINVAL) => fail_with(&err, 100),
        _ => fail(&err),
    })
}

fn create_tmpfile(args: &CreateTmpfileArgs) -> i32 {
    let result = (|| -> Result<i32> {
        check_name(&args.var)?;
        let access = match args.access.as_str() {
            "rw" => TmpfileAccess::ReadWrite,
            "w" => TmpfileAccess::WriteOnly,
            other => {
                return Err(SandshellError::usage(format!(
                    "access must be `rw` or `w`, not `{other}`"
                )));
            }
        };
        let mode = match &args.mode {
            Some(text) => parse::mode(text)?,
            None => 0o600,
        };
        let fd = fdops::create_tmpfile(&args.dir, access, args.excl, args.cloexec, mode)?;
        println!("{}", output::scalar(&args.var, fd.as_raw_fd()));
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| match err.errno() {
        Some(Errno::EISDIR) => fail_with(&err, 128),
        Some(Errno::EOPNOTSUPP) => fail_with(&err, 129),
        _ => fail(&err),
    })
}

fn lseek(args: &LseekArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let fd = parse::fd(&args.fd)?;
        let offset = parse::offset(&args.offset)?;
        let whence = parse::whence(&args.whence)?;
        let position = fdops::seek(fd, offset, whence)?;
        println!("{}", output::scalar("OFFSET", position));
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| fail(&err))
}

fn fexecve(args: &FexecveArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let fd = parse::fd(&args.fd)?;
        let never = fdops::fexecve(fd, &args.argv)?;
        match never {}
    })();
    result.unwrap_or_else(|err| match err.errno() {
        Some(Errno::ENOSYS) => fail_with(&err, 128),
        Some(Errno::ENOENT) => fail_with(&err, 3),
        _ => fail(&err),
    })
}

fn flink(args: &FlinkArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let fd = parse::fd(&args.fd)?;
        fdops::flink(fd, &args.path)?;
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| match err.errno() {
        Some(Errno::EINVAL) => fail_with(&err, 128),
        _ => fail(&err),
    })
}

fn fchmod(args: &FchmodArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let fd = parse::fd(&args.fd)?;
        let mode = parse::mode(&args.mode)?;
        fdops::fchmod(fd, mode)?;
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| fail(&err))
}

/// Decodes an `owner[:group]` argument.
fn parse_owner(input: &str) -> Result<(Option<Uid>, Option<Gid>)> {
    if input.is_empty() {
        return Err(SandshellError::usage("empty owner argument"));
    }
    match input.split_once(':') {
        None => Ok((parse::uid(input)?, None)),
        Some((uid_text, gid_text)) => {
            let uid = if uid_text.is_empty() {
                None
            } else {
                parse::uid(uid_text)?
            };
            let gid = if gid_text.is_empty() {
                None
            } else {
                parse::gid(gid_text)?
            };
            Ok((uid, gid))
        }
    }
}

fn fchown(args: &FchownArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let fd = parse::fd(&args.fd)?;
        let (owner, group) = parse_owner(&args.owner)?;
        fdops::fchown(fd, owner, group)?;
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| fail(&err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_arguments_decode() {
        assert_eq!(
            parse_owner("0:0").unwrap(),
            (Some(Uid::from_raw(0)), Some(Gid::from_raw(0)))
        );
        assert_eq!(parse_owner("0:").unwrap(), (Some(Uid::from_raw(0)), None));
        assert_eq!(parse_owner(":0").unwrap(), (None, Some(Gid::from_raw(0))));
        assert_eq!(parse_owner(":").unwrap(), (None, None));
        assert_eq!(parse_owner("-1:-1").unwrap(), (None, None));
        assert!(parse_owner("").is_err());
    }

    #[test]
    fn bad_variable_names_exit_with_usage() {
        let args = MemfdCreateArgs {
            cloexec: false,
            var: "9bad".into(),
        };
        assert_eq!(memfd_create(&args), 2);
    }

    #[test]
    fn lseek_on_a_bad_descriptor_fails_plainly() {
        let args = LseekArgs {
            fd: "99".into(),
            offset: "0".into(),
            whence: "seek_set".into(),
        };
        // 99 is within the rlimit but almost certainly closed.
        assert_eq!(lseek(&args), 1);
    }
}
