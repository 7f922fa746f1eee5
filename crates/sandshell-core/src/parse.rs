//! Argument decoders shared by every command.
//!
//! Each decoder converts a single textual token into a typed value and
//! classifies failures as [`ParseError`] variants. Decoders are pure: they
//! never touch kernel state, with the single exception of the id decoders,
//! which fall back to a passwd/group database lookup when the token is not
//! numeric.

use std::os::unix::io::RawFd;

use nix::sys::resource::{Resource, getrlimit};
use nix::unistd::{Gid, Group, Uid, User, Whence};
use sandshell_common::error::{ParseError, Result, SandshellError};

/// Decodes a non-negative file descriptor number.
///
/// The value is bounded by the process's soft `RLIMIT_NOFILE`, so a token
/// that cannot name an open descriptor is rejected up front.
///
/// # Errors
///
/// Returns [`ParseError::NotANumber`] for non-numeric input and
/// [`ParseError::OutOfRange`] for negative values or values at or above
/// the descriptor limit.
pub fn fd(input: &str) -> Result<RawFd> {
    let value: i64 = input.parse().map_err(|_| ParseError::NotANumber {
        input: input.to_owned(),
    })?;
    let limit = match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, _hard)) => i64::try_from(soft).unwrap_or(i64::MAX),
        Err(_) => i64::from(i32::MAX),
    };
    if value < 0 || value >= limit || value > i64::from(i32::MAX) {
        return Err(ParseError::OutOfRange {
            input: input.to_owned(),
            what: "file descriptor",
        }
        .into());
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(value as RawFd)
}

/// Decodes an octal file mode.
///
/// The token is always interpreted as octal, with or without a leading
/// zero, and must fit in the permission plus suid/sgid/sticky bits.
///
/// # Errors
///
/// Returns [`ParseError::NotANumber`] for non-octal input and
/// [`ParseError::OutOfRange`] for values above `0o7777`.
pub fn mode(input: &str) -> Result<u32> {
    let value = u32::from_str_radix(input, 8).map_err(|_| ParseError::NotANumber {
        input: input.to_owned(),
    })?;
    if value > 0o7777 {
        return Err(ParseError::OutOfRange {
            input: input.to_owned(),
            what: "file mode",
        }
        .into());
    }
    Ok(value)
}

/// Decodes a signed byte offset.
///
/// # Errors
///
/// Returns [`ParseError::NotANumber`] when the token is not a decimal
/// integer that fits in an `i64`.
pub fn offset(input: &str) -> Result<i64> {
    input.parse().map_err(|_| {
        ParseError::NotANumber {
            input: input.to_owned(),
        }
        .into()
    })
}

/// Decodes a seek origin, by symbolic name or raw number.
///
/// Accepts `SET`, `CUR`, `END`, `DATA`, and `HOLE` (case-insensitive,
/// with or without a `SEEK_` prefix), or the corresponding numeric values
/// `0` through `4`.
///
/// # Errors
///
/// Returns [`ParseError::UnknownSymbol`] when the token matches neither
/// form.
pub fn whence(input: &str) -> Result<Whence> {
    let upper = input.to_ascii_uppercase();
    let named = match upper.strip_prefix("SEEK_").unwrap_or(&upper) {
        "SET" | "0" => Some(Whence::SeekSet),
        "CUR" | "1" => Some(Whence::SeekCur),
        "END" | "2" => Some(Whence::SeekEnd),
        "DATA" | "3" => Some(Whence::SeekData),
        "HOLE" | "4" => Some(Whence::SeekHole),
        _ => None,
    };
    named.ok_or_else(|| {
        ParseError::UnknownSymbol {
            input: input.to_owned(),
            what: "seek origin",
        }
        .into()
    })
}

/// Decodes a user id token.
///
/// `-1` means "leave unchanged" and decodes to `None`. A numeric token
/// decodes directly; anything else is looked up by name in the passwd
/// database.
///
/// # Errors
///
/// Returns [`ParseError::UnknownSymbol`] when the token is neither numeric
/// nor a known user name, and [`SandshellError::Sys`] when the database
/// lookup itself fails.
pub fn uid(input: &str) -> Result<Option<Uid>> {
    if input == "-1" {
        return Ok(None);
    }
    if let Ok(raw) = input.parse::<u32>() {
        return Ok(Some(Uid::from_raw(raw)));
    }
    let user = User::from_name(input)
        .map_err(|errno| SandshellError::sys("getpwnam_r", errno))?
        .ok_or_else(|| ParseError::UnknownSymbol {
            input: input.to_owned(),
            what: "user",
        })?;
    Ok(Some(user.uid))
}

/// Decodes a group id token.
///
/// Mirrors [`uid`]: `-1` decodes to `None`, numbers decode directly, and
/// other tokens are looked up in the group database.
///
/// # Errors
///
/// Returns [`ParseError::UnknownSymbol`] when the token is neither numeric
/// nor a known group name, and [`SandshellError::Sys`] when the database
/// lookup itself fails.
pub fn gid(input: &str) -> Result<Option<Gid>> {
    if input == "-1" {
        return Ok(None);
    }
    if let Ok(raw) = input.parse::<u32>() {
        return Ok(Some(Gid::from_raw(raw)));
    }
    let group = Group::from_name(input)
        .map_err(|errno| SandshellError::sys("getgrnam_r", errno))?
        .ok_or_else(|| ParseError::UnknownSymbol {
            input: input.to_owned(),
            what: "group",
        })?;
    Ok(Some(group.gid))
}

/// Decodes a group id token that must resolve to a concrete id.
///
/// Like [`gid`] but rejects the `-1` sentinel.
///
/// # Errors
///
/// Returns [`ParseError::UnknownSymbol`] for `-1` and for unknown group
/// names.
pub fn gid_required(input: &str) -> Result<Gid> {
    gid(input)?.ok_or_else(|| {
        ParseError::UnknownSymbol {
            input: input.to_owned(),
            what: "group",
        }
        .into()
    })
}
