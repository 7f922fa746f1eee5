//! Unified error types for the sandshell workspace.
//!
//! Three non-overlapping classes: usage errors (malformed arguments,
//! detected before any kernel call), kernel-call failures (carrying the
//! originating errno), and composite-operation failures where partial state
//! had to be unwound. The CLI maps these onto per-command exit codes.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// A classified argument-decoding failure.
///
/// Decoders never guess intent: every rejection states whether the token
/// failed lexically, numerically, or symbolically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The token is not a number where a number was required.
    #[error("`{input}` is not a number")]
    NotANumber {
        /// Offending token.
        input: String,
    },

    /// The token parsed as a number but falls outside the target range.
    #[error("`{input}` is out of range for {what}")]
    OutOfRange {
        /// Offending token.
        input: String,
        /// What the number was being decoded as.
        what: &'static str,
    },

    /// The token is not one of the accepted symbolic values.
    #[error("unknown {what} `{input}`")]
    UnknownSymbol {
        /// Offending token.
        input: String,
        /// What kind of symbol was expected.
        what: &'static str,
    },
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum SandshellError {
    /// Malformed invocation, rejected before any kernel call.
    #[error("{message}")]
    Usage {
        /// Description of what was malformed.
        message: String,
    },

    /// An argument token failed to decode.
    #[error("invalid argument: {source}")]
    Parse {
        /// The classified decode failure.
        #[from]
        source: ParseError,
    },

    /// An I/O operation on a named path failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A system call failed.
    #[error("{call}: {source}")]
    Sys {
        /// Name of the failing call.
        call: &'static str,
        /// Errno reported by the kernel.
        source: Errno,
    },

    /// A seccomp filter operation failed.
    #[error("seccomp: {message}")]
    Seccomp {
        /// Description from the filter library.
        message: String,
    },

    /// A capability-set operation failed.
    #[error("capabilities: {message}")]
    Capability {
        /// Description of the failed operation.
        message: String,
    },

    /// Receiving descriptors over a unix socket failed at the protocol
    /// level rather than in the kernel.
    #[error("fd passing: {reason}")]
    FdPassing {
        /// Which protocol condition was violated.
        reason: FdPassingReason,
    },

    /// The requested operation cannot be performed on this system or set.
    #[error("{message}")]
    Unsupported {
        /// Why the operation is unavailable.
        message: String,
    },
}

/// Protocol-level conditions while receiving descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FdPassingReason {
    /// The peer closed the socket before sending anything.
    #[error("peer closed the socket")]
    ClosedByPeer,
    /// Data arrived but carried no control message.
    #[error("no control message received")]
    NoControlMessage,
    /// A control message arrived but was not `SCM_RIGHTS`.
    #[error("unexpected control message type")]
    UnexpectedControlMessage,
    /// More descriptors arrived than the receiver allowed for; the kernel
    /// truncated the control data and closed the tail.
    #[error("control message truncated")]
    TruncatedControlMessage,
}

impl SandshellError {
    /// Builds a usage error from any displayable message.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Builds a kernel-call error from a call name and errno.
    #[must_use]
    pub const fn sys(call: &'static str, source: Errno) -> Self {
        Self::Sys { call, source }
    }

    /// Builds an I/O error tied to a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the originating errno, if this error came from the kernel.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Sys { source, .. } => Some(*source),
            Self::Io { source, .. } => source.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }

    /// Whether this error is a usage error (malformed invocation).
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Self::Usage { .. } | Self::Parse { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SandshellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_are_classified_as_usage() {
        assert!(SandshellError::usage("bad flag").is_usage());
        let parse: SandshellError = ParseError::NotANumber {
            input: "abc".into(),
        }
        .into();
        assert!(parse.is_usage());
    }

    #[test]
    fn sys_errors_expose_their_errno() {
        let err = SandshellError::sys("mount", Errno::EPERM);
        assert_eq!(err.errno(), Some(Errno::EPERM));
        assert!(!err.is_usage());
    }

    #[test]
    fn parse_error_messages_name_the_token() {
        let err = ParseError::OutOfRange {
            input: "70000".into(),
            what: "port",
        };
        assert_eq!(err.to_string(), "`70000` is out of range for port");
    }
}
