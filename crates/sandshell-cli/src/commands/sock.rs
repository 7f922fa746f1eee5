//! `sbsh sock` — unix sockets and SCM_RIGHTS descriptor passing.

use std::os::unix::io::AsRawFd;

use clap::{Args, Subcommand};
use sandshell_common::constants::EXIT_SUCCESS;
use sandshell_common::error::{FdPassingReason, Result, SandshellError};
use sandshell_core::parse;
use sandshell_core::socket::{self, Family, Kind};

use super::{check_name, fail, fail_with};
use crate::output;

/// Socket subcommands.
#[derive(Subcommand, Debug)]
pub enum SockCommand {
    /// Create a connected AF_UNIX pair.
    Socketpair(SocketpairArgs),
    /// Create an unconnected socket.
    Socket(SocketArgs),
    /// Send descriptors over a unix socket.
    SendFds(SendFdsArgs),
    /// Receive descriptors from a unix socket.
    RecvFds(RecvFdsArgs),
}

/// Arguments for `sock socketpair`.
#[derive(Args, Debug)]
pub struct SocketpairArgs {
    /// Socket type: `stream` or `dgram`.
    pub kind: String,
    /// Variable for the first end.
    pub var1: String,
    /// Variable for the second end.
    pub var2: String,
}

/// Arguments for `sock socket`.
#[derive(Args, Debug)]
pub struct SocketArgs {
    /// Open the socket non-blocking.
    #[arg(short = 'N')]
    pub nonblock: bool,

    /// Make the descriptor close-on-exec.
    #[arg(short = 'C')]
    pub cloexec: bool,

    /// Address family: af_unix, af_inet, af_inet6.
    pub family: String,
    /// Socket type: sock_stream, sock_dgram, sock_seqpacket.
    pub kind: String,
    /// Numeric protocol; 0 for the default.
    pub protocol: String,
    /// Variable to bind.
    pub var: String,
}

/// Arguments for `sock send-fds`.
#[derive(Args, Debug)]
pub struct SendFdsArgs {
    /// Do not block when the socket buffer is full.
    #[arg(short = 'N')]
    pub nonblock: bool,

    /// Unix socket to send over.
    pub sockfd: String,
    /// Descriptors to pass, at least one.
    #[arg(required = true)]
    pub fds: Vec<String>,
}

/// Arguments for `sock recv-fds`.
#[derive(Args, Debug)]
pub struct RecvFdsArgs {
    /// Receive the descriptors close-on-exec.
    #[arg(short = 'C')]
    pub cloexec: bool,

    /// Unix socket to receive from.
    pub sockfd: String,
    /// Maximum number of descriptors to accept.
    pub count: String,
    /// Variable for the array binding.
    pub var: String,
}

/// Dispatches a `sock` subcommand.
#[must_use]
pub fn execute(cmd: SockCommand) -> i32 {
    match cmd {
        SockCommand::Socketpair(args) => socketpair(&args),
        SockCommand::Socket(args) => create_socket(&args),
        SockCommand::SendFds(args) => send_fds(&args),
        SockCommand::RecvFds(args) => recv_fds(&args),
    }
}

fn socketpair(args: &SocketpairArgs) -> i32 {
    let result = (|| -> Result<i32> {
        check_name(&args.var1)?;
        check_name(&args.var2)?;
        let kind = Kind::parse(&args.kind)?;
        let (first, second) = socket::socketpair(kind, false)?;
        println!("{}", output::scalar(&args.var1, first.as_raw_fd()));
        println!("{}", output::scalar(&args.var2, second.as_raw_fd()));
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| fail(&err))
}

fn create_socket(args: &SocketArgs) -> i32 {
    let result = (|| -> Result<i32> {
        check_name(&args.var)?;
        let family = Family::parse(&args.family)?;
        let kind = Kind::parse(&args.kind)?;
        let protocol: i32 = args
            .protocol
            .parse()
            .map_err(|_| SandshellError::usage("protocol must be a number"))?;
        let fd = socket::socket(family, kind, protocol, args.nonblock, args.cloexec)?;
        println!("{}", output::scalar(&args.var, fd.as_raw_fd()));
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| fail(&err))
}

fn send_fds(args: &SendFdsArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let sockfd = parse::fd(&args.sockfd)?;
        let fds = args
            .fds
            .iter()
            .map(|f| parse::fd(f))
            .collect::<Result<Vec<_>>>()?;
        socket::send_fds(sockfd, &fds, args.nonblock)?;
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| fail(&err))
}

fn recv_fds(args: &RecvFdsArgs) -> i32 {
    let result = (|| -> Result<i32> {
        check_name(&args.var)?;
        let sockfd = parse::fd(&args.sockfd)?;
        let count: usize = args
            .count
            .parse()
            .map_err(|_| SandshellError::usage("descriptor count must be a number"))?;
        let fds = socket::recv_fds(sockfd, count, args.cloexec)?;
        let raw: Vec<i32> = fds.iter().map(AsRawFd::as_raw_fd).collect();
        println!("{}", output::array(&args.var, raw));
        Ok(EXIT_SUCCESS)
    })();
    result.unwrap_or_else(|err| match &err {
        SandshellError::FdPassing { reason } => match reason {
            FdPassingReason::ClosedByPeer => fail_with(&err, 5),
            FdPassingReason::NoControlMessage => fail_with(&err, 4),
            FdPassingReason::UnexpectedControlMessage => fail_with(&err, 3),
            FdPassingReason::TruncatedControlMessage => fail_with(&err, 6),
        },
        _ => fail(&err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socketpair_prints_two_bindings_or_rejects_bad_names() {
        let args = SocketpairArgs {
            kind: "stream".into(),
            var1: "A".into(),
            var2: "2bad".into(),
        };
        assert_eq!(socketpair(&args), 2);
    }

    #[test]
    fn unknown_family_is_a_usage_error() {
        let args = SocketArgs {
            nonblock: false,
            cloexec: false,
            family: "af_packet".into(),
            kind: "sock_dgram".into(),
            protocol: "0".into(),
            var: "S".into(),
        };
        assert_eq!(create_socket(&args), 2);
    }
}
