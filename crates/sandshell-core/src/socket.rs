//! Unix sockets and `SCM_RIGHTS` descriptor passing.
//!
//! A single control message carries up to [`SCM_MAX_FD`] descriptors
//! alongside one data byte; the byte exists only so the receiver can tell a
//! zero-length read (peer gone) from a message without descriptors.
//!
//! [`SCM_MAX_FD`]: sandshell_common::constants::SCM_MAX_FD

use std::mem::size_of;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};
use std::ptr;

use nix::errno::Errno;
use sandshell_common::constants::SCM_MAX_FD;
use sandshell_common::error::{FdPassingReason, ParseError, Result, SandshellError};

/// Socket address family, decoded from its `af_*` name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// `AF_UNIX`.
    Unix,
    /// `AF_INET`.
    Inet,
    /// `AF_INET6`.
    Inet6,
}

impl Family {
    /// Decodes an `af_*` token (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnknownSymbol`] for anything else.
    pub fn parse(input: &str) -> Result<Self> {
        match input.to_ascii_lowercase().as_str() {
            "af_unix" | "unix" => Ok(Self::Unix),
            "af_inet" | "inet" => Ok(Self::Inet),
            "af_inet6" | "inet6" => Ok(Self::Inet6),
            _ => Err(ParseError::UnknownSymbol {
                input: input.to_owned(),
                what: "address family",
            }
            .into()),
        }
    }

    const fn raw(self) -> libc::c_int {
        match self {
            Self::Unix => libc::AF_UNIX,
            Self::Inet => libc::AF_INET,
            Self::Inet6 => libc::AF_INET6,
        }
    }
}

/// Socket type, decoded from its `sock_*` name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// `SOCK_STREAM`.
    Stream,
    /// `SOCK_DGRAM`.
    Dgram,
    /// `SOCK_SEQPACKET`.
    Seqpacket,
}

impl Kind {
    /// Decodes a `sock_*` token (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnknownSymbol`] for anything else.
    pub fn parse(input: &str) -> Result<Self> {
        match input.to_ascii_lowercase().as_str() {
            "sock_stream" | "stream" => Ok(Self::Stream),
            "sock_dgram" | "dgram" => Ok(Self::Dgram),
            "sock_seqpacket" | "seqpacket" => Ok(Self::Seqpacket),
            _ => Err(ParseError::UnknownSymbol {
                input: input.to_owned(),
                what: "socket type",
            }
            .into()),
        }
    }

    const fn raw(self) -> libc::c_int {
        match self {
            Self::Stream => libc::SOCK_STREAM,
            Self::Dgram => libc::SOCK_DGRAM,
            Self::Seqpacket => libc::SOCK_SEQPACKET,
        }
    }
}

/// Creates a connected `AF_UNIX` socket pair.
///
/// Both ends are close-on-exec unless `cloexec` is false.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `socketpair(2)` fails.
pub fn socketpair(kind: Kind, cloexec: bool) -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];
    let mut ty = kind.raw();
    if cloexec {
        ty |= libc::SOCK_CLOEXEC;
    }
    // SAFETY: fds points at two writable ints.
    let ret = unsafe { libc::socketpair(libc::AF_UNIX, ty, 0, fds.as_mut_ptr()) };
    if ret < 0 {
        return Err(SandshellError::sys("socketpair", Errno::last()));
    }
    // SAFETY: both descriptors are freshly created and owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Creates an unconnected socket.
///
/// `protocol` is passed through numerically; `0` selects the default for
/// the family and type.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `socket(2)` fails.
pub fn socket(
    family: Family,
    kind: Kind,
    protocol: i32,
    nonblock: bool,
    cloexec: bool,
) -> Result<OwnedFd> {
    let mut ty = kind.raw();
    if nonblock {
        ty |= libc::SOCK_NONBLOCK;
    }
    if cloexec {
        ty |= libc::SOCK_CLOEXEC;
    }
    // SAFETY: plain syscall, no pointers involved.
    let raw = unsafe { libc::socket(family.raw(), ty, protocol) };
    if raw < 0 {
        return Err(SandshellError::sys("socket", Errno::last()));
    }
    // SAFETY: raw is a freshly created descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Sends descriptors over a unix socket in one `SCM_RIGHTS` message.
///
/// # Errors
///
/// Returns a usage error for an empty list or more than `SCM_MAX_FD`
/// descriptors, and [`SandshellError::Sys`] when `sendmsg(2)` fails.
/// `EINTR` is retried transparently.
#[allow(clippy::cast_possible_truncation)]
pub fn send_fds(socket: RawFd, fds: &[RawFd], nonblock: bool) -> Result<()> {
    if fds.is_empty() {
        return Err(SandshellError::usage("no descriptors to send"));
    }
    if fds.len() > SCM_MAX_FD {
        return Err(SandshellError::usage(format!(
            "at most {SCM_MAX_FD} descriptors fit in one message"
        )));
    }

    let data = [0u8; 1];
    let iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: 1,
    };

    let payload = fds.len() * size_of::<RawFd>();
    // SAFETY: CMSG_SPACE is a pure size computation.
    let cmsg_space = unsafe { libc::CMSG_SPACE(payload as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    // SAFETY: msghdr is plain-old-data; a zeroed value is a valid start.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = std::ptr::from_ref(&iov).cast_mut();
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = cmsg_space;

    // SAFETY: msg.msg_control points at cmsg_space writable bytes; the
    // returned header and its data region stay inside cmsg_buf.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null() {
            return Err(SandshellError::sys("sendmsg", Errno::EINVAL));
        }
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(payload as u32) as usize;
        ptr::copy_nonoverlapping(fds.as_ptr().cast::<u8>(), libc::CMSG_DATA(cmsg), payload);
    }

    let flags = if nonblock { libc::MSG_DONTWAIT } else { 0 };
    loop {
        // SAFETY: msg and everything it points at live until the call returns.
        let ret = unsafe { libc::sendmsg(socket, &msg, flags) };
        if ret >= 0 {
            tracing::debug!(socket, count = fds.len(), "sent descriptors");
            return Ok(());
        }
        let errno = Errno::last();
        if errno != Errno::EINTR {
            return Err(SandshellError::sys("sendmsg", errno));
        }
    }
}

/// Receives up to `max` descriptors from a unix socket.
///
/// The descriptors are received close-on-exec when `cloexec` is set, via
/// `MSG_CMSG_CLOEXEC`, so no window exists where they could leak across an
/// exec.
///
/// # Errors
///
/// Returns [`SandshellError::FdPassing`] when the peer closed the socket,
/// when the message carries no control message, when the control message
/// is not `SCM_RIGHTS`, or when the sender passed more descriptors than
/// `max` and the kernel truncated the message (the descriptors that did
/// arrive are closed, so none leak); [`SandshellError::Sys`] when
/// `recvmsg(2)` fails. `EINTR` is retried transparently.
#[allow(clippy::cast_possible_truncation)]
pub fn recv_fds(socket: RawFd, max: usize, cloexec: bool) -> Result<Vec<OwnedFd>> {
    if max == 0 || max > SCM_MAX_FD {
        return Err(SandshellError::usage(format!(
            "descriptor count must be between 1 and {SCM_MAX_FD}"
        )));
    }

    let mut data = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr().cast(),
        iov_len: 1,
    };

    let payload = max * size_of::<RawFd>();
    // SAFETY: CMSG_SPACE is a pure size computation.
    let cmsg_space = unsafe { libc::CMSG_SPACE(payload as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    // SAFETY: msghdr is plain-old-data; a zeroed value is a valid start.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = cmsg_space;

    let flags = if cloexec { libc::MSG_CMSG_CLOEXEC } else { 0 };
    let received = loop {
        // SAFETY: msg and everything it points at live until the call returns.
        let ret = unsafe { libc::recvmsg(socket, &mut msg, flags) };
        if ret >= 0 {
            break ret;
        }
        let errno = Errno::last();
        if errno != Errno::EINTR {
            return Err(SandshellError::sys("recvmsg", errno));
        }
    };

    if received == 0 {
        return Err(SandshellError::FdPassing {
            reason: FdPassingReason::ClosedByPeer,
        });
    }
    let truncated = msg.msg_flags & libc::MSG_CTRUNC != 0;

    // SAFETY: msg.msg_control still points into cmsg_buf, and the kernel
    // filled msg_controllen with the bytes it wrote there.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null() {
            return Err(SandshellError::FdPassing {
                reason: if truncated {
                    FdPassingReason::TruncatedControlMessage
                } else {
                    FdPassingReason::NoControlMessage
                },
            });
        }
        if (*cmsg).cmsg_level != libc::SOL_SOCKET || (*cmsg).cmsg_type != libc::SCM_RIGHTS {
            return Err(SandshellError::FdPassing {
                reason: FdPassingReason::UnexpectedControlMessage,
            });
        }
        let header = libc::CMSG_LEN(0) as usize;
        let count = ((*cmsg).cmsg_len.saturating_sub(header)) / size_of::<RawFd>();
        let mut out = Vec::with_capacity(count);
        let data_ptr = libc::CMSG_DATA(cmsg);
        for i in 0..count {
            let mut fd: RawFd = 0;
            ptr::copy_nonoverlapping(
                data_ptr.add(i * size_of::<RawFd>()),
                (&raw mut fd).cast::<u8>(),
                size_of::<RawFd>(),
            );
            out.push(OwnedFd::from_raw_fd(fd));
        }
        if truncated {
            // Dropping `out` closes the descriptors that did arrive; the
            // kernel already closed the truncated tail.
            return Err(SandshellError::FdPassing {
                reason: FdPassingReason::TruncatedControlMessage,
            });
        }
        tracing::debug!(socket, count = out.len(), "received descriptors");
        Ok(out)
    }
}
